//! Groups, series, samples, and the shared display timeline.
//!
//! The store owns every sample. Labels are unique across the whole store
//! (compared via [`normalize_label`]); the label map and the positional
//! auto-series table are fields of the store, never globals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use dl_common::{
    make_unique, normalize_label, sanitize_text, Error, GroupId, Result, Sample, SeriesId,
    COLOR_PALETTE,
};

/// Fallback label for series whose label sanitizes to nothing.
const DEFAULT_LABEL: &str = "sensor";

/// Inclusive time range of a group's samples, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start).max(0)
    }

    fn include(self, t: i64) -> Self {
        TimeRange {
            start: self.start.min(t),
            end: self.end.max(t),
        }
    }
}

/// Time span covered by every sample in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalRange {
    pub min_time: i64,
    pub max_time: i64,
    pub duration: i64,
    pub total_points: usize,
}

/// Naming and colouring rules applied when the store creates things.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Prefix of auto-named groups (`<prefix> <n>`).
    pub group_prefix: String,
    /// Series colours, cycled by series creation counter.
    pub palette: Vec<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            group_prefix: "Group".to_string(),
            palette: COLOR_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl StoreSettings {
    /// Colour for the `counter`-th series (one-based).
    pub fn color_for(&self, counter: u64) -> String {
        if self.palette.is_empty() {
            return COLOR_PALETTE[0].to_string();
        }
        let index = (counter.saturating_sub(1) as usize) % self.palette.len();
        self.palette[index].clone()
    }
}

/// A labelled, coloured stream of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub(crate) id: SeriesId,
    pub(crate) group_id: GroupId,
    pub(crate) label: String,
    pub(crate) color: String,
    pub(crate) samples: Vec<Sample>,
}

impl Series {
    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Samples in arrival order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// A named collection of series sharing one display timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) name: String,
    pub(crate) series: Vec<Series>,
    /// Cached range; `None` until a sample arrives or after a recompute
    /// finds nothing.
    pub(crate) range: Option<TimeRange>,
    pub(crate) display_start: Option<i64>,
    /// End of the timeline this group was last laid out against.
    pub(crate) view_end: Option<i64>,
    pub(crate) is_following: bool,
    pub(crate) is_folded: bool,
    pub(crate) body_height: Option<f64>,
}

impl Group {
    pub(crate) fn new(id: GroupId, name: String) -> Self {
        Group {
            id,
            name,
            series: Vec::new(),
            range: None,
            display_start: None,
            view_end: None,
            is_following: true,
            is_folded: false,
            body_height: None,
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    /// Cached `(start_time, last_time)` range.
    pub fn range(&self) -> Option<TimeRange> {
        self.range
    }

    /// Shared display origin assigned by the last alignment.
    pub fn display_start(&self) -> Option<i64> {
        self.display_start
    }

    pub fn is_following(&self) -> bool {
        self.is_following
    }

    pub fn is_folded(&self) -> bool {
        self.is_folded
    }

    pub fn body_height(&self) -> Option<f64> {
        self.body_height
    }

    pub fn series_by_id(&self, series_id: &SeriesId) -> Option<&Series> {
        self.series.iter().find(|s| &s.id == series_id)
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.samples.len()).sum()
    }

    /// Range computed from the samples themselves, ignoring the cache.
    pub fn range_from_samples(&self) -> Option<TimeRange> {
        self.series
            .iter()
            .flat_map(|s| s.samples.iter())
            .fold(None, |acc: Option<TimeRange>, sample| {
                Some(match acc {
                    Some(range) => range.include(sample.t),
                    None => TimeRange {
                        start: sample.t,
                        end: sample.t,
                    },
                })
            })
    }

    fn recompute_range(&mut self) -> Option<TimeRange> {
        self.range = self.range_from_samples();
        self.range
    }

    /// Length of the laid-out content, from display origin to view end.
    pub fn extent(&self) -> i64 {
        let end = self.view_end.or(self.range.map(|r| r.end));
        match (self.display_start, end) {
            (Some(start), Some(end)) => end.saturating_sub(start).max(0),
            _ => 0,
        }
    }
}

/// Layout change of one group produced by an alignment pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAlignment {
    pub group_id: GroupId,
    pub range: Option<TimeRange>,
    pub display_start: Option<i64>,
    /// Content length before the pass, in milliseconds.
    pub previous_extent: i64,
    /// Content length after the pass, in milliseconds.
    pub new_extent: i64,
    /// Whether the viewport was pinned to the live edge.
    pub was_following: bool,
}

/// Result of [`TimeSeriesStore::align_groups_to_global_timeline`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub global_end: Option<i64>,
    pub max_duration: i64,
    pub display_start: Option<i64>,
    pub groups: Vec<GroupAlignment>,
}

/// In-memory owner of all groups, series, and samples.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    pub(crate) groups: Vec<Group>,
    pub(crate) label_map: HashMap<String, SeriesId>,
    pub(crate) auto_series: Vec<Option<SeriesId>>,
    pub(crate) active_group: Option<GroupId>,
    pub(crate) group_counter: u64,
    pub(crate) series_counter: u64,
    pub(crate) settings: StoreSettings,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesStore {
    /// A fresh store holding one default group.
    pub fn new() -> Self {
        Self::with_settings(StoreSettings::default())
    }

    pub fn with_settings(settings: StoreSettings) -> Self {
        let mut store = Self::empty(settings);
        store.create_group(None);
        store
    }

    /// A store with no groups; callers must add one before handing it out.
    pub(crate) fn empty(settings: StoreSettings) -> Self {
        TimeSeriesStore {
            groups: Vec::new(),
            label_map: HashMap::new(),
            auto_series: Vec::new(),
            active_group: None,
            group_counter: 0,
            series_counter: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, group_id: &GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| &g.id == group_id)
    }

    pub(crate) fn group_mut(&mut self, group_id: &GroupId) -> Result<&mut Group> {
        self.groups
            .iter_mut()
            .find(|g| &g.id == group_id)
            .ok_or_else(|| Error::GroupNotFound {
                group_id: group_id.to_string(),
            })
    }

    fn group_index(&self, group_id: &GroupId) -> Result<usize> {
        self.groups
            .iter()
            .position(|g| &g.id == group_id)
            .ok_or_else(|| Error::GroupNotFound {
                group_id: group_id.to_string(),
            })
    }

    /// Positional `index → series` table used for unlabelled samples.
    pub fn auto_series(&self) -> &[Option<SeriesId>] {
        &self.auto_series
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Whether `label` is free, or already belongs to `owner`.
    pub fn is_label_available(&self, label: &str, owner: Option<&SeriesId>) -> bool {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return true;
        }
        match self.label_map.get(&normalized) {
            None => true,
            Some(id) => Some(id) == owner,
        }
    }

    /// `base`, or the first free `base_<n>`.
    pub fn make_unique_label(&self, base: &str) -> String {
        make_unique(base, |candidate| !self.is_label_available(candidate, None))
    }

    pub fn series_by_label(&self, label: &str) -> Option<&Series> {
        let id = self.label_map.get(&normalize_label(label))?;
        self.find_series(id).map(|(_, series)| series)
    }

    /// Whether no other group than `owner` holds `name`, ignoring case.
    pub fn is_group_name_available(&self, name: &str, owner: Option<&GroupId>) -> bool {
        let normalized = normalize_label(name);
        !self
            .groups
            .iter()
            .any(|g| Some(&g.id) != owner && normalize_label(&g.name) == normalized)
    }

    /// `base`, or the first group name `base_<n>` not yet taken.
    pub fn make_unique_group_name(&self, base: &str) -> String {
        make_unique(base, |candidate| !self.is_group_name_available(candidate, None))
    }

    pub(crate) fn series_id_by_label(&self, label: &str) -> Option<&SeriesId> {
        self.label_map.get(&normalize_label(label))
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn find_series(&self, series_id: &SeriesId) -> Option<(&Group, &Series)> {
        self.groups.iter().find_map(|group| {
            group
                .series_by_id(series_id)
                .map(|series| (group, series))
        })
    }

    /// The group new labelled series go to: the last touched group, or the
    /// last group when that one is gone.
    pub fn active_group(&self) -> &Group {
        let found = self
            .active_group
            .as_ref()
            .and_then(|id| self.group(id));
        match found {
            Some(group) => group,
            // Every store keeps at least one group.
            None => &self.groups[self.groups.len() - 1],
        }
    }

    pub fn active_group_id(&self) -> GroupId {
        self.active_group().id.clone()
    }

    pub fn set_active_group(&mut self, group_id: &GroupId) -> Result<()> {
        self.group_index(group_id)?;
        self.active_group = Some(group_id.clone());
        Ok(())
    }

    pub fn total_points(&self) -> usize {
        self.groups.iter().map(Group::point_count).sum()
    }

    pub fn global_data_range(&self) -> Option<GlobalRange> {
        let mut min_time = i64::MAX;
        let mut max_time = i64::MIN;
        let mut total_points = 0;
        for sample in self
            .groups
            .iter()
            .flat_map(|g| g.series.iter())
            .flat_map(|s| s.samples.iter())
        {
            total_points += 1;
            min_time = min_time.min(sample.t);
            max_time = max_time.max(sample.t);
        }
        if total_points == 0 {
            return None;
        }
        Some(GlobalRange {
            min_time,
            max_time,
            duration: max_time.saturating_sub(min_time).max(0),
            total_points,
        })
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    fn mint_series(&mut self, group_id: &GroupId, label: &str) -> Series {
        self.series_counter += 1;
        let id = SeriesId::from_counter(self.series_counter);
        let color = self.settings.color_for(self.series_counter);
        let safe = non_empty_or(sanitize_text(label), DEFAULT_LABEL);
        let unique = self.make_unique_label(&safe);
        self.register_label(&unique, &id);
        Series {
            id,
            group_id: group_id.clone(),
            label: unique,
            color,
            samples: Vec::new(),
        }
    }

    pub(crate) fn register_label(&mut self, label: &str, series_id: &SeriesId) {
        let normalized = normalize_label(label);
        if !normalized.is_empty() {
            self.label_map.insert(normalized, series_id.clone());
        }
    }

    fn release_label(&mut self, label: &str, series_id: &SeriesId) {
        let normalized = normalize_label(label);
        if self.label_map.get(&normalized) == Some(series_id) {
            self.label_map.remove(&normalized);
        }
    }

    fn clear_auto_slots(&mut self, series_id: &SeriesId) {
        for slot in self.auto_series.iter_mut() {
            if slot.as_ref() == Some(series_id) {
                *slot = None;
            }
        }
    }

    /// Create a group seeded with one `sensor_<n>` series and make it active.
    ///
    /// A name that sanitizes to nothing becomes `<prefix> <n>`; a taken
    /// name gets a `_<n>` suffix.
    pub fn create_group(&mut self, name: Option<&str>) -> GroupId {
        self.group_counter += 1;
        let n = self.group_counter;
        let id = GroupId::from_counter(n);
        let name = non_empty_or(
            sanitize_text(name.unwrap_or_default()),
            &format!("{} {}", self.settings.group_prefix, n),
        );
        let name = self.make_unique_group_name(&name);
        let seed = self.mint_series(&id, &format!("sensor_{}", n));
        let mut group = Group::new(id.clone(), name);
        group.series.push(seed);
        debug!(group_id = %id, name = %group.name, "group created");
        self.groups.push(group);
        self.active_group = Some(id.clone());
        id
    }

    /// Add a series under exactly `label`, failing when the label is taken.
    pub fn add_series(&mut self, group_id: &GroupId, label: &str) -> Result<SeriesId> {
        self.group_index(group_id)?;
        let safe = non_empty_or(sanitize_text(label), DEFAULT_LABEL);
        if !self.is_label_available(&safe, None) {
            return Err(Error::LabelCollision { label: safe });
        }
        Ok(self.push_series(group_id, &safe))
    }

    /// Add a series, disambiguating a taken label with a `_<n>` suffix.
    pub fn append_series(&mut self, group_id: &GroupId, label: &str) -> Result<SeriesId> {
        self.group_index(group_id)?;
        Ok(self.push_series(group_id, label))
    }

    /// Add a series labelled `sensor_<k>`, k being the group's new size.
    pub fn append_default_series(&mut self, group_id: &GroupId) -> Result<SeriesId> {
        let count = self
            .group(group_id)
            .map(|g| g.series.len())
            .ok_or_else(|| Error::GroupNotFound {
                group_id: group_id.to_string(),
            })?;
        self.append_series(group_id, &format!("sensor_{}", count + 1))
    }

    fn push_series(&mut self, group_id: &GroupId, label: &str) -> SeriesId {
        let series = self.mint_series(group_id, label);
        let id = series.id.clone();
        trace!(series_id = %id, label = %series.label, group_id = %group_id, "series created");
        if let Some(group) = self.groups.iter_mut().find(|g| &g.id == group_id) {
            group.series.push(series);
        }
        id
    }

    // ------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------

    /// Append a sample and extend the group's cached range.
    ///
    /// Alignment is not recomputed; batch callers align once afterwards.
    pub fn add_point(
        &mut self,
        group_id: &GroupId,
        series_id: &SeriesId,
        value: f64,
        timestamp: i64,
    ) -> Result<()> {
        let sample = Sample::new(timestamp, value).ok_or(Error::NonFiniteValue)?;
        let group = self.group_mut(group_id)?;
        let series = group
            .series
            .iter_mut()
            .find(|s| &s.id == series_id)
            .ok_or_else(|| Error::SeriesNotFound {
                series_id: series_id.to_string(),
            })?;
        series.samples.push(sample);
        group.range = Some(match group.range {
            Some(range) => range.include(timestamp),
            None => TimeRange {
                start: timestamp,
                end: timestamp,
            },
        });
        if group.display_start.is_none() {
            group.display_start = group.range.map(|r| r.start);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal and moves
    // ------------------------------------------------------------------

    pub fn remove_series(&mut self, group_id: &GroupId, series_id: &SeriesId) -> Result<()> {
        let group = self.group_mut(group_id)?;
        let index = group
            .series
            .iter()
            .position(|s| &s.id == series_id)
            .ok_or_else(|| Error::SeriesNotFound {
                series_id: series_id.to_string(),
            })?;
        if group.series.len() <= 1 {
            return Err(Error::LastSeries {
                group_id: group_id.to_string(),
            });
        }
        let removed = group.series.remove(index);
        self.release_label(&removed.label, &removed.id);
        self.clear_auto_slots(&removed.id);
        debug!(series_id = %removed.id, group_id = %group_id, points = removed.samples.len(), "series removed");
        self.align_groups_to_global_timeline(true);
        Ok(())
    }

    pub fn remove_group(&mut self, group_id: &GroupId) -> Result<()> {
        let index = self.group_index(group_id)?;
        if self.groups.len() <= 1 {
            return Err(Error::LastGroup);
        }
        let removed = self.groups.remove(index);
        if self.active_group.as_ref() == Some(&removed.id) {
            self.active_group = self.groups.last().map(|g| g.id.clone());
        }
        for series in &removed.series {
            self.release_label(&series.label, &series.id);
            self.clear_auto_slots(&series.id);
        }
        debug!(group_id = %removed.id, series = removed.series.len(), "group removed");
        self.align_groups_to_global_timeline(true);
        Ok(())
    }

    /// Reorder a series within its group or move it to another group.
    ///
    /// `insert_index` is the position before the move (as a drop target
    /// would report it). Returns `false` when nothing changed. A series
    /// cannot leave a group it is the only member of.
    pub fn move_series(
        &mut self,
        series_id: &SeriesId,
        to_group: &GroupId,
        insert_index: usize,
    ) -> Result<bool> {
        let from_group = self
            .find_series(series_id)
            .map(|(group, _)| group.id.clone())
            .ok_or_else(|| Error::SeriesNotFound {
                series_id: series_id.to_string(),
            })?;
        let target_index = self.group_index(to_group)?;
        let source_index = self.group_index(&from_group)?;

        let source = &mut self.groups[source_index];
        let position = source
            .series
            .iter()
            .position(|s| &s.id == series_id)
            .ok_or_else(|| Error::SeriesNotFound {
                series_id: series_id.to_string(),
            })?;

        if source_index == target_index {
            let mut target = insert_index.min(source.series.len());
            if position < target {
                target -= 1;
            }
            if position == target {
                return Ok(false);
            }
            let series = source.series.remove(position);
            source.series.insert(target, series);
            return Ok(true);
        }

        if source.series.len() <= 1 {
            return Err(Error::LastSeries {
                group_id: from_group.to_string(),
            });
        }
        let mut series = source.series.remove(position);
        series.group_id = to_group.clone();
        let target = &mut self.groups[target_index];
        let at = insert_index.min(target.series.len());
        target.series.insert(at, series);
        debug!(series_id = %series_id, from = %from_group, to = %to_group, "series moved");
        self.align_groups_to_global_timeline(true);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Renames and display state
    // ------------------------------------------------------------------

    /// Rename a series; fails when another series holds the label.
    pub fn rename_series(&mut self, series_id: &SeriesId, label: &str) -> Result<()> {
        let safe = non_empty_or(sanitize_text(label), DEFAULT_LABEL);
        if !self.is_label_available(&safe, Some(series_id)) {
            return Err(Error::LabelCollision { label: safe });
        }
        let (group_id, old_label) = self
            .find_series(series_id)
            .map(|(group, series)| (group.id.clone(), series.label.clone()))
            .ok_or_else(|| Error::SeriesNotFound {
                series_id: series_id.to_string(),
            })?;
        self.release_label(&old_label, series_id);
        self.register_label(&safe, series_id);
        let group = self.group_mut(&group_id)?;
        if let Some(series) = group.series.iter_mut().find(|s| &s.id == series_id) {
            series.label = safe;
        }
        Ok(())
    }

    /// Rename a group; fails when another group holds the name.
    ///
    /// A name that sanitizes to nothing is ignored.
    pub fn rename_group(&mut self, group_id: &GroupId, name: &str) -> Result<()> {
        self.group_index(group_id)?;
        let safe = sanitize_text(name);
        if safe.is_empty() {
            return Ok(());
        }
        if !self.is_group_name_available(&safe, Some(group_id)) {
            return Err(Error::GroupNameCollision { name: safe });
        }
        self.group_mut(group_id)?.name = safe;
        Ok(())
    }

    pub fn set_following(&mut self, group_id: &GroupId, following: bool) -> Result<()> {
        self.group_mut(group_id)?.is_following = following;
        Ok(())
    }

    pub fn fold_group(&mut self, group_id: &GroupId, body_height: Option<f64>) -> Result<()> {
        let group = self.group_mut(group_id)?;
        group.is_folded = true;
        if body_height.is_some() {
            group.body_height = body_height;
        }
        Ok(())
    }

    pub fn unfold_group(&mut self, group_id: &GroupId) -> Result<()> {
        self.group_mut(group_id)?.is_folded = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timeline
    // ------------------------------------------------------------------

    /// Put every non-empty group on one display origin,
    /// `global_end - max_duration`.
    ///
    /// With `recalc` every group range is rebuilt from its samples; without
    /// it cached ranges are trusted. Empty groups lose range and origin.
    pub fn align_groups_to_global_timeline(&mut self, recalc: bool) -> AlignmentReport {
        let mut ranges = Vec::with_capacity(self.groups.len());
        let mut global_end: Option<i64> = None;
        let mut max_duration = 0;

        for group in &mut self.groups {
            let range = if recalc || group.range.is_none() {
                group.recompute_range()
            } else {
                group.range
            };
            if let Some(range) = range {
                global_end = Some(global_end.map_or(range.end, |end| end.max(range.end)));
                max_duration = max_duration.max(range.duration());
            }
            ranges.push(range);
        }

        let display_start = global_end.map(|end| end.saturating_sub(max_duration));
        let mut entries = Vec::with_capacity(self.groups.len());
        for (group, range) in self.groups.iter_mut().zip(ranges) {
            let previous_extent = group.extent();
            match (range, display_start) {
                (Some(_), Some(start)) => {
                    group.display_start = Some(start);
                    group.view_end = global_end;
                }
                _ => {
                    group.range = None;
                    group.display_start = None;
                    group.view_end = None;
                }
            }
            entries.push(GroupAlignment {
                group_id: group.id.clone(),
                range: group.range,
                display_start: group.display_start,
                previous_extent,
                new_extent: group.extent(),
                was_following: group.is_following,
            });
        }

        trace!(?global_end, max_duration, groups = entries.len(), "timeline aligned");
        AlignmentReport {
            global_end,
            max_duration,
            display_start,
            groups: entries,
        }
    }

    /// Drop the oldest `ratio` of stored data and realign.
    ///
    /// With a non-zero global span every sample older than
    /// `min + max(1, floor(span * ratio))` goes; with a zero span each
    /// non-empty series loses `max(1, floor(len * ratio))` leading points.
    /// Returns the number of samples removed.
    pub fn trim_oldest(&mut self, ratio: f64) -> usize {
        let Some(range) = self.global_data_range() else {
            return 0;
        };
        let mut removed = 0;
        let all_series = self.groups.iter_mut().flat_map(|g| g.series.iter_mut());
        if range.duration > 0 {
            let slice = ((range.duration as f64 * ratio).floor() as i64).max(1);
            let cutoff = range.min_time.saturating_add(slice);
            for series in all_series {
                let before = series.samples.len();
                series.samples.retain(|s| s.t >= cutoff);
                removed += before - series.samples.len();
            }
        } else {
            for series in all_series {
                let len = series.samples.len();
                if len == 0 {
                    continue;
                }
                let count = ((len as f64 * ratio).floor() as usize).clamp(1, len);
                series.samples.drain(..count);
                removed += count;
            }
        }
        debug!(ratio, removed, "oldest data trimmed");
        self.align_groups_to_global_timeline(true);
        removed
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
