//! Persisted state document.
//!
//! ```json
//! { "version": 1, "lastActiveGroupId": "group-2", "autoSeriesMap": ["series-3", null],
//!   "groups": [{ "id": "group-1", "name": "Group 1",
//!                "series": [{ "id": "series-1", "label": "sensor_1", "color": "#667eea" }],
//!                "data": { "series-1": [{ "t": 1700000000000, "v": 23.5 }] },
//!                "bodyHeight": null, "isFolded": false }] }
//! ```
//!
//! Restoring never trusts the document: ids are re-minted when missing or
//! duplicated, labels are made unique, and dangling references are dropped.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use dl_common::{sanitize_text, GroupId, Sample, SeriesId, SNAPSHOT_VERSION};

use crate::store::{Group, Series, StoreSettings, TimeSeriesStore};

/// Whole-store snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub last_active_group_id: Option<String>,
    #[serde(default)]
    pub auto_series_map: Vec<Option<String>>,
    #[serde(default)]
    pub groups: Vec<GroupState>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub series: Vec<SeriesState>,
    /// Samples keyed by series id.
    #[serde(default)]
    pub data: BTreeMap<String, Vec<Sample>>,
    #[serde(default)]
    pub body_height: Option<f64>,
    #[serde(default)]
    pub is_folded: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesState {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl StateSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn total_points(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.data.values())
            .map(Vec::len)
            .sum()
    }
}

impl TimeSeriesStore {
    /// Capture the current state.
    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            last_active_group_id: Some(self.active_group_id().to_string()),
            auto_series_map: self
                .auto_series
                .iter()
                .map(|slot| slot.as_ref().map(|id| id.to_string()))
                .collect(),
            groups: self
                .groups
                .iter()
                .map(|group| GroupState {
                    id: Some(group.id.to_string()),
                    name: group.name.clone(),
                    series: group
                        .series
                        .iter()
                        .map(|s| SeriesState {
                            id: Some(s.id.to_string()),
                            label: s.label.clone(),
                            color: Some(s.color.clone()),
                        })
                        .collect(),
                    data: group
                        .series
                        .iter()
                        .map(|s| (s.id.to_string(), s.samples.clone()))
                        .collect(),
                    body_height: group.body_height,
                    is_folded: group.is_folded,
                })
                .collect(),
        }
    }

    /// Rebuild a store from a snapshot with default settings.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self::from_snapshot_with(snapshot, StoreSettings::default())
    }

    /// Rebuild a store from a snapshot, replacing everything.
    pub fn from_snapshot_with(snapshot: &StateSnapshot, settings: StoreSettings) -> Self {
        let mut store = TimeSeriesStore::empty(settings);
        let mut group_ids: HashSet<GroupId> = HashSet::new();
        let mut series_ids: HashSet<SeriesId> = HashSet::new();
        let mut dropped_points = 0usize;

        for state in &snapshot.groups {
            let group_id = match state.id.as_deref().map(GroupId::from) {
                Some(id) if !group_ids.contains(&id) => {
                    if let Some(n) = id.counter() {
                        store.group_counter = store.group_counter.max(n);
                    }
                    id
                }
                _ => {
                    store.group_counter += 1;
                    GroupId::from_counter(store.group_counter)
                }
            };
            group_ids.insert(group_id.clone());

            let name = sanitize_text(&state.name);
            let name = if name.is_empty() {
                format!("{} {}", store.settings.group_prefix, store.group_counter)
            } else {
                name
            };
            let name = store.make_unique_group_name(&name);
            let mut group = Group::new(group_id.clone(), name);
            group.body_height = state.body_height.filter(|h| h.is_finite());
            group.is_folded = state.is_folded;

            for (index, series_state) in state.series.iter().enumerate() {
                let series_id = match series_state.id.as_deref().map(SeriesId::from) {
                    Some(id) if !series_ids.contains(&id) => {
                        if let Some(n) = id.counter() {
                            store.series_counter = store.series_counter.max(n);
                        }
                        id
                    }
                    _ => {
                        store.series_counter += 1;
                        SeriesId::from_counter(store.series_counter)
                    }
                };
                series_ids.insert(series_id.clone());

                let label = sanitize_text(&series_state.label);
                let label = if label.is_empty() {
                    format!("sensor_{}", index + 1)
                } else {
                    label
                };
                let label = store.make_unique_label(&label);
                store.register_label(&label, &series_id);

                let color = series_state
                    .color
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| store.settings.color_for(store.series_counter));

                let raw = series_state
                    .id
                    .as_deref()
                    .and_then(|id| state.data.get(id))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let samples: Vec<Sample> = raw
                    .iter()
                    .filter_map(|p| Sample::new(p.t, p.v))
                    .collect();
                dropped_points += raw.len() - samples.len();

                group.series.push(Series {
                    id: series_id,
                    group_id: group_id.clone(),
                    label,
                    color,
                    samples,
                });
            }

            store.groups.push(group);
            if state.series.is_empty() {
                let seed = format!("sensor_{}", store.group_counter);
                store.append_series(&group_id, &seed).ok();
            }
        }

        if store.groups.is_empty() {
            store.create_group(None);
        }

        store.auto_series = snapshot
            .auto_series_map
            .iter()
            .map(|slot| {
                slot.as_deref()
                    .map(SeriesId::from)
                    .filter(|id| store.find_series(id).is_some())
            })
            .collect();

        store.active_group = snapshot
            .last_active_group_id
            .as_deref()
            .map(GroupId::from)
            .filter(|id| store.group(id).is_some())
            .or_else(|| store.groups.last().map(|g| g.id.clone()));

        store.align_groups_to_global_timeline(true);
        debug!(
            groups = store.groups.len(),
            points = store.total_points(),
            dropped_points,
            "store restored from snapshot"
        );
        store
    }
}
