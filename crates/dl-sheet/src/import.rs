//! Decoded tables to a store snapshot.
//!
//! Imported rows carry elapsed seconds, not wall-clock times, so they are
//! anchored so that the latest row of each table lands at `now_ms`.

use std::collections::{BTreeMap, HashSet};

use tracing::info;

use dl_common::{
    make_unique, normalize_label, sanitize_text, GroupId, Sample, SeriesId, SNAPSHOT_VERSION,
};
use dl_store::{GroupState, SeriesState, StateSnapshot, StoreSettings};

use crate::decoder::DecodedTable;

/// Build a snapshot with default settings.
pub fn build_import_payload(tables: &[DecodedTable], now_ms: i64) -> StateSnapshot {
    build_import_payload_with(tables, now_ms, &StoreSettings::default())
}

/// Build a snapshot that replaces the whole store with `tables`.
///
/// Labels are made unique across all tables and group names across groups
/// (both case-insensitively, by appending `_<n>`). Blank and non-finite
/// cells produce no sample.
pub fn build_import_payload_with(
    tables: &[DecodedTable],
    now_ms: i64,
    settings: &StoreSettings,
) -> StateSnapshot {
    let mut label_set: HashSet<String> = HashSet::new();
    let mut name_set: HashSet<String> = HashSet::new();
    let mut series_counter = 0u64;
    let mut groups = Vec::with_capacity(tables.len());

    for (table_index, table) in tables.iter().enumerate() {
        let group_number = table_index as u64 + 1;
        let group_id = GroupId::from_counter(group_number);

        let base_name = sanitize_text(&table.name);
        let base_name = if base_name.is_empty() {
            format!("{} {}", settings.group_prefix, group_number)
        } else {
            base_name
        };
        let name = make_unique(&base_name, |c| name_set.contains(&normalize_label(c)));
        name_set.insert(normalize_label(&name));

        let mut series = Vec::new();
        let mut columns: Vec<(usize, String)> = Vec::new();
        for (column, label) in table.labels.iter().enumerate() {
            let base = sanitize_text(label);
            if base.is_empty() {
                continue;
            }
            let label = make_unique(&base, |c| label_set.contains(&normalize_label(c)));
            label_set.insert(normalize_label(&label));

            series_counter += 1;
            let id = SeriesId::from_counter(series_counter).to_string();
            series.push(SeriesState {
                id: Some(id.clone()),
                label,
                color: Some(settings.color_for(series_counter)),
            });
            columns.push((column, id));
        }

        let max_sec = table
            .rows
            .iter()
            .map(|row| row.time_sec)
            .filter(|sec| sec.is_finite())
            .fold(0.0f64, f64::max);

        let mut data: BTreeMap<String, Vec<Sample>> =
            columns.iter().map(|(_, id)| (id.clone(), Vec::new())).collect();
        for row in &table.rows {
            if !row.time_sec.is_finite() {
                continue;
            }
            let t = now_ms.saturating_sub(((max_sec - row.time_sec) * 1000.0).round() as i64);
            for (column, id) in &columns {
                let Some(value) = row.values.get(*column).copied().flatten() else {
                    continue;
                };
                if let (Some(sample), Some(points)) = (Sample::new(t, value), data.get_mut(id)) {
                    points.push(sample);
                }
            }
        }

        groups.push(GroupState {
            id: Some(group_id.to_string()),
            name,
            series,
            data,
            body_height: None,
            is_folded: false,
        });
    }

    let snapshot = StateSnapshot {
        version: SNAPSHOT_VERSION,
        last_active_group_id: groups.last().and_then(|g| g.id.clone()),
        auto_series_map: Vec::new(),
        groups,
    };
    info!(
        groups = snapshot.groups.len(),
        series = series_counter,
        points = snapshot.total_points(),
        "import payload built"
    );
    snapshot
}
