//! Property-based tests for store invariants.

use std::collections::HashSet;

use dl_common::normalize_label;
use dl_store::{IngestionParser, TimeSeriesStore};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    CreateGroup,
    NamedGroup(String),
    RenameGroup(usize, String),
    AppendSeries(usize, String),
    AddSeries(usize, String),
    Rename(usize, String),
    RemoveSeries(usize),
    RemoveGroup(usize),
    Move(usize, usize, usize),
    Ingest(String, i64),
}

fn label_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("temp".to_string()),
        Just("TEMP".to_string()),
        Just("hum".to_string()),
        Just("sensor_1".to_string()),
        Just("auto_1".to_string()),
        "[a-c]{1,3}(_[0-9])?",
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::CreateGroup),
        label_strategy().prop_map(Op::NamedGroup),
        (0usize..4, label_strategy()).prop_map(|(g, l)| Op::RenameGroup(g, l)),
        (0usize..4, label_strategy()).prop_map(|(g, l)| Op::AppendSeries(g, l)),
        (0usize..4, label_strategy()).prop_map(|(g, l)| Op::AddSeries(g, l)),
        (0usize..8, label_strategy()).prop_map(|(s, l)| Op::Rename(s, l)),
        (0usize..8).prop_map(Op::RemoveSeries),
        (0usize..4).prop_map(Op::RemoveGroup),
        (0usize..8, 0usize..4, 0usize..4).prop_map(|(s, g, i)| Op::Move(s, g, i)),
        (label_strategy(), 0i64..100_000).prop_map(|(l, t)| Op::Ingest(format!("{l}/1;2;3"), t)),
    ]
}

fn all_series(store: &TimeSeriesStore) -> Vec<(dl_common::GroupId, dl_common::SeriesId)> {
    store
        .groups()
        .iter()
        .flat_map(|g| g.series().iter().map(move |s| (g.id().clone(), s.id().clone())))
        .collect()
}

fn apply(store: &mut TimeSeriesStore, parser: &mut IngestionParser, op: Op) {
    let groups: Vec<_> = store.groups().iter().map(|g| g.id().clone()).collect();
    let series = all_series(store);
    let pick_group = |i: usize| groups[i % groups.len()].clone();
    match op {
        Op::CreateGroup => {
            store.create_group(None);
        }
        Op::NamedGroup(name) => {
            store.create_group(Some(&name));
        }
        Op::RenameGroup(g, name) => {
            let _ = store.rename_group(&pick_group(g), &name);
        }
        Op::AppendSeries(g, label) => {
            let _ = store.append_series(&pick_group(g), &label);
        }
        Op::AddSeries(g, label) => {
            let _ = store.add_series(&pick_group(g), &label);
        }
        Op::Rename(s, label) => {
            let (_, id) = &series[s % series.len()];
            let _ = store.rename_series(id, &label);
        }
        Op::RemoveSeries(s) => {
            let (g, id) = &series[s % series.len()];
            let _ = store.remove_series(g, id);
        }
        Op::RemoveGroup(g) => {
            let _ = store.remove_group(&pick_group(g));
        }
        Op::Move(s, g, i) => {
            let (_, id) = &series[s % series.len()];
            let _ = store.move_series(id, &pick_group(g), i);
        }
        Op::Ingest(line, t) => {
            parser.ingest_line(store, &line, t);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn names_stay_unique_and_structure_holds(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut store = TimeSeriesStore::new();
        let mut parser = IngestionParser::new();
        for op in ops {
            apply(&mut store, &mut parser, op);

            let mut seen = HashSet::new();
            for group in store.groups() {
                prop_assert!(!group.series().is_empty());
                for series in group.series() {
                    prop_assert!(seen.insert(normalize_label(series.label())), "duplicate label {}", series.label());
                    prop_assert_eq!(series.group_id(), group.id());
                }
            }
            prop_assert!(!store.groups().is_empty());
            let mut names = HashSet::new();
            for group in store.groups() {
                prop_assert!(names.insert(normalize_label(group.name())), "duplicate group name {}", group.name());
            }
            for slot in store.auto_series().iter().flatten() {
                prop_assert!(store.find_series(slot).is_some());
            }
        }
    }

    #[test]
    fn alignment_uses_global_end_minus_max_duration(
        groups in prop::collection::vec(prop::collection::vec(0i64..1_000_000, 0..12), 1..5)
    ) {
        let mut store = TimeSeriesStore::new();
        for _ in 1..groups.len() {
            store.create_group(None);
        }
        let ids: Vec<_> = store
            .groups()
            .iter()
            .map(|g| (g.id().clone(), g.series()[0].id().clone()))
            .collect();
        for ((group, series), times) in ids.iter().zip(&groups) {
            for t in times {
                store.add_point(group, series, 1.0, *t).unwrap();
            }
        }

        let report = store.align_groups_to_global_timeline(true);
        let global_end = groups.iter().flatten().max().copied();
        let max_duration = groups
            .iter()
            .filter(|ts| !ts.is_empty())
            .map(|ts| ts.iter().max().unwrap() - ts.iter().min().unwrap())
            .max()
            .unwrap_or(0);

        prop_assert_eq!(report.global_end, global_end);
        prop_assert_eq!(report.max_duration, max_duration);
        for (group, times) in store.groups().iter().zip(&groups) {
            if times.is_empty() {
                prop_assert_eq!(group.display_start(), None);
                prop_assert_eq!(group.range(), None);
                continue;
            }
            let start = global_end.unwrap() - max_duration;
            prop_assert_eq!(group.display_start(), Some(start));
            let range = group.range().unwrap();
            prop_assert!(range.end <= global_end.unwrap());
            // The group that reaches the global end fits entirely in the window.
            if range.end == global_end.unwrap() {
                prop_assert!(range.start >= start);
            }
        }
    }

    #[test]
    fn trim_removes_something_while_data_remains(
        times in prop::collection::vec(0i64..10_000, 1..50),
        ratio in prop_oneof![Just(0.1f64), Just(0.2), Just(0.3)],
    ) {
        let mut store = TimeSeriesStore::new();
        let group = store.active_group_id();
        let series = store.groups()[0].series()[0].id().clone();
        for t in &times {
            store.add_point(&group, &series, 1.0, *t).unwrap();
        }
        let before = store.total_points();
        let removed = store.trim_oldest(ratio);
        prop_assert!(removed >= 1);
        prop_assert_eq!(store.total_points(), before - removed);
    }
}
