//! Live line ingestion.
//!
//! Grammar, tried in order:
//! 1. `{...}` / `[...]` is JSON: object fields become labelled samples,
//!    array entries become `value_<i+1>`, a bare number is unlabelled.
//! 2. `;`/`,` separated parts, each `label/value` or a bare value.
//! 3. The whole line as one number.
//!
//! Unlabelled samples are routed positionally through the store's
//! auto-series table so the n-th bare value always lands on the same series.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use dl_common::{normalize_label, parse_leading_f64, GroupId, SeriesId};

use crate::store::TimeSeriesStore;

/// One value pulled out of a line, before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    pub label: Option<String>,
    pub value: f64,
    /// Index among the line's unlabelled samples.
    pub position: Option<usize>,
}

impl ParsedSample {
    fn labelled(label: impl Into<String>, value: f64) -> Self {
        ParsedSample {
            label: Some(label.into()),
            value,
            position: None,
        }
    }

    fn unlabelled(value: f64, position: usize) -> Self {
        ParsedSample {
            label: None,
            value,
            position: Some(position),
        }
    }
}

/// What one ingestion call did to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// Timestamp shared by every sample of the call.
    pub timestamp: i64,
    /// Samples written.
    pub applied: usize,
    /// Series created to hold new labels or positions.
    pub created_series: Vec<SeriesId>,
}

impl IngestOutcome {
    fn empty(timestamp: i64) -> Self {
        IngestOutcome {
            timestamp,
            applied: 0,
            created_series: Vec::new(),
        }
    }
}

/// Parse one text line into samples. Never fails; junk yields nothing.
pub fn parse_line(text: &str) -> Vec<ParsedSample> {
    let raw = text.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let json_like = (raw.starts_with('{') && raw.ends_with('}'))
        || (raw.starts_with('[') && raw.ends_with(']'));
    if json_like {
        return match serde_json::from_str::<Value>(raw) {
            Ok(value) => parse_json(&value),
            Err(_) => Vec::new(),
        };
    }

    let mut results = Vec::new();
    let mut unlabelled = 0;
    for part in raw.split([';', ',']).map(str::trim).filter(|p| !p.is_empty()) {
        let (label, value_text) = match part.split_once('/') {
            Some((label, value)) => {
                let label = label.trim();
                ((!label.is_empty()).then_some(label), value.trim())
            }
            None => (None, part),
        };
        let Some(value) = parse_leading_f64(value_text) else {
            continue;
        };
        match label {
            Some(label) => results.push(ParsedSample::labelled(label, value)),
            None => {
                results.push(ParsedSample::unlabelled(value, unlabelled));
                unlabelled += 1;
            }
        }
    }

    if results.is_empty() {
        if let Some(value) = parse_leading_f64(raw) {
            results.push(ParsedSample::unlabelled(value, 0));
        }
    }
    results
}

/// Samples from an already-parsed JSON value.
pub fn parse_json(value: &Value) -> Vec<ParsedSample> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(|v| vec![ParsedSample::unlabelled(v, 0)])
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                finite_number(item).map(|v| ParsedSample::labelled(format!("value_{}", i + 1), v))
            })
            .collect(),
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(key, item)| finite_number(item).map(|v| ParsedSample::labelled(key.as_str(), v)))
            .collect(),
        _ => Vec::new(),
    }
}

fn finite_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// Routes parsed samples into a store.
#[derive(Debug, Default, Clone)]
pub struct IngestionParser {
    lines_seen: u64,
    lines_rejected: u64,
}

impl IngestionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines handed to [`Self::ingest_line`] so far.
    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }

    /// Lines that produced no sample.
    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected
    }

    /// Parse and apply one text line, stamping every sample with `now`.
    pub fn ingest_line(&mut self, store: &mut TimeSeriesStore, text: &str, now: i64) -> IngestOutcome {
        self.lines_seen += 1;
        let samples = parse_line(text);
        if samples.is_empty() {
            self.lines_rejected += 1;
            trace!(line = %text.trim(), "line produced no samples");
            return IngestOutcome::empty(now);
        }
        self.apply(store, samples, now)
    }

    /// Apply one JSON message.
    pub fn ingest_json(&mut self, store: &mut TimeSeriesStore, value: &Value, now: i64) -> IngestOutcome {
        self.lines_seen += 1;
        let samples = parse_json(value);
        if samples.is_empty() {
            self.lines_rejected += 1;
            return IngestOutcome::empty(now);
        }
        self.apply(store, samples, now)
    }

    /// Route a batch and realign once at the end.
    pub fn apply(
        &mut self,
        store: &mut TimeSeriesStore,
        samples: Vec<ParsedSample>,
        now: i64,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome::empty(now);

        for sample in samples {
            let Some((group_id, series_id)) = route(store, &sample, &mut outcome.created_series)
            else {
                continue;
            };
            if store
                .add_point(&group_id, &series_id, sample.value, now)
                .is_ok()
            {
                outcome.applied += 1;
            }
        }

        if outcome.applied > 0 {
            store.align_groups_to_global_timeline(false);
        }
        if !outcome.created_series.is_empty() {
            debug!(
                created = outcome.created_series.len(),
                applied = outcome.applied,
                "ingestion created series"
            );
        }
        outcome
    }
}

fn route(
    store: &mut TimeSeriesStore,
    sample: &ParsedSample,
    created: &mut Vec<SeriesId>,
) -> Option<(GroupId, SeriesId)> {
    let label = sample.label.as_deref().filter(|l| !normalize_label(l).is_empty());

    if let Some(label) = label {
        if let Some(series_id) = store.series_id_by_label(label).cloned() {
            let (group, _) = store.find_series(&series_id)?;
            return Some((group.id().clone(), series_id));
        }
        let group_id = store.active_group_id();
        store.set_active_group(&group_id).ok()?;
        let series_id = store.append_series(&group_id, label).ok()?;
        created.push(series_id.clone());
        return Some((group_id, series_id));
    }

    let position = sample.position.unwrap_or(0);
    if let Some(Some(series_id)) = store.auto_series.get(position).cloned() {
        if let Some((group, _)) = store.find_series(&series_id) {
            return Some((group.id().clone(), series_id));
        }
    }

    let first = store.groups().first()?.id().clone();
    let series_id = store
        .append_series(&first, &format!("auto_{}", position + 1))
        .ok()?;
    if store.auto_series.len() <= position {
        store.auto_series.resize(position + 1, None);
    }
    store.auto_series[position] = Some(series_id.clone());
    created.push(series_id.clone());
    Some((first, series_id))
}
