//! Logger session: the store, its persistence, and the import/export guard.
//!
//! A session is opened over a storage backend and restores the last saved
//! snapshot. Every mutation goes through the session so the debounced save
//! is always scheduled. Import and export share one in-flight slot; starting
//! either while the other runs fails with `Busy`.
//!
//! Import decodes every file before touching anything. Only when the whole
//! batch decodes is the stored state cleared and the store replaced.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use dl_common::{make_unique, normalize_label, Error, GroupId, Result};
use dl_config::{ExportSettings, LoggerConfig};
use dl_persist::{PersistenceManager, SaveOutcome, StorageBackend};
use dl_sheet::{
    build_import_payload_with, build_xlsx, combined_export_filename, group_export_filename,
    FileSource,
};
use dl_store::{Group, IngestOutcome, IngestionParser, StateSnapshot, StoreSettings, TimeSeriesStore};

use crate::source::LiveDataSource;

/// Wall-clock and monotonic time for stamping samples and driving debounce.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
    fn instant(&self) -> Instant;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Long-running operations that may not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Import,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Import => write!(f, "import"),
            Operation::Export => write!(f, "export"),
        }
    }
}

/// How selected groups are packed into workbooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportMode {
    /// One workbook per group.
    #[default]
    Separate,
    /// One workbook with a sheet per group. A single group falls back to
    /// its own file name.
    Combined,
}

/// One workbook produced by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Groups (sheets) in the workbook.
    pub groups: usize,
}

impl ExportFile {
    /// Write into `dir`, returning the full path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.name);
        std::fs::write(&path, &self.bytes)?;
        info!(path = %path.display(), bytes = self.bytes.len(), "workbook written");
        Ok(path)
    }
}

/// Counters from draining a live source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PumpSummary {
    pub lines: u64,
    pub rejected: u64,
    pub applied: usize,
    pub created_series: usize,
    pub saves: u32,
    /// Saves that failed because storage stayed full after eviction.
    pub failed_saves: u32,
}

/// What an import replaced the store with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub files: usize,
    pub groups: usize,
    pub series: usize,
    pub points: usize,
    pub saved: SaveOutcome,
}

/// Store settings derived from the logger configuration.
pub fn store_settings(config: &LoggerConfig) -> StoreSettings {
    StoreSettings {
        group_prefix: config.ingest.default_group_prefix.clone(),
        palette: config.palette.clone(),
    }
}

#[derive(Debug)]
pub struct Session<B: StorageBackend> {
    store: TimeSeriesStore,
    parser: IngestionParser,
    persistence: PersistenceManager<B>,
    export_settings: ExportSettings,
    in_flight: Option<Operation>,
}

impl<B: StorageBackend> Session<B> {
    /// Open a session, restoring the stored snapshot when there is one.
    pub fn open(backend: B, config: &LoggerConfig) -> Result<Self> {
        let settings = store_settings(config);
        let persistence = PersistenceManager::new(backend, config.persistence.clone());
        let store = match persistence.load()? {
            Some(snapshot) => TimeSeriesStore::from_snapshot_with(&snapshot, settings),
            None => {
                debug!("no stored state, starting a new project");
                TimeSeriesStore::with_settings(settings)
            }
        };
        info!(
            groups = store.groups().len(),
            points = store.total_points(),
            "session opened"
        );
        Ok(Session {
            store,
            parser: IngestionParser::new(),
            persistence,
            export_settings: config.export.clone(),
            in_flight: None,
        })
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn persistence(&self) -> &PersistenceManager<B> {
        &self.persistence
    }

    pub fn persistence_mut(&mut self) -> &mut PersistenceManager<B> {
        &mut self.persistence
    }

    pub fn parser(&self) -> &IngestionParser {
        &self.parser
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.store.to_snapshot()
    }

    /// The running import or export, if any.
    pub fn in_flight(&self) -> Option<Operation> {
        self.in_flight
    }

    /// Claim the in-flight slot for `operation`.
    ///
    /// [`Session::import_files`] and [`Session::export`] claim the slot
    /// themselves. A host that spreads one operation over several event-loop
    /// turns calls `begin` when the request arrives and [`Session::finish`]
    /// when it completes; any import or export requested in between fails
    /// with `Busy`.
    pub fn begin(&mut self, operation: Operation) -> Result<()> {
        if let Some(running) = self.in_flight {
            debug!(requested = %operation, running = %running, "operation rejected");
            return Err(Error::Busy {
                operation: running.to_string(),
            });
        }
        self.in_flight = Some(operation);
        Ok(())
    }

    /// Release the slot claimed by `operation`.
    pub fn finish(&mut self, operation: Operation) {
        if self.in_flight == Some(operation) {
            self.in_flight = None;
        }
    }

    /// Parse and apply one live line, scheduling a save if anything changed.
    pub fn ingest_line(&mut self, text: &str, now_ms: i64, now: Instant) -> IngestOutcome {
        let outcome = self.parser.ingest_line(&mut self.store, text, now_ms);
        if outcome.applied > 0 || !outcome.created_series.is_empty() {
            self.persistence.mark_dirty(now);
        }
        outcome
    }

    /// Run a store mutation and schedule a save when it succeeds.
    pub fn edit<T>(
        &mut self,
        now: Instant,
        f: impl FnOnce(&mut TimeSeriesStore) -> Result<T>,
    ) -> Result<T> {
        let value = f(&mut self.store)?;
        self.persistence.mark_dirty(now);
        Ok(value)
    }

    /// Run the debounced save if it is due.
    pub fn poll(&mut self, now: Instant) -> Result<Option<SaveOutcome>> {
        let saved = self.persistence.poll(now, &mut self.store)?;
        if saved.is_some() {
            self.persistence.usage_check();
        }
        Ok(saved)
    }

    /// Save any pending change immediately.
    pub fn flush(&mut self) -> Result<Option<SaveOutcome>> {
        let saved = self.persistence.flush_now(&mut self.store)?;
        if saved.is_some() {
            self.persistence.usage_check();
        }
        Ok(saved)
    }

    /// Drain `source` into the store, then flush.
    ///
    /// A debounced save that finds storage full is logged and counted and
    /// ingestion continues. The final flush reports its error.
    pub fn pump<S, C>(&mut self, source: &mut S, clock: &C) -> Result<PumpSummary>
    where
        S: LiveDataSource + ?Sized,
        C: Clock + ?Sized,
    {
        let mut summary = PumpSummary::default();
        while let Some(line) = source.next_line() {
            summary.lines += 1;
            let outcome = self.ingest_line(&line, clock.now_ms(), clock.instant());
            if outcome.applied == 0 {
                summary.rejected += 1;
            }
            summary.applied += outcome.applied;
            summary.created_series += outcome.created_series.len();

            match self.poll(clock.instant()) {
                Ok(Some(_)) => summary.saves += 1,
                Ok(None) => {}
                Err(e @ Error::StorageQuotaExceeded { .. }) => {
                    warn!(error = %e, "save skipped, continuing ingestion");
                    summary.failed_saves += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if self.flush()?.is_some() {
            summary.saves += 1;
        }
        info!(
            lines = summary.lines,
            applied = summary.applied,
            rejected = summary.rejected,
            "live source drained"
        );
        Ok(summary)
    }

    /// Replace the whole store with the contents of `files`.
    pub fn import_files(&mut self, files: &[FileSource], now_ms: i64) -> Result<ImportSummary> {
        self.begin(Operation::Import)?;
        let result = self.import_batch(files, now_ms);
        self.finish(Operation::Import);
        result
    }

    fn import_batch(&mut self, files: &[FileSource], now_ms: i64) -> Result<ImportSummary> {
        if files.is_empty() {
            return Err(Error::MalformedImport("no files selected".to_string()));
        }

        let mut tables = Vec::new();
        for file in files {
            match file.decode() {
                Ok(decoded) => tables.extend(decoded),
                Err(e) => {
                    warn!(file = %file.name, error = %e, "import aborted, store unchanged");
                    return Err(e);
                }
            }
        }
        if tables.is_empty() {
            return Err(Error::MalformedImport("no data found".to_string()));
        }

        let settings = self.store.settings().clone();
        let snapshot = build_import_payload_with(&tables, now_ms, &settings);
        let store = TimeSeriesStore::from_snapshot_with(&snapshot, settings);

        self.persistence.clear()?;
        self.store = store;
        self.parser = IngestionParser::new();
        let saved = self.persistence.save(&mut self.store)?;

        let summary = ImportSummary {
            files: files.len(),
            groups: self.store.groups().len(),
            series: self.store.groups().iter().map(|g| g.series().len()).sum(),
            points: self.store.total_points(),
            saved,
        };
        info!(
            files = summary.files,
            groups = summary.groups,
            points = summary.points,
            "import complete"
        );
        Ok(summary)
    }

    /// Build workbooks for `selection` (every group when empty).
    ///
    /// `stamp` is the date suffix of the file names, usually
    /// [`dl_sheet::local_date_stamp`].
    pub fn export(
        &mut self,
        selection: &[GroupId],
        mode: ExportMode,
        stamp: &str,
    ) -> Result<Vec<ExportFile>> {
        self.begin(Operation::Export)?;
        let result = self.export_groups(selection, mode, stamp);
        self.finish(Operation::Export);
        result
    }

    fn export_groups(
        &self,
        selection: &[GroupId],
        mode: ExportMode,
        stamp: &str,
    ) -> Result<Vec<ExportFile>> {
        let groups: Vec<(usize, &Group)> = if selection.is_empty() {
            self.store.groups().iter().enumerate().collect()
        } else {
            selection
                .iter()
                .map(|id| {
                    self.store
                        .groups()
                        .iter()
                        .enumerate()
                        .find(|(_, g)| g.id() == id)
                        .ok_or_else(|| Error::GroupNotFound {
                            group_id: id.to_string(),
                        })
                })
                .collect::<Result<_>>()?
        };

        let files = if mode == ExportMode::Combined && groups.len() > 1 {
            let sheets: Vec<&Group> = groups.iter().map(|(_, g)| *g).collect();
            vec![ExportFile {
                name: combined_export_filename(&self.export_settings.combined_prefix, stamp),
                bytes: build_xlsx(&sheets)?,
                groups: sheets.len(),
            }]
        } else {
            let mut taken: HashSet<String> = HashSet::new();
            let mut files = Vec::with_capacity(groups.len());
            for (index, group) in groups {
                let name = group_export_filename(group.name(), index, stamp);
                let stem = name.trim_end_matches(".xlsx");
                let stem = make_unique(stem, |candidate| taken.contains(&normalize_label(candidate)));
                taken.insert(normalize_label(&stem));
                files.push(ExportFile {
                    name: format!("{}.xlsx", stem),
                    bytes: build_xlsx(&[group])?,
                    groups: 1,
                });
            }
            files
        };

        info!(
            files = files.len(),
            bytes = files.iter().map(|f| f.bytes.len()).sum::<usize>(),
            "export complete"
        );
        Ok(files)
    }

    /// Delete the stored state and start a fresh project.
    pub fn reset(&mut self) -> Result<()> {
        self.persistence.clear()?;
        self.store = TimeSeriesStore::with_settings(self.store.settings().clone());
        self.parser = IngestionParser::new();
        info!("project reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::time::Duration;

    use dl_persist::MemoryBackend;
    use dl_sheet::decode_file;

    struct StepClock {
        start: Instant,
        ms: Cell<i64>,
    }

    impl StepClock {
        fn new() -> Self {
            StepClock {
                start: Instant::now(),
                ms: Cell::new(0),
            }
        }

        fn advance(&self, ms: i64) {
            self.ms.set(self.ms.get() + ms);
        }
    }

    impl Clock for StepClock {
        fn now_ms(&self) -> i64 {
            1_700_000_000_000 + self.ms.get()
        }

        fn instant(&self) -> Instant {
            self.start + Duration::from_millis(self.ms.get() as u64)
        }
    }

    /// Each line advances the clock by one second.
    struct TickingSource<'a> {
        lines: VecDeque<String>,
        clock: &'a StepClock,
    }

    impl LiveDataSource for TickingSource<'_> {
        fn next_line(&mut self) -> Option<String> {
            let line = self.lines.pop_front()?;
            self.clock.advance(1000);
            Some(line)
        }
    }

    fn open() -> Session<MemoryBackend> {
        Session::open(MemoryBackend::new(1 << 20), &LoggerConfig::default()).unwrap()
    }

    #[test]
    fn test_open_restores_saved_state() {
        let mut session = open();
        session.ingest_line("temp/20;hum/40", 1_000, Instant::now());
        session.flush().unwrap().unwrap();

        let backend = session.persistence().backend().clone();
        let reopened = Session::open(backend, &LoggerConfig::default()).unwrap();
        assert_eq!(reopened.store().total_points(), 2);
        assert!(reopened.store().series_by_label("hum").is_some());
    }

    #[test]
    fn test_ingest_schedules_save_only_on_change() {
        let mut session = open();
        session.ingest_line("no numbers", 1_000, Instant::now());
        assert!(!session.persistence().is_pending());
        session.ingest_line("5", 1_000, Instant::now());
        assert!(session.persistence().is_pending());
    }

    #[test]
    fn test_pump_drains_source_and_flushes() {
        let mut session = open();
        let clock = StepClock::new();
        let mut source = TickingSource {
            lines: ["temp/20", "junk", "temp/21", "temp/22"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            clock: &clock,
        };

        let summary = session.pump(&mut source, &clock).unwrap();
        assert_eq!(summary.lines, 4);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.applied, 3);
        assert_eq!(summary.created_series, 1);
        // One debounced save mid-stream plus the final flush.
        assert_eq!(summary.saves, 2);
        assert!(!session.persistence().is_pending());

        let stored = session.persistence().load().unwrap().unwrap();
        assert_eq!(stored.total_points(), 3);
    }

    #[test]
    fn test_edit_marks_dirty_only_on_success() {
        let mut session = open();
        let now = Instant::now();
        let group = session.store().groups()[0].id().clone();
        let err = session.edit(now, |store| store.remove_group(&group)).unwrap_err();
        assert!(matches!(err, Error::LastGroup));
        assert!(!session.persistence().is_pending());

        session.edit(now, |store| store.rename_group(&group, "Bench")).unwrap();
        assert!(session.persistence().is_pending());
        assert_eq!(session.store().groups()[0].name(), "Bench");
    }

    #[test]
    fn test_busy_guard_rejects_overlap() {
        let mut session = open();
        // The host has claimed the slot for an export still writing files.
        session.begin(Operation::Export).unwrap();
        assert!(matches!(session.begin(Operation::Import), Err(Error::Busy { .. })));
        let err = session
            .import_files(&[FileSource::new("a.csv", "x\ntime,a\n1,2\n")], 0)
            .unwrap_err();
        assert!(matches!(err, Error::Busy { ref operation } if operation == "export"));
        assert_eq!(session.in_flight(), Some(Operation::Export));

        session.finish(Operation::Export);
        assert!(session.export(&[], ExportMode::Separate, "20240101-0000").is_ok());
        assert_eq!(session.in_flight(), None);
    }

    #[test]
    fn test_import_replaces_store_and_saves() {
        let mut session = open();
        session.ingest_line("old/1", 1_000, Instant::now());

        let files = [
            FileSource::new("bench.csv", "Bench\ntime,temp,hum\n0s,20,40\n2s,21,41\n"),
            FileSource::new("lab.csv", "\ntime,temp\n0,5\n"),
        ];
        let summary = session.import_files(&files, 10_000).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.points, 5);
        assert!(session.store().series_by_label("old").is_none());
        assert!(session.store().series_by_label("temp_1").is_some());
        assert_eq!(session.store().groups()[1].name(), "lab");
        assert!(!session.persistence().is_pending());

        let stored = session.persistence().load().unwrap().unwrap();
        assert_eq!(stored.total_points(), 5);
        assert_eq!(session.in_flight(), None);
    }

    #[test]
    fn test_failed_import_leaves_store_untouched() {
        let mut session = open();
        session.ingest_line("keep/1", 1_000, Instant::now());
        session.flush().unwrap();
        let before = session.snapshot();

        let files = [
            FileSource::new("ok.csv", "x\ntime,a\n1,2\n"),
            FileSource::new("bad.xlsx", b"PK\x03\x04 not really a zip".to_vec()),
        ];
        assert!(session.import_files(&files, 0).is_err());
        assert_eq!(session.snapshot(), before);
        assert!(session.persistence().load().unwrap().is_some());
        assert_eq!(session.in_flight(), None);

        let err = session.import_files(&[], 0).unwrap_err();
        assert!(matches!(err, Error::MalformedImport(_)));
    }

    #[test]
    fn test_export_separate_and_combined() {
        let mut session = open();
        let now = Instant::now();
        session.ingest_line("a/1", 1_000, now);
        let g2 = session.edit(now, |store| Ok(store.create_group(Some("Lab")))).unwrap();
        session.ingest_line("b/2", 2_000, now);

        let files = session.export(&[], ExportMode::Separate, "20240101-0930").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Group 1-20240101-0930.xlsx", "Lab-20240101-0930.xlsx"]);

        let files = session.export(&[], ExportMode::Combined, "20240101-0930").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "sensor-data-20240101-0930.xlsx");
        assert_eq!(files[0].groups, 2);
        let tables = decode_file(&files[0].bytes, &files[0].name).unwrap();
        assert_eq!(tables.len(), 2);

        // Combined with a single group uses the group's own name.
        let files = session.export(&[g2], ExportMode::Combined, "20240101-0930").unwrap();
        assert_eq!(files[0].name, "Lab-20240101-0930.xlsx");

        let err = session
            .export(&[GroupId::from("group-99")], ExportMode::Separate, "x")
            .unwrap_err();
        assert!(matches!(err, Error::GroupNotFound { .. }));
        assert_eq!(session.in_flight(), None);
    }

    #[test]
    fn test_export_file_names_are_unique() {
        let mut session = open();
        let now = Instant::now();
        session.edit(now, |store| Ok(store.create_group(Some("Lab/1")))).unwrap();
        session.edit(now, |store| Ok(store.create_group(Some("Lab1")))).unwrap();
        let files = session.export(&[], ExportMode::Separate, "20240101-0000").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Group 1-20240101-0000.xlsx",
                "Lab1-20240101-0000.xlsx",
                "Lab1-20240101-0000_1.xlsx"
            ]
        );
    }

    #[test]
    fn test_export_file_write_to() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = ExportFile {
            name: "x.xlsx".to_string(),
            bytes: vec![1, 2, 3],
            groups: 1,
        };
        let path = file.write_to(&dir.path().join("out")).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_reset_starts_fresh_project() {
        let mut session = open();
        session.ingest_line("a/1", 1_000, Instant::now());
        session.flush().unwrap();
        session.reset().unwrap();
        assert_eq!(session.store().total_points(), 0);
        assert_eq!(session.store().groups().len(), 1);
        assert!(session.persistence().load().unwrap().is_none());
    }

    #[test]
    fn test_store_settings_follow_config() {
        let mut config = LoggerConfig::default();
        config.ingest.default_group_prefix = "Rig".to_string();
        config.palette = vec!["#000000".to_string()];
        let session = Session::open(MemoryBackend::new(1 << 20), &config).unwrap();
        assert_eq!(session.store().groups()[0].name(), "Rig 1");
        assert_eq!(session.store().groups()[0].series()[0].color(), "#000000");
    }
}
