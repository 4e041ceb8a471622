//! Data Logger Core - command-line front end
//!
//! The main entry point for dl-core, handling:
//! - Live ingestion from stdin or a file
//! - Spreadsheet export and import
//! - Inspecting and resetting the saved project
//! - Configuration display and validation

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use dl_common::{normalize_label, Error, GroupId, Result, StructuredError};
use dl_config::{
    default_data_dir, load_config, resolve_config, ConfigSource, LoggerConfig,
    CONFIG_SCHEMA_VERSION,
};
use dl_core::exit_codes::ExitCode;
use dl_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use dl_core::{ExportMode, LineSource, PumpSummary, Session, SystemClock};
use dl_persist::{DirBackend, StorageBackend};
use dl_sheet::{local_date_stamp, FileSource};

/// Data Logger Core - record, persist, and exchange sensor time series
#[derive(Parser)]
#[command(name = "dl-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to logger.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the saved project
    #[arg(long, global = true, env = "DL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Log level
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Pretty JSON on stdout
    Json,
    /// One-line human summary
    Summary,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed live lines (stdin or a file) into the project
    Ingest(IngestArgs),

    /// Write groups to .xlsx workbooks
    Export(ExportArgs),

    /// Replace the project with the contents of spreadsheet files
    Import(ImportArgs),

    /// Print the saved project
    Show(ShowArgs),

    /// Delete the saved project and start a new one
    Reset,

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Input file; `-` or omitted reads stdin
    input: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Directory to write workbooks into
    #[arg(long)]
    out_dir: PathBuf,

    /// Group to export, by id or name (repeatable; default: all)
    #[arg(long = "group")]
    groups: Vec<String>,

    /// Put all selected groups into one workbook
    #[arg(long)]
    combined: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// .xlsx, SpreadsheetML .xls/.xml, or .csv files
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Print the full stored snapshot instead of a summary
    #[arg(long)]
    full: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate (default: the resolved logger.json)
        path: Option<PathBuf>,
    },
}

/// Command result: the JSON payload and its one-line summary.
struct Report {
    json: Value,
    summary: String,
}

fn main() {
    let cli = Cli::parse();

    let cli_level = cli.global.log_level.or(if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    });
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config);

    let global = &cli.global;
    let result = match &cli.command {
        Commands::Ingest(args) => run_ingest(global, args),
        Commands::Export(args) => run_export(global, args),
        Commands::Import(args) => run_import(global, args),
        Commands::Show(args) => run_show(global, args),
        Commands::Reset => run_reset(global),
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => run_config_show(global),
            ConfigCommands::Validate { path } => run_config_validate(global, path.as_deref()),
        },
    };

    let exit_code = match result {
        Ok(report) => {
            output(global, &report);
            ExitCode::Clean
        }
        Err(e) => output_error(global, &e),
    };
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Output
// ============================================================================

fn output(global: &GlobalOpts, report: &Report) {
    match global.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&report.json) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("dl-core: failed to serialize output: {}", e),
        },
        OutputFormat::Summary => println!("{}", report.summary),
    }
}

fn output_error(global: &GlobalOpts, err: &Error) -> ExitCode {
    let exit_code = ExitCode::from(err);
    match global.format {
        OutputFormat::Json => {
            let response = json!({
                "schema_version": CONFIG_SCHEMA_VERSION,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "exit_code": exit_code.code_name(),
                "error": StructuredError::from(err),
                "hint": err.remediation(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&response).unwrap_or_else(|_| response.to_string())
            );
        }
        OutputFormat::Summary => {
            eprintln!("✗ {}", err.headline());
            eprintln!("  Reason: {}", err);
            eprintln!("  Hint: {}", err.remediation());
        }
    }
    exit_code
}

fn envelope(command: &str, body: Value) -> Value {
    let mut response = json!({
        "schema_version": CONFIG_SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "command": command,
        "status": "ok",
    });
    if let (Some(target), Value::Object(fields)) = (response.as_object_mut(), body) {
        target.extend(fields);
    }
    response
}

// ============================================================================
// Setup
// ============================================================================

/// Load the effective configuration. An explicit `--config` must exist.
fn load_logger_config(global: &GlobalOpts) -> Result<(LoggerConfig, Option<PathBuf>, ConfigSource)> {
    if let Some(path) = &global.config {
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
    }
    let paths = resolve_config(global.config.as_deref());
    let config = load_config(paths.logger.as_deref())?;
    Ok((config, paths.logger, paths.logger_source))
}

fn data_dir(global: &GlobalOpts) -> PathBuf {
    global.data_dir.clone().unwrap_or_else(default_data_dir)
}

fn open_session(global: &GlobalOpts) -> Result<Session<DirBackend>> {
    let (config, _, _) = load_logger_config(global)?;
    let backend = DirBackend::open(data_dir(global), config.persistence.quota_bytes)?;
    Session::open(backend, &config)
}

// ============================================================================
// Commands
// ============================================================================

fn ingest_from<R: BufRead>(session: &mut Session<DirBackend>, reader: R) -> Result<PumpSummary> {
    let mut source = LineSource::new(reader);
    let summary = session.pump(&mut source, &SystemClock)?;
    match source.take_error() {
        Some(e) => Err(Error::Io(e)),
        None => Ok(summary),
    }
}

fn run_ingest(global: &GlobalOpts, args: &IngestArgs) -> Result<Report> {
    let mut session = open_session(global)?;
    let summary = match args.input.as_deref() {
        None => ingest_from(&mut session, io::stdin().lock())?,
        Some(path) if path == Path::new("-") => ingest_from(&mut session, io::stdin().lock())?,
        Some(path) => ingest_from(&mut session, BufReader::new(File::open(path)?))?,
    };

    let store = session.store();
    let text = format!(
        "ingested {} lines ({} samples, {} rejected); project has {} points in {} groups",
        summary.lines,
        summary.applied,
        summary.rejected,
        store.total_points(),
        store.groups().len()
    );
    Ok(Report {
        json: envelope(
            "ingest",
            json!({
                "ingest": summary,
                "total_points": store.total_points(),
                "groups": store.groups().len(),
            }),
        ),
        summary: text,
    })
}

/// Match `--group` values against ids first, then names.
fn resolve_groups(session: &Session<DirBackend>, wanted: &[String]) -> Result<Vec<GroupId>> {
    let groups = session.store().groups();
    wanted
        .iter()
        .map(|value| {
            groups
                .iter()
                .find(|g| g.id().as_str() == value)
                .or_else(|| {
                    let key = normalize_label(value);
                    groups.iter().find(|g| normalize_label(g.name()) == key)
                })
                .map(|g| g.id().clone())
                .ok_or_else(|| Error::GroupNotFound {
                    group_id: value.clone(),
                })
        })
        .collect()
}

fn run_export(global: &GlobalOpts, args: &ExportArgs) -> Result<Report> {
    let mut session = open_session(global)?;
    let selection = resolve_groups(&session, &args.groups)?;
    let mode = if args.combined {
        ExportMode::Combined
    } else {
        ExportMode::Separate
    };

    let files = session.export(&selection, mode, &local_date_stamp())?;
    let mut written = Vec::with_capacity(files.len());
    for file in &files {
        let path = file.write_to(&args.out_dir)?;
        written.push(json!({
            "path": path.display().to_string(),
            "bytes": file.bytes.len(),
            "groups": file.groups,
        }));
    }

    Ok(Report {
        json: envelope("export", json!({ "files": written })),
        summary: format!(
            "wrote {} workbook(s) to {}",
            files.len(),
            args.out_dir.display()
        ),
    })
}

fn run_import(global: &GlobalOpts, args: &ImportArgs) -> Result<Report> {
    let mut session = open_session(global)?;
    let files = args
        .files
        .iter()
        .map(|path| FileSource::read(path))
        .collect::<Result<Vec<_>>>()?;

    let summary = session.import_files(&files, chrono::Utc::now().timestamp_millis())?;
    let text = format!(
        "imported {} file(s): {} groups, {} series, {} points",
        summary.files, summary.groups, summary.series, summary.points
    );
    Ok(Report {
        json: envelope("import", json!({ "import": summary })),
        summary: text,
    })
}

fn run_show(global: &GlobalOpts, args: &ShowArgs) -> Result<Report> {
    let session = open_session(global)?;
    let store = session.store();
    let summary = format!(
        "{} groups, {} points",
        store.groups().len(),
        store.total_points()
    );

    if args.full {
        return Ok(Report {
            json: envelope("show", json!({ "snapshot": session.snapshot() })),
            summary,
        });
    }

    let groups: Vec<Value> = store
        .groups()
        .iter()
        .map(|group| {
            json!({
                "id": group.id().as_str(),
                "name": group.name(),
                "points": group.point_count(),
                "range": group.range(),
                "folded": group.is_folded(),
                "series": group.series().iter().map(|s| json!({
                    "id": s.id().as_str(),
                    "label": s.label(),
                    "color": s.color(),
                    "points": s.samples().len(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(Report {
        json: envelope(
            "show",
            json!({
                "active_group_id": store.active_group_id().as_str(),
                "global_range": store.global_data_range(),
                "storage": session.persistence().backend().estimate_usage(),
                "groups": groups,
            }),
        ),
        summary,
    })
}

fn run_reset(global: &GlobalOpts) -> Result<Report> {
    let mut session = open_session(global)?;
    session.reset()?;
    Ok(Report {
        json: envelope("reset", json!({ "data_dir": data_dir(global).display().to_string() })),
        summary: "project reset".to_string(),
    })
}

fn run_config_show(global: &GlobalOpts) -> Result<Report> {
    let (config, path, source) = load_logger_config(global)?;
    let summary = format!(
        "config from {} ({})",
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string()),
        source
    );
    Ok(Report {
        json: envelope(
            "config show",
            json!({
                "source": {
                    "path": path.as_ref().map(|p| p.display().to_string()),
                    "origin": source.to_string(),
                    "using_defaults": path.is_none(),
                },
                "data_dir": data_dir(global).display().to_string(),
                "config": config,
            }),
        ),
        summary,
    })
}

fn run_config_validate(global: &GlobalOpts, path: Option<&Path>) -> Result<Report> {
    let checked = match path {
        Some(path) => {
            load_config(Some(path))?;
            Some(path.to_path_buf())
        }
        None => load_logger_config(global)?.1,
    };
    let shown = checked
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    Ok(Report {
        json: envelope(
            "config validate",
            json!({ "path": checked.map(|p| p.display().to_string()), "valid": true }),
        ),
        summary: format!("✓ {} is valid", shown),
    })
}
