//! `plitectl` - administrative command-line interface over a `persist-lite`
//! database file.
//!
//! The engine's CRUD, bulk, and purge operations are all generic over a
//! compile-time [`crate::mapping::MappedEntity`], so a single runtime binary
//! cannot dispatch them for an arbitrary entity type chosen on the command
//! line. `plitectl` covers the slice that needs no entity type at all -
//! schema inspection, storage compaction, database initialization - grounded
//! in [`crate::inspector`] and [`crate::dialect::SqlDialect`], and drives the
//! bulk/purge subcommands against one fixed demo entity ([`demo::Record`]),
//! the way an issue-tracker CLI binary is built around its own `Issue` type.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;

use crate::bulk::{self, ConflictResolution, ExportMode, ExportOptions, ExportOutput, FileFormat, ImportOptions, ImportStrategy};
use crate::config::EngineConfig;
use crate::dialect::{SqlDialect, SqliteDialect};
use crate::error::Result;
use crate::expr::Predicate;
use crate::inspector;
use crate::purge::{self, PurgeOptions, PurgeStrategy};
use crate::repository::{CallerContext, Repository};

mod demo;

#[derive(Debug, Parser)]
#[command(name = "plitectl", version, about = "Administrative CLI for persist-lite databases")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error log output.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print schema and storage statistics for a database file.
    Inspect(InspectArgs),
    /// Reclaim free pages with `VACUUM`, reporting space reclaimed.
    Vacuum(VacuumArgs),
    /// Create a database file (if absent) and apply the given configuration's pragmas.
    Init(InitArgs),
    /// Preview or commit an age-bounded purge of the demo `records` table.
    Purge(PurgeArgs),
    /// Export the demo `records` table to JSON or CSV, optionally gzipped.
    Export(ExportArgs),
    /// Import rows into the demo `records` table from a JSON or CSV file.
    Import(ImportArgs),
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,

    /// Emit the report as JSON instead of the human-readable summary.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct VacuumArgs {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Path to the SQLite database file to create.
    pub db_path: PathBuf,

    /// Optional JSON configuration file; defaults to [`EngineConfig::default`].
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,

    /// Purge rows created more than this many days ago.
    #[arg(long, conflicts_with = "cutoff")]
    pub age_days: Option<i64>,

    /// Purge rows created before this RFC 3339 timestamp.
    #[arg(long)]
    pub cutoff: Option<String>,

    /// Actually delete the matching rows; without this flag the purge only
    /// previews what would be deleted.
    #[arg(long)]
    pub commit: bool,

    /// Run `VACUUM` after a committed purge and report bytes reclaimed.
    #[arg(long)]
    pub optimize: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,

    /// Directory to write chunk files and the metadata sidecar into.
    pub out_dir: PathBuf,

    /// Output format: "json" (default) or "csv".
    #[arg(long, default_value = "json")]
    pub format: String,

    /// Gzip-compress each chunk file.
    #[arg(long)]
    pub compress: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,

    /// Path to the JSON or CSV file to import (".gz" suffix is decompressed).
    pub file: PathBuf,

    /// Update existing rows instead of failing on a collision.
    #[arg(long)]
    pub upsert: bool,
}

/// Run the CLI with already-parsed arguments, returning the process exit code.
pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Inspect(args) => inspect(args),
        Command::Vacuum(args) => vacuum(args),
        Command::Init(args) => init(args),
        Command::Purge(args) => purge_cmd(args),
        Command::Export(args) => export_cmd(args),
        Command::Import(args) => import_cmd(args),
    }
}

fn inspect(args: &InspectArgs) -> Result<()> {
    let conn = Connection::open(&args.db_path)?;
    let report = inspector::inspect(&conn, Some(args.db_path.as_path()))?;
    if args.json {
        #[derive(serde::Serialize)]
        struct JsonTable<'a> {
            name: &'a str,
            row_count: u64,
            columns: usize,
            indexes: usize,
        }
        #[derive(serde::Serialize)]
        struct JsonReport<'a> {
            file_size_bytes: u64,
            table_count: u64,
            tables: Vec<JsonTable<'a>>,
        }
        let rendered = JsonReport {
            file_size_bytes: report.stats.file_size_bytes,
            table_count: report.stats.table_count,
            tables: report
                .tables
                .iter()
                .map(|t| JsonTable {
                    name: &t.name,
                    row_count: t.row_count,
                    columns: t.columns.len(),
                    indexes: t.indexes.len(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        print!("{}", report.human_readable());
    }
    Ok(())
}

fn vacuum(args: &VacuumArgs) -> Result<()> {
    let conn = Connection::open(&args.db_path)?;
    let size_before = std::fs::metadata(&args.db_path).map(|m| m.len()).unwrap_or(0);

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message("compacting storage...");
    let dialect = SqliteDialect;
    let started = Instant::now();
    conn.execute_batch(dialect.compaction_command())?;
    spinner.finish_and_clear();

    let size_after = std::fs::metadata(&args.db_path).map(|m| m.len()).unwrap_or(0);
    let reclaimed = size_before.saturating_sub(size_after);
    println!(
        "vacuumed {} in {:.2}s, reclaimed {} bytes ({} -> {})",
        args.db_path.display(),
        started.elapsed().as_secs_f64(),
        reclaimed,
        size_before,
        size_after,
    );
    Ok(())
}

fn init(args: &InitArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let conn = Connection::open(&args.db_path)?;
    config.apply_pragmas(&conn)?;
    println!("initialized {}", args.db_path.display());
    Ok(())
}

fn purge_cmd(args: &PurgeArgs) -> Result<()> {
    let repository = Repository::<demo::Record>::open(&args.db_path, &EngineConfig::default())?;

    let mut options = PurgeOptions { strategy: PurgeStrategy::PurgeAll, safe_mode: !args.commit, optimize_storage: args.optimize, ..PurgeOptions::default() };
    if let Some(days) = args.age_days {
        options.age_threshold = Some(std::time::Duration::from_secs(days.max(0) as u64 * 86400));
    } else if let Some(cutoff) = &args.cutoff {
        options.cutoff_date = Some(cutoff.parse().map_err(|err: chrono::ParseError| {
            crate::error::EngineError::ArgumentInvalid(format!("invalid --cutoff timestamp: {err}"))
        })?);
    } else {
        return Err(crate::error::EngineError::ArgumentInvalid("one of --age-days or --cutoff is required".to_string()));
    }

    let result = purge::purge(&repository, Predicate::All, options)?;
    if result.is_preview {
        let preview = result.preview.expect("preview result carries a PurgePreview");
        println!("preview: {} row(s) would be purged (pass --commit to delete)", preview.affected_entity_count);
    } else {
        println!("purged {} row(s), reclaimed {} bytes", result.entities_purged, result.space_reclaimed_bytes);
    }
    Ok(())
}

fn export_cmd(args: &ExportArgs) -> Result<()> {
    let repository = Repository::<demo::Record>::open(&args.db_path, &EngineConfig::default())?;
    let format = match args.format.as_str() {
        "csv" => FileFormat::Csv,
        _ => FileFormat::Json,
    };
    let bar = indicatif::ProgressBar::new(0);
    let bar_handle = bar.clone();
    let mut options = ExportOptions {
        mode: ExportMode::Full,
        export_folder: Some(args.out_dir.clone()),
        format,
        compress: args.compress,
        ..ExportOptions::default()
    };
    options.progress = Some(Box::new(move |progress| {
        bar_handle.set_length(progress.total);
        bar_handle.set_position(progress.processed);
    }));
    let output = bulk::bulk_export(&repository, options)?;
    bar.finish_and_clear();
    match output {
        ExportOutput::Files(report) => {
            println!("exported {} row(s) into {} chunk file(s) under {}", report.total_count, report.chunk_files.len(), args.out_dir.display());
        }
        ExportOutput::InMemory(rows) => println!("exported {} row(s)", rows.len()),
    }
    Ok(())
}

fn import_cmd(args: &ImportArgs) -> Result<()> {
    let repository = Repository::<demo::Record>::open(&args.db_path, &EngineConfig::default())?;
    let bar = indicatif::ProgressBar::new(0);
    let bar_handle = bar.clone();
    let mut options = ImportOptions {
        strategy: if args.upsert { ImportStrategy::Upsert } else { ImportStrategy::Insert },
        conflict: if args.upsert { ConflictResolution::UseSource } else { ConflictResolution::Fail },
        ..ImportOptions::default()
    };
    options.progress = Some(Box::new(move |progress| {
        bar_handle.set_length(progress.total);
        bar_handle.set_position(progress.processed);
    }));
    let caller = CallerContext::new("plitectl");
    let result = bulk::bulk_import(&repository, &args.file, options, &caller)?;
    bar.finish_and_clear();
    println!(
        "imported {} row(s), {} failed, {} skipped",
        result.success_count, result.failure_count, result.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_inspect_subcommand() {
        let cli = Cli::try_parse_from(["plitectl", "inspect", "db.sqlite3", "--json"]).unwrap();
        match cli.command {
            Command::Inspect(args) => {
                assert_eq!(args.db_path, PathBuf::from("db.sqlite3"));
                assert!(args.json);
            }
            other => panic!("expected Inspect, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_vacuum_subcommand() {
        let cli = Cli::try_parse_from(["plitectl", "vacuum", "db.sqlite3"]).unwrap();
        assert!(matches!(cli.command, Command::Vacuum(_)));
    }

    #[test]
    fn command_tree_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_purge_subcommand_with_age_days() {
        let cli = Cli::try_parse_from(["plitectl", "purge", "db.sqlite3", "--age-days", "30", "--commit"]).unwrap();
        match cli.command {
            Command::Purge(args) => {
                assert_eq!(args.age_days, Some(30));
                assert!(args.commit);
            }
            other => panic!("expected Purge, got {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_age_days_and_cutoff_together() {
        let result = Cli::try_parse_from(["plitectl", "purge", "db.sqlite3", "--age-days", "1", "--cutoff", "2020-01-01T00:00:00Z"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_export_subcommand() {
        let cli = Cli::try_parse_from(["plitectl", "export", "db.sqlite3", "out", "--format", "csv", "--compress"]).unwrap();
        match cli.command {
            Command::Export(args) => {
                assert_eq!(args.format, "csv");
                assert!(args.compress);
            }
            other => panic!("expected Export, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_import_subcommand() {
        let cli = Cli::try_parse_from(["plitectl", "import", "db.sqlite3", "rows.json", "--upsert"]).unwrap();
        match cli.command {
            Command::Import(args) => assert!(args.upsert),
            other => panic!("expected Import, got {other:?}"),
        }
    }
}
