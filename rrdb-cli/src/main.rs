//! CLI for the rrdb round-robin database engine.
//!
//! Provides commands for creating, updating, querying, and inspecting rrdb
//! databases.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rrdb::{ConsolidationFn, FetchRequest, FileBackendFactory, RrdDb, RrdDef, toolkit};
use tracing_subscriber::EnvFilter;

/// rrdb: embedded round-robin database engine CLI.
#[derive(Parser)]
#[command(name = "rrdb", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create a database from a JSON definition file.
    Create {
        /// Path of the database to create (overrides the definition's path).
        path: PathBuf,

        /// JSON definition file.
        #[arg(long)]
        definition: PathBuf,
    },

    /// Store samples given as `time:value:value...` (`N` = now, `U` = unknown).
    Update {
        /// Path to the database.
        path: PathBuf,

        /// One or more samples, oldest first.
        #[arg(required = true)]
        samples: Vec<String>,
    },

    /// Read consolidated values.
    Fetch {
        /// Path to the database.
        path: PathBuf,

        /// Consolidation function (AVERAGE, MIN, MAX, FIRST, LAST, TOTAL).
        #[arg(long, default_value = "AVERAGE")]
        function: String,

        /// Start time in seconds (default: one day before the end).
        #[arg(long, allow_hyphen_values = true)]
        start: Option<i64>,

        /// End time in seconds (default: the last update time).
        #[arg(long, allow_hyphen_values = true)]
        end: Option<i64>,

        /// Preferred row width in seconds.
        #[arg(long, default_value = "1")]
        resolution: i64,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: FetchFormat,
    },

    /// Print the full state of a database.
    Dump {
        /// Path to the database.
        path: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: DumpFormat,
    },

    /// Display the definition and last update of a database.
    Info {
        /// Path to the database.
        path: PathBuf,
    },

    /// Write a copy of a database with one archive resized.
    Resize {
        /// Path to the source database.
        path: PathBuf,

        /// Consolidation function of the archive.
        #[arg(long)]
        function: String,

        /// Primary steps per row of the archive.
        #[arg(long)]
        steps: u32,

        /// New row count.
        #[arg(long)]
        rows: u32,

        /// Path of the resized copy.
        #[arg(long)]
        output: PathBuf,
    },
}

/// Output format for fetch results.
#[derive(Clone, Copy, ValueEnum)]
enum FetchFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with timestamps and one column per datasource.
    Json,
}

/// Output format for dumps.
#[derive(Clone, Copy, ValueEnum)]
enum DumpFormat {
    /// Human-readable listing.
    Text,
    /// Structured snapshot, importable with `RrdDb::import`.
    Json,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut out = io::stdout().lock();

    let result = match cli.command {
        Commands::Create { path, definition } => cmd_create(&path, &definition, &mut out),
        Commands::Update { path, samples } => cmd_update(&path, &samples),
        Commands::Fetch {
            path,
            function,
            start,
            end,
            resolution,
            format,
        } => cmd_fetch(&path, &function, start, end, resolution, format, &mut out),
        Commands::Dump { path, format } => cmd_dump(&path, format, &mut out),
        Commands::Info { path } => cmd_info(&path, &mut out),
        Commands::Resize {
            path,
            function,
            steps,
            rows,
            output,
        } => cmd_resize(&path, &function, steps, rows, &output, &mut out),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `rrdb create <path> --definition <json>`.
fn cmd_create(path: &Path, definition: &Path, out: &mut dyn Write) -> CliResult {
    let json = std::fs::read_to_string(definition)?;
    let mut def = RrdDef::from_json(&json)?;
    def.path = path.to_path_buf();

    let db = RrdDb::create(&def)?;
    db.close()?;
    writeln!(
        out,
        "Created {} ({} datasources, {} archives, {} bytes)",
        path.display(),
        def.datasources.len(),
        def.archives.len(),
        def.estimated_size()
    )?;
    Ok(())
}

/// Implements `rrdb update <path> <time:value:...>...`.
fn cmd_update(path: &Path, samples: &[String]) -> CliResult {
    let db = RrdDb::open(path, false)?;
    let mut sample = db.create_sample(0)?;
    for template in samples {
        sample.clear().parse_template(template)?;
        db.update(&sample)?;
    }
    tracing::debug!(path = %path.display(), samples = samples.len(), "applied samples");
    db.close()?;
    Ok(())
}

/// Implements `rrdb fetch <path>`.
fn cmd_fetch(
    path: &Path,
    function: &str,
    start: Option<i64>,
    end: Option<i64>,
    resolution: i64,
    format: FetchFormat,
    out: &mut dyn Write,
) -> CliResult {
    let consolidation_fn: ConsolidationFn = function.parse()?;
    let db = RrdDb::open(path, true)?;
    let end = match end {
        Some(end) => end,
        None => db.last_update_time()?,
    };
    let start = start.unwrap_or(end - 86_400);

    let request = FetchRequest::new(consolidation_fn, start, end)?.with_resolution(resolution)?;
    let data = db.fetch(&request)?;
    db.close()?;

    match format {
        FetchFormat::Csv => write!(out, "{}", data.to_csv())?,
        FetchFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&data)?)?,
    }
    Ok(())
}

/// Implements `rrdb dump <path>`.
fn cmd_dump(path: &Path, format: DumpFormat, out: &mut dyn Write) -> CliResult {
    let db = RrdDb::open(path, true)?;
    let snapshot = db.snapshot()?;
    db.close()?;

    match format {
        DumpFormat::Text => write!(out, "{snapshot}")?,
        DumpFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&snapshot)?)?,
    }
    Ok(())
}

/// Implements `rrdb info <path>`.
fn cmd_info(path: &Path, out: &mut dyn Write) -> CliResult {
    let db = RrdDb::open(path, true)?;
    let def = db.rrd_def()?;
    let size = db.bytes()?.len();
    let last_values = db.last_datasource_values()?;
    db.close()?;

    writeln!(out, "Database: {}", path.display())?;
    writeln!(out, "  Step: {}s", def.step)?;
    writeln!(out, "  Last update: {}", def.start_time)?;
    if !def.info.is_empty() {
        writeln!(out, "  Info: {}", def.info)?;
    }
    writeln!(out, "  Size: {size} bytes")?;
    writeln!(out)?;

    writeln!(out, "Datasources: {}", def.datasources.len())?;
    for (ds, last) in def.datasources.iter().zip(last_values) {
        let bound = |b: Option<f64>| b.map_or_else(|| "U".to_string(), |v| v.to_string());
        writeln!(
            out,
            "  {} {} heartbeat={}s min={} max={} last={last}",
            ds.name,
            ds.ds_type,
            ds.heartbeat,
            bound(ds.min_value),
            bound(ds.max_value)
        )?;
    }
    writeln!(out)?;

    writeln!(out, "Archives: {}", def.archives.len())?;
    for (i, arc) in def.archives.iter().enumerate() {
        let arc_step = def.step * i64::from(arc.steps);
        writeln!(
            out,
            "  {i}: {} xff={} steps={} ({arc_step}s/row) rows={} ({}s)",
            arc.consolidation_fn,
            arc.xff,
            arc.steps,
            arc.rows,
            arc_step * i64::from(arc.rows)
        )?;
    }
    Ok(())
}

/// Implements `rrdb resize <path> --function --steps --rows --output`.
fn cmd_resize(
    path: &Path,
    function: &str,
    steps: u32,
    rows: u32,
    output: &Path,
    out: &mut dyn Write,
) -> CliResult {
    let consolidation_fn: ConsolidationFn = function.parse()?;
    toolkit::resize_archive(path, output, consolidation_fn, steps, rows, &FileBackendFactory)?;
    writeln!(
        out,
        "Resized {consolidation_fn}/{steps} of {} to {rows} rows",
        path.display()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DEFINITION: &str = r#"{
        "path": "ignored.rrdb",
        "start_time": 0,
        "step": 300,
        "datasources": [
            {"name": "load", "ds_type": "GAUGE", "heartbeat": 600, "min_value": 0.0, "max_value": null}
        ],
        "archives": [
            {"consolidation_fn": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 4}
        ]
    }"#;

    fn created(dir: &Path) -> PathBuf {
        let definition = dir.join("def.json");
        std::fs::write(&definition, DEFINITION).unwrap();
        let path = dir.join("load.rrdb");
        let mut out = Vec::new();
        cmd_create(&path, &definition, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("Created"));
        path
    }

    #[test]
    fn test_create_update_fetch() {
        let dir = tempdir().unwrap();
        let path = created(dir.path());

        let samples = ["300:1".to_string(), "600:2".to_string(), "900:U".to_string()];
        cmd_update(&path, &samples).unwrap();

        let mut out = Vec::new();
        cmd_fetch(
            &path,
            "average",
            Some(300),
            Some(900),
            1,
            FetchFormat::Csv,
            &mut out,
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,load\n300,1\n600,2\n900,NaN\n"
        );

        assert!(cmd_update(&path, &["600:3".to_string()]).is_err());
        assert!(
            cmd_fetch(&path, "median", None, None, 1, FetchFormat::Csv, &mut Vec::new()).is_err()
        );
    }

    #[test]
    fn test_info_dump_and_resize() {
        let dir = tempdir().unwrap();
        let path = created(dir.path());
        cmd_update(&path, &["300:5".to_string()]).unwrap();

        let mut out = Vec::new();
        cmd_info(&path, &mut out).unwrap();
        let info = String::from_utf8(out).unwrap();
        assert!(info.contains("Last update: 300"));
        assert!(info.contains("load GAUGE heartbeat=600s min=0 max=U last=5"));
        assert!(info.contains("0: AVERAGE xff=0.5 steps=1 (300s/row) rows=4 (1200s)"));

        let mut out = Vec::new();
        cmd_dump(&path, DumpFormat::Json, &mut out).unwrap();
        let snapshot: rrdb::RrdSnapshot = serde_json::from_slice(&out).unwrap();
        assert_eq!(snapshot.last_update_time, 300);

        let resized = dir.path().join("resized.rrdb");
        cmd_resize(&path, "AVERAGE", 1, 8, &resized, &mut Vec::new()).unwrap();
        let db = RrdDb::open(&resized, true).unwrap();
        assert_eq!(db.rrd_def().unwrap().archives[0].rows, 8);
    }
}
