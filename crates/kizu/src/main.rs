//! kizu CLI: tiling plans, quality verdicts, and stream replay.
//!
//! # Usage
//!
//! ```text
//! kizu plan --width 4096 --height 3072
//! kizu decide --defects defects.json --spec specs/PCB-A1.json
//! kizu process --events events.jsonl --spec-dir specs --out rows.ndjson
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use kizu_pipeline::{Detection, Measurements, QualitySpec, QuickRules};
use kizu_stream::{
    BufferedSink, HandlerContext, JsonlEventSource, JsonlQcEventSink, NdjsonFileTransport,
    QcEventSink, SpecRepository, SpecSource,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "kizu")]
#[command(about = "Tiled AOI board inspection: tiling plans, quality verdicts, stream replay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tile grid an image would be split into.
    Plan(PlanArgs),

    /// Decide one board from a captured defect list.
    Decide(DecideArgs),

    /// Replay a captured event stream into decision rows.
    Process(ProcessArgs),
}

#[derive(Debug, Clone, Args)]
struct PlanArgs {
    /// Image width in pixels.
    #[arg(long)]
    width: u32,

    /// Image height in pixels.
    #[arg(long)]
    height: u32,

    /// Square tile edge in pixels.
    #[arg(long, default_value_t = kizu_pipeline::tiling::DEFAULT_TILE_SIZE)]
    tile_size: u32,

    /// Overlap between neighbouring tiles in pixels.
    #[arg(long, default_value_t = kizu_pipeline::tiling::DEFAULT_OVERLAP)]
    overlap: u32,
}

#[derive(Debug, Clone, Args)]
struct DecideArgs {
    /// Path to the defect list (JSON array of detections).
    #[arg(long)]
    defects: PathBuf,

    /// Path to the product's quality spec (JSON). Omit for the
    /// permissive default.
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Path to physical measurements (JSON). Omit when none were
    /// captured.
    #[arg(long)]
    measures: Option<PathBuf>,

    /// Path to quick rules (JSON) for the capture-time verdict. Omit
    /// for the default rule set.
    #[arg(long)]
    quick_rules: Option<PathBuf>,

    /// Path to write the combined verdict (JSON). Prints to stdout
    /// when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ProcessArgs {
    /// Path to the captured event stream (JSONL, one event per line).
    #[arg(long)]
    events: PathBuf,

    /// Directory of per-product quality specs (<product_code>.json).
    #[arg(long)]
    spec_dir: PathBuf,

    /// Path to append decision rows to (NDJSON).
    #[arg(long)]
    out: PathBuf,

    /// Path to append QC events for rejected boards (JSONL).
    #[arg(long)]
    qc_events: Option<PathBuf>,

    /// Spec cache lifetime in seconds.
    #[arg(long, default_value_t = 600)]
    spec_ttl_secs: u64,

    /// Rows buffered before a bulk write; 0 disables the row threshold.
    #[arg(long, default_value_t = 500)]
    bulk_rows: usize,

    /// Longest time in seconds a row may wait in the buffer; 0 disables
    /// the time threshold.
    #[arg(long, default_value_t = 2.0)]
    bulk_secs: f64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan(args) => run_plan(&args),
        Commands::Decide(args) => run_decide(&args),
        Commands::Process(args) => run_process(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| -> CliError { format!("failed to read {}: {e}", path.display()).into() })?;
    serde_json::from_str(&text)
        .map_err(|e| -> CliError { format!("failed to parse {}: {e}", path.display()).into() })
}

// --- plan ---

fn run_plan(args: &PlanArgs) -> CliResult<()> {
    if args.tile_size == 0 {
        return Err("tile size must be positive".into());
    }
    if args.overlap >= args.tile_size {
        return Err("overlap must be smaller than the tile size".into());
    }

    let rects = kizu_pipeline::tiling::plan(args.width, args.height, args.tile_size, args.overlap);
    println!(
        "{}x{} image, {}px tiles, {}px overlap: {} tiles",
        args.width,
        args.height,
        args.tile_size,
        args.overlap,
        rects.len(),
    );
    for (index, rect) in rects.iter().enumerate() {
        println!(
            "  tile {index:>3}: origin ({}, {}), {}x{}",
            rect.x, rect.y, rect.width, rect.height,
        );
    }
    Ok(())
}

// --- decide ---

fn run_decide(args: &DecideArgs) -> CliResult<()> {
    let defects: Vec<Detection> = read_json(&args.defects)?;
    let spec: QualitySpec = match &args.spec {
        Some(path) => read_json(path)?,
        None => QualitySpec::default(),
    };
    let measures: Option<Measurements> = match &args.measures {
        Some(path) => Some(read_json(path)?),
        None => None,
    };
    let quick_rules: Option<QuickRules> = match &args.quick_rules {
        Some(path) => Some(read_json(path)?),
        None => None,
    };

    let mini = kizu_pipeline::quick_decision(&defects, measures.as_ref(), quick_rules.as_ref());
    let verdict = kizu_pipeline::apply_aql(&defects, measures.as_ref(), &spec);
    tracing::info!(
        defects = defects.len(),
        mini = %mini,
        decision = %verdict.decision,
        "board decided"
    );

    let report = serde_json::json!({
        "mini_decision": mini,
        "final_decision": verdict.decision,
        "reason": verdict.reason,
        "severity": verdict.severity,
        "defect_count": defects.len(),
    });
    let json = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!("verdict written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// --- process ---

fn run_process(args: &ProcessArgs) -> CliResult<()> {
    if !args.bulk_secs.is_finite() || args.bulk_secs < 0.0 {
        return Err("bulk-secs must be a non-negative number".into());
    }
    let bulk_delay = Duration::from_secs_f64(args.bulk_secs);

    let repo = SpecRepository::new(
        SpecSource::Local {
            dir: args.spec_dir.clone(),
        },
        Duration::from_secs(args.spec_ttl_secs),
    );
    let sink = BufferedSink::new(
        NdjsonFileTransport::new(&args.out),
        args.bulk_rows,
        bulk_delay,
    );
    let qc_sink = match &args.qc_events {
        Some(path) => Some(JsonlQcEventSink::create(path)?),
        None => None,
    };
    let ctx = HandlerContext {
        specs: &repo,
        sink: &sink,
        qc: qc_sink.as_ref().map(|sink| sink as &dyn QcEventSink),
    };

    tracing::info!(
        events = %args.events.display(),
        bulk_rows = args.bulk_rows,
        bulk_secs = args.bulk_secs,
        "replaying event stream"
    );
    let mut source = JsonlEventSource::open(&args.events)?;
    let interval = kizu_stream::flush_interval(args.bulk_rows, bulk_delay);
    let stats = kizu_stream::run(&mut source, &ctx, interval)?;

    println!(
        "processed {} events ({} skipped, {} failed); rows appended to {}",
        stats.processed,
        stats.skipped,
        stats.failed,
        args.out.display(),
    );
    Ok(())
}
