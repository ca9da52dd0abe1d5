mod map_store;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use map_store::MapStore;
use std::path::{Path, PathBuf};
use thermal_vision::{
    BatchRunner, BatchSummary, FeedbackAdjustment, InspectionPipeline, OutputLayout,
    PipelineConfig, Renderer,
};
use tracing_subscriber::EnvFilter;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Classifies thermal inspection images and draws fault boxes on them.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect an image or every image in a folder.
    Run(RunArgs),
    /// Redraw boxed images from (possibly hand-edited) JSON records.
    Refresh(RefreshArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Image file or folder of images.
    input: PathBuf,

    /// Output root; `masks/`, `filtered/` and `boxed/` are created under it.
    #[arg(short, long, default_value = "output")]
    outdir: PathBuf,

    /// Folder of precomputed heatmaps (`<stem>.json` or `<stem>.png`).
    #[arg(short, long)]
    maps: Option<PathBuf>,

    /// Detection strictness, clamped into [0.1, 2.0]. Overrides the config file.
    #[arg(short, long)]
    sensitivity: Option<f64>,

    /// Feedback adjustment JSON. `none` disables feedback.
    #[arg(short, long)]
    feedback: Option<PathBuf>,

    /// Pipeline configuration JSON.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Font used for label text. Overrides the config file.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Concurrent images. Defaults to the CPU count.
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Args, Debug)]
struct RefreshArgs {
    #[command(flatten)]
    records: RecordSource,

    /// Pipeline configuration JSON; only its render settings are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Font used for label text.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct RecordSource {
    /// A single record.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Every `*.json` record in a folder.
    #[arg(long)]
    json_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Logging ---
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    // --- 2. Dispatch ---
    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Refresh(args) => refresh(args),
    }
}

fn load_config(path: Option<&Path>, font: Option<PathBuf>) -> anyhow::Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if font.is_some() {
        config.render.font_path = font;
    }
    Ok(config)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    // --- 1. Configuration ---
    let mut config = load_config(args.config.as_deref(), args.font)?;
    if let Some(sensitivity) = args.sensitivity {
        config = config.with_sensitivity(sensitivity);
    }
    let feedback = FeedbackAdjustment::load(args.feedback.as_deref());

    // --- 2. Inputs & Outputs ---
    let images = collect_images(&args.input)?;
    if images.is_empty() {
        bail!("no images found at {}", args.input.display());
    }
    let layout = OutputLayout::under(&args.outdir);
    layout.ensure()?;

    // --- 3. Batch ---
    let pipeline = InspectionPipeline::new(MapStore::new(args.maps), config, feedback)?;
    let mut runner = BatchRunner::new(pipeline);
    if let Some(workers) = args.workers {
        runner = runner.with_workers(workers);
    }
    let items = runner.run(images, layout).await;

    // --- 4. Report ---
    for item in &items {
        match &item.outcome {
            Ok(result) => println!(
                "{} -> {} ({} boxes) {}",
                item.image.display(),
                result.global_label,
                result.detections.len(),
                result.boxed_image_path.display()
            ),
            Err(e) => println!("{} -> FAILED: {e:#}", item.image.display()),
        }
    }
    let summary = BatchSummary::of(&items);
    println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
    if summary.succeeded == 0 {
        bail!("every image failed");
    }
    Ok(())
}

fn refresh(args: RefreshArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref(), args.font)?;
    let renderer = Renderer::new(config.render)?;

    if let Some(json) = args.records.json {
        let out = renderer
            .redraw_record(&json)
            .with_context(|| format!("refreshing {}", json.display()))?;
        println!("{}", out.display());
        return Ok(());
    }

    let Some(dir) = args.records.json_dir else {
        bail!("pass --json or --json-dir");
    };
    let results = renderer.redraw_directory(&dir)?;
    let mut failed = 0;
    for (record, outcome) in &results {
        match outcome {
            Ok(out) => println!("{} -> {}", record.display(), out.display()),
            Err(e) => {
                failed += 1;
                println!("{} -> FAILED: {e}", record.display());
            }
        }
    }
    println!("{} refreshed, {failed} failed", results.len() - failed);
    Ok(())
}

/// A single image, or the images directly inside a folder in name order.
fn collect_images(input: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let entries =
        std::fs::read_dir(input).with_context(|| format!("reading {}", input.display()))?;
    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_image(path))
        .collect();
    images.sort();
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}
