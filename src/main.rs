use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sheetscan::recognition::OcrsRecognizer;
use sheetscan::{document_text, AnswerSheetReader, ImageInput, LineRecognizer, PipelineConfig, SegmentationStrategy};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    ProjectionProfile,
    ConnectedComponents,
}

impl From<Strategy> for SegmentationStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::ProjectionProfile => SegmentationStrategy::ProjectionProfile,
            Strategy::ConnectedComponents => SegmentationStrategy::ConnectedComponents,
        }
    }
}

#[derive(Parser)]
#[command(name = "sheetscan")]
#[command(about = "Read handwritten answers from photographed answer sheets")]
struct Cli {
    /// Page images, in document order
    #[arg(value_name = "IMAGES", required = true)]
    images: Vec<PathBuf>,

    /// JSON configuration file; missing keys keep their defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of answer boxes per page
    #[arg(long, value_name = "N")]
    max_boxes: Option<usize>,

    /// Line segmentation strategy
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Directory holding text-detection.rten and text-recognition.rten
    #[arg(long, value_name = "DIR")]
    models: Option<PathBuf>,

    /// Save debug images to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Skip recognition and only report boxes and lines
    #[arg(long)]
    skip_ocr: bool,

    /// Write the extracted text to this file as well as stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sheetscan=debug" } else { "sheetscan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(max_boxes) = args.max_boxes {
        config.regions.max_boxes = max_boxes;
    }
    if let Some(strategy) = args.strategy {
        config.segmentation.strategy = strategy.into();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let config = load_config(&args)?;

    let recognizer: Option<Arc<dyn LineRecognizer>> = if args.skip_ocr {
        None
    } else {
        let recognizer = match &args.models {
            Some(dir) => OcrsRecognizer::from_dir(dir)?,
            None => OcrsRecognizer::from_default_location()?,
        };
        recognizer.warmup().context("recognizer warmup failed")?;
        let recognizer: Arc<dyn LineRecognizer> = Arc::new(recognizer);
        Some(recognizer)
    };

    let mut reader = AnswerSheetReader::new(&config, recognizer)?;
    if let Some(dir) = &args.debug_out {
        reader = reader.with_debug(dir)?;
    }

    info!(pages = args.images.len(), "Reading answer sheets");
    let inputs: Vec<ImageInput> = args.images.iter().cloned().map(ImageInput::from).collect();
    let pages = reader.read_document(inputs)?;

    if args.skip_ocr {
        for (page_idx, page) in pages.iter().enumerate() {
            println!("Page {}: {} answer boxes", page_idx + 1, page.regions.len());
            for region in &page.regions {
                let b = region.bbox;
                println!(
                    "  Box {} at ({}, {}) {}x{}: {} lines",
                    region.index + 1,
                    b.x,
                    b.y,
                    b.width,
                    b.height,
                    region.lines.len()
                );
                for line in &region.lines {
                    let l = line.bbox;
                    println!("    line at ({}, {}) {}x{}", l.x, l.y, l.width, l.height);
                }
            }
        }
        return Ok(());
    }

    let text = document_text(&pages);
    if text.trim().is_empty() {
        warn!("No text recognized");
    }
    print!("{text}");

    if let Some(path) = &args.output {
        std::fs::write(path, &text).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Text saved");
    }

    Ok(())
}
