//! Replay a still image (or a synthetic subject) through the pipeline and
//! print every event as a JSON line.
//!
//! Usage: `measure-replay [image] [--mask <out.png>]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use measure_models::{Frame, PipelineConfig};
use measure_pipeline::metrics::init_metrics;
use measure_pipeline::{
    init_tracing, FixedCalibration, InputMode, Pipeline, PipelineRunner, ReplayFrameSource,
    StaticFrameSource,
};
use measure_vision::BackendSelector;

/// Frames in the synthetic replay.
const SYNTHETIC_FRAMES: usize = 20;
const SYNTHETIC_INTERVAL_SECS: f64 = 0.8;

struct Args {
    image: Option<PathBuf>,
    mask: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        image: None,
        mask: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mask" => {
                let path = iter.next().context("--mask needs an output path")?;
                args.mask = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => anyhow::bail!("unknown flag {other}"),
            other => args.image = Some(PathBuf::from(other)),
        }
    }
    Ok(args)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn load_frame(path: &PathBuf) -> anyhow::Result<Frame> {
    let rgba = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Frame::new(width, height, rgba.into_raw(), 0.0)?)
}

/// A light elongated subject on a dark background.
fn synthetic_frame() -> anyhow::Result<Frame> {
    let mut frame = Frame::filled(320, 240, [35, 38, 45, 255], 0.0)?;
    for y in 100..140 {
        for x in 60..260 {
            frame.set_pixel(x, y, [215, 185, 165, 255]);
        }
    }
    Ok(frame)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let metrics = if env_flag("MEASURE_METRICS_DUMP", false) {
        Some(init_metrics().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let args = parse_args()?;
    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let units_per_pixel = std::env::var("MEASURE_UNITS_PER_PIXEL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.05);
    let backend = BackendSelector::select(env_flag("MEASURE_USE_WORKER", true));
    let calibration = Arc::new(FixedCalibration::new(units_per_pixel));
    let run_for = Duration::from_secs_f64(
        std::env::var("MEASURE_REPLAY_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(12.0),
    );

    let (tx, mut rx) = mpsc::channel(1024);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("failed to encode event: {e}"),
            }
        }
    });

    let stats = match &args.image {
        Some(path) => {
            let frame = load_frame(path)?;
            let pipeline = Pipeline::new(config, backend, calibration)?.with_input_mode(InputMode::Still);
            if let Some(mask_path) = &args.mask {
                let mask = pipeline.segment(Arc::new(frame.clone())).await?;
                mask.save(mask_path)
                    .with_context(|| format!("failed to write mask {}", mask_path.display()))?;
                info!(path = %mask_path.display(), "Segmentation mask written");
            }
            PipelineRunner::new(pipeline, StaticFrameSource::new(frame), tx)
                .with_max_duration(run_for)
                .run()
                .await
        }
        None => {
            let frame = synthetic_frame()?;
            let pipeline = Pipeline::new(config, backend, calibration)?;
            let source = ReplayFrameSource::repeated(&frame, SYNTHETIC_FRAMES, SYNTHETIC_INTERVAL_SECS);
            PipelineRunner::new(pipeline, source, tx)
                .with_max_duration(run_for)
                .run()
                .await
        }
    };

    printer.await.context("event printer failed")?;
    info!(captures = stats.captures, ticks = stats.ticks, "Replay finished");

    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }
    Ok(())
}
