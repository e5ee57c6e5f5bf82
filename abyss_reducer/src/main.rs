mod opencv_io;

use abyss_vision::config::ReducerConfig;
use abyss_vision::parallel_pipeline::{JobOutcome, ParallelReducer, VideoJob};
use abyss_vision::video::VideoSource;
use anyhow::{Context, bail};
use opencv_io::{OpenCvSink, OpenCvSource};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const USAGE: &str = "Usage: abyss_reducer [--params <params.json>] <video>...";

/// Contents of the optional parameters file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Params {
    /// When false, the reduced video replaces the original file.
    keep_original: bool,
    summarize: ReducerConfig,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            keep_original: true,
            summarize: ReducerConfig::default(),
        }
    }
}

impl Params {
    fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.summarize.validate()?;
        Ok(params)
    }

    fn from_path(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read parameters from {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("invalid parameters in {}", path.display()))
    }
}

#[derive(Debug, PartialEq)]
struct Args {
    params: Option<PathBuf>,
    videos: Vec<PathBuf>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut params = None;
    let mut videos = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--params" | "-p" => {
                let path = iter.next().context("--params needs a file path")?;
                params = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}\n{USAGE}"),
            video => videos.push(PathBuf::from(video)),
        }
    }
    Ok(Args { params, videos })
}

/// `dive.mp4` becomes `dive_summ.mp4` next to the input.
fn summary_path(video: &Path) -> anyhow::Result<PathBuf> {
    let stem = video
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("{} has no usable file name", video.display()))?;
    let name = match video.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}_summ.{ext}"),
        None => format!("{stem}_summ"),
    };
    Ok(video.with_file_name(name))
}

/// The video is opened by whichever worker picks the job up.
fn video_job(video: PathBuf, output: PathBuf) -> VideoJob {
    let name = video.display().to_string();
    VideoJob::deferred(name, move || -> anyhow::Result<_> {
        let source = OpenCvSource::open(&video)?;
        let sink = OpenCvSink::create(&output, source.metadata().frame_rate, source.dimensions())?;
        Ok((source, sink))
    })
}

/// Logs each outcome and, unless originals are kept, moves every complete
/// reduction over its input. Returns how many videos failed.
fn settle_outcomes(
    outcomes: Vec<JobOutcome>,
    targets: &[(PathBuf, PathBuf)],
    keep_original: bool,
) -> usize {
    let mut failures = 0;
    for (outcome, (video, output)) in outcomes.into_iter().zip(targets) {
        let report = match outcome.result {
            Ok(report) => report,
            Err(err) => {
                error!(video = %video.display(), error = %err, "reduction failed");
                failures += 1;
                continue;
            }
        };
        info!(
            video = %video.display(),
            output = %output.display(),
            retained = report.retained.len(),
            frames = report.frame_count,
            fraction = report.retained_fraction(),
            "reduced"
        );
        if keep_original || report.stopped {
            continue;
        }
        match std::fs::rename(output, video) {
            Ok(()) => info!(video = %video.display(), "original replaced by its reduction"),
            Err(err) => {
                error!(
                    video = %video.display(),
                    output = %output.display(),
                    error = %err,
                    "cannot replace original"
                );
                failures += 1;
            }
        }
    }
    failures
}

fn init_tracing() {
    let use_json = env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("abyss_vision=info,abyss_reducer=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().skip(1).collect();
    let args = parse_args(&args)?;
    if args.videos.is_empty() {
        println!("{USAGE}");
        return Ok(());
    }
    let params = match &args.params {
        Some(path) => Params::from_path(path)?,
        None => Params::default(),
    };
    info!(videos = args.videos.len(), keep_original = params.keep_original, "starting reduction");

    // --- 2. Worker Pool & Cancellation ---
    let pool = ParallelReducer::new(params.summarize.clone())?;
    let stop = pool.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current segments");
            stop.store(true, Ordering::Relaxed);
        }
    });

    // --- 3. Queue Every Video ---
    let mut jobs = Vec::new();
    let mut targets = Vec::new();
    let mut failures = 0usize;
    for video in &args.videos {
        match summary_path(video) {
            Ok(output) => {
                jobs.push(video_job(video.clone(), output.clone()));
                targets.push((video.clone(), output));
            }
            Err(err) => {
                error!(video = %video.display(), error = %err, "cannot name the output");
                failures += 1;
            }
        }
    }

    // --- 4. Reduce & Replace Originals ---
    let outcomes = pool.reduce_all(jobs).await;
    failures += settle_outcomes(outcomes, &targets, params.keep_original);
    pool.shutdown().await;

    if failures > 0 {
        bail!("{failures} of {} videos failed", args.videos.len());
    }
    info!("finished");
    Ok(())
}
