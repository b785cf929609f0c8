// live_photo - export a video clip as a paired still + video asset
// into an on-disk photo library

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use live_photo::{
    AuthorizationStatus, CancelHandle, FsPhotoLibrary, MediaClip, Pipeline, PipelineConfig, QualityPreset,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AccessMode {
    /// Library access already granted
    Authorized,
    /// Library access refused
    Denied,
    /// Ask on the terminal before the first write
    Prompt,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Quality {
    Highest,
    Medium,
    Passthrough,
}

impl From<Quality> for QualityPreset {
    fn from(q: Quality) -> Self {
        match q {
            Quality::Highest => QualityPreset::Highest,
            Quality::Medium => QualityPreset::Medium,
            Quality::Passthrough => QualityPreset::Passthrough,
        }
    }
}

#[derive(Parser)]
#[command(name = "live_photo", version, about = "Export a video clip as a paired still + video asset")]
struct Args {
    /// Source video clip
    video: PathBuf,

    /// Photo library directory
    #[arg(long, default_value = "./PhotoLibrary")]
    library: PathBuf,

    /// Key frame timestamp in seconds
    #[arg(long)]
    key_frame: Option<f64>,

    /// JSON pipeline configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum paired video length in seconds
    #[arg(long)]
    max_duration: Option<f64>,

    /// Encoding quality preset
    #[arg(long, value_enum)]
    quality: Option<Quality>,

    /// Scratch directory for intermediate files
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Library authorization state
    #[arg(long, value_enum, default_value_t = AccessMode::Authorized)]
    access: AccessMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    info!("🎬 Exporting {}", args.video.display());
    info!("   Library: {}", args.library.display());

    std::fs::create_dir_all(&config.scratch_dir)
        .with_context(|| format!("Failed to create scratch dir {}", config.scratch_dir.display()))?;

    let key_frame = args.key_frame.map(parse_key_frame).transpose()?;

    let clip = MediaClip::open(&args.video, key_frame)
        .await
        .with_context(|| format!("Failed to probe {}", args.video.display()))?;
    info!("   Clip: {:.3}s, key frame at {:.3}s", clip.duration().as_secs_f64(), clip.key_frame().as_secs_f64());

    let library = build_library(&args);
    let pipeline = Pipeline::with_ffmpeg(&config, Arc::new(library)).context("Failed to build pipeline")?;

    let cancel = CancelHandle::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling export");
            ctrl_c.cancel();
        }
    });

    let result = pipeline.run(&clip, &cancel).await;
    let metrics = serde_json::to_value(pipeline.metrics()).context("Failed to serialize metrics")?;

    let (report, ok) = match result {
        Ok(id) => {
            info!("   ✓ Saved asset {}", id);
            (json!({ "ok": true, "asset_id": id, "library": args.library, "metrics": metrics }), true)
        }
        Err(e) => (
            json!({ "ok": false, "error": e.kind(), "message": e.to_string(), "metrics": metrics }),
            false,
        ),
    };

    println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(max) = args.max_duration {
        config.max_duration_secs = max;
    }
    if let Some(quality) = args.quality {
        config.quality_preset = quality.into();
    }
    if let Some(dir) = &args.scratch_dir {
        config.scratch_dir = dir.clone();
    }

    config.validate().context("Invalid pipeline configuration")?;
    Ok(config)
}

fn parse_key_frame(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("--key-frame must be a non-negative number of seconds, got {}", secs))
}

fn build_library(args: &Args) -> FsPhotoLibrary {
    let library = FsPhotoLibrary::new(&args.library);
    match args.access {
        AccessMode::Authorized => library.with_authorization(AuthorizationStatus::Authorized),
        AccessMode::Denied => library.with_authorization(AuthorizationStatus::Denied),
        AccessMode::Prompt => {
            let root = args.library.display().to_string();
            library
                .with_authorization(AuthorizationStatus::NotDetermined)
                .with_prompt(Arc::new(move || ask_terminal(&root)))
        }
    }
}

fn ask_terminal(root: &str) -> AuthorizationStatus {
    eprint!("Allow saving to the photo library at {}? [y/N] ", root);
    let _ = std::io::stderr().flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return AuthorizationStatus::Denied;
    }

    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => AuthorizationStatus::Authorized,
        _ => AuthorizationStatus::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_frame() {
        assert_eq!(parse_key_frame(0.75).unwrap(), Duration::from_millis(750));
        assert!(parse_key_frame(-1.0).is_err());
        assert!(parse_key_frame(f64::NAN).is_err());
        assert!(parse_key_frame(1e20).is_err());
    }
}
