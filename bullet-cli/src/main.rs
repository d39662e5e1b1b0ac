// bullet: command line front-end for the bullet detector

use anyhow::{bail, Context};
use bullet_eye::{CameraBackend, DefaultDetector, DetectionState, DetectorConfig, LogViewer};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bullet")]
#[command(about = "Bullet impact detection on a network camera stream", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Camera MJPEG stream URL
    #[arg(long, global = true)]
    stream_url: Option<String>,

    /// ONNX model file
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Camera reader: http, or opencv when built with the opencv feature
    #[arg(long, global = true)]
    camera_backend: Option<CameraBackend>,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection loop and show annotated frames (press q to quit)
    Watch {
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,

        /// Log per-frame counts instead of opening a window
        #[arg(long)]
        headless: bool,
    },

    /// Capture one frame, annotate it and write it as JPEG
    Snapshot {
        /// Output file
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Serve the annotated stream over HTTP
    Serve {
        /// Listen address, e.g. 0.0.0.0:5000
        #[arg(long)]
        bind: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let overrides = Overrides {
        stream_url: cli.stream_url.clone(),
        model: cli.model.clone(),
        camera_backend: cli.camera_backend,
        bind: match &cli.command {
            Commands::Serve { bind } => bind.clone(),
            _ => None,
        },
    };
    let config = load_config(cli.config.as_deref(), overrides)?;

    match cli.command {
        Commands::Watch {
            max_frames,
            headless,
        } => watch(&config, max_frames, headless),
        Commands::Snapshot { output } => snapshot(&config, &output),
        Commands::Serve { .. } => serve(config),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Command line values that take precedence over file and environment.
#[derive(Debug, Default)]
struct Overrides {
    stream_url: Option<String>,
    model: Option<PathBuf>,
    camera_backend: Option<CameraBackend>,
    bind: Option<String>,
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<DetectorConfig> {
    let mut config = DetectorConfig::load(path).context("Failed to load configuration")?;

    if let Some(stream_url) = overrides.stream_url {
        config.stream_url = stream_url;
    }
    if let Some(model) = overrides.model {
        config.model_path = model;
    }
    if let Some(backend) = overrides.camera_backend {
        config.camera_backend = backend;
    }
    if let Some(bind) = overrides.bind {
        config.bind_address = bind;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

fn build_detector(config: &DetectorConfig) -> anyhow::Result<DefaultDetector> {
    info!("Loading model from {}", config.model_path.display());
    DefaultDetector::from_config(config).context("Failed to create detector")
}

/// Clear `active` on Ctrl-C so the running loop can release the camera.
/// A second Ctrl-C exits right away.
fn stop_on_interrupt(state: Arc<DetectionState>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("Interrupted, stopping detection loop (Ctrl-C again to exit now)");
                state.stop();

                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted again, exiting");
                    std::process::exit(130);
                }
            })
        })?;
    Ok(())
}

fn watch(config: &DetectorConfig, max_frames: Option<u64>, headless: bool) -> anyhow::Result<()> {
    let mut detector = build_detector(config)?;
    let state = Arc::new(DetectionState::new());
    stop_on_interrupt(state.clone())?;

    info!("Starting detection loop");

    #[cfg(feature = "opencv")]
    let summary = if headless {
        detector.run_interactive(&state, &mut LogViewer::new(max_frames))?
    } else {
        let mut window = bullet_eye::OpenCvWindow::new(config.window_title.clone());
        if max_frames.is_some() {
            warn!("--max-frames is ignored with a window, press q to quit");
        }
        detector.run_interactive(&state, &mut window)?
    };

    #[cfg(not(feature = "opencv"))]
    let summary = {
        if !headless {
            warn!("Built without the opencv feature, logging frames instead of opening a window");
        }
        detector.run_interactive(&state, &mut LogViewer::new(max_frames))?
    };

    info!(
        snapshot = ?state.snapshot(),
        "Detection loop ended after {} frames ({:?})",
        summary.frames,
        summary.exit
    );

    if summary.exit == bullet_eye::InteractiveExit::CameraUnavailable {
        bail!("Unable to initialize the camera at {}", config.stream_url);
    }
    Ok(())
}

fn snapshot(config: &DetectorConfig, output: &Path) -> anyhow::Result<()> {
    let mut detector = build_detector(config)?;
    let state = DetectionState::new();

    let Some(jpeg) = detector.take_snapshot(&state)? else {
        bail!("No frame captured from {}", config.stream_url);
    };

    std::fs::write(output, &jpeg)
        .with_context(|| format!("Failed to write snapshot to {}", output.display()))?;
    info!(
        "Snapshot written to {} ({} bullets detected)",
        output.display(),
        state.bullets_detected()
    );
    Ok(())
}

fn serve(config: DetectorConfig) -> anyhow::Result<()> {
    let detector = build_detector(&config)?;
    let detection = Arc::new(DetectionState::new());
    let state = bullet_server::StreamState::new(detector, detection.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(bullet_server::serve(
        &config.bind_address,
        state,
        bullet_server::shutdown_signal(detection),
    ))
}
