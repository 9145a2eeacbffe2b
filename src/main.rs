//! Frame Capture CLI
//!
//! Runs a capture pipeline against the mock device (or a real camera with
//! the `camera` feature) and reports every captured image or error.

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use frame_capture::{
    capture::{CaptureConfig, DeviceProvider, FileConfig, FrameFault, MockDevice, MockProvider},
    events::CaptureEvent,
    CapturePipeline,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Capture frames and print what the pipeline publishes.
#[derive(Debug, Parser)]
#[command(name = "frame-capture", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frames per second (overrides the config file).
    #[arg(long)]
    fps: Option<u32>,

    /// Stop after this many events; 0 runs until Ctrl-C.
    #[arg(long)]
    frames: Option<u32>,

    /// Capture from the default system camera instead of the mock device.
    #[cfg(feature = "camera")]
    #[arg(long)]
    native: bool,

    /// Make every n-th mock frame fail to lock.
    #[arg(long, value_name = "N")]
    fault_every: Option<u64>,

    /// Serve Prometheus metrics on this port; 0 disables.
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    info!("Frame Capture v{}", frame_capture::VERSION);

    let mut config = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(fps) = args.fps {
        config.capture.frame_rate = fps;
    }
    if let Some(frames) = args.frames {
        config.output.frame_count = frames;
    }
    if let Some(port) = args.metrics_port {
        config.output.metrics_port = port;
    }

    let provider = device_provider(&args, &config.capture);
    let mut pipeline =
        CapturePipeline::with_preview(provider.as_ref(), &config.capture, &config.preview)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    if config.output.metrics_port != 0 {
        start_metrics_server(config.output.metrics_port, &pipeline)?;
    }

    let (_subscription, events) = pipeline.events().subscribe_channel(32);
    pipeline.start()?;

    let limit = config.output.frame_count;
    let mut images = 0u32;
    let mut errors = 0u32;

    while !stop.load(Ordering::SeqCst) && (limit == 0 || images + errors < limit) {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(CaptureEvent::ImageCaptured {
                image,
                captured_at,
                sequence,
            }) => {
                images += 1;
                info!(
                    sequence,
                    width = image.width(),
                    height = image.height(),
                    at = %captured_at.format("%H:%M:%S%.3f"),
                    "Image captured"
                );
            }
            Ok(CaptureEvent::CaptureError { message, cause }) => {
                errors += 1;
                warn!(sequence = cause.sequence(), "{}", message);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !pipeline.is_running() {
                    warn!("Capture session halted");
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    pipeline.stop();

    let stats = pipeline.stats().snapshot();
    info!(
        captured = stats.frames_captured,
        dropped = stats.frames_dropped,
        stalled = stats.frames_stalled,
        listener_failures = stats.listener_failures,
        "Session summary"
    );
    println!("Received {} images and {} errors", images, errors);

    Ok(())
}

fn device_provider(args: &Args, config: &CaptureConfig) -> Box<dyn DeviceProvider> {
    #[cfg(feature = "camera")]
    if args.native {
        info!("Using the default system camera");
        return Box::new(frame_capture::capture::NativeProvider);
    }

    info!("Using mock camera input");
    let mut device = MockDevice::new()
        .with_dimensions(config.width, config.height)
        .with_pool_size(config.buffer_pool_size);
    if let Some(every) = args.fault_every {
        device = device.with_fault_every(every, FrameFault::LockFailure);
    }
    Box::new(MockProvider::new(device))
}

#[cfg(feature = "metrics")]
fn start_metrics_server(port: u16, pipeline: &CapturePipeline) -> Result<(), Box<dyn Error>> {
    use frame_capture::metrics::{MetricsServer, MetricsServerConfig};

    let server = MetricsServer::new(
        MetricsServerConfig::with_port(port),
        Arc::clone(pipeline.stats()),
    )?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("metrics-server".to_string())
        .spawn(move || {
            if let Err(e) = runtime.block_on(server.run()) {
                tracing::error!(error = %e, "Metrics server failed");
            }
        })?;
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn start_metrics_server(port: u16, _pipeline: &CapturePipeline) -> Result<(), Box<dyn Error>> {
    warn!(port, "Built without the `metrics` feature; exporter disabled");
    Ok(())
}
