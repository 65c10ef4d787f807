//! media-bridge - Main Entry Point
//!
//! Builds a pipeline from a description, pulls buffers from a named sink and
//! prints bus messages while the engine main loop runs on the main thread.

use anyhow::Context;
use clap::Parser;
use media_bridge::{config, BridgeConfig, MediaBridge, Message};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "media-bridge",
    about = "Run a media pipeline and print what reaches the host",
    version
)]
struct Cli {
    /// Configuration file (TOML or JSON). Defaults to the platform config dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the appsink to pull buffers from
    #[arg(long, default_value = "sink")]
    sink: String,

    /// Number of buffers to pull before stopping
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Plugin that must be available (repeatable)
    #[arg(long = "require-plugin")]
    require_plugins: Vec<String>,

    /// Extra directory to scan for plugins (repeatable)
    #[arg(long = "plugin-path")]
    plugin_paths: Vec<PathBuf>,

    /// Use the GStreamer backend instead of the mock engine
    #[cfg(feature = "gstreamer")]
    #[arg(long)]
    gstreamer: bool,

    /// Pipeline description, e.g. "videotestsrc ! appsink name=sink"
    description: String,
}

fn init_logging(config: &BridgeConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let (file_layer, guard) = match config.log_file.as_deref().and_then(|path| {
        let name = path.file_name()?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Some(tracing_appender::non_blocking(
            tracing_appender::rolling::never(dir, name),
        ))
    }) {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::default_config_path()
            .map(BridgeConfig::load_or_default)
            .unwrap_or_default(),
    };
    config.required_plugins.extend(cli.require_plugins.iter().cloned());
    config.plugin_paths.extend(cli.plugin_paths.iter().cloned());
    Ok(config)
}

fn build_bridge(cli: &Cli, config: BridgeConfig) -> anyhow::Result<MediaBridge> {
    #[cfg(feature = "gstreamer")]
    if cli.gstreamer {
        return Ok(MediaBridge::with_gstreamer(config)?);
    }
    let _ = cli;
    #[cfg(feature = "mock-engine")]
    return Ok(MediaBridge::with_mock_engine(config)?);
    #[cfg(not(feature = "mock-engine"))]
    anyhow::bail!("No engine compiled in; enable the mock-engine or gstreamer feature")
}

fn print_message(message: &Message) {
    println!("bus: {}", message);
}

/// Pull `count` buffers, then tear everything down. Runs off the main thread.
fn run_pipeline(bridge: &MediaBridge, description: &str, sink: &str, count: usize) -> anyhow::Result<()> {
    let mut pipeline = bridge.parse_pipeline(description)?;
    let mut element = pipeline.element(sink)?;
    let messages = pipeline.subscribe_messages();
    let buffers = element.pull();
    pipeline.start();

    let mut received = 0;
    while received < count {
        crossbeam_channel::select! {
            recv(buffers) -> buffer => match buffer {
                Ok(buffer) => {
                    received += 1;
                    println!("buffer {}: {} bytes", received, buffer.len());
                }
                Err(_) => {
                    tracing::info!("Sink reached end of stream after {} buffers", received);
                    break;
                }
            },
            recv(messages) -> message => match message {
                Ok(message) if message.is_error() => {
                    print_message(&message);
                    break;
                }
                Ok(message) => print_message(&message),
                Err(_) => break,
            },
        }
    }

    pipeline.send_end_of_stream();
    // Drain whatever the bus still has to say about the shutdown.
    while let Ok(message) = messages.recv_timeout(Duration::from_millis(100)) {
        print_message(&message);
        if message.is_eos() {
            break;
        }
    }

    element.stop();
    pipeline.stop();

    let stats = bridge.registry().stats();
    tracing::info!(
        "Delivered {} buffers and {} messages, {} stale callbacks discarded",
        stats.buffers_delivered,
        stats.messages_delivered,
        stats.stale_discarded
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = init_logging(&config);

    tracing::info!("Starting media-bridge");

    let bridge = Arc::new(build_bridge(&cli, config)?);

    let worker_bridge = bridge.clone();
    let description = cli.description.clone();
    let sink = cli.sink.clone();
    let count = cli.count;
    let worker = thread::Builder::new()
        .name("media-bridge-host".to_string())
        .spawn(move || {
            let result = run_pipeline(&worker_bridge, &description, &sink, count);
            worker_bridge.quit_main_loop();
            result
        })
        .context("Failed to spawn host thread")?;

    // Some native plugins need the initial thread for their event loop.
    bridge.run_main_loop();

    match worker.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("Host thread panicked"),
    }
}
