//! Capture client
//!
//! Wires engine ports, streams the captured audio to the configured server
//! and keeps reconnecting until stopped with Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_caster::{
    app::run_session,
    archive::WavArchive,
    audio::{CpalEngine, WiringMode},
    config::AppConfig,
    constants::*,
    network::OpusStreamer,
    status::{OutputControl, StatusReporter},
    SessionContext, SessionSettings,
};

#[derive(Parser)]
#[command(name = "caster")]
#[command(about = "Capture audio ports and stream them to a server")]
struct Args {
    /// Config file
    #[arg(short, long, required_unless_present = "portmatch")]
    config: Option<PathBuf>,

    /// Engine client name
    #[arg(short, long, default_value = DEFAULT_CLIENT_NAME)]
    name: String,

    /// Connect the first two output ports whose name contains this
    #[arg(short, long)]
    portmatch: Option<String>,

    /// Stop after this many seconds of audio
    #[arg(short, long)]
    duration: Option<f64>,

    /// Also write the captured audio to this WAV file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Bit depth of the WAV file (16, 24 or 32)
    #[arg(short, long, default_value_t = DEFAULT_BIT_DEPTH)]
    bitdepth: u16,

    /// Per-channel buffer size in bytes
    #[arg(short = 'B', long, default_value_t = DEFAULT_BUFFER_BYTES)]
    bufsize: usize,

    /// Source ports, one per channel
    #[arg(required_unless_present = "portmatch", conflicts_with = "portmatch")]
    ports: Vec<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    if let Some(path) = &args.config {
        return AppConfig::load(path).context("Config is required before audio setup");
    }
    match AppConfig::default_path().filter(|p| p.exists()) {
        Some(path) => Ok(AppConfig::load(&path)?),
        None => {
            tracing::info!("No config file, using built-in defaults");
            Ok(AppConfig::default())
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let mode = match &args.portmatch {
        Some(pattern) => WiringMode::Pattern(pattern.clone()),
        None => WiringMode::Explicit(args.ports.clone()),
    };

    let duration = args
        .duration
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid capture duration {}", secs))
        })
        .transpose()?;

    let settings = SessionSettings {
        channels: mode.channels(),
        bit_depth: args.bitdepth,
        buffer_bytes: args.bufsize,
        frame_samples: FRAME_SAMPLES,
        duration,
        output_path: args.file.clone(),
    };
    let session = Arc::new(SessionContext::new(settings).context("Invalid session settings")?);
    let status = Arc::new(StatusReporter::new(OutputControl::parse(
        &config.status.output_control,
    )));

    {
        let session = session.clone();
        ctrlc::set_handler(move || session.request_stop())
            .context("Failed to set Ctrl+C handler")?;
    }

    tracing::info!(
        "Starting {} with {} channels, streaming to {}",
        args.name,
        session.channels(),
        config.server.address
    );

    let mut engine = CpalEngine::open(&args.name).context("Cannot open audio engine")?;

    let streamer_status = status.clone();
    let outcome = run_session(&mut engine, &mode, session, status, |session| {
        let archive = match session.output_path() {
            Some(path) => Some(WavArchive::create(
                path,
                session.channels(),
                session.sample_rate(),
                session.bit_depth(),
            )?),
            None => None,
        };
        OpusStreamer::new(
            &config,
            streamer_status,
            session.channels(),
            session.sample_rate(),
            archive,
        )
    })?;

    tracing::info!("Exiting with {:?}", outcome);
    std::process::exit(outcome.exit_code());
}
