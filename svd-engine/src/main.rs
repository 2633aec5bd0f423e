//! svd-render - render one voice to a WAV file
//!
//! Plays a media file through the decode engine exactly as a mixing graph
//! would (one refill per tick, hardware batches fired from the tick end) and
//! writes every refill to a 16-bit PCM WAV.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use svd_common::config::EngineConfig;
use svd_common::events::EngineEvent;
use svd_engine::types::{BufferStatus, LoopCount};
use svd_engine::voice::{StartStatus, VoiceParams};
use svd_engine::Engine;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for svd-render
#[derive(Parser, Debug)]
#[command(name = "svd-render")]
#[command(about = "Render a streamed voice to a WAV file")]
#[command(version)]
struct Args {
    /// Media file to play (PCM16 or IMA ADPCM WAV)
    #[arg(short, long, env = "SVD_INPUT")]
    input: PathBuf,

    /// WAV file to write
    #[arg(short, long, env = "SVD_OUTPUT")]
    output: PathBuf,

    /// Config file (overrides SVD_CONFIG and the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Loop count (0 = infinite, 1 = play once); defaults to the file's loop
    #[arg(short, long, env = "SVD_LOOPS")]
    loops: Option<u16>,

    /// Pitch ratio (source frames per output frame)
    #[arg(short, long, default_value = "1.0", env = "SVD_PITCH")]
    pitch: f64,

    /// Source frame to start at
    #[arg(long, default_value = "0", env = "SVD_START_FRAME")]
    start_frame: u64,

    /// Stop after this many ticks (bounds infinite loops)
    #[arg(long, default_value = "100000", env = "SVD_MAX_TICKS")]
    max_ticks: u64,

    /// Log level filter; defaults to the configured level
    #[arg(long, env = "SVD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print engine events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Rendering {} to {}",
        args.input.display(),
        args.output.display()
    );

    let engine = Engine::with_emulated(config).context("Failed to initialize engine")?;
    let mut events = args.events.then(|| engine.events().subscribe());
    let params = VoiceParams {
        loop_count: args.loops.map(LoopCount::new),
        start_frame: args.start_frame,
        ..VoiceParams::default()
    };
    let mut voice = engine
        .file_voice(&args.input, params)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    voice.set_pitch_ratio(args.pitch).context("Invalid --pitch")?;

    let mut ticks = 0u64;
    while voice.start_stream().context("Failed to start voice")? == StartStatus::NotReady {
        ticks += 1;
        if ticks >= args.max_ticks {
            bail!("media header not available after {} ticks", ticks);
        }
    }

    let Some(info) = voice.codec_info() else {
        bail!("voice started without codec information");
    };
    let spec = hound::WavSpec {
        channels: info.output_format.channels,
        sample_rate: info.output_format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut frames_written = 0u64;
    let mut finished = false;
    while ticks < args.max_ticks {
        ticks += 1;
        engine.begin_tick()?;

        let buffer = voice.get_buffer().context("Refill failed")?;
        for sample in &buffer.samples {
            writer.write_sample(*sample)?;
        }
        frames_written += buffer.frames as u64;
        voice.release_buffer();

        if let Some(rx) = events.as_mut() {
            print_events(rx)?;
        }

        if buffer.status == BufferStatus::NoMoreData {
            finished = true;
            break;
        }

        voice.prepare_next_buffer().context("Decode scheduling failed")?;
        engine.end_tick()?;

        if buffer.status == BufferStatus::NotReady {
            // Nothing else to do this tick; wait for the batch
            engine.resolve_batch()?;
        }
    }

    if !finished {
        warn!("Stopped after {} ticks before the end of the voice", ticks);
    }

    engine.shutdown()?;
    voice.stop_stream();
    if let Some(rx) = events.as_mut() {
        print_events(rx)?;
    }
    writer.finalize().context("Failed to finalize WAV")?;

    let stats = engine.stats();
    info!(
        "Wrote {} frames in {} ticks ({} batches fired, {} deferred)",
        frames_written, ticks, stats.batches_fired, stats.batches_deferred
    );
    Ok(())
}

/// Drain pending events as JSON lines
fn print_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Result<()> {
    loop {
        match rx.try_recv() {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(TryRecvError::Lagged(missed)) => warn!("Dropped {} events", missed),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(()),
        }
    }
}
