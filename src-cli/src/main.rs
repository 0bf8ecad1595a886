//! nativeaudio - interactive front end
//!
//! Opens the default output device and takes one command per line. With
//! `--offline-seconds` and `--offline-out` no device is opened: commands are
//! read from stdin, then the mix is rendered into a WAV file.

mod commands;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use nativeaudio_core::{
    AssetStore, AudioControl, AudioEngine, CpalBackend, EngineConfig, OfflineBackend,
    OfflineDriver, PlayerSettings,
};
use nativeaudio_dsp::to_i16;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::commands::{Flow, Input, Session, HELP};

const DEFAULT_LOG_FILTER: &str = "nativeaudio_cli=info,nativeaudio_core=info,nativeaudio_dsp=warn";

#[derive(Parser, Debug)]
#[command(
    name = "nativeaudio",
    version,
    about = "Buffer-queue, asset and URI playback with reverb and recording"
)]
struct Cli {
    /// Engine config file (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the bundled assets
    #[arg(long, default_value = "assets")]
    assets: PathBuf,

    /// Output rate; 0 asks the host for its native rate
    #[arg(long, default_value_t = 0)]
    sample_rate: i32,

    /// Frames per output buffer; 0 asks the host
    #[arg(long, default_value_t = 0)]
    buffer_frames: i32,

    /// Render this many seconds offline instead of opening a device
    #[arg(long, requires = "offline_out")]
    offline_seconds: Option<f32>,

    /// WAV file the offline render is written to
    #[arg(long, requires = "offline_seconds")]
    offline_out: Option<PathBuf>,

    /// Log filter, e.g. "nativeaudio_core=debug" (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let store = AssetStore::new(&cli.assets);

    match (cli.offline_seconds, &cli.offline_out) {
        (Some(seconds), Some(out)) => run_offline(&cli, config, store, seconds, out),
        _ => run_interactive(&cli, config, store),
    }
}

fn run_interactive(cli: &Cli, config: EngineConfig, store: AssetStore) -> Result<()> {
    info!("Starting nativeaudio");
    let settings_path = PlayerSettings::get_config_path();
    let settings = settings_path
        .as_deref()
        .map(PlayerSettings::load_from)
        .unwrap_or_default();

    let mut engine = AudioEngine::create(config, Box::new(CpalBackend::new()))?;
    engine
        .create_buffer_queue_player(cli.sample_rate, cli.buffer_frames)
        .context("opening the output device")?;

    let mut session = Session::new(engine, store, settings, settings_path);
    println!("{}", HELP);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        stdout.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let result = line
            .parse::<Input>()
            .and_then(|input| session.execute(input));
        match result {
            Ok((flow, text)) => {
                print!("{}", text);
                if flow == Flow::Quit {
                    break;
                }
            }
            Err(err) => eprintln!("{err:#}"),
        }
    }

    session.finish()
}

fn run_offline(
    cli: &Cli,
    config: EngineConfig,
    store: AssetStore,
    seconds: f32,
    out: &Path,
) -> Result<()> {
    let rate = if cli.sample_rate > 0 {
        cli.sample_rate as u32
    } else {
        config.stream.sample_rate
    };
    let frames = if cli.buffer_frames > 0 {
        cli.buffer_frames as u32
    } else {
        config.stream.buffer_size
    };
    let backend = OfflineBackend::with_native_params(rate, frames);
    let driver = backend.driver();

    let mut engine = AudioEngine::create(config, Box::new(backend))?;
    engine.create_buffer_queue_player(0, 0)?;

    // Offline renders never touch the saved settings
    let mut session = Session::new(engine, store, PlayerSettings::default(), None);
    debug!("Offline render at {}Hz, {} frames per buffer", rate, frames);

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (flow, text) = session.execute(line.parse::<Input>()?)?;
        eprint!("{}", text);
        if flow == Flow::Quit {
            break;
        }
    }

    let rendered = render_to_wav(&driver, out, rate, frames as usize, seconds)?;
    info!(
        "Rendered {} frames ({:.2}s) to {}",
        rendered,
        seconds,
        out.display()
    );

    while let Some(event) = session.engine_mut().poll_event() {
        println!("{}", serde_json::to_string(&event)?);
    }
    session.finish()
}

/// Drive the output callback for `seconds` and write what it produces
fn render_to_wav(
    driver: &OfflineDriver,
    path: &Path,
    rate: u32,
    buffer_frames: usize,
    seconds: f32,
) -> Result<usize> {
    let channels = driver
        .output_channels()
        .context("offline output is not open")?;
    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;

    let total = (seconds.max(0.0) * rate as f32) as usize;
    let mut buffer = vec![0.0f32; buffer_frames.max(1) * channels];
    let mut written = 0;
    while written < total {
        let frames = (total - written).min(buffer_frames.max(1));
        let chunk = &mut buffer[..frames * channels];
        driver.render_into(chunk);
        for sample in chunk.iter() {
            writer.write_sample(to_i16(*sample))?;
        }
        written += frames;
    }
    writer.finalize()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_offline_args_go_together() {
        assert!(Cli::try_parse_from(["nativeaudio", "--offline-seconds", "2"]).is_err());
        let cli = Cli::try_parse_from([
            "nativeaudio",
            "--offline-seconds",
            "1.5",
            "--offline-out",
            "out.wav",
            "--sample-rate",
            "44100",
        ])
        .unwrap();
        assert_eq!(cli.offline_seconds, Some(1.5));
        assert_eq!(cli.sample_rate, 44100);
        assert_eq!(cli.buffer_frames, 0);
    }

    #[test]
    fn test_render_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.wav");

        let backend = OfflineBackend::with_native_params(8000, 256);
        let driver = backend.driver();
        let mut engine = AudioEngine::create(EngineConfig::default(), Box::new(backend)).unwrap();
        engine.create_buffer_queue_player(0, 0).unwrap();
        assert!(engine.select_clip(nativeaudio_core::Clip::Sawtooth, 1));

        let frames = render_to_wav(&driver, &path, 8000, 256, 0.5).unwrap();
        assert_eq!(frames, 4000);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 8000);
        let first: i16 = reader.samples::<i16>().next().unwrap().unwrap();
        assert_eq!(first, i16::MAX);
    }
}
