//! clipdeck player - play WAV clips from a directory
//!
//! Loads every `.wav` under a directory, then plays the named clips on the
//! default output device and exits once they have finished. With `--out` it
//! converts a single file instead and plays nothing.
//!
//! ## Usage
//!
//! ```text
//! clipdeck-player [options] <clip-dir> <clip>...
//! clipdeck-player --out <output.wav> [--tempo <ratio>] [--pitch <st>] <input.wav>
//!
//!   --tempo <ratio>     playback speed (default 1.0)
//!   --pitch <st>        transpose by semitones, -12 to 12 (default 0)
//!   --out <path>        write the processed input file here and exit
//!   --volume <gain>     0.0 - 1.0
//!   --overlap           start all clips at once instead of one after another
//!   --config <path>     engine config (default: <config dir>/clipdeck/config.yaml)
//!   --device <name>     output device (overrides the config)
//!   --list              print the clips found and exit
//!   --list-devices      print output devices and exit
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use clipdeck_core::audio::{list_output_devices, CpalOutput};
use clipdeck_core::config::{default_config_path, load_config, EngineConfig};
use clipdeck_core::source::DirectorySource;
use clipdeck_core::timestretch::{signalsmith_factory, stretch_file};
use clipdeck_core::{Pitch, PlayRequest, PlaybackCoordinator, PlaybackError, Tempo};

#[derive(Debug, Default)]
struct Args {
    clip_dir: Option<PathBuf>,
    clips: Vec<String>,
    tempo: Option<f32>,
    pitch: Option<f32>,
    volume: Option<f32>,
    out: Option<PathBuf>,
    overlap: bool,
    config: Option<PathBuf>,
    device: Option<String>,
    list: bool,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--tempo" => {
                let value = iter.next().context("--tempo needs a value")?;
                args.tempo = Some(value.parse().with_context(|| format!("bad tempo: {}", value))?);
            }
            "--pitch" => {
                let value = iter.next().context("--pitch needs a value")?;
                args.pitch = Some(value.parse().with_context(|| format!("bad pitch: {}", value))?);
            }
            "--out" => {
                args.out = Some(iter.next().context("--out needs a path")?.into());
            }
            "--volume" => {
                let value = iter.next().context("--volume needs a value")?;
                let volume = value.parse().with_context(|| format!("bad volume: {}", value))?;
                args.volume = Some(volume);
            }
            "--config" => {
                args.config = Some(iter.next().context("--config needs a path")?.into());
            }
            "--device" => {
                args.device = Some(iter.next().context("--device needs a name")?);
            }
            "--overlap" => args.overlap = true,
            "--list" => args.list = true,
            "--list-devices" => args.list_devices = true,
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            _ if args.clip_dir.is_none() => args.clip_dir = Some(arg.into()),
            _ => args.clips.push(arg),
        }
    }
    Ok(args)
}

fn request_for(name: &str, args: &Args) -> PlayRequest {
    let mut request = PlayRequest::new(name);
    if let Some(tempo) = args.tempo {
        request = request.tempo(tempo);
    }
    if let Some(pitch) = args.pitch {
        request = request.pitch(pitch);
    }
    if let Some(volume) = args.volume {
        request = request.volume(volume);
    }
    request
}

fn report(name: &str, result: Result<(), PlaybackError>) {
    match result {
        Ok(()) => log::info!("Finished {}", name),
        Err(e) => eprintln!("{}: {}", name, e),
    }
}

/// Offline mode: stretch and transpose one file, no audio device involved
fn convert(input: &Path, output: &Path, args: &Args, config: &EngineConfig) -> Result<()> {
    if !args.clips.is_empty() {
        bail!("--out takes exactly one input file");
    }
    let tempo = Tempo::from_ratio(args.tempo.unwrap_or(1.0));
    let pitch = Pitch::from_semitones(args.pitch.unwrap_or(0.0));
    let frames = stretch_file(
        input,
        output,
        tempo,
        pitch,
        config.stretch_chunk_size,
        config.default_header_size,
        &signalsmith_factory,
    )
    .with_context(|| format!("Failed to process {}", input.display()))?;
    println!("{} ({} frames)", output.display(), frames);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;

    if args.list_devices {
        for name in list_output_devices() {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(clip_dir) = args.clip_dir.clone() else {
        bail!("usage: clipdeck-player [options] <clip-dir> <clip>...");
    };

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config: EngineConfig = load_config(&config_path);

    if let Some(out) = &args.out {
        return convert(&clip_dir, out, &args, &config);
    }

    // The directory given on the command line holds the clips directly
    config.namespace = String::new();
    if let Some(device) = &args.device {
        config.output.device = Some(device.clone());
    }

    let output = CpalOutput::start(&config.output, config.sample_rate)
        .context("Failed to start audio output")?;
    log::info!("Output running at {} Hz", output.device_rate());

    let coordinator = PlaybackCoordinator::new(config, Arc::new(output))?;
    let loaded = coordinator.initialize_blocking(Arc::new(DirectorySource::new(&clip_dir)));
    log::info!("Loaded {} clips from {:?}", loaded, clip_dir);

    if args.list {
        for name in coordinator.loaded_clips() {
            println!("{}", name);
        }
        return Ok(());
    }
    if args.clips.is_empty() {
        bail!("no clips named; use --list to see what is available");
    }

    if args.overlap {
        let mut waiting = Vec::new();
        for name in &args.clips {
            let coordinator = coordinator.clone();
            let request = request_for(name, &args);
            let name = name.clone();
            waiting.push(tokio::spawn(async move {
                let result = coordinator.play_request_and_wait(request).await;
                (name, result)
            }));
        }
        for task in waiting {
            let (name, result) = task.await.context("playback task failed")?;
            report(&name, result);
        }
    } else {
        for name in &args.clips {
            let result = coordinator
                .play_request_and_wait(request_for(name, &args))
                .await;
            report(name, result);
        }
    }

    Ok(())
}
