//! audio-hal-io - command line front end
//!
//! Lists devices, plays a test tone, watches device changes and changes the
//! default device, against either the native host or the simulated one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use audio_hal_io::audio::{
    change_default_device, create_host, device_change_channel, device_records, AudioError,
    AudioHost, BackendKind, DeviceDirectory, DeviceId, HostDeviceDirectory, OutputStream, SampleEncoding,
    Scope, SineSynth, StreamFormat,
};
use audio_hal_io::config::AudioIoConfig;
use audio_hal_io::log::init_tracing;

/// Command-line arguments for audio-hal-io
#[derive(Parser, Debug)]
#[command(name = "audio-hal-io")]
#[command(about = "Audio device and output stream tool")]
#[command(version)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, env = "AUDIO_HAL_CONFIG")]
    config: Option<PathBuf>,

    /// Host backend: native or simulated
    #[arg(short, long)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices with capability and default markers
    Devices,

    /// Play a test tone on the default output device
    Play {
        #[arg(long)]
        encoding: Option<SampleEncoding>,
        #[arg(long)]
        channels: Option<u32>,
        #[arg(long)]
        rate: Option<f64>,
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,
        /// Tone volume, 0.0 to 1.0
        #[arg(long, default_value_t = 0.5)]
        volume: f32,
    },

    /// Print device change events as they arrive
    Listen {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },

    /// Change the default device after validating the request
    SetDefault {
        id: u32,
        #[arg(long, default_value = "output")]
        scope: ScopeArg,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    Input,
    Output,
}

impl From<ScopeArg> for Scope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Input => Scope::Input,
            ScopeArg::Output => Scope::Output,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AudioIoConfig::load_or_default(args.config.as_deref())?;
    config.apply_env()?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    init_tracing(&config.log_filter);

    let host = create_host(config.backend, &config.simulated).context("Failed to open audio host")?;
    info!("Using {} host", host.name());

    match args.command {
        Command::Devices => list_devices(host),
        Command::Play {
            encoding,
            channels,
            rate,
            seconds,
            volume,
        } => {
            let mut format = config.stream.format();
            if let Some(encoding) = encoding {
                format.encoding = encoding;
            }
            if let Some(channels) = channels {
                format.channels = channels;
            }
            if let Some(rate) = rate {
                format.sample_rate = rate;
            }
            play(host, format, seconds, volume)
        }
        Command::Listen { seconds } => listen(host, seconds),
        Command::SetDefault { id, scope } => set_default(host, DeviceId(id), scope.into()),
    }
}

fn list_devices(host: Arc<dyn AudioHost>) -> Result<()> {
    let directory = HostDeviceDirectory::new(host);
    let records = device_records(&directory);
    if records.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    for record in records {
        let capability: Vec<&str> = record.capability.iter().map(|s| s.as_str()).collect();
        let mut markers = Vec::new();
        if record.is_default_input {
            markers.push("default input");
        }
        if record.is_default_output {
            markers.push("default output");
        }
        println!(
            "{:>6}  {:<32} [{}] {}",
            record.id,
            record.name,
            capability.join(", "),
            markers.join(", ")
        );
    }
    Ok(())
}

fn play(host: Arc<dyn AudioHost>, format: StreamFormat, seconds: f64, volume: f32) -> Result<()> {
    // The synth allocates per channel, so reject bad formats first
    format
        .validate()
        .map_err(AudioError::InvalidStreamFormat)
        .context("Failed to create output stream")?;
    let synth = SineSynth::new(format).with_volume(volume);
    let mut stream = OutputStream::new(host, format, synth.into_callback()).context("Failed to create output stream")?;
    stream.start().context("Failed to start output stream")?;
    println!("Playing {} x{} @ {} Hz for {:.1}s", format.encoding, format.channels, format.sample_rate, seconds);

    std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));

    stream.stop()?;
    let stats = stream.render_stats();
    stream.close()?;
    println!(
        "Rendered {} buffers ({} silent, {} rejected)",
        stats.forwarded, stats.silenced, stats.rejected
    );
    Ok(())
}

fn listen(host: Arc<dyn AudioHost>, seconds: u64) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let directory = HostDeviceDirectory::new(host.clone());
        let (notifier, mut events) = device_change_channel(host)?;
        println!(
            "Listening for {:?} for {}s",
            notifier.active_subscriptions(),
            seconds
        );

        let deadline = tokio::time::sleep(Duration::from_secs(seconds));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                Some(kind) = events.recv() => {
                    // Re-query: event order says nothing about the current state
                    println!(
                        "{:?}: input={} output={} devices={}",
                        kind,
                        directory.default_device_id(Scope::Input),
                        directory.default_device_id(Scope::Output),
                        directory.list_device_ids().len()
                    );
                }
            }
        }
        drop(notifier);
        Ok(())
    })
}

fn set_default(host: Arc<dyn AudioHost>, id: DeviceId, scope: Scope) -> Result<()> {
    let directory = HostDeviceDirectory::new(host);
    let outcome = change_default_device(&directory, id, scope)?;
    println!(
        "{:?}; default {} device is now {}",
        outcome,
        scope,
        directory.default_device_id(scope)
    );
    Ok(())
}
