mod cli;

use vidbridge::{
    bridge::{CaptureBridge, SocketHub},
    cache::{ParameterCache, TomlFileStore},
    config, fixture,
    replay::ReplayEncoderFactory,
};
use vidbridge_media::{
    extract_parameter_sets_from_path, FrameAssembler, FrameTiming, LiveDemuxer, NalUnit,
    ParameterSets,
};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use cli::{CacheAction, Cli, Commands};
use std::io::BufReader;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// How long `run` waits for the next NAL unit before giving up.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidbridge=debug,vidbridge_media=trace".to_string()
        } else {
            "vidbridge=info,vidbridge_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Extract { file, json } => extract(&file, json),
        Commands::Demux {
            file,
            params_from,
            frame_rate,
        } => demux(&file, params_from.as_deref(), frame_rate, config_path),
        Commands::Run {
            probe_file,
            stream_file,
            frames,
            pace_ms,
        } => run_bridge(&probe_file, &stream_file, frames, pace_ms, config_path),
        Commands::Cache { action } => cache(action, config_path),
        Commands::Fixture { dir, frames, gop } => write_fixtures(&dir, frames, gop, config_path),
        Commands::InitConfig { path, force } => init_config(&path, force),
        Commands::SetCapture {
            width,
            height,
            frame_rate,
        } => set_capture(width, height, frame_rate, config_path),
        Commands::Validate {
            config: validate_path,
        } => validate_config(validate_path.as_deref().or(config_path)),
        Commands::Version => {
            println!("vidbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_cache(config: &config::Config) -> ParameterCache {
    ParameterCache::new(
        Arc::new(TomlFileStore::new(&config.cache.path)),
        config.cache.store.clone(),
    )
}

fn extract(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let params = extract_parameter_sets_from_path(file)
        .with_context(|| format!("Failed to extract parameter sets from {:?}", file))?;

    if json {
        let value = serde_json::json!({
            "sps": STANDARD.encode(params.sps()),
            "pps": STANDARD.encode(params.pps()),
            "cache_value": vidbridge::cache::encode(&params),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("SPS: {} ({} bytes)", STANDARD.encode(params.sps()), params.sps().len());
    println!("PPS: {} ({} bytes)", STANDARD.encode(params.pps()), params.pps().len());
    println!("Cache value: {}", vidbridge::cache::encode(&params));
    Ok(())
}

fn demux(
    file: &Path,
    params_from: Option<&Path>,
    frame_rate: Option<i32>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let params: ParameterSets = match params_from {
        Some(source) => extract_parameter_sets_from_path(source)
            .with_context(|| format!("Failed to extract parameter sets from {:?}", source))?,
        None => open_cache(&config)
            .load(&config.capture.resolution().cache_key())
            .with_context(|| {
                format!(
                    "No cached parameter sets for {}, pass --params-from",
                    config.capture.resolution()
                )
            })?,
    };

    let source = std::fs::File::open(file)
        .with_context(|| format!("Failed to open stream file: {:?}", file))?;
    let timing = FrameTiming::new(frame_rate.unwrap_or(config.capture.frame_rate));
    let assembler = FrameAssembler::new(params, timing)
        .reinject_after(config.stream.parameter_set_interval());
    let mut demuxer = LiveDemuxer::new(BufReader::new(source), assembler, Vec::<NalUnit>::new());

    let result = demuxer.run();
    let stats = demuxer.stats();
    let units = demuxer.into_sink();

    println!("{:>5}  {:<6} {:>6} {:>14}  marker", "#", "type", "bytes", "timestamp_ns");
    for (i, unit) in units.iter().enumerate() {
        println!(
            "{:>5}  {:<6} {:>6} {:>14}  {}",
            i,
            unit.nal_type.to_string(),
            unit.payload.len(),
            unit.timestamp,
            unit.marker
        );
    }
    println!(
        "\n{} NAL units read, {} published, {} glitches recovered",
        stats.nal_units,
        units.len(),
        stats.glitches_recovered
    );

    match result {
        Err(e) if e.is_end_of_stream() => Ok(()),
        Err(e) => Err(e).context("Stream ended with an error"),
        Ok(()) => Ok(()),
    }
}

fn run_bridge(
    probe_file: &Path,
    stream_file: &Path,
    frames: usize,
    pace_ms: u64,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    for file in [probe_file, stream_file] {
        if !file.exists() {
            anyhow::bail!("File does not exist: {:?}", file);
        }
    }

    let factory = ReplayEncoderFactory::new(probe_file, stream_file)
        .pace(Duration::from_millis(pace_ms));
    let hub = Arc::new(SocketHub::new(&config.socket.path));
    let cache = open_cache(&config);
    let mut bridge = CaptureBridge::new(config, cache, hub, Arc::new(factory));

    let mailbox = bridge.mailbox();
    let (tx, rx) = mpsc::channel();
    mailbox.set_notifier(move || {
        let _ = tx.send(());
    });

    bridge.start()?;
    tracing::info!(state = %bridge.state(), "Consuming NAL units");

    let mut received = 0usize;
    while received < frames {
        if rx.recv_timeout(IDLE_TIMEOUT).is_err() {
            tracing::warn!("No NAL unit within {:?}, stopping", IDLE_TIMEOUT);
            break;
        }
        if let Some(buffer) = bridge.pull() {
            received += 1;
            println!(
                "{:>5}  {:>6} bytes  ts={:<14} marker={}",
                received,
                buffer.length,
                buffer.timestamp,
                buffer.marker
            );
        }
    }

    bridge.stop();
    mailbox.clear_notifier();
    println!(
        "\nPulled {} units ({} published, {} replaced before pull)",
        received,
        mailbox.published(),
        mailbox.replaced()
    );
    Ok(())
}

fn cache(action: CacheAction, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let cache = open_cache(&config);

    match action {
        CacheAction::Show => {
            let (resolution, value) = cache.raw();
            println!("Store: {} ({:?})", cache.store_name(), config.cache.path);
            match (resolution, value) {
                (Some(resolution), Some(value)) => {
                    println!("Resolution: {}", resolution);
                    println!("Parameter sets: {}", value);
                    let current = config.capture.resolution().cache_key();
                    if resolution != current {
                        println!("(stale: configured resolution is {})", current);
                    }
                }
                _ => println!("No cached parameter sets"),
            }
        }
        CacheAction::Clear => {
            cache.clear()?;
            println!("Cleared cached parameter sets");
        }
    }
    Ok(())
}

fn write_fixtures(dir: &Path, frames: usize, gop: usize, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let (sample, stream) = fixture::write_fixtures(dir, config.capture.resolution(), frames, gop)?;
    println!("Sample recording: {}", sample.display());
    println!("Live stream: {}", stream.display());
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists, use --force to overwrite", path);
    }
    config::persist::save_config(path, &config::Config::default())?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn set_capture(width: u32, height: u32, frame_rate: i32, config_path: Option<&Path>) -> Result<()> {
    let path = config_path.unwrap_or_else(|| Path::new("vidbridge.toml"));
    let capture = config::CaptureConfig {
        width,
        height,
        frame_rate,
    };

    let candidate = config::Config {
        capture: capture.clone(),
        ..Default::default()
    };
    config::validate_config(&candidate)?;

    if path.exists() {
        config::persist::update_capture(path, &capture)?;
    } else {
        config::persist::save_config(path, &candidate)?;
    }
    println!("Capture set to {} @ {} fps in {}", capture.resolution(), frame_rate, path.display());
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&config::Config::default());
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    println!(
        "  Capture: {} @ {} fps",
        config.capture.resolution(),
        FrameTiming::new(config.capture.frame_rate).frame_rate()
    );
    println!("  Socket: {}", config.socket.path.display());
    println!(
        "  Cache: {} [{}]",
        config.cache.path.display(),
        config.cache.store
    );
    println!(
        "  Probe: {} ms / {} bytes (wait up to {} ms)",
        config.probe.max_duration_ms, config.probe.max_file_size, config.probe.wait_ceiling_ms
    );
    println!(
        "  Stream: parameter sets every {} ms, stop polled {}x{} ms",
        config.stream.parameter_set_interval_ms,
        config.stream.stop_poll_attempts,
        config.stream.stop_poll_interval_ms
    );
}
