//! HackRF Emitter - Main entry point

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info};

use hackrf_emitter::{
    Error, Result, SessionOutcome, SystemConfig, TransmissionRequest, TransmitController,
};
use hackrf_emitter::data_manager::{SignalCache, SignalGenerator};
use hackrf_emitter::interface::{device_info_rows, report_summary, utils};
use hackrf_emitter::logging::init_logging;

/// HackRF signal transmission tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter directives, overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

/// Radio parameters shared by every transmit command
#[derive(ClapArgs, Debug, Clone)]
struct RadioArgs {
    /// Center frequency in Hz
    #[arg(short, long, default_value_t = 915_000_000)]
    frequency: u64,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = 2_000_000)]
    sample_rate: u32,

    /// TX VGA gain in dB (0-47)
    #[arg(short, long, default_value_t = 20)]
    gain: u32,

    /// Transmit duration in seconds; short signals loop to fill it
    #[arg(short, long)]
    duration: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show detected capabilities and device status
    Info {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Transmit a baseband tone
    Tone {
        #[command(flatten)]
        radio: RadioArgs,

        /// Baseband offset of the tone in Hz
        #[arg(long, default_value_t = 0.0)]
        baseband: f64,

        /// Length of the synthesized buffer in seconds
        #[arg(long, default_value_t = 1.0)]
        length: f64,
    },

    /// Transmit an AM signal
    Am {
        #[command(flatten)]
        radio: RadioArgs,

        /// Baseband carrier offset in Hz
        #[arg(long, default_value_t = 0.0)]
        carrier: f64,

        /// Modulating tone in Hz
        #[arg(long, default_value_t = 1_000.0)]
        mod_freq: f64,

        /// Modulation depth (0-1)
        #[arg(long, default_value_t = 0.5)]
        depth: f64,

        /// Length of the synthesized buffer in seconds
        #[arg(long, default_value_t = 1.0)]
        length: f64,
    },

    /// Transmit an FM signal
    Fm {
        #[command(flatten)]
        radio: RadioArgs,

        /// Baseband carrier offset in Hz
        #[arg(long, default_value_t = 0.0)]
        carrier: f64,

        /// Modulating tone in Hz
        #[arg(long, default_value_t = 1_000.0)]
        mod_freq: f64,

        /// Modulation index
        #[arg(long, default_value_t = 5.0)]
        index: f64,

        /// Length of the synthesized buffer in seconds
        #[arg(long, default_value_t = 1.0)]
        length: f64,
    },

    /// Transmit an unsigned 8-bit interleaved I/Q file
    Replay {
        #[command(flatten)]
        radio: RadioArgs,

        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Manage the signal cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Delete every cached signal
    Clear,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SystemConfig::from_file(path)?,
        None => SystemConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging)?;
    match &args.config {
        Some(path) => info!("Loaded configuration from: {:?}", path),
        None => info!("Using default configuration"),
    }

    let result = match args.command {
        Command::Info { json } => run_info(config, json),
        Command::Tone { radio, baseband, length } => {
            run_synthesized(config, &radio, |generator| {
                generator.sine_wave(baseband, length, radio.sample_rate)
            })
        }
        Command::Am { radio, carrier, mod_freq, depth, length } => {
            run_synthesized(config, &radio, |generator| {
                generator.am_signal(carrier, mod_freq, depth, length, radio.sample_rate)
            })
        }
        Command::Fm { radio, carrier, mod_freq, index, length } => {
            run_synthesized(config, &radio, |generator| {
                generator.fm_signal(carrier, mod_freq, index, length, radio.sample_rate)
            })
        }
        Command::Replay { radio, input } => run_replay(config, &radio, &input),
        Command::Cache { action: CacheAction::Clear } => run_cache_clear(&config),
    };

    if let Err(e) = result {
        error!("Error: {}", e);
        utils::print_error(&e.to_string());
        std::process::exit(1);
    }

    Ok(())
}

/// Print the capability report and device status
fn run_info(config: SystemConfig, json: bool) -> Result<()> {
    let controller = TransmitController::new(config);
    let info = controller.get_device_info();
    let capability = controller.capability();

    if json {
        let value = serde_json::json!({
            "capability": capability,
            "device": info,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let headers = vec!["Property".to_string(), "Value".to_string()];
        utils::print_table(&headers, &device_info_rows(&info, capability));
        if capability.best_tier == hackrf_emitter::CapabilityTier::Simulation {
            utils::print_warning("No HackRF tools found, transmissions will be simulated");
        }
    }
    controller.shutdown()
}

/// Generate through the cache, then transmit
fn run_synthesized<F>(config: SystemConfig, radio: &RadioArgs, synth: F) -> Result<()>
where
    F: FnOnce(&SignalGenerator) -> Result<(Vec<num_complex::Complex32>, u32)>,
{
    let cache = Arc::new(SignalCache::new(&config.cache)?);
    let generator = SignalGenerator::new(cache);
    let (samples, sample_rate) = synth(&generator)?;
    info!("Synthesized {} samples at {} sps", samples.len(), sample_rate);

    let mut request = TransmissionRequest::new(samples, radio.frequency, sample_rate, radio.gain);
    request.duration = radio.duration;
    transmit(config, request)
}

fn run_replay(config: SystemConfig, radio: &RadioArgs, input: &Path) -> Result<()> {
    let bytes = std::fs::read(input)?;
    info!("Loaded {} bytes from {:?}", bytes.len(), input);
    let mut request =
        TransmissionRequest::from_iq_bytes(&bytes, radio.frequency, radio.sample_rate, radio.gain);
    request.duration = radio.duration;
    transmit(config, request)
}

/// Start, show progress until completion or Ctrl+C, then report
fn transmit(config: SystemConfig, request: TransmissionRequest) -> Result<()> {
    let expected = request.duration.unwrap_or_else(|| {
        request.samples.len() as f64 / request.sample_rate_hz.max(1) as f64
    });

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::Relaxed);
    })
    .map_err(|e| Error::RuntimeFailure(format!("Failed to set signal handler: {}", e)))?;

    let controller = TransmitController::new(config);
    info!(
        "Transmitting at {} for {}",
        utils::format_frequency(request.frequency_hz),
        utils::format_duration(expected)
    );
    controller.start(request)?;

    let total = (expected * 10.0).ceil().max(1.0) as u64;
    let pb = utils::create_progress_bar(total, "transmitting (Ctrl+C to stop)");
    let start = Instant::now();
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            info!("Received Ctrl+C, stopping transmission...");
            controller.stop()?;
            break;
        }
        if controller.wait_for_completion(Duration::from_millis(100)) {
            break;
        }
        pb.set_position(((start.elapsed().as_secs_f64() * 10.0) as u64).min(total));
    }
    pb.finish_and_clear();

    match controller.last_report() {
        Some(report) => match &report.outcome {
            SessionOutcome::Failed(msg) => utils::print_error(&format!("Transmission failed: {}", msg)),
            SessionOutcome::Cancelled => utils::print_warning(&report_summary(&report)),
            _ => utils::print_success(&report_summary(&report)),
        },
        None => utils::print_warning("Transmission did not report back"),
    }
    controller.shutdown()
}

fn run_cache_clear(config: &SystemConfig) -> Result<()> {
    let cache = SignalCache::new(&config.cache)?;
    let removed = cache.clear()?;
    utils::print_success(&format!(
        "Removed {} files from {}",
        removed,
        cache.directory().display()
    ));
    Ok(())
}
