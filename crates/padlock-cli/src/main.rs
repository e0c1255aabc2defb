//! CLI for padlock: probe, configure and stream the VIA PadLock hardware RNG.

mod commands;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};
use padlock_core::{
    CpuModel, InitOutcome, PadlockEngine, PathTemplate, SimulatedCpus, Xstore, generate_config,
};

#[derive(Parser)]
#[command(name = "padlock")]
#[command(about = "padlock: drive the VIA PadLock hardware RNG on every core")]
#[command(version = padlock_core::VERSION)]
struct Cli {
    /// Per-core device directory, with a single %u for the core number
    #[arg(long, global = true, default_value = PathTemplate::DEFAULT)]
    device_path: String,

    /// Run against N simulated dual-source Nehemiah cores instead of /dev/cpu
    #[arg(long, global = true, value_name = "N")]
    simulate: Option<usize>,

    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Where an RNG configuration comes from.
#[derive(Args, Clone, Debug)]
struct ConfigSource {
    /// Quality level: 1 low (fastest), 2 medium, 3 high (slowest). 0 = default.
    #[arg(long, conflicts_with = "config")]
    quality: Option<u32>,

    /// JSON file with an explicit RNG configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the PadLock RNG on every core and report what was found
    Probe {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the recommended configuration for a quality level as JSON
    Config {
        /// Quality level (0 = default, same as 1)
        #[arg(long, default_value = "0")]
        quality: u32,
    },

    /// Configure and enable the RNG on every core
    Enable {
        #[command(flatten)]
        source: ConfigSource,
    },

    /// Write the configuration with the RNG enable bit cleared on every core
    Disable {
        #[command(flatten)]
        source: ConfigSource,
    },

    /// Enable the RNG and stream its output to stdout
    Stream {
        #[command(flatten)]
        source: ConfigSource,

        /// Total bytes to output (0 = unlimited, until Ctrl+C)
        #[arg(long, default_value = "0")]
        bytes: usize,

        /// Bytes extracted per block
        #[arg(long, default_value = "4096")]
        block_size: usize,

        /// Output format: raw bytes or hex text
        #[arg(long, default_value = "raw", value_parser = ["raw", "hex"])]
        format: String,

        /// Retries per block after the RNG configuration was tampered with
        #[arg(long, default_value = "3")]
        retries: u32,

        /// Report block timing and bandwidth to stderr when done
        #[arg(long)]
        stats: bool,

        /// Leave the RNG enabled on exit
        #[arg(long)]
        keep_enabled: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Config { quality } = cli.command {
        commands::config::run(quality);
        return;
    }

    match cli.simulate {
        Some(cores) => {
            let cpus = SimulatedCpus::uniform(cores, CpuModel::nehemiah_dual());
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64);
            let mut engine = PadlockEngine::with_xstore(cpus.xstore(seed));
            let outcome = engine.init(&cpus);
            dispatch(&mut engine, outcome, cli.command);
        }
        None => {
            let mut engine = PadlockEngine::new();
            let outcome = engine.init_with_template(Some(&cli.device_path));
            dispatch(&mut engine, outcome, cli.command);
        }
    }
}

fn dispatch<X: Xstore>(
    engine: &mut PadlockEngine<X>,
    outcome: padlock_core::Result<InitOutcome>,
    command: Commands,
) {
    match command {
        Commands::Probe { json } => commands::probe::run(engine, outcome, json),
        Commands::Config { quality } => commands::config::run(quality),
        Commands::Enable { source } => {
            commands::require_ready(outcome);
            let cfg = resolve(&source);
            commands::enable::run(engine, true, cfg);
        }
        Commands::Disable { source } => {
            commands::require_ready(outcome);
            let cfg = resolve(&source);
            commands::enable::run(engine, false, cfg);
        }
        Commands::Stream {
            source,
            bytes,
            block_size,
            format,
            retries,
            stats,
            keep_enabled,
        } => {
            commands::require_ready(outcome);
            let cfg = resolve(&source);
            let opts = commands::stream::StreamOptions {
                n_bytes: bytes,
                block_size,
                format,
                retries,
                stats,
                keep_enabled,
            };
            commands::stream::run(engine, cfg, &opts);
        }
    }
}

fn resolve(source: &ConfigSource) -> padlock_core::RngConfig {
    match &source.config {
        Some(path) => commands::load_config(path),
        None => generate_config(source.quality.unwrap_or(0)).0,
    }
}
