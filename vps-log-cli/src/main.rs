//! VPS Log CLI Application
//!
//! Command-line interface over the vps-log-decoder library. It adds:
//! - Argument parsing and an optional TOML configuration file
//! - Interrupt handling (SIGINT/SIGTERM end the pass cleanly)
//! - Summary tables, listings, CSV / JSON-lines export
//! - Split manifests

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod interrupt;
mod report;

/// VPS Log Reader - Inspect, filter, split and summarize simulation logs
#[derive(Parser, Debug)]
#[command(name = "vps-log")]
#[command(about = "Inspect VPS simulation logs (edge transit records, text logs, framed dev logs)", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fixed 28-byte edge transit records
    Transit(commands::transit::TransitArgs),
    /// Bracketed simulation text log
    Text(commands::text::TextArgs),
    /// Framed dev-log container
    Framed(commands::framed::FramedArgs),
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("VPS Log CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", vps_log_decoder::VERSION);

    let config = config::load_or_default(args.config.as_deref())?;
    log::debug!("Configuration: {:?}", config);

    let interrupted = interrupt::install()?;
    let runner = commands::Runner::new(&config, interrupted);

    match &args.command {
        Command::Transit(cmd) => commands::transit::run(cmd, &runner),
        Command::Text(cmd) => commands::text::run(cmd, &runner),
        Command::Framed(cmd) => commands::framed::run(cmd, &runner),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
