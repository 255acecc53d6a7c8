//! # Ripple
//!
//! Runs a broker scenario and prints what every client observed.
//!
//! ## Usage
//!
//! ```bash
//! # Run a scenario with default settings
//! ripple scenarios/chat.toml
//!
//! # Run with a custom config
//! ripple scenarios/chat.toml --config /path/to/ripple.toml
//!
//! # Turn up logging
//! RUST_LOG=ripple_core=trace ripple scenarios/chat.toml
//! ```

mod config;
mod runner;
mod scenario;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ripple", version, about = "Run an in-memory broker scenario")]
struct Cli {
    /// Scenario file (TOML).
    scenario: PathBuf,

    /// Config file. Defaults to ripple.toml or the standard locations.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print compact JSON.
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    // Logs go to stderr so stdout stays a clean report.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    ripple_core::metrics::describe();

    let scenario = scenario::Scenario::from_file(&cli.scenario)?;
    tracing::info!(
        scenario = %cli.scenario.display(),
        clients = scenario.clients.len(),
        steps = scenario.steps.len(),
        "Running scenario"
    );

    let report = runner::Runner::new(config.broker, scenario).run()?;

    let output = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{output}");

    Ok(())
}
