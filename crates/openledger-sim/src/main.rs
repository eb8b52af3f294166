//! OpenLedger simulator: run ledger scenarios against an in-memory store
//! and print the resulting balances, integrity sweep and supply check.

mod scenarios;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use openledger_types::{LedgerConfig, constants};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "openledger-sim")]
#[command(about = "Drive OpenLedger scenarios and report ledger health")]
struct Cli {
    /// Ledger configuration (JSON). Built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand)]
enum Scenario {
    /// Lock and release with a fee, escrow round trip, pool payout
    EndToEnd,

    /// Many threads debit one balance funded for all but one of them
    Concurrent {
        #[arg(long, default_value_t = 16)]
        threads: usize,

        #[arg(long, default_value = "0.25")]
        amount: Decimal,
    },

    /// Randomised credit / debit / escrow traffic
    Stress {
        #[arg(long, default_value_t = 1_000)]
        ops: usize,

        #[arg(long, default_value_t = 8)]
        accounts: usize,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<LedgerConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(LedgerConfig::default());
    };
    let raw = std::fs::read_to_string(path)?;
    Ok(LedgerConfig::from_json_str(&raw)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = load_config(cli.config.as_ref())?;
    tracing::info!(
        engine = constants::ENGINE_NAME,
        version = constants::VERSION,
        views = config.views.len(),
        currencies = config.currencies.len(),
        "Starting simulator"
    );

    let report = match cli.scenario {
        Scenario::EndToEnd => scenarios::end_to_end(&config)?,
        Scenario::Concurrent { threads, amount } => {
            scenarios::concurrent(&config, threads, amount)?
        }
        Scenario::Stress {
            ops,
            accounts,
            seed,
        } => scenarios::stress(&config, ops, accounts, seed)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.sweep.is_healthy() && report.supply_conserved {
        Ok(())
    } else {
        Err("ledger health check failed".into())
    }
}
