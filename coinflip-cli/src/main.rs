mod commands;

use clap::{Parser, Subcommand};
use coinflip_core::{CoinflipError, GameConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coinflip")]
#[command(about = "Coinflip round engine: heads or tails over a shared pool")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rounds, reading bets from stdin and writing events to stdout
    Serve {
        /// Price list file, overrides PRICES_FILE
        #[arg(short, long)]
        prices: Option<PathBuf>,
    },
    /// Check a finished round's seed against its published hash
    Verify {
        /// Revealed seed (hex encoded)
        #[arg(long)]
        seed: String,
        /// Hash published when the round opened (hex encoded)
        #[arg(long)]
        hash: String,
    },
    /// Play rounds with random bettors, without waiting on the clock
    Simulate {
        /// Number of rounds to play
        #[arg(short, long, default_value_t = 5)]
        rounds: usize,
        /// Number of simulated users
        #[arg(short, long, default_value_t = 4)]
        players: usize,
        /// Seed for the bettors' choices (round outcomes stay random)
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging, on stderr since stdout carries events
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "coinflip={},coinflip_core={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Serve { prices } => match GameConfig::from_env() {
            Ok(config) => commands::serve(config, prices).await,
            Err(e) => Err(e.into()),
        },
        Commands::Verify { seed, hash } => commands::verify(&seed, &hash),
        Commands::Simulate {
            rounds,
            players,
            seed,
        } => match GameConfig::from_env() {
            Ok(config) => commands::simulate(config, rounds, players, seed),
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        for line in error_report(&e) {
            eprintln!("{}", line);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Lines printed on stderr for a failed command, with the full cause chain.
fn error_report(e: &anyhow::Error) -> Vec<String> {
    match e.downcast_ref::<CoinflipError>() {
        Some(CoinflipError::Config(msg)) => vec![
            format!("Error: Invalid configuration: {}", msg),
            "Check the BETTING_TIME, HOUSE_EDGE, ... environment variables".to_string(),
        ],
        Some(CoinflipError::Pricing(msg)) => vec![
            format!("Error: Cannot load price list: {}", msg),
            "Set PRICES_FILE or pass --prices <file>".to_string(),
        ],
        _ => vec![format!("Error: {:#}", e)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_report_includes_cause() {
        let io = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "stream did not contain valid UTF-8",
        );
        let err = Err::<(), _>(io).context("reading stdin").unwrap_err();

        let report = error_report(&err);
        assert_eq!(report.len(), 1);
        assert!(report[0].contains("reading stdin"));
        assert!(report[0].contains("valid UTF-8"));
    }

    #[test]
    fn test_error_report_config_hint() {
        let err = anyhow::Error::from(CoinflipError::config(
            "BETTING_TIME must be between 1 and 86400, got 0",
        ));
        let report = error_report(&err);
        assert!(report[0].starts_with("Error: Invalid configuration"));
        assert_eq!(report.len(), 2);
    }
}
