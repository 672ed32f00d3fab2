//! tss-party CLI
//!
//! Runs threshold key generation and signing with every party in this
//! process, and verifies ECDSA signatures.

mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::{Config, DEFAULT_FIXTURE_DIR};

/// Threshold ECDSA parties, orchestrated in one process.
#[derive(Parser, Debug)]
#[command(name = "tss-party")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding key-share fixtures.
    #[arg(long, env = "TSS_FIXTURE_DIR", default_value = DEFAULT_FIXTURE_DIR, global = true)]
    fixture_dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate key shares for every party and store them as fixtures.
    Setup {
        /// Signing needs threshold + 1 parties; must be at least 1, since
        /// cggmp24 cannot sign with a single party.
        #[arg(short, long, default_value_t = 3, allow_negative_numbers = true)]
        threshold: i64,

        /// Total number of parties.
        #[arg(short, long, default_value_t = 6, allow_negative_numbers = true)]
        party: i64,
    },

    /// Sign with a random quorum of stored key shares.
    Sign {
        /// Threshold the fixtures were generated with (at least 1).
        #[arg(short, long, default_value_t = 3, allow_negative_numbers = true)]
        threshold: i64,

        /// Party count the fixtures were generated with.
        #[arg(short, long, default_value_t = 6, allow_negative_numbers = true)]
        party: i64,

        /// Text to sign (SHA-256). Signs the integer 42 when omitted.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Verify an ECDSA signature over SHA-256 of a message.
    Verify {
        /// Public key, compressed or uncompressed hex.
        #[arg(long)]
        pk: String,

        /// Signature r, hex.
        #[arg(long = "sign-r")]
        sign_r: String,

        /// Signature s, hex.
        #[arg(long = "sign-s")]
        sign_s: String,

        /// Signed message.
        #[arg(long)]
        msg: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let config = Config::new(cli.fixture_dir, cli.verbose);
    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Setup { threshold, party } => {
            commands::setup(config, threshold, party).await?;
        }
        Commands::Sign {
            threshold,
            party,
            message,
        } => {
            commands::sign(config, threshold, party, message.as_deref()).await?;
        }
        Commands::Verify {
            pk,
            sign_r,
            sign_s,
            msg,
        } => {
            commands::verify(&pk, &sign_r, &sign_s, &msg)?;
        }
    }
    Ok(())
}
