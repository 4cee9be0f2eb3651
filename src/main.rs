//! Unified duplex-relay CLI.
//!
//! - `duplex-relay active` - persistent server leg, target dialed on demand
//! - `duplex-relay passive` - two listeners, one inbound client each

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use duplex_relay::cli::{self, ActiveArgs, PassiveArgs};

/// Duplex TCP relay.
#[derive(Parser)]
#[command(
    name = "duplex-relay",
    version,
    about = "Joins two TCP endpoints and relays bytes in both directions",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a fixed server and dial the target once the server talks.
    Active(ActiveArgs),

    /// Listen on two addresses and pair one inbound client from each.
    Passive(PassiveArgs),
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let result = match args.command {
        Commands::Active(args) => cli::run_active(args),
        Commands::Passive(args) => cli::run_passive(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
