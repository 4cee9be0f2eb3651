//! CLI entry points for the two relay topologies.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::active::ActiveRelay;
use crate::config::{self, ActiveOverrides, PassiveOverrides};
use crate::error::RelayError;
use crate::passive::PassiveRelay;

/// CLI arguments for active mode.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "duplex-relay-active",
    version,
    about = "Hold a persistent server connection and relay it to an on-demand target"
)]
pub struct ActiveArgs {
    /// Config file path (toml). Flags override file values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ActiveOverrides,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// CLI arguments for passive mode.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "duplex-relay-passive",
    version,
    about = "Listen on two addresses and relay between one inbound client from each"
)]
pub struct PassiveArgs {
    /// Config file path (toml). Flags override file values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: PassiveOverrides,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Run active mode with the given CLI arguments.
pub fn run_active(args: ActiveArgs) -> Result<(), RelayError> {
    let cfg = config::load_active(args.config.as_deref(), &args.overrides)?;
    init_tracing(args.log_level.as_deref());
    ActiveRelay::connect(cfg)?.run()
}

/// Run passive mode with the given CLI arguments.
pub fn run_passive(args: PassiveArgs) -> Result<(), RelayError> {
    let cfg = config::load_passive(args.config.as_deref(), &args.overrides)?;
    init_tracing(args.log_level.as_deref());
    PassiveRelay::bind(cfg)?.run()
}

fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
