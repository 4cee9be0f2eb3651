//! Configuration for both relay topologies.
//!
//! Each mode is configured either from a TOML file, from CLI flags, or from
//! both (flags win). The four addresses are always required and have no
//! defaults; tuning knobs default sensibly and rarely need touching.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_CHUNK_BYTES, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LISTEN_BACKLOG,
    DEFAULT_POLL_TIMEOUT_SECS,
};
use crate::error::RelayError;

/// Active mode: a persistent server leg plus an on-demand target leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConfig {
    /// Host of the persistent server leg, dialed at startup.
    pub server_host: String,
    pub server_port: u16,
    /// Host of the target leg, dialed on first server activity.
    pub target_host: String,
    pub target_port: u16,
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// Passive mode: two listeners, one inbound client each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveConfig {
    pub listen_host_a: String,
    pub listen_port_a: u16,
    pub listen_host_b: String,
    pub listen_port_b: u16,
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// Tuning knobs shared by both modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Upper bound on one poll sleep (seconds). Only bounds the staleness of
    /// the idle heartbeat; no connection is ever expired.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Read chunk size per pump cycle (bytes).
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Outbound connect timeout (seconds). Only used by active mode.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Listener backlog. Only used by passive mode.
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout(),
            chunk_bytes: default_chunk_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            listen_backlog: default_listen_backlog(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}
fn default_chunk_bytes() -> usize {
    DEFAULT_CHUNK_BYTES
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_listen_backlog() -> u32 {
    DEFAULT_LISTEN_BACKLOG
}

/// CLI overrides for active mode. Without a config file all four are
/// required.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ActiveOverrides {
    /// Host of the persistent server leg.
    #[arg(long)]
    pub server_host: Option<String>,

    /// Port of the persistent server leg.
    #[arg(long)]
    pub server_port: Option<u16>,

    /// Host of the on-demand target leg.
    #[arg(long)]
    pub target_host: Option<String>,

    /// Port of the on-demand target leg.
    #[arg(long)]
    pub target_port: Option<u16>,
}

/// CLI overrides for passive mode. Without a config file all four are
/// required.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PassiveOverrides {
    /// Bind host for listener A.
    #[arg(long)]
    pub listen_host_a: Option<String>,

    /// Bind port for listener A.
    #[arg(long)]
    pub listen_port_a: Option<u16>,

    /// Bind host for listener B.
    #[arg(long)]
    pub listen_host_b: Option<String>,

    /// Bind port for listener B.
    #[arg(long)]
    pub listen_port_b: Option<u16>,
}

pub fn load_active(
    path: Option<&Path>,
    overrides: &ActiveOverrides,
) -> Result<ActiveConfig, RelayError> {
    match path {
        Some(path) => {
            let mut cfg: ActiveConfig = parse_file(path)?;
            if let Some(host) = &overrides.server_host {
                cfg.server_host = host.clone();
            }
            if let Some(port) = overrides.server_port {
                cfg.server_port = port;
            }
            if let Some(host) = &overrides.target_host {
                cfg.target_host = host.clone();
            }
            if let Some(port) = overrides.target_port {
                cfg.target_port = port;
            }
            Ok(cfg)
        }
        None => Ok(ActiveConfig {
            server_host: required(overrides.server_host.clone(), "--server-host")?,
            server_port: required(overrides.server_port, "--server-port")?,
            target_host: required(overrides.target_host.clone(), "--target-host")?,
            target_port: required(overrides.target_port, "--target-port")?,
            tuning: TuningConfig::default(),
        }),
    }
}

pub fn load_passive(
    path: Option<&Path>,
    overrides: &PassiveOverrides,
) -> Result<PassiveConfig, RelayError> {
    match path {
        Some(path) => {
            let mut cfg: PassiveConfig = parse_file(path)?;
            if let Some(host) = &overrides.listen_host_a {
                cfg.listen_host_a = host.clone();
            }
            if let Some(port) = overrides.listen_port_a {
                cfg.listen_port_a = port;
            }
            if let Some(host) = &overrides.listen_host_b {
                cfg.listen_host_b = host.clone();
            }
            if let Some(port) = overrides.listen_port_b {
                cfg.listen_port_b = port;
            }
            Ok(cfg)
        }
        None => Ok(PassiveConfig {
            listen_host_a: required(overrides.listen_host_a.clone(), "--listen-host-a")?,
            listen_port_a: required(overrides.listen_port_a, "--listen-port-a")?,
            listen_host_b: required(overrides.listen_host_b.clone(), "--listen-host-b")?,
            listen_port_b: required(overrides.listen_port_b, "--listen-port-b")?,
            tuning: TuningConfig::default(),
        }),
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RelayError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| RelayError::Config(format!("failed to parse {}: {e}", path.display())))
}

fn required<T>(value: Option<T>, flag: &str) -> Result<T, RelayError> {
    value.ok_or_else(|| RelayError::Config(format!("{flag} is required without --config")))
}
