//! Environment-driven configuration.

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 8060;
pub const DEFAULT_CDP_HOST: &str = "127.0.0.1";
pub const DEFAULT_CDP_PORT: u16 = 16666;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the RPC server listens on (`PILOT_PORT`).
    pub port: u16,
    /// Host of the browser's debugging endpoint (`PILOT_CDP_HOST`).
    pub cdp_host: String,
    /// Port of the browser's debugging endpoint (`PILOT_CDP_PORT`).
    pub cdp_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env_port("PILOT_PORT", DEFAULT_PORT)?,
            cdp_host: std::env::var("PILOT_CDP_HOST")
                .unwrap_or_else(|_| DEFAULT_CDP_HOST.to_string()),
            cdp_port: env_port("PILOT_CDP_PORT", DEFAULT_CDP_PORT)?,
        })
    }
}

fn env_port(name: &str, default: u16) -> Result<u16> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be a port number, got {value:?}")),
        Err(_) => Ok(default),
    }
}
