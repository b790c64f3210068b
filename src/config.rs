use std::env;
use std::time::Duration;

use eyre::{Result, WrapErr};

use crate::worker::DEFAULT_POLL_INTERVAL;

/// Runtime configuration, read from the environment (with `.env` support at
/// the entrypoint) and falling back to defaults where sensible.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub cluster_url: String,
    pub api_port: u16,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").wrap_err("DATABASE_URL is required")?,
            cluster_url: env::var("CLUSTER_URL").wrap_err("CLUSTER_URL is required")?,
            api_port: read_u16("API_PORT", 3000),
            api_key: env::var("API_KEY").ok().filter(|key| !key.is_empty()),
            poll_interval: Duration::from_secs(read_u64(
                "POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL.as_secs(),
            )),
        })
    }
}

fn read_u16(key: &str, fallback: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(fallback)
}

fn read_u64(key: &str, fallback: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(fallback)
}
