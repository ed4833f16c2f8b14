use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigSource, Environment, File};
use serde::Deserialize;
use tracing::info;

fn default_pool_cap() -> usize {
    10
}
fn default_connect_timeout_seconds() -> u64 {
    10
}
fn default_idle_timeout_ssh_seconds() -> u64 {
    300
}
fn default_idle_timeout_session_seconds() -> u64 {
    1800
}
fn default_reaper_interval_seconds() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_seconds() -> u64 {
    1
}
fn default_max_sessions_per_user() -> usize {
    5
}
fn default_history_cap() -> usize {
    1000
}
fn default_output_chunk_bytes() -> usize {
    4096
}
fn default_listen_address() -> String {
    "0.0.0.0:2222".to_string()
}
fn default_audit_queue_capacity() -> usize {
    1024
}

/// Deserialized from `config.yaml` plus `SHELLGATE_`-prefixed environment
/// overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_pool_cap")]
    pub pool_cap: usize,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout_ssh_seconds")]
    pub idle_timeout_ssh_seconds: u64,
    #[serde(default = "default_idle_timeout_session_seconds")]
    pub idle_timeout_session_seconds: u64,
    #[serde(default = "default_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_output_chunk_bytes")]
    pub output_chunk_bytes: usize,
    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            pool_cap: default_pool_cap(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            idle_timeout_ssh_seconds: default_idle_timeout_ssh_seconds(),
            idle_timeout_session_seconds: default_idle_timeout_session_seconds(),
            reaper_interval_seconds: default_reaper_interval_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
            max_sessions_per_user: default_max_sessions_per_user(),
            history_cap: default_history_cap(),
            output_chunk_bytes: default_output_chunk_bytes(),
            audit_queue_capacity: default_audit_queue_capacity(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
    pub fn idle_timeout_ssh(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_ssh_seconds)
    }
    pub fn idle_timeout_session(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_session_seconds)
    }
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let config: Config = ConfigSource::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix("SHELLGATE"))
        .build()
        .context("building configuration")?
        .try_deserialize()
        .context("deserializing configuration")?;

    info!(
        listen_address = %config.listen_address,
        pool_cap = config.pool_cap,
        max_sessions_per_user = config.max_sessions_per_user,
        "configuration loaded"
    );
    Ok(config)
}
