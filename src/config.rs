use std::{path::PathBuf, time::Duration};

use anyhow::Context;

use crate::progress::dispatcher::DEFAULT_DEBOUNCE;

#[derive(Debug, Clone)]
pub struct Config {
    pub streaming_api_url: String,
    pub store_dir: PathBuf,
    /// Keep watch history in memory only; nothing survives a restart.
    pub ephemeral_store: bool,
    pub sync_debounce: Duration,
    pub request_timeout: Duration,
    pub bind_addr: String,
    pub reconcile_on_start: bool,
}

const DEFAULT_STREAMING_API_URL: &str = "http://localhost:3001";
const DEFAULT_STORE_DIR: &str = "./data";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source; `load` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let streaming_api_url =
            lookup("STREAMING_API_URL").unwrap_or(DEFAULT_STREAMING_API_URL.into());
        let store_dir = lookup("PROGRESS_STORE_DIR").unwrap_or(DEFAULT_STORE_DIR.into());
        let ephemeral_store = match lookup("EPHEMERAL_STORE") {
            Some(raw) => {
                parse_bool(&raw).with_context(|| format!("Invalid EPHEMERAL_STORE: {}", raw))?
            }
            None => false,
        };
        let sync_debounce = parse_millis(&lookup, "SYNC_DEBOUNCE_MS")?.unwrap_or(DEFAULT_DEBOUNCE);
        let request_timeout = parse_millis(&lookup, "STREAMING_API_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let bind_addr = lookup("BIND_ADDR").unwrap_or(DEFAULT_BIND_ADDR.into());
        let reconcile_on_start = match lookup("RECONCILE_ON_START") {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("Invalid RECONCILE_ON_START: {}", raw))?,
            None => true,
        };
        Ok(Config {
            streaming_api_url,
            store_dir: PathBuf::from(store_dir),
            ephemeral_store,
            sync_debounce,
            request_timeout,
            bind_addr,
            reconcile_on_start,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.streaming_api_url.trim().is_empty() {
            return Err("STREAMING_API_URL is missing".into());
        }
        if self.sync_debounce.is_zero() {
            return Err("SYNC_DEBOUNCE_MS must be greater than zero".into());
        }
        if self.request_timeout.is_zero() {
            return Err("STREAMING_API_TIMEOUT_MS must be greater than zero".into());
        }
        Ok(())
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Duration>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("expected a boolean, got {:?}", other)),
    }
}
