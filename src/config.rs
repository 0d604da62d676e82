// SPDX-License-Identifier: MPL-2.0

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const APP_NAME: &str = "community-feed";

pub const DEFAULT_SUBSCRIPTION_ENDPOINT: &str = "wss://bsky.network";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
pub const DEFAULT_HOSTNAME: &str = "example.com";
pub const DEFAULT_PUBLISHER_DID: &str = "did:example:alice";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Commit events processed between durable cursor writes
pub const CHECKPOINT_INTERVAL: u64 = 20;

pub const DEFAULT_FEED_LIMIT: usize = 50;
pub const MAX_FEED_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read members file {path}: {message}")]
    MembersFile { path: String, message: String },
    #[error("could not determine data directory")]
    NoDataDir,
}

/// Runtime configuration, read from `FEEDGEN_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// SQLite path, `:memory:`, or a `postgres://` URL
    pub database: String,
    pub subscription_endpoint: String,
    pub hostname: String,
    pub publisher_did: String,
    pub service_did: String,
    pub reconnect_delay: Duration,
    pub idle_timeout: Duration,
    pub members: Vec<String>,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port: u16 = parse_or(get("FEEDGEN_PORT"), "FEEDGEN_PORT", DEFAULT_PORT)?;
        let host_value = get("FEEDGEN_LISTENHOST").unwrap_or_else(|| DEFAULT_LISTEN_HOST.into());
        let host: IpAddr = host_value.parse().map_err(|_| ConfigError::Invalid {
            key: "FEEDGEN_LISTENHOST",
            value: host_value.clone(),
        })?;

        let database = match get("FEEDGEN_DATABASE") {
            Some(location) => location,
            None => default_database_path()?.to_string_lossy().into_owned(),
        };

        let hostname = get("FEEDGEN_HOSTNAME").unwrap_or_else(|| DEFAULT_HOSTNAME.into());
        let service_did = get("FEEDGEN_SERVICE_DID").unwrap_or_else(|| format!("did:web:{hostname}"));

        let reconnect_ms = parse_or(
            get("FEEDGEN_SUBSCRIPTION_RECONNECT_DELAY"),
            "FEEDGEN_SUBSCRIPTION_RECONNECT_DELAY",
            DEFAULT_RECONNECT_DELAY_MS,
        )?;
        let idle_ms = parse_or(
            get("FEEDGEN_SUBSCRIPTION_IDLE_TIMEOUT"),
            "FEEDGEN_SUBSCRIPTION_IDLE_TIMEOUT",
            DEFAULT_IDLE_TIMEOUT_MS,
        )?;
        if idle_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "FEEDGEN_SUBSCRIPTION_IDLE_TIMEOUT",
                value: "0".to_string(),
            });
        }

        let mut members: Vec<String> = get("FEEDGEN_MEMBERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|did| !did.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(path) = get("FEEDGEN_MEMBERS_FILE") {
            members.extend(load_members_file(&path)?);
        }

        Ok(Self {
            listen_addr: SocketAddr::new(host, port),
            database,
            subscription_endpoint: get("FEEDGEN_SUBSCRIPTION_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_SUBSCRIPTION_ENDPOINT.into()),
            hostname,
            publisher_did: get("FEEDGEN_PUBLISHER_DID")
                .unwrap_or_else(|| DEFAULT_PUBLISHER_DID.into()),
            service_did,
            reconnect_delay: Duration::from_millis(reconnect_ms),
            idle_timeout: Duration::from_millis(idle_ms),
            members,
            default_limit: DEFAULT_FEED_LIMIT,
            max_limit: MAX_FEED_LIMIT,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => {
            let parsed = value.trim().parse();
            parsed.map_err(|_| ConfigError::Invalid { key, value })
        }
        None => Ok(default),
    }
}

/// Default SQLite location (~/.local/share/community-feed/feed.sqlite)
fn default_database_path() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
    Ok(data_dir.join(APP_NAME).join("feed.sqlite"))
}

/// Read a JSON array of member DIDs
fn load_members_file(path: &str) -> Result<Vec<String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::MembersFile {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::MembersFile {
        path: path.to_string(),
        message: e.to_string(),
    })
}
