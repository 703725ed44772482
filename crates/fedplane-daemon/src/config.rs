use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use fedplane_observe::{LoggerConfig, LoggerFormat};
use fedplane_sync::SyncConfig;

pub const HTTP_ADDR: &str = "FEDPLANE_HTTP_ADDR";
pub const LOG_FORMAT: &str = "FEDPLANE_LOG_FORMAT";
pub const LOG_LEVEL: &str = "FEDPLANE_LOG_LEVEL";
pub const SYNC_INTERVAL_SECS: &str = "FEDPLANE_SYNC_INTERVAL_SECS";
pub const MANAGER_INTERVAL_SECS: &str = "FEDPLANE_MANAGER_INTERVAL_SECS";
pub const INVENTORY: &str = "FEDPLANE_INVENTORY";
pub const INSTANCE: &str = "FEDPLANE_INSTANCE";

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub http_addr: SocketAddr,
    pub logger: LoggerConfig,
    pub sync: SyncConfig,
    /// JSON inventory seed loaded into the in-memory stores at startup.
    pub inventory: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from `lookup`; unset or empty keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_addr = get(HTTP_ADDR)
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse()
            .with_context(|| format!("{HTTP_ADDR} is not a socket address"))?;

        let mut logger = LoggerConfig::default();
        if let Some(format) = get(LOG_FORMAT) {
            logger = logger.with_format(format.parse()?);
        }
        if let Some(level) = get(LOG_LEVEL) {
            logger = logger.with_level(level);
        }
        logger.validate()?;

        let mut sync = SyncConfig {
            instance: default_instance(),
            ..SyncConfig::default()
        };
        if let Some(secs) = get(SYNC_INTERVAL_SECS) {
            sync.namespace_sync_interval = seconds(SYNC_INTERVAL_SECS, &secs)?;
        }
        if let Some(secs) = get(MANAGER_INTERVAL_SECS) {
            sync.manager_interval = seconds(MANAGER_INTERVAL_SECS, &secs)?;
        }
        if let Some(instance) = get(INSTANCE) {
            sync.instance = instance;
        }
        sync.validate()?;

        Ok(Self {
            http_addr,
            logger,
            sync,
            inventory: get(INVENTORY).map(PathBuf::from),
        })
    }
}

fn seconds(key: &str, raw: &str) -> anyhow::Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}"))?;
    if secs == 0 {
        bail!("{key} must be positive");
    }
    Ok(Duration::from_secs(secs))
}

fn default_instance() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| SyncConfig::default().instance)
}
