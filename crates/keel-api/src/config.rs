use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use keel_core::config::SyncRole;
use keel_core::sync::DEFAULT_SYNC_LOG_CAPACITY;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` keeps the authoritative store in memory
    pub database_path: Option<PathBuf>,
    pub sync_log_capacity: usize,
    pub sync_enabled: bool,
    pub role: SyncRole,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_path: None,
            sync_log_capacity: DEFAULT_SYNC_LOG_CAPACITY,
            sync_enabled: true,
            role: SyncRole::Server,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bind_addr = value_or_default(&lookup, "KEEL_API_BIND_ADDR", &defaults.bind_addr);
        let database_path = optional_trimmed(&lookup, "KEEL_API_DATABASE_PATH").map(PathBuf::from);

        let sync_log_capacity = match optional_trimmed(&lookup, "KEEL_SYNC_LOG_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(
                        "KEEL_SYNC_LOG_CAPACITY must be a positive integer".to_string(),
                    )
                })?,
            None => defaults.sync_log_capacity,
        };

        let sync_enabled = match optional_trimmed(&lookup, "KEEL_SYNC_ENABLED") {
            Some(raw) => keel_core::config::parse_bool(&raw).ok_or_else(|| {
                ConfigError::Invalid("KEEL_SYNC_ENABLED must be true or false".to_string())
            })?,
            None => defaults.sync_enabled,
        };

        let role = match optional_trimmed(&lookup, "KEEL_SYNC_ROLE") {
            Some(raw) => raw
                .parse::<SyncRole>()
                .map_err(|error| ConfigError::Invalid(format!("KEEL_SYNC_ROLE: {error}")))?,
            None => defaults.role,
        };

        Ok(Self {
            bind_addr,
            database_path,
            sync_log_capacity,
            sync_enabled,
            role,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
