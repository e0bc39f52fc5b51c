//! Sync configuration stored in the free-form settings object.
//!
//! Settings are a JSON object shared by every device. The sync keys are
//! device-local: clients strip them before pushing and the server scrubs them
//! before serving a snapshot.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const SYNC_ROLE_KEY: &str = "syncRole";
pub const SYNC_SERVER_URL_KEY: &str = "syncServerUrl";
pub const SYNC_INTERVAL_KEY: &str = "syncInterval";
pub const SYNC_ENABLED_KEY: &str = "syncEnabled";

/// Settings keys that configure sync on one device.
pub const SYNC_SETTING_KEYS: [&str; 4] = [
    SYNC_ROLE_KEY,
    SYNC_SERVER_URL_KEY,
    SYNC_INTERVAL_KEY,
    SYNC_ENABLED_KEY,
];

/// Keys never accepted from or served to peers.
pub const PEER_PRIVATE_SETTING_KEYS: [&str; 6] = [
    SYNC_ROLE_KEY,
    SYNC_SERVER_URL_KEY,
    SYNC_INTERVAL_KEY,
    SYNC_ENABLED_KEY,
    "syncToken",
    "apiKey",
];

pub const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 15;

/// Which side of the sync protocol this device plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRole {
    /// Authoritative store serving snapshots
    Server,
    /// Replica that pushes and pulls on a timer
    #[default]
    Client,
}

impl SyncRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for SyncRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            other => Err(Error::InvalidInput(format!(
                "sync role must be 'server' or 'client', got '{other}'"
            ))),
        }
    }
}

/// Sync settings for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub role: SyncRole,
    /// Base URL of the authority, without trailing slash
    pub server_url: String,
    /// Minutes between rounds; 0 disables the timer
    pub interval_minutes: u64,
    pub enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            role: SyncRole::Client,
            server_url: String::new(),
            interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            enabled: false,
        }
    }
}

impl SyncConfig {
    /// Client config pointing at `server_url`.
    pub fn client(server_url: impl Into<String>, interval_minutes: u64) -> Self {
        Self {
            role: SyncRole::Client,
            server_url: server_url.into(),
            interval_minutes,
            enabled: true,
        }
    }

    pub fn server() -> Self {
        Self {
            role: SyncRole::Server,
            enabled: true,
            ..Self::default()
        }
    }

    /// Read the sync keys from a settings object. Missing or malformed
    /// values fall back to defaults.
    pub fn from_settings(settings: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        let role = settings
            .get(SYNC_ROLE_KEY)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.role);
        let server_url = settings
            .get(SYNC_SERVER_URL_KEY)
            .and_then(Value::as_str)
            .map(|raw| raw.trim().trim_end_matches('/').to_string())
            .unwrap_or_default();
        let interval_minutes = settings
            .get(SYNC_INTERVAL_KEY)
            .and_then(|value| match value {
                Value::Number(number) => number.as_u64(),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(defaults.interval_minutes);
        let enabled = settings
            .get(SYNC_ENABLED_KEY)
            .and_then(|value| match value {
                Value::Bool(flag) => Some(*flag),
                Value::String(text) => parse_bool(text),
                _ => None,
            })
            .unwrap_or(defaults.enabled);

        Self {
            role,
            server_url,
            interval_minutes,
            enabled,
        }
    }

    /// Write the sync keys into a settings object.
    pub fn write_to(&self, settings: &mut Map<String, Value>) {
        settings.insert(SYNC_ROLE_KEY.to_string(), Value::from(self.role.as_str()));
        settings.insert(
            SYNC_SERVER_URL_KEY.to_string(),
            Value::from(self.server_url.clone()),
        );
        settings.insert(
            SYNC_INTERVAL_KEY.to_string(),
            Value::from(self.interval_minutes),
        );
        settings.insert(SYNC_ENABLED_KEY.to_string(), Value::from(self.enabled));
    }

    /// True when a client round may run: client role, enabled, non-empty
    /// URL and non-zero interval.
    pub fn can_sync(&self) -> bool {
        self.role == SyncRole::Client
            && self.enabled
            && !self.server_url.trim().is_empty()
            && self.interval_minutes > 0
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_minutes > 0).then(|| Duration::from_secs(self.interval_minutes * 60))
    }
}

/// Normalize a server URL entered by a user.
pub fn normalize_server_url(raw: &str) -> Result<String> {
    let value = normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::InvalidInput("server URL must not be empty".to_string()))?;
    if !is_http_url(&value) {
        return Err(Error::InvalidInput(format!(
            "server URL must include http:// or https://, got '{value}'"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Remove device-private keys from a settings object.
pub fn strip_sync_settings(settings: &mut Map<String, Value>) {
    for key in PEER_PRIVATE_SETTING_KEYS {
        settings.remove(key);
    }
}

/// Parse common truthy/falsy strings.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
