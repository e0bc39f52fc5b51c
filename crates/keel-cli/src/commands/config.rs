use keel_core::config::{normalize_server_url, parse_bool, SyncConfig, SyncRole};

use crate::cli::{ConfigCommands, ConfigKey};
use crate::context::ClientContext;
use crate::error::CliError;

pub async fn run_config(command: ConfigCommands, ctx: &ClientContext) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => {
            let config = ctx.sync_config().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                for line in format_config_lines(&config) {
                    println!("{line}");
                }
            }
        }
        ConfigCommands::Set { key, value } => {
            let mut config = ctx.sync_config().await;
            apply_setting(&mut config, key, &value)?;
            ctx.save_sync_config(&config).await?;
            println!("Saved sync settings");
            if config.can_sync() {
                println!("Sync is ready; run `keel sync` or `keel daemon`");
            }
        }
    }
    Ok(())
}

/// Validate and apply one `keel config set` change.
pub fn apply_setting(config: &mut SyncConfig, key: ConfigKey, value: &str) -> Result<(), CliError> {
    match key {
        ConfigKey::Role => {
            config.role = value.parse::<SyncRole>().map_err(|error| CliError::InvalidSetting {
                key: "role",
                message: error.to_string(),
            })?;
        }
        ConfigKey::ServerUrl => {
            let trimmed = value.trim();
            config.server_url = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                String::new()
            } else {
                normalize_server_url(trimmed).map_err(|error| CliError::InvalidSetting {
                    key: "server-url",
                    message: error.to_string(),
                })?
            };
        }
        ConfigKey::Interval => {
            config.interval_minutes =
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|error| CliError::InvalidSetting {
                        key: "interval",
                        message: error.to_string(),
                    })?;
        }
        ConfigKey::Enabled => {
            config.enabled = parse_bool(value).ok_or_else(|| CliError::InvalidSetting {
                key: "enabled",
                message: format!("expected true or false, got '{value}'"),
            })?;
        }
    }
    Ok(())
}

pub fn format_config_lines(config: &SyncConfig) -> Vec<String> {
    let server = if config.server_url.is_empty() {
        "(not set)"
    } else {
        config.server_url.as_str()
    };
    let interval = if config.interval_minutes == 0 {
        "0 (timer disabled)".to_string()
    } else {
        format!("{} min", config.interval_minutes)
    };
    vec![
        format!("role:        {}", config.role),
        format!("server-url:  {server}"),
        format!("interval:    {interval}"),
        format!("enabled:     {}", config.enabled),
    ]
}
