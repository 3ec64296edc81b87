//! Configuration management for the bus host.
//!
//! Settings are loaded from a TOML file, which is created with defaults if it
//! does not exist yet, then overridden from the command line and validated.

use crate::cli::CliArgs;
use anyhow::Context;
use plugin_event_bus::{BusConfig, HostPlatform};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Event bus tuning
    #[serde(default)]
    pub bus: BusConfig,
    pub host: HostSettings,
    pub logging: LoggingSettings,
}

/// Which platform we pretend to be and which plugins we enable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host platform, selects the unload detection strategy
    pub platform: HostPlatform,
    /// Plugins to enable, in order
    #[serde(default)]
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            host: HostSettings {
                platform: HostPlatform::Sponge,
                plugins: vec![
                    "economy-audit".to_string(),
                    "chat-filter".to_string(),
                    "config-watcher".to_string(),
                ],
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults to `path`
    /// first if it does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) -> Result<(), String> {
        if let Some(platform) = &args.platform {
            self.host.platform = platform.parse()?;
        }
        if let Some(plugins) = &args.plugins {
            self.host.plugins = plugins.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        self.bus.validate()?;

        let mut seen = std::collections::HashSet::new();
        for plugin in &self.host.plugins {
            if plugin.trim().is_empty() {
                return Err("Plugin names cannot be empty".to_string());
            }
            if !seen.insert(plugin.as_str()) {
                return Err(format!("Plugin {} is listed more than once", plugin));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::{tempdir, NamedTempFile};

    fn cli(platform: Option<&str>) -> CliArgs {
        CliArgs {
            config_path: PathBuf::from("unused.toml"),
            platform: platform.map(str::to_string),
            plugins: None,
            log_level: Some("debug".to_string()),
            json_logs: true,
            wait: false,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.host.platform, HostPlatform::Sponge);
        assert_eq!(config.bus.slow_handler_threshold_ms, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bus_host.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();

        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[bus]
slow_handler_threshold_ms = 5
max_subscriptions_per_plugin = 64

[host]
platform = "bungeecord"
plugins = ["chat-filter"]

[logging]
level = "debug"
"#;
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config.bus.slow_handler_threshold_ms, 5);
        assert_eq!(config.bus.max_subscriptions_per_plugin, 64);
        assert!(!config.bus.warn_on_unhandled);
        assert_eq!(config.host.platform, HostPlatform::BungeeCord);
        assert_eq!(config.host.plugins, vec!["chat-filter".to_string()]);
        assert!(!config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_platform() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(
            temp_file.path(),
            "[host]\nplatform = \"nukkit\"\n\n[logging]\nlevel = \"info\"\n",
        )
        .await
        .unwrap();

        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        config.apply_cli(&cli(Some("velocity"))).unwrap();

        assert_eq!(config.host.platform, HostPlatform::Velocity);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        assert!(config.apply_cli(&cli(Some("nukkit"))).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.host.plugins.push("chat-filter".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.bus.slow_handler_threshold_ms = 3_600_000;
        assert!(config.validate().is_err());
    }
}
