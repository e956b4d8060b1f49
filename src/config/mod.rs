//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::game::AuthMode;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Port the observer WebSocket server listens on
    pub listen_port: u16,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Game server every alt connects to
    pub server: GameServerConfig,

    /// Observer fan-out configuration
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Timing of the built-in simulated game client
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GameServerConfig {
    /// Server host name
    pub host: String,

    /// Server port
    pub port: u16,

    /// Protocol version pin
    pub version: String,

    /// Authentication mode
    pub auth: AuthMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Events buffered per observer before a slow one starts missing events
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between connecting and spawning
    pub spawn_delay_ms: u64,

    /// Interval between health ticks
    pub health_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 3000,
            log_level: "info".to_string(),
            log: LogConfig::default(),
            server: GameServerConfig::default(),
            observer: ObserverConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            host: "play.jartexnetwork.net".to_string(),
            port: 25565,
            version: "1.18.2".to_string(),
            auth: AuthMode::Offline,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            spawn_delay_ms: 1500,
            health_interval_ms: 15000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/altpool.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // PORT - observer listen port
        if let Ok(port) = env::var("PORT") {
            if let Ok(value) = port.trim().parse::<u16>() {
                self.listen_port = value;
            }
        }

        // ALTPOOL_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("ALTPOOL_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // ALTPOOL_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("ALTPOOL_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // Game server environment variables
        if let Ok(host) = env::var("ALTPOOL_SERVER_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = env::var("ALTPOOL_SERVER_PORT") {
            if let Ok(value) = port.parse::<u16>() {
                self.server.port = value;
            }
        }

        if let Ok(version) = env::var("ALTPOOL_SERVER_VERSION") {
            self.server.version = version;
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            anyhow::bail!("Listen port must be greater than 0");
        }

        if self.server.host.trim().is_empty() {
            anyhow::bail!("Server host must not be empty");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.server.version.trim().is_empty() {
            anyhow::bail!("Server version must not be empty");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        if self.observer.event_buffer == 0 {
            anyhow::bail!("observer.event_buffer must be greater than 0");
        }

        if self.simulation.health_interval_ms == 0 {
            anyhow::bail!("simulation.health_interval_ms must be greater than 0");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(self)?);
        Ok(())
    }

    /// Display configuration summary
    pub fn display_summary(&self) -> Result<()> {
        println!("Observer port: {}", self.listen_port);
        println!(
            "Game server: {}:{} (version {}, {} auth)",
            self.server.host, self.server.port, self.server.version, self.server.auth
        );
        println!("Log file: {}", self.log.file_path);
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command(path: &str, action: &Option<crate::cli::ConfigAction>) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) | None => {
                let config = Config::load_or_default(path);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(path)?;
                println!("Wrote default configuration to {}", path);
                default_config.display()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.server.auth, AuthMode::Offline);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.server, deserialized.server);
    }

    #[test]
    fn test_optional_sections_default() {
        let content = r#"
listen_port = 8080
log_level = "debug"

[log]
file_path = "logs/test.log"

[server]
host = "localhost"
port = 25566
version = "1.20.1"
auth = "offline"
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.observer.event_buffer, 256);
        assert_eq!(config.simulation.spawn_delay_ms, 1500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.server.host = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.observer.event_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = Config::default();
        config.server.host = "mc.example.org".to_string();
        let temp_file = NamedTempFile::new().unwrap();

        // Test save
        config.save_to_file(temp_file.path()).unwrap();

        // Test load
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.log.file_path, loaded_config.log.file_path);
        assert_eq!(loaded_config.server.port, 25565);
    }
}
