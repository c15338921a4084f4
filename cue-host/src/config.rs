//! Configuration loading for the parent.
//!
//! Configuration is loaded from a TOML file (default: `host.toml`). Every
//! section and field is optional.

use cue_client::DEFAULT_PORT;
use cue_core::{CountdownPausePolicy, FlashConfig};
use cue_types::{FlashStyle, Rgb, DEFAULT_FLASH_DURATION_MS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Highest accepted tick rate.
pub const MAX_TICK_HZ: u32 = 240;

/// Root configuration for the parent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Timer configuration.
    #[serde(default)]
    pub timer: TimerConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashSettings,
    /// Companion display configuration.
    #[serde(default)]
    pub companion: CompanionConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port (default: 7420, 0 picks a free port).
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long one child may take to accept a frame, in milliseconds
    /// (default: 250).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Timer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimerConfig {
    /// Ticks (and broadcasts) per second (default: 60).
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// What pause does during a countdown (default: failsafe).
    #[serde(default)]
    pub countdown_pause: CountdownPausePolicy,
    /// Ask displays to always show hours (default: false).
    #[serde(default)]
    pub show_hours: bool,
}

/// Flash configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlashSettings {
    /// Style (default: solid).
    #[serde(default)]
    pub style: FlashStyle,
    /// Window length in milliseconds (default: 500).
    #[serde(default = "default_flash_duration_ms")]
    pub duration_ms: u32,
    /// Color (default: white).
    #[serde(default = "default_flash_color")]
    pub color: Rgb,
}

/// Companion display configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompanionConfig {
    /// Push every broadcast to the companion channel (default: true).
    #[serde(default = "default_companion_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_send_timeout_ms() -> u64 {
    250
}

fn default_tick_hz() -> u32 {
    60
}

fn default_flash_duration_ms() -> u32 {
    DEFAULT_FLASH_DURATION_MS
}

fn default_flash_color() -> Rgb {
    Rgb::WHITE
}

fn default_companion_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            countdown_pause: CountdownPausePolicy::default(),
            show_hours: false,
        }
    }
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            style: FlashStyle::default(),
            duration_ms: default_flash_duration_ms(),
            color: default_flash_color(),
        }
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            enabled: default_companion_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds
    /// out-of-range values.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer.tick_hz == 0 || self.timer.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "timer.tick_hz must be between 1 and {}, got {}",
                    MAX_TICK_HZ, self.timer.tick_hz
                ),
            });
        }
        if self.server.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "server.send_timeout_ms must be at least 1".to_string(),
            });
        }
        if self.flash.style == FlashStyle::Unknown {
            return Err(ConfigError::Invalid {
                reason: "flash.style must be one of solid, blink, haptic, off".to_string(),
            });
        }
        Ok(())
    }

    /// `address:port` to bind.
    pub fn listen_address(&self) -> String {
        let host = &self.server.bind_address;
        if host.contains(':') {
            format!("[{}]:{}", host, self.server.port)
        } else {
            format!("{}:{}", host, self.server.port)
        }
    }

    /// Time between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.timer.tick_hz.max(1)
    }

    /// Per-child send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.server.send_timeout_ms)
    }

    /// Flash settings for the timer.
    pub fn flash_config(&self) -> FlashConfig {
        FlashConfig {
            style: self.flash.style,
            duration_ms: self.flash.duration_ms,
            color: self.flash.color,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] toml::ser::Error),
    /// A value is out of range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 7420);
        assert_eq!(config.send_timeout(), Duration::from_millis(250));
        assert_eq!(config.timer.tick_hz, 60);
        assert_eq!(config.timer.countdown_pause, CountdownPausePolicy::Failsafe);
        assert_eq!(config.flash.duration_ms, 500);
        assert_eq!(config.flash.color, Rgb::WHITE);
        assert!(config.companion.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1"
port = 9000
send_timeout_ms = 100

[timer]
tick_hz = 30
countdown_pause = "reset_to_idle"
show_hours = true

[flash]
style = "blink"
duration_ms = 800
color = { r = 255, g = 0, b = 0 }

[companion]
enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_address(), "127.0.0.1:9000");
        assert_eq!(config.send_timeout(), Duration::from_millis(100));
        assert_eq!(config.timer.tick_hz, 30);
        assert_eq!(
            config.timer.countdown_pause,
            CountdownPausePolicy::ResetToIdle
        );
        assert!(config.timer.show_hours);
        assert_eq!(config.flash.style, FlashStyle::Blink);
        assert_eq!(config.flash.color, Rgb::new(255, 0, 0));
        assert!(!config.companion.enabled);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());

        let config: Config = toml::from_str("[timer]\nshow_hours = true\n").unwrap();
        assert_eq!(config.timer.tick_hz, 60);
        assert!(config.timer.show_hours);
    }

    #[test]
    fn tick_interval_follows_rate() {
        let mut config = Config::default();
        config.timer.tick_hz = 50;
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn ipv6_bind_address_is_bracketed() {
        let mut config = Config::default();
        config.server.bind_address = "::".to_string();
        assert_eq!(config.listen_address(), "[::]:7420");
    }

    #[test]
    fn out_of_range_tick_rate_is_rejected() {
        let mut config = Config::default();
        config.timer.tick_hz = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
        config.timer.tick_hz = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_send_timeout_is_rejected() {
        let config: Config = toml::from_str("[server]\nsend_timeout_ms = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn unknown_flash_style_is_rejected() {
        let config: Config = toml::from_str("[flash]\nstyle = \"strobe\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rendered_toml_loads_back() {
        let rendered = Config::default().to_toml().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[timer\ntick_hz = ").unwrap();
        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
