//! Configuration for halstream
//!
//! Configuration is organized into sections:
//! - Connection settings (serial port or TCP host)
//! - Streaming policy (buffer budget, polling and watchdog timings)
//! - Tool change strategy and hook G-code
//! - Rotary axis emulation
//! - Macros and event hooks
//!
//! Files are TOML or JSON, selected by extension.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, SettingsError};

/// Connection protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Serial/USB connection
    #[default]
    Serial,
    /// TCP/IP connection (telnet-style raw socket)
    Tcp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Transport
    pub connection_type: ConnectionType,
    /// Serial port path or TCP hostname
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// TCP port for network connections
    pub tcp_port: u16,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Serial,
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115200,
            tcp_port: 23,
            timeout_ms: 5000,
        }
    }
}

/// Streaming and polling policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Assumed firmware receive buffer in bytes
    pub rx_buffer_size: usize,
    /// Bytes kept free below the receive buffer
    pub buffer_margin: usize,
    /// Poll loop period
    pub poll_interval_ms: u64,
    /// Unanswered `?` is forgotten after this long
    pub status_query_timeout_ms: u64,
    /// Minimum spacing between `$G` queries
    pub parser_state_interval_ms: u64,
    /// Unanswered `$G` is forgotten after this long
    pub parser_state_timeout_ms: u64,
    /// Silence before the stall watchdog checks the Sender
    pub stall_timeout_ms: u64,
    /// Machine must stay idle this long after the last ack to complete a job
    pub completion_idle_ms: u64,
    /// Continue streaming past firmware errors
    pub ignore_errors: bool,
    /// M0/M1 only pause after this many program lines were sent
    pub program_pause_min_lines: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            rx_buffer_size: 128,
            buffer_margin: 8,
            poll_interval_ms: 250,
            status_query_timeout_ms: 5000,
            parser_state_interval_ms: 500,
            parser_state_timeout_ms: 10_000,
            stall_timeout_ms: 10_000,
            completion_idle_ms: 500,
            ignore_errors: false,
            program_pause_min_lines: 2,
        }
    }
}

impl StreamingSettings {
    /// Initial character-counting budget
    pub fn buffer_size(&self) -> usize {
        self.rx_buffer_size.saturating_sub(self.buffer_margin)
    }

    /// Poll loop period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Status query mask timeout
    pub fn status_query_timeout(&self) -> Duration {
        Duration::from_millis(self.status_query_timeout_ms)
    }

    /// `$G` throttle interval
    pub fn parser_state_interval(&self) -> Duration {
        Duration::from_millis(self.parser_state_interval_ms)
    }

    /// `$G` mask timeout
    pub fn parser_state_timeout(&self) -> Duration {
        Duration::from_millis(self.parser_state_timeout_ms)
    }

    /// Stall watchdog period
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Completion idle window
    pub fn completion_idle(&self) -> Duration {
        Duration::from_millis(self.completion_idle_ms)
    }
}

/// How `M6` is handled while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChangeOption {
    /// Comment out M6 and keep going
    #[default]
    Ignore,
    /// Comment out, pause, run pre/post hook G-code
    Code,
    /// Comment out, pause, wait for the operator
    Macro,
}

impl std::fmt::Display for ToolChangeOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::Code => write!(f, "code"),
            Self::Macro => write!(f, "macro"),
        }
    }
}

/// Tool change settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolChangeSettings {
    /// Strategy
    pub option: ToolChangeOption,
    /// G-code run by `toolchange:pre`
    pub pre_hook: String,
    /// G-code run by `toolchange:post`
    pub post_hook: String,
}

/// Rotary axis emulation (A words driven on the Y motor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RotarySettings {
    /// Rewrite A words to Y before sending
    pub enabled: bool,
}

/// A stored macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroDefinition {
    /// Identifier used by `macro:run`
    pub id: String,
    /// Display name
    pub name: String,
    /// G-code body, may contain `%` directives and `[expr]`
    pub content: String,
}

/// What an event hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HookTrigger {
    /// Feed the commands as G-code
    #[default]
    Gcode,
    /// Run the commands in the system shell
    System,
}

/// Commands bound to a controller event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHook {
    /// Event name (`gcode:start`, `feedhold`, ...)
    pub event: String,
    /// Hook is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// G-code or system command
    #[serde(default)]
    pub trigger: HookTrigger,
    /// Command text
    pub commands: String,
}

fn default_true() -> bool {
    true
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Streaming policy
    pub streaming: StreamingSettings,
    /// Tool change handling
    pub tool_change: ToolChangeSettings,
    /// Rotary emulation
    pub rotary: RotarySettings,
    /// Macros
    pub macros: Vec<MacroDefinition>,
    /// Event hooks
    pub event_hooks: Vec<EventHook>,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location (`<config dir>/halstream/config.toml`)
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("halstream").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no config or home directory".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match extension(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        self.validate()?;

        let content = match extension(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.baud_rate == 0 {
            return Err(out_of_range("connection.baud_rate", self.connection.baud_rate));
        }
        if self.connection.timeout_ms == 0 {
            return Err(out_of_range("connection.timeout_ms", self.connection.timeout_ms));
        }
        if self.streaming.buffer_size() == 0 {
            return Err(out_of_range(
                "streaming.buffer_margin",
                self.streaming.buffer_margin,
            ));
        }
        if self.streaming.poll_interval_ms == 0 {
            return Err(out_of_range(
                "streaming.poll_interval_ms",
                self.streaming.poll_interval_ms,
            ));
        }
        if self.streaming.stall_timeout_ms == 0 {
            return Err(out_of_range(
                "streaming.stall_timeout_ms",
                self.streaming.stall_timeout_ms,
            ));
        }
        for (index, m) in self.macros.iter().enumerate() {
            if m.id.trim().is_empty() {
                return Err(ConfigError::MissingKey(format!("macros[{}].id", index)));
            }
        }
        for (index, hook) in self.event_hooks.iter().enumerate() {
            if hook.event.trim().is_empty() {
                return Err(ConfigError::MissingKey(format!("event_hooks[{}].event", index)));
            }
        }
        Ok(())
    }

    /// Look up a macro by id
    pub fn find_macro(&self, id: &str) -> Option<&MacroDefinition> {
        self.macros.iter().find(|m| m.id == id)
    }
}

enum Format {
    Json,
    Toml,
}

fn extension(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

fn out_of_range(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.streaming.buffer_size(), 120);
        assert_eq!(config.streaming.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.tool_change.option, ToolChangeOption::Ignore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            [connection]
            connection_type = "tcp"
            port = "10.0.0.5"

            [tool_change]
            option = "code"
            pre_hook = "G91 G0 Z10"

            [[macros]]
            id = "probe"
            name = "Probe Z"
            content = "G38.2 Z-20 F100"
        "#;
        let config: Config = toml::from_str(text).expect("valid toml");
        assert_eq!(config.connection.connection_type, ConnectionType::Tcp);
        assert_eq!(config.connection.tcp_port, 23);
        assert_eq!(config.tool_change.option, ToolChangeOption::Code);
        assert_eq!(config.tool_change.post_hook, "");
        assert_eq!(config.streaming.program_pause_min_lines, 2);
        assert_eq!(
            config.find_macro("probe").map(|m| m.name.as_str()),
            Some("Probe Z")
        );
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = Config::default();
        config.streaming.buffer_margin = 128;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unnamed_hook() {
        let mut config = Config::default();
        config.event_hooks.push(EventHook {
            event: " ".to_string(),
            enabled: true,
            trigger: HookTrigger::System,
            commands: "true".to_string(),
        });
        assert!(matches!(config.validate(), Err(ConfigError::MissingKey(_))));
    }
}
