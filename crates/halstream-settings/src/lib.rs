//! halstream Settings Crate
//!
//! Handles configuration loading, validation and persistence.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, ConnectionType, EventHook, HookTrigger, MacroDefinition,
    RotarySettings, StreamingSettings, ToolChangeOption, ToolChangeSettings,
};
pub use error::{ConfigError, SettingsError};
