//! Durable controller settings collected over the life of a connection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::position::Position;

/// `$10` bit enabling automatic parser-state reports
pub const PARSER_STATE_AUTO_REPORT_BIT: u32 = 1 << 9;

/// Firmware identification
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Firmware name from the startup banner (`GrblHAL`)
    pub firmware: String,
    /// Version string (`1.1f`)
    pub version: String,
    /// Numeric build date from `[VER:...]` (`20230610`)
    pub build: Option<u64>,
}

/// Value of a `[NAME:...]` parameter frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parameter {
    /// Coordinate system or stored position (G54..G59.3, G28, G30, G92)
    Coordinates {
        /// Stored position
        position: Position,
    },
    /// Tool length offset
    ToolLengthOffset {
        /// Offset value
        value: String,
    },
    /// Last probe result
    Probe {
        /// Probed position
        position: Position,
        /// Probe made contact
        success: bool,
    },
}

/// Tool table row
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolEntry {
    /// Per-axis offsets
    pub offsets: Position,
    /// Tool radius
    pub radius: String,
}

/// Setting group from `[SETTINGGROUP:...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingGroup {
    /// Group id
    pub id: u32,
    /// Parent group id
    pub parent: u32,
    /// Display label
    pub label: String,
}

/// Setting metadata from `[SETTING:...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingDescription {
    /// Setting number
    pub id: u32,
    /// Owning group id
    pub group: u32,
    /// Display label
    pub label: String,
    /// Unit label
    pub unit: String,
    /// Firmware data type code
    pub data_type: u32,
    /// Format hint or enumeration
    pub format: String,
    /// Minimum value, if bounded
    pub min: String,
    /// Maximum value, if bounded
    pub max: String,
}

/// Alarm or error code description from `[ALARMCODE:...]` / `[ERRORCODE:...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDescription {
    /// Numeric code
    pub code: u32,
    /// Short name, may be empty
    pub name: String,
    /// Description text
    pub description: String,
}

/// Spindle entry from `[SPINDLE:...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpindleInfo {
    /// Spindle number
    pub id: u32,
    /// Driver label
    pub label: String,
    /// Spindle is the active one
    pub enabled: bool,
}

/// Durable controller settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Firmware version
    pub version: FirmwareVersion,
    /// `$n` setting values keyed by `$n`
    pub settings: BTreeMap<String, String>,
    /// Coordinate systems, TLO and probe results
    pub parameters: BTreeMap<String, Parameter>,
    /// Setting groups
    pub groups: BTreeMap<u32, SettingGroup>,
    /// Setting descriptions
    pub descriptions: BTreeMap<u32, SettingDescription>,
    /// Alarm code descriptions
    pub alarms: BTreeMap<u32, CodeDescription>,
    /// Error code descriptions
    pub errors: BTreeMap<u32, CodeDescription>,
    /// Tool table
    pub tool_table: BTreeMap<u32, ToolEntry>,
    /// Build info (`[OPT:...]`, `[NEWOPT:...]`, `[DRIVER:...]`, ...)
    pub info: BTreeMap<String, String>,
    /// Spindles
    pub spindles: BTreeMap<u32, SpindleInfo>,
}

impl ControllerSettings {
    /// Value of a `$n` setting; accepts `"$13"` or `"13"`
    pub fn setting(&self, name: &str) -> Option<&str> {
        let key = if name.starts_with('$') {
            name.to_string()
        } else {
            format!("${}", name)
        };
        self.settings.get(&key).map(String::as_str)
    }

    /// Numeric value of a `$n` setting
    pub fn setting_f64(&self, name: &str) -> Option<f64> {
        self.setting(name).and_then(|v| v.trim().parse().ok())
    }

    /// Firmware sends `[GC:...]` on its own (`$10` bit 9)
    pub fn parser_state_auto_report(&self) -> bool {
        self.setting("$10")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .is_some_and(|mask| mask & PARSER_STATE_AUTO_REPORT_BIT != 0)
    }

    /// Positions are reported in inches (`$13=1`)
    pub fn report_inches(&self) -> bool {
        self.setting("$13").is_some_and(|v| v.trim() == "1")
    }

    /// A `$$` dump has been received
    pub fn is_loaded(&self) -> bool {
        !self.settings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_lookup_accepts_both_forms() {
        let mut settings = ControllerSettings::default();
        settings.settings.insert("$13".to_string(), "1".to_string());
        assert_eq!(settings.setting("13"), Some("1"));
        assert_eq!(settings.setting("$13"), Some("1"));
        assert!(settings.report_inches());
        assert!(settings.is_loaded());
    }

    #[test]
    fn test_parser_state_auto_report_bit() {
        let mut settings = ControllerSettings::default();
        assert!(!settings.parser_state_auto_report());
        settings.settings.insert("$10".to_string(), "511".to_string());
        assert!(!settings.parser_state_auto_report());
        settings.settings.insert("$10".to_string(), "513".to_string());
        assert!(settings.parser_state_auto_report());
    }
}
