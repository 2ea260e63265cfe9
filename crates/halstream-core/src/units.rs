//! Unit and number formatting utilities
//!
//! Firmware reports coordinates as decimal strings whose precision depends
//! on `$13` (report inches) and the build. Derived values keep the digit
//! count of the field they came from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimeters per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Measurement system selected by the G20/G21 modal group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementSystem {
    /// Metric system (mm, G21)
    #[default]
    Metric,
    /// Imperial system (inches, G20)
    Imperial,
}

impl MeasurementSystem {
    /// Resolve from a units modal word (`G20` or `G21`)
    pub fn from_modal(word: &str) -> Self {
        if word.eq_ignore_ascii_case("G20") {
            Self::Imperial
        } else {
            Self::Metric
        }
    }
}

impl fmt::Display for MeasurementSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "Metric"),
            Self::Imperial => write!(f, "Imperial"),
        }
    }
}

impl FromStr for MeasurementSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" | "mm" | "g21" => Ok(Self::Metric),
            "imperial" | "inch" | "in" | "g20" => Ok(Self::Imperial),
            _ => Err(format!("Unknown measurement system: {}", s)),
        }
    }
}

/// Number of digits after the decimal point in a numeric string
///
/// `"1.250"` has 3, `"-4"` has 0.
pub fn decimal_places(value: &str) -> usize {
    value
        .trim()
        .split_once('.')
        .map(|(_, frac)| frac.chars().take_while(|c| c.is_ascii_digit()).count())
        .unwrap_or(0)
}

/// Format a value with a fixed number of decimal places
pub fn format_fixed(value: f64, places: usize) -> String {
    let formatted = format!("{:.*}", places, value);
    // Avoid "-0.000" after rounding
    if formatted.starts_with('-') && formatted[1..].chars().all(|c| c == '0' || c == '.') {
        formatted[1..].to_string()
    } else {
        formatted
    }
}

/// Format a value with at most `max_places` decimals, trimming trailing zeros
pub fn format_trimmed(value: f64, max_places: usize) -> String {
    let fixed = format_fixed(value, max_places);
    if !fixed.contains('.') {
        return fixed;
    }
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
