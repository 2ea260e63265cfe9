//! G-code modal groups and word classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::units::MeasurementSystem;

/// A modal group tracked by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalGroup {
    /// G0, G1, G2, G3, G38.x, G80
    Motion,
    /// G54 - G59.3
    Wcs,
    /// G17, G18, G19
    Plane,
    /// G20, G21
    Units,
    /// G90, G91
    Distance,
    /// G91.1
    Arc,
    /// G93, G94, G95
    Feedrate,
    /// G40
    Cutter,
    /// G43.1, G49
    Tlo,
    /// M0, M1, M2, M30
    Program,
    /// M3, M4, M5
    Spindle,
    /// M7, M8, M9
    Coolant,
}

impl ModalGroup {
    /// Classify a normalized word such as `G1`, `G38.2` or `M8`
    ///
    /// Leading zeros in the number are ignored, so `G01` is `G1`.
    pub fn classify(word: &str) -> Option<ModalGroup> {
        let normalized = normalize_word(word)?;
        let group = match normalized.as_str() {
            "G0" | "G1" | "G2" | "G3" | "G38.2" | "G38.3" | "G38.4" | "G38.5" | "G80" | "G33" => {
                ModalGroup::Motion
            }
            "G54" | "G55" | "G56" | "G57" | "G58" | "G59" | "G59.1" | "G59.2" | "G59.3" => {
                ModalGroup::Wcs
            }
            "G17" | "G18" | "G19" => ModalGroup::Plane,
            "G20" | "G21" => ModalGroup::Units,
            "G90" | "G91" => ModalGroup::Distance,
            "G91.1" => ModalGroup::Arc,
            "G93" | "G94" | "G95" => ModalGroup::Feedrate,
            "G40" => ModalGroup::Cutter,
            "G43.1" | "G49" => ModalGroup::Tlo,
            "M0" | "M1" | "M2" | "M30" => ModalGroup::Program,
            "M3" | "M4" | "M5" => ModalGroup::Spindle,
            "M7" | "M8" | "M9" => ModalGroup::Coolant,
            _ => return None,
        };
        Some(group)
    }
}

impl fmt::Display for ModalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModalGroup::Motion => "motion",
            ModalGroup::Wcs => "wcs",
            ModalGroup::Plane => "plane",
            ModalGroup::Units => "units",
            ModalGroup::Distance => "distance",
            ModalGroup::Arc => "arc",
            ModalGroup::Feedrate => "feedrate",
            ModalGroup::Cutter => "cutter",
            ModalGroup::Tlo => "tlo",
            ModalGroup::Program => "program",
            ModalGroup::Spindle => "spindle",
            ModalGroup::Coolant => "coolant",
        };
        write!(f, "{}", name)
    }
}

/// Upper-case a word and strip leading zeros from its number (`g01` -> `G1`)
pub fn normalize_word(word: &str) -> Option<String> {
    let word = word.trim();
    let mut chars = word.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if !letter.is_ascii_alphabetic() {
        return None;
    }
    let number = chars.as_str();
    if number.is_empty() {
        return None;
    }
    let (int_part, frac_part) = match number.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (number, None),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    Some(match frac_part {
        Some(frac) if !frac.trim_end_matches('0').is_empty() => {
            format!("{}{}.{}", letter, int_part, frac.trim_end_matches('0'))
        }
        _ => format!("{}{}", letter, int_part),
    })
}

/// Active modal words, one per group except coolant
///
/// Coolant may carry two simultaneous words joined by a comma (`"M7,M8"`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModalState {
    /// Motion mode
    pub motion: String,
    /// Work coordinate system
    pub wcs: String,
    /// Plane selection
    pub plane: String,
    /// Units mode
    pub units: String,
    /// Distance mode
    pub distance: String,
    /// Arc IJK distance mode
    pub arc: String,
    /// Feed rate mode
    pub feedrate: String,
    /// Cutter radius compensation
    pub cutter: String,
    /// Tool length offset mode
    pub tlo: String,
    /// Program flow
    pub program: String,
    /// Spindle state
    pub spindle: String,
    /// Coolant state
    pub coolant: String,
}

impl ModalState {
    /// Current word for a group, empty when unknown
    pub fn get(&self, group: ModalGroup) -> &str {
        match group {
            ModalGroup::Motion => &self.motion,
            ModalGroup::Wcs => &self.wcs,
            ModalGroup::Plane => &self.plane,
            ModalGroup::Units => &self.units,
            ModalGroup::Distance => &self.distance,
            ModalGroup::Arc => &self.arc,
            ModalGroup::Feedrate => &self.feedrate,
            ModalGroup::Cutter => &self.cutter,
            ModalGroup::Tlo => &self.tlo,
            ModalGroup::Program => &self.program,
            ModalGroup::Spindle => &self.spindle,
            ModalGroup::Coolant => &self.coolant,
        }
    }

    /// Replace the word for a group
    pub fn set(&mut self, group: ModalGroup, value: impl Into<String>) {
        let value = value.into();
        match group {
            ModalGroup::Motion => self.motion = value,
            ModalGroup::Wcs => self.wcs = value,
            ModalGroup::Plane => self.plane = value,
            ModalGroup::Units => self.units = value,
            ModalGroup::Distance => self.distance = value,
            ModalGroup::Arc => self.arc = value,
            ModalGroup::Feedrate => self.feedrate = value,
            ModalGroup::Cutter => self.cutter = value,
            ModalGroup::Tlo => self.tlo = value,
            ModalGroup::Program => self.program = value,
            ModalGroup::Spindle => self.spindle = value,
            ModalGroup::Coolant => self.coolant = value,
        }
    }

    /// Measurement system from the units group
    pub fn measurement_system(&self) -> MeasurementSystem {
        MeasurementSystem::from_modal(&self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_word() {
        assert_eq!(normalize_word("g01").as_deref(), Some("G1"));
        assert_eq!(normalize_word("G38.20").as_deref(), Some("G38.2"));
        assert_eq!(normalize_word("M30").as_deref(), Some("M30"));
        assert_eq!(normalize_word("G0.0").as_deref(), Some("G0"));
        assert_eq!(normalize_word("X"), None);
        assert_eq!(normalize_word("9X"), None);
    }

    #[test]
    fn test_classify_words() {
        assert_eq!(ModalGroup::classify("G0"), Some(ModalGroup::Motion));
        assert_eq!(ModalGroup::classify("G59.1"), Some(ModalGroup::Wcs));
        assert_eq!(ModalGroup::classify("G91.1"), Some(ModalGroup::Arc));
        assert_eq!(ModalGroup::classify("M08"), Some(ModalGroup::Coolant));
        assert_eq!(ModalGroup::classify("G4"), None);
        assert_eq!(ModalGroup::classify("T1"), None);
    }

    #[test]
    fn test_modal_state_units() {
        let mut modal = ModalState::default();
        modal.set(ModalGroup::Units, "G20");
        assert_eq!(modal.measurement_system(), MeasurementSystem::Imperial);
        assert_eq!(modal.get(ModalGroup::Units), "G20");
    }
}
