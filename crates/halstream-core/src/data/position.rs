//! Axis positions as reported by the firmware.
//!
//! Values are kept as the decimal strings the firmware sent so that the
//! reported precision survives untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::units::{decimal_places, format_fixed};

/// A machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
    /// A rotary axis
    A,
    /// B rotary axis
    B,
    /// C rotary axis
    C,
}

impl Axis {
    /// All axes in report order
    pub const ALL: [Axis; 6] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    /// Axis at a position in a comma-separated report
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Upper-case axis letter
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
            Axis::B => 'B',
            Axis::C => 'C',
        }
    }

    /// Axis for a letter, case-insensitive
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            'B' => Some(Axis::B),
            'C' => Some(Axis::C),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::from_letter(c).ok_or_else(|| format!("Unknown axis: {}", s)),
            _ => Err(format!("Unknown axis: {}", s)),
        }
    }
}

/// Per-axis position, each axis optional
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position {
    axes: BTreeMap<Axis, String>,
}

impl Position {
    /// Create an empty position
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated coordinate list, assigning axes in X, Y, Z, A, B, C order
    ///
    /// Returns `None` when any field is not numeric.
    pub fn parse_csv(csv: &str) -> Option<Self> {
        let mut axes = BTreeMap::new();
        for (index, field) in csv.split(',').enumerate() {
            let field = field.trim();
            field.parse::<f64>().ok()?;
            let axis = Axis::from_index(index)?;
            axes.insert(axis, field.to_string());
        }
        if axes.is_empty() {
            None
        } else {
            Some(Self { axes })
        }
    }

    /// Builder-style axis assignment
    pub fn with(mut self, axis: Axis, value: impl Into<String>) -> Self {
        self.axes.insert(axis, value.into());
        self
    }

    /// Set an axis value
    pub fn set(&mut self, axis: Axis, value: impl Into<String>) {
        self.axes.insert(axis, value.into());
    }

    /// Raw string value for an axis
    pub fn get(&self, axis: Axis) -> Option<&str> {
        self.axes.get(&axis).map(String::as_str)
    }

    /// Numeric value for an axis, `0.0` when absent or malformed
    pub fn value(&self, axis: Axis) -> f64 {
        self.get(axis)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    /// True when no axis is present
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of axes present
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// Iterate over present axes in order
    pub fn iter(&self) -> impl Iterator<Item = (Axis, &str)> {
        self.axes.iter().map(|(axis, value)| (*axis, value.as_str()))
    }

    /// Apply a signed offset to every axis of `self`
    ///
    /// Each derived field keeps the decimal digit count of the source field.
    /// Axes missing from `offset` are treated as zero.
    pub fn offset_by(&self, offset: &Position, sign: f64) -> Position {
        let axes = self
            .axes
            .iter()
            .map(|(axis, raw)| {
                let places = decimal_places(raw);
                let source = raw.parse::<f64>().unwrap_or(0.0);
                let derived = source + sign * offset.value(*axis);
                (*axis, format_fixed(derived, places))
            })
            .collect();
        Position { axes }
    }

    /// Machine position to work position: `wpos = mpos - wco`
    pub fn to_work(&self, wco: &Position) -> Position {
        self.offset_by(wco, -1.0)
    }

    /// Work position to machine position: `mpos = wpos + wco`
    pub fn to_machine(&self, wco: &Position) -> Position {
        self.offset_by(wco, 1.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .axes
            .iter()
            .map(|(axis, value)| format!("{}{}", axis, value))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_assigns_axes_in_order() {
        let pos = Position::parse_csv("1.000,2.000,3.000,90.0").expect("valid csv");
        assert_eq!(pos.get(Axis::X), Some("1.000"));
        assert_eq!(pos.get(Axis::Z), Some("3.000"));
        assert_eq!(pos.get(Axis::A), Some("90.0"));
        assert_eq!(pos.get(Axis::B), None);
        assert_eq!(pos.len(), 4);
    }

    #[test]
    fn test_parse_csv_rejects_garbage() {
        assert!(Position::parse_csv("1.0,abc,3").is_none());
        assert!(Position::parse_csv("").is_none());
        assert!(Position::parse_csv("1,2,3,4,5,6,7").is_none());
    }

    #[test]
    fn test_work_derivation_preserves_digits() {
        let mpos = Position::new().with(Axis::X, "1.250");
        let wco = Position::new().with(Axis::X, "0.5");
        let wpos = mpos.to_work(&wco);
        assert_eq!(wpos.get(Axis::X), Some("0.750"));
    }

    #[test]
    fn test_machine_derivation_missing_offset_axis() {
        let wpos = Position::parse_csv("10.00,-2.50,0.000").expect("valid csv");
        let wco = Position::parse_csv("1.00,1.00").expect("valid csv");
        let mpos = wpos.to_machine(&wco);
        assert_eq!(mpos.get(Axis::X), Some("11.00"));
        assert_eq!(mpos.get(Axis::Y), Some("-1.50"));
        assert_eq!(mpos.get(Axis::Z), Some("0.000"));
    }

    #[test]
    fn test_serializes_as_axis_map() {
        let pos = Position::new().with(Axis::X, "1.000").with(Axis::Z, "-2.5");
        let json = serde_json::to_string(&pos).expect("serializable");
        assert_eq!(json, r#"{"x":"1.000","z":"-2.5"}"#);
        let back: Position = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(back, pos);
    }

    #[test]
    fn test_axis_letters() {
        assert_eq!("y".parse::<Axis>(), Ok(Axis::Y));
        assert!("XY".parse::<Axis>().is_err());
        assert_eq!(Axis::from_letter('c'), Some(Axis::C));
        assert_eq!(Axis::A.to_string(), "A");
    }
}
