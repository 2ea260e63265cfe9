//! Transient controller state folded from status and parser-state frames.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::modal::ModalState;
use super::position::{Axis, Position};

/// Firmware active state from the status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveState {
    /// Ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold in progress or complete
    Hold,
    /// Jogging
    Jog,
    /// Locked out by an alarm
    Alarm,
    /// Safety door open
    Door,
    /// Check mode ($C)
    Check,
    /// Homing cycle
    Home,
    /// Sleep mode
    Sleep,
    /// Waiting for a tool change
    Tool,
}

impl ActiveState {
    /// Name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveState::Idle => "Idle",
            ActiveState::Run => "Run",
            ActiveState::Hold => "Hold",
            ActiveState::Jog => "Jog",
            ActiveState::Alarm => "Alarm",
            ActiveState::Door => "Door",
            ActiveState::Check => "Check",
            ActiveState::Home => "Home",
            ActiveState::Sleep => "Sleep",
            ActiveState::Tool => "Tool",
        }
    }

    /// States in which the machine is moving or about to move
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            ActiveState::Run | ActiveState::Hold | ActiveState::Jog | ActiveState::Home
        )
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActiveState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(ActiveState::Idle),
            "run" => Ok(ActiveState::Run),
            "hold" => Ok(ActiveState::Hold),
            "jog" => Ok(ActiveState::Jog),
            "alarm" => Ok(ActiveState::Alarm),
            "door" => Ok(ActiveState::Door),
            "check" => Ok(ActiveState::Check),
            "home" => Ok(ActiveState::Home),
            "sleep" => Ok(ActiveState::Sleep),
            "tool" => Ok(ActiveState::Tool),
            _ => Err(format!("Unknown active state: {}", s)),
        }
    }
}

/// Override percentages (feed, rapid, spindle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Feed override percent
    pub feed: u32,
    /// Rapid override percent
    pub rapid: u32,
    /// Spindle override percent
    pub spindle: u32,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

/// Planner and serial receive buffer availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks
    pub planner: u32,
    /// Free bytes in the serial receive buffer
    pub rx: u32,
}

/// Folded machine status
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Active state, `None` until the first status report
    pub active_state: Option<ActiveState>,
    /// Sub-state code (`Hold:1`, `Door:2`)
    pub sub_state: Option<u32>,
    /// Last alarm code
    pub alarm_code: Option<u32>,
    /// Machine position
    pub mpos: Position,
    /// Work position
    pub wpos: Position,
    /// Work coordinate offset
    pub wco: Position,
    /// Override percentages
    pub ov: Overrides,
    /// Buffer availability
    pub buf: Option<BufferState>,
    /// Current feed rate
    pub feedrate: f64,
    /// Current spindle speed
    pub spindle: f64,
    /// Active input pins (`Pn:`)
    pub pins: String,
    /// Accessory state (`A:`)
    pub accessories: String,
    /// Executing line number (`Ln:`)
    pub line_number: Option<u32>,
    /// Probe input triggered
    pub probe_active: bool,
    /// Tool currently in the spindle
    pub current_tool: u32,
    /// Machine has completed a homing cycle
    pub has_homed: bool,
}

/// Modal state reported by `$G`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParserState {
    /// Active modal words
    pub modal: ModalState,
    /// Selected tool
    pub tool: u32,
    /// Programmed feed rate
    pub feedrate: String,
    /// Programmed spindle speed
    pub spindle: String,
}

/// Axis count and letters from `[AXS:...]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxesInfo {
    /// Number of axes
    pub count: usize,
    /// Axis letters
    pub axes: Vec<Axis>,
}

/// A file on the controller SD card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdFile {
    /// File name including path
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// SD card state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SdCard {
    /// Card is mounted
    pub mounted: bool,
    /// Known files, unique by name
    pub files: Vec<SdFile>,
}

impl SdCard {
    /// Insert or replace a file entry by name
    pub fn upsert(&mut self, file: SdFile) {
        self.mounted = true;
        match self.files.iter_mut().find(|f| f.name == file.name) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }
}

/// Transient controller state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerState {
    /// Machine status
    pub status: MachineStatus,
    /// Parser state
    pub parserstate: ParserState,
    /// Axis information
    pub axes: AxesInfo,
    /// SD card
    pub sdcard: SdCard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_state_parse() {
        assert_eq!("Idle".parse::<ActiveState>(), Ok(ActiveState::Idle));
        assert_eq!("tool".parse::<ActiveState>(), Ok(ActiveState::Tool));
        assert!("Running".parse::<ActiveState>().is_err());
        assert!(ActiveState::Jog.is_motion());
        assert!(!ActiveState::Idle.is_motion());
    }

    #[test]
    fn test_sdcard_upsert_replaces_by_name() {
        let mut card = SdCard::default();
        card.upsert(SdFile {
            name: "/a.nc".to_string(),
            size: 10,
        });
        card.upsert(SdFile {
            name: "/a.nc".to_string(),
            size: 20,
        });
        card.upsert(SdFile {
            name: "/b.nc".to_string(),
            size: 5,
        });
        assert!(card.mounted);
        assert_eq!(card.files.len(), 2);
        assert_eq!(card.files[0].size, 20);
    }
}
