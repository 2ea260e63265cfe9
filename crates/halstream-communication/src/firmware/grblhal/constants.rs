//! GRBL-HAL realtime bytes and in-band directives.

/// Realtime command bytes, written immediately and never queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RealtimeCommand {
    /// `~`
    CycleStart = b'~',
    /// `!`
    FeedHold = b'!',
    /// `?`
    StatusReport = b'?',
    /// Ctrl-X
    SoftReset = 0x18,
    /// Cancel an active jog
    JogCancel = 0x85,
    /// Status report including all optional fields
    CompleteStatusReport = 0x87,
    /// Toggle virtual stop
    VirtualStopToggle = 0x88,
    /// Feed override to 100%
    FeedOverrideReset = 0x90,
    /// Feed override +10%
    FeedOverridePlusTen = 0x91,
    /// Feed override -10%
    FeedOverrideMinusTen = 0x92,
    /// Feed override +1%
    FeedOverridePlusOne = 0x93,
    /// Feed override -1%
    FeedOverrideMinusOne = 0x94,
    /// Rapid override to 100%
    RapidOverrideReset = 0x95,
    /// Rapid override to 50%
    RapidOverrideMedium = 0x96,
    /// Rapid override to 25%
    RapidOverrideLow = 0x97,
    /// Spindle override to 100%
    SpindleOverrideReset = 0x99,
    /// Spindle override +10%
    SpindleOverridePlusTen = 0x9A,
    /// Spindle override -10%
    SpindleOverrideMinusTen = 0x9B,
    /// Spindle override +1%
    SpindleOverridePlusOne = 0x9C,
    /// Spindle override -1%
    SpindleOverrideMinusOne = 0x9D,
    /// Acknowledge a tool change
    ToolChangeAck = 0xA3,
}

impl RealtimeCommand {
    /// The byte on the wire
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Printable rendering for logs and serial events
    pub fn display(self) -> String {
        let byte = self.byte();
        if byte.is_ascii_graphic() {
            (byte as char).to_string()
        } else {
            format!("0x{:02X}", byte)
        }
    }

    /// Feed override byte for a delta (0 resets)
    pub fn feed_override(delta: i32) -> Option<Self> {
        match delta {
            0 => Some(Self::FeedOverrideReset),
            10 => Some(Self::FeedOverridePlusTen),
            -10 => Some(Self::FeedOverrideMinusTen),
            1 => Some(Self::FeedOverridePlusOne),
            -1 => Some(Self::FeedOverrideMinusOne),
            _ => None,
        }
    }

    /// Spindle override byte for a delta (0 resets)
    pub fn spindle_override(delta: i32) -> Option<Self> {
        match delta {
            0 => Some(Self::SpindleOverrideReset),
            10 => Some(Self::SpindleOverridePlusTen),
            -10 => Some(Self::SpindleOverrideMinusTen),
            1 => Some(Self::SpindleOverridePlusOne),
            -1 => Some(Self::SpindleOverrideMinusOne),
            _ => None,
        }
    }

    /// Rapid override byte for a percentage
    pub fn rapid_override(percent: u32) -> Option<Self> {
        match percent {
            100 => Some(Self::RapidOverrideReset),
            50 => Some(Self::RapidOverrideMedium),
            25 => Some(Self::RapidOverrideLow),
            _ => None,
        }
    }
}

/// `%wait`: dwell until the planner drains
pub const WAIT: &str = "%wait";
/// Replacement for `%wait`
pub const WAIT_DWELL: &str = "G4 P0.5";
/// End of the tool-change pre-hook
pub const PREHOOK_COMPLETE: &str = "%pre_complete";
/// End of the tool-change post-hook
pub const POSTHOOK_COMPLETE: &str = "%toolchange_complete";
/// Pause the stream at this point
pub const PAUSE_START: &str = "%pause_start";
/// End of start-from-line catch-up code
pub const GCODE_START: &str = "%_GCODE_START";

/// Sequence fed once after the first idle status
pub const INIT_SEQUENCE: [&str; 6] = ["$I", "$ES", "$EG", "$EA", "$EE", "$$"];
