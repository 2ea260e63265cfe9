//! GRBL-HAL error and alarm descriptions
//!
//! The firmware publishes its own tables through `$EE`/`$EA`; those win when
//! present. The built-in tables cover controllers that never answered.

use halstream_core::data::{ControllerSettings, ErrorKind};

const ERRORS: &[(u32, &str)] = &[
    (1, "Expected command letter. G-code words consist of a letter and a value."),
    (2, "Bad number format. Missing the expected G-code word value or numeric format is invalid."),
    (3, "Invalid statement. '$' system command was not recognized or supported."),
    (4, "Value < 0. Negative value received for an expected positive value."),
    (5, "Homing disabled. Homing cycle failure, homing is not enabled via settings."),
    (6, "Value < 3 usec. Minimum step pulse time must be greater than 3 usec."),
    (7, "EEPROM read fail. Using defaults."),
    (8, "Not idle. '$' command cannot be used unless the controller is idle."),
    (9, "G-code lock. G-code commands are locked out during alarm or jog state."),
    (10, "Homing not enabled. Soft limits cannot be enabled without homing also enabled."),
    (11, "Line overflow. Max characters per line exceeded, line was not executed."),
    (12, "Step rate > 30 kHz. Setting value exceeds the maximum step rate supported."),
    (13, "Check door. Safety door detected as opened and door state initiated."),
    (14, "Line length exceeded. Build info or startup line exceeded the storage line length limit."),
    (15, "Travel exceeded. Jog target exceeds machine travel, jog command has been ignored."),
    (16, "Invalid jog command. Jog command has no '=' or contains prohibited G-code."),
    (17, "Setting disabled. Laser mode requires PWM output."),
    (18, "Reset asserted."),
    (20, "Unsupported command. Unsupported or invalid G-code command found in block."),
    (21, "Modal group violation. More than one G-code command from the same modal group found in block."),
    (22, "Undefined feed rate. Feed rate has not yet been set or is undefined."),
    (23, "Invalid G-code. G-code command in block requires an integer value."),
    (24, "Invalid G-code. More than one G-code command that requires axis words found in block."),
    (25, "Invalid G-code. Repeated G-code word found in block."),
    (26, "Invalid G-code. No axis words found in block for G-code command or current modal state which requires them."),
    (27, "Invalid line number. Line number value is invalid."),
    (28, "Invalid G-code. G-code command is missing a required value word."),
    (29, "Invalid G-code. G59.x work coordinate systems are not supported."),
    (30, "Invalid G-code. G53 only allowed with G0 and G1 motion modes."),
    (31, "Invalid G-code. Axis words found in block when no command or current modal state uses them."),
    (32, "Invalid G-code. G2 and G3 arcs require at least one in-plane axis word."),
    (33, "Invalid motion target. Motion command target is invalid."),
    (34, "Invalid arc radius. Arc radius value is invalid."),
    (35, "Invalid G-code. G2 and G3 arcs require at least one in-plane offset word."),
    (36, "Invalid G-code. Unused value words found in block."),
    (37, "Invalid G-code. G43.1 dynamic tool length offset is not assigned to the configured tool length axis."),
    (38, "Invalid tool number. Tool number greater than max supported value."),
    (39, "Parameter P greater than max."),
    (40, "Invalid G-code. G2 and G3 arcs with G17/G18/G19 plane must have all three words present."),
    (41, "Spindle not running."),
    (42, "Illegal homing configuration."),
    (43, "Coordinate system is locked."),
    (44, "Unexpected data. Invalid G-code words in block."),
    (45, "Setting value is out of range."),
    (46, "Invalid tool change. Tool change is not permitted."),
    (50, "Request arguments illegal."),
    (60, "SD card mount failed."),
    (61, "SD card file open or read failed."),
    (62, "SD card directory listing failed."),
    (63, "SD card directory not found."),
    (64, "SD card file empty."),
    (70, "Bluetooth initialisation failed."),
];

const ALARMS: &[(u32, &str)] = &[
    (1, "Hard limit triggered. Machine position is likely lost due to sudden halt. Re-homing is highly recommended."),
    (2, "Soft limit alarm. G-code motion target exceeds machine travel. Machine position retained. Alarm may be safely unlocked."),
    (3, "Reset while in motion. Machine position is likely lost due to sudden halt. Re-homing is highly recommended."),
    (4, "Probe fail. Probe is not in the expected initial state before starting probe cycle."),
    (5, "Probe fail. Probe did not contact the workpiece within the programmed travel."),
    (6, "Homing fail. The active homing cycle was reset."),
    (7, "Homing fail. Safety door was opened during homing cycle."),
    (8, "Homing fail. Pull off travel failed to clear limit switch. Try increasing pull-off setting or check wiring."),
    (9, "Homing fail. Could not find limit switch within search distances."),
    (10, "EStop asserted. Clear and reset."),
    (11, "Homing required. Execute homing command ($H) to continue."),
    (12, "Limit switch engaged. Clear before continuing."),
    (13, "Probe protection triggered. Clear before continuing."),
    (14, "Spindle at speed timeout. Clear before continuing."),
    (15, "Homing fail. Could not find second limit switch for auto squared axis."),
    (16, "Power on selftest (POS) failed."),
    (17, "Motor fault."),
];

fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, text)| *text)
}

/// Built-in description of an error code
pub fn decode_error(code: u32) -> String {
    lookup(ERRORS, code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown error code: {}", code))
}

/// Built-in description of an alarm code
pub fn decode_alarm(code: u32) -> String {
    lookup(ALARMS, code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown alarm code: {}", code))
}

/// Description for an error or alarm, preferring the firmware's own table
pub fn describe(kind: ErrorKind, code: u32, settings: &ControllerSettings) -> String {
    let reported = match kind {
        ErrorKind::Error => settings.errors.get(&code),
        ErrorKind::Alarm => settings.alarms.get(&code),
    };
    match reported {
        Some(entry) if !entry.description.is_empty() => entry.description.clone(),
        Some(entry) if !entry.name.is_empty() => entry.name.clone(),
        _ => match kind {
            ErrorKind::Error => decode_error(code),
            ErrorKind::Alarm => decode_alarm(code),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halstream_core::data::CodeDescription;

    #[test]
    fn test_builtin_tables() {
        assert!(decode_error(22).starts_with("Undefined feed rate"));
        assert!(decode_alarm(1).starts_with("Hard limit"));
        assert_eq!(decode_error(250), "Unknown error code: 250");
        assert_eq!(decode_alarm(99), "Unknown alarm code: 99");
    }

    #[test]
    fn test_firmware_table_wins() {
        let mut settings = ControllerSettings::default();
        settings.errors.insert(
            22,
            CodeDescription {
                code: 22,
                name: "Undefined feed rate".to_string(),
                description: "Feed rate has not yet been set or is undefined.".to_string(),
            },
        );
        assert_eq!(
            describe(ErrorKind::Error, 22, &settings),
            "Feed rate has not yet been set or is undefined."
        );
        assert!(describe(ErrorKind::Alarm, 2, &settings).starts_with("Soft limit"));
    }
}
