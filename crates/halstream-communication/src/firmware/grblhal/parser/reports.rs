//! Acknowledgements, parameter, settings and information frames.

use halstream_core::data::{Axis, Parameter, Position, SdFile, SpindleInfo, ToolEntry};
use regex::Regex;
use std::sync::OnceLock;

use super::Frame;

static SETTING_REGEX: OnceLock<Regex> = OnceLock::new();
static STARTUP_REGEX: OnceLock<Regex> = OnceLock::new();
static INFO_REGEX: OnceLock<Regex> = OnceLock::new();

const COORDINATE_PARAMETERS: [&str; 12] = [
    "G54", "G55", "G56", "G57", "G58", "G59", "G59.1", "G59.2", "G59.3", "G28", "G30", "G92",
];

/// Match `ok`
pub fn parse_ok(line: &str) -> Option<Frame> {
    (line == "ok").then_some(Frame::Ok)
}

/// Match `error:N`
pub fn parse_error(line: &str) -> Option<Frame> {
    let code = line.strip_prefix("error:")?.trim().parse().ok()?;
    Some(Frame::Error { code })
}

/// Match `ALARM:N`
pub fn parse_alarm(line: &str) -> Option<Frame> {
    let rest = line.strip_prefix("ALARM:")?;
    let code = rest.split('|').next()?.trim().parse().ok()?;
    Some(Frame::Alarm { code })
}

/// Match `[G54:x,y,z]`, `[TLO:z]` and `[PRB:x,y,z:1]`
pub fn parse_parameters(line: &str) -> Option<Frame> {
    let body = line.strip_prefix('[')?.strip_suffix(']')?;
    let (name, value) = body.split_once(':')?;

    let parameter = if COORDINATE_PARAMETERS.contains(&name) {
        Parameter::Coordinates {
            position: Position::parse_csv(value)?,
        }
    } else if name == "TLO" {
        value.split(',').next()?.trim().parse::<f64>().ok()?;
        Parameter::ToolLengthOffset {
            value: value.trim().to_string(),
        }
    } else if name == "PRB" {
        let (coords, flag) = value.rsplit_once(':')?;
        Parameter::Probe {
            position: Position::parse_csv(coords)?,
            success: flag.trim() == "1",
        }
    } else {
        return None;
    };

    Some(Frame::Parameter {
        name: name.to_string(),
        value: parameter,
    })
}

/// Match `[T:n|x,y,z|radius]`
pub fn parse_tool(line: &str) -> Option<Frame> {
    let body = line.strip_prefix("[T:")?.strip_suffix(']')?;
    let mut parts = body.split('|');
    let id = parts.next()?.trim().parse().ok()?;
    let offsets = Position::parse_csv(parts.next()?)?;
    let radius = parts.next().unwrap_or("0").trim().to_string();
    Some(Frame::Tool {
        id,
        entry: ToolEntry { offsets, radius },
    })
}

/// Match `[MSG:...]` and `[echo:...]`
pub fn parse_feedback(line: &str) -> Option<Frame> {
    let body = line.strip_suffix(']')?;
    let message = body
        .strip_prefix("[MSG:")
        .or_else(|| body.strip_prefix("[echo:"))?;
    Some(Frame::Feedback {
        message: message.to_string(),
    })
}

/// Match `$130=500.000`
pub fn parse_setting(line: &str) -> Option<Frame> {
    let regex = SETTING_REGEX.get_or_init(|| {
        Regex::new(r"^\$([A-Za-z0-9_]+)=(.*)$").expect("invalid setting regex")
    });
    let captures = regex.captures(line)?;
    Some(Frame::Setting {
        name: format!("${}", &captures[1]),
        value: captures[2].trim().to_string(),
    })
}

/// Match `GrblHAL 1.1f ['$' or '$HELP' for help]`
pub fn parse_startup(line: &str) -> Option<Frame> {
    let regex = STARTUP_REGEX.get_or_init(|| {
        Regex::new(r"^(GrblHAL|Grbl)\s+(\d+\.\d+[a-z]?)\s*(.*)$").expect("invalid startup regex")
    });
    let captures = regex.captures(line)?;
    Some(Frame::Startup {
        firmware: captures[1].to_string(),
        version: captures[2].to_string(),
        message: captures[3].trim().to_string(),
    })
}

/// Match `[AXS:3:XYZ]`
pub fn parse_axes(line: &str) -> Option<Frame> {
    let body = line.strip_prefix("[AXS:")?.strip_suffix(']')?;
    let (count, letters) = body.split_once(':')?;
    let count = count.trim().parse().ok()?;
    let axes = letters.chars().filter_map(Axis::from_letter).collect();
    Some(Frame::Axes { count, axes })
}

/// Match `[FILE:/name.nc|SIZE:1234]`
pub fn parse_sdcard(line: &str) -> Option<Frame> {
    let body = line.strip_prefix("[FILE:")?.strip_suffix(']')?;
    let (name, size) = body.split_once("|SIZE:")?;
    Some(Frame::SdFile(SdFile {
        name: name.to_string(),
        size: size.trim().parse().ok()?,
    }))
}

/// Match `[SPINDLE:id|label|enabled]`
pub fn parse_spindle(line: &str) -> Option<Frame> {
    let body = line.strip_prefix("[SPINDLE:")?.strip_suffix(']')?;
    let mut parts = body.split('|');
    let id = parts.next()?.trim().parse().ok()?;
    let label = parts.next().unwrap_or_default().trim().to_string();
    let enabled = matches!(parts.next().map(str::trim), Some("1") | Some("*"));
    Some(Frame::Spindle(SpindleInfo { id, label, enabled }))
}

/// Match any remaining `[KEY:VALUE]` information line (`[VER:...]`, `[OPT:...]`, ...)
pub fn parse_info(line: &str) -> Option<Frame> {
    let regex = INFO_REGEX.get_or_init(|| {
        Regex::new(r"^\[([A-Z][A-Z0-9 ]*):(.*)\]$").expect("invalid info regex")
    });
    let captures = regex.captures(line)?;
    Some(Frame::Info {
        key: captures[1].to_string(),
        value: captures[2].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use halstream_core::data::Axis;

    #[test]
    fn test_acknowledgements() {
        assert_eq!(parse_ok("ok"), Some(Frame::Ok));
        assert_eq!(parse_ok("okay"), None);
        assert_eq!(parse_error("error:22"), Some(Frame::Error { code: 22 }));
        assert_eq!(parse_error("error:x"), None);
        assert_eq!(parse_alarm("ALARM:1"), Some(Frame::Alarm { code: 1 }));
    }

    #[test]
    fn test_parameter_frames() {
        match parse_parameters("[G54:-100.000,-50.000,-20.000]") {
            Some(Frame::Parameter {
                name,
                value: Parameter::Coordinates { position },
            }) => {
                assert_eq!(name, "G54");
                assert_eq!(position.get(Axis::Y), Some("-50.000"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_parameters("[PRB:1.000,2.000,-3.250:1]") {
            Some(Frame::Parameter {
                value: Parameter::Probe { position, success },
                ..
            }) => {
                assert!(success);
                assert_eq!(position.get(Axis::Z), Some("-3.250"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse_parameters("[TLO:1.500]"),
            Some(Frame::Parameter {
                name: "TLO".to_string(),
                value: Parameter::ToolLengthOffset {
                    value: "1.500".to_string()
                }
            })
        );
        assert!(parse_parameters("[MSG:hello]").is_none());
        assert!(parse_parameters("[G54:a,b,c]").is_none());
    }

    #[test]
    fn test_tool_frame() {
        match parse_tool("[T:4|0.000,0.000,-12.700|1.588]") {
            Some(Frame::Tool { id, entry }) => {
                assert_eq!(id, 4);
                assert_eq!(entry.offsets.get(Axis::Z), Some("-12.700"));
                assert_eq!(entry.radius, "1.588");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_tool("[TLO:0.000]").is_none());
    }

    #[test]
    fn test_feedback_and_settings() {
        assert_eq!(
            parse_feedback("[MSG:Reset to continue]"),
            Some(Frame::Feedback {
                message: "Reset to continue".to_string()
            })
        );
        assert_eq!(
            parse_setting("$130=500.000"),
            Some(Frame::Setting {
                name: "$130".to_string(),
                value: "500.000".to_string()
            })
        );
        assert!(parse_setting("$$").is_none());
    }

    #[test]
    fn test_startup_banner() {
        assert_eq!(
            parse_startup("GrblHAL 1.1f ['$' or '$HELP' for help]"),
            Some(Frame::Startup {
                firmware: "GrblHAL".to_string(),
                version: "1.1f".to_string(),
                message: "['$' or '$HELP' for help]".to_string(),
            })
        );
        assert!(parse_startup("Grbl").is_none());
    }

    #[test]
    fn test_info_axes_sdcard_spindle() {
        assert_eq!(
            parse_axes("[AXS:4:XYZA]"),
            Some(Frame::Axes {
                count: 4,
                axes: vec![Axis::X, Axis::Y, Axis::Z, Axis::A]
            })
        );
        assert_eq!(
            parse_sdcard("[FILE:/jobs/part.nc|SIZE:2048]"),
            Some(Frame::SdFile(SdFile {
                name: "/jobs/part.nc".to_string(),
                size: 2048
            }))
        );
        assert_eq!(
            parse_spindle("[SPINDLE:1|PWM2|*]"),
            Some(Frame::Spindle(SpindleInfo {
                id: 1,
                label: "PWM2".to_string(),
                enabled: true
            }))
        );
        assert_eq!(
            parse_info("[NVS STORAGE:*FLASH]"),
            Some(Frame::Info {
                key: "NVS STORAGE".to_string(),
                value: "*FLASH".to_string()
            })
        );
        assert!(parse_info("[echo:G0]").is_none());
    }
}
