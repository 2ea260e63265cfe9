//! Commands accepted by a GRBL-HAL controller
//!
//! Front ends either build a [`ControllerCommand`] directly or go through
//! [`ControllerCommand::parse`] with a name and whitespace-split arguments,
//! the way the console does for `:gcode:start 120`.

use halstream_core::data::LineContext;
use halstream_core::error::ControllerError;

use super::constants::RealtimeCommand;

/// Every operation the controller exposes
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    /// Load a program into the Sender
    GcodeLoad {
        name: String,
        gcode: String,
        context: LineContext,
    },
    GcodeUnload,
    /// Start streaming, optionally at a zero-based line
    GcodeStart { start_line: Option<usize> },
    /// Stop streaming; `force` halts the machine even when it looks idle
    GcodeStop { force: bool },
    GcodePause,
    GcodeResume,
    /// Queue lines on the Feeder
    Feed {
        lines: Vec<String>,
        context: LineContext,
    },
    FeederStart,
    FeederStop,
    FeedHold,
    CycleStart,
    /// `$H`, or `$H<axis>` for a single axis
    Homing { axis: Option<char> },
    Unlock,
    SoftReset,
    /// Reset after a limit trip, then unlock
    LimitReset,
    CheckMode,
    Sleep,
    /// Jog by the given words (`X10 F500`), relative
    JogStart { words: String },
    JogStop,
    JogCancel,
    Override(RealtimeCommand),
    /// Fire the spindle/laser at `power` percent of `max_power`
    LaserTestOn {
        power: f64,
        duration_ms: u64,
        max_power: Option<f64>,
    },
    LaserTestOff,
    MacroRun { id: String, context: LineContext },
    MacroLoad { id: String },
    ToolChangeContext(LineContext),
    ToolChangePre,
    ToolChangePost,
    ToolChangeAck,
    VirtualStopToggle,
    StatusComplete,
    SdMount,
    SdList,
    SdRun { file: String },
    /// Per-line time estimates in seconds
    Estimate(Vec<f64>),
}

impl ControllerCommand {
    /// Build a command from its name and arguments
    pub fn parse(name: &str, args: &[&str]) -> Result<Self, ControllerError> {
        let invalid = |reason: &str| ControllerError::InvalidArgument {
            command: name.to_string(),
            reason: reason.to_string(),
        };

        let command = match name {
            "gcode:load" => {
                let (program, lines) = args.split_first().ok_or_else(|| invalid("missing name"))?;
                ControllerCommand::GcodeLoad {
                    name: program.to_string(),
                    gcode: lines.join("\n"),
                    context: LineContext::new(),
                }
            }
            "gcode:unload" => ControllerCommand::GcodeUnload,
            "gcode:start" => {
                let start_line = match args.first() {
                    Some(arg) => {
                        let line: usize = arg.parse().map_err(|_| invalid("line must be a number"))?;
                        // Operators count from 1
                        line.checked_sub(1).filter(|index| *index > 0)
                    }
                    None => None,
                };
                ControllerCommand::GcodeStart { start_line }
            }
            "gcode:stop" => ControllerCommand::GcodeStop {
                force: args.iter().any(|arg| *arg == "force"),
            },
            "gcode:pause" => ControllerCommand::GcodePause,
            "gcode:resume" => ControllerCommand::GcodeResume,
            "gcode" | "feeder:feed" => {
                if args.is_empty() {
                    return Err(invalid("nothing to feed"));
                }
                ControllerCommand::Feed {
                    lines: vec![args.join(" ")],
                    context: LineContext::new(),
                }
            }
            "feeder:start" => ControllerCommand::FeederStart,
            "feeder:stop" => ControllerCommand::FeederStop,
            "feedhold" => ControllerCommand::FeedHold,
            "cyclestart" => ControllerCommand::CycleStart,
            "homing" => {
                let axis = match args.first() {
                    Some(arg) => {
                        let mut chars = arg.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) if "XYZABC".contains(c.to_ascii_uppercase()) => {
                                Some(c.to_ascii_uppercase())
                            }
                            _ => return Err(invalid("axis must be one of XYZABC")),
                        }
                    }
                    None => None,
                };
                ControllerCommand::Homing { axis }
            }
            "unlock" => ControllerCommand::Unlock,
            "reset" | "reset:soft" => ControllerCommand::SoftReset,
            "reset:limit" => ControllerCommand::LimitReset,
            "checkmode" => ControllerCommand::CheckMode,
            "sleep" => ControllerCommand::Sleep,
            "jog:start" => {
                if args.is_empty() {
                    return Err(invalid("no axes"));
                }
                let words = args.join(" ");
                if !words.to_ascii_uppercase().contains('F') {
                    return Err(invalid("jog needs a feed rate"));
                }
                ControllerCommand::JogStart { words }
            }
            "jog:stop" => ControllerCommand::JogStop,
            "jog:cancel" => ControllerCommand::JogCancel,
            "feedOverride" | "override:feed" => {
                let delta = signed(args).ok_or_else(|| invalid("expected 0, ±1 or ±10"))?;
                let command = RealtimeCommand::feed_override(delta)
                    .ok_or_else(|| invalid("expected 0, ±1 or ±10"))?;
                ControllerCommand::Override(command)
            }
            "spindleOverride" | "override:spindle" => {
                let delta = signed(args).ok_or_else(|| invalid("expected 0, ±1 or ±10"))?;
                let command = RealtimeCommand::spindle_override(delta)
                    .ok_or_else(|| invalid("expected 0, ±1 or ±10"))?;
                ControllerCommand::Override(command)
            }
            "rapidOverride" | "override:rapid" => {
                let percent = args
                    .first()
                    .and_then(|arg| arg.parse().ok())
                    .ok_or_else(|| invalid("expected 25, 50 or 100"))?;
                let command = RealtimeCommand::rapid_override(percent)
                    .ok_or_else(|| invalid("expected 25, 50 or 100"))?;
                ControllerCommand::Override(command)
            }
            "lasertest:on" => {
                let power: f64 = args
                    .first()
                    .and_then(|arg| arg.parse().ok())
                    .filter(|p: &f64| (0.0..=100.0).contains(p))
                    .ok_or_else(|| invalid("power must be 0-100"))?;
                let duration_ms = match args.get(1) {
                    Some(arg) => arg.parse().map_err(|_| invalid("bad duration"))?,
                    None => 0,
                };
                let max_power = match args.get(2) {
                    Some(arg) => Some(arg.parse().map_err(|_| invalid("bad maximum"))?),
                    None => None,
                };
                ControllerCommand::LaserTestOn {
                    power,
                    duration_ms,
                    max_power,
                }
            }
            "lasertest:off" => ControllerCommand::LaserTestOff,
            "macro:run" => {
                let (id, rest) = args.split_first().ok_or_else(|| invalid("missing macro id"))?;
                ControllerCommand::MacroRun {
                    id: id.to_string(),
                    context: parse_context(rest).map_err(|reason| invalid(&reason))?,
                }
            }
            "macro:load" => ControllerCommand::MacroLoad {
                id: args.first().ok_or_else(|| invalid("missing macro id"))?.to_string(),
            },
            "toolchange:context" => ControllerCommand::ToolChangeContext(
                parse_context(args).map_err(|reason| invalid(&reason))?,
            ),
            "toolchange:pre" => ControllerCommand::ToolChangePre,
            "toolchange:post" => ControllerCommand::ToolChangePost,
            "toolchange:ack" => ControllerCommand::ToolChangeAck,
            "virtualstop:toggle" => ControllerCommand::VirtualStopToggle,
            "status:complete" => ControllerCommand::StatusComplete,
            "sdcard:mount" => ControllerCommand::SdMount,
            "sdcard:list" => ControllerCommand::SdList,
            "sdcard:run" => ControllerCommand::SdRun {
                file: args.first().ok_or_else(|| invalid("missing file"))?.to_string(),
            },
            "gcode:estimate" => {
                let data = args
                    .iter()
                    .map(|arg| arg.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid("estimates must be numbers"))?;
                ControllerCommand::Estimate(data)
            }
            _ => {
                return Err(ControllerError::UnknownCommand {
                    command: name.to_string(),
                })
            }
        };
        Ok(command)
    }

    /// Name as used by [`ControllerCommand::parse`]
    pub fn name(&self) -> &'static str {
        match self {
            ControllerCommand::GcodeLoad { .. } => "gcode:load",
            ControllerCommand::GcodeUnload => "gcode:unload",
            ControllerCommand::GcodeStart { .. } => "gcode:start",
            ControllerCommand::GcodeStop { .. } => "gcode:stop",
            ControllerCommand::GcodePause => "gcode:pause",
            ControllerCommand::GcodeResume => "gcode:resume",
            ControllerCommand::Feed { .. } => "gcode",
            ControllerCommand::FeederStart => "feeder:start",
            ControllerCommand::FeederStop => "feeder:stop",
            ControllerCommand::FeedHold => "feedhold",
            ControllerCommand::CycleStart => "cyclestart",
            ControllerCommand::Homing { .. } => "homing",
            ControllerCommand::Unlock => "unlock",
            ControllerCommand::SoftReset => "reset",
            ControllerCommand::LimitReset => "reset:limit",
            ControllerCommand::CheckMode => "checkmode",
            ControllerCommand::Sleep => "sleep",
            ControllerCommand::JogStart { .. } => "jog:start",
            ControllerCommand::JogStop => "jog:stop",
            ControllerCommand::JogCancel => "jog:cancel",
            ControllerCommand::Override(_) => "override",
            ControllerCommand::LaserTestOn { .. } => "lasertest:on",
            ControllerCommand::LaserTestOff => "lasertest:off",
            ControllerCommand::MacroRun { .. } => "macro:run",
            ControllerCommand::MacroLoad { .. } => "macro:load",
            ControllerCommand::ToolChangeContext(_) => "toolchange:context",
            ControllerCommand::ToolChangePre => "toolchange:pre",
            ControllerCommand::ToolChangePost => "toolchange:post",
            ControllerCommand::ToolChangeAck => "toolchange:ack",
            ControllerCommand::VirtualStopToggle => "virtualstop:toggle",
            ControllerCommand::StatusComplete => "status:complete",
            ControllerCommand::SdMount => "sdcard:mount",
            ControllerCommand::SdList => "sdcard:list",
            ControllerCommand::SdRun { .. } => "sdcard:run",
            ControllerCommand::Estimate(_) => "gcode:estimate",
        }
    }
}

fn signed(args: &[&str]) -> Option<i32> {
    args.first()?.trim_start_matches('+').parse().ok()
}

/// `name=value` pairs into a line context
pub fn parse_context(args: &[&str]) -> Result<LineContext, String> {
    let mut context = LineContext::new();
    for arg in args {
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("'{}' is not name=value", arg))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", value))?;
        context.insert(name.trim().to_string(), value);
    }
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcode_start_line_is_one_based() {
        assert_eq!(
            ControllerCommand::parse("gcode:start", &["120"]),
            Ok(ControllerCommand::GcodeStart {
                start_line: Some(119)
            })
        );
        assert_eq!(
            ControllerCommand::parse("gcode:start", &["1"]),
            Ok(ControllerCommand::GcodeStart { start_line: None })
        );
        assert_eq!(
            ControllerCommand::parse("gcode:start", &[]),
            Ok(ControllerCommand::GcodeStart { start_line: None })
        );
        assert!(ControllerCommand::parse("gcode:start", &["abc"]).is_err());
    }

    #[test]
    fn test_overrides() {
        assert_eq!(
            ControllerCommand::parse("feedOverride", &["+10"]),
            Ok(ControllerCommand::Override(RealtimeCommand::FeedOverridePlusTen))
        );
        assert_eq!(
            ControllerCommand::parse("override:spindle", &["0"]),
            Ok(ControllerCommand::Override(RealtimeCommand::SpindleOverrideReset))
        );
        assert_eq!(
            ControllerCommand::parse("rapidOverride", &["50"]),
            Ok(ControllerCommand::Override(RealtimeCommand::RapidOverrideMedium))
        );
        assert!(ControllerCommand::parse("feedOverride", &["7"]).is_err());
    }

    #[test]
    fn test_feed_joins_args() {
        assert_eq!(
            ControllerCommand::parse("gcode", &["G0", "X1"]),
            Ok(ControllerCommand::Feed {
                lines: vec!["G0 X1".to_string()],
                context: LineContext::new()
            })
        );
        assert!(ControllerCommand::parse("gcode", &[]).is_err());
    }

    #[test]
    fn test_macro_context() {
        let command = ControllerCommand::parse("macro:run", &["probe", "depth=2.5"]).unwrap();
        match command {
            ControllerCommand::MacroRun { id, context } => {
                assert_eq!(id, "probe");
                assert_eq!(context.get("depth"), Some(&2.5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(ControllerCommand::parse("macro:run", &["probe", "depth"]).is_err());
    }

    #[test]
    fn test_jog_and_homing() {
        assert_eq!(
            ControllerCommand::parse("jog:start", &["X10", "F500"]),
            Ok(ControllerCommand::JogStart {
                words: "X10 F500".to_string()
            })
        );
        assert!(ControllerCommand::parse("jog:start", &["X10"]).is_err());
        assert_eq!(
            ControllerCommand::parse("homing", &["z"]),
            Ok(ControllerCommand::Homing { axis: Some('Z') })
        );
        assert!(ControllerCommand::parse("homing", &["Q"]).is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            ControllerCommand::parse("spindle:warp", &[]),
            Err(ControllerError::UnknownCommand {
                command: "spindle:warp".to_string()
            })
        );
    }

    #[test]
    fn test_names_round_trip() {
        for name in ["gcode:unload", "reset:limit", "sdcard:list", "toolchange:ack"] {
            let command = ControllerCommand::parse(name, &[]).unwrap();
            assert_eq!(command.name(), name);
        }
    }
}
