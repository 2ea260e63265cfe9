//! GRBL-HAL line parser registry
//!
//! Every inbound line is offered to an ordered list of matchers. Each matcher
//! is a pure function that either recognizes one frame shape or declines;
//! the first match wins and nothing is retried. Lines no matcher accepts
//! become [`Frame::Unrecognized`] so they are still observable downstream.

pub mod descriptions;
pub mod parser_state;
pub mod reports;
pub mod status;

pub use descriptions::Description;
pub use parser_state::ParserStateReport;
pub use status::StatusReport;

use halstream_core::data::{Axis, Parameter, SdFile, SpindleInfo, ToolEntry};

/// One decoded wire frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `<Idle|MPos:...>`
    Status(StatusReport),
    /// `ok`
    Ok,
    /// `error:N`
    Error { code: u32 },
    /// `ALARM:N`
    Alarm { code: u32 },
    /// `[GC:...]`
    ParserState(ParserStateReport),
    /// `[G54:...]`, `[TLO:...]`, `[PRB:...]`
    Parameter { name: String, value: Parameter },
    /// `[T:...]`
    Tool { id: u32, entry: ToolEntry },
    /// `[MSG:...]`, `[echo:...]`
    Feedback { message: String },
    /// `$n=value`
    Setting { name: String, value: String },
    /// Startup banner
    Startup {
        firmware: String,
        version: String,
        message: String,
    },
    /// `[AXS:n:XYZ]`
    Axes { count: usize, axes: Vec<Axis> },
    /// `$ES`/`$EG`/`$EA`/`$EE` rows
    Description(Description),
    /// `[FILE:...|SIZE:...]`
    SdFile(SdFile),
    /// `[SPINDLE:...]`
    Spindle(SpindleInfo),
    /// Any other `[KEY:VALUE]`
    Info { key: String, value: String },
    /// Nothing matched
    Unrecognized { raw: String },
}

impl Frame {
    /// Short frame name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Status(_) => "status",
            Frame::Ok => "ok",
            Frame::Error { .. } => "error",
            Frame::Alarm { .. } => "alarm",
            Frame::ParserState(_) => "parserstate",
            Frame::Parameter { .. } => "parameters",
            Frame::Tool { .. } => "tool",
            Frame::Feedback { .. } => "feedback",
            Frame::Setting { .. } => "settings",
            Frame::Startup { .. } => "startup",
            Frame::Axes { .. } => "axes",
            Frame::Description(_) => "description",
            Frame::SdFile(_) => "sdcard",
            Frame::Spindle(_) => "spindle",
            Frame::Info { .. } => "info",
            Frame::Unrecognized { .. } => "others",
        }
    }
}

type Matcher = fn(&str) -> Option<Frame>;

/// Matchers in priority order
const MATCHERS: [Matcher; 15] = [
    status::parse,
    reports::parse_ok,
    reports::parse_error,
    reports::parse_alarm,
    parser_state::parse,
    reports::parse_parameters,
    reports::parse_tool,
    reports::parse_feedback,
    reports::parse_setting,
    reports::parse_startup,
    reports::parse_axes,
    descriptions::parse,
    reports::parse_sdcard,
    reports::parse_spindle,
    reports::parse_info,
];

/// Decode one line; surrounding whitespace is ignored
pub fn parse_line(line: &str) -> Frame {
    let line = line.trim();
    MATCHERS
        .iter()
        .find_map(|matcher| matcher(line))
        .unwrap_or_else(|| Frame::Unrecognized {
            raw: line.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table() {
        let cases = [
            ("<Idle|MPos:0.000,0.000,0.000|FS:0,0>", "status"),
            ("ok", "ok"),
            ("error:9", "error"),
            ("ALARM:2", "alarm"),
            ("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]", "parserstate"),
            ("[G92:0.000,0.000,0.000]", "parameters"),
            ("[PRB:0.000,0.000,-1.000:1]", "parameters"),
            ("[T:1|0.000,0.000,0.000|0.000]", "tool"),
            ("[MSG:Caution: Unlocked]", "feedback"),
            ("$10=511", "settings"),
            ("GrblHAL 1.1f ['$' or '$HELP' for help]", "startup"),
            ("[AXS:3:XYZ]", "axes"),
            ("[SETTING:0|1|Step pulse time|microseconds|6|#0.0|2.0|]", "description"),
            ("[FILE:/a.nc|SIZE:10]", "sdcard"),
            ("[SPINDLE:0|PWM|*]", "spindle"),
            ("[VER:1.1f.20230610:]", "info"),
            ("[OPT:VNMSL,35,1024,3,0]", "info"),
            ("Hello world", "others"),
        ];
        for (line, kind) in cases {
            assert_eq!(parse_line(line).kind(), kind, "line {}", line);
        }
    }

    #[test]
    fn test_trimmed_before_matching() {
        assert_eq!(parse_line("  ok\r"), Frame::Ok);
    }

    #[test]
    fn test_unrecognized_keeps_raw() {
        assert_eq!(
            parse_line("garbage"),
            Frame::Unrecognized {
                raw: "garbage".to_string()
            }
        );
    }

    #[test]
    fn test_alarm_not_mistaken_for_status() {
        assert_eq!(parse_line("ALARM:9"), Frame::Alarm { code: 9 });
        assert!(matches!(parse_line("<Alarm:1|MPos:0,0,0>"), Frame::Status(_)));
    }
}
