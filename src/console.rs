//! Interactive console: input parsing and event rendering.
//!
//! Input lines starting with `:` are named commands (`:gcode:start 10`,
//! `:homing Z`); `!`, `~` and `?` alone are realtime shortcuts; anything
//! else is queued on the Feeder as G-code.

use halstream_communication::firmware::grblhal::RealtimeCommand;
use halstream_communication::ControllerCommand;
use halstream_core::data::LineContext;
use halstream_core::event_bus::{
    AppEvent, ConnectionEvent, ControllerEvent, JobEvent, SerialEvent, WorkflowEvent,
};
use halstream_core::ControllerError;

/// What the operator typed
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(ControllerCommand),
    /// `:status`, answered locally from a snapshot
    Status,
    /// `:quit`
    Quit,
}

/// Parse one console line; `Ok(None)` for blank input
pub fn parse_input(line: &str) -> Result<Option<ConsoleInput>, ControllerError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let input = match line {
        "!" => ConsoleInput::Command(ControllerCommand::FeedHold),
        "~" => ConsoleInput::Command(ControllerCommand::CycleStart),
        "?" => ConsoleInput::Command(ControllerCommand::Override(RealtimeCommand::StatusReport)),
        _ => match line.strip_prefix(':') {
            Some(rest) => {
                let mut words = rest.split_whitespace();
                let name = words.next().unwrap_or_default();
                let args: Vec<&str> = words.collect();
                match name {
                    "quit" | "exit" => ConsoleInput::Quit,
                    "status" => ConsoleInput::Status,
                    _ => ConsoleInput::Command(ControllerCommand::parse(name, &args)?),
                }
            }
            None => ConsoleInput::Command(ControllerCommand::Feed {
                lines: vec![line.to_string()],
                context: LineContext::new(),
            }),
        },
    };
    Ok(Some(input))
}

/// Console text for an event; `None` hides it
///
/// State and settings snapshots are far too chatty for a terminal and raw
/// traffic is only shown when `echo` is set.
pub fn render(event: &AppEvent, echo: bool) -> Option<String> {
    match event {
        AppEvent::Serial(SerialEvent::Read { line, .. }) => {
            if echo && !line.starts_with('<') {
                Some(format!("< {}", line))
            } else {
                None
            }
        }
        AppEvent::Serial(SerialEvent::Write { data, .. }) => {
            echo.then(|| format!("> {}", data.trim_end()))
        }
        AppEvent::Controller(ControllerEvent::State { .. })
        | AppEvent::Controller(ControllerEvent::Settings { .. })
        | AppEvent::Job(JobEvent::SenderStatus { .. })
        | AppEvent::Job(JobEvent::FeederStatus { .. }) => None,
        AppEvent::Error(report) => Some(format!("!! {}", report)),
        AppEvent::Connection(ConnectionEvent::Error { .. }) => {
            Some(format!("!! {}", event.description()))
        }
        AppEvent::Workflow(WorkflowEvent::StateChanged { .. })
        | AppEvent::Job(_)
        | AppEvent::Controller(_)
        | AppEvent::Connection(_) => Some(format!("-- {}", event.description())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halstream_core::data::{ErrorKind, ErrorReport};

    #[test]
    fn test_named_commands() {
        assert_eq!(
            parse_input(":gcode:start 12").unwrap(),
            Some(ConsoleInput::Command(ControllerCommand::GcodeStart {
                start_line: Some(11)
            }))
        );
        assert_eq!(parse_input(":quit").unwrap(), Some(ConsoleInput::Quit));
        assert_eq!(parse_input(":status").unwrap(), Some(ConsoleInput::Status));
        assert!(parse_input(":warp 9").is_err());
    }

    #[test]
    fn test_gcode_and_shortcuts() {
        assert_eq!(parse_input("   ").unwrap(), None);
        assert_eq!(
            parse_input("!").unwrap(),
            Some(ConsoleInput::Command(ControllerCommand::FeedHold))
        );
        assert_eq!(
            parse_input("G0 X10").unwrap(),
            Some(ConsoleInput::Command(ControllerCommand::Feed {
                lines: vec!["G0 X10".to_string()],
                context: LineContext::new(),
            }))
        );
    }

    #[test]
    fn test_render_hides_chatter() {
        let status = AppEvent::Serial(SerialEvent::Read {
            port: "p".to_string(),
            line: "<Idle|MPos:0,0,0>".to_string(),
        });
        assert_eq!(render(&status, true), None);

        let ok = AppEvent::Serial(SerialEvent::Read {
            port: "p".to_string(),
            line: "ok".to_string(),
        });
        assert_eq!(render(&ok, false), None);
        assert_eq!(render(&ok, true).as_deref(), Some("< ok"));

        let error = AppEvent::Error(ErrorReport {
            kind: ErrorKind::Error,
            code: 20,
            description: "Unsupported command".to_string(),
            line: None,
            line_number: None,
            origin: None,
            controller: "p".to_string(),
        });
        assert_eq!(
            render(&error, false).as_deref(),
            Some("!! error:20 - Unsupported command")
        );
    }
}
