//! `<...>` status report parsing.

use halstream_core::data::{ActiveState, BufferState, Overrides, Position};
use serde::{Deserialize, Serialize};

use super::Frame;

/// Decoded status report; every field is optional on the wire
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Parsed state, `None` for unknown names
    pub active_state: Option<ActiveState>,
    /// State name as sent
    pub state_name: String,
    /// Sub-state (`Hold:0`, `Door:1`, `Alarm:3`)
    pub sub_state: Option<u32>,
    /// `MPos`
    pub mpos: Option<Position>,
    /// `WPos`
    pub wpos: Option<Position>,
    /// `WCO`
    pub wco: Option<Position>,
    /// `Bf` / `Buf`
    pub buf: Option<BufferState>,
    /// Feed from `FS` or `F`
    pub feedrate: Option<f64>,
    /// Spindle speed from `FS`
    pub spindle: Option<f64>,
    /// `Ov`
    pub ov: Option<Overrides>,
    /// `Pn`
    pub pins: Option<String>,
    /// `A`
    pub accessories: Option<String>,
    /// `Ln`
    pub line_number: Option<u32>,
    /// `T`
    pub tool: Option<u32>,
    /// `H` first field
    pub homed: Option<bool>,
}

/// Extract a field value from a status report by prefix (`MPos:` etc.)
pub fn extract_field<'a>(fields: &[&'a str], prefix: &str) -> Option<&'a str> {
    fields.iter().find_map(|field| field.strip_prefix(prefix))
}

/// Match `<State|Field:value|...>`
pub fn parse(line: &str) -> Option<Frame> {
    let body = line.strip_prefix('<')?.strip_suffix('>')?;
    let mut fields = body.split('|');
    let state_field = fields.next()?;
    let fields: Vec<&str> = fields.collect();

    let (state_name, sub_state) = match state_field.split_once(':') {
        Some((name, sub)) => (name, sub.trim().parse::<u32>().ok()),
        None => (state_field, None),
    };
    if state_name.is_empty() {
        return None;
    }

    let mut report = StatusReport {
        active_state: state_name.parse().ok(),
        state_name: state_name.to_string(),
        sub_state,
        ..Default::default()
    };

    report.mpos = extract_field(&fields, "MPos:").and_then(Position::parse_csv);
    report.wpos = extract_field(&fields, "WPos:").and_then(Position::parse_csv);
    report.wco = extract_field(&fields, "WCO:").and_then(Position::parse_csv);

    report.buf = extract_field(&fields, "Bf:")
        .or_else(|| extract_field(&fields, "Buf:"))
        .and_then(parse_buffer);

    if let Some(fs) = extract_field(&fields, "FS:") {
        let mut values = fs.split(',').map(|v| v.trim().parse::<f64>().ok());
        report.feedrate = values.next().flatten();
        report.spindle = values.next().flatten();
    } else if let Some(f) = extract_field(&fields, "F:") {
        report.feedrate = f.trim().parse().ok();
    }

    report.ov = extract_field(&fields, "Ov:").and_then(parse_overrides);
    report.pins = extract_field(&fields, "Pn:").map(str::to_string);
    report.accessories = extract_field(&fields, "A:").map(str::to_string);
    report.line_number = extract_field(&fields, "Ln:").and_then(|v| v.trim().parse().ok());
    report.tool = extract_field(&fields, "T:").and_then(|v| v.trim().parse().ok());
    report.homed = extract_field(&fields, "H:")
        .map(|v| v.split(',').next().is_some_and(|flag| flag.trim() == "1"));

    Some(Frame::Status(report))
}

fn parse_buffer(value: &str) -> Option<BufferState> {
    let (planner, rx) = value.split_once(',')?;
    Some(BufferState {
        planner: planner.trim().parse().ok()?,
        rx: rx.trim().parse().ok()?,
    })
}

fn parse_overrides(value: &str) -> Option<Overrides> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|v| v.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [feed, rapid, spindle, ..] => Some(Overrides {
            feed: *feed,
            rapid: *rapid,
            spindle: *spindle,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halstream_core::data::Axis;

    fn status(line: &str) -> StatusReport {
        match parse(line) {
            Some(Frame::Status(report)) => report,
            other => panic!("expected status for {}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_run_with_mpos_only() {
        let report = status("<Run|MPos:1.000,2.000,3.000|FS:500,1000>");
        assert_eq!(report.active_state, Some(ActiveState::Run));
        let mpos = report.mpos.expect("mpos");
        assert_eq!(mpos.get(Axis::X), Some("1.000"));
        assert_eq!(mpos.get(Axis::Z), Some("3.000"));
        assert!(report.wpos.is_none());
        assert_eq!(report.feedrate, Some(500.0));
        assert_eq!(report.spindle, Some(1000.0));
    }

    #[test]
    fn test_full_grblhal_report() {
        let report = status(
            "<Hold:1|WPos:0.000,-5.125,1.500,90.000|Bf:35,1023|FS:0,0|WCO:10.000,10.000,0.000,0.000|Ov:120,50,100|Pn:PXZ|A:SFM|T:3|H:1,7|Ln:42>",
        );
        assert_eq!(report.active_state, Some(ActiveState::Hold));
        assert_eq!(report.sub_state, Some(1));
        assert_eq!(report.wpos.as_ref().map(|p| p.len()), Some(4));
        assert_eq!(report.buf, Some(BufferState { planner: 35, rx: 1023 }));
        assert_eq!(
            report.ov,
            Some(Overrides {
                feed: 120,
                rapid: 50,
                spindle: 100
            })
        );
        assert_eq!(report.pins.as_deref(), Some("PXZ"));
        assert_eq!(report.accessories.as_deref(), Some("SFM"));
        assert_eq!(report.tool, Some(3));
        assert_eq!(report.homed, Some(true));
        assert_eq!(report.line_number, Some(42));
    }

    #[test]
    fn test_legacy_buffer_and_feed() {
        let report = status("<Idle|MPos:0.000,0.000,0.000|Buf:15,128|F:250>");
        assert_eq!(report.buf.map(|b| b.rx), Some(128));
        assert_eq!(report.feedrate, Some(250.0));
        assert_eq!(report.spindle, None);
    }

    #[test]
    fn test_unknown_state_still_matches() {
        let report = status("<Parking|MPos:0,0,0>");
        assert_eq!(report.active_state, None);
        assert_eq!(report.state_name, "Parking");
    }

    #[test]
    fn test_not_a_status_frame() {
        assert!(parse("<>").is_none());
        assert!(parse("[GC:G0]").is_none());
        assert!(parse("<Idle").is_none());
    }
}
