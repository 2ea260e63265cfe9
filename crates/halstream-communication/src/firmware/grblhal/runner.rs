//! GRBL-HAL protocol state machine
//!
//! The runner decodes inbound lines through the parser registry and folds
//! each frame into two structures: transient [`ControllerState`] and durable
//! [`ControllerSettings`]. Each frame updates only the fields it carries,
//! and the change flags report whether anything actually differed, so
//! consumers can rely on them instead of comparing snapshots themselves.

use std::collections::BTreeMap;

use halstream_core::data::{
    ActiveState, AxesInfo, Axis, ControllerSettings, ControllerState, MachineStatus, ModalGroup,
    ModalState, Parameter, ParserState, Position,
};

use super::parser::{parse_line, Description, Frame, ParserStateReport, StatusReport};

/// One decoded line and what it changed
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerEvent {
    /// Decoded frame
    pub frame: Frame,
    /// `state` was replaced
    pub state_changed: bool,
    /// `settings` was replaced
    pub settings_changed: bool,
}

impl RunnerEvent {
    fn unchanged(frame: Frame) -> Self {
        Self {
            frame,
            state_changed: false,
            settings_changed: false,
        }
    }
}

/// Folds GRBL-HAL frames into controller state and settings
#[derive(Debug, Default)]
pub struct Runner {
    state: ControllerState,
    settings: ControllerSettings,
    state_revision: u64,
    settings_revision: u64,
}

impl Runner {
    /// Create a runner with empty state and settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and fold every line in `data`, in arrival order
    pub fn parse(&mut self, data: &str) -> Vec<RunnerEvent> {
        data.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                tracing::trace!("runner < {}", line);
                let frame = parse_line(line);
                self.fold(frame)
            })
            .collect()
    }

    /// Fold one decoded frame
    pub fn fold(&mut self, frame: Frame) -> RunnerEvent {
        let (state_changed, settings_changed) = match &frame {
            Frame::Ok | Frame::Error { .. } | Frame::Feedback { .. } => (false, false),
            Frame::Status(report) => {
                let status = self.next_status(report);
                (update(&mut self.state.status, status), false)
            }
            Frame::Alarm { code } => (update(&mut self.state.status.alarm_code, Some(*code)), false),
            Frame::ParserState(report) => {
                let parserstate = next_parser_state(report, &self.state.parserstate);
                let mut changed = update(&mut self.state.parserstate, parserstate);
                if let Some(tool) = report.tool {
                    changed |= update(&mut self.state.status.current_tool, tool);
                }
                (changed, false)
            }
            Frame::Parameter { name, value } => (false, self.fold_parameter(name, value)),
            Frame::Tool { id, entry } => (false, insert(&mut self.settings.tool_table, *id, entry)),
            Frame::Setting { name, value } => {
                (false, insert(&mut self.settings.settings, name.clone(), value))
            }
            Frame::Startup {
                firmware, version, ..
            } => {
                let info = &mut self.settings.version;
                let changed = update(&mut info.firmware, firmware.clone())
                    | update(&mut info.version, version.clone());
                (false, changed)
            }
            Frame::Axes { count, axes } => {
                let axes = AxesInfo {
                    count: *count,
                    axes: axes.clone(),
                };
                (update(&mut self.state.axes, axes), false)
            }
            Frame::Description(description) => {
                let settings = &mut self.settings;
                let changed = match description {
                    Description::Setting(d) => insert(&mut settings.descriptions, d.id, d),
                    Description::Group(g) => insert(&mut settings.groups, g.id, g),
                    Description::Alarm(d) => insert(&mut settings.alarms, d.code, d),
                    Description::Error(d) => insert(&mut settings.errors, d.code, d),
                };
                (false, changed)
            }
            Frame::SdFile(file) => {
                let mut sdcard = self.state.sdcard.clone();
                sdcard.upsert(file.clone());
                (update(&mut self.state.sdcard, sdcard), false)
            }
            Frame::Spindle(spindle) => {
                (false, insert(&mut self.settings.spindles, spindle.id, spindle))
            }
            Frame::Info { key, value } => {
                let build = self.settings.version.build;
                let previous = self.settings.info.get(key.as_str()).cloned();
                fold_info(&mut self.settings, key, value);
                let changed = build != self.settings.version.build
                    || previous.as_ref() != self.settings.info.get(key.as_str());
                (false, changed)
            }
            Frame::Unrecognized { raw } => {
                tracing::debug!("Unrecognized line: {}", raw);
                (false, false)
            }
        };

        if state_changed {
            self.state_revision += 1;
        }
        if settings_changed {
            self.settings_revision += 1;
        }
        RunnerEvent {
            frame,
            state_changed,
            settings_changed,
        }
    }

    fn fold_parameter(&mut self, name: &str, value: &Parameter) -> bool {
        let mut changed = insert(&mut self.settings.parameters, name.to_string(), value);
        if let Parameter::Probe { position, success } = value {
            let tool = self.state.status.current_tool;
            // Tool 0 is "no tool"; its entry is never touched by a probe
            if tool > 0 && *success {
                if let Some(z) = position.get(Axis::Z) {
                    let entry = self.settings.tool_table.entry(tool).or_default();
                    if entry.offsets.get(Axis::Z) != Some(z) {
                        entry.offsets.set(Axis::Z, z);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    fn next_status(&self, report: &StatusReport) -> MachineStatus {
        let previous = &self.state.status;
        let mut status = previous.clone();

        status.active_state = report.active_state;
        status.sub_state = report.sub_state;
        status.alarm_code = match report.active_state {
            Some(ActiveState::Alarm) => report.sub_state.or(previous.alarm_code),
            _ => None,
        };

        if let Some(wco) = &report.wco {
            status.wco = wco.clone();
        }
        match (&report.mpos, &report.wpos) {
            (Some(mpos), Some(wpos)) => {
                status.mpos = mpos.clone();
                status.wpos = wpos.clone();
            }
            (Some(mpos), None) => {
                status.mpos = mpos.clone();
                status.wpos = mpos.to_work(&status.wco);
            }
            (None, Some(wpos)) => {
                status.wpos = wpos.clone();
                status.mpos = wpos.to_machine(&status.wco);
            }
            (None, None) => {}
        }

        if let Some(ov) = report.ov {
            status.ov = ov;
            // Accessories are only reported alongside overrides
            status.accessories = report.accessories.clone().unwrap_or_default();
        } else if let Some(accessories) = &report.accessories {
            status.accessories = accessories.clone();
        }
        if report.buf.is_some() {
            status.buf = report.buf;
        }
        if let Some(feedrate) = report.feedrate {
            status.feedrate = feedrate;
        }
        if let Some(spindle) = report.spindle {
            status.spindle = spindle;
        }
        status.pins = report.pins.clone().unwrap_or_default();
        status.probe_active = status.pins.contains('P');
        status.line_number = report.line_number;
        if let Some(tool) = report.tool {
            status.current_tool = tool;
        }
        if let Some(homed) = report.homed {
            status.has_homed = homed;
        }

        status
    }

    fn commit_state(&mut self, state: ControllerState) -> bool {
        if state == self.state {
            return false;
        }
        self.state = state;
        self.state_revision += 1;
        true
    }

    fn commit_settings(&mut self, settings: ControllerSettings) -> bool {
        if settings == self.settings {
            return false;
        }
        self.settings = settings;
        self.settings_revision += 1;
        true
    }

    /// Synthesize an `ok`; used to resynchronize after a lost acknowledgement
    pub fn force_ok(&self) -> RunnerEvent {
        tracing::warn!("Forcing ok to resynchronize the stream");
        RunnerEvent::unchanged(Frame::Ok)
    }

    /// Write a setting into the local cache ahead of the firmware echo
    pub fn set_setting(&mut self, name: &str, value: &str) -> bool {
        let key = if name.starts_with('$') {
            name.to_string()
        } else {
            format!("${}", name)
        };
        let changed = insert(&mut self.settings.settings, key, &value.to_string());
        if changed {
            self.settings_revision += 1;
        }
        changed
    }

    /// Drop all state and settings (connection closed)
    pub fn reset(&mut self) {
        self.commit_state(ControllerState::default());
        self.commit_settings(ControllerSettings::default());
    }

    /// Current transient state
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Current durable settings
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Incremented on every committed state change
    pub fn state_revision(&self) -> u64 {
        self.state_revision
    }

    /// Incremented on every committed settings change
    pub fn settings_revision(&self) -> u64 {
        self.settings_revision
    }

    pub fn active_state(&self) -> Option<ActiveState> {
        self.state.status.active_state
    }

    pub fn machine_position(&self) -> &Position {
        &self.state.status.mpos
    }

    pub fn work_position(&self) -> &Position {
        &self.state.status.wpos
    }

    pub fn modal_state(&self) -> &ModalState {
        &self.state.parserstate.modal
    }

    /// Active word for a modal group, empty when unknown
    pub fn modal_group(&self, group: ModalGroup) -> &str {
        self.state.parserstate.modal.get(group)
    }

    /// Tool selected in the parser state, 0 when unknown
    pub fn tool(&self) -> u32 {
        self.state.parserstate.tool
    }

    /// A stored parameter (`G54`, `TLO`, `PRB`, ...)
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.settings.parameters.get(name)
    }

    pub fn is_alarm(&self) -> bool {
        self.active_state() == Some(ActiveState::Alarm)
    }

    pub fn is_check(&self) -> bool {
        self.active_state() == Some(ActiveState::Check)
    }

    pub fn is_idle(&self) -> bool {
        self.active_state() == Some(ActiveState::Idle)
    }
}

fn next_parser_state(report: &ParserStateReport, previous: &ParserState) -> ParserState {
    let mut modal = ModalState::default();
    for (group, words) in &report.groups {
        let value = if *group == ModalGroup::Coolant {
            words.join(",")
        } else {
            words.last().cloned().unwrap_or_default()
        };
        modal.set(*group, value);
    }
    ParserState {
        modal,
        tool: report.tool.unwrap_or(previous.tool),
        feedrate: report
            .feedrate
            .clone()
            .unwrap_or_else(|| previous.feedrate.clone()),
        spindle: report
            .spindle
            .clone()
            .unwrap_or_else(|| previous.spindle.clone()),
    }
}

/// Assign `value` to `slot`; true when it differed
fn update<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Insert into a table; true when the entry was new or different
fn insert<K: Ord, V: Clone + PartialEq>(map: &mut BTreeMap<K, V>, key: K, value: &V) -> bool {
    map.insert(key, value.clone()).as_ref() != Some(value)
}

fn fold_info(settings: &mut ControllerSettings, key: &str, value: &str) {
    match key {
        "VER" => {
            // `1.1f.20230610:` or `1.1f.20230610:Some board`
            let version = value.split(':').next().unwrap_or_default();
            settings.version.build = version
                .split('.')
                .filter_map(|part| part.parse::<u64>().ok())
                .find(|n| *n > 19_000_000);
            settings.info.insert(key.to_string(), value.to_string());
        }
        "PLUGIN" => {
            let plugins = settings.info.entry(key.to_string()).or_default();
            let known = plugins.split(',').any(|p| p == value);
            if !known {
                if !plugins.is_empty() {
                    plugins.push(',');
                }
                plugins.push_str(value);
            }
        }
        _ => {
            settings.info.insert(key.to_string(), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revisions_only_move_on_change() {
        let mut runner = Runner::new();
        runner.parse("<Idle|MPos:0.000,0.000,0.000|FS:0,0>");
        runner.parse("$13=0");
        let (state, settings) = (runner.state_revision(), runner.settings_revision());

        let events = runner.parse("ok\n<Idle|MPos:0.000,0.000,0.000|FS:0,0>\n$13=0\n[MSG:hello]");
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| !e.state_changed && !e.settings_changed));
        assert_eq!(runner.state_revision(), state);
        assert_eq!(runner.settings_revision(), settings);

        assert!(runner.parse("$13=1")[0].settings_changed);
        assert_eq!(runner.settings_revision(), settings + 1);
        assert!(!runner.set_setting("13", "1"));
    }

    #[test]
    fn test_status_with_mpos_only() {
        let mut runner = Runner::new();
        let events = runner.parse("<Run|MPos:1.000,2.000,3.000|FS:500,1000>");
        assert_eq!(events.len(), 1);
        assert!(events[0].state_changed);
        assert_eq!(runner.active_state(), Some(ActiveState::Run));
        assert_eq!(runner.machine_position().get(Axis::X), Some("1.000"));
        assert_eq!(runner.machine_position().get(Axis::Z), Some("3.000"));
        // no wco yet: work position equals machine position
        assert_eq!(runner.work_position().get(Axis::Y), Some("2.000"));
        assert_eq!(runner.state().status.feedrate, 500.0);
    }

    #[test]
    fn test_wpos_derived_with_source_precision() {
        let mut runner = Runner::new();
        runner.parse("<Idle|MPos:0.000,0.000,0.000|WCO:0.5,0,0>");
        runner.parse("<Idle|MPos:1.250,0.000,0.000>");
        assert_eq!(runner.work_position().get(Axis::X), Some("0.750"));

        runner.parse("<Idle|WPos:2.00,1.00,0.00>");
        assert_eq!(runner.machine_position().get(Axis::X), Some("2.50"));
    }

    #[test]
    fn test_identical_status_is_not_committed_twice() {
        let mut runner = Runner::new();
        let line = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";
        let first = runner.parse(line);
        let revision = runner.state_revision();
        let second = runner.parse(line);
        assert!(first[0].state_changed);
        assert!(!second[0].state_changed);
        assert_eq!(first[0].frame, second[0].frame);
        assert_eq!(runner.state_revision(), revision);
    }

    #[test]
    fn test_modal_exclusivity_and_coolant() {
        let mut runner = Runner::new();
        runner.parse("[GC:G1 G0 G54 G17 G21 G90 G94 M3 M7 M8 T2 F100 S1000]");
        assert_eq!(runner.modal_group(ModalGroup::Motion), "G0");
        assert_eq!(runner.modal_group(ModalGroup::Coolant), "M7,M8");
        assert_eq!(runner.modal_group(ModalGroup::Spindle), "M3");
        assert_eq!(runner.tool(), 2);
        assert_eq!(runner.state().status.current_tool, 2);

        runner.parse("[GC:G0 G54 G17 G20 G90 G94 M5 M9 T2 F0 S0]");
        assert_eq!(runner.modal_group(ModalGroup::Units), "G20");
        assert_eq!(runner.modal_group(ModalGroup::Coolant), "M9");
    }

    #[test]
    fn test_probe_updates_tool_table_only_with_tool() {
        let mut runner = Runner::new();
        runner.parse("[PRB:0.000,0.000,-7.250:1]");
        assert!(runner.settings().tool_table.is_empty());
        assert!(runner.parameter("PRB").is_some());

        runner.parse("<Idle|MPos:0.000,0.000,0.000|T:3>");
        runner.parse("[PRB:0.000,0.000,-7.250:1]");
        assert_eq!(
            runner.settings().tool_table[&3].offsets.get(Axis::Z),
            Some("-7.250")
        );
    }

    #[test]
    fn test_failed_probe_leaves_tool_table() {
        let mut runner = Runner::new();
        runner.parse("<Idle|MPos:0.000,0.000,0.000|T:1>");
        runner.parse("[PRB:0.000,0.000,-7.250:0]");
        assert!(runner.settings().tool_table.is_empty());
    }

    #[test]
    fn test_settings_and_info() {
        let mut runner = Runner::new();
        let events = runner.parse("$10=511\n$13=0\n[VER:1.1f.20230610:]\n[PLUGIN:SDCARD]\n[PLUGIN:Keypad]");
        assert_eq!(events.len(), 5);
        assert!(events[0].settings_changed);
        assert_eq!(runner.settings().setting("10"), Some("511"));
        assert_eq!(runner.settings().version.build, Some(20230610));
        assert_eq!(runner.settings().info["PLUGIN"], "SDCARD,Keypad");
    }

    #[test]
    fn test_set_setting_ahead_of_echo() {
        let mut runner = Runner::new();
        assert!(runner.set_setting("$13", "1"));
        assert!(runner.settings().report_inches());
        let events = runner.parse("$13=1");
        assert!(!events[0].settings_changed);
    }

    #[test]
    fn test_alarm_state_predicates() {
        let mut runner = Runner::new();
        runner.parse("ALARM:2");
        assert_eq!(runner.state().status.alarm_code, Some(2));
        runner.parse("<Alarm:2|MPos:0.000,0.000,0.000>");
        assert!(runner.is_alarm());
        runner.parse("<Check|MPos:0.000,0.000,0.000>");
        assert!(runner.is_check());
        assert_eq!(runner.state().status.alarm_code, None);
    }

    #[test]
    fn test_sdcard_files_replace_by_name() {
        let mut runner = Runner::new();
        runner.parse("[FILE:/a.nc|SIZE:10]\n[FILE:/a.nc|SIZE:20]\n[FILE:/b.nc|SIZE:5]");
        let sdcard = &runner.state().sdcard;
        assert!(sdcard.mounted);
        assert_eq!(sdcard.files.len(), 2);
        assert_eq!(sdcard.files[0].size, 20);
    }

    #[test]
    fn test_unrecognized_is_still_emitted() {
        let mut runner = Runner::new();
        let events = runner.parse("mystery line");
        assert_eq!(events[0].frame.kind(), "others");
        assert!(!events[0].state_changed);
    }

    #[test]
    fn test_force_ok_and_reset() {
        let mut runner = Runner::new();
        assert_eq!(runner.force_ok().frame, Frame::Ok);
        runner.parse("$0=10\n<Idle|MPos:1,2,3>");
        runner.reset();
        assert!(!runner.settings().is_loaded());
        assert_eq!(runner.active_state(), None);
    }
}
