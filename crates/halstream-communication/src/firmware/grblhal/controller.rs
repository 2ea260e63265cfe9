//! GRBL-HAL controller
//!
//! Owns the Runner, Feeder, Sender and Workflow for one connection and
//! wires them together. The controller is synchronous: whoever drives it
//! (see [`crate::service`]) feeds it inbound lines, commands and poll ticks
//! from a single task, so ordering is the only concern.
//!
//! Every line written to the firmware is recorded in an ordered ledger so
//! each `ok` or `error:N` can be attributed to the queue that sent it.
//! Status (`?`) and parser-state (`$G`) queries are throttled with masks:
//! a query is never issued while the previous one is unanswered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use halstream_core::data::{
    ActiveState, ControllerSettings, ControllerState, ErrorKind, ErrorReport, FeederStatus,
    HoldReason, LineContext, SenderStatus, WorkflowState, WriteSource,
};
use halstream_core::error::ControllerError;
use halstream_core::event_bus::{
    AppEvent, ConnectionEvent, ControllerEvent, EventBus, JobEvent, SerialEvent, WorkflowEvent,
};
use halstream_core::units::format_trimmed;
use halstream_settings::{Config, ToolChangeOption};
use serde::Serialize;
use tokio::time::Instant;

use super::commands::ControllerCommand;
use super::constants::{RealtimeCommand, INIT_SEQUENCE, POSTHOOK_COMPLETE, PREHOOK_COMPLETE};
use super::error_decoder;
use super::filter::{LineFilter, LineFilterOptions};
use super::parser::Frame;
use super::runner::{Runner, RunnerEvent};
use super::start_line::{build_preamble, DEFAULT_SAFE_MACHINE_Z};
use crate::connection::Connection;
use crate::event_trigger::{self, EventTrigger};
use crate::streaming::{
    Feeder, FilterAction, FilterContext, FilterTarget, NextOptions, Sender, SenderEvent, Workflow,
};

/// Feed hold to soft reset on a forced stop
const STOP_RESET_DELAY: Duration = Duration::from_millis(250);
/// Soft reset to `$X` on a limit reset
const LIMIT_UNLOCK_DELAY: Duration = Duration::from_millis(500);
/// Spindle maximum assumed when `$30` is unknown
const DEFAULT_MAX_SPINDLE: f64 = 1000.0;

/// A line written to the firmware and not yet answered
#[derive(Debug, Clone, PartialEq)]
struct Outstanding {
    source: WriteSource,
    line: String,
    line_number: Option<usize>,
}

/// Throttle for one kind of query
#[derive(Debug, Default)]
struct QueryMask {
    pending_since: Option<Instant>,
    last_sent: Option<Instant>,
}

impl QueryMask {
    fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    fn set(&mut self, now: Instant) {
        self.pending_since = Some(now);
        self.last_sent = Some(now);
    }

    fn clear(&mut self) {
        self.pending_since = None;
    }

    /// Forget a query unanswered for `timeout`; true if one was forgotten
    fn expire(&mut self, now: Instant, timeout: Duration) -> bool {
        let stale = self
            .pending_since
            .is_some_and(|since| now.saturating_duration_since(since) >= timeout);
        if stale {
            self.pending_since = None;
        }
        stale
    }

    fn due(&self, now: Instant, interval: Duration) -> bool {
        self.last_sent
            .is_none_or(|sent| now.saturating_duration_since(sent) >= interval)
    }
}

/// Point-in-time copy of everything a client may want to render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub ident: String,
    pub ready: bool,
    pub workflow: WorkflowState,
    pub state: ControllerState,
    pub settings: ControllerSettings,
    pub feeder: FeederStatus,
    pub sender: SenderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    SoftReset,
    Unlock,
}

/// Runtime for one GRBL-HAL connection
pub struct Controller {
    connection: Box<dyn Connection>,
    bus: Arc<EventBus>,
    config: Config,
    runner: Runner,
    feeder: Feeder,
    sender: Sender,
    workflow: Workflow,
    filter: LineFilter,
    trigger: EventTrigger,
    ledger: VecDeque<Outstanding>,
    status_query: QueryMask,
    parser_state_query: QueryMask,
    deferred: Vec<(Instant, Deferred)>,
    initializing: bool,
    ready: bool,
    emitted_state: u64,
    emitted_settings: u64,
    idle_since: Option<Instant>,
    finished_at: Option<Instant>,
    stall_deadline: Option<Instant>,
    tool_change_context: LineContext,
}

impl Controller {
    pub fn new(connection: Box<dyn Connection>, config: Config, bus: Arc<EventBus>) -> Self {
        let filter = LineFilter::new(LineFilterOptions {
            tool_change: config.tool_change.option,
            rotary: config.rotary.enabled,
            program_pause_min_lines: config.streaming.program_pause_min_lines,
        });
        Self {
            connection,
            bus,
            runner: Runner::new(),
            feeder: Feeder::new(),
            sender: Sender::new(config.streaming.buffer_size()),
            workflow: Workflow::new(),
            filter,
            trigger: EventTrigger::new(config.event_hooks.clone()),
            config,
            ledger: VecDeque::new(),
            status_query: QueryMask::default(),
            parser_state_query: QueryMask::default(),
            deferred: Vec::new(),
            initializing: false,
            ready: false,
            emitted_state: 0,
            emitted_settings: 0,
            idle_since: None,
            finished_at: None,
            stall_deadline: None,
            tool_change_context: LineContext::new(),
        }
    }

    pub fn ident(&self) -> &str {
        self.connection.ident()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn feeder(&self) -> &Feeder {
        &self.feeder
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Initialization sequence has completed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Sources of the lines awaiting `ok`, oldest first
    pub fn outstanding(&self) -> Vec<WriteSource> {
        self.ledger.iter().map(|entry| entry.source).collect()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            ident: self.port(),
            ready: self.ready,
            workflow: self.workflow.state(),
            state: self.runner.state().clone(),
            settings: self.runner.settings().clone(),
            feeder: self.feeder.to_status(),
            sender: self.sender.to_status(),
        }
    }

    fn port(&self) -> String {
        self.connection.ident().to_string()
    }

    fn publish(&self, event: AppEvent) {
        self.bus.publish(event).ok();
    }

    // Connection lifecycle

    /// The transport is up; ask for a complete status report
    pub fn open(&mut self) {
        tracing::info!("Controller attached to {}", self.ident());
        self.publish(AppEvent::Connection(ConnectionEvent::Opened { port: self.port() }));
        self.write_realtime(RealtimeCommand::CompleteStatusReport);
        self.fire(event_trigger::PORT_OPEN);
    }

    /// The transport closed; everything in flight is abandoned
    pub fn on_close(&mut self) {
        tracing::info!("Controller on {} closed", self.ident());
        self.stop_workflow();
        self.ready = false;
        self.initializing = false;
        self.ledger.clear();
        self.deferred.clear();
        self.feeder.reset();
        self.sender.clear_in_flight();
        self.connection.close();
        self.publish(AppEvent::Connection(ConnectionEvent::Closed { port: self.port() }));
        self.fire(event_trigger::PORT_CLOSE);
    }

    pub fn on_error(&mut self, message: &str) {
        tracing::error!("Connection error on {}: {}", self.ident(), message);
        self.publish(AppEvent::Connection(ConnectionEvent::Error {
            port: self.port(),
            message: message.to_string(),
        }));
    }

    // Inbound

    /// Process one or more lines received from the firmware
    pub fn on_data(&mut self, data: &str) {
        for line in data.lines().map(str::trim).filter(|line| !line.is_empty()) {
            tracing::trace!("{} < {}", self.ident(), line);
            self.publish(AppEvent::Serial(SerialEvent::Read {
                port: self.port(),
                line: line.to_string(),
            }));
            for event in self.runner.parse(line) {
                self.handle(event);
            }
        }
    }

    fn handle(&mut self, event: RunnerEvent) {
        match event.frame {
            Frame::Status(_) => self.on_status(),
            Frame::Ok => self.on_ok(),
            Frame::Error { code } => self.on_firmware_error(code),
            Frame::Alarm { code } => self.on_alarm(code),
            Frame::ParserState(_) => self.parser_state_query.clear(),
            Frame::Startup {
                firmware, version, ..
            } => self.on_startup(firmware, version),
            Frame::Feedback { message } => {
                tracing::info!("{}: {}", self.ident(), message);
                self.publish(AppEvent::Controller(ControllerEvent::Feedback {
                    port: self.port(),
                    message,
                }));
            }
            Frame::Unrecognized { raw } => {
                tracing::warn!("Unrecognized line from {}: {}", self.ident(), raw);
                self.publish(AppEvent::Controller(ControllerEvent::Unrecognized {
                    port: self.port(),
                    line: raw,
                }));
            }
            _ => {}
        }
    }

    fn on_status(&mut self) {
        self.status_query.clear();
        let Some(state) = self.runner.active_state() else {
            return;
        };

        if state == ActiveState::Idle {
            self.idle_since.get_or_insert_with(Instant::now);
        } else {
            self.idle_since = None;
        }

        if state == ActiveState::Idle && !self.initializing && !self.ready {
            self.initialize();
        }
        if state == ActiveState::Alarm && !self.workflow.is_idle() {
            tracing::warn!("{} reports alarm; stopping the program", self.ident());
            self.stop_workflow();
        }
        if state == ActiveState::Idle && self.workflow.is_idle() {
            self.grow_buffer();
        }
    }

    /// Widen the streaming budget when the firmware reports a larger buffer
    fn grow_buffer(&mut self) {
        let Some(buf) = self.runner.state().status.buf else {
            return;
        };
        let size = (buf.rx as usize).saturating_sub(self.config.streaming.buffer_margin);
        if size > self.sender.buffer_size() && self.sender.set_buffer_size(size) {
            tracing::info!(
                "{} has {} bytes free; streaming budget is now {}",
                self.ident(),
                buf.rx,
                size
            );
        }
    }

    fn initialize(&mut self) {
        tracing::info!("Initializing controller on {}", self.ident());
        self.initializing = true;
        self.feeder.feed(INIT_SEQUENCE, LineContext::new());
        self.feeder_next();
    }

    fn on_ok(&mut self) {
        let Some(entry) = self.ledger.pop_front() else {
            tracing::debug!("ok from {} with nothing outstanding", self.ident());
            return;
        };
        match entry.source {
            WriteSource::Query => self.parser_state_query.clear(),
            WriteSource::Feeder => {
                self.feeder.ack();
                self.feeder_next();
            }
            WriteSource::Sender => {
                self.sender.ack();
                self.sender_next(NextOptions::default());
            }
            WriteSource::Direct => {}
        }
    }

    fn on_firmware_error(&mut self, code: u32) {
        let entry = self.ledger.pop_front();
        let description =
            error_decoder::describe(ErrorKind::Error, code, self.runner.settings());

        // The alarm already told the operator what went wrong
        if !self.runner.is_alarm() {
            let report = ErrorReport {
                kind: ErrorKind::Error,
                code,
                description: description.clone(),
                line: entry.as_ref().map(|e| e.line.clone()),
                line_number: entry.as_ref().and_then(|e| e.line_number),
                origin: entry.as_ref().map(|e| e.source),
                controller: self.port(),
            };
            tracing::warn!("{} on {}", report, self.ident());
            self.publish(AppEvent::Error(report));
        }

        let Some(entry) = entry else {
            return;
        };
        match entry.source {
            WriteSource::Sender => {
                self.sender.ack();
                let keep_going = self.config.streaming.ignore_errors || self.runner.is_check();
                if self.workflow.is_running() && !keep_going {
                    let reason = HoldReason {
                        data: "error".to_string(),
                        message: Some(format!("error:{} {}", code, description)),
                        comment: None,
                        error: true,
                    };
                    self.pause_workflow(reason);
                } else {
                    self.sender_next(NextOptions::default());
                }
            }
            WriteSource::Feeder => {
                self.feeder.ack();
                self.feeder_next();
            }
            WriteSource::Query => self.parser_state_query.clear(),
            WriteSource::Direct => {}
        }
    }

    fn on_alarm(&mut self, code: u32) {
        let report = ErrorReport {
            kind: ErrorKind::Alarm,
            code,
            description: error_decoder::describe(ErrorKind::Alarm, code, self.runner.settings()),
            line: None,
            line_number: None,
            origin: None,
            controller: self.port(),
        };
        tracing::error!("{} on {}", report, self.ident());
        self.publish(AppEvent::Error(report));

        // The firmware flushes its receive buffer on alarm, and queued
        // manual lines must not run once the alarm is cleared
        self.ledger.clear();
        self.sender.clear_in_flight();
        self.feeder.reset();
        self.initializing = false;
        self.stop_workflow();
    }

    fn on_startup(&mut self, firmware: String, version: String) {
        tracing::info!("{} {} started on {}", firmware, version, self.ident());
        self.stop_workflow();
        self.ledger.clear();
        self.sender.clear_in_flight();
        self.feeder.reset();
        self.status_query.clear();
        self.parser_state_query.clear();
        self.initializing = false;
        self.ready = false;
        self.publish(AppEvent::Controller(ControllerEvent::Startup {
            port: self.port(),
            firmware,
            version,
        }));
    }

    // Outbound

    fn filter_context(&self) -> FilterContext {
        let modal = self.runner.modal_state().clone();
        FilterContext {
            target: FilterTarget::Feeder,
            mpos: self.runner.machine_position().clone(),
            wpos: self.runner.work_position().clone(),
            units: modal.measurement_system(),
            modal,
            tool: self.runner.tool(),
            report_inches: self.runner.settings().report_inches(),
            sent: 0,
            line_context: LineContext::new(),
        }
    }

    fn write_line(&mut self, line: &str, source: WriteSource, line_number: Option<usize>) -> bool {
        if let Err(e) = self.connection.write(&format!("{}\n", line)) {
            tracing::warn!("Dropping '{}': {}", line, e);
            return false;
        }
        tracing::debug!("{} > {}", self.ident(), line);
        self.ledger.push_back(Outstanding {
            source,
            line: line.to_string(),
            line_number,
        });
        self.publish(AppEvent::Serial(SerialEvent::Write {
            port: self.port(),
            data: line.to_string(),
            source: Some(source),
        }));
        true
    }

    fn write_realtime(&mut self, command: RealtimeCommand) -> bool {
        if let Err(e) = self.connection.write_immediate(&[command.byte()]) {
            tracing::warn!("Dropping realtime {}: {}", command.display(), e);
            return false;
        }
        if command != RealtimeCommand::StatusReport {
            tracing::debug!("{} > {}", self.ident(), command.display());
            self.publish(AppEvent::Serial(SerialEvent::Write {
                port: self.port(),
                data: command.display(),
                source: None,
            }));
        }
        true
    }

    fn feed_line(&mut self, line: impl Into<String>) {
        self.feeder.feed([line.into()], LineContext::new());
        self.feeder_next();
    }

    fn feeder_next(&mut self) {
        if !self.connection.is_open() {
            return;
        }
        let context = self.filter_context();
        let step = self.feeder.next(&mut self.filter, &context);
        if let Some(line) = &step.line {
            self.write_line(line, WriteSource::Feeder, None);
        }
        self.apply_actions(step.actions, FilterTarget::Feeder);

        if step.completed && self.initializing {
            self.initializing = false;
            self.ready = true;
            tracing::info!("Controller on {} is ready", self.ident());
            self.publish(AppEvent::Controller(ControllerEvent::Ready { port: self.port() }));
            self.fire(event_trigger::CONTROLLER_READY);
        }
    }

    fn sender_next(&mut self, options: NextOptions) {
        if !self.connection.is_open() || !self.sender.is_loaded() || self.workflow.is_idle() {
            return;
        }
        let context = self.filter_context();
        let step = self.sender.next(&mut self.filter, &context, options);
        for (line, number) in step.lines.iter().zip(&step.line_numbers) {
            self.write_line(line, WriteSource::Sender, Some(*number));
        }
        self.apply_actions(step.actions, FilterTarget::Sender);

        for event in step.events {
            match event {
                SenderEvent::Start { at } => {
                    self.publish(AppEvent::Job(JobEvent::SenderStarted { port: self.port(), at }))
                }
                SenderEvent::End { at } => {
                    self.finished_at = Some(Instant::now());
                    tracing::info!("All lines of {} acknowledged", self.sender.name());
                    self.publish(AppEvent::Job(JobEvent::SenderFinished { port: self.port(), at }));
                }
            }
        }
        self.stall_deadline = Some(Instant::now() + self.config.streaming.stall_timeout());
    }

    fn apply_actions(&mut self, actions: Vec<FilterAction>, target: FilterTarget) {
        for action in actions {
            match action {
                FilterAction::Hold(reason) => {
                    tracing::info!("Feeder on {} held at {}", self.ident(), reason.data);
                }
                FilterAction::PauseWorkflow(reason) => self.pause_workflow(reason),
                FilterAction::ToolChange { tool, line } => self.on_tool_change(tool, line, target),
                FilterAction::PreHookComplete { comment } => {
                    self.publish(AppEvent::Job(JobEvent::PreHookComplete {
                        port: self.port(),
                        comment: comment.unwrap_or_default(),
                    }));
                }
                FilterAction::PostHookComplete => {
                    self.publish(AppEvent::Job(JobEvent::ToolChangeComplete { port: self.port() }));
                    self.resume_workflow();
                }
                FilterAction::ProgramStart if target == FilterTarget::Feeder => {
                    tracing::info!("Catch-up done; streaming from line {}", self.sender.sent() + 1);
                    self.sender_next(NextOptions {
                        start_from_line: true,
                        ..Default::default()
                    });
                }
                FilterAction::ProgramStart => {}
                FilterAction::SettingWrite { name, value } => {
                    if self.runner.set_setting(&name, &value) {
                        tracing::debug!("Pre-set {}={}", name, value);
                    }
                }
            }
        }
    }

    fn on_tool_change(&mut self, tool: Option<u32>, line: String, target: FilterTarget) {
        let strategy = self.config.tool_change.option;
        if target == FilterTarget::Sender {
            self.sender.increment_tool_changes();
        }
        tracing::info!("Tool change at '{}' ({})", line, strategy);
        self.publish(AppEvent::Job(JobEvent::ToolChange {
            port: self.port(),
            tool,
            line,
            strategy: strategy.to_string(),
        }));
        if strategy == ToolChangeOption::Code && target == FilterTarget::Sender {
            self.run_tool_change_hook(false);
        }
    }

    /// Feed the pre or post hook followed by its completion marker
    fn run_tool_change_hook(&mut self, post: bool) {
        let (hook, marker) = if post {
            (&self.config.tool_change.post_hook, POSTHOOK_COMPLETE)
        } else {
            (&self.config.tool_change.pre_hook, PREHOOK_COMPLETE)
        };
        let mut lines: Vec<String> = hook.lines().map(str::to_string).collect();
        lines.push(marker.to_string());
        // Hooks run while the program is paused
        self.feeder.unhold();
        self.feeder.feed(lines, self.tool_change_context.clone());
        self.feeder_next();
    }

    fn fire(&mut self, event: &str) {
        let gcode = self.trigger.trigger(event);
        if gcode.is_empty() {
            return;
        }
        self.feeder.feed(gcode, LineContext::new());
        self.feeder_next();
    }

    // Workflow

    fn publish_workflow(&self) {
        self.publish(AppEvent::Workflow(WorkflowEvent::StateChanged {
            port: self.port(),
            state: self.workflow.state(),
            reason: self.workflow.reason().cloned(),
        }));
    }

    fn start_workflow(&mut self) -> bool {
        if !self.workflow.start() {
            return false;
        }
        self.sender.rewind();
        self.finished_at = None;
        self.stall_deadline = None;
        self.publish_workflow();
        true
    }

    fn stop_workflow(&mut self) {
        if !self.workflow.stop() {
            return;
        }
        self.feeder.reset();
        self.sender.rewind();
        self.finished_at = None;
        self.stall_deadline = None;
        // A reset feeder never completes the init sequence
        self.initializing = false;
        self.publish_workflow();
    }

    fn pause_workflow(&mut self, reason: HoldReason) {
        if !self.workflow.pause(reason.clone()) {
            return;
        }
        tracing::info!("Program paused: {}", reason.data);
        self.feeder.hold(reason.clone());
        self.sender.hold(reason);
        self.sender.pause_countdown();
        self.publish_workflow();
    }

    fn resume_workflow(&mut self) {
        if !self.workflow.resume() {
            return;
        }
        self.feeder.reset();
        self.sender.unhold();
        self.sender.resume_countdown();
        self.publish_workflow();
        self.sender_next(NextOptions::default());
    }

    fn soft_reset(&mut self) {
        self.stop_workflow();
        self.feeder.reset();
        self.ledger.clear();
        self.sender.clear_in_flight();
        self.write_realtime(RealtimeCommand::SoftReset);
    }

    fn defer(&mut self, delay: Duration, action: Deferred) {
        self.deferred.push((Instant::now() + delay, action));
    }

    // Commands

    /// Dispatch a command; effects surface as events
    pub fn command(&mut self, command: ControllerCommand) -> Result<(), ControllerError> {
        let offline_ok = matches!(
            command,
            ControllerCommand::GcodeLoad { .. }
                | ControllerCommand::GcodeUnload
                | ControllerCommand::Estimate(_)
                | ControllerCommand::ToolChangeContext(_)
        );
        if !offline_ok && !self.connection.is_open() {
            return Err(ControllerError::NotConnected);
        }
        tracing::debug!("Command {} on {}", command.name(), self.ident());

        match command {
            ControllerCommand::GcodeLoad {
                name,
                gcode,
                context,
            } => self.load(name, &gcode, context)?,
            ControllerCommand::GcodeUnload => {
                self.stop_workflow();
                self.sender.unload();
                self.publish(AppEvent::Job(JobEvent::Unloaded { port: self.port() }));
                self.fire(event_trigger::GCODE_UNLOAD);
            }
            ControllerCommand::GcodeStart { start_line } => self.start(start_line)?,
            ControllerCommand::GcodeStop { force } => {
                let moving = self.runner.active_state().is_some_and(|s| s.is_motion());
                if force || moving {
                    self.write_realtime(RealtimeCommand::FeedHold);
                    self.defer(STOP_RESET_DELAY, Deferred::SoftReset);
                }
                self.stop_workflow();
                self.fire(event_trigger::GCODE_STOP);
            }
            ControllerCommand::GcodePause => {
                if self.workflow.is_running() {
                    self.write_realtime(RealtimeCommand::FeedHold);
                    self.pause_workflow(HoldReason::new("pause"));
                    self.fire(event_trigger::GCODE_PAUSE);
                }
            }
            ControllerCommand::GcodeResume => {
                if self.workflow.is_paused() {
                    self.write_realtime(RealtimeCommand::CycleStart);
                    self.resume_workflow();
                    self.fire(event_trigger::GCODE_RESUME);
                }
            }
            ControllerCommand::Feed { lines, context } => {
                self.feeder.feed(lines, context);
                self.feeder_next();
            }
            ControllerCommand::FeederStart => {
                if !self.workflow.is_running() {
                    self.write_realtime(RealtimeCommand::CycleStart);
                    self.feeder.unhold();
                    self.feeder_next();
                }
            }
            ControllerCommand::FeederStop => self.feeder.reset(),
            ControllerCommand::FeedHold => {
                self.write_realtime(RealtimeCommand::FeedHold);
                self.fire(event_trigger::FEEDHOLD);
            }
            ControllerCommand::CycleStart => {
                self.write_realtime(RealtimeCommand::CycleStart);
                self.fire(event_trigger::CYCLESTART);
            }
            ControllerCommand::Homing { axis } => {
                match axis {
                    Some(axis) => self.feed_line(format!("$H{}", axis)),
                    None => self.feed_line("$H"),
                }
                self.fire(event_trigger::HOMING);
            }
            ControllerCommand::Unlock => self.feed_line("$X"),
            ControllerCommand::SoftReset => self.soft_reset(),
            ControllerCommand::LimitReset => {
                self.soft_reset();
                self.defer(LIMIT_UNLOCK_DELAY, Deferred::Unlock);
            }
            ControllerCommand::CheckMode => self.feed_line("$C"),
            ControllerCommand::Sleep => {
                self.feed_line("$SLP");
                self.fire(event_trigger::SLEEP);
            }
            ControllerCommand::JogStart { words } => self.feed_line(format!("$J=G91 {}", words)),
            ControllerCommand::JogStop => {
                self.feeder.reset();
                self.write_realtime(RealtimeCommand::JogCancel);
            }
            ControllerCommand::JogCancel => {
                self.write_realtime(RealtimeCommand::JogCancel);
            }
            ControllerCommand::Override(command) => {
                self.write_realtime(command);
            }
            ControllerCommand::LaserTestOn {
                power,
                duration_ms,
                max_power,
            } => {
                let max = max_power
                    .or_else(|| self.runner.settings().setting_f64("$30"))
                    .unwrap_or(DEFAULT_MAX_SPINDLE);
                let mut lines = vec![
                    "G1 F1".to_string(),
                    format!("M3 S{}", format_trimmed(max * power / 100.0, 2)),
                ];
                if duration_ms > 0 {
                    lines.push(format!("G4 P{}", format_trimmed(duration_ms as f64 / 1000.0, 3)));
                    lines.push("M5 S0".to_string());
                }
                self.feeder.feed(lines, LineContext::new());
                self.feeder_next();
            }
            ControllerCommand::LaserTestOff => self.feed_line("M5 S0"),
            ControllerCommand::MacroRun { id, context } => {
                let content = self
                    .config
                    .find_macro(&id)
                    .map(|m| m.content.clone())
                    .ok_or(ControllerError::MacroNotFound { id })?;
                self.feeder.feed([content], context);
                self.feeder_next();
                self.fire(event_trigger::MACRO_RUN);
            }
            ControllerCommand::MacroLoad { id } => {
                let definition = self
                    .config
                    .find_macro(&id)
                    .cloned()
                    .ok_or(ControllerError::MacroNotFound { id })?;
                self.load(definition.name, &definition.content, LineContext::new())?;
                self.fire(event_trigger::MACRO_LOAD);
            }
            ControllerCommand::ToolChangeContext(context) => self.tool_change_context = context,
            ControllerCommand::ToolChangePre => self.run_tool_change_hook(false),
            ControllerCommand::ToolChangePost => self.run_tool_change_hook(true),
            ControllerCommand::ToolChangeAck => {
                self.write_realtime(RealtimeCommand::ToolChangeAck);
            }
            ControllerCommand::VirtualStopToggle => {
                self.write_realtime(RealtimeCommand::VirtualStopToggle);
            }
            ControllerCommand::StatusComplete => {
                self.write_realtime(RealtimeCommand::CompleteStatusReport);
            }
            ControllerCommand::SdMount => self.feed_line("$FM"),
            ControllerCommand::SdList => self.feed_line("$F"),
            ControllerCommand::SdRun { file } => self.feed_line(format!("$F={}", file)),
            ControllerCommand::Estimate(data) => self.sender.set_estimate_data(data),
        }
        Ok(())
    }

    fn load(&mut self, name: String, gcode: &str, context: LineContext) -> Result<(), ControllerError> {
        if !self.workflow.is_idle() {
            return Err(ControllerError::WorkflowBusy {
                state: self.workflow.state().to_string(),
            });
        }
        if !self.sender.load(&name, gcode, context) {
            return Err(ControllerError::Other {
                message: halstream_core::error::GcodeError::EmptyProgram { name }.to_string(),
            });
        }
        self.filter.scope_mut().clear();
        self.publish(AppEvent::Job(JobEvent::Loaded {
            port: self.port(),
            name: name.clone(),
            total: self.sender.total(),
        }));
        self.publish(AppEvent::Job(JobEvent::EstimateRequested {
            port: self.port(),
            name,
        }));
        self.fire(event_trigger::GCODE_LOAD);
        Ok(())
    }

    fn start(&mut self, start_line: Option<usize>) -> Result<(), ControllerError> {
        if !self.sender.is_loaded() {
            return Err(ControllerError::NoProgramLoaded);
        }
        if !self.workflow.is_idle() {
            return Err(ControllerError::WorkflowBusy {
                state: self.workflow.state().to_string(),
            });
        }
        let resume = match start_line.filter(|line| *line > 0) {
            Some(line) => {
                let preamble = build_preamble(self.sender.lines(), line, DEFAULT_SAFE_MACHINE_Z)
                    .map_err(|e| ControllerError::InvalidArgument {
                        command: "gcode:start".to_string(),
                        reason: e.to_string(),
                    })?;
                Some((line, preamble))
            }
            None => None,
        };

        self.start_workflow();
        self.fire(event_trigger::GCODE_START);
        match resume {
            Some((line, preamble)) => {
                self.sender.set_start_line(line);
                tracing::info!("Starting {} at line {}", self.sender.name(), line + 1);
                self.feeder.feed(preamble, LineContext::new());
                self.feeder_next();
            }
            None => self.sender_next(NextOptions::default()),
        }
        Ok(())
    }

    // Poll loop

    /// Periodic work: diffs, queries, deferred actions and watchdogs
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.run_deferred(now);
        if !self.connection.is_open() {
            return;
        }

        if self.feeder.peek() {
            self.publish(AppEvent::Job(JobEvent::FeederStatus {
                port: self.port(),
                status: self.feeder.to_status(),
            }));
        }
        if self.sender.peek() {
            self.publish(AppEvent::Job(JobEvent::SenderStatus {
                port: self.port(),
                status: Box::new(self.sender.to_status()),
            }));
        }
        if self.runner.state_revision() != self.emitted_state {
            self.emitted_state = self.runner.state_revision();
            self.publish(AppEvent::Controller(ControllerEvent::State {
                port: self.port(),
                state: Box::new(self.runner.state().clone()),
            }));
        }
        if self.runner.settings_revision() != self.emitted_settings {
            self.emitted_settings = self.runner.settings_revision();
            self.publish(AppEvent::Controller(ControllerEvent::Settings {
                port: self.port(),
                settings: Box::new(self.runner.settings().clone()),
            }));
        }

        self.query_status(now);
        self.query_parser_state(now);
        self.check_completion(now);
        self.check_stall(now);
    }

    fn run_deferred(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.deferred = pending;
        for (_, action) in due {
            match action {
                Deferred::SoftReset => self.soft_reset(),
                Deferred::Unlock => self.feed_line("$X"),
            }
        }
    }

    fn query_status(&mut self, now: Instant) {
        if self.status_query.expire(now, self.config.streaming.status_query_timeout()) {
            tracing::warn!("No status report from {}; querying again", self.ident());
        }
        if !self.status_query.is_pending() && self.write_realtime(RealtimeCommand::StatusReport) {
            self.status_query.set(now);
        }
    }

    fn query_parser_state(&mut self, now: Instant) {
        if self.runner.settings().parser_state_auto_report() {
            return;
        }
        if self
            .parser_state_query
            .expire(now, self.config.streaming.parser_state_timeout())
        {
            tracing::warn!("No parser state from {}; dropping the $G query", self.ident());
            if let Some(index) = self.ledger.iter().position(|e| e.source == WriteSource::Query) {
                self.ledger.remove(index);
            }
        }
        let due = self
            .parser_state_query
            .due(now, self.config.streaming.parser_state_interval());
        if self.ready
            && due
            && !self.parser_state_query.is_pending()
            && self.runner.is_idle()
            && self.workflow.is_idle()
            && self.write_line("$G", WriteSource::Query, None)
        {
            self.parser_state_query.set(now);
        }
    }

    /// Stop the workflow once the machine settles after the last ack
    fn check_completion(&mut self, now: Instant) {
        if !self.workflow.is_running() {
            return;
        }
        let (Some(finished), Some(idle_since)) = (self.finished_at, self.idle_since) else {
            return;
        };
        let window = self.config.streaming.completion_idle();
        let settled = now.saturating_duration_since(idle_since.max(finished)) >= window;
        if self.runner.is_idle() && settled {
            tracing::info!("{} complete on {}", self.sender.name(), self.ident());
            self.stop_workflow();
            self.publish(AppEvent::Job(JobEvent::Completed { port: self.port() }));
        }
    }

    /// Recover from an acknowledgement the firmware never sent
    fn check_stall(&mut self, now: Instant) {
        if !self.workflow.is_running() || self.sender.is_ended() {
            return;
        }
        let Some(deadline) = self.stall_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        if self.runner.is_idle() && self.sender.outstanding() > 0 {
            tracing::warn!(
                "{} idle with {} unacknowledged lines; forcing ok",
                self.ident(),
                self.sender.outstanding()
            );
            let event = self.runner.force_ok();
            self.handle(event);
        }
        self.stall_deadline = Some(now + self.config.streaming.stall_timeout());
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("ident", &self.ident())
            .field("ready", &self.ready)
            .field("workflow", &self.workflow.state())
            .field("outstanding", &self.ledger.len())
            .finish()
    }
}
