//! Program streaming with character-counting flow control
//!
//! The sender keeps the firmware receive buffer as full as it safely can:
//! a line is written only while the bytes sent but not yet acknowledged,
//! plus the new line, stay below the buffer budget. Each `ok` releases the
//! length of the oldest outstanding line.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use halstream_core::data::{HoldReason, LineContext, SenderStatus};
use tokio::time::Instant;

use super::filter::{DataFilter, FilterAction, FilterContext, FilterTarget, FilterOutcome};

/// Default buffer budget: 128-byte receive buffer minus an 8-byte margin
pub const DEFAULT_BUFFER_SIZE: usize = 120;

const PROTOCOL: &str = "character-counting";

/// Lifecycle notifications produced by [`Sender::next`]
#[derive(Debug, Clone, PartialEq)]
pub enum SenderEvent {
    /// First line of the run released
    Start { at: DateTime<Utc> },
    /// Every line acknowledged
    End { at: DateTime<Utc> },
}

/// Options for one [`Sender::next`] call
#[derive(Debug, Clone, Copy, Default)]
pub struct NextOptions {
    /// Resuming after a start-from-line preamble; timing restarts here
    pub start_from_line: bool,
    /// Treat the program as finished even if lines are outstanding
    pub force_end: bool,
}

/// What one call to [`Sender::next`] produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderStep {
    /// Lines to write, in order
    pub lines: Vec<String>,
    /// 1-based program line number of each written line
    pub line_numbers: Vec<usize>,
    /// Filter side effects, in order
    pub actions: Vec<FilterAction>,
    /// Lifecycle notifications
    pub events: Vec<SenderEvent>,
}

#[derive(Debug, Default)]
struct Timing {
    started: Option<Instant>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    paused_at: Option<Instant>,
    paused: Duration,
    frozen_elapsed: Option<Duration>,
}

impl Timing {
    fn elapsed(&self) -> Duration {
        if let Some(frozen) = self.frozen_elapsed {
            return frozen;
        }
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.saturating_duration_since(started)
            .saturating_sub(self.paused)
    }
}

/// Bulk program sender
#[derive(Debug)]
pub struct Sender {
    name: String,
    size: usize,
    lines: Vec<String>,
    context: LineContext,
    sent: usize,
    received: usize,
    start_line: usize,
    hold: bool,
    hold_reason: Option<HoldReason>,
    buffer_size: usize,
    data_length: usize,
    in_flight: VecDeque<usize>,
    pending_line: Option<FilterOutcome>,
    tool_changes: u32,
    estimated_time: u64,
    estimate_data: Vec<f64>,
    timing: Timing,
    ended: bool,
    changed: bool,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Sender {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            name: String::new(),
            size: 0,
            lines: Vec::new(),
            context: LineContext::new(),
            sent: 0,
            received: 0,
            start_line: 0,
            hold: false,
            hold_reason: None,
            buffer_size,
            data_length: 0,
            in_flight: VecDeque::new(),
            pending_line: None,
            tool_changes: 0,
            estimated_time: 0,
            estimate_data: Vec::new(),
            timing: Timing::default(),
            ended: false,
            changed: false,
        }
    }

    /// Load a program; returns false when it has no non-blank line
    pub fn load(&mut self, name: &str, gcode: &str, context: LineContext) -> bool {
        let lines: Vec<String> = gcode
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.trim().is_empty())
            .collect();
        if lines.is_empty() {
            return false;
        }

        self.name = name.to_string();
        self.size = gcode.len();
        self.lines = lines;
        self.context = context;
        self.tool_changes = 0;
        self.estimated_time = 0;
        self.estimate_data.clear();
        self.rewind();
        tracing::info!("Loaded {} ({} lines)", self.name, self.lines.len());
        true
    }

    /// Forget the loaded program
    pub fn unload(&mut self) {
        self.name.clear();
        self.size = 0;
        self.lines.clear();
        self.context.clear();
        self.tool_changes = 0;
        self.estimated_time = 0;
        self.estimate_data.clear();
        self.rewind();
    }

    /// Back to line zero with nothing in flight
    pub fn rewind(&mut self) {
        self.sent = 0;
        self.received = 0;
        self.start_line = 0;
        self.hold = false;
        self.hold_reason = None;
        self.clear_in_flight();
        self.timing = Timing::default();
        self.ended = false;
        self.changed = true;
    }

    /// Forget outstanding bytes; the firmware flushed its receive buffer
    pub fn clear_in_flight(&mut self) {
        self.data_length = 0;
        self.in_flight.clear();
        self.pending_line = None;
    }

    /// Skip the first `line` lines without transmitting them
    pub fn set_start_line(&mut self, line: usize) -> usize {
        let line = line.min(self.lines.len());
        self.start_line = line;
        self.sent = line;
        self.received = line;
        self.pending_line = None;
        self.changed = true;
        line
    }

    /// Release as many lines as fit in the buffer budget
    pub fn next(
        &mut self,
        filter: &mut dyn DataFilter,
        base: &FilterContext,
        options: NextOptions,
    ) -> SenderStep {
        let mut step = SenderStep::default();
        let total = self.lines.len();
        if total == 0 {
            return step;
        }

        if options.start_from_line || self.timing.started.is_none() {
            self.timing.started = Some(Instant::now());
            self.timing.paused = Duration::ZERO;
            if self.timing.start_time.is_none() || options.start_from_line {
                let at = Utc::now();
                self.timing.start_time = Some(at);
                step.events.push(SenderEvent::Start { at });
            }
        }

        while !self.hold && self.sent < total {
            let outcome = match self.pending_line.take() {
                Some(outcome) => outcome,
                None => {
                    let mut context = base.clone();
                    context.target = FilterTarget::Sender;
                    context.sent = self.sent;
                    context.line_context = self.context.clone();
                    filter.filter(&self.lines[self.sent], &context)
                }
            };

            let line = outcome.line.trim().to_string();
            let length = line.len() + 1;
            if !line.is_empty()
                && !self.in_flight.is_empty()
                && self.data_length + length >= self.buffer_size
            {
                self.pending_line = Some(outcome);
                break;
            }

            self.sent += 1;
            self.changed = true;
            if let Some(reason) = outcome.hold_reason() {
                self.hold = true;
                self.hold_reason = Some(reason.clone());
            }
            let stop = outcome
                .actions
                .iter()
                .any(|action| matches!(action, FilterAction::PauseWorkflow(_)));
            step.actions.extend(outcome.actions);

            if line.is_empty() {
                self.received += 1;
            } else {
                self.data_length += length;
                self.in_flight.push_back(length);
                step.lines.push(line);
                step.line_numbers.push(self.sent);
            }
            if stop {
                break;
            }
        }

        if (self.received >= total || options.force_end) && !self.ended {
            self.ended = true;
            let at = Utc::now();
            self.timing.frozen_elapsed = Some(self.timing.elapsed());
            self.timing.finish_time = Some(at);
            self.changed = true;
            step.events.push(SenderEvent::End { at });
        }
        step
    }

    /// Acknowledge the oldest outstanding line; false when none is outstanding
    pub fn ack(&mut self) -> bool {
        let Some(length) = self.in_flight.pop_front() else {
            return false;
        };
        self.data_length = self.data_length.saturating_sub(length);
        self.received += 1;
        self.changed = true;
        true
    }

    pub fn hold(&mut self, reason: HoldReason) -> bool {
        if self.hold {
            return false;
        }
        tracing::debug!("Sender hold: {}", reason.data);
        self.hold = true;
        self.hold_reason = Some(reason);
        self.changed = true;
        true
    }

    pub fn unhold(&mut self) -> bool {
        if !self.hold {
            return false;
        }
        self.hold = false;
        self.hold_reason = None;
        self.changed = true;
        true
    }

    /// Stop the elapsed-time clock (workflow paused)
    pub fn pause_countdown(&mut self) {
        if self.timing.paused_at.is_none() {
            self.timing.paused_at = Some(Instant::now());
        }
    }

    /// Restart the clock, excluding the time spent paused
    pub fn resume_countdown(&mut self) {
        if let Some(paused_at) = self.timing.paused_at.take() {
            self.timing.paused += paused_at.elapsed();
        }
    }

    /// Grow the buffer budget; it never shrinks
    pub fn set_buffer_size(&mut self, size: usize) -> bool {
        if size <= self.buffer_size {
            return false;
        }
        tracing::debug!("Sender buffer size {} -> {}", self.buffer_size, size);
        self.buffer_size = size;
        self.changed = true;
        true
    }

    pub fn increment_tool_changes(&mut self) {
        self.tool_changes += 1;
        self.changed = true;
    }

    /// Per-line time estimates in seconds
    pub fn set_estimate_data(&mut self, data: Vec<f64>) {
        let total: f64 = data.iter().copied().filter(|v| v.is_finite()).sum();
        self.estimate_data = data;
        self.set_estimated_time((total * 1000.0) as u64);
    }

    /// Estimated run time in milliseconds
    pub fn set_estimated_time(&mut self, millis: u64) {
        self.estimated_time = millis;
        self.changed = true;
    }

    fn remaining_time(&self, elapsed: u64) -> u64 {
        let total = self.lines.len();
        if self.received >= total {
            return 0;
        }
        if !self.estimate_data.is_empty() {
            let remaining: f64 = self
                .estimate_data
                .iter()
                .skip(self.received)
                .copied()
                .filter(|v| v.is_finite())
                .sum();
            return (remaining * 1000.0) as u64;
        }
        if self.estimated_time > 0 {
            return self.estimated_time.saturating_sub(elapsed);
        }
        let done = self.received.saturating_sub(self.start_line);
        if done == 0 {
            return 0;
        }
        let left = (total - self.received) as u64;
        elapsed.saturating_mul(left) / done as u64
    }

    /// True once after each change
    pub fn peek(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn is_loaded(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn is_hold(&self) -> bool {
        self.hold
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn total(&self) -> usize {
        self.lines.len()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Lines written but not yet acknowledged
    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.timing.finish_time
    }

    pub fn to_status(&self) -> SenderStatus {
        let elapsed = self.timing.elapsed().as_millis() as u64;
        SenderStatus {
            protocol: PROTOCOL.to_string(),
            hold: self.hold,
            hold_reason: self.hold_reason.clone(),
            name: self.name.clone(),
            size: self.size,
            total: self.lines.len(),
            sent: self.sent,
            received: self.received,
            start_line: self.start_line,
            start_time: self.timing.start_time,
            finish_time: self.timing.finish_time,
            elapsed_time: elapsed,
            remaining_time: self.remaining_time(elapsed),
            estimated_time: self.estimated_time,
            tool_changes: self.tool_changes,
            buffer_size: self.buffer_size,
            data_length: self.data_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::filter::PassThrough;

    fn next(sender: &mut Sender) -> SenderStep {
        sender.next(&mut PassThrough, &FilterContext::default(), NextOptions::default())
    }

    #[test]
    fn test_load_rejects_blank_program() {
        let mut sender = Sender::default();
        assert!(!sender.load("empty.nc", "\n  \n", LineContext::new()));
        assert!(sender.load("part.nc", "G21\n\nG1 X10 F200\nM30\n", LineContext::new()));
        assert_eq!(sender.total(), 3);
        assert_eq!(sender.name(), "part.nc");
    }

    #[test]
    fn test_fills_buffer_then_waits_for_ok() {
        let mut sender = Sender::new(20);
        sender.load("t.nc", "G1 X1 Y1\nG1 X2 Y2\nG1 X3 Y3", LineContext::new());

        let step = next(&mut sender);
        // 9 bytes each including newline; the second would reach 18 < 20
        assert_eq!(step.lines, vec!["G1 X1 Y1", "G1 X2 Y2"]);
        assert!(matches!(step.events[0], SenderEvent::Start { .. }));
        assert_eq!(sender.data_length(), 18);

        assert!(next(&mut sender).lines.is_empty());
        assert!(sender.ack());
        assert_eq!(next(&mut sender).lines, vec!["G1 X3 Y3"]);
        assert!(sender.ack());
        assert!(sender.ack());
        assert!(!sender.ack());

        let step = next(&mut sender);
        assert!(matches!(step.events[..], [SenderEvent::End { .. }]));
        assert!(sender.is_ended());
        assert!(next(&mut sender).events.is_empty());
    }

    #[test]
    fn test_oversized_line_sent_when_idle() {
        let mut sender = Sender::new(8);
        sender.load("t.nc", "G1 X100.000 Y100.000", LineContext::new());
        assert_eq!(next(&mut sender).lines.len(), 1);
    }

    #[test]
    fn test_swallowed_lines_count_as_received() {
        let mut sender = Sender::default();
        sender.load("t.nc", "%x=1\nG0 X1", LineContext::new());
        let mut filter = |line: &str, _: &FilterContext| {
            if line.starts_with('%') {
                FilterOutcome::swallow()
            } else {
                FilterOutcome::pass(line)
            }
        };
        let step = sender.next(&mut filter, &FilterContext::default(), NextOptions::default());
        assert_eq!(step.lines, vec!["G0 X1"]);
        assert_eq!(sender.sent(), 2);
        assert_eq!(sender.received(), 1);
    }

    #[test]
    fn test_pause_action_stops_release() {
        let mut sender = Sender::default();
        sender.load("t.nc", "G0 X1\nM0\nG0 X2", LineContext::new());
        let mut filter = |line: &str, _: &FilterContext| {
            let outcome = FilterOutcome::pass(line);
            if line == "M0" {
                outcome.with_action(FilterAction::PauseWorkflow(HoldReason::new("M0")))
            } else {
                outcome
            }
        };
        let step = sender.next(&mut filter, &FilterContext::default(), NextOptions::default());
        assert_eq!(step.lines, vec!["G0 X1", "M0"]);
        assert_eq!(step.actions.len(), 1);
    }

    #[test]
    fn test_hold_blocks_next() {
        let mut sender = Sender::default();
        sender.load("t.nc", "G0 X1", LineContext::new());
        assert!(sender.hold(HoldReason::new("M0")));
        assert!(!sender.hold(HoldReason::new("M0")));
        assert!(next(&mut sender).lines.is_empty());
        assert!(sender.unhold());
        assert_eq!(next(&mut sender).lines.len(), 1);
    }

    #[test]
    fn test_start_line_fast_forward() {
        let mut sender = Sender::default();
        sender.load("t.nc", "G0 X1\nG0 X2\nG0 X3", LineContext::new());
        assert_eq!(sender.set_start_line(2), 2);
        let step = sender.next(
            &mut PassThrough,
            &FilterContext::default(),
            NextOptions {
                start_from_line: true,
                force_end: false,
            },
        );
        assert_eq!(step.lines, vec!["G0 X3"]);
        assert_eq!(sender.to_status().start_line, 2);
        assert_eq!(sender.set_start_line(10), 3);
    }

    #[test]
    fn test_buffer_size_only_grows() {
        let mut sender = Sender::default();
        assert!(!sender.set_buffer_size(64));
        assert!(sender.set_buffer_size(1016));
        assert_eq!(sender.buffer_size(), 1016);
        assert!(!sender.set_buffer_size(120));
    }

    #[test]
    fn test_force_end() {
        let mut sender = Sender::default();
        sender.load("t.nc", "G0 X1\nG0 X2", LineContext::new());
        next(&mut sender);
        let step = sender.next(
            &mut PassThrough,
            &FilterContext::default(),
            NextOptions {
                start_from_line: false,
                force_end: true,
            },
        );
        assert!(step.events.iter().any(|e| matches!(e, SenderEvent::End { .. })));
        assert!(sender.finish_time().is_some());
    }

    #[test]
    fn test_estimates_and_status() {
        let mut sender = Sender::default();
        sender.load("t.nc", "G0 X1\nG0 X2", LineContext::new());
        sender.set_estimate_data(vec![1.5, 2.5]);
        sender.increment_tool_changes();
        let status = sender.to_status();
        assert_eq!(status.estimated_time, 4000);
        assert_eq!(status.remaining_time, 4000);
        assert_eq!(status.tool_changes, 1);
        assert_eq!(status.protocol, "character-counting");
        assert!(sender.peek());
        assert!(!sender.peek());
    }
}
