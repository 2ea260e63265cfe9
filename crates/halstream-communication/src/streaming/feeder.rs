//! Interactive command queue
//!
//! Lines fed here (console input, jogs, macros, hooks) go out one at a time:
//! the next line is only released after the previous one was acknowledged.

use std::collections::VecDeque;

use halstream_core::data::{FeederStatus, HoldReason, LineContext};

use super::filter::{DataFilter, FilterAction, FilterContext, FilterTarget};

/// A queued line and the variables attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct FeederItem {
    pub line: String,
    pub context: LineContext,
}

/// What one call to [`Feeder::next`] produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeederStep {
    /// Line to write, if any
    pub line: Option<String>,
    /// Filter side effects, in the order they were requested
    pub actions: Vec<FilterAction>,
    /// The queue drained after having had work
    pub completed: bool,
}

/// Acknowledgement-paced command queue
#[derive(Debug, Default)]
pub struct Feeder {
    queue: VecDeque<FeederItem>,
    pending: bool,
    hold: bool,
    hold_reason: Option<HoldReason>,
    changed: bool,
    busy: bool,
}

impl Feeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines; multi-line strings are split and blank lines dropped
    pub fn feed<I, S>(&mut self, lines: I, context: LineContext)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.queue.len();
        for chunk in lines {
            for line in chunk.as_ref().lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.queue.push_back(FeederItem {
                    line: line.to_string(),
                    context: context.clone(),
                });
            }
        }
        if self.queue.len() != before {
            self.busy = true;
            self.changed = true;
        }
    }

    /// Release the next line unless held or waiting for an acknowledgement
    ///
    /// Lines the filter turns empty are consumed without being sent.
    pub fn next(&mut self, filter: &mut dyn DataFilter, base: &FilterContext) -> FeederStep {
        let mut step = FeederStep::default();
        if self.pending {
            return step;
        }

        while !self.hold {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            self.changed = true;

            let mut context = base.clone();
            context.target = FilterTarget::Feeder;
            context.line_context = item.context;

            let outcome = filter.filter(&item.line, &context);
            if let Some(reason) = outcome.hold_reason() {
                self.hold = true;
                self.hold_reason = Some(reason.clone());
            }
            step.actions.extend(outcome.actions);

            let line = outcome.line.trim();
            if !line.is_empty() {
                self.pending = true;
                step.line = Some(line.to_string());
                return step;
            }
        }

        if self.queue.is_empty() && self.busy && !self.hold {
            self.busy = false;
            step.completed = true;
        }
        step
    }

    /// Acknowledge the in-flight line; false when nothing was in flight
    pub fn ack(&mut self) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.changed = true;
        true
    }

    pub fn hold(&mut self, reason: HoldReason) {
        tracing::debug!("Feeder hold: {}", reason.data);
        self.hold = true;
        self.hold_reason = Some(reason);
        self.changed = true;
    }

    pub fn unhold(&mut self) {
        self.hold = false;
        self.hold_reason = None;
        self.changed = true;
    }

    /// Drop queued lines and any hold
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending = false;
        self.busy = false;
        self.unhold();
    }

    /// True once after each change
    pub fn peek(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn is_hold(&self) -> bool {
        self.hold
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn to_status(&self) -> FeederStatus {
        FeederStatus {
            hold: self.hold,
            hold_reason: self.hold_reason.clone(),
            queue: self.queue.len(),
            pending: self.pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::filter::{FilterOutcome, PassThrough};

    fn ctx() -> FilterContext {
        FilterContext::default()
    }

    #[test]
    fn test_one_line_in_flight() {
        let mut feeder = Feeder::new();
        feeder.feed(["G91", "G0 X1\nG90"], LineContext::new());
        assert_eq!(feeder.size(), 3);

        let step = feeder.next(&mut PassThrough, &ctx());
        assert_eq!(step.line.as_deref(), Some("G91"));
        assert!(feeder.next(&mut PassThrough, &ctx()).line.is_none());

        assert!(feeder.ack());
        assert!(!feeder.ack());
        assert_eq!(
            feeder.next(&mut PassThrough, &ctx()).line.as_deref(),
            Some("G0 X1")
        );
    }

    #[test]
    fn test_swallowed_lines_are_skipped() {
        let mut feeder = Feeder::new();
        feeder.feed(["%x=1", "G0 X[x]"], LineContext::new());
        let mut filter = |line: &str, _: &FilterContext| {
            if line.starts_with('%') {
                FilterOutcome::swallow()
            } else {
                FilterOutcome::pass(line)
            }
        };
        let step = feeder.next(&mut filter, &ctx());
        assert_eq!(step.line.as_deref(), Some("G0 X[x]"));
        assert!(feeder.is_empty());
    }

    #[test]
    fn test_completion_reported_once() {
        let mut feeder = Feeder::new();
        feeder.feed(["$I"], LineContext::new());
        feeder.next(&mut PassThrough, &ctx());
        feeder.ack();
        assert!(feeder.next(&mut PassThrough, &ctx()).completed);
        assert!(!feeder.next(&mut PassThrough, &ctx()).completed);
    }

    #[test]
    fn test_filter_hold_stops_after_line() {
        let mut feeder = Feeder::new();
        feeder.feed(["M0", "G0 X1"], LineContext::new());
        let mut filter = |line: &str, _: &FilterContext| {
            let outcome = FilterOutcome::pass(line);
            if line == "M0" {
                outcome.with_action(FilterAction::Hold(HoldReason::new("M0")))
            } else {
                outcome
            }
        };
        let step = feeder.next(&mut filter, &ctx());
        assert_eq!(step.line.as_deref(), Some("M0"));
        feeder.ack();
        let step = feeder.next(&mut filter, &ctx());
        assert!(step.line.is_none());
        assert!(!step.completed);
        assert_eq!(feeder.to_status().hold_reason.map(|r| r.data), Some("M0".to_string()));

        feeder.unhold();
        assert_eq!(
            feeder.next(&mut filter, &ctx()).line.as_deref(),
            Some("G0 X1")
        );
    }

    #[test]
    fn test_line_context_reaches_filter() {
        let mut feeder = Feeder::new();
        let mut context = LineContext::new();
        context.insert("depth".to_string(), 2.5);
        feeder.feed(["G0 Z[depth]"], context);
        let mut seen = None;
        let mut filter = |line: &str, c: &FilterContext| {
            seen = c.line_context.get("depth").copied();
            FilterOutcome::pass(line)
        };
        let step = feeder.next(&mut filter, &ctx());
        assert_eq!(step.line.as_deref(), Some("G0 Z[depth]"));
        assert_eq!(seen, Some(2.5));
    }

    #[test]
    fn test_reset_and_peek() {
        let mut feeder = Feeder::new();
        feeder.feed(["G0 X1"], LineContext::new());
        assert!(feeder.peek());
        assert!(!feeder.peek());
        feeder.hold(HoldReason::new("M6"));
        feeder.reset();
        assert!(!feeder.is_hold());
        assert!(feeder.is_empty());
        assert!(feeder.peek());
    }
}
