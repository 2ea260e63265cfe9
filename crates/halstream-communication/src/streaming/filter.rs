//! Line rewriting applied by the Feeder and Sender before transmission.
//!
//! A filter sees one queued line plus an immutable snapshot of the machine
//! context and returns the line to send (empty to swallow it) together with
//! the side effects it requested. The queues never consult live controller
//! state themselves.

use halstream_core::data::{HoldReason, LineContext, ModalState, Position};
use halstream_core::MeasurementSystem;

/// Which queue is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterTarget {
    #[default]
    Feeder,
    Sender,
}

/// Snapshot of the machine taken when a line is filtered
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    /// Queue the line came from
    pub target: FilterTarget,
    /// Machine position
    pub mpos: Position,
    /// Work position
    pub wpos: Position,
    /// Active modal words
    pub modal: ModalState,
    /// Selected tool
    pub tool: u32,
    /// Units of the active program
    pub units: MeasurementSystem,
    /// Firmware reports positions in inches (`$13=1`)
    pub report_inches: bool,
    /// Lines the sender has already transmitted, 0 for the feeder
    pub sent: usize,
    /// Variables attached to the queued line
    pub line_context: LineContext,
}

/// Side effects a filter may request
#[derive(Debug, Clone, PartialEq)]
pub enum FilterAction {
    /// Hold the queue that produced the line
    Hold(HoldReason),
    /// Pause the running program
    PauseWorkflow(HoldReason),
    /// `M6` reached
    ToolChange { tool: Option<u32>, line: String },
    /// `%pre_complete` reached
    PreHookComplete { comment: Option<String> },
    /// `%toolchange_complete` reached
    PostHookComplete,
    /// `%_GCODE_START` reached
    ProgramStart,
    /// A `$n=value` line is about to change a setting
    SettingWrite { name: String, value: String },
}

/// Result of filtering one line
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterOutcome {
    /// Line to transmit; empty means "swallow"
    pub line: String,
    /// Requested side effects, in order
    pub actions: Vec<FilterAction>,
}

impl FilterOutcome {
    /// Pass the line through unchanged
    pub fn pass(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            actions: Vec::new(),
        }
    }

    /// Swallow the line
    pub fn swallow() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: FilterAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Queue-level hold requested by this outcome
    pub fn hold_reason(&self) -> Option<&HoldReason> {
        self.actions.iter().find_map(|action| match action {
            FilterAction::Hold(reason) => Some(reason),
            _ => None,
        })
    }
}

/// Rewrites queued lines before they reach the connection
pub trait DataFilter {
    fn filter(&mut self, line: &str, context: &FilterContext) -> FilterOutcome;
}

impl<F> DataFilter for F
where
    F: FnMut(&str, &FilterContext) -> FilterOutcome,
{
    fn filter(&mut self, line: &str, context: &FilterContext) -> FilterOutcome {
        self(line, context)
    }
}

/// Filter that sends every line unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl DataFilter for PassThrough {
    fn filter(&mut self, line: &str, _context: &FilterContext) -> FilterOutcome {
        FilterOutcome::pass(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_filter() {
        let mut upper = |line: &str, _: &FilterContext| FilterOutcome::pass(line.to_uppercase());
        let outcome = upper.filter("g0 x1", &FilterContext::default());
        assert_eq!(outcome.line, "G0 X1");
    }

    #[test]
    fn test_hold_reason_lookup() {
        let outcome = FilterOutcome::swallow()
            .with_action(FilterAction::ProgramStart)
            .with_action(FilterAction::Hold(HoldReason::new("M0")));
        assert_eq!(outcome.hold_reason().map(|r| r.data.as_str()), Some("M0"));
        assert!(outcome.line.is_empty());
    }
}
