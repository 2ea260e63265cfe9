//! Idle/running/paused job state
//!
//! Legal transitions are idle -> running, running -> paused,
//! paused -> running and running|paused -> idle. Anything else is ignored
//! and reported as "no change" so callers never double-apply side effects.

use halstream_core::data::{HoldReason, WorkflowState};

#[derive(Debug, Default)]
pub struct Workflow {
    state: WorkflowState,
    reason: Option<HoldReason>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Why the workflow is paused
    pub fn reason(&self) -> Option<&HoldReason> {
        self.reason.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkflowState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkflowState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == WorkflowState::Paused
    }

    pub fn start(&mut self) -> bool {
        self.transition(WorkflowState::Idle, WorkflowState::Running, None)
    }

    pub fn pause(&mut self, reason: HoldReason) -> bool {
        self.transition(WorkflowState::Running, WorkflowState::Paused, Some(reason))
    }

    pub fn resume(&mut self) -> bool {
        self.transition(WorkflowState::Paused, WorkflowState::Running, None)
    }

    pub fn stop(&mut self) -> bool {
        if self.state == WorkflowState::Idle {
            return false;
        }
        tracing::debug!("Workflow {} -> {}", self.state, WorkflowState::Idle);
        self.state = WorkflowState::Idle;
        self.reason = None;
        true
    }

    fn transition(
        &mut self,
        from: WorkflowState,
        to: WorkflowState,
        reason: Option<HoldReason>,
    ) -> bool {
        if self.state != from {
            tracing::trace!("Ignoring workflow transition {} -> {} from {}", from, to, self.state);
            return false;
        }
        tracing::debug!("Workflow {} -> {}", from, to);
        self.state = to;
        self.reason = reason;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let mut workflow = Workflow::new();
        assert!(workflow.start());
        assert!(workflow.pause(HoldReason::new("M0")));
        assert_eq!(workflow.reason().map(|r| r.data.as_str()), Some("M0"));
        assert!(workflow.resume());
        assert!(workflow.reason().is_none());
        assert!(workflow.stop());
        assert!(workflow.is_idle());
    }

    #[test]
    fn test_illegal_transitions_are_no_ops() {
        let mut workflow = Workflow::new();
        assert!(!workflow.resume());
        assert!(!workflow.pause(HoldReason::new("M0")));
        assert!(!workflow.stop());
        workflow.start();
        assert!(!workflow.start());
        assert!(workflow.pause(HoldReason::new("M0")));
        assert!(!workflow.pause(HoldReason::new("M1")));
        assert_eq!(workflow.reason().map(|r| r.data.as_str()), Some("M0"));
        assert!(workflow.stop());
        assert!(workflow.is_idle());
    }
}
