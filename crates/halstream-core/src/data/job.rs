//! Job-level types: workflow state, queue snapshots and error reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Job state gating the Sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// No program running
    #[default]
    Idle,
    /// Program streaming
    Running,
    /// Program paused
    Paused,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Idle => write!(f, "idle"),
            WorkflowState::Running => write!(f, "running"),
            WorkflowState::Paused => write!(f, "paused"),
        }
    }
}

/// Why a queue was held or the workflow paused
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HoldReason {
    /// Triggering word or directive (`M0`, `M6`, `%wait`, `error`)
    pub data: String,
    /// Operator-facing message
    pub message: Option<String>,
    /// Comment found on the triggering line
    pub comment: Option<String>,
    /// Hold caused by a firmware error
    pub error: bool,
}

impl HoldReason {
    /// Reason with only the triggering word
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Attach an operator message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the line comment
    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

/// Variables attached to queued lines (macro parameters, tool-change context)
pub type LineContext = BTreeMap<String, f64>;

/// Who wrote a line to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteSource {
    /// Interactive / macro queue
    Feeder,
    /// Program queue
    Sender,
    /// Controller-issued query (`$G`)
    Query,
    /// Direct write outside both queues
    Direct,
}

impl fmt::Display for WriteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteSource::Feeder => write!(f, "feeder"),
            WriteSource::Sender => write!(f, "sender"),
            WriteSource::Query => write!(f, "query"),
            WriteSource::Direct => write!(f, "direct"),
        }
    }
}

/// Snapshot of the Feeder
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeederStatus {
    /// Queue is held
    pub hold: bool,
    /// Why it is held
    pub hold_reason: Option<HoldReason>,
    /// Lines waiting
    pub queue: usize,
    /// A line is awaiting acknowledgement
    pub pending: bool,
}

/// Snapshot of the Sender
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SenderStatus {
    /// Streaming protocol
    pub protocol: String,
    /// Queue is held
    pub hold: bool,
    /// Why it is held
    pub hold_reason: Option<HoldReason>,
    /// Program name
    pub name: String,
    /// Program size in bytes
    pub size: usize,
    /// Number of lines
    pub total: usize,
    /// Lines written
    pub sent: usize,
    /// Lines acknowledged
    pub received: usize,
    /// First line streamed when starting mid-program
    pub start_line: usize,
    /// Wall-clock start
    pub start_time: Option<DateTime<Utc>>,
    /// Wall-clock finish
    pub finish_time: Option<DateTime<Utc>>,
    /// Running time excluding pauses, milliseconds
    pub elapsed_time: u64,
    /// Estimated remaining time, milliseconds
    pub remaining_time: u64,
    /// Estimated total time, milliseconds
    pub estimated_time: u64,
    /// Tool changes encountered
    pub tool_changes: u32,
    /// Character-counting budget
    pub buffer_size: usize,
    /// Bytes awaiting acknowledgement
    pub data_length: usize,
}

/// Error or alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// `error:N`
    Error,
    /// `ALARM:N`
    Alarm,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Error => write!(f, "error"),
            ErrorKind::Alarm => write!(f, "alarm"),
        }
    }
}

/// Uniform notification for firmware errors and alarms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error or alarm
    pub kind: ErrorKind,
    /// Numeric code
    pub code: u32,
    /// Description from the firmware table or the built-in table
    pub description: String,
    /// Line that triggered it, if known
    pub line: Option<String>,
    /// 1-based program line number for Sender lines
    pub line_number: Option<usize>,
    /// Where the line came from
    pub origin: Option<WriteSource>,
    /// Controller identifier (port)
    pub controller: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Error => write!(f, "error:{} - {}", self.code, self.description)?,
            ErrorKind::Alarm => write!(f, "ALARM:{} - {}", self.code, self.description)?,
        }
        if let Some(line) = &self.line {
            write!(f, " ({})", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_report_display() {
        let report = ErrorReport {
            kind: ErrorKind::Error,
            code: 20,
            description: "Unsupported command".to_string(),
            line: Some("G5".to_string()),
            line_number: Some(3),
            origin: Some(WriteSource::Sender),
            controller: "/dev/ttyACM0".to_string(),
        };
        assert_eq!(report.to_string(), "error:20 - Unsupported command (G5)");
    }

    #[test]
    fn test_hold_reason_builder() {
        let reason = HoldReason::new("M6")
            .with_message("Change to tool 2")
            .with_comment(Some("endmill".to_string()));
        assert_eq!(reason.data, "M6");
        assert_eq!(reason.message.as_deref(), Some("Change to tool 2"));
        assert!(!reason.error);
    }
}
