//! Event type definitions for the event bus.
//!
//! This module defines every event a controller publishes, organized by
//! category. Events are cloneable and serializable for logging/replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{
    ControllerSettings, ControllerState, ErrorReport, FeederStatus, HoldReason, SenderStatus,
    WorkflowState, WriteSource,
};

/// Root event enum for all application events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Connection lifecycle
    Connection(ConnectionEvent),
    /// Raw traffic
    Serial(SerialEvent),
    /// Controller state, settings and protocol notifications
    Controller(ControllerEvent),
    /// Workflow transitions
    Workflow(WorkflowEvent),
    /// Program and queue progress
    Job(JobEvent),
    /// Firmware errors and alarms
    Error(ErrorReport),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Serial(_) => EventCategory::Serial,
            AppEvent::Controller(_) => EventCategory::Controller,
            AppEvent::Workflow(_) => EventCategory::Workflow,
            AppEvent::Job(_) => EventCategory::Job,
            AppEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Serial(e) => e.description(),
            AppEvent::Controller(e) => e.description(),
            AppEvent::Workflow(e) => e.description(),
            AppEvent::Job(e) => e.description(),
            AppEvent::Error(report) => format!("{} on {}", report, report.controller),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle events.
    Connection,
    /// Raw read/write traffic.
    Serial,
    /// Controller state and protocol events.
    Controller,
    /// Workflow transitions.
    Workflow,
    /// Program and queue events.
    Job,
    /// Error and alarm events.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Serial => write!(f, "Serial"),
            EventCategory::Controller => write!(f, "Controller"),
            EventCategory::Workflow => write!(f, "Workflow"),
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}

/// Connection lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Port opened
    Opened {
        /// Port or host identifier
        port: String,
    },
    /// Port closed
    Closed {
        /// Port or host identifier
        port: String,
    },
    /// Transport failure
    Error {
        /// Port or host identifier
        port: String,
        /// Error message
        message: String,
    },
}

impl ConnectionEvent {
    /// Get a short description
    pub fn description(&self) -> String {
        match self {
            ConnectionEvent::Opened { port } => format!("Opened {}", port),
            ConnectionEvent::Closed { port } => format!("Closed {}", port),
            ConnectionEvent::Error { port, message } => format!("Error on {}: {}", port, message),
        }
    }
}

/// Raw traffic (`serialport:read` / `serialport:write`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SerialEvent {
    /// A line arrived
    Read {
        /// Port identifier
        port: String,
        /// Received line without terminator
        line: String,
    },
    /// Data was written
    Write {
        /// Port identifier
        port: String,
        /// Written data, realtime bytes rendered as `0x..`
        data: String,
        /// Queue that produced it; `None` for realtime bytes
        source: Option<WriteSource>,
    },
}

impl SerialEvent {
    /// Get a short description
    pub fn description(&self) -> String {
        match self {
            SerialEvent::Read { line, .. } => format!("< {}", line),
            SerialEvent::Write { data, .. } => format!("> {}", data.trim_end()),
        }
    }
}

/// Controller state and protocol notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerEvent {
    /// `controller:state`, emitted when state differs from the last emit
    State {
        /// Port identifier
        port: String,
        /// New state
        state: Box<ControllerState>,
    },
    /// `controller:settings`, emitted when settings differ from the last emit
    Settings {
        /// Port identifier
        port: String,
        /// New settings
        settings: Box<ControllerSettings>,
    },
    /// Initialization sequence finished
    Ready {
        /// Port identifier
        port: String,
    },
    /// Firmware startup banner seen
    Startup {
        /// Port identifier
        port: String,
        /// Firmware name
        firmware: String,
        /// Version string
        version: String,
    },
    /// `[MSG:...]` feedback
    Feedback {
        /// Port identifier
        port: String,
        /// Message text
        message: String,
    },
    /// Line no matcher recognized
    Unrecognized {
        /// Port identifier
        port: String,
        /// Raw line
        line: String,
    },
}

impl ControllerEvent {
    /// Get a short description
    pub fn description(&self) -> String {
        match self {
            ControllerEvent::State { port, state } => format!(
                "State on {}: {}",
                port,
                state
                    .status
                    .active_state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            ControllerEvent::Settings { port, settings } => {
                format!("Settings on {}: {} values", port, settings.settings.len())
            }
            ControllerEvent::Ready { port } => format!("Controller ready on {}", port),
            ControllerEvent::Startup {
                port,
                firmware,
                version,
            } => format!("{} {} started on {}", firmware, version, port),
            ControllerEvent::Feedback { message, .. } => format!("Feedback: {}", message),
            ControllerEvent::Unrecognized { line, .. } => format!("Unrecognized: {}", line),
        }
    }
}

/// Workflow transitions (`workflow:state`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    /// State changed
    StateChanged {
        /// Port identifier
        port: String,
        /// New state
        state: WorkflowState,
        /// Pause reason, if paused
        reason: Option<HoldReason>,
    },
}

impl WorkflowEvent {
    /// Get a short description
    pub fn description(&self) -> String {
        match self {
            WorkflowEvent::StateChanged { state, reason, .. } => match reason {
                Some(reason) => format!("Workflow {} ({})", state, reason.data),
                None => format!("Workflow {}", state),
            },
        }
    }
}

/// Program and queue events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// `gcode:load`
    Loaded {
        /// Port identifier
        port: String,
        /// Program name
        name: String,
        /// Line count
        total: usize,
    },
    /// `gcode:unload`
    Unloaded {
        /// Port identifier
        port: String,
    },
    /// `sender:status`
    SenderStatus {
        /// Port identifier
        port: String,
        /// Snapshot
        status: Box<SenderStatus>,
    },
    /// `feeder:status`
    FeederStatus {
        /// Port identifier
        port: String,
        /// Snapshot
        status: FeederStatus,
    },
    /// First program line written
    SenderStarted {
        /// Port identifier
        port: String,
        /// Wall-clock time
        at: DateTime<Utc>,
    },
    /// Last program line acknowledged
    SenderFinished {
        /// Port identifier
        port: String,
        /// Wall-clock time
        at: DateTime<Utc>,
    },
    /// Machine settled after the last line; workflow stopped
    Completed {
        /// Port identifier
        port: String,
    },
    /// Sender asks for time-estimate data
    EstimateRequested {
        /// Port identifier
        port: String,
        /// Program name
        name: String,
    },
    /// `gcode:toolChange`
    ToolChange {
        /// Port identifier
        port: String,
        /// Requested tool
        tool: Option<u32>,
        /// Line containing the M6
        line: String,
        /// Tool-change strategy in effect
        strategy: String,
    },
    /// `%pre_complete` reached
    PreHookComplete {
        /// Port identifier
        port: String,
        /// Comment attached to the marker
        comment: String,
    },
    /// `%toolchange_complete` reached
    ToolChangeComplete {
        /// Port identifier
        port: String,
    },
}

impl JobEvent {
    /// Get a short description
    pub fn description(&self) -> String {
        match self {
            JobEvent::Loaded { name, total, .. } => format!("Loaded {} ({} lines)", name, total),
            JobEvent::Unloaded { .. } => "Program unloaded".to_string(),
            JobEvent::SenderStatus { status, .. } => {
                format!("Sender {}/{}/{}", status.received, status.sent, status.total)
            }
            JobEvent::FeederStatus { status, .. } => format!("Feeder queue {}", status.queue),
            JobEvent::SenderStarted { at, .. } => format!("Sender started at {}", at),
            JobEvent::SenderFinished { at, .. } => format!("Sender finished at {}", at),
            JobEvent::Completed { .. } => "Program complete".to_string(),
            JobEvent::EstimateRequested { name, .. } => format!("Estimate requested for {}", name),
            JobEvent::ToolChange { tool, .. } => match tool {
                Some(tool) => format!("Tool change to T{}", tool),
                None => "Tool change".to_string(),
            },
            JobEvent::PreHookComplete { .. } => "Tool change pre-hook complete".to_string(),
            JobEvent::ToolChangeComplete { .. } => "Tool change complete".to_string(),
        }
    }
}
