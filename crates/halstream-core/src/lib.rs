//! # halstream Core
//!
//! Data model, error types and the event bus shared by the halstream
//! controller runtime and its front ends.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod units;

pub use data::{
    ActiveState, Axis, ControllerSettings, ControllerState, ErrorKind, ErrorReport, FeederStatus,
    HoldReason, LineContext, MachineStatus, ModalGroup, ModalState, ParserState, Position,
    SenderStatus, WorkflowState, WriteSource,
};

pub use error::{ConnectionError, ControllerError, Error, FirmwareError, GcodeError, Result};

pub use event_bus::{
    event_bus, AppEvent, ConnectionEvent, ControllerEvent, EventBus, EventBusConfig,
    EventCategory, EventFilter, JobEvent, SerialEvent, SubscriptionId, WorkflowEvent,
};

pub use units::MeasurementSystem;
