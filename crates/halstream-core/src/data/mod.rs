//! Data model shared by the controller runtime and its consumers.
//!
//! `ControllerState` is transient and replaced on every confirmed change;
//! `ControllerSettings` accumulates for the life of a connection.

pub mod job;
pub mod modal;
pub mod position;
pub mod settings;
pub mod state;

pub use job::{
    ErrorKind, ErrorReport, FeederStatus, HoldReason, LineContext, SenderStatus, WorkflowState,
    WriteSource,
};
pub use modal::{normalize_word, ModalGroup, ModalState};
pub use position::{Axis, Position};
pub use settings::{
    CodeDescription, ControllerSettings, FirmwareVersion, Parameter, SettingDescription,
    SettingGroup, SpindleInfo, ToolEntry, PARSER_STATE_AUTO_REPORT_BIT,
};
pub use state::{
    ActiveState, AxesInfo, BufferState, ControllerState, MachineStatus, Overrides, ParserState,
    SdCard, SdFile,
};
