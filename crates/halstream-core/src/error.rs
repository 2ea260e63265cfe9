//! Error handling for halstream
//!
//! Provides error types for all layers of the runtime:
//! - Controller errors (command dispatch and state machine)
//! - G-Code errors (directives and expressions)
//! - Connection errors (transport)
//! - Firmware errors (protocol level)
//!
//! Firmware `error:N` and `ALARM:N` responses are not Rust errors. They are
//! reported as [`crate::data::ErrorReport`] values on the event bus.

use thiserror::Error;

/// Controller error type
///
/// Represents errors raised while dispatching commands to a controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Command name was not recognized
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The command name.
        command: String,
    },

    /// Command arguments were missing or malformed
    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArgument {
        /// The command name.
        command: String,
        /// Why the arguments were rejected.
        reason: String,
    },

    /// Command requires an idle workflow
    #[error("Workflow is {state}, command requires idle")]
    WorkflowBusy {
        /// The current workflow state.
        state: String,
    },

    /// No program is loaded in the sender
    #[error("No program loaded")]
    NoProgramLoaded,

    /// Macro lookup failed
    #[error("Macro not found: {id}")]
    MacroNotFound {
        /// The requested macro id.
        id: String,
    },

    /// Generic controller error
    #[error("Controller error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// G-Code error type
///
/// Represents errors in directive lines and expressions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcodeError {
    /// Expression could not be parsed or evaluated
    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression {
        /// The offending expression text.
        expression: String,
        /// The reason evaluation failed.
        reason: String,
    },

    /// Start line lies outside the loaded program
    #[error("Start line {line} out of range (program has {total} lines)")]
    StartLineOutOfRange {
        /// The requested line.
        line: usize,
        /// Number of lines in the program.
        total: usize,
    },

    /// Program text had no sendable lines
    #[error("Program '{name}' is empty")]
    EmptyProgram {
        /// The program name.
        name: String,
    },
}

/// Connection error type
///
/// Represents errors related to the byte stream to the firmware.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Write attempted on a closed connection
    #[error("Connection closed: {port}")]
    Closed {
        /// The connection identifier.
        port: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Firmware error type
///
/// Represents protocol-level problems talking to the firmware.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FirmwareError {
    /// Response parsing error
    #[error("Failed to parse firmware response: {reason}")]
    ResponseParseError {
        /// The reason the response parsing failed.
        reason: String,
    },

    /// Invalid setting value
    #[error("Invalid setting value for {setting}: {reason}")]
    InvalidSettingValue {
        /// The setting with the invalid value.
        setting: String,
        /// The reason the value is invalid.
        reason: String,
    },
}

/// Main error type for halstream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a controller error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
