//! GRBL-HAL Firmware Support
//!
//! Parser registry, runner, line filter and the [`Controller`] that ties the
//! outbound queues to the protocol state machine.

pub mod commands;
pub mod constants;
pub mod controller;
pub mod error_decoder;
pub mod filter;
pub mod parser;
pub mod runner;
pub mod start_line;

pub use commands::ControllerCommand;
pub use constants::RealtimeCommand;
pub use controller::{Controller, ControllerSnapshot};
pub use filter::{LineFilter, LineFilterOptions};
pub use parser::{parse_line, Frame};
pub use runner::{Runner, RunnerEvent};
