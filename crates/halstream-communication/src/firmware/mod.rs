//! Firmware implementations
//!
//! Only GRBL-HAL is supported.

pub mod grblhal;

pub use grblhal::{Controller, ControllerCommand, ControllerSnapshot, Frame, RealtimeCommand, Runner};
