//! # halstream Communication
//!
//! Connections (serial, TCP) and the GRBL-HAL controller runtime: line
//! parsing, the Feeder and Sender queues, the Workflow state machine and the
//! service task that drives a controller per connection.

pub mod connection;
pub mod event_trigger;
pub mod expression;
pub mod firmware;
pub mod registry;
pub mod service;
pub mod streaming;

pub use connection::{
    list_ports, Connection, SerialPortInfo, SerialTransport, TcpTransport, Transport,
    TransportEvent,
};
pub use event_trigger::EventTrigger;
pub use firmware::grblhal::{Controller, ControllerCommand, ControllerSnapshot};
pub use registry::ControllerRegistry;
pub use service::{connect, spawn_controller, ControllerHandle};
pub use streaming::{Feeder, Sender, Workflow};
