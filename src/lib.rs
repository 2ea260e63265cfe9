//! # halstream
//!
//! A GRBL-HAL controller runtime and console sender for CNC machines.
//!
//! ## Architecture
//!
//! halstream is organized as a workspace:
//!
//! 1. **halstream-core** - Data model, errors, event bus, units
//! 2. **halstream-settings** - TOML configuration
//! 3. **halstream-communication** - Connections, parser, Runner, Feeder,
//!    Sender, Workflow and the per-connection controller service
//! 4. **halstream** - Console binary and logging setup

pub mod console;

pub use halstream_communication::{
    connect, list_ports, ControllerCommand, ControllerHandle, ControllerRegistry,
    ControllerSnapshot, SerialTransport, TcpTransport, Transport,
};
pub use halstream_core::event_bus::{AppEvent, EventBus};
pub use halstream_core::{ConnectionError, ControllerError, Error, GcodeError, Result};
pub use halstream_settings::{Config, ConnectionType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support, defaulting to `info`
/// - Output on stderr so the console keeps stdout for machine traffic
/// - JSON lines when `json` is set
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
