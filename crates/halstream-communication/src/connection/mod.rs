//! Byte-stream transports to the firmware
//!
//! The controller only needs [`Connection`]: a write side that is never
//! queued by the transport itself, plus a stream of [`TransportEvent`]s
//! delivered to whoever drives the controller. TCP, serial ports and any
//! in-memory `AsyncRead + AsyncWrite` stream all end up as a
//! [`ChannelConnection`] paired with an event receiver.

pub mod channel;
pub mod line_buffer;
pub mod serial;
pub mod stream;
pub mod tcp;

use async_trait::async_trait;
use halstream_core::error::ConnectionError;
use tokio::sync::mpsc;

pub use channel::{ChannelConnection, Outgoing};
pub use line_buffer::LineBuffer;
pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use stream::spawn_stream;
pub use tcp::TcpTransport;

/// Capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Inbound traffic and lifecycle of a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete line, terminator removed
    Data(String),
    /// Remote end closed
    Close,
    /// Transport failure; a `Close` follows
    Error(String),
}

/// Write side of an open transport
pub trait Connection: Send {
    /// Port path or `host:port`
    fn ident(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Write a line (terminator included by the caller)
    fn write(&mut self, data: &str) -> Result<(), ConnectionError>;

    /// Write realtime bytes ahead of anything queued
    fn write_immediate(&mut self, bytes: &[u8]) -> Result<(), ConnectionError>;

    fn close(&mut self);
}

/// Something that can be opened into a connection and its event stream
#[async_trait]
pub trait Transport: Send + Sync {
    fn ident(&self) -> String;

    async fn open(
        &self,
    ) -> Result<(ChannelConnection, mpsc::Receiver<TransportEvent>), ConnectionError>;
}
