//! [`Connection`] backed by a channel to a writer task or thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use halstream_core::error::ConnectionError;
use tokio::sync::mpsc;

use super::Connection;

/// Outgoing bytes; realtime writes are flagged so the writer can log them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub bytes: Vec<u8>,
    pub realtime: bool,
}

/// Write handle shared with a transport's writer
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    ident: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
}

impl ChannelConnection {
    /// Connection plus the receiving end its writer drains
    pub fn new(ident: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outgoing, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            ident: ident.into(),
            outgoing,
            open: Arc::new(AtomicBool::new(true)),
        };
        (connection, receiver)
    }

    /// Flag shared with the reader so either side can mark the link closed
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        self.open.clone()
    }

    fn send(&self, bytes: &[u8], realtime: bool) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed {
                port: self.ident.clone(),
            });
        }
        self.outgoing
            .send(Outgoing {
                bytes: bytes.to_vec(),
                realtime,
            })
            .map_err(|_| {
                self.open.store(false, Ordering::SeqCst);
                ConnectionError::ConnectionLost {
                    reason: format!("writer for {} has stopped", self.ident),
                }
            })
    }
}

impl Connection for ChannelConnection {
    fn ident(&self) -> &str {
        &self.ident
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outgoing.is_closed()
    }

    fn write(&mut self, data: &str) -> Result<(), ConnectionError> {
        self.send(data.as_bytes(), false)
    }

    fn write_immediate(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.send(bytes, true)
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::info!("Closing {}", self.ident);
        }
    }
}
