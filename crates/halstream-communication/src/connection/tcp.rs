//! Raw TCP (telnet-style) connections to networked controllers.

use std::time::Duration;

use async_trait::async_trait;
use halstream_core::error::ConnectionError;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{spawn_stream, ChannelConnection, Transport, TransportEvent};

#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn ident(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(
        &self,
    ) -> Result<(ChannelConnection, mpsc::Receiver<TransportEvent>), ConnectionError> {
        let ident = self.ident();
        tracing::info!("Connecting to {}", ident);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&ident))
            .await
            .map_err(|_| ConnectionError::ConnectionTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| ConnectionError::FailedToOpen {
                port: ident.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();
        Ok(spawn_stream(ident, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok\r\n").await.unwrap();
            let mut buf = [0u8; 1];
            socket.read_exact(&mut buf).await.unwrap();
            buf[0]
        });

        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(2));
        let (mut connection, mut events) = transport.open().await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Data("ok".to_string())));
        connection.write_immediate(b"?").unwrap();
        assert_eq!(server.await.unwrap(), b'?');
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(2));
        assert!(matches!(
            transport.open().await,
            Err(ConnectionError::FailedToOpen { .. })
        ));
    }
}
