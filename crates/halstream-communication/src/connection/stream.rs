//! Any `AsyncRead + AsyncWrite` stream as a connection.
//!
//! Used for TCP sockets and, in tests, for an in-memory duplex pipe that
//! plays the firmware.

use std::sync::atomic::Ordering;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{ChannelConnection, LineBuffer, TransportEvent, EVENT_CHANNEL_CAPACITY};

const READ_CHUNK: usize = 1024;

/// Spawn reader and writer tasks for `stream`
pub fn spawn_stream<S>(
    ident: impl Into<String>,
    stream: S,
) -> (ChannelConnection, mpsc::Receiver<TransportEvent>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let ident = ident.into();
    let (connection, mut outgoing) = ChannelConnection::new(ident.clone());
    let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (mut reader, mut writer) = tokio::io::split(stream);

    let open = connection.open_flag();
    let reader_events = events.clone();
    let reader_ident = ident.clone();
    tokio::spawn(async move {
        let mut lines = LineBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    tracing::info!("{} closed by peer", reader_ident);
                    break;
                }
                Ok(n) => {
                    for line in lines.push(&chunk[..n]) {
                        if reader_events.send(TransportEvent::Data(line)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Read from {} failed: {}", reader_ident, e);
                    reader_events.send(TransportEvent::Error(e.to_string())).await.ok();
                    break;
                }
            }
        }
        open.store(false, Ordering::SeqCst);
        reader_events.send(TransportEvent::Close).await.ok();
    });

    let open = connection.open_flag();
    tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            if !open.load(Ordering::SeqCst) {
                break;
            }
            let result = async {
                writer.write_all(&message.bytes).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = result {
                tracing::error!("Write to {} failed: {}", ident, e);
                open.store(false, Ordering::SeqCst);
                events.send(TransportEvent::Error(e.to_string())).await.ok();
                break;
            }
        }
        writer.shutdown().await.ok();
    });

    (connection, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn test_duplex_lines_and_writes() {
        let (local, remote) = tokio::io::duplex(256);
        let (mut connection, mut events) = spawn_stream("duplex", local);
        let (remote_read, mut remote_write) = tokio::io::split(remote);

        remote_write.write_all(b"Grbl").await.unwrap();
        remote_write.write_all(b"HAL 1.1f\r\nok\n").await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Data("GrblHAL 1.1f".to_string()))
        );
        assert_eq!(events.recv().await, Some(TransportEvent::Data("ok".to_string())));

        connection.write("$$\n").unwrap();
        let mut remote_lines = tokio::io::BufReader::new(remote_read).lines();
        assert_eq!(remote_lines.next_line().await.unwrap().as_deref(), Some("$$"));

        drop(remote_write);
        drop(remote_lines);
        assert_eq!(events.recv().await, Some(TransportEvent::Close));
        assert!(!connection.is_open());
    }
}
