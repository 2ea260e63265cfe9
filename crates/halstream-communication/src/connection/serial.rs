//! Serial port connections
//!
//! `serialport` is blocking, so each open port gets a reader thread and a
//! writer thread that bridge to the async side through channels.
//!
//! Supports:
//! - Port enumeration filtered to likely CNC controllers
//! - Baud rate configuration
//! - Line-oriented reads with `\r\n` handling

use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use halstream_core::error::ConnectionError;
use tokio::sync::mpsc;

use super::{ChannelConnection, LineBuffer, Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};

/// Read timeout; bounds how long the reader takes to notice a close
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB STMicroelectronics Virtual COM Port")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// Serial number if available
    pub serial_number: Option<String>,
    /// USB vendor ID if applicable
    pub vid: Option<u16>,
    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that look like CNC controllers
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::SerialError {
            reason: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let mut info = SerialPortInfo {
                port_name: port.port_name.clone(),
                description: port_description(port),
                manufacturer: None,
                serial_number: None,
                vid: None,
                pid: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
                info.serial_number = usb.serial_number.clone();
            }
            info
        })
        .collect())
}

/// Windows COM*, Linux ttyUSB/ttyACM, macOS usbserial/usbmodem
fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }
    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SerialTransport {
    port: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn ident(&self) -> String {
        self.port.clone()
    }

    async fn open(
        &self,
    ) -> Result<(ChannelConnection, mpsc::Receiver<TransportEvent>), ConnectionError> {
        let path = self.port.clone();
        let baud_rate = self.baud_rate;
        tracing::info!("Opening {} at {} baud", path, baud_rate);

        let open_path = path.clone();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&open_path, baud_rate)
                .timeout(READ_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| ConnectionError::SerialError {
            reason: e.to_string(),
        })?
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound { port: path.clone() },
            _ => ConnectionError::FailedToOpen {
                port: path.clone(),
                reason: e.to_string(),
            },
        })?;

        let mut reader = port.try_clone().map_err(|e| ConnectionError::SerialError {
            reason: e.to_string(),
        })?;
        let mut writer = port;

        let (connection, mut outgoing) = ChannelConnection::new(path.clone());
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let open = connection.open_flag();
        let reader_events = events.clone();
        let reader_path = path.clone();
        std::thread::Builder::new()
            .name(format!("serial-read {}", path))
            .spawn(move || {
                let mut lines = LineBuffer::new();
                let mut chunk = [0u8; 1024];
                while open.load(Ordering::SeqCst) {
                    match reader.read(&mut chunk) {
                        Ok(0) => continue,
                        Ok(n) => {
                            for line in lines.push(&chunk[..n]) {
                                if reader_events.blocking_send(TransportEvent::Data(line)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            tracing::error!("Read from {} failed: {}", reader_path, e);
                            reader_events.blocking_send(TransportEvent::Error(e.to_string())).ok();
                            break;
                        }
                    }
                }
                open.store(false, Ordering::SeqCst);
                reader_events.blocking_send(TransportEvent::Close).ok();
            })
            .map_err(|e| ConnectionError::IoError {
                reason: e.to_string(),
            })?;

        let open = connection.open_flag();
        let writer_path = path.clone();
        std::thread::Builder::new()
            .name(format!("serial-write {}", path))
            .spawn(move || {
                while let Some(message) = outgoing.blocking_recv() {
                    if !open.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = writer
                        .write_all(&message.bytes)
                        .and_then(|_| writer.flush());
                    if let Err(e) = result {
                        tracing::error!("Write to {} failed: {}", writer_path, e);
                        open.store(false, Ordering::SeqCst);
                        events.blocking_send(TransportEvent::Error(e.to_string())).ok();
                        break;
                    }
                }
            })
            .map_err(|e| ConnectionError::IoError {
                reason: e.to_string(),
            })?;

        Ok((connection, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cnc_port_patterns() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(is_valid_cnc_port("/dev/ttyACM0"));
        assert!(is_valid_cnc_port("/dev/ttyUSB1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem1101"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
        assert!(!is_valid_cnc_port("/dev/cu.Bluetooth-Incoming-Port"));
    }

    #[tokio::test]
    async fn test_missing_port_fails_to_open() {
        let transport = SerialTransport::new("/dev/ttyACM-does-not-exist", 115200);
        assert!(transport.open().await.is_err());
    }
}
