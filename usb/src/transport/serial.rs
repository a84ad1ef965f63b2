use crate::error::TransportError;
use crate::transport::{checksum, SerialTransport};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

const PACKET_HEADER: [u8; 2] = [0x57, 0xab];

// Header (2), Address, Command, Length
const HEADER_LENGTH: usize = 5;
const READ_SLICE: Duration = Duration::from_millis(20);

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        const FALLBACK_PORT_PREFIXES: [&str; 2] = ["/dev/cu.usbserial", "/dev/cu.usbmodem"];
    } else if #[cfg(target_os = "linux")] {
        const FALLBACK_PORT_PREFIXES: [&str; 2] = ["/dev/ttyUSB", "/dev/ttyACM"];
    } else {
        const FALLBACK_PORT_PREFIXES: [&str; 1] = ["COM"];
    }
}

/// A serial port speaking the WCH framing (0x57 0xAB header, trailing sum checksum).
pub struct SerialPortTransport {
    port: Mutex<Option<Box<dyn SerialPort>>>,
}

impl Default for SerialPortTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPortTransport {
    pub fn new() -> Self {
        Self {
            port: Mutex::new(None),
        }
    }

    fn with_port<T>(
        &self,
        action: impl FnOnce(&mut Box<dyn SerialPort>) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut guard = self.port.lock();
        match guard.as_mut() {
            Some(port) => action(port),
            None => Err(TransportError::NotOpen),
        }
    }

    fn framed(frame: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(frame.len() + 1);
        packet.extend_from_slice(frame);
        packet.push(checksum(frame));
        packet
    }

    fn read_frame(
        port: &mut Box<dyn SerialPort>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut response: Vec<u8> = Vec::with_capacity(16);
        let mut buffer = [0u8; 64];

        loop {
            // Resync on the header, anything before it is noise from a previous exchange
            if let Some(start) = response
                .windows(2)
                .position(|window| window == PACKET_HEADER)
            {
                response.drain(..start);
            }

            if response.len() >= HEADER_LENGTH {
                let expected = HEADER_LENGTH + response[4] as usize + 1;
                if response.len() >= expected {
                    response.truncate(expected);
                    let (body, sum) = response.split_at(expected - 1);
                    if checksum(body) != sum[0] {
                        return Err(TransportError::MalformedResponse(format!(
                            "checksum mismatch in {response:02x?}"
                        )));
                    }
                    return Ok(response);
                }
            }

            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(timeout));
            }

            match port.read(&mut buffer) {
                Ok(0) => continue,
                Ok(read) => response.extend_from_slice(&buffer[..read]),
                Err(error) if error.kind() == ErrorKind::TimedOut => continue,
                Err(error) => return Err(error.into()),
            }
        }
    }
}

impl SerialTransport for SerialPortTransport {
    fn find_port(&self, vendor_id: u16, product_id: u16) -> Option<String> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(error) => {
                warn!("Unable to list serial ports: {}", error);
                vec![]
            }
        };

        if let Some(port) = ports.iter().find(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.vid == vendor_id && usb.pid == product_id,
            _ => false,
        }) {
            return Some(port.port_name.clone());
        }

        // Not every platform gives us USB details for a port, fall back on the usual names.
        let fallback = ports
            .into_iter()
            .map(|port| port.port_name)
            .find(|name| FALLBACK_PORT_PREFIXES.iter().any(|p| name.starts_with(p)));
        if let Some(name) = &fallback {
            debug!(
                "No port matched {:04x}:{:04x}, falling back to {}",
                vendor_id, product_id, name
            );
        }
        fallback
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<(), TransportError> {
        if !Path::new(port).exists() && !port.starts_with("COM") {
            return Err(TransportError::IoError(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{port} does not exist"),
            )));
        }

        // Drop any existing handle first, some drivers refuse a second open
        self.close();

        let opened = serialport::new(port, baud_rate)
            .timeout(READ_SLICE)
            .open()?;
        info!("Opened serial port {} @ {} baud", port, baud_rate);

        *self.port.lock() = Some(opened);
        Ok(())
    }

    fn close(&self) {
        if self.port.lock().take().is_some() {
            debug!("Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn baud_rate(&self) -> u32 {
        self.with_port(|port| Ok(port.baud_rate()?)).unwrap_or(0)
    }

    fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        let packet = Self::framed(frame);
        self.with_port(|port| {
            port.write_all(&packet)?;
            port.flush()?;
            Ok(())
        })
    }

    fn query(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let packet = Self::framed(frame);
        self.with_port(|port| {
            port.clear(ClearBuffer::Input)?;
            port.write_all(&packet)?;
            port.flush()?;
            Self::read_frame(port, timeout)
        })
    }

    fn set_dtr(&self, asserted: bool) -> Result<(), TransportError> {
        self.with_port(|port| Ok(port.write_data_terminal_ready(asserted)?))
    }

    fn set_rts(&self, asserted: bool) -> Result<(), TransportError> {
        self.with_port(|port| Ok(port.write_request_to_send(asserted)?))
    }

    fn cts(&self) -> Result<bool, TransportError> {
        self.with_port(|port| Ok(port.read_clear_to_send()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_appends_checksum() {
        assert_eq!(
            SerialPortTransport::framed(&[0x57, 0xab, 0x00, 0x01, 0x00]),
            vec![0x57, 0xab, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn closed_transport_refuses_io() {
        let transport = SerialPortTransport::new();
        assert!(!transport.is_open());
        assert_eq!(transport.baud_rate(), 0);
        assert!(matches!(
            transport.write(&[0x57, 0xab]),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(transport.cts(), Err(TransportError::NotOpen)));
        transport.close();
    }
}
