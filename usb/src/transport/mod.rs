// The byte level collaborators. Chipsets build frames and pick register addresses, these move
// bytes, apply their own timeouts and own the framing checksum.
use crate::error::TransportError;
use openterface_types::UsbDeviceInfo;
use byteorder::{BigEndian, ByteOrder};
use std::time::Duration;

pub mod capture;
pub mod hid;
pub mod serial;

pub trait SerialTransport: Send + Sync {
    /// Locates the port path for a USB serial bridge.
    fn find_port(&self, vendor_id: u16, product_id: u16) -> Option<String>;

    fn open(&self, port: &str, baud_rate: u32) -> Result<(), TransportError>;
    fn close(&self);
    fn is_open(&self) -> bool;

    /// The rate the driver reports for the open port, 0 when closed.
    fn baud_rate(&self) -> u32;

    /// Sends a frame, the checksum byte is appended here.
    fn write(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Sends a frame and waits for a complete, checksummed response frame.
    fn query(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn set_dtr(&self, asserted: bool) -> Result<(), TransportError>;
    fn set_rts(&self, asserted: bool) -> Result<(), TransportError>;
    fn cts(&self) -> Result<bool, TransportError>;
}

/// Register level access to a video chipset over HID feature reports.
pub trait HidTransport: Send + Sync {
    fn open(&self, vendor_id: u16, product_id: u16) -> Result<(), TransportError>;
    fn close(&self);
    fn is_open(&self) -> bool;

    fn get_report(&self, address: u16) -> Result<u8, TransportError>;
    fn set_report(&self, address: u16, value: u8) -> Result<(), TransportError>;

    /// 16bit values are stored high byte first across two consecutive registers.
    fn read_u16(&self, address: u16) -> Result<u16, TransportError> {
        let high = self.get_report(address)?;
        let low = self.get_report(address.wrapping_add(1))?;
        Ok(BigEndian::read_u16(&[high, low]))
    }

    fn read_version(&self, addresses: [u16; 4]) -> Result<String, TransportError> {
        let mut version = String::with_capacity(8);
        for address in addresses {
            version.push_str(&format!("{:02x}", self.get_report(address)?));
        }
        Ok(version)
    }
}

/// Whether the OS exposes a video capture device for the dongle. Decided from an already
/// enumerated device list, implementations must not touch hardware.
pub trait CaptureDeviceProbe: Send + Sync {
    fn has_capture_device(&self, devices: &[UsbDeviceInfo]) -> bool;
}

/// Sum of every byte in the frame, including the header.
pub fn checksum(frame: &[u8]) -> u8 {
    frame.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}
