use crate::error::TransportError;
use crate::transport::HidTransport;
use log::{debug, info};
use parking_lot::Mutex;
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType};
use std::time::Duration;

const HID_CLASS: u8 = 0x03;

const HID_GET_REPORT: u8 = 0x01;
const HID_SET_REPORT: u8 = 0x09;
const FEATURE_REPORT: u16 = 0x03 << 8;

const REGISTER_READ: u8 = 0xb5;
const REGISTER_WRITE: u8 = 0xb6;
const REPORT_LENGTH: usize = 8;

struct OpenDevice {
    handle: DeviceHandle<GlobalContext>,
    interface: u16,
}

/// Reads and writes capture chipset registers through HID feature reports, using plain control
/// transfers so no kernel HID binding is needed.
pub struct UsbHidTransport {
    device: Mutex<Option<OpenDevice>>,
    timeout: Duration,
}

impl Default for UsbHidTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl UsbHidTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            device: Mutex::new(None),
            timeout,
        }
    }

    fn find_hid_interface(handle: &DeviceHandle<GlobalContext>) -> Result<u16, TransportError> {
        let config = handle.device().active_config_descriptor()?;
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if descriptor.class_code() == HID_CLASS {
                    return Ok(descriptor.interface_number() as u16);
                }
            }
        }
        Err(TransportError::NoHidInterface)
    }

    fn exchange(&self, request: [u8; REPORT_LENGTH]) -> Result<[u8; REPORT_LENGTH], TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or(TransportError::NotOpen)?;

        device.handle.write_control(
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface),
            HID_SET_REPORT,
            FEATURE_REPORT,
            device.interface,
            &request,
            self.timeout,
        )?;

        if request[0] == REGISTER_WRITE {
            return Ok(request);
        }

        let mut response = [0u8; REPORT_LENGTH];
        let read = device.handle.read_control(
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface),
            HID_GET_REPORT,
            FEATURE_REPORT,
            device.interface,
            &mut response,
            self.timeout,
        )?;

        if read < 4 || response[0] != request[0] {
            return Err(TransportError::MalformedResponse(format!(
                "unexpected feature report {:02x?}",
                &response[..read]
            )));
        }
        Ok(response)
    }
}

impl HidTransport for UsbHidTransport {
    fn open(&self, vendor_id: u16, product_id: u16) -> Result<(), TransportError> {
        let handle = rusb::open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(TransportError::DeviceNotFound(vendor_id, product_id))?;
        let interface = Self::find_hid_interface(&handle)?;

        info!(
            "Opened HID interface {} on {:04x}:{:04x}",
            interface, vendor_id, product_id
        );
        *self.device.lock() = Some(OpenDevice { handle, interface });
        Ok(())
    }

    fn close(&self) {
        if self.device.lock().take().is_some() {
            debug!("HID transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    fn get_report(&self, address: u16) -> Result<u8, TransportError> {
        let [high, low] = address.to_be_bytes();
        let response = self.exchange([REGISTER_READ, high, low, 0, 0, 0, 0, 0])?;
        Ok(response[3])
    }

    fn set_report(&self, address: u16, value: u8) -> Result<(), TransportError> {
        let [high, low] = address.to_be_bytes();
        self.exchange([REGISTER_WRITE, high, low, value, 0, 0, 0, 0])?;
        Ok(())
    }
}
