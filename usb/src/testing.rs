// Scripted stand-ins for the transports, shared by the unit tests.
use crate::chipset::control::protocol::{cmd, responses};
use crate::error::TransportError;
use crate::transport::{CaptureDeviceProbe, HidTransport, SerialTransport};
use openterface_types::{UsbDeviceInfo, UsbSpeed};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::Duration;

pub fn device(name: &str, vendor_id: u16, product_id: u16, location_id: &str) -> UsbDeviceInfo {
    UsbDeviceInfo {
        product_name: name.to_string(),
        manufacturer: String::from("Test"),
        vendor_id,
        product_id,
        location_id: location_id.to_string(),
        speed: UsbSpeed::High,
    }
}

#[derive(Default)]
pub struct MockSerial {
    port: Mutex<Option<String>>,
    responsive: Mutex<Vec<u32>>,
    reported_baud: Mutex<Option<u32>>,
    cts: Mutex<VecDeque<bool>>,
    last_cts: Mutex<bool>,
    sd_response: Mutex<Option<Vec<u8>>>,
    opened: Mutex<Option<(String, u32)>>,
    open_history: Mutex<Vec<u32>>,
    refused_rates: Mutex<Vec<u32>>,
    query_delay: Mutex<Duration>,
    queries: Mutex<usize>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl MockSerial {
    pub fn with_port(port: &str) -> Self {
        let serial = Self::default();
        *serial.port.lock() = Some(port.to_string());
        serial
    }

    /// GET_INFO only gets an answer when the port is open at one of these rates.
    pub fn responding_at(self, rates: &[u32]) -> Self {
        *self.responsive.lock() = rates.to_vec();
        self
    }

    /// Forces what the driver claims the port runs at, regardless of what was asked for.
    pub fn reporting_baud(self, rate: u32) -> Self {
        *self.reported_baud.lock() = Some(rate);
        self
    }

    pub fn with_sd_response(self, response: Vec<u8>) -> Self {
        *self.sd_response.lock() = Some(response);
        self
    }

    /// Opening at any of these rates fails, as a driver rejecting the speed would.
    pub fn refusing_open_at(self, rates: &[u32]) -> Self {
        *self.refused_rates.lock() = rates.to_vec();
        self
    }

    /// Every query takes this long before it answers.
    pub fn answering_after(self, delay: Duration) -> Self {
        *self.query_delay.lock() = delay;
        self
    }

    pub fn queries(&self) -> usize {
        *self.queries.lock()
    }

    pub fn push_cts(&self, samples: &[bool]) {
        self.cts.lock().extend(samples.iter().copied());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn open_history(&self) -> Vec<u32> {
        self.open_history.lock().clone()
    }
}

impl SerialTransport for MockSerial {
    fn find_port(&self, _vendor_id: u16, _product_id: u16) -> Option<String> {
        self.port.lock().clone()
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<(), TransportError> {
        self.open_history.lock().push(baud_rate);
        if self.refused_rates.lock().contains(&baud_rate) {
            *self.opened.lock() = None;
            return Err(TransportError::Timeout(Duration::ZERO));
        }
        *self.opened.lock() = Some((port.to_string(), baud_rate));
        Ok(())
    }

    fn close(&self) {
        *self.opened.lock() = None;
    }

    fn is_open(&self) -> bool {
        self.opened.lock().is_some()
    }

    fn baud_rate(&self) -> u32 {
        match self.opened.lock().as_ref() {
            Some((_, rate)) => self.reported_baud.lock().unwrap_or(*rate),
            None => 0,
        }
    }

    fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.writes.lock().push(frame.to_vec());
        Ok(())
    }

    fn query(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let delay = *self.query_delay.lock();
        thread::sleep(delay);
        *self.queries.lock() += 1;

        let rate = match self.opened.lock().as_ref() {
            Some((_, rate)) => *rate,
            None => return Err(TransportError::NotOpen),
        };

        match frame.get(3) {
            Some(&cmd::GET_INFO) if self.responsive.lock().contains(&rate) => {
                Ok(responses::info(0x30, true))
            }
            Some(&cmd::SD_SWITCH) => self
                .sd_response
                .lock()
                .clone()
                .ok_or(TransportError::Timeout(timeout)),
            _ => Err(TransportError::Timeout(timeout)),
        }
    }

    fn set_dtr(&self, _asserted: bool) -> Result<(), TransportError> {
        Ok(())
    }

    fn set_rts(&self, _asserted: bool) -> Result<(), TransportError> {
        Ok(())
    }

    fn cts(&self) -> Result<bool, TransportError> {
        let mut last = self.last_cts.lock();
        if let Some(sample) = self.cts.lock().pop_front() {
            *last = sample;
        }
        Ok(*last)
    }
}

#[derive(Default)]
pub struct MockHid {
    registers: Mutex<HashMap<u16, u8>>,
    open: Mutex<bool>,
    fail_open: bool,
}

impl MockHid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn set_register(&self, address: u16, value: u8) {
        self.registers.lock().insert(address, value);
    }

    pub fn set_u16(&self, address: u16, value: u16) {
        let [high, low] = value.to_be_bytes();
        self.set_register(address, high);
        self.set_register(address + 1, low);
    }
}

impl HidTransport for MockHid {
    fn open(&self, vendor_id: u16, product_id: u16) -> Result<(), TransportError> {
        if self.fail_open {
            return Err(TransportError::DeviceNotFound(vendor_id, product_id));
        }
        *self.open.lock() = true;
        Ok(())
    }

    fn close(&self) {
        *self.open.lock() = false;
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }

    fn get_report(&self, address: u16) -> Result<u8, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        Ok(self.registers.lock().get(&address).copied().unwrap_or(0))
    }

    fn set_report(&self, address: u16, value: u8) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.set_register(address, value);
        Ok(())
    }
}

pub struct MockCapture(pub bool);

impl CaptureDeviceProbe for MockCapture {
    fn has_capture_device(&self, _devices: &[UsbDeviceInfo]) -> bool {
        self.0
    }
}
