use crate::config::HalConfig;
use crate::devices::ids_for;
use crate::transport::SerialTransport;
use log::{debug, warn};
use openterface_types::{
    ChipsetCapabilities, ChipsetInfo, ChipsetType, CommunicationInterface, ControlChipsetKind,
    ControlChipsetState, ControlDeviceStatus, UsbDeviceInfo,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub mod activity;
pub mod ch32v208;
pub mod ch9329;
pub mod protocol;

/// A USB to serial HID bridge. Both variants share the lifecycle
/// `Uninitialized -> Detecting -> Ready (-> Monitoring)`, back to `Uninitialized` on
/// deinitialise, but every step is implemented per chip.
pub trait ControlChipset: Send + Sync {
    fn kind(&self) -> ControlChipsetKind;
    fn chipset_info(&self) -> &ChipsetInfo;
    fn capabilities(&self) -> &ChipsetCapabilities;
    fn communication_interface(&self) -> CommunicationInterface;
    fn supported_baud_rates(&self) -> &'static [u32];

    fn state(&self) -> ControlChipsetState;
    fn is_connected(&self) -> bool;
    fn is_device_ready(&self) -> bool;
    fn current_baud_rate(&self) -> u32;

    /// Detects, brings up communication and validates. True leaves the chip connected.
    fn initialize(&self) -> bool;

    /// Stops any polling and closes the port. Safe to call repeatedly.
    fn deinitialize(&self);

    fn detect_device(&self) -> bool;
    fn validate_connection(&self) -> bool;
    fn establish_communication(&self) -> bool;
    fn configure_device(&self, baud_rate: u32, mode: u8) -> bool;

    /// Starts target activity sensing. Refused until communication is established.
    fn monitor_hid_events(&self) -> bool;

    fn get_version(&self) -> Option<String>;
    fn get_device_status(&self) -> ControlDeviceStatus;
    fn reset_device(&self) -> bool;

    /// Writes a frame. Until the device is ready frames are dropped unless `force` is set.
    fn send_command(&self, frame: &[u8], force: bool) -> bool;
}

#[derive(Clone)]
pub struct ControlContext {
    pub devices: Arc<[UsbDeviceInfo]>,
    pub serial: Arc<dyn SerialTransport>,
    pub config: HalConfig,
}

pub fn create_control_chipset(
    kind: ControlChipsetKind,
    context: ControlContext,
) -> Arc<dyn ControlChipset> {
    match kind {
        ControlChipsetKind::Ch9329 => Arc::new(ch9329::Ch9329::new(context)),
        ControlChipsetKind::Ch32v208 => Arc::new(ch32v208::Ch32v208::new(context)),
    }
}

pub(crate) fn info_for(kind: ControlChipsetKind, name: &str) -> ChipsetInfo {
    let (vendor_id, product_id) = ids_for(ChipsetType::Control(kind));
    ChipsetInfo::new(
        name,
        vendor_id,
        product_id,
        "WCH",
        ChipsetType::Control(kind),
    )
}

/// Connection flags shared with background tasks.
#[derive(Default)]
pub(crate) struct LinkState {
    connected: AtomicBool,
    ready: AtomicBool,
    baud_rate: AtomicU32,
    state: Mutex<ControlChipsetState>,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.load(Ordering::Acquire)
    }

    pub fn set_baud_rate(&self, baud_rate: u32) {
        self.baud_rate.store(baud_rate, Ordering::Release);
    }

    pub fn state(&self) -> ControlChipsetState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ControlChipsetState) {
        *self.state.lock() = state;
    }

    pub fn reset(&self) {
        self.set_connected(false);
        self.set_ready(false);
        self.set_baud_rate(0);
        self.set_state(ControlChipsetState::Uninitialized);
    }
}

pub(crate) fn present_in(devices: &[UsbDeviceInfo], info: &ChipsetInfo) -> bool {
    devices
        .iter()
        .any(|d| d.matches(info.vendor_id(), info.product_id()))
}

pub(crate) fn resolve_port(context: &ControlContext, info: &ChipsetInfo) -> Option<String> {
    if let Some(port) = &context.config.serial_port {
        return Some(port.clone());
    }
    context
        .serial
        .find_port(info.vendor_id(), info.product_id())
}

/// The shared readiness gate in front of the transport.
pub(crate) fn gated_write(
    serial: &dyn SerialTransport,
    link: &LinkState,
    name: &str,
    frame: &[u8],
    force: bool,
) -> bool {
    if !link.is_ready() && !force {
        warn!(
            "{} is not ready, dropping command {:02x?}",
            name,
            frame.get(3)
        );
        return false;
    }

    match serial.write(frame) {
        Ok(()) => {
            debug!("{} <- {:02x?}", name, frame);
            true
        }
        Err(error) => {
            warn!("Failed to send command to {}: {}", name, error);
            false
        }
    }
}
