use openterface_types::{
    ChipsetCapabilities, ChipsetInfo, ChipsetType, CommunicationInterface, ControlChipsetKind,
    ControlChipsetState, ControlDeviceStatus,
};
use openterface_usb::chipset::control::ControlChipset;
use openterface_usb::config::HalConfig;
use openterface_usb::devices::StaticEnumerator;
use openterface_usb::hal::integration::HalIntegrationManager;
use openterface_usb::hal::{Collaborators, HardwareAbstractionLayer};
use openterface_usb::transport::capture::EnumeratedCaptureProbe;
use openterface_usb::transport::hid::UsbHidTransport;
use openterface_usb::transport::serial::SerialPortTransport;
use openterface_types::UsbDeviceInfo;
use parking_lot::Mutex;
use std::sync::Arc;

/// A HAL over a bus with these devices on it. No transport is opened unless an Openterface
/// chipset is among them.
pub fn integration_with(devices: Vec<UsbDeviceInfo>) -> HalIntegrationManager {
    let enumerator = Arc::new(StaticEnumerator::new(devices));
    let collaborators = Collaborators {
        enumerator,
        serial: Arc::new(SerialPortTransport::new()),
        hid: Arc::new(UsbHidTransport::default()),
        capture: Arc::new(EnumeratedCaptureProbe),
    };
    let hal = HardwareAbstractionLayer::new(collaborators, HalConfig::default());
    HalIntegrationManager::new(Arc::new(hal))
}

pub fn empty_integration() -> HalIntegrationManager {
    integration_with(vec![])
}

/// A control chipset that records what it's asked to send.
pub struct FakeControl {
    info: ChipsetInfo,
    capabilities: ChipsetCapabilities,
    ready: bool,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl Default for FakeControl {
    fn default() -> Self {
        Self {
            info: ChipsetInfo::new(
                "Fake",
                0x1a86,
                0x7523,
                "Test",
                ChipsetType::Control(ControlChipsetKind::Ch9329),
            ),
            capabilities: ChipsetCapabilities::default(),
            ready: false,
            frames: Mutex::new(Vec::new()),
        }
    }
}

impl FakeControl {
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }
}

impl ControlChipset for FakeControl {
    fn kind(&self) -> ControlChipsetKind {
        ControlChipsetKind::Ch9329
    }

    fn chipset_info(&self) -> &ChipsetInfo {
        &self.info
    }

    fn capabilities(&self) -> &ChipsetCapabilities {
        &self.capabilities
    }

    fn communication_interface(&self) -> CommunicationInterface {
        CommunicationInterface::Serial
    }

    fn supported_baud_rates(&self) -> &'static [u32] {
        &[115200]
    }

    fn state(&self) -> ControlChipsetState {
        if self.ready {
            ControlChipsetState::Ready
        } else {
            ControlChipsetState::Uninitialized
        }
    }

    fn is_connected(&self) -> bool {
        self.ready
    }

    fn is_device_ready(&self) -> bool {
        self.ready
    }

    fn current_baud_rate(&self) -> u32 {
        if self.ready {
            115200
        } else {
            0
        }
    }

    fn initialize(&self) -> bool {
        self.ready
    }

    fn deinitialize(&self) {}

    fn detect_device(&self) -> bool {
        true
    }

    fn validate_connection(&self) -> bool {
        self.ready
    }

    fn establish_communication(&self) -> bool {
        self.ready
    }

    fn configure_device(&self, _baud_rate: u32, _mode: u8) -> bool {
        self.ready
    }

    fn monitor_hid_events(&self) -> bool {
        self.ready
    }

    fn get_version(&self) -> Option<String> {
        None
    }

    fn get_device_status(&self) -> ControlDeviceStatus {
        ControlDeviceStatus {
            state: self.state(),
            is_connected: self.ready,
            is_device_ready: self.ready,
            baud_rate: self.current_baud_rate(),
            ..Default::default()
        }
    }

    fn reset_device(&self) -> bool {
        self.ready
    }

    fn send_command(&self, frame: &[u8], force: bool) -> bool {
        if !self.ready && !force {
            return false;
        }
        self.frames.lock().push(frame.to_vec());
        true
    }
}
