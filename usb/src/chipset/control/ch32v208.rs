use crate::chipset::control::protocol::{self, ChipInfo};
use crate::chipset::control::{
    gated_write, info_for, present_in, resolve_port, ControlChipset, ControlContext, LinkState,
};
use crate::error::TransportError;
use crate::task::BackgroundTask;
use crate::transport::SerialTransport;
use enumset::enum_set;
use log::{debug, info, warn};
use openterface_types::{
    ChipsetCapabilities, ChipsetFeature, ChipsetInfo, CommunicationInterface, ControlChipsetKind,
    ControlChipsetState, ControlDeviceStatus, SdCardDirection,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const FIXED_BAUD_RATE: u32 = 115200;
const SUPPORTED_BAUD_RATES: [u32; 1] = [FIXED_BAUD_RATE];

/// The CH32V208 runs the CH9329 command set at a fixed 115200 baud, and reports HID state itself
/// rather than through the modem lines. It also owns the SD card mux.
pub struct Ch32v208 {
    info: ChipsetInfo,
    capabilities: ChipsetCapabilities,
    context: ControlContext,

    link: Arc<LinkState>,
    version: Mutex<Option<String>>,
    port: Mutex<Option<String>>,

    sd_direction: Arc<Mutex<Option<SdCardDirection>>>,

    // At most one query runs at a time, and it's joined before the port is released.
    sd_query: Mutex<Option<BackgroundTask>>,
}

impl Ch32v208 {
    pub fn new(context: ControlContext) -> Self {
        Self {
            info: info_for(ControlChipsetKind::Ch32v208, "CH32V208"),
            capabilities: ChipsetCapabilities {
                supports_hid: true,
                supports_firmware_update: true,
                max_data_transfer_rate: FIXED_BAUD_RATE as u64,
                features: enum_set!(
                    ChipsetFeature::KeyboardEmulation
                        | ChipsetFeature::MouseEmulation
                        | ChipsetFeature::SdCardSwitching
                        | ChipsetFeature::FirmwareUpdate
                ),
                ..Default::default()
            },
            context,
            link: Arc::new(LinkState::default()),
            version: Mutex::new(None),
            port: Mutex::new(None),
            sd_direction: Arc::new(Mutex::new(None)),
            sd_query: Mutex::new(None),
        }
    }

    fn close_port(&self) {
        if self.port.lock().take().is_some() {
            self.context.serial.close();
        }
    }

    fn read_version(&self) -> Option<String> {
        let timeout = self.context.config.serial_response_timeout();
        let response = self.context.serial.query(&protocol::get_info(), timeout);
        match response.and_then(|r| ChipInfo::parse(&r)) {
            Ok(chip) => Some(chip.version),
            Err(error) => {
                debug!("Unable to read CH32V208 version: {}", error);
                None
            }
        }
    }

    /// Asks the chip which side the SD card is switched to. Bounded by the configured timeout, a
    /// failure leaves the connection alone.
    pub fn query_sd_direction(&self) -> Option<SdCardDirection> {
        if !self.link.is_connected() {
            return None;
        }

        let timeout = self.context.config.sd_query_timeout();
        match query_sd(self.context.serial.as_ref(), timeout) {
            Ok(direction) => {
                *self.sd_direction.lock() = Some(direction);
                Some(direction)
            }
            Err(error) => {
                warn!("SD card direction query failed: {}", error);
                None
            }
        }
    }

    /// Kicks off a query on a utility thread, the result lands in the next status read.
    fn refresh_sd_direction(&self) {
        let mut sd_query = self.sd_query.lock();
        if !self.link.is_connected() || sd_query.as_ref().is_some_and(|q| q.is_running()) {
            return;
        }

        let serial = self.context.serial.clone();
        let direction = self.sd_direction.clone();
        let link = self.link.clone();
        let timeout = self.context.config.sd_query_timeout();

        let task = BackgroundTask::delayed("ch32v208-sd-query", Duration::ZERO, move || {
            match query_sd(serial.as_ref(), timeout) {
                Ok(value) if link.is_connected() => *direction.lock() = Some(value),
                Ok(_) => debug!("Dropping SD card direction from a closed link"),
                Err(error) => warn!("SD card direction query failed: {}", error),
            }
        });

        match task {
            Ok(task) => *sd_query = Some(task),
            Err(error) => warn!("Unable to spawn SD card query: {}", error),
        }
    }

    fn stop_sd_query(&self) {
        let task = self.sd_query.lock().take();
        if let Some(mut task) = task {
            task.cancel();
        }
    }
}

fn query_sd(
    serial: &dyn SerialTransport,
    timeout: Duration,
) -> Result<SdCardDirection, TransportError> {
    let response = serial.query(&protocol::sd_direction_query(), timeout)?;
    protocol::parse_sd_direction(&response)
}

impl ControlChipset for Ch32v208 {
    fn kind(&self) -> ControlChipsetKind {
        ControlChipsetKind::Ch32v208
    }

    fn chipset_info(&self) -> &ChipsetInfo {
        &self.info
    }

    fn capabilities(&self) -> &ChipsetCapabilities {
        &self.capabilities
    }

    fn communication_interface(&self) -> CommunicationInterface {
        CommunicationInterface::Hybrid
    }

    fn supported_baud_rates(&self) -> &'static [u32] {
        &SUPPORTED_BAUD_RATES
    }

    fn state(&self) -> ControlChipsetState {
        self.link.state()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn is_device_ready(&self) -> bool {
        self.link.is_ready()
    }

    fn current_baud_rate(&self) -> u32 {
        self.link.baud_rate()
    }

    fn initialize(&self) -> bool {
        if !self.detect_device() {
            debug!("CH32V208 not present on the bus");
            return false;
        }

        self.link.set_state(ControlChipsetState::Detecting);
        if !self.establish_communication() || !self.validate_connection() {
            warn!("Unable to bring up the CH32V208");
            self.deinitialize();
            return false;
        }

        info!(
            "CH32V208 initialised, firmware {}",
            self.get_version().unwrap_or_else(|| String::from("unknown"))
        );
        true
    }

    fn deinitialize(&self) {
        self.stop_sd_query();
        self.close_port();
        self.link.reset();
        *self.version.lock() = None;
        *self.sd_direction.lock() = None;
    }

    fn detect_device(&self) -> bool {
        present_in(&self.context.devices, &self.info)
    }

    fn validate_connection(&self) -> bool {
        self.link.is_connected() && self.context.serial.baud_rate() == FIXED_BAUD_RATE
    }

    fn establish_communication(&self) -> bool {
        let Some(port) = resolve_port(&self.context, &self.info) else {
            warn!("No serial port found for the CH32V208");
            return false;
        };

        if let Err(error) = self.context.serial.open(&port, FIXED_BAUD_RATE) {
            warn!("Unable to open {} for the CH32V208: {}", port, error);
            return false;
        }
        *self.port.lock() = Some(port.clone());

        let reported = self.context.serial.baud_rate();
        if reported != FIXED_BAUD_RATE {
            warn!(
                "{} came up at {} baud, the CH32V208 needs {}",
                port, reported, FIXED_BAUD_RATE
            );
            self.close_port();
            return false;
        }

        self.link.set_baud_rate(FIXED_BAUD_RATE);
        self.link.set_connected(true);
        self.link.set_ready(true);
        self.link.set_state(ControlChipsetState::Ready);

        if let Some(version) = self.read_version() {
            *self.version.lock() = Some(version);
        }
        true
    }

    fn configure_device(&self, baud_rate: u32, mode: u8) -> bool {
        if !self.link.is_connected() {
            return false;
        }
        if baud_rate != FIXED_BAUD_RATE {
            warn!("The CH32V208 only runs at {} baud, not {}", FIXED_BAUD_RATE, baud_rate);
            return false;
        }
        self.send_command(&protocol::parameter_config(mode, baud_rate), true)
    }

    // HID state is reported by the firmware, there's nothing to poll.
    fn monitor_hid_events(&self) -> bool {
        self.link.is_connected()
    }

    fn get_version(&self) -> Option<String> {
        if let Some(version) = self.version.lock().clone() {
            return Some(version);
        }
        if !self.link.is_connected() {
            return None;
        }

        let version = self.read_version()?;
        *self.version.lock() = Some(version.clone());
        Some(version)
    }

    fn get_device_status(&self) -> ControlDeviceStatus {
        self.refresh_sd_direction();

        let connected = self.link.is_connected();
        ControlDeviceStatus {
            state: self.link.state(),
            is_connected: connected,
            is_device_ready: self.link.is_ready(),
            baud_rate: self.link.baud_rate(),
            version: self.version.lock().clone(),
            target_connected: connected,
            keyboard_connected: connected,
            mouse_connected: connected,
            sd_direction: *self.sd_direction.lock(),
        }
    }

    fn reset_device(&self) -> bool {
        if !self.link.is_connected() {
            return false;
        }
        self.send_command(&protocol::reset(), true)
    }

    fn send_command(&self, frame: &[u8], force: bool) -> bool {
        gated_write(
            self.context.serial.as_ref(),
            &self.link,
            self.info.name(),
            frame,
            force,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chipset::control::protocol::responses;
    use crate::config::HalConfig;
    use crate::testing::{device, MockSerial};
    use std::thread;
    use std::time::Instant;

    fn chipset(serial: Arc<MockSerial>) -> Ch32v208 {
        let serial: Arc<dyn SerialTransport> = serial;
        Ch32v208::new(ControlContext {
            devices: Arc::from(vec![device("CH32V208 Serial", 0x1a86, 0xfe0c, "0x011")]),
            serial,
            config: HalConfig::default(),
        })
    }

    #[test]
    fn comes_up_ready_at_fixed_rate() {
        let serial = Arc::new(MockSerial::with_port("/dev/ttyACM0").responding_at(&[115200]));
        let chip = chipset(serial.clone());

        assert!(chip.initialize());
        assert!(chip.is_connected());
        assert!(chip.is_device_ready());
        assert_eq!(chip.current_baud_rate(), 115200);
        assert_eq!(chip.communication_interface(), CommunicationInterface::Hybrid);
        assert_eq!(serial.open_history(), vec![115200]);
        assert_eq!(chip.get_version().as_deref(), Some("V3.0"));
    }

    #[test]
    fn wrong_reported_rate_is_a_failure() {
        let serial = Arc::new(MockSerial::with_port("/dev/ttyACM0").reporting_baud(9600));
        let chip = chipset(serial.clone());

        assert!(!chip.establish_communication());
        assert!(!chip.is_connected());
        assert!(!serial.is_open());
        assert!(!chip.initialize());
    }

    #[test]
    fn only_the_fixed_rate_is_configurable() {
        let serial = Arc::new(MockSerial::with_port("/dev/ttyACM0"));
        let chip = chipset(serial);
        assert!(chip.initialize());
        assert!(!chip.configure_device(9600, 0x82));
        assert!(chip.configure_device(115200, 0x82));
    }

    #[test]
    fn sd_direction_query() {
        let serial = Arc::new(
            MockSerial::with_port("/dev/ttyACM0")
                .with_sd_response(responses::sd_direction(SdCardDirection::Target)),
        );
        let chip = chipset(serial);
        assert!(chip.initialize());
        assert_eq!(chip.query_sd_direction(), Some(SdCardDirection::Target));
    }

    #[test]
    fn status_picks_up_sd_direction_in_the_background() {
        let serial = Arc::new(
            MockSerial::with_port("/dev/ttyACM0")
                .with_sd_response(responses::sd_direction(SdCardDirection::Host)),
        );
        let chip = chipset(serial);
        assert!(chip.initialize());

        let status = chip.get_device_status();
        assert!(status.target_connected);
        assert!(status.keyboard_connected);

        let deadline = Instant::now() + Duration::from_secs(2);
        while chip.get_device_status().sd_direction.is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(chip.get_device_status().sd_direction, Some(SdCardDirection::Host));
    }

    #[test]
    fn failed_sd_query_keeps_connection() {
        let serial = Arc::new(MockSerial::with_port("/dev/ttyACM0"));
        let chip = chipset(serial);
        assert!(chip.initialize());

        assert_eq!(chip.query_sd_direction(), None);
        assert!(chip.is_connected());
        assert_eq!(chip.state(), ControlChipsetState::Ready);
    }

    #[test]
    fn deinitialise_waits_for_a_running_sd_query() {
        let serial = Arc::new(
            MockSerial::with_port("/dev/ttyACM0")
                .with_sd_response(responses::sd_direction(SdCardDirection::Target))
                .answering_after(Duration::from_millis(150)),
        );
        let chip = chipset(serial.clone());
        assert!(chip.initialize());
        let before = serial.queries();

        // Starts the query in the background and returns straight away
        assert_eq!(chip.get_device_status().sd_direction, None);
        thread::sleep(Duration::from_millis(30));

        chip.deinitialize();
        let after_deinit = serial.queries();
        assert_eq!(after_deinit, before + 1);

        thread::sleep(Duration::from_millis(400));
        let status = chip.get_device_status();
        assert!(!status.is_connected);
        assert_eq!(status.sd_direction, None);
        assert_eq!(serial.queries(), after_deinit);
    }

    #[test]
    fn deinitialise_twice() {
        let serial = Arc::new(MockSerial::with_port("/dev/ttyACM0"));
        let chip = chipset(serial.clone());
        assert!(chip.initialize());
        chip.deinitialize();
        chip.deinitialize();
        assert!(!chip.is_connected());
        assert!(!serial.is_open());
        assert_eq!(chip.state(), ControlChipsetState::Uninitialized);
    }
}
