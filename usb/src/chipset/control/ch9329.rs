use crate::chipset::control::activity::HidActivity;
use crate::chipset::control::protocol::{self, ChipInfo};
use crate::chipset::control::{
    gated_write, info_for, present_in, resolve_port, ControlChipset, ControlContext, LinkState,
};
use crate::task::BackgroundTask;
use enumset::enum_set;
use log::{debug, info, warn};
use openterface_types::{
    ChipsetCapabilities, ChipsetFeature, ChipsetInfo, CommunicationInterface, ControlChipsetKind,
    ControlChipsetState, ControlDeviceStatus,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

pub const SUPPORTED_BAUD_RATES: [u32; 2] = [9600, 115200];

/// The CH9329 serial to HID bridge. It has no link status of its own, so target presence is
/// inferred from CTS activity, and the baud rate has to be found by probing.
pub struct Ch9329 {
    info: ChipsetInfo,
    capabilities: ChipsetCapabilities,
    context: ControlContext,

    link: Arc<LinkState>,
    activity: Arc<Mutex<HidActivity>>,
    chip_info: Mutex<Option<ChipInfo>>,

    // Set while we hold the shared serial port open.
    port: Mutex<Option<String>>,

    cts_monitor: Mutex<Option<BackgroundTask>>,
    readiness: Mutex<Option<BackgroundTask>>,
}

impl Ch9329 {
    pub fn new(context: ControlContext) -> Self {
        Self {
            info: info_for(ControlChipsetKind::Ch9329, "CH9329"),
            capabilities: ChipsetCapabilities {
                supports_hid: true,
                max_data_transfer_rate: 115200,
                features: enum_set!(
                    ChipsetFeature::KeyboardEmulation
                        | ChipsetFeature::MouseEmulation
                        | ChipsetFeature::BaudRateDetection
                        | ChipsetFeature::CtsActivitySensing
                ),
                ..Default::default()
            },
            context,
            link: Arc::new(LinkState::default()),
            activity: Arc::new(Mutex::new(HidActivity::default())),
            chip_info: Mutex::new(None),
            port: Mutex::new(None),
            cts_monitor: Mutex::new(None),
            readiness: Mutex::new(None),
        }
    }

    /// The configured priority rate goes first, then whatever else the chip may be set to.
    fn baud_candidates(&self) -> Vec<u32> {
        let priority = self.context.config.priority_baud_rate;
        let mut rates = vec![priority];
        rates.extend(SUPPORTED_BAUD_RATES.iter().filter(|rate| **rate != priority));
        rates
    }

    fn probe(&self) -> Option<ChipInfo> {
        let timeout = self.context.config.serial_response_timeout();
        let response = match self.context.serial.query(&protocol::get_info(), timeout) {
            Ok(response) => response,
            Err(error) => {
                debug!("CH9329 did not answer GET_INFO: {}", error);
                return None;
            }
        };

        match ChipInfo::parse(&response) {
            Ok(info) => Some(info),
            Err(error) => {
                debug!("Unusable GET_INFO response from CH9329: {}", error);
                None
            }
        }
    }

    fn close_port(&self) {
        if self.port.lock().take().is_some() {
            self.context.serial.close();
        }
    }

    // There is no signal telling us when the chip has settled after a reset or reconfigure, so
    // readiness is granted after a fixed grace period.
    fn schedule_readiness(&self) {
        let mut readiness = self.readiness.lock();
        if let Some(mut task) = readiness.take() {
            task.cancel();
        }

        let grace = self.context.config.readiness_grace();
        if grace.is_zero() {
            self.link.set_ready(true);
            return;
        }

        let link = self.link.clone();
        match BackgroundTask::delayed("ch9329-readiness", grace, move || {
            if link.is_connected() {
                debug!("CH9329 is ready");
                link.set_ready(true);
            }
        }) {
            Ok(task) => *readiness = Some(task),
            Err(error) => {
                warn!("Unable to schedule CH9329 readiness, marking ready now: {}", error);
                self.link.set_ready(true);
            }
        }
    }

    fn stop_tasks(&self) {
        if let Some(mut task) = self.cts_monitor.lock().take() {
            task.cancel();
        }
        if let Some(mut task) = self.readiness.lock().take() {
            task.cancel();
        }
    }

    pub fn activity(&self) -> HidActivity {
        self.activity.lock().clone()
    }
}

impl ControlChipset for Ch9329 {
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
            debug!("CH9329 not present on the bus");
            return false;
        }

        self.link.set_state(ControlChipsetState::Detecting);
        if !self.establish_communication() || !self.validate_connection() {
            warn!("Unable to bring up the CH9329");
            self.deinitialize();
            return false;
        }

        info!(
            "CH9329 initialised at {} baud, firmware {}",
            self.link.baud_rate(),
            self.get_version().unwrap_or_else(|| String::from("unknown"))
        );
        true
    }

    fn deinitialize(&self) {
        self.stop_tasks();
        self.close_port();
        self.link.reset();
        *self.activity.lock() = HidActivity::default();
        *self.chip_info.lock() = None;
    }

    fn detect_device(&self) -> bool {
        present_in(&self.context.devices, &self.info)
    }

    fn validate_connection(&self) -> bool {
        self.link.is_connected() && self.link.baud_rate() > 0 && self.context.serial.is_open()
    }

    fn establish_communication(&self) -> bool {
        let Some(port) = resolve_port(&self.context, &self.info) else {
            warn!("No serial port found for the CH9329");
            return false;
        };

        self.link.set_baud_rate(0);
        for rate in self.baud_candidates() {
            if let Err(error) = self.context.serial.open(&port, rate) {
                debug!("Unable to open {} at {} baud: {}", port, rate, error);
                continue;
            }
            *self.port.lock() = Some(port.clone());

            if let Some(chip) = self.probe() {
                debug!("CH9329 answered at {} baud", rate);
                self.link.set_baud_rate(rate);
                *self.chip_info.lock() = Some(chip);
                break;
            }
            self.close_port();
        }

        if self.link.baud_rate() == 0 {
            warn!("CH9329 on {} did not respond at any supported baud rate", port);
            return false;
        }

        self.link.set_connected(true);
        self.link.set_state(ControlChipsetState::Ready);

        let config = &self.context.config;
        if !self.configure_device(config.priority_baud_rate, config.ch9329_mode) {
            // A failed reopen at the new rate leaves nothing to talk to.
            if !self.link.is_connected() || self.link.baud_rate() == 0 {
                warn!("Lost the CH9329 while reconfiguring it");
                return false;
            }
            warn!("CH9329 configuration failed, staying at {} baud", self.link.baud_rate());
            self.schedule_readiness();
        }
        self.link.is_connected() && self.link.baud_rate() > 0
    }

    fn configure_device(&self, baud_rate: u32, mode: u8) -> bool {
        if !self.link.is_connected() {
            warn!("Refusing to configure a CH9329 that isn't connected");
            return false;
        }

        self.link.set_ready(false);
        let frame = protocol::parameter_config(mode, baud_rate);
        if !self.send_command(&frame, true) {
            return false;
        }

        // The new speed only applies after a reset, after which we have to follow it.
        if baud_rate != self.link.baud_rate() {
            if !self.send_command(&protocol::reset(), true) {
                return false;
            }

            let port = self.port.lock().clone();
            if let Some(port) = port {
                if let Err(error) = self.context.serial.open(&port, baud_rate) {
                    warn!("Unable to reopen {} at {} baud: {}", port, baud_rate, error);
                    self.close_port();
                    self.link.reset();
                    return false;
                }
                info!("CH9329 switched to {} baud", baud_rate);
                self.link.set_baud_rate(baud_rate);
            }
        }

        self.schedule_readiness();
        true
    }

    fn monitor_hid_events(&self) -> bool {
        if !self.link.is_connected() {
            warn!("Cannot monitor HID events before the CH9329 is connected");
            return false;
        }

        let mut monitor = self.cts_monitor.lock();
        if monitor.as_ref().is_some_and(|task| task.is_running()) {
            return true;
        }

        let serial = self.context.serial.clone();
        let activity = self.activity.clone();
        let link = self.link.clone();
        let interval = self.context.config.cts_poll_interval();

        let task = BackgroundTask::periodic("ch9329-cts", interval, move || {
            match serial.cts() {
                Ok(cts) => {
                    if activity.lock().observe(cts, Instant::now()) {
                        debug!("Target activity on CTS");
                    }
                }
                Err(error) => debug!("Unable to sample CTS: {}", error),
            }
            link.is_connected()
        });

        match task {
            Ok(task) => {
                *monitor = Some(task);
                self.link.set_state(ControlChipsetState::Monitoring);
                true
            }
            Err(error) => {
                warn!("Unable to start CTS monitoring: {}", error);
                false
            }
        }
    }

    fn get_version(&self) -> Option<String> {
        if let Some(chip) = self.chip_info.lock().as_ref() {
            return Some(chip.version.clone());
        }
        if !self.link.is_connected() {
            return None;
        }

        let chip = self.probe()?;
        let version = chip.version.clone();
        *self.chip_info.lock() = Some(chip);
        Some(version)
    }

    fn get_device_status(&self) -> ControlDeviceStatus {
        let activity = self.activity.lock().clone();
        let window = self.context.config.target_activity_window();

        ControlDeviceStatus {
            state: self.link.state(),
            is_connected: self.link.is_connected(),
            is_device_ready: self.link.is_ready(),
            baud_rate: self.link.baud_rate(),
            version: self.chip_info.lock().as_ref().map(|c| c.version.clone()),
            target_connected: activity.is_target_connected(Instant::now(), window),
            keyboard_connected: activity.keyboard_connected(),
            mouse_connected: activity.mouse_connected(),
            sd_direction: None,
        }
    }

    fn reset_device(&self) -> bool {
        if !self.link.is_connected() {
            return false;
        }

        self.link.set_ready(false);
        if !self.send_command(&protocol::reset(), true) {
            return false;
        }
        self.schedule_readiness();
        true
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
