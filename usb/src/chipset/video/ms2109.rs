use crate::chipset::video::{
    info_for, present_in, RegisterMap, Telemetry, VideoChipset, VideoContext,
};
use enumset::enum_set;
use log::{debug, info, warn};
use openterface_types::{
    ChipsetCapabilities, ChipsetFeature, ChipsetInfo, Resolution, VideoChipsetKind,
    VideoSignalStatus,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

pub const REGISTERS: RegisterMap = RegisterMap {
    input_width: 0xc6af,
    input_height: 0xc6b1,
    input_fps: 0xc6b5,
    input_pixel_clock: 0xc73c,
    horizontal_total: 0xc734,
    vertical_total: 0xc736,
    horizontal_sync_start: 0xc738,
    vertical_sync_start: 0xc73a,
    horizontal_sync_width: 0xc740,
    vertical_sync_width: 0xc742,
    version: [0xcbdc, 0xcbdd, 0xcbde, 0xcbdf],
    hdmi_connection: 0xfa8c,
};

const RESOLUTIONS: [Resolution; 5] = [
    Resolution { width: 1920, height: 1080 },
    Resolution { width: 1600, height: 1200 },
    Resolution { width: 1280, height: 720 },
    Resolution { width: 1024, height: 768 },
    Resolution { width: 640, height: 480 },
];

/// The original capture chip. Its HID channel is reliable, so a firmware version read is what
/// proves the connection.
pub struct Ms2109 {
    info: ChipsetInfo,
    capabilities: ChipsetCapabilities,
    context: VideoContext,
    connected: AtomicBool,
    firmware: Mutex<Option<String>>,
}

impl Ms2109 {
    pub fn new(context: VideoContext) -> Self {
        Self {
            info: info_for(VideoChipsetKind::Ms2109, "MS2109"),
            capabilities: ChipsetCapabilities {
                supports_hdmi: true,
                supports_audio: true,
                supports_hid: true,
                supports_firmware_update: true,
                supports_eeprom: true,
                max_data_transfer_rate: 480_000_000,
                features: enum_set!(
                    ChipsetFeature::HdmiInput
                        | ChipsetFeature::AudioCapture
                        | ChipsetFeature::HidTelemetry
                        | ChipsetFeature::Eeprom
                        | ChipsetFeature::FirmwareUpdate
                ),
            },
            context,
            connected: AtomicBool::new(false),
            firmware: Mutex::new(None),
        }
    }
}

impl VideoChipset for Ms2109 {
    fn kind(&self) -> VideoChipsetKind {
        VideoChipsetKind::Ms2109
    }

    fn chipset_info(&self) -> &ChipsetInfo {
        &self.info
    }

    fn capabilities(&self) -> &ChipsetCapabilities {
        &self.capabilities
    }

    fn supported_resolutions(&self) -> &'static [Resolution] {
        &RESOLUTIONS
    }

    fn max_frame_rate(&self) -> u16 {
        30
    }

    fn registers(&self) -> &'static RegisterMap {
        &REGISTERS
    }

    fn detect_device(&self) -> bool {
        present_in(&self.context.devices, &self.info)
    }

    fn validate_connection(&self) -> bool {
        let hid = &self.context.hid;
        if let Err(error) = hid.open(self.info.vendor_id(), self.info.product_id()) {
            warn!("Unable to open the MS2109 HID interface: {}", error);
            return false;
        }

        match hid.read_version(REGISTERS.version) {
            Ok(version) => {
                *self.firmware.lock() = Some(version);
                true
            }
            Err(error) => {
                warn!("MS2109 did not answer a version read: {}", error);
                hid.close();
                false
            }
        }
    }

    fn initialize(&self) -> bool {
        if !self.detect_device() {
            debug!("MS2109 not present on the bus");
            return false;
        }
        if !self.validate_connection() {
            return false;
        }

        self.connected.store(true, Ordering::Release);
        info!(
            "MS2109 initialised, firmware {}",
            self.firmware.lock().as_deref().unwrap_or("unknown")
        );
        true
    }

    fn deinitialize(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.context.hid.close();
        }
        *self.firmware.lock() = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn get_signal_status(&self) -> VideoSignalStatus {
        let telemetry = self.telemetry();
        let Some(has_signal) = telemetry.hdmi_connected() else {
            return VideoSignalStatus::no_signal();
        };

        let is_stable = has_signal
            && telemetry
                .resolution()
                .is_some_and(|r| r.width > 0 && r.height > 0);

        VideoSignalStatus {
            has_signal,
            signal_strength: if has_signal { 1.0 } else { 0.0 },
            is_stable,
            error_rate: if is_stable { 0.0 } else { 1.0 },
            last_update: SystemTime::now(),
        }
    }

    fn get_firmware_version(&self) -> Option<String> {
        if let Some(version) = self.firmware.lock().clone() {
            return Some(version);
        }
        self.telemetry().version()
    }

    fn telemetry(&self) -> Telemetry<'_> {
        Telemetry::new(self.context.hid.as_ref(), &REGISTERS, self.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, MockCapture, MockHid};
    use crate::transport::HidTransport;
    use openterface_types::VideoTiming;
    use std::sync::Arc;

    fn chipset(hid: Arc<MockHid>, present: bool) -> Ms2109 {
        let devices = if present {
            vec![device("Openterface", 0x534d, 0x2109, "0x0111")]
        } else {
            vec![]
        };
        let hid: Arc<dyn HidTransport> = hid;
        Ms2109::new(VideoContext {
            devices: Arc::from(devices),
            hid,
            capture: Arc::new(MockCapture(false)),
        })
    }

    fn loaded_hid() -> Arc<MockHid> {
        let hid = MockHid::new();
        hid.set_u16(REGISTERS.input_width, 1920);
        hid.set_u16(REGISTERS.input_height, 1080);
        hid.set_u16(REGISTERS.input_fps, 6000);
        hid.set_u16(REGISTERS.input_pixel_clock, 14850);
        hid.set_u16(REGISTERS.horizontal_total, 2200);
        hid.set_u16(REGISTERS.vertical_total, 1125);
        hid.set_u16(REGISTERS.horizontal_sync_start, 88);
        hid.set_u16(REGISTERS.vertical_sync_start, 4);
        hid.set_u16(REGISTERS.horizontal_sync_width, 44);
        hid.set_u16(REGISTERS.vertical_sync_width, 5);
        hid.set_register(REGISTERS.hdmi_connection, 0x01);
        for (address, value) in REGISTERS.version.iter().zip([0x24, 0x08, 0x13, 0x09]) {
            hid.set_register(*address, value);
        }
        Arc::new(hid)
    }

    #[test]
    fn missing_device_skips_validation() {
        let hid = loaded_hid();
        let chip = chipset(hid.clone(), false);
        assert!(!chip.initialize());
        assert!(!hid.is_open());
    }

    #[test]
    fn version_read_validates() {
        let chip = chipset(loaded_hid(), true);
        assert!(chip.initialize());
        assert!(chip.is_connected());
        assert_eq!(chip.get_firmware_version().as_deref(), Some("24081309"));
    }

    #[test]
    fn unreachable_hid_fails_initialisation() {
        let chip = chipset(Arc::new(MockHid::unreachable()), true);
        assert!(!chip.initialize());
        assert!(!chip.is_connected());
    }

    #[test]
    fn telemetry_reads_the_ms2109_map() {
        let chip = chipset(loaded_hid(), true);
        assert_eq!(chip.get_resolution(), None);

        assert!(chip.initialize());
        assert_eq!(
            chip.get_resolution(),
            Some(Resolution { width: 1920, height: 1080 })
        );
        assert_eq!(chip.get_frame_rate(), Some(6000));
        assert_eq!(chip.get_pixel_clock(), Some(14850));
        assert_eq!(
            chip.get_timing(),
            Some(VideoTiming {
                horizontal_total: 2200,
                vertical_total: 1125,
                horizontal_sync_start: 88,
                vertical_sync_start: 4,
                horizontal_sync_width: 44,
                vertical_sync_width: 5,
            })
        );

        let signal = chip.get_signal_status();
        assert!(signal.has_signal);
        assert!(signal.is_stable);
    }

    #[test]
    fn no_hdmi_means_no_signal() {
        let hid = loaded_hid();
        hid.set_register(REGISTERS.hdmi_connection, 0x00);
        let chip = chipset(hid, true);
        assert!(chip.initialize());

        let signal = chip.get_signal_status();
        assert!(!signal.has_signal);
        assert!(!signal.is_stable);
    }

    #[test]
    fn deinitialise_closes_hid_once() {
        let hid = loaded_hid();
        let chip = chipset(hid.clone(), true);
        assert!(chip.initialize());
        chip.deinitialize();
        chip.deinitialize();
        assert!(!hid.is_open());
        assert!(!chip.is_connected());
        assert!(!chip.get_signal_status().has_signal);
    }
}
