use crate::chipset::video::{
    info_for, present_in, RegisterMap, Telemetry, VideoChipset, VideoContext,
};
use enumset::enum_set;
use log::{debug, info, warn};
use openterface_types::{
    ChipsetCapabilities, ChipsetFeature, ChipsetInfo, Resolution, VideoChipsetKind,
    VideoSignalStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

pub const REGISTERS: RegisterMap = RegisterMap {
    input_width: 0x1ce0,
    input_height: 0x1ce2,
    input_fps: 0x1ce6,
    input_pixel_clock: 0x1ce8,
    horizontal_total: 0x1cea,
    vertical_total: 0x1cec,
    horizontal_sync_start: 0x1cee,
    vertical_sync_start: 0x1cf0,
    horizontal_sync_width: 0x1cf2,
    vertical_sync_width: 0x1cf4,
    version: [0x1b00, 0x1b01, 0x1b02, 0x1b03],
    hdmi_connection: 0x1c5a,
};

const RESOLUTIONS: [Resolution; 6] = [
    Resolution { width: 3840, height: 2160 },
    Resolution { width: 2560, height: 1440 },
    Resolution { width: 1920, height: 1080 },
    Resolution { width: 1280, height: 720 },
    Resolution { width: 1024, height: 768 },
    Resolution { width: 640, height: 480 },
];

/// The newer capture chip. Its HID channel can't be relied on, so the presence of the capture
/// device is what proves the connection and stands in for a stable signal. Register telemetry is
/// used when the HID side happens to open.
pub struct Ms2130s {
    info: ChipsetInfo,
    capabilities: ChipsetCapabilities,
    context: VideoContext,
    connected: AtomicBool,
    hid_open: AtomicBool,
}

impl Ms2130s {
    pub fn new(context: VideoContext) -> Self {
        Self {
            info: info_for(VideoChipsetKind::Ms2130s, "MS2130S"),
            capabilities: ChipsetCapabilities {
                supports_hdmi: true,
                supports_audio: true,
                supports_hid: true,
                supports_firmware_update: true,
                supports_eeprom: false,
                max_data_transfer_rate: 5_000_000_000,
                features: enum_set!(
                    ChipsetFeature::HdmiInput
                        | ChipsetFeature::AudioCapture
                        | ChipsetFeature::HidTelemetry
                        | ChipsetFeature::FirmwareUpdate
                ),
            },
            context,
            connected: AtomicBool::new(false),
            hid_open: AtomicBool::new(false),
        }
    }

    fn open_hid(&self) {
        match self
            .context
            .hid
            .open(self.info.vendor_id(), self.info.product_id())
        {
            Ok(()) => self.hid_open.store(true, Ordering::Release),
            Err(error) => {
                debug!("MS2130S HID interface unavailable, telemetry disabled: {}", error);
            }
        }
    }
}

impl VideoChipset for Ms2130s {
    fn kind(&self) -> VideoChipsetKind {
        VideoChipsetKind::Ms2130s
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
        60
    }

    fn registers(&self) -> &'static RegisterMap {
        &REGISTERS
    }

    fn detect_device(&self) -> bool {
        present_in(&self.context.devices, &self.info)
    }

    fn validate_connection(&self) -> bool {
        self.context.capture.has_capture_device(&self.context.devices)
    }

    fn initialize(&self) -> bool {
        if !self.detect_device() {
            debug!("MS2130S not present on the bus");
            return false;
        }
        if !self.validate_connection() {
            warn!("MS2130S found, but no capture device is exposed for it");
            return false;
        }

        self.open_hid();
        self.connected.store(true, Ordering::Release);
        info!("MS2130S initialised");
        true
    }

    fn deinitialize(&self) {
        if self.hid_open.swap(false, Ordering::AcqRel) {
            self.context.hid.close();
        }
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn get_signal_status(&self) -> VideoSignalStatus {
        if !self.is_connected() {
            return VideoSignalStatus::no_signal();
        }

        let capture_present = self.context.capture.has_capture_device(&self.context.devices);
        let hdmi = self.telemetry().hdmi_connected().unwrap_or(false);
        let has_signal = hdmi || capture_present;

        VideoSignalStatus {
            has_signal,
            signal_strength: if has_signal { 1.0 } else { 0.0 },
            is_stable: capture_present,
            error_rate: if capture_present { 0.0 } else { 1.0 },
            last_update: SystemTime::now(),
        }
    }

    fn get_firmware_version(&self) -> Option<String> {
        self.telemetry().version()
    }

    fn telemetry(&self) -> Telemetry<'_> {
        let active = self.is_connected() && self.hid_open.load(Ordering::Acquire);
        Telemetry::new(self.context.hid.as_ref(), &REGISTERS, active)
    }
}
