use crate::devices::ids_for;
use crate::transport::{CaptureDeviceProbe, HidTransport};
use log::debug;
use openterface_types::{
    ChipsetCapabilities, ChipsetInfo, ChipsetType, Resolution, UsbDeviceInfo, VideoChipsetKind,
    VideoSignalStatus, VideoTiming,
};
use std::sync::Arc;
use strum::{Display, EnumIter, IntoEnumIterator};

pub mod ms2109;
pub mod ms2130s;

#[derive(Copy, Clone, Debug, Display, EnumIter, PartialEq, Eq, Hash)]
pub enum RegisterField {
    InputWidth,
    InputHeight,
    InputFps,
    InputPixelClock,
    HorizontalTotal,
    VerticalTotal,
    HorizontalSyncStart,
    VerticalSyncStart,
    HorizontalSyncWidth,
    VerticalSyncWidth,
    Version1,
    Version2,
    Version3,
    Version4,
    HdmiConnection,
}

impl RegisterField {
    /// Whether the field spans two registers, high byte first.
    pub fn is_wide(&self) -> bool {
        !matches!(
            self,
            RegisterField::Version1
                | RegisterField::Version2
                | RegisterField::Version3
                | RegisterField::Version4
                | RegisterField::HdmiConnection
        )
    }
}

/// Where a video chipset keeps its telemetry. Maps belong to exactly one chipset, reading one
/// chip with another's map produces garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    pub input_width: u16,
    pub input_height: u16,
    pub input_fps: u16,
    pub input_pixel_clock: u16,
    pub horizontal_total: u16,
    pub vertical_total: u16,
    pub horizontal_sync_start: u16,
    pub vertical_sync_start: u16,
    pub horizontal_sync_width: u16,
    pub vertical_sync_width: u16,
    pub version: [u16; 4],
    pub hdmi_connection: u16,
}

impl RegisterMap {
    pub fn address(&self, field: RegisterField) -> u16 {
        match field {
            RegisterField::InputWidth => self.input_width,
            RegisterField::InputHeight => self.input_height,
            RegisterField::InputFps => self.input_fps,
            RegisterField::InputPixelClock => self.input_pixel_clock,
            RegisterField::HorizontalTotal => self.horizontal_total,
            RegisterField::VerticalTotal => self.vertical_total,
            RegisterField::HorizontalSyncStart => self.horizontal_sync_start,
            RegisterField::VerticalSyncStart => self.vertical_sync_start,
            RegisterField::HorizontalSyncWidth => self.horizontal_sync_width,
            RegisterField::VerticalSyncWidth => self.vertical_sync_width,
            RegisterField::Version1 => self.version[0],
            RegisterField::Version2 => self.version[1],
            RegisterField::Version3 => self.version[2],
            RegisterField::Version4 => self.version[3],
            RegisterField::HdmiConnection => self.hdmi_connection,
        }
    }

    /// Every register address touched when reading the map, paired with the field it belongs to.
    pub fn footprint(&self) -> Vec<(u16, RegisterField)> {
        let mut addresses = Vec::new();
        for field in RegisterField::iter() {
            let address = self.address(field);
            addresses.push((address, field));
            if field.is_wide() {
                addresses.push((address.wrapping_add(1), field));
            }
        }
        addresses
    }
}

/// An HDMI to USB capture chip. Telemetry reads go through the chip's own register map, and
/// return `None` while the chip isn't connected or the read fails.
pub trait VideoChipset: Send + Sync {
    fn kind(&self) -> VideoChipsetKind;
    fn chipset_info(&self) -> &ChipsetInfo;
    fn capabilities(&self) -> &ChipsetCapabilities;
    fn supported_resolutions(&self) -> &'static [Resolution];
    fn max_frame_rate(&self) -> u16;
    fn registers(&self) -> &'static RegisterMap;

    fn detect_device(&self) -> bool;
    fn validate_connection(&self) -> bool;
    fn initialize(&self) -> bool;

    /// Releases the HID channel. Safe to call repeatedly.
    fn deinitialize(&self);
    fn is_connected(&self) -> bool;

    fn get_signal_status(&self) -> VideoSignalStatus;
    fn get_firmware_version(&self) -> Option<String>;

    fn telemetry(&self) -> Telemetry<'_>;

    fn get_resolution(&self) -> Option<Resolution> {
        self.telemetry().resolution()
    }

    /// Frames per second times 100.
    fn get_frame_rate(&self) -> Option<u16> {
        self.telemetry().wide(RegisterField::InputFps)
    }

    /// In units of 10kHz
    fn get_pixel_clock(&self) -> Option<u16> {
        self.telemetry().wide(RegisterField::InputPixelClock)
    }

    fn get_timing(&self) -> Option<VideoTiming> {
        self.telemetry().timing()
    }
}

#[derive(Clone)]
pub struct VideoContext {
    pub devices: Arc<[UsbDeviceInfo]>,
    pub hid: Arc<dyn HidTransport>,
    pub capture: Arc<dyn CaptureDeviceProbe>,
}

pub fn create_video_chipset(
    kind: VideoChipsetKind,
    context: VideoContext,
) -> Arc<dyn VideoChipset> {
    match kind {
        VideoChipsetKind::Ms2109 => Arc::new(ms2109::Ms2109::new(context)),
        VideoChipsetKind::Ms2130s => Arc::new(ms2130s::Ms2130s::new(context)),
    }
}

pub(crate) fn info_for(kind: VideoChipsetKind, name: &str) -> ChipsetInfo {
    let (vendor_id, product_id) = ids_for(ChipsetType::Video(kind));
    ChipsetInfo::new(
        name,
        vendor_id,
        product_id,
        "MacroSilicon",
        ChipsetType::Video(kind),
    )
}

pub(crate) fn present_in(devices: &[UsbDeviceInfo], info: &ChipsetInfo) -> bool {
    devices
        .iter()
        .any(|d| d.matches(info.vendor_id(), info.product_id()))
}

/// Register reads against one chip's map. Inactive when the chip isn't connected.
pub struct Telemetry<'a> {
    hid: Option<&'a dyn HidTransport>,
    map: &'a RegisterMap,
}

impl<'a> Telemetry<'a> {
    pub fn new(hid: &'a dyn HidTransport, map: &'a RegisterMap, active: bool) -> Self {
        Self {
            hid: active.then_some(hid),
            map,
        }
    }

    pub fn wide(&self, field: RegisterField) -> Option<u16> {
        let hid = self.hid?;
        match hid.read_u16(self.map.address(field)) {
            Ok(value) => Some(value),
            Err(error) => {
                debug!("Unable to read {}: {}", field, error);
                None
            }
        }
    }

    pub fn byte(&self, field: RegisterField) -> Option<u8> {
        let hid = self.hid?;
        match hid.get_report(self.map.address(field)) {
            Ok(value) => Some(value),
            Err(error) => {
                debug!("Unable to read {}: {}", field, error);
                None
            }
        }
    }

    pub fn resolution(&self) -> Option<Resolution> {
        Some(Resolution {
            width: self.wide(RegisterField::InputWidth)?,
            height: self.wide(RegisterField::InputHeight)?,
        })
    }

    pub fn timing(&self) -> Option<VideoTiming> {
        Some(VideoTiming {
            horizontal_total: self.wide(RegisterField::HorizontalTotal)?,
            vertical_total: self.wide(RegisterField::VerticalTotal)?,
            horizontal_sync_start: self.wide(RegisterField::HorizontalSyncStart)?,
            vertical_sync_start: self.wide(RegisterField::VerticalSyncStart)?,
            horizontal_sync_width: self.wide(RegisterField::HorizontalSyncWidth)?,
            vertical_sync_width: self.wide(RegisterField::VerticalSyncWidth)?,
        })
    }

    pub fn hdmi_connected(&self) -> Option<bool> {
        self.byte(RegisterField::HdmiConnection).map(|v| v != 0)
    }

    pub fn version(&self) -> Option<String> {
        let hid = self.hid?;
        match hid.read_version(self.map.version) {
            Ok(version) => Some(version),
            Err(error) => {
                debug!("Unable to read firmware version: {}", error);
                None
            }
        }
    }
}
