use enumset::{EnumSet, EnumSetType};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use std::time::SystemTime;
use strum::{Display, EnumCount, EnumIter};

#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VideoChipsetKind {
    #[strum(to_string = "MS2109")]
    Ms2109,
    #[strum(to_string = "MS2130S")]
    Ms2130s,
}

#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ControlChipsetKind {
    #[strum(to_string = "CH9329")]
    Ch9329,
    #[strum(to_string = "CH32V208")]
    Ch32v208,
}

/// What a chipset does, and which silicon it is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChipsetType {
    Video(VideoChipsetKind),
    Control(ControlChipsetKind),
}

impl ChipsetType {
    pub fn is_video(&self) -> bool {
        matches!(self, ChipsetType::Video(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, ChipsetType::Control(_))
    }
}

impl std::fmt::Display for ChipsetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChipsetType::Video(kind) => write!(f, "Video ({kind})"),
            ChipsetType::Control(kind) => write!(f, "Control ({kind})"),
        }
    }
}

/// Identifies a class of physical device. This is not an instance, two dongles of the same model
/// share an identical ChipsetInfo.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChipsetInfo {
    name: String,
    vendor_id: u16,
    product_id: u16,
    firmware_version: Option<String>,
    manufacturer: String,
    chipset_type: ChipsetType,
}

impl ChipsetInfo {
    pub fn new(
        name: &str,
        vendor_id: u16,
        product_id: u16,
        manufacturer: &str,
        chipset_type: ChipsetType,
    ) -> Self {
        Self {
            name: name.to_string(),
            vendor_id,
            product_id,
            firmware_version: None,
            manufacturer: manufacturer.to_string(),
            chipset_type,
        }
    }

    pub fn with_firmware_version(mut self, version: String) -> Self {
        self.firmware_version = Some(version);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }
    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }
    pub fn chipset_type(&self) -> ChipsetType {
        self.chipset_type
    }
}

#[derive(Debug, Display, EnumIter, Hash)]
#[derive(EnumSetType)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChipsetFeature {
    #[strum(to_string = "HDMI Input")]
    HdmiInput,
    #[strum(to_string = "Audio Capture")]
    AudioCapture,
    #[strum(to_string = "Hardware Telemetry")]
    HidTelemetry,
    #[strum(to_string = "EEPROM Access")]
    Eeprom,
    #[strum(to_string = "Firmware Update")]
    FirmwareUpdate,
    #[strum(to_string = "Keyboard Emulation")]
    KeyboardEmulation,
    #[strum(to_string = "Mouse Emulation")]
    MouseEmulation,
    #[strum(to_string = "Baud Rate Detection")]
    BaudRateDetection,
    #[strum(to_string = "CTS Activity Sensing")]
    CtsActivitySensing,
    #[strum(to_string = "SD Card Switching")]
    SdCardSwitching,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChipsetCapabilities {
    pub supports_hdmi: bool,
    pub supports_audio: bool,
    pub supports_hid: bool,
    pub supports_firmware_update: bool,
    pub supports_eeprom: bool,

    /// In bits per second
    pub max_data_transfer_rate: u64,

    /// Iterates in declaration order, so tags are always listed the same way.
    pub features: EnumSet<ChipsetFeature>,
}

impl ChipsetCapabilities {
    pub fn feature_tags(&self) -> Vec<String> {
        self.features.iter().map(|f| f.to_string()).collect()
    }
}

#[derive(Copy, Clone, Debug, Display, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UsbSpeed {
    #[strum(to_string = "Low Speed")]
    Low,
    #[strum(to_string = "Full Speed")]
    Full,
    #[strum(to_string = "High Speed")]
    High,
    #[strum(to_string = "Super Speed")]
    Super,
    #[strum(to_string = "Super Speed Plus")]
    SuperPlus,
    #[default]
    Unknown,
}

/// A single enumerated USB device. There is no identity across scans other than matching the
/// location, vendor and product.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UsbDeviceInfo {
    pub product_name: String,
    pub manufacturer: String,
    pub vendor_id: u16,
    pub product_id: u16,

    /// Topology path as a hex string, devices behind the same hub share a prefix.
    pub location_id: String,
    pub speed: UsbSpeed,
}

impl UsbDeviceInfo {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VideoTiming {
    pub horizontal_total: u16,
    pub vertical_total: u16,
    pub horizontal_sync_start: u16,
    pub vertical_sync_start: u16,
    pub horizontal_sync_width: u16,
    pub vertical_sync_width: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VideoSignalStatus {
    pub has_signal: bool,
    pub signal_strength: f32,
    pub is_stable: bool,
    pub error_rate: f32,
    pub last_update: SystemTime,
}

impl VideoSignalStatus {
    pub fn no_signal() -> Self {
        Self {
            has_signal: false,
            signal_strength: 0.0,
            is_stable: false,
            error_rate: 1.0,
            last_update: SystemTime::now(),
        }
    }
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SdCardDirection {
    Host,
    Target,
}

#[derive(Copy, Clone, Debug, Display, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ControlChipsetState {
    #[default]
    Uninitialized,
    Detecting,
    Ready,

    /// Ready, with HID activity polling running.
    Monitoring,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CommunicationInterface {
    Serial,

    /// Serial for commands, with HID state reported inline.
    Hybrid,
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlDeviceStatus {
    pub state: ControlChipsetState,
    pub is_connected: bool,
    pub is_device_ready: bool,
    pub baud_rate: u32,
    pub version: Option<String>,
    pub target_connected: bool,
    pub keyboard_connected: bool,
    pub mouse_connected: bool,
    pub sd_direction: Option<SdCardDirection>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChipsetSummary {
    pub info: ChipsetInfo,
    pub capabilities: ChipsetCapabilities,
    pub is_connected: bool,
}

/// A point-in-time view of what hardware is bound.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SystemInfo {
    pub is_initialized: bool,
    pub video: Option<ChipsetSummary>,
    pub control: Option<ChipsetSummary>,
}

impl SystemInfo {
    pub fn supports(&self, feature: ChipsetFeature) -> bool {
        [&self.video, &self.control]
            .into_iter()
            .flatten()
            .any(|summary| summary.capabilities.features.contains(feature))
    }

    pub fn features(&self) -> EnumSet<ChipsetFeature> {
        [&self.video, &self.control]
            .into_iter()
            .flatten()
            .fold(EnumSet::empty(), |set, summary| {
                set | summary.capabilities.features
            })
    }
}

/// Aggregate status read by the UI. Built in one go, readers never see a half-updated record.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HalStatus {
    pub video_chipset: Option<VideoChipsetKind>,
    pub control_chipset: Option<ControlChipsetKind>,

    pub video_connected: bool,
    pub has_hdmi_signal: bool,
    pub resolution: Option<Resolution>,

    /// Frames per second multiplied by 100, as reported by the chipset.
    pub fps_centi: Option<u16>,

    /// In units of 10kHz
    pub pixel_clock: Option<u16>,
    pub timing: Option<VideoTiming>,
    pub video_firmware: Option<String>,

    pub control_connected: bool,
    pub control_ready: bool,
    pub control_version: Option<String>,
    pub baud_rate: u32,
    pub target_connected: bool,
    pub keyboard_connected: bool,
    pub mouse_connected: bool,
    pub sd_direction: Option<SdCardDirection>,
}

impl HalStatus {
    pub fn resolution_text(&self) -> String {
        match self.resolution {
            Some(resolution) => resolution.to_string(),
            None => String::from("-"),
        }
    }

    pub fn fps_text(&self) -> String {
        match self.fps_centi {
            Some(fps) => format!("{:.2}", fps as f32 / 100.0),
            None => String::from("-"),
        }
    }

    pub fn pixel_clock_text(&self) -> String {
        match self.pixel_clock {
            Some(clock) => format!("{:.2}MHz", clock as f32 / 100.0),
            None => String::from("-"),
        }
    }
}
