// The chipset selection policy. Enumerated devices come in, at most one video and one control
// chipset come out, and everything else reads through here.
use crate::chipset::control::{create_control_chipset, ControlChipset, ControlContext};
use crate::chipset::video::{create_video_chipset, VideoChipset, VideoContext};
use crate::config::HalConfig;
use crate::devices::{classify, LibUsbEnumerator, UsbEnumerator};
use crate::grouping::{group_devices, pick_defaults, DefaultDevices, DeviceGroup};
use crate::transport::capture::EnumeratedCaptureProbe;
use crate::transport::hid::UsbHidTransport;
use crate::transport::serial::SerialPortTransport;
use crate::transport::{CaptureDeviceProbe, HidTransport, SerialTransport};
use log::{debug, info, warn};
use openterface_types::{
    ChipsetSummary, ChipsetType, ControlChipsetKind, HalStatus, SystemInfo, UsbDeviceInfo,
    VideoChipsetKind,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub mod integration;

pub type VideoHandle = Arc<dyn VideoChipset>;
pub type ControlHandle = Arc<dyn ControlChipset>;

/// Everything the HAL talks to, handed over at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub enumerator: Arc<dyn UsbEnumerator>,
    pub serial: Arc<dyn SerialTransport>,
    pub hid: Arc<dyn HidTransport>,
    pub capture: Arc<dyn CaptureDeviceProbe>,
}

impl Collaborators {
    /// libusb for enumeration and HID, the OS serial driver for the control chip.
    pub fn system() -> Self {
        Self {
            enumerator: Arc::new(LibUsbEnumerator::new()),
            serial: Arc::new(SerialPortTransport::new()),
            hid: Arc::new(UsbHidTransport::default()),
            capture: Arc::new(EnumeratedCaptureProbe),
        }
    }
}

/// Chipset kinds in the order they should be tried: grouped devices first, then the flat list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChipsetCandidates {
    pub video: Vec<VideoChipsetKind>,
    pub control: Vec<ControlChipsetKind>,
}

impl ChipsetCandidates {
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.control.is_empty()
    }

    fn extend<'a>(&mut self, devices: impl Iterator<Item = &'a UsbDeviceInfo>) {
        for chipset in devices.filter_map(classify) {
            match chipset {
                ChipsetType::Video(kind) if !self.video.contains(&kind) => self.video.push(kind),
                ChipsetType::Control(kind) if !self.control.contains(&kind) => {
                    self.control.push(kind)
                }
                _ => {}
            }
        }
    }
}

pub fn select_chipsets(groups: &[DeviceGroup], devices: &[UsbDeviceInfo]) -> ChipsetCandidates {
    let mut candidates = ChipsetCandidates::default();
    candidates.extend(groups.iter().flat_map(|group| group.devices().iter()));
    candidates.extend(devices.iter());
    candidates
}

#[derive(Default)]
struct ActiveChipsets {
    video: Option<VideoHandle>,
    control: Option<ControlHandle>,
}

pub struct HardwareAbstractionLayer {
    collaborators: Collaborators,
    config: HalConfig,

    // Held for the whole of a detection pass, only one caller may swap chipsets at a time.
    detection: Mutex<()>,

    active: RwLock<ActiveChipsets>,
    devices: RwLock<Arc<[UsbDeviceInfo]>>,
    groups: RwLock<Vec<DeviceGroup>>,
    status: RwLock<HalStatus>,
}

impl HardwareAbstractionLayer {
    pub fn new(collaborators: Collaborators, config: HalConfig) -> Self {
        Self {
            collaborators,
            config,
            detection: Mutex::new(()),
            active: RwLock::new(ActiveChipsets::default()),
            devices: RwLock::new(Arc::from(Vec::new())),
            groups: RwLock::new(Vec::new()),
            status: RwLock::new(HalStatus::default()),
        }
    }

    pub fn enumerator(&self) -> &Arc<dyn UsbEnumerator> {
        &self.collaborators.enumerator
    }

    /// Scans the bus and rebinds chipsets. True when at least one chipset came up.
    pub fn detect_and_initialize_hardware(&self) -> bool {
        let devices = self.collaborators.enumerator.scan();
        self.detect_from(devices)
    }

    /// Rebinds chipsets against an already enumerated device list. Any previous chipsets are
    /// deinitialised before a new one is created.
    pub fn detect_from(&self, devices: Vec<UsbDeviceInfo>) -> bool {
        let _detection = self.detection.lock();
        self.teardown();

        let devices: Arc<[UsbDeviceInfo]> = Arc::from(devices);
        let groups = group_devices(&devices);
        let candidates = select_chipsets(&groups, &devices);
        debug!(
            "Found {} devices in {} groups, candidates: {:?}",
            devices.len(),
            groups.len(),
            candidates
        );

        let video = self.bind_video(&candidates.video, &devices);
        let control = self.bind_control(&candidates.control, &devices);

        if let Some(control) = &control {
            if !control.monitor_hid_events() {
                warn!("HID event monitoring did not start on {}", control.kind());
            }
        }

        let bound = video.is_some() || control.is_some();
        match (&video, &control) {
            (None, None) if candidates.is_empty() => debug!("No Openterface hardware attached"),
            (None, None) => {
                warn!("Openterface hardware found, but no chipset could be initialised")
            }
            (video, control) => info!(
                "Bound video: {}, control: {}",
                video.as_ref().map_or(String::from("none"), |v| v.kind().to_string()),
                control.as_ref().map_or(String::from("none"), |c| c.kind().to_string()),
            ),
        }

        *self.devices.write() = devices;
        *self.groups.write() = groups;
        *self.active.write() = ActiveChipsets { video, control };

        self.read_status();
        bound
    }

    fn bind_video(
        &self,
        candidates: &[VideoChipsetKind],
        devices: &Arc<[UsbDeviceInfo]>,
    ) -> Option<VideoHandle> {
        for kind in candidates {
            let chipset = create_video_chipset(
                *kind,
                VideoContext {
                    devices: devices.clone(),
                    hid: self.collaborators.hid.clone(),
                    capture: self.collaborators.capture.clone(),
                },
            );
            if chipset.initialize() {
                return Some(chipset);
            }
            warn!("Video chipset {} failed to initialise", kind);
            chipset.deinitialize();
        }
        None
    }

    fn bind_control(
        &self,
        candidates: &[ControlChipsetKind],
        devices: &Arc<[UsbDeviceInfo]>,
    ) -> Option<ControlHandle> {
        for kind in candidates {
            let chipset = create_control_chipset(
                *kind,
                ControlContext {
                    devices: devices.clone(),
                    serial: self.collaborators.serial.clone(),
                    config: self.config.clone(),
                },
            );
            if chipset.initialize() {
                return Some(chipset);
            }
            warn!("Control chipset {} failed to initialise", kind);
            chipset.deinitialize();
        }
        None
    }

    fn teardown(&self) {
        let previous = std::mem::take(&mut *self.active.write());
        if let Some(video) = previous.video {
            debug!("Deinitialising {}", video.kind());
            video.deinitialize();
        }
        if let Some(control) = previous.control {
            debug!("Deinitialising {}", control.kind());
            control.deinitialize();
        }
    }

    pub fn get_current_video_chipset(&self) -> Option<VideoHandle> {
        self.active.read().video.clone()
    }

    pub fn get_current_control_chipset(&self) -> Option<ControlHandle> {
        self.active.read().control.clone()
    }

    pub fn get_system_info(&self) -> SystemInfo {
        let active = self.active.read();
        let video = active.video.as_ref().map(|video| ChipsetSummary {
            info: video.chipset_info().clone(),
            capabilities: video.capabilities().clone(),
            is_connected: video.is_connected(),
        });
        let control = active.control.as_ref().map(|control| ChipsetSummary {
            info: control.chipset_info().clone(),
            capabilities: control.capabilities().clone(),
            is_connected: control.is_connected(),
        });

        SystemInfo {
            is_initialized: video.is_some() || control.is_some(),
            video,
            control,
        }
    }

    /// Releases every chipset. Calling it again does nothing.
    pub fn deinitialize_hardware(&self) {
        let _detection = self.detection.lock();
        self.teardown();
        *self.status.write() = HalStatus::default();
    }

    /// Reads every chipset and replaces the status snapshot in one go. Waits out any detection or
    /// teardown in progress, so a snapshot of released chipsets never lands after the reset.
    pub fn refresh_status(&self) -> HalStatus {
        let _detection = self.detection.lock();
        self.read_status()
    }

    // Callers hold the detection lock.
    fn read_status(&self) -> HalStatus {
        let video = self.get_current_video_chipset();
        let control = self.get_current_control_chipset();

        let mut status = HalStatus::default();
        if let Some(video) = video {
            let signal = video.get_signal_status();
            status.video_chipset = Some(video.kind());
            status.video_connected = video.is_connected();
            status.has_hdmi_signal = signal.has_signal;
            status.resolution = video.get_resolution();
            status.fps_centi = video.get_frame_rate();
            status.pixel_clock = video.get_pixel_clock();
            status.timing = video.get_timing();
            status.video_firmware = video.get_firmware_version();
        }

        if let Some(control) = control {
            let device = control.get_device_status();
            status.control_chipset = Some(control.kind());
            status.control_connected = device.is_connected;
            status.control_ready = device.is_device_ready;
            status.control_version = device.version;
            status.baud_rate = device.baud_rate;
            status.target_connected = device.target_connected;
            status.keyboard_connected = device.keyboard_connected;
            status.mouse_connected = device.mouse_connected;
            status.sd_direction = device.sd_direction;
        }

        *self.status.write() = status.clone();
        status
    }

    /// The last snapshot taken by `refresh_status`.
    pub fn status(&self) -> HalStatus {
        self.status.read().clone()
    }

    pub fn devices(&self) -> Arc<[UsbDeviceInfo]> {
        self.devices.read().clone()
    }

    pub fn groups(&self) -> Vec<DeviceGroup> {
        self.groups.read().clone()
    }

    pub fn default_devices(&self) -> DefaultDevices {
        pick_defaults(&self.groups.read())
    }
}
