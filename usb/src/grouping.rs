// A single Openterface dongle shows up as several USB devices (capture, serial bridge, hub..) all
// hanging off the same internal hub. Grouping puts those back together, so the video and control
// halves of one physical unit are picked as a pair.
use crate::devices::classify;
use openterface_types::{ChipsetType, UsbDeviceInfo};

/// Last-resort product name markers, only consulted when no device in a group has a known
/// vendor / product pair for the role.
const VIDEO_MARKERS: [&str; 2] = ["Openterface", "Unknown Capture"];
const SERIAL_MARKERS: [&str; 1] = ["Serial"];

pub fn is_video_marker(product_name: &str) -> bool {
    VIDEO_MARKERS.iter().any(|m| product_name.contains(m))
}

pub fn is_serial_marker(product_name: &str) -> bool {
    SERIAL_MARKERS.iter().any(|m| product_name.contains(m))
}

/// Drops the least significant digit, which identifies the port on the dongle's internal hub.
pub fn location_prefix(location_id: &str) -> &str {
    let mut chars = location_id.char_indices();
    match chars.next_back() {
        Some((index, _)) => &location_id[..index],
        None => location_id,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceGroup {
    prefix: String,
    devices: Vec<UsbDeviceInfo>,
}

impl DeviceGroup {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn devices(&self) -> &[UsbDeviceInfo] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn default_video_device(&self) -> Option<&UsbDeviceInfo> {
        self.devices
            .iter()
            .find(|d| classify(d).is_some_and(|c| c.is_video()))
            .or_else(|| self.devices.iter().find(|d| is_video_marker(&d.product_name)))
    }

    pub fn default_serial_device(&self) -> Option<&UsbDeviceInfo> {
        self.devices
            .iter()
            .find(|d| classify(d).is_some_and(|c| c.is_control()))
            .or_else(|| {
                self.devices
                    .iter()
                    .find(|d| is_serial_marker(&d.product_name))
            })
    }

    pub fn chipsets(&self) -> impl Iterator<Item = ChipsetType> + '_ {
        self.devices.iter().filter_map(classify)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultDevices {
    pub video: Option<UsbDeviceInfo>,
    pub serial: Option<UsbDeviceInfo>,
}

/// Builds groups around every known chipset on the bus. Each device ends up in at most one group,
/// and prefixes which nest are merged into the shorter one.
pub fn group_devices(devices: &[UsbDeviceInfo]) -> Vec<DeviceGroup> {
    let mut prefixes: Vec<&str> = Vec::new();

    for anchor in devices.iter().filter(|d| classify(d).is_some()) {
        let prefix = location_prefix(&anchor.location_id);

        if prefixes.iter().any(|existing| prefix.starts_with(existing)) {
            continue;
        }

        // This prefix may swallow groups we've already created..
        let covered: Vec<usize> = prefixes
            .iter()
            .enumerate()
            .filter(|(_, existing)| existing.starts_with(prefix))
            .map(|(index, _)| index)
            .collect();

        match covered.first() {
            Some(&first) => {
                prefixes[first] = prefix;
                for index in covered.iter().skip(1).rev() {
                    prefixes.remove(*index);
                }
            }
            None => prefixes.push(prefix),
        }
    }

    prefixes
        .into_iter()
        .map(|prefix| DeviceGroup {
            prefix: prefix.to_string(),
            devices: devices
                .iter()
                .filter(|d| d.location_id.starts_with(prefix))
                .cloned()
                .collect(),
        })
        .collect()
}

pub fn pick_defaults(groups: &[DeviceGroup]) -> DefaultDevices {
    DefaultDevices {
        video: groups
            .iter()
            .find_map(|g| g.default_video_device())
            .cloned(),
        serial: groups
            .iter()
            .find_map(|g| g.default_serial_device())
            .cloned(),
    }
}
