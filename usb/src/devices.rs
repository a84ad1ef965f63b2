// Walks the USB bus and flattens what it finds into plain UsbDeviceInfo structs. Nothing in here
// opens a chipset or talks a protocol, consumers only ever see the snapshot.
use crate::{
    PID_CH32V208, PID_CH9329, PID_MS2109, PID_MS2130S, VID_CH32V208, VID_CH9329, VID_MS2109,
    VID_MS2130S,
};
use log::{debug, warn};
use openterface_types::{
    ChipsetType, ControlChipsetKind, UsbDeviceInfo, UsbSpeed, VideoChipsetKind,
};
use rusb::{Device, GlobalContext, UsbContext};
use std::time::Duration;

const STRING_TIMEOUT: Duration = Duration::from_millis(100);

pub trait UsbEnumerator: Send + Sync {
    /// A complete snapshot of the bus. Failures are logged and produce an empty list.
    fn scan(&self) -> Vec<UsbDeviceInfo>;
}

/// Every chipset we know how to drive, keyed by vendor and product.
pub const KNOWN_CHIPSETS: [(u16, u16, ChipsetType); 4] = [
    (
        VID_MS2109,
        PID_MS2109,
        ChipsetType::Video(VideoChipsetKind::Ms2109),
    ),
    (
        VID_MS2130S,
        PID_MS2130S,
        ChipsetType::Video(VideoChipsetKind::Ms2130s),
    ),
    (
        VID_CH9329,
        PID_CH9329,
        ChipsetType::Control(ControlChipsetKind::Ch9329),
    ),
    (
        VID_CH32V208,
        PID_CH32V208,
        ChipsetType::Control(ControlChipsetKind::Ch32v208),
    ),
];

pub fn classify_ids(vendor_id: u16, product_id: u16) -> Option<ChipsetType> {
    KNOWN_CHIPSETS
        .iter()
        .find(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
        .map(|(_, _, chipset)| *chipset)
}

pub fn classify(device: &UsbDeviceInfo) -> Option<ChipsetType> {
    classify_ids(device.vendor_id, device.product_id)
}

pub fn ids_for(chipset: ChipsetType) -> (u16, u16) {
    match chipset {
        ChipsetType::Video(VideoChipsetKind::Ms2109) => (VID_MS2109, PID_MS2109),
        ChipsetType::Video(VideoChipsetKind::Ms2130s) => (VID_MS2130S, PID_MS2130S),
        ChipsetType::Control(ControlChipsetKind::Ch9329) => (VID_CH9329, PID_CH9329),
        ChipsetType::Control(ControlChipsetKind::Ch32v208) => (VID_CH32V208, PID_CH32V208),
    }
}

/// Formats a topology path the way the rest of the crate expects: the bus as two hex digits, then
/// one digit per hub port. The final digit is the port on the immediate parent hub.
///
/// USB allows up to 255 ports on a hub, but a path only has room for one hex digit each. Ports
/// above 15 are clamped to `f`, so siblings past that point share a location.
pub fn format_location_id(bus_number: u8, ports: &[u8]) -> String {
    let mut location = format!("0x{bus_number:02x}");
    for port in ports {
        location.push_str(&format!("{:x}", (*port).min(0xf)));
    }
    location
}

fn map_speed(speed: rusb::Speed) -> UsbSpeed {
    match speed {
        rusb::Speed::Low => UsbSpeed::Low,
        rusb::Speed::Full => UsbSpeed::Full,
        rusb::Speed::High => UsbSpeed::High,
        rusb::Speed::Super => UsbSpeed::Super,
        rusb::Speed::SuperPlus => UsbSpeed::SuperPlus,
        _ => UsbSpeed::Unknown,
    }
}

#[derive(Default)]
pub struct LibUsbEnumerator;

impl LibUsbEnumerator {
    pub fn new() -> Self {
        Self
    }

    fn read_strings<T: UsbContext>(
        device: &Device<T>,
        descriptor: &rusb::DeviceDescriptor,
    ) -> (String, String) {
        let unknown = || (String::from("Unknown"), String::from("Unknown"));

        // We may not have permission to open every device on the bus, that's fine, we just
        // won't have names for them.
        let Ok(handle) = device.open() else {
            return unknown();
        };
        let Some(language) = handle
            .read_languages(STRING_TIMEOUT)
            .ok()
            .and_then(|languages| languages.first().cloned())
        else {
            return unknown();
        };

        let product = handle
            .read_product_string(language, descriptor, STRING_TIMEOUT)
            .unwrap_or_else(|_| String::from("Unknown"));
        let manufacturer = handle
            .read_manufacturer_string(language, descriptor, STRING_TIMEOUT)
            .unwrap_or_else(|_| String::from("Unknown"));
        (product, manufacturer)
    }

    fn describe(device: &Device<GlobalContext>) -> Option<UsbDeviceInfo> {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(error) => {
                debug!("Unable to read descriptor for {:?}: {}", device, error);
                return None;
            }
        };

        let ports = device.port_numbers().unwrap_or_default();
        let (product_name, manufacturer) = Self::read_strings(device, &descriptor);

        Some(UsbDeviceInfo {
            product_name,
            manufacturer,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            location_id: format_location_id(device.bus_number(), &ports),
            speed: map_speed(device.speed()),
        })
    }
}

impl UsbEnumerator for LibUsbEnumerator {
    fn scan(&self) -> Vec<UsbDeviceInfo> {
        let devices = match rusb::devices() {
            Ok(devices) => devices,
            Err(error) => {
                warn!("USB enumeration failed: {}", error);
                return vec![];
            }
        };

        devices.iter().filter_map(|d| Self::describe(&d)).collect()
    }
}

/// An enumerator that replays a fixed device list, used when the list comes from elsewhere.
pub struct StaticEnumerator {
    devices: Vec<UsbDeviceInfo>,
}

impl StaticEnumerator {
    pub fn new(devices: Vec<UsbDeviceInfo>) -> Self {
        Self { devices }
    }
}

impl UsbEnumerator for StaticEnumerator {
    fn scan(&self) -> Vec<UsbDeviceInfo> {
        self.devices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::device;

    #[test]
    fn known_pairs_classify() {
        assert_eq!(
            classify_ids(0x534d, 0x2109),
            Some(ChipsetType::Video(VideoChipsetKind::Ms2109))
        );
        assert_eq!(
            classify_ids(0x345f, 0x2130),
            Some(ChipsetType::Video(VideoChipsetKind::Ms2130s))
        );
        assert_eq!(
            classify_ids(0x1a86, 0x7523),
            Some(ChipsetType::Control(ControlChipsetKind::Ch9329))
        );
        assert_eq!(
            classify_ids(0x1a86, 0xfe0c),
            Some(ChipsetType::Control(ControlChipsetKind::Ch32v208))
        );
    }

    #[test]
    fn unknown_pairs_classify_as_none() {
        let known: Vec<(u16, u16)> = KNOWN_CHIPSETS.iter().map(|(v, p, _)| (*v, *p)).collect();
        for vendor_id in [0x0000, 0x1a86, 0x534d, 0x345f, 0x046d, 0xffff] {
            for product_id in [0x0000, 0x2109, 0x2130, 0x7523, 0xfe0c, 0xc52b, 0xffff] {
                if known.contains(&(vendor_id, product_id)) {
                    continue;
                }
                let info = device("Something", vendor_id, product_id, "0x011");
                assert_eq!(classify(&info), None, "{vendor_id:04x}:{product_id:04x}");
            }
        }
    }

    #[test]
    fn ids_round_trip_through_classification() {
        for (vendor_id, product_id, chipset) in KNOWN_CHIPSETS {
            assert_eq!(ids_for(chipset), (vendor_id, product_id));
        }
    }

    #[test]
    fn location_id_encodes_topology() {
        assert_eq!(format_location_id(0x14, &[1, 3]), "0x1413");
        assert_eq!(format_location_id(1, &[]), "0x01");
        assert_eq!(format_location_id(2, &[1, 2, 10]), "0x0212a");
    }

    #[test]
    fn wide_hub_ports_keep_one_digit() {
        let location = format_location_id(3, &[2, 17]);
        assert_eq!(location, "0x032f");
        assert_eq!(location.len(), "0x03".len() + 2);
        assert_eq!(format_location_id(3, &[255, 4]), "0x03f4");
    }
}
