use crate::devices::classify;
use crate::grouping::is_video_marker;
use crate::transport::CaptureDeviceProbe;
use crate::{PID_MS2130S, VID_MS2130S};
use openterface_types::UsbDeviceInfo;

/// Answers from the enumerated snapshot, nothing is opened. The MS2130S exposes its UVC interface
/// on the same device, so a vendor / product match is enough. A capture style product name on an
/// unclassified device is accepted as a fallback.
#[derive(Default)]
pub struct EnumeratedCaptureProbe;

impl CaptureDeviceProbe for EnumeratedCaptureProbe {
    fn has_capture_device(&self, devices: &[UsbDeviceInfo]) -> bool {
        devices.iter().any(|device| device.matches(VID_MS2130S, PID_MS2130S))
            || devices
                .iter()
                .any(|device| classify(device).is_none() && is_video_marker(&device.product_name))
    }
}
