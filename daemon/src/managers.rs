// The consumers of the HAL. Neither manager knows which chipset it's driving, the integration
// manager pushes the current handles in whenever the bound hardware changes.
use log::debug;
use openterface_types::SdCardDirection;
use openterface_usb::chipset::control::protocol;
use openterface_usb::error::HalError;
use openterface_usb::hal::integration::{ChipsetObserver, HalIntegrationManager};
use openterface_usb::hal::{ControlHandle, VideoHandle};
use parking_lot::RwLock;
use std::sync::Arc;

/// Forwards keyboard and mouse events to the target through whatever control chipset is bound.
#[derive(Default)]
pub struct HidManager {
    control: RwLock<Option<ControlHandle>>,
}

impl HidManager {
    fn control(&self) -> Result<ControlHandle, HalError> {
        self.control.read().clone().ok_or(HalError::NoDevice("control"))
    }

    fn send(&self, frame: &[u8]) -> Result<(), HalError> {
        let control = self.control()?;
        if control.send_command(frame, false) {
            Ok(())
        } else {
            Err(HalError::CommunicationFailed(
                control.chipset_info().name().to_string(),
            ))
        }
    }

    pub fn send_keyboard(&self, modifiers: u8, keys: &[u8]) -> Result<(), HalError> {
        self.send(&protocol::keyboard_report(modifiers, keys))
    }

    pub fn send_relative_mouse(
        &self,
        buttons: u8,
        dx: i8,
        dy: i8,
        wheel: i8,
    ) -> Result<(), HalError> {
        self.send(&protocol::relative_mouse(buttons, dx, dy, wheel))
    }

    /// Lets go of every key and button, so nothing stays held on the target.
    pub fn release_all(&self) -> Result<(), HalError> {
        self.send_keyboard(0, &[])?;
        self.send_relative_mouse(0, 0, 0, 0)
    }
}

impl ChipsetObserver for HidManager {
    fn chipsets_changed(&self, _video: Option<VideoHandle>, control: Option<ControlHandle>) {
        debug!(
            "HID manager now using {}",
            control
                .as_ref()
                .map_or("nothing", |c| c.chipset_info().name())
        );
        *self.control.write() = control;
    }
}

/// Reports on the serial side of whatever control chipset is bound.
#[derive(Default)]
pub struct SerialManager {
    control: RwLock<Option<ControlHandle>>,
}

impl SerialManager {
    pub fn status_text(&self) -> String {
        let Some(control) = self.control.read().clone() else {
            return String::from("No control chipset");
        };

        let status = control.get_device_status();
        if !status.is_connected {
            return format!("{} disconnected", control.chipset_info().name());
        }

        format!(
            "{} @ {} baud, {}, target {}",
            control.chipset_info().name(),
            status.baud_rate,
            if status.is_device_ready { "ready" } else { "settling" },
            if status.target_connected { "connected" } else { "idle" }
        )
    }

    pub fn sd_direction(&self) -> Option<SdCardDirection> {
        self.control.read().as_ref()?.get_device_status().sd_direction
    }
}

impl ChipsetObserver for SerialManager {
    fn chipsets_changed(&self, _video: Option<VideoHandle>, control: Option<ControlHandle>) {
        *self.control.write() = control;
    }
}

#[derive(Clone)]
pub struct Managers {
    pub hid: Arc<HidManager>,
    pub serial: Arc<SerialManager>,
}

impl Managers {
    pub fn register(integration: &HalIntegrationManager) -> Self {
        let managers = Self {
            hid: Arc::new(HidManager::default()),
            serial: Arc::new(SerialManager::default()),
        };
        integration.register(managers.hid.clone());
        integration.register(managers.serial.clone());
        managers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{empty_integration, FakeControl};

    #[test]
    fn nothing_bound() {
        let integration = empty_integration();
        let managers = Managers::register(&integration);

        assert!(matches!(
            managers.hid.send_keyboard(0, &[0x04]),
            Err(HalError::NoDevice("control"))
        ));
        assert!(managers.hid.release_all().is_err());

        assert_eq!(managers.serial.status_text(), "No control chipset");
        assert_eq!(managers.serial.sd_direction(), None);
    }

    #[test]
    fn events_go_to_the_bound_chipset() {
        let control = Arc::new(FakeControl::ready());
        let hid = HidManager::default();
        hid.chipsets_changed(None, Some(control.clone()));

        hid.send_keyboard(0x02, &[0x04]).unwrap();
        hid.release_all().unwrap();

        let frames = control.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], protocol::keyboard_report(0x02, &[0x04]));
        assert_eq!(frames[1], protocol::keyboard_report(0, &[]));
        assert_eq!(frames[2], protocol::relative_mouse(0, 0, 0, 0));
    }

    #[test]
    fn unready_chipset_rejects_events() {
        let control = Arc::new(FakeControl::default());
        let hid = HidManager::default();
        hid.chipsets_changed(None, Some(control.clone()));

        assert!(matches!(
            hid.send_keyboard(0, &[0x04]),
            Err(HalError::CommunicationFailed(_))
        ));
        assert!(control.frames().is_empty());
    }

    #[test]
    fn serial_status_follows_the_chipset() {
        let serial = SerialManager::default();
        serial.chipsets_changed(None, Some(Arc::new(FakeControl::ready())));
        assert_eq!(
            serial.status_text(),
            "Fake @ 115200 baud, ready, target idle"
        );

        serial.chipsets_changed(None, Some(Arc::new(FakeControl::default())));
        assert_eq!(serial.status_text(), "Fake disconnected");
    }
}
