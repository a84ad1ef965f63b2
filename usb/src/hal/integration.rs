use crate::hal::{ControlHandle, HardwareAbstractionLayer, VideoHandle};
use log::debug;
use openterface_types::UsbDeviceInfo;
use parking_lot::RwLock;
use std::sync::Arc;

/// Anything that needs the currently bound chipsets. Handles are pushed in, observers never go
/// looking for them.
pub trait ChipsetObserver: Send + Sync {
    fn chipsets_changed(&self, video: Option<VideoHandle>, control: Option<ControlHandle>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalEvent {
    /// The bus changed, carries the fresh device list.
    TopologyChanged(Vec<UsbDeviceInfo>),

    /// A control chipset finished bringing up its link.
    CommunicationEstablished,

    /// The dongle went away entirely.
    HardwareRemoved,
}

pub struct HalIntegrationManager {
    hal: Arc<HardwareAbstractionLayer>,
    observers: RwLock<Vec<Arc<dyn ChipsetObserver>>>,
}

impl HalIntegrationManager {
    pub fn new(hal: Arc<HardwareAbstractionLayer>) -> Self {
        Self {
            hal,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn hal(&self) -> &Arc<HardwareAbstractionLayer> {
        &self.hal
    }

    /// Adds an observer and hands it the current chipsets straight away.
    pub fn register(&self, observer: Arc<dyn ChipsetObserver>) {
        observer.chipsets_changed(
            self.hal.get_current_video_chipset(),
            self.hal.get_current_control_chipset(),
        );
        self.observers.write().push(observer);
    }

    /// Runs a full scan and rebinds. Returns whether anything is bound afterwards.
    pub fn rescan(&self) -> bool {
        let bound = self.hal.detect_and_initialize_hardware();
        self.publish();
        bound
    }

    pub fn handle_event(&self, event: HalEvent) -> bool {
        match event {
            HalEvent::TopologyChanged(devices) => {
                debug!("USB topology changed, rebinding chipsets");
                let bound = self.hal.detect_from(devices);
                self.publish();
                bound
            }
            HalEvent::CommunicationEstablished => {
                // Re-running selection here would tear down the chipset that just came up.
                self.publish();
                self.hal.get_system_info().is_initialized
            }
            HalEvent::HardwareRemoved => {
                self.hal.deinitialize_hardware();
                self.publish();
                false
            }
        }
    }

    pub fn video_chipset(&self) -> Option<VideoHandle> {
        self.hal.get_current_video_chipset()
    }

    pub fn control_chipset(&self) -> Option<ControlHandle> {
        self.hal.get_current_control_chipset()
    }

    fn publish(&self) {
        let video = self.hal.get_current_video_chipset();
        let control = self.hal.get_current_control_chipset();

        // Observers are free to call back in, so don't hold the lock while notifying.
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.chipsets_changed(video.clone(), control.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::tests::{dongle, hal_with, ms2109_hid};
    use crate::testing::{device, MockSerial};
    use openterface_types::{ControlChipsetKind, VideoChipsetKind};
    use parking_lot::Mutex;

    type Seen = (Option<VideoChipsetKind>, Option<ControlChipsetKind>);

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Seen>>,
    }

    impl ChipsetObserver for Recorder {
        fn chipsets_changed(&self, video: Option<VideoHandle>, control: Option<ControlHandle>) {
            self.seen
                .lock()
                .push((video.map(|v| v.kind()), control.map(|c| c.kind())));
        }
    }

    fn manager() -> HalIntegrationManager {
        let serial = Arc::new(MockSerial::with_port("/dev/ttyUSB0").responding_at(&[115200]));
        HalIntegrationManager::new(Arc::new(hal_with(serial, ms2109_hid(), true)))
    }

    #[test]
    fn observers_follow_topology() {
        let manager = manager();
        let recorder = Arc::new(Recorder::default());
        manager.register(recorder.clone());

        assert!(manager.handle_event(HalEvent::TopologyChanged(dongle())));
        assert!(manager.handle_event(HalEvent::TopologyChanged(vec![device(
            "Openterface",
            0x345f,
            0x2130,
            "0x0111"
        )])));
        assert!(!manager.handle_event(HalEvent::HardwareRemoved));

        assert_eq!(
            *recorder.seen.lock(),
            vec![
                (None, None),
                (
                    Some(VideoChipsetKind::Ms2109),
                    Some(ControlChipsetKind::Ch9329)
                ),
                (Some(VideoChipsetKind::Ms2130s), None),
                (None, None),
            ]
        );
    }

    #[test]
    fn communication_established_keeps_the_instance() {
        let manager = manager();
        assert!(manager.handle_event(HalEvent::TopologyChanged(dongle())));
        let before = manager.control_chipset().unwrap();

        let recorder = Arc::new(Recorder::default());
        manager.register(recorder.clone());
        assert!(manager.handle_event(HalEvent::CommunicationEstablished));

        let after = manager.control_chipset().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_connected());
        assert_eq!(recorder.seen.lock().len(), 2);

        manager.hal().deinitialize_hardware();
    }

    #[test]
    fn empty_topology_publishes_nothing_bound() {
        let manager = manager();
        let recorder = Arc::new(Recorder::default());
        manager.register(recorder.clone());

        assert!(!manager.handle_event(HalEvent::TopologyChanged(vec![])));
        assert!(manager.video_chipset().is_none());
        assert_eq!(recorder.seen.lock().last(), Some(&(None, None)));
    }
}
