use crate::managers::Managers;
use crate::settings::SettingsHandle;
use crate::shutdown::Shutdown;
use log::{debug, info, warn};
use openterface_types::{HalStatus, UsbDeviceInfo};
use openterface_usb::grouping::group_devices;
use openterface_usb::hal::integration::{HalEvent, HalIntegrationManager};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio::time::sleep;

/// The part of the bus we care about: every device sitting in a dongle group, by port.
pub type Fingerprint = Vec<(String, u16, u16)>;

pub fn topology_fingerprint(devices: &[UsbDeviceInfo]) -> Fingerprint {
    let mut fingerprint: Fingerprint = group_devices(devices)
        .iter()
        .flat_map(|group| group.devices().iter())
        .map(|d| (d.location_id.clone(), d.vendor_id, d.product_id))
        .collect();
    fingerprint.sort();
    fingerprint
}

/// Polls the bus for the dongle coming and going and keeps the bound chipsets' status fresh.
/// Every HAL call that may touch hardware runs on the blocking pool.
pub async fn run_hal_worker(
    integration: Arc<HalIntegrationManager>,
    managers: Managers,
    settings: SettingsHandle,
    mut shutdown: Shutdown,
) {
    // Detection runs straight away, then on the configured interval..
    let detection_duration = settings.get_detection_interval().await;
    let detection_sleep = sleep(std::time::Duration::from_millis(0));
    tokio::pin!(detection_sleep);

    let update_duration = settings.get_status_interval().await;
    let update_sleep = sleep(update_duration);
    tokio::pin!(update_sleep);

    let mut fingerprint: Option<Fingerprint> = None;
    let mut last_status = HalStatus::default();

    loop {
        tokio::select! {
            () = &mut detection_sleep => {
                let scanner = integration.clone();
                let devices = match spawn_blocking(move || scanner.hal().enumerator().scan()).await {
                    Ok(devices) => devices,
                    Err(error) => {
                        warn!("USB scan task failed: {}", error);
                        Vec::new()
                    }
                };

                let current = topology_fingerprint(&devices);
                if fingerprint.as_ref() != Some(&current) {
                    info!("Dongle topology changed, {} relevant devices", current.len());
                    fingerprint = Some(current);

                    let binder = integration.clone();
                    let event = HalEvent::TopologyChanged(devices);
                    match spawn_blocking(move || binder.handle_event(event)).await {
                        Ok(true) => info!("Hardware bound"),
                        Ok(false) => info!("No Openterface hardware bound"),
                        Err(error) => warn!("Chipset binding task failed: {}", error),
                    }
                }
                detection_sleep.as_mut().reset(tokio::time::Instant::now() + detection_duration);
            },
            () = &mut update_sleep => {
                let refresher = integration.clone();
                match spawn_blocking(move || refresher.hal().refresh_status()).await {
                    Ok(status) => {
                        if status.control_ready && !last_status.control_ready {
                            integration.handle_event(HalEvent::CommunicationEstablished);
                        }
                        if status != last_status {
                            debug!("HAL status: {:?}", status);
                            info!(
                                "Video: {} {} fps, Control: {}",
                                status.resolution_text(),
                                status.fps_text(),
                                managers.serial.status_text()
                            );
                            last_status = status;
                        }
                    }
                    Err(error) => warn!("Status refresh task failed: {}", error),
                }
                update_sleep.as_mut().reset(tokio::time::Instant::now() + update_duration);
            },
            () = shutdown.recv() => {
                info!("Shutting down HAL worker");

                // Don't leave anything held down on the target..
                let hid = managers.hid.clone();
                match spawn_blocking(move || hid.release_all()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => warn!("Unable to release keys on shutdown: {}", error),
                    Err(error) => warn!("Key release task failed: {}", error),
                }

                let releaser = integration.clone();
                let removal = spawn_blocking(move || releaser.handle_event(HalEvent::HardwareRemoved));
                if let Err(error) = removal.await {
                    warn!("Hardware release task failed: {}", error);
                }
                return;
            }
        }
    }
}
