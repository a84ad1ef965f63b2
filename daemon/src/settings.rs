use anyhow::{Context, Result};
use log::error;
use openterface_usb::config::HalConfig;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct SettingsHandle {
    path: PathBuf,
    settings: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub async fn load(path: PathBuf) -> Result<SettingsHandle> {
        let settings = Settings::read(&path)?;
        let handle = SettingsHandle {
            path,
            settings: Arc::new(RwLock::new(settings)),
        };
        handle.save().await;
        Ok(handle)
    }

    pub async fn save(&self) {
        let settings = self.settings.write().await;
        if let Err(e) = settings.write(&self.path) {
            error!(
                "Couldn't save settings to {}: {}",
                self.path.to_string_lossy(),
                e
            );
        }
    }

    pub async fn get_hal_config(&self) -> HalConfig {
        self.settings.read().await.hal.clone()
    }

    pub async fn get_detection_interval(&self) -> Duration {
        Duration::from_millis(self.settings.read().await.detection_interval_ms)
    }

    pub async fn get_status_interval(&self) -> Duration {
        Duration::from_millis(self.settings.read().await.status_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hal: HalConfig,

    /// How often the bus is rescanned for a dongle being plugged or pulled
    pub detection_interval_ms: u64,

    /// How often chipset status is refreshed
    pub status_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hal: HalConfig::default(),
            detection_interval_ms: 1000,
            status_interval_ms: 250,
        }
    }
}

impl Settings {
    pub fn read(path: &Path) -> Result<Settings> {
        match File::open(path) {
            Ok(reader) => serde_json::from_reader(reader).context(format!(
                "Could not parse daemon settings file at {}",
                path.to_string_lossy()
            )),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Settings::default()),
            Err(error) => Err(error).context(format!(
                "Could not open daemon settings file for reading at {}",
                path.to_string_lossy()
            )),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if let Err(e) = create_dir_all(parent) {
                if e.kind() != ErrorKind::AlreadyExists {
                    return Err(e).context(format!(
                        "Could not create settings directory at {}",
                        parent.to_string_lossy()
                    ))?;
                }
            }
        }
        let writer = File::create(path).context(format!(
            "Could not open daemon settings file for writing at {}",
            path.to_string_lossy()
        ))?;
        serde_json::to_writer_pretty(writer, self).context(format!(
            "Could not write to daemon settings file at {}",
            path.to_string_lossy()
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("openterface-settings-{}-{}", name, std::process::id()))
            .join("settings.json")
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);

        let handle = SettingsHandle::load(path.clone()).await.unwrap();
        assert_eq!(handle.get_hal_config().await, HalConfig::default());
        assert_eq!(handle.get_detection_interval().await, Duration::from_secs(1));
        assert!(path.exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let path = scratch_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{ "hal": { "priority_baud_rate": 9600 }, "status_interval_ms": 100 }"#,
        )
        .unwrap();

        let handle = SettingsHandle::load(path.clone()).await.unwrap();
        let hal = handle.get_hal_config().await;
        assert_eq!(hal.priority_baud_rate, 9600);
        assert_eq!(hal.readiness_grace_ms, 500);
        assert_eq!(handle.get_status_interval().await, Duration::from_millis(100));
        assert_eq!(handle.get_detection_interval().await, Duration::from_secs(1));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn garbage_is_an_error() {
        let path = scratch_path("garbage");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        assert!(Settings::read(&path).is_err());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
