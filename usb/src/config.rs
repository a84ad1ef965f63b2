use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default CH9329 operating mode, keyboard + mouse + custom HID
pub const DEFAULT_CH9329_MODE: u8 = 0x82;

/// Tunables for chipset bring-up and polling. Timings are stored in milliseconds so the settings
/// file stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Tried first during CH9329 baud negotiation, and the rate the chip is configured to.
    pub priority_baud_rate: u32,

    /// CH9329 gives no acknowledgement for parameter changes, the device is assumed ready once
    /// this has elapsed after the request went out. Needs validating against real hardware.
    pub readiness_grace_ms: u64,

    pub cts_poll_interval_ms: u64,

    /// How recently CTS must have toggled for the target to be considered connected.
    pub target_activity_window_ms: u64,

    pub sd_query_timeout_ms: u64,
    pub serial_response_timeout_ms: u64,

    pub ch9329_mode: u8,

    /// Skip port discovery and always use this serial port.
    pub serial_port: Option<String>,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            priority_baud_rate: 115200,
            readiness_grace_ms: 500,
            cts_poll_interval_ms: 100,
            target_activity_window_ms: 2000,
            sd_query_timeout_ms: 500,
            serial_response_timeout_ms: 200,
            ch9329_mode: DEFAULT_CH9329_MODE,
            serial_port: None,
        }
    }
}

impl HalConfig {
    pub fn readiness_grace(&self) -> Duration {
        Duration::from_millis(self.readiness_grace_ms)
    }

    pub fn cts_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cts_poll_interval_ms)
    }

    pub fn target_activity_window(&self) -> Duration {
        Duration::from_millis(self.target_activity_window_ms)
    }

    pub fn sd_query_timeout(&self) -> Duration {
        Duration::from_millis(self.sd_query_timeout_ms)
    }

    pub fn serial_response_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_response_timeout_ms)
    }
}
