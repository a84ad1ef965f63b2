use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,

    #[error("Device {0:04x}:{1:04x} was not found")]
    DeviceNotFound(u16, u16),

    #[error("No usable HID interface on device")]
    NoHidInterface,

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error("Serial error: {0}")]
    SerialError(#[from] serialport::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Failures surfaced to consumers driving the bound chipsets.
#[derive(thiserror::Error, Debug)]
pub enum HalError {
    #[error("No {0} chipset is bound")]
    NoDevice(&'static str),

    #[error("{0} did not accept the command")]
    CommunicationFailed(String),
}
