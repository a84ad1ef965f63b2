pub use openterface_types as types;
pub use rusb;

pub mod chipset;
pub mod config;
pub mod devices;
pub mod error;
pub mod grouping;
pub mod hal;
pub mod task;
pub mod transport;

#[cfg(test)]
mod testing;

pub const VID_MS2109: u16 = 0x534d;
pub const PID_MS2109: u16 = 0x2109;

pub const VID_MS2130S: u16 = 0x345f;
pub const PID_MS2130S: u16 = 0x2130;

pub const VID_CH9329: u16 = 0x1a86;
pub const PID_CH9329: u16 = 0x7523;

pub const VID_CH32V208: u16 = 0x1a86;
pub const PID_CH32V208: u16 = 0xfe0c;
