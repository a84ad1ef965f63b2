// Frames understood by both control chipsets. The CH32V208 speaks the CH9329 command set, so the
// builders here are shared. Frames are returned without their checksum, the serial transport adds
// it on the way out.
use crate::error::TransportError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use openterface_types::SdCardDirection;

pub const PACKET_HEADER: [u8; 2] = [0x57, 0xab];
pub const DEFAULT_ADDRESS: u8 = 0x00;

const RESPONSE_SUCCESS: u8 = 0x80;
const RESPONSE_ERROR: u8 = 0xc0;

/// Absolute mouse coordinates run from 0 to this value on both axes.
pub const ABSOLUTE_RESOLUTION: u16 = 4096;

pub mod cmd {
    pub const GET_INFO: u8 = 0x01;
    pub const SEND_KB_GENERAL_DATA: u8 = 0x02;
    pub const SEND_MS_ABS_DATA: u8 = 0x04;
    pub const SEND_MS_REL_DATA: u8 = 0x05;
    pub const SET_PARA_CFG: u8 = 0x09;
    pub const RESET: u8 = 0x0f;
    pub const SD_SWITCH: u8 = 0x17;
}

/// The CH9329 parameter block is longer than what we send, the fixed length byte stays at 0x32
/// and the remainder is padding.
const PARAMETER_FRAME_LENGTH: usize = 31;
const PARAMETER_LENGTH_BYTE: u8 = 0x32;

pub fn frame(command: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + data.len());
    frame.extend_from_slice(&PACKET_HEADER);
    frame.push(DEFAULT_ADDRESS);
    frame.push(command);
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame
}

pub fn get_info() -> Vec<u8> {
    frame(cmd::GET_INFO, &[])
}

pub fn reset() -> Vec<u8> {
    frame(cmd::RESET, &[])
}

pub fn sd_direction_query() -> Vec<u8> {
    frame(cmd::SD_SWITCH, &[0x03])
}

/// Builds the SET_PARA_CFG request that switches working mode and serial speed. The chip only
/// applies it after a reset.
pub fn parameter_config(mode: u8, baud_rate: u32) -> Vec<u8> {
    let mut frame = vec![0u8; PARAMETER_FRAME_LENGTH];
    frame[0..2].copy_from_slice(&PACKET_HEADER);
    frame[2] = DEFAULT_ADDRESS;
    frame[3] = cmd::SET_PARA_CFG;
    frame[4] = PARAMETER_LENGTH_BYTE;
    frame[5] = mode;
    BigEndian::write_u32(&mut frame[6..10], baud_rate);
    frame[10..13].copy_from_slice(&[0x01, 0xc2, 0x00]);
    frame
}

pub fn keyboard_report(modifiers: u8, keys: &[u8]) -> Vec<u8> {
    let mut data = [0u8; 8];
    data[0] = modifiers;
    for (slot, key) in data[2..].iter_mut().zip(keys.iter().take(6)) {
        *slot = *key;
    }
    frame(cmd::SEND_KB_GENERAL_DATA, &data)
}

/// `x` and `y` are in the 0..4096 absolute space.
pub fn absolute_mouse(buttons: u8, x: u16, y: u16, wheel: i8) -> Vec<u8> {
    let mut data = [0u8; 7];
    data[0] = 0x02;
    data[1] = buttons;
    LittleEndian::write_u16(&mut data[2..4], x.min(ABSOLUTE_RESOLUTION - 1));
    LittleEndian::write_u16(&mut data[4..6], y.min(ABSOLUTE_RESOLUTION - 1));
    data[6] = wheel as u8;
    frame(cmd::SEND_MS_ABS_DATA, &data)
}

pub fn relative_mouse(buttons: u8, dx: i8, dy: i8, wheel: i8) -> Vec<u8> {
    frame(
        cmd::SEND_MS_REL_DATA,
        &[0x01, buttons, dx as u8, dy as u8, wheel as u8],
    )
}

/// Validates a response to `command`, returning its payload.
pub fn response_data(response: &[u8], command: u8) -> Result<&[u8], TransportError> {
    if response.len() < 6 || response[0..2] != PACKET_HEADER {
        return Err(TransportError::MalformedResponse(format!(
            "bad header in {response:02x?}"
        )));
    }

    let length = response[4] as usize;
    if response.len() < 5 + length {
        return Err(TransportError::MalformedResponse(format!(
            "truncated payload in {response:02x?}"
        )));
    }

    match response[3] {
        code if code == command | RESPONSE_SUCCESS => Ok(&response[5..5 + length]),
        code if code == command | RESPONSE_ERROR => Err(TransportError::MalformedResponse(
            format!("chip reported error {:02x}", response.get(5).unwrap_or(&0)),
        )),
        code => Err(TransportError::MalformedResponse(format!(
            "unexpected command {code:02x}, expected {:02x}",
            command | RESPONSE_SUCCESS
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub version: String,
    pub target_usb_connected: bool,
    pub num_lock: bool,
    pub caps_lock: bool,
    pub scroll_lock: bool,
}

impl ChipInfo {
    pub fn parse(response: &[u8]) -> Result<Self, TransportError> {
        let data = response_data(response, cmd::GET_INFO)?;
        if data.len() < 3 {
            return Err(TransportError::MalformedResponse(String::from(
                "short GET_INFO payload",
            )));
        }

        let raw = data[0];
        Ok(Self {
            version: format!("V{}.{}", raw >> 4, raw & 0x0f),
            target_usb_connected: data[1] == 0x01,
            num_lock: data[2] & 0x01 != 0,
            caps_lock: data[2] & 0x02 != 0,
            scroll_lock: data[2] & 0x04 != 0,
        })
    }
}

pub fn parse_sd_direction(response: &[u8]) -> Result<SdCardDirection, TransportError> {
    let data = response_data(response, cmd::SD_SWITCH)?;
    match data.first() {
        Some(0x00) => Ok(SdCardDirection::Host),
        Some(0x01) => Ok(SdCardDirection::Target),
        other => Err(TransportError::MalformedResponse(format!(
            "unknown SD direction {other:?}"
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_frame_layout() {
        let frame = parameter_config(0x82, 115200);
        assert_eq!(frame.len(), 31);
        assert_eq!(
            &frame[..13],
            &[0x57, 0xab, 0x00, 0x09, 0x32, 0x82, 0x00, 0x01, 0xc2, 0x00, 0x01, 0xc2, 0x00]
        );
        assert!(frame[13..].iter().all(|b| *b == 0));

        let frame = parameter_config(0x02, 9600);
        assert_eq!(&frame[5..10], &[0x02, 0x00, 0x00, 0x25, 0x80]);
    }

    #[test]
    fn keyboard_frame_caps_at_six_keys() {
        let frame = keyboard_report(0x02, &[4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(
            frame,
            vec![0x57, 0xab, 0x00, 0x02, 0x08, 0x02, 0x00, 4, 5, 6, 7, 8, 9]
        );
    }

    #[test]
    fn absolute_mouse_is_little_endian_and_clamped() {
        let frame = absolute_mouse(0x01, 0x0123, 5000, -1);
        assert_eq!(&frame[3..5], &[0x04, 0x07]);
        assert_eq!(&frame[5..], &[0x02, 0x01, 0x23, 0x01, 0xff, 0x0f, 0xff]);
    }

    #[test]
    fn info_response_parses() {
        let info = ChipInfo::parse(&responses::info(0x31, true)).unwrap();
        assert_eq!(info.version, "V3.1");
        assert!(info.target_usb_connected);
        assert!(info.caps_lock);
        assert!(!info.num_lock);
    }

    #[test]
    fn error_and_foreign_responses_rejected() {
        let error = responses::build(cmd::GET_INFO | RESPONSE_ERROR, &[0xe1]);
        assert!(ChipInfo::parse(&error).is_err());

        let foreign = responses::build(cmd::RESET | RESPONSE_SUCCESS, &[0x00]);
        assert!(ChipInfo::parse(&foreign).is_err());

        assert!(ChipInfo::parse(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn sd_direction_parses() {
        assert_eq!(
            parse_sd_direction(&responses::sd_direction(SdCardDirection::Target)).unwrap(),
            SdCardDirection::Target
        );
        let bogus = responses::build(cmd::SD_SWITCH | RESPONSE_SUCCESS, &[0x07]);
        assert!(parse_sd_direction(&bogus).is_err());
    }
}
