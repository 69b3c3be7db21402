//! The outer message envelope.
//!
//! Every frame is
//! `00 00 00 00 00 ‖ FF ‖ type ‖ serial ‖ length ‖ payload ‖ FF ‖ crc`,
//! all multi-byte integers big-endian. The wire length field counts the
//! payload plus the three trailer bytes, and the checksum covers every
//! byte before the trailing `FF` marker.

use std::fmt;

use crate::crc::crc16;
use crate::error::FrameError;
use crate::field::{decode_fields, encode_fields, Field, UnknownFieldPolicy, MARKER};

/// Frame offset at which the payload starts.
pub(crate) const HEADER_LEN: usize = 13;

/// Checksum marker plus the two checksum bytes. Counted by the wire
/// length field.
const TRAILER_LEN: usize = 3;

/// The smallest possible frame: a header and an empty payload's trailer.
pub(crate) const MIN_FRAME: usize = HEADER_LEN + TRAILER_LEN;

const PREAMBLE: [u8; 5] = [0x00; 5];

/// Known semantic message types. Unrecognized codes are carried
/// verbatim so forward-compatible traffic decodes without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageType {
    /// Device serial and firmware version (`0x01`).
    SystemInfo,

    /// Highest device and sensor ids (`0x02`).
    DeviceSensorCount,

    /// Per-sensor descriptor (`0x20`).
    SensorInfo,

    /// Per-device descriptor (`0x41`).
    DeviceInfo,

    /// Sensor ids and their raw states (`0xB0`).
    SensorState,

    /// Anything else.
    Unknown(u8),
}

impl MessageType {
    /// The wire type code.
    pub fn code(self) -> u8 {
        match self {
            MessageType::SystemInfo => 0x01,
            MessageType::DeviceSensorCount => 0x02,
            MessageType::SensorInfo => 0x20,
            MessageType::DeviceInfo => 0x41,
            MessageType::SensorState => 0xB0,
            MessageType::Unknown(code) => code,
        }
    }
}

impl From<u8> for MessageType {
    fn from(code: u8) -> Self {
        match code {
            0x01 => MessageType::SystemInfo,
            0x02 => MessageType::DeviceSensorCount,
            0x20 => MessageType::SensorInfo,
            0x41 => MessageType::DeviceInfo,
            0xB0 => MessageType::SensorState,
            code => MessageType::Unknown(code),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::SystemInfo => write!(f, "SYSTEM_INFO"),
            MessageType::DeviceSensorCount => write!(f, "DEVICE_SENSOR_COUNT"),
            MessageType::SensorInfo => write!(f, "SENSOR_INFO"),
            MessageType::DeviceInfo => write!(f, "DEVICE_INFO"),
            MessageType::SensorState => write!(f, "SENSOR_STATE"),
            MessageType::Unknown(code) => write!(f, "UNKNOWN({:#04x})", code),
        }
    }
}

/// A decoded (or to-be-encoded) protocol message.
///
/// Construct one, encode or decode it, consume it; messages are not
/// mutated in flight. The serial is carried verbatim: the device stamps
/// its own frames with it, a client request leaves it zero.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// The semantic type code.
    pub message_type: MessageType,

    /// The device-assigned 32-bit identifier; zero on client requests.
    pub serial: u32,

    /// The payload fields, in wire order.
    pub fields: Vec<Field>,
}

impl Message {
    /// An empty client request of the given type, serial zero.
    pub fn request(message_type: MessageType) -> Self {
        Message {
            message_type,
            serial: 0,
            fields: Vec::new(),
        }
    }

    /// A client request carrying fields (e.g. a device or sensor id).
    pub fn with_fields(message_type: MessageType, fields: Vec<Field>) -> Self {
        Message {
            message_type,
            serial: 0,
            fields,
        }
    }

    /// A request for one device's descriptor. The target id rides in an
    /// integer field with id 0.
    pub fn device_info_request(device_id: i32) -> Self {
        Message::with_fields(MessageType::DeviceInfo, vec![Field::integer(0, device_id)])
    }

    /// A request for one sensor's descriptor. The target id rides in an
    /// integer field with id 0.
    pub fn sensor_info_request(sensor_id: i32) -> Self {
        Message::with_fields(MessageType::SensorInfo, vec![Field::integer(0, sensor_id)])
    }

    /// Encodes the message into a complete frame.
    pub fn encode(&self) -> Vec<u8> {
        let payload = encode_fields(&self.fields);
        let length = (payload.len() + TRAILER_LEN) as u16;

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
        out.extend_from_slice(&PREAMBLE);
        out.push(MARKER);
        out.push(self.message_type.code());
        out.extend_from_slice(&self.serial.to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&payload);
        let crc = crc16(&out);
        out.push(MARKER);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Decodes one complete frame, validating structure, length, and
    /// checksum before touching the payload.
    pub fn decode(bytes: &[u8], policy: UnknownFieldPolicy) -> Result<Message, FrameError> {
        if bytes.len() < MIN_FRAME {
            return Err(FrameError::Length {
                expected: MIN_FRAME,
                actual: bytes.len(),
            });
        }
        for (offset, &found) in bytes[..PREAMBLE.len()].iter().enumerate() {
            if found != 0x00 {
                return Err(FrameError::Preamble { offset, found });
            }
        }
        if bytes[5] != MARKER {
            return Err(FrameError::HeaderMarker { found: bytes[5] });
        }

        let message_type = MessageType::from(bytes[6]);
        let serial = u32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]);
        let length = u16::from_be_bytes([bytes[11], bytes[12]]) as usize;

        let expected = HEADER_LEN + length;
        if bytes.len() != expected {
            return Err(FrameError::Length {
                expected,
                actual: bytes.len(),
            });
        }
        let marker_at = expected - TRAILER_LEN;
        if bytes[marker_at] != MARKER {
            return Err(FrameError::ChecksumMarker {
                found: bytes[marker_at],
            });
        }
        let computed = crc16(&bytes[..marker_at]);
        let found = u16::from_be_bytes([bytes[expected - 2], bytes[expected - 1]]);
        if computed != found {
            return Err(FrameError::Checksum { computed, found });
        }

        let fields = decode_fields(&bytes[HEADER_LEN..marker_at], policy)?;
        Ok(Message {
            message_type,
            serial,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldValue, Word};

    /// The empty SYSTEM_INFO request from a live capture.
    #[rustfmt::skip]
    const SYSTEM_INFO_REQUEST: &[u8] = &[
        0x00, 0x00, 0x00, 0x00, 0x00,
        0xFF, 0x01,
        0x00, 0x00, 0x00, 0x00,
        0x00, 0x03,
        0xFF, 0x89, 0xB8,
    ];

    #[test]
    fn encode_empty_request() {
        let message = Message::request(MessageType::SystemInfo);
        assert_eq!(message.encode(), SYSTEM_INFO_REQUEST);
    }

    #[test]
    fn decode_empty_request() {
        let message = Message::decode(SYSTEM_INFO_REQUEST, UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(message, Message::request(MessageType::SystemInfo));
    }

    #[test]
    fn addressed_requests_carry_the_target_id() {
        let request = Message::device_info_request(3);
        assert_eq!(request.serial, 0);
        assert_eq!(request.message_type, MessageType::DeviceInfo);
        assert_eq!(request.fields, vec![Field::integer(0, 3)]);

        let request = Message::sensor_info_request(7);
        assert_eq!(request.serial, 0);
        assert_eq!(request.message_type, MessageType::SensorInfo);
        assert_eq!(request.fields, vec![Field::integer(0, 7)]);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut bytes = SYSTEM_INFO_REQUEST.to_vec();
        *bytes.last_mut().unwrap() = 0xB9;
        assert_eq!(
            Message::decode(&bytes, UnknownFieldPolicy::Strict),
            Err(FrameError::Checksum {
                computed: 0x89B8,
                found: 0x89B9,
            })
        );
    }

    #[test]
    fn truncated_frame_is_a_length_error() {
        let bytes = &SYSTEM_INFO_REQUEST[..SYSTEM_INFO_REQUEST.len() - 1];
        assert_eq!(
            Message::decode(bytes, UnknownFieldPolicy::Strict),
            Err(FrameError::Length {
                expected: 16,
                actual: 15,
            })
        );
    }

    #[test]
    fn overlong_frame_is_a_length_error() {
        let mut bytes = SYSTEM_INFO_REQUEST.to_vec();
        bytes.push(0x00);
        assert_eq!(
            Message::decode(&bytes, UnknownFieldPolicy::Strict),
            Err(FrameError::Length {
                expected: 16,
                actual: 17,
            })
        );
    }

    #[test]
    fn bad_preamble_is_rejected() {
        let mut bytes = SYSTEM_INFO_REQUEST.to_vec();
        bytes[3] = 0x01;
        assert_eq!(
            Message::decode(&bytes, UnknownFieldPolicy::Strict),
            Err(FrameError::Preamble {
                offset: 3,
                found: 0x01,
            })
        );
    }

    #[test]
    fn bad_header_marker_is_rejected() {
        let mut bytes = SYSTEM_INFO_REQUEST.to_vec();
        bytes[5] = 0x7F;
        assert_eq!(
            Message::decode(&bytes, UnknownFieldPolicy::Strict),
            Err(FrameError::HeaderMarker { found: 0x7F })
        );
    }

    #[test]
    fn bad_checksum_marker_is_rejected() {
        let message = Message::with_fields(
            MessageType::SensorState,
            vec![Field::integer(2, 12589)],
        );
        let mut bytes = message.encode();
        let marker_at = bytes.len() - 3;
        bytes[marker_at] = 0x00;
        assert_eq!(
            Message::decode(&bytes, UnknownFieldPolicy::Strict),
            Err(FrameError::ChecksumMarker { found: 0x00 })
        );
    }

    #[test]
    fn any_bit_flip_in_the_checksummed_region_fails_decode() {
        let message = Message::with_fields(
            MessageType::SensorState,
            vec![Field::integer(2, 12589), Field::integer(5, -7)],
        );
        let bytes = message.encode();
        let crc_region = bytes.len() - 2;
        for bit in 0..crc_region * 8 {
            let mut flipped = bytes.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(
                Message::decode(&flipped, UnknownFieldPolicy::Strict).is_err(),
                "flip of bit {} decoded anyway",
                bit
            );
        }
    }

    #[test]
    fn payload_bit_flips_fail_with_checksum_error() {
        let message = Message::with_fields(
            MessageType::SensorState,
            vec![Field::integer(2, 12589)],
        );
        let bytes = message.encode();
        // Type, serial, and payload bytes are only guarded by the CRC.
        let guarded = (6..11).chain(HEADER_LEN..bytes.len() - 3);
        for byte in guarded {
            for bit in 0..8 {
                let mut flipped = bytes.clone();
                flipped[byte] ^= 1 << bit;
                match Message::decode(&flipped, UnknownFieldPolicy::Strict) {
                    Err(FrameError::Checksum { .. }) => {}
                    other => panic!("flip in byte {} gave {:?}", byte, other),
                }
            }
        }
    }

    #[test]
    fn message_round_trip() {
        let message = Message {
            message_type: MessageType::DeviceInfo,
            serial: 0x84B3_EE93,
            fields: vec![
                Field::integer(0, 3),
                Field::new(
                    1,
                    FieldValue::TimestampedInteger {
                        ts: 1_700_000_000,
                        value: Word::from_i32(8),
                    },
                ),
                Field::new(
                    3,
                    FieldValue::TimestampedText {
                        ts: 1_700_000_000,
                        text: "Fresh Water".to_owned(),
                    },
                ),
            ],
        };
        let decoded = Message::decode(&message.encode(), UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn unknown_message_type_round_trips() {
        let message = Message::with_fields(MessageType::Unknown(0x5A), vec![Field::integer(1, 1)]);
        let decoded = Message::decode(&message.encode(), UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(decoded.message_type, MessageType::Unknown(0x5A));
        assert_eq!(decoded.message_type.code(), 0x5A);
    }

    #[test]
    fn serial_is_carried_verbatim() {
        let mut message = Message::request(MessageType::SystemInfo);
        message.serial = 0xDEAD_BEEF;
        let decoded = Message::decode(&message.encode(), UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(decoded.serial, 0xDEAD_BEEF);
    }
}
