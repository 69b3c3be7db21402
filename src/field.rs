//! Typed fields inside a message payload.
//!
//! Every field on the wire is `0xFF ‖ id ‖ type ‖ data`, with the data
//! length implied by the one-byte type code. Four encodings are known;
//! any other code is opaque, and because the stream carries no length
//! prefix for it, the first unknown field ends iteration: in lenient
//! mode the remaining bytes are preserved verbatim as one
//! [`FieldValue::Unknown`], in strict mode decoding fails.

use std::convert::TryFrom;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::FieldError;

/// Marker byte that opens every field and sub-structure.
pub(crate) const MARKER: u8 = 0xFF;

/// Known field type codes. Unrecognized codes are carried verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageFieldType {
    /// Four raw bytes (`0x01`).
    Integer,

    /// A Unix timestamp and four raw bytes (`0x03`).
    TimestampedInteger,

    /// A Unix timestamp and a null-terminated UTF-8 string (`0x04`).
    TimestampedText,

    /// Two Unix timestamps bracketing a run of samples (`0x0B`).
    Timeseries,

    /// Anything else.
    Unknown(u8),
}

impl MessageFieldType {
    /// The wire type code.
    pub fn code(self) -> u8 {
        match self {
            MessageFieldType::Integer => 0x01,
            MessageFieldType::TimestampedInteger => 0x03,
            MessageFieldType::TimestampedText => 0x04,
            MessageFieldType::Timeseries => 0x0B,
            MessageFieldType::Unknown(code) => code,
        }
    }
}

impl From<u8> for MessageFieldType {
    fn from(code: u8) -> Self {
        match code {
            0x01 => MessageFieldType::Integer,
            0x03 => MessageFieldType::TimestampedInteger,
            0x04 => MessageFieldType::TimestampedText,
            0x0B => MessageFieldType::Timeseries,
            code => MessageFieldType::Unknown(code),
        }
    }
}

/// Four raw big-endian bytes with caller-directed views.
///
/// The wire does not tag signedness, and some fields pack two 16-bit
/// halves into the same four bytes. All views are pure accessors over
/// the same raw bytes; the codec never guesses which one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Word(pub [u8; 4]);

impl Word {
    pub fn from_i32(value: i32) -> Self {
        Word(value.to_be_bytes())
    }

    pub fn from_u32(value: u32) -> Self {
        Word(value.to_be_bytes())
    }

    pub fn from_halves(hi: u16, lo: u16) -> Self {
        let (hi, lo) = (hi.to_be_bytes(), lo.to_be_bytes());
        Word([hi[0], hi[1], lo[0], lo[1]])
    }

    /// The four bytes as one signed 32-bit value.
    pub fn as_i32(self) -> i32 {
        i32::from_be_bytes(self.0)
    }

    /// The four bytes as one unsigned 32-bit value.
    pub fn as_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// The first two bytes as a signed 16-bit value.
    pub fn hi_i16(self) -> i16 {
        i16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// The last two bytes as a signed 16-bit value.
    pub fn lo_i16(self) -> i16 {
        i16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// The first two bytes as an unsigned 16-bit value.
    pub fn hi_u16(self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// The last two bytes as an unsigned 16-bit value.
    pub fn lo_u16(self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }
}

/// A field's decoded value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    /// Four raw bytes.
    Integer(Word),

    /// A Unix timestamp followed by four raw bytes.
    TimestampedInteger {
        /// Unix seconds.
        ts: u32,

        /// The integer, both views available.
        value: Word,
    },

    /// A Unix timestamp followed by UTF-8 text. The wire carries a
    /// trailing null which is not part of the decoded string.
    TimestampedText {
        /// Unix seconds.
        ts: u32,

        /// The decoded text, terminator excluded.
        text: String,
    },

    /// A run of `(hi, lo)` samples between two Unix timestamps.
    Timeseries {
        /// Unix seconds of the first sample.
        start: u32,

        /// Unix seconds of the last sample.
        end: u32,

        /// At most 255 samples; the wire sample count is one byte.
        samples: Vec<(u16, u16)>,
    },

    /// An unrecognized type code. `raw` holds every remaining payload
    /// byte after the type code, verbatim.
    Unknown {
        /// The unrecognized wire type code.
        type_code: u8,

        /// The undecodable tail of the payload.
        raw: Vec<u8>,
    },
}

impl FieldValue {
    /// The wire type this value encodes as.
    pub fn field_type(&self) -> MessageFieldType {
        match self {
            FieldValue::Integer(_) => MessageFieldType::Integer,
            FieldValue::TimestampedInteger { .. } => MessageFieldType::TimestampedInteger,
            FieldValue::TimestampedText { .. } => MessageFieldType::TimestampedText,
            FieldValue::Timeseries { .. } => MessageFieldType::Timeseries,
            FieldValue::Unknown { type_code, .. } => MessageFieldType::Unknown(*type_code),
        }
    }

    /// The value's Unix timestamp, if it carries one. For a timeseries
    /// this is the start timestamp.
    pub fn timestamp(&self) -> Option<u32> {
        match self {
            FieldValue::TimestampedInteger { ts, .. } => Some(*ts),
            FieldValue::TimestampedText { ts, .. } => Some(*ts),
            FieldValue::Timeseries { start, .. } => Some(*start),
            _ => None,
        }
    }

    /// [`Self::timestamp`] as a UTC datetime.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        self.timestamp()
            .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
    }

    /// The integer word, if this value is integer-shaped (plain or
    /// timestamped).
    pub fn integer(&self) -> Option<Word> {
        match self {
            FieldValue::Integer(word) => Some(*word),
            FieldValue::TimestampedInteger { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The text, if this value is a text field.
    pub fn text(&self) -> Option<&str> {
        match self {
            FieldValue::TimestampedText { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A `{marker, id, type, data}` unit inside a payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Field {
    /// The wire field id. Ids need not be unique within a message.
    pub id: u8,

    /// The decoded value.
    pub value: FieldValue,
}

impl Field {
    pub fn new(id: u8, value: FieldValue) -> Self {
        Field { id, value }
    }

    /// A plain integer field, the shape client requests use to address
    /// a device or sensor.
    pub fn integer(id: u8, value: i32) -> Self {
        Field::new(id, FieldValue::Integer(Word::from_i32(value)))
    }

    /// The wire type code of this field's value.
    pub fn type_code(&self) -> u8 {
        self.value.field_type().code()
    }
}

/// What to do when an unknown field type code is met.
///
/// The wire format has no length prefix for unknown types, so decoding
/// cannot continue past one; this flag chooses between preserving the
/// tail and failing loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownFieldPolicy {
    /// Stop cleanly, keeping the tail as a single [`FieldValue::Unknown`].
    Lenient,

    /// Fail with [`FieldError::UnknownType`].
    Strict,
}

impl Default for UnknownFieldPolicy {
    fn default() -> Self {
        UnknownFieldPolicy::Lenient
    }
}

/// Decodes a payload into its fields.
pub fn decode_fields(bytes: &[u8], policy: UnknownFieldPolicy) -> Result<Vec<Field>, FieldError> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let start = pos;
        if bytes[pos] != MARKER {
            return Err(FieldError::Marker {
                offset: pos,
                found: bytes[pos],
            });
        }
        if bytes.len() < pos + 3 {
            return Err(FieldError::Truncation { offset: start });
        }
        let id = bytes[pos + 1];
        let code = bytes[pos + 2];
        pos += 3;

        let value = match MessageFieldType::from(code) {
            MessageFieldType::Integer => FieldValue::Integer(take_word(bytes, &mut pos, start)?),
            MessageFieldType::TimestampedInteger => {
                let ts = take_u32(bytes, &mut pos, start)?;
                expect_marker(bytes, &mut pos, start)?;
                let value = take_word(bytes, &mut pos, start)?;
                FieldValue::TimestampedInteger { ts, value }
            }
            MessageFieldType::TimestampedText => {
                let ts = take_u32(bytes, &mut pos, start)?;
                expect_marker(bytes, &mut pos, start)?;
                let text = take_text(bytes, &mut pos, start)?;
                FieldValue::TimestampedText { ts, text }
            }
            MessageFieldType::Timeseries => {
                let first = take_u32(bytes, &mut pos, start)?;
                expect_marker(bytes, &mut pos, start)?;
                let last = take_u32(bytes, &mut pos, start)?;
                expect_marker(bytes, &mut pos, start)?;
                let count = take(bytes, &mut pos, 1, start)?[0];
                let mut samples = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    expect_marker(bytes, &mut pos, start)?;
                    let hi = take_u16(bytes, &mut pos, start)?;
                    let lo = take_u16(bytes, &mut pos, start)?;
                    samples.push((hi, lo));
                }
                expect_marker(bytes, &mut pos, start)?;
                FieldValue::Timeseries {
                    start: first,
                    end: last,
                    samples,
                }
            }
            MessageFieldType::Unknown(type_code) => match policy {
                UnknownFieldPolicy::Strict => {
                    return Err(FieldError::UnknownType {
                        offset: start,
                        type_code,
                    });
                }
                UnknownFieldPolicy::Lenient => {
                    let raw = bytes[pos..].to_vec();
                    pos = bytes.len();
                    FieldValue::Unknown { type_code, raw }
                }
            },
        };
        fields.push(Field { id, value });
    }
    Ok(fields)
}

/// Encodes fields back into payload bytes; the exact inverse of
/// [`decode_fields`].
///
/// # Panics
///
/// Panics if a timeseries holds more than 255 samples: the wire sample
/// count is one byte, and truncating it would desync every field that
/// follows.
pub fn encode_fields(fields: &[Field]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        encode_field(field, &mut out);
    }
    out
}

fn encode_field(field: &Field, out: &mut Vec<u8>) {
    out.push(MARKER);
    out.push(field.id);
    out.push(field.type_code());
    match &field.value {
        FieldValue::Integer(word) => out.extend_from_slice(&word.0),
        FieldValue::TimestampedInteger { ts, value } => {
            out.extend_from_slice(&ts.to_be_bytes());
            out.push(MARKER);
            out.extend_from_slice(&value.0);
        }
        FieldValue::TimestampedText { ts, text } => {
            out.extend_from_slice(&ts.to_be_bytes());
            out.push(MARKER);
            out.extend_from_slice(text.as_bytes());
            out.push(0x00);
        }
        FieldValue::Timeseries {
            start,
            end,
            samples,
        } => {
            assert!(
                samples.len() <= u8::MAX as usize,
                "timeseries holds {} samples; the wire count field is one byte",
                samples.len()
            );
            out.extend_from_slice(&start.to_be_bytes());
            out.push(MARKER);
            out.extend_from_slice(&end.to_be_bytes());
            out.push(MARKER);
            out.push(samples.len() as u8);
            for (hi, lo) in samples {
                out.push(MARKER);
                out.extend_from_slice(&hi.to_be_bytes());
                out.extend_from_slice(&lo.to_be_bytes());
            }
            out.push(MARKER);
        }
        FieldValue::Unknown { raw, .. } => out.extend_from_slice(raw),
    }
}

fn take<'a>(
    bytes: &'a [u8],
    pos: &mut usize,
    len: usize,
    field_start: usize,
) -> Result<&'a [u8], FieldError> {
    if bytes.len() < *pos + len {
        return Err(FieldError::Truncation {
            offset: field_start,
        });
    }
    let taken = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(taken)
}

fn take_word(bytes: &[u8], pos: &mut usize, field_start: usize) -> Result<Word, FieldError> {
    let raw = take(bytes, pos, 4, field_start)?;
    Ok(Word(<[u8; 4]>::try_from(raw).unwrap()))
}

fn take_u32(bytes: &[u8], pos: &mut usize, field_start: usize) -> Result<u32, FieldError> {
    take_word(bytes, pos, field_start).map(Word::as_u32)
}

fn take_u16(bytes: &[u8], pos: &mut usize, field_start: usize) -> Result<u16, FieldError> {
    let raw = take(bytes, pos, 2, field_start)?;
    Ok(u16::from_be_bytes([raw[0], raw[1]]))
}

fn expect_marker(bytes: &[u8], pos: &mut usize, field_start: usize) -> Result<(), FieldError> {
    let found = take(bytes, pos, 1, field_start)?[0];
    if found != MARKER {
        return Err(FieldError::Marker {
            offset: *pos - 1,
            found,
        });
    }
    Ok(())
}

/// Reads bytes up to and including the null terminator, decoding the
/// rest as UTF-8.
fn take_text(bytes: &[u8], pos: &mut usize, field_start: usize) -> Result<String, FieldError> {
    let text_start = *pos;
    let len = bytes[text_start..]
        .iter()
        .position(|&b| b == 0x00)
        .ok_or(FieldError::Truncation {
            offset: field_start,
        })?;
    let text = std::str::from_utf8(&bytes[text_start..text_start + len])
        .map_err(|_| FieldError::TextEncoding { offset: text_start })?;
    *pos = text_start + len + 1;
    Ok(text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_integer_field() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x02, 0x01,
            0x00, 0x00, 0x31, 0x2D,
        ];
        let fields = decode_fields(payload, UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(
            fields,
            vec![Field::new(2, FieldValue::Integer(Word([0x00, 0x00, 0x31, 0x2D])))]
        );
        assert_eq!(fields[0].value.integer().unwrap().as_i32(), 12589);
    }

    #[test]
    fn integer_views_agree_on_the_same_bytes() {
        let word = Word([0x84, 0xB3, 0xEE, 0x93]);
        assert_eq!(word.as_u32(), 0x84B3_EE93);
        assert_eq!(word.as_i32(), 0x84B3_EE93u32 as i32);
        assert_eq!(word.hi_u16(), 0x84B3);
        assert_eq!(word.lo_u16(), 0xEE93);
        assert_eq!(word.hi_i16(), 0x84B3u16 as i16);
        assert_eq!(word.lo_i16(), 0xEE93u16 as i16);

        let firmware = Word([0x00, 0x01, 0x00, 0x15]);
        assert_eq!(firmware.hi_i16(), 1);
        assert_eq!(firmware.lo_i16(), 21);
    }

    #[test]
    fn decode_timestamped_integer_field() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x01, 0x03,
            0x65, 0x54, 0x70, 0x80,
            0xFF,
            0x00, 0x00, 0x00, 0x09,
        ];
        let fields = decode_fields(payload, UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(
            fields,
            vec![Field::new(
                1,
                FieldValue::TimestampedInteger {
                    ts: 0x65547080,
                    value: Word([0x00, 0x00, 0x00, 0x09]),
                }
            )]
        );
        assert_eq!(fields[0].value.timestamp(), Some(0x65547080));
    }

    #[test]
    fn decode_timestamped_text_field() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x03, 0x04,
            0x00, 0x00, 0x00, 0x2A,
            0xFF,
            b'P', b'i', b'c', b'o',
            0x00,
        ];
        let fields = decode_fields(payload, UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(fields[0].value.text(), Some("Pico"));
        // Terminator is consumed; nothing trails.
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x03, 0x04,
            0x00, 0x00, 0x00, 0x2A,
            0xFF,
            0xC3, 0x28, // overlong-ish garbage
            0x00,
        ];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Strict),
            Err(FieldError::TextEncoding { offset: 8 })
        );
    }

    #[test]
    fn decode_timeseries_field() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x07, 0x0B,
            0x65, 0x53, 0xF1, 0x00, // 1_700_000_000
            0xFF,
            0x65, 0x53, 0xF1, 0x3C, // 1_700_000_060
            0xFF,
            0x02,
            0xFF, 0x00, 0x0A, 0x00, 0x14,
            0xFF, 0x00, 0x1E, 0x00, 0x28,
            0xFF,
        ];
        let fields = decode_fields(payload, UnknownFieldPolicy::Strict).unwrap();
        assert_eq!(
            fields,
            vec![Field::new(
                7,
                FieldValue::Timeseries {
                    start: 1_700_000_000,
                    end: 1_700_000_060,
                    samples: vec![(10, 20), (30, 40)],
                }
            )]
        );
    }

    #[test]
    fn timeseries_sample_block_must_start_with_marker() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x07, 0x0B,
            0x00, 0x00, 0x00, 0x01,
            0xFF,
            0x00, 0x00, 0x00, 0x02,
            0xFF,
            0x01,
            0x00, 0x00, 0x0A, 0x00, 0x14, // block missing its 0xFF
            0xFF,
        ];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Strict),
            Err(FieldError::Marker {
                offset: 14,
                found: 0x00,
            })
        );
    }

    #[test]
    fn unknown_type_lenient_keeps_tail() {
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x01, 0x01,
            0x00, 0x00, 0x00, 0x05,
            0xFF, 0x09, 0x77,       // unknown type 0x77
            0xDE, 0xAD, 0xBE, 0xEF, // opaque tail
        ];
        let fields = decode_fields(payload, UnknownFieldPolicy::Lenient).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(
            fields[1],
            Field::new(
                9,
                FieldValue::Unknown {
                    type_code: 0x77,
                    raw: vec![0xDE, 0xAD, 0xBE, 0xEF],
                }
            )
        );
    }

    #[test]
    fn unknown_type_strict_fails() {
        let payload: &[u8] = &[0xFF, 0x09, 0x77, 0xDE, 0xAD];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Strict),
            Err(FieldError::UnknownType {
                offset: 0,
                type_code: 0x77,
            })
        );
    }

    #[test]
    fn missing_marker_is_an_error() {
        let payload: &[u8] = &[0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Lenient),
            Err(FieldError::Marker {
                offset: 0,
                found: 0x00,
            })
        );
    }

    #[test]
    fn partial_field_is_truncation() {
        // Integer field with only two data bytes.
        let payload: &[u8] = &[0xFF, 0x01, 0x01, 0x00, 0x00];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Lenient),
            Err(FieldError::Truncation { offset: 0 })
        );

        // Marker alone at the end of the payload.
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00,
            0xFF,
        ];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Lenient),
            Err(FieldError::Truncation { offset: 7 })
        );

        // Text field with no terminator.
        #[rustfmt::skip]
        let payload: &[u8] = &[
            0xFF, 0x03, 0x04,
            0x00, 0x00, 0x00, 0x2A,
            0xFF,
            b'P', b'i',
        ];
        assert_eq!(
            decode_fields(payload, UnknownFieldPolicy::Lenient),
            Err(FieldError::Truncation { offset: 0 })
        );
    }

    #[test]
    fn fields_round_trip() {
        let fields = vec![
            Field::integer(1, -42),
            Field::new(
                1,
                FieldValue::TimestampedInteger {
                    ts: 1_700_000_000,
                    value: Word::from_halves(3, 7),
                },
            ),
            Field::new(
                3,
                FieldValue::TimestampedText {
                    ts: 1_700_000_001,
                    text: "Bilge Pump".to_owned(),
                },
            ),
            Field::new(
                7,
                FieldValue::Timeseries {
                    start: 1_700_000_000,
                    end: 1_700_000_060,
                    samples: vec![(10, 20), (30, 40), (50, 60)],
                },
            ),
        ];
        let encoded = encode_fields(&fields);
        assert_eq!(
            decode_fields(&encoded, UnknownFieldPolicy::Strict).unwrap(),
            fields
        );
    }

    #[test]
    fn unknown_field_round_trips_at_the_tail() {
        let fields = vec![
            Field::integer(1, 99),
            Field::new(
                2,
                FieldValue::Unknown {
                    type_code: 0x55,
                    raw: vec![0x01, 0x02, 0x03],
                },
            ),
        ];
        let encoded = encode_fields(&fields);
        assert_eq!(
            decode_fields(&encoded, UnknownFieldPolicy::Lenient).unwrap(),
            fields
        );
    }

    #[test]
    #[should_panic(expected = "the wire count field is one byte")]
    fn oversized_timeseries_cannot_encode() {
        let field = Field::new(
            7,
            FieldValue::Timeseries {
                start: 0,
                end: 1,
                samples: vec![(0, 0); 256],
            },
        );
        encode_fields(&[field]);
    }

    #[test]
    fn every_decoded_field_starts_on_a_marker() {
        let fields = vec![
            Field::integer(1, 1),
            Field::integer(2, 2),
            Field::new(
                3,
                FieldValue::TimestampedText {
                    ts: 7,
                    text: "x".to_owned(),
                },
            ),
        ];
        let encoded = encode_fields(&fields);
        // Walk the encoding with the known sizes and check each field
        // boundary byte.
        let mut offset = 0;
        for field in &fields {
            assert_eq!(encoded[offset], 0xFF);
            offset += match &field.value {
                FieldValue::Integer(_) => 7,
                FieldValue::TimestampedText { text, .. } => 3 + 4 + 1 + text.len() + 1,
                _ => unreachable!(),
            };
        }
        assert_eq!(offset, encoded.len());
    }

    #[test]
    fn datetime_accessor() {
        let value = FieldValue::TimestampedInteger {
            ts: 1_700_000_000,
            value: Word::from_i32(0),
        };
        let dt = value.datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }
}
