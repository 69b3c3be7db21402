//! Errors surfaced by the codec, the domain projections, and the
//! transports.
//!
//! The codec never retries: framing and field errors carry byte offsets
//! so a caller can point at the exact spot in a captured frame. Field
//! offsets are relative to the start of the payload (frame offset 13).

use crate::message::MessageType;

/// A payload byte stream failed to decode into fields.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldError {
    /// A field or sub-structure did not begin with the `0xFF` marker.
    #[error("expected a 0xFF marker at payload offset {offset}, found {found:#04x}")]
    Marker {
        /// Payload offset of the offending byte.
        offset: usize,

        /// The byte found where the marker should be.
        found: u8,
    },

    /// A text field did not hold valid UTF-8.
    #[error("text at payload offset {offset} is not valid UTF-8")]
    TextEncoding {
        /// Payload offset of the first text byte.
        offset: usize,
    },

    /// A field ran off the end of the payload.
    #[error("field at payload offset {offset} is truncated")]
    Truncation {
        /// Payload offset of the field's marker byte.
        offset: usize,
    },

    /// An unknown field type code was met in strict mode. The stream
    /// carries no length prefix for unknown types, so nothing past this
    /// point can be decoded.
    #[error("unknown field type {type_code:#04x} at payload offset {offset}")]
    UnknownType {
        /// Payload offset of the field's marker byte.
        offset: usize,

        /// The unrecognized type code.
        type_code: u8,
    },
}

/// A byte buffer failed to decode into a [`Message`](crate::Message).
///
/// A failed decode never yields a partially constructed message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameError {
    /// A preamble byte was not `0x00`.
    #[error("preamble byte at offset {offset} is {found:#04x}, expected 0x00")]
    Preamble {
        /// Frame offset of the offending byte (0..5).
        offset: usize,

        /// The byte found there.
        found: u8,
    },

    /// The byte after the preamble was not the `0xFF` header marker.
    #[error("header marker is {found:#04x}, expected 0xFF")]
    HeaderMarker {
        /// The byte found at frame offset 5.
        found: u8,
    },

    /// The buffer size disagrees with the wire length field. `actual`
    /// below `expected` is an under-read (e.g. a truncated capture);
    /// above it is an over-read.
    #[error("frame is {actual} bytes but its length field implies {expected}")]
    Length {
        /// `13 + length` per the length field (or the 16-byte floor).
        expected: usize,

        /// The buffer size that was handed in.
        actual: usize,
    },

    /// The byte before the checksum was not the `0xFF` checksum marker.
    #[error("checksum marker is {found:#04x}, expected 0xFF")]
    ChecksumMarker {
        /// The byte found at frame offset `len - 3`.
        found: u8,
    },

    /// The trailing checksum disagrees with the computed CRC-16.
    #[error("checksum mismatch: computed {computed:#06x}, frame carries {found:#06x}")]
    Checksum {
        /// CRC-16 over the frame up to the checksum marker.
        computed: u16,

        /// The big-endian checksum the frame carries.
        found: u16,
    },

    /// The payload failed to decode into fields.
    #[error("payload: {0}")]
    Field(#[from] FieldError),
}

/// A well-formed message did not carry the fields a domain projection
/// requires.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    /// The message type does not match the projection.
    #[error("a {found} message does not project to {projection}")]
    WrongType {
        /// Name of the attempted projection.
        projection: &'static str,

        /// The message's actual type.
        found: MessageType,
    },

    /// A structurally required field is absent.
    #[error("{projection} message is missing required field {id}")]
    MissingField {
        /// Name of the attempted projection.
        projection: &'static str,

        /// The absent field id.
        id: u8,
    },
}

/// Errors surfaced by the transports and the session driver.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting or socket I/O failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed mid-frame after {received} bytes")]
    Eof {
        /// Bytes of the frame received before the close.
        received: usize,
    },

    /// The response type did not match what the request expected. The
    /// offending message is dropped.
    #[error("expected a {expected} response, got {actual}")]
    UnexpectedType {
        /// The declared expected type.
        expected: MessageType,

        /// The type that actually arrived.
        actual: MessageType,
    },

    /// No well-formed broadcast arrived before the discovery deadline.
    #[error("no device broadcast arrived before the deadline")]
    DiscoveryTimeout,

    /// A received frame failed to decode.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A response decoded but did not project to the expected domain
    /// object.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}
