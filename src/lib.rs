//! A client for the Simarine Pico message protocol: the
//! reverse-engineered binary protocol a Pico battery monitor speaks
//! over TCP (control, port 5001) and UDP (broadcast/discovery, port
//! 43210).
//!
//! The codec layers are pure and transport-agnostic:
//!
//! - [`crc`]: the protocol's non-standard CRC-16.
//! - [`field`]: typed fields inside a payload — integers with dual
//!   32-bit and hi/lo 16-bit views, timestamped integers and text,
//!   timeseries, and opaque unknowns.
//! - [`message`]: the frame envelope (preamble, markers, type, serial,
//!   length, checksum) and the known message type codes.
//! - [`device`]: projections from decoded messages to domain objects
//!   (system info, device and sensor descriptors, sensor states) and
//!   the raw-to-physical unit mapping.
//!
//! [`transport`] binds the codec to sockets, and [`session`] drives
//! discovery plus the enumeration conversation:
//!
//! ```no_run
//! use simarine::{Session, SessionConfig};
//!
//! # fn main() -> Result<(), simarine::ClientError> {
//! let mut session = Session::open(&SessionConfig::default())?;
//! let inventory = session.enumerate()?;
//! for sensor in &inventory.sensors {
//!     println!("sensor {}: {:?}", sensor.sensor_id, sensor.sensor_type);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Unknown message types and unknown field types decode without loss
//! (the latter halting field iteration, as the wire gives them no
//! length); nothing here persists state across sessions.

pub mod crc;
pub mod device;
pub mod error;
pub mod field;
pub mod message;
pub mod session;
pub mod transport;

pub use crc::crc16;
pub use device::{
    DeviceInfo, DeviceSensorCount, DeviceType, Physical, SensorInfo, SensorState, SensorType,
    SystemInfo,
};
pub use error::{ClientError, FieldError, FrameError, ProjectionError};
pub use field::{Field, FieldValue, MessageFieldType, UnknownFieldPolicy, Word};
pub use message::{Message, MessageType};
pub use session::{discover, Inventory, Session, SessionConfig};
pub use transport::{Broadcasts, TcpChannel, TCP_PORT, UDP_PORT};

/// Re-export for downstream timestamp handling.
pub use chrono;
