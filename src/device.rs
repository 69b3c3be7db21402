//! Domain projections: devices, sensors, and their states.
//!
//! A projection walks a decoded [`Message`]'s fields by id, keeping
//! positional order for duplicate ids. Required slots that are absent
//! fail with [`ProjectionError::MissingField`]; soft slots become
//! `None`; everything unrecognized is preserved under `extra`.

use std::fmt;

use crate::error::ProjectionError;
use crate::field::{Field, FieldValue, Word};
use crate::message::{Message, MessageType};

/// Known device types reported in a DEVICE_INFO descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    Null,
    Voltmeter,
    Amperemeter,
    Thermometer,
    Barometer,
    Ohmmeter,
    Time,
    Tank,
    Battery,
    System,
    Inclinometer,
    Unknown(u8),
}

impl DeviceType {
    pub fn code(self) -> u8 {
        match self {
            DeviceType::Null => 0,
            DeviceType::Voltmeter => 1,
            DeviceType::Amperemeter => 2,
            DeviceType::Thermometer => 3,
            DeviceType::Barometer => 5,
            DeviceType::Ohmmeter => 6,
            DeviceType::Time => 7,
            DeviceType::Tank => 8,
            DeviceType::Battery => 9,
            DeviceType::System => 10,
            DeviceType::Inclinometer => 13,
            DeviceType::Unknown(code) => code,
        }
    }
}

impl From<u8> for DeviceType {
    fn from(code: u8) -> Self {
        match code {
            0 => DeviceType::Null,
            1 => DeviceType::Voltmeter,
            2 => DeviceType::Amperemeter,
            3 => DeviceType::Thermometer,
            5 => DeviceType::Barometer,
            6 => DeviceType::Ohmmeter,
            7 => DeviceType::Time,
            8 => DeviceType::Tank,
            9 => DeviceType::Battery,
            10 => DeviceType::System,
            13 => DeviceType::Inclinometer,
            code => DeviceType::Unknown(code),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Unknown(code) => write!(f, "unknown device ({:#04x})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Known sensor types reported in a SENSOR_INFO descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorType {
    None,
    Voltage,
    Current,
    CoulombCounter,
    Temperature,
    Atmosphere,
    AtmosphereTrend,
    Resistance,
    Timestamp,
    StateOfCharge,
    RemainingTime,
    Angle,
    User,
    Unknown(u8),
}

impl SensorType {
    pub fn code(self) -> u8 {
        match self {
            SensorType::None => 0,
            SensorType::Voltage => 1,
            SensorType::Current => 2,
            SensorType::CoulombCounter => 3,
            SensorType::Temperature => 4,
            SensorType::Atmosphere => 5,
            SensorType::AtmosphereTrend => 6,
            SensorType::Resistance => 7,
            SensorType::Timestamp => 10,
            SensorType::StateOfCharge => 11,
            SensorType::RemainingTime => 13,
            SensorType::Angle => 16,
            SensorType::User => 22,
            SensorType::Unknown(code) => code,
        }
    }

    /// Projects a raw sensor state to physical units. `None` for sensor
    /// types without a unit mapping.
    ///
    /// The raw word stays available to the caller: for
    /// [`SensorType::StateOfCharge`] only the high half carries the
    /// charge (in 1/160 %); the low half is reserved and not
    /// interpreted here.
    pub fn physical(self, raw: Word) -> Option<Physical> {
        let (value, unit) = match self {
            SensorType::Voltage => (raw.as_i32() as f64 / 1000.0, "V"),
            SensorType::Current => (raw.as_i32() as f64 / 100.0, "A"),
            SensorType::CoulombCounter => (raw.as_i32() as f64 / 1000.0, "Ah"),
            SensorType::Temperature => (raw.as_i32() as f64 / 10.0, "°C"),
            SensorType::Atmosphere => (raw.as_i32() as f64 / 100.0, "mbar"),
            SensorType::AtmosphereTrend => (raw.as_i32() as f64 / 10.0, "mbar/h"),
            SensorType::Resistance => (raw.as_i32() as f64, "Ω"),
            SensorType::Timestamp => (raw.as_u32() as f64, "s"),
            SensorType::StateOfCharge => (raw.hi_i16() as f64 / 160.0, "%"),
            SensorType::RemainingTime => (raw.as_i32() as f64, "s"),
            SensorType::Angle => (raw.as_i32() as f64 / 10.0, "°"),
            SensorType::None | SensorType::User | SensorType::Unknown(_) => return None,
        };
        Some(Physical { value, unit })
    }
}

impl From<u8> for SensorType {
    fn from(code: u8) -> Self {
        match code {
            0 => SensorType::None,
            1 => SensorType::Voltage,
            2 => SensorType::Current,
            3 => SensorType::CoulombCounter,
            4 => SensorType::Temperature,
            5 => SensorType::Atmosphere,
            6 => SensorType::AtmosphereTrend,
            7 => SensorType::Resistance,
            10 => SensorType::Timestamp,
            11 => SensorType::StateOfCharge,
            13 => SensorType::RemainingTime,
            16 => SensorType::Angle,
            22 => SensorType::User,
            code => SensorType::Unknown(code),
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Unknown(code) => write!(f, "unknown sensor ({:#04x})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A sensor state scaled to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Physical {
    pub value: f64,
    pub unit: &'static str,
}

impl fmt::Display for Physical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Device serial and firmware version, from a SYSTEM_INFO response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemInfo {
    /// The device serial (also stamped on every broadcast frame).
    pub serial: u32,

    pub firmware_major: i16,
    pub firmware_minor: i16,

    /// Fields the projection did not consume.
    pub extra: Vec<Field>,
}

impl SystemInfo {
    pub fn from_message(message: &Message) -> Result<Self, ProjectionError> {
        expect_type(message, MessageType::SystemInfo, "SYSTEM_INFO")?;
        let serial = required_integer(message, 1, "SYSTEM_INFO")?.as_u32();
        let firmware = required_integer(message, 2, "SYSTEM_INFO")?;
        Ok(SystemInfo {
            serial,
            firmware_major: firmware.hi_i16(),
            firmware_minor: firmware.lo_i16(),
            extra: leftover(message, &[1, 2]),
        })
    }
}

/// Highest known device and sensor ids, from a DEVICE_SENSOR_COUNT
/// response. Enumeration walks ids `0..=last`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceSensorCount {
    pub last_device_id: i32,
    pub last_sensor_id: i32,

    /// Fields the projection did not consume.
    pub extra: Vec<Field>,
}

impl DeviceSensorCount {
    pub fn from_message(message: &Message) -> Result<Self, ProjectionError> {
        expect_type(message, MessageType::DeviceSensorCount, "DEVICE_SENSOR_COUNT")?;
        Ok(DeviceSensorCount {
            last_device_id: required_integer(message, 1, "DEVICE_SENSOR_COUNT")?.as_i32(),
            last_sensor_id: required_integer(message, 2, "DEVICE_SENSOR_COUNT")?.as_i32(),
            extra: leftover(message, &[1, 2]),
        })
    }
}

/// A per-device descriptor, from a DEVICE_INFO response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub device_id: i32,

    /// Unix timestamp of the device record's creation, when reported.
    pub created_ts: Option<u32>,

    pub device_type: Option<DeviceType>,

    /// The device's name or role, when reported as text. An
    /// integer-shaped field 3 stays raw in `extra`; its view depends on
    /// the device type and is left to the caller.
    pub name_or_role: Option<String>,

    /// Fields the projection did not consume.
    pub extra: Vec<Field>,
}

impl DeviceInfo {
    /// Field 1 appears up to twice: the first occurrence carries the
    /// creation timestamp, the second the device type. A single
    /// timestamped-integer occurrence carries both at once.
    pub fn from_message(message: &Message) -> Result<Self, ProjectionError> {
        expect_type(message, MessageType::DeviceInfo, "DEVICE_INFO")?;
        let device_id = required_integer(message, 0, "DEVICE_INFO")?.as_i32();

        let mut created_ts = None;
        let mut device_type = None;
        let mut name_or_role = None;
        let mut extra = Vec::new();
        let mut seen_id0 = false;
        let mut seen_id1 = 0u8;

        for field in &message.fields {
            match (field.id, &field.value) {
                (0, FieldValue::Integer(_)) if !seen_id0 => seen_id0 = true,
                (1, value) if seen_id1 == 0 => {
                    seen_id1 = 1;
                    match value {
                        FieldValue::TimestampedInteger { ts, value } => {
                            created_ts = Some(*ts);
                            device_type = Some(device_type_from_word(*value));
                        }
                        FieldValue::Integer(word) => created_ts = Some(word.as_u32()),
                        _ => extra.push(field.clone()),
                    }
                }
                (1, value) if seen_id1 == 1 => {
                    seen_id1 = 2;
                    match value.integer() {
                        Some(word) => device_type = Some(device_type_from_word(word)),
                        None => extra.push(field.clone()),
                    }
                }
                (3, FieldValue::TimestampedText { text, .. }) if name_or_role.is_none() => {
                    name_or_role = Some(text.clone());
                }
                _ => extra.push(field.clone()),
            }
        }

        Ok(DeviceInfo {
            device_id,
            created_ts,
            device_type,
            name_or_role,
            extra,
        })
    }
}

/// A per-sensor descriptor, from a SENSOR_INFO response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorInfo {
    pub sensor_id: i32,

    pub sensor_type: Option<SensorType>,

    /// The owning device, from the high half of field 2.
    pub device_id: Option<i32>,

    /// The sensor's index on its device, from the low half of field 2.
    pub device_sensor_id: Option<i32>,

    /// Fields the projection did not consume.
    pub extra: Vec<Field>,
}

impl SensorInfo {
    pub fn from_message(message: &Message) -> Result<Self, ProjectionError> {
        expect_type(message, MessageType::SensorInfo, "SENSOR_INFO")?;
        let sensor_id = required_integer(message, 0, "SENSOR_INFO")?.as_i32();
        let sensor_type = first_integer(message, 1).map(sensor_type_from_word);
        let owner = first_integer(message, 2);
        Ok(SensorInfo {
            sensor_id,
            sensor_type,
            device_id: owner.map(|word| word.hi_i16() as i32),
            device_sensor_id: owner.map(|word| word.lo_i16() as i32),
            extra: leftover(message, &[0, 1, 2]),
        })
    }
}

/// One sensor's raw state, from a SENSOR_STATE response. A single
/// response carries one field per sensor, the field id naming the
/// sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorState {
    pub sensor_id: i32,

    /// The raw 32 bits; pick the view via [`SensorType::physical`] or
    /// the [`Word`] accessors.
    pub state: Word,
}

impl SensorState {
    /// Projects every integer-shaped field of a SENSOR_STATE message,
    /// in wire order.
    pub fn from_message(message: &Message) -> Result<Vec<SensorState>, ProjectionError> {
        expect_type(message, MessageType::SensorState, "SENSOR_STATE")?;
        Ok(message
            .fields
            .iter()
            .filter_map(|field| {
                field.value.integer().map(|state| SensorState {
                    sensor_id: field.id as i32,
                    state,
                })
            })
            .collect())
    }

    /// This state in physical units, given the sensor's type.
    pub fn physical(&self, sensor_type: SensorType) -> Option<Physical> {
        sensor_type.physical(self.state)
    }
}

fn device_type_from_word(word: Word) -> DeviceType {
    match word.as_u32() {
        code if code <= u8::MAX as u32 => DeviceType::from(code as u8),
        _ => DeviceType::Unknown(u8::MAX),
    }
}

fn sensor_type_from_word(word: Word) -> SensorType {
    match word.as_u32() {
        code if code <= u8::MAX as u32 => SensorType::from(code as u8),
        _ => SensorType::Unknown(u8::MAX),
    }
}

fn expect_type(
    message: &Message,
    want: MessageType,
    projection: &'static str,
) -> Result<(), ProjectionError> {
    if message.message_type != want {
        return Err(ProjectionError::WrongType {
            projection,
            found: message.message_type,
        });
    }
    Ok(())
}

/// The first integer-shaped field with the given id, in wire order.
fn first_integer(message: &Message, id: u8) -> Option<Word> {
    message
        .fields
        .iter()
        .filter(|field| field.id == id)
        .find_map(|field| field.value.integer())
}

fn required_integer(
    message: &Message,
    id: u8,
    projection: &'static str,
) -> Result<Word, ProjectionError> {
    first_integer(message, id).ok_or(ProjectionError::MissingField { projection, id })
}

/// Clones every field whose id the projection did not consume.
fn leftover(message: &Message, used: &[u8]) -> Vec<Field> {
    message
        .fields
        .iter()
        .filter(|field| !used.contains(&field.id))
        .cloned()
        .collect()
}
