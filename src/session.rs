//! Discovery and the TCP query session.
//!
//! The device announces itself by broadcasting state frames on UDP;
//! discovery is nothing more than catching one and remembering who sent
//! it. The session then runs the control conversation over TCP:
//! System Info → Device/Sensor Count → per-device Device Info →
//! per-sensor Sensor Info → Sensor State updates.
//!
//! This is the only place UDP and TCP meet; the codec below it is
//! transport-agnostic.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::info;

use crate::device::{DeviceInfo, DeviceSensorCount, SensorInfo, SensorState, SystemInfo};
use crate::error::ClientError;
use crate::message::{Message, MessageType};
use crate::transport::{is_timeout, Broadcasts, TcpChannel, TCP_PORT, UDP_PORT};

/// Ports and deadlines for discovery and the TCP session. Defaults
/// match the device; everything is caller-overridable.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tcp_port: u16,
    pub udp_port: u16,

    /// Deadline for the first well-formed broadcast; `None` waits
    /// forever.
    pub discovery_timeout: Option<Duration>,

    /// Deadline on TCP reads; `None` blocks.
    pub read_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            tcp_port: TCP_PORT,
            udp_port: UDP_PORT,
            discovery_timeout: None,
            read_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Waits for the first well-formed broadcast and returns its sender
/// address. The UDP socket is released before this returns.
pub fn discover(config: &SessionConfig) -> Result<SocketAddr, ClientError> {
    let listener = Broadcasts::bind(config.udp_port)?;
    listener.set_read_timeout(config.discovery_timeout)?;
    info!("listening for broadcasts on udp port {}", config.udp_port);
    match listener.recv() {
        Ok((sender, message)) => {
            info!(
                "discovered device {:08X} at {}",
                message.serial,
                sender.ip()
            );
            Ok(sender)
        }
        Err(ClientError::Io(ref e)) if is_timeout(e) => Err(ClientError::DiscoveryTimeout),
        Err(e) => Err(e),
    }
}

/// Everything the enumeration sequence learns about a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Inventory {
    pub system: SystemInfo,
    pub counts: DeviceSensorCount,
    pub devices: Vec<DeviceInfo>,
    pub sensors: Vec<SensorInfo>,
}

/// A scoped TCP query session.
///
/// The session owns its socket; dropping the session (normally, early,
/// or during unwinding) closes it. One request is in flight at a time.
#[derive(Debug)]
pub struct Session {
    channel: TcpChannel,
}

impl Session {
    /// Discovers the device over UDP, then connects to it.
    pub fn open(config: &SessionConfig) -> Result<Self, ClientError> {
        let broadcast = discover(config)?;
        Self::connect(broadcast.ip(), config)
    }

    /// Connects to a known host, skipping discovery.
    pub fn connect(host: IpAddr, config: &SessionConfig) -> Result<Self, ClientError> {
        let channel = TcpChannel::connect((host, config.tcp_port))?;
        channel.set_read_timeout(config.read_timeout)?;
        info!("connected to {}:{}", host, config.tcp_port);
        Ok(Session { channel })
    }

    pub fn system_info(&mut self) -> Result<SystemInfo, ClientError> {
        let response = self.channel.request(
            &Message::request(MessageType::SystemInfo),
            Some(MessageType::SystemInfo),
        )?;
        Ok(SystemInfo::from_message(&response)?)
    }

    pub fn device_sensor_count(&mut self) -> Result<DeviceSensorCount, ClientError> {
        let response = self.channel.request(
            &Message::request(MessageType::DeviceSensorCount),
            Some(MessageType::DeviceSensorCount),
        )?;
        Ok(DeviceSensorCount::from_message(&response)?)
    }

    pub fn device_info(&mut self, device_id: i32) -> Result<DeviceInfo, ClientError> {
        let request = Message::device_info_request(device_id);
        let response = self
            .channel
            .request(&request, Some(MessageType::DeviceInfo))?;
        Ok(DeviceInfo::from_message(&response)?)
    }

    pub fn sensor_info(&mut self, sensor_id: i32) -> Result<SensorInfo, ClientError> {
        let request = Message::sensor_info_request(sensor_id);
        let response = self
            .channel
            .request(&request, Some(MessageType::SensorInfo))?;
        Ok(SensorInfo::from_message(&response)?)
    }

    /// One round of state updates for every sensor the device reports.
    pub fn sensor_states(&mut self) -> Result<Vec<SensorState>, ClientError> {
        let response = self.channel.request(
            &Message::request(MessageType::SensorState),
            Some(MessageType::SensorState),
        )?;
        Ok(SensorState::from_message(&response)?)
    }

    /// Runs the full enumeration sequence.
    pub fn enumerate(&mut self) -> Result<Inventory, ClientError> {
        let system = self.system_info()?;
        info!(
            "device {:08X}, firmware {}.{}",
            system.serial, system.firmware_major, system.firmware_minor
        );
        let counts = self.device_sensor_count()?;

        let mut devices = Vec::new();
        for device_id in 0..=counts.last_device_id {
            devices.push(self.device_info(device_id)?);
        }
        let mut sensors = Vec::new();
        for sensor_id in 0..=counts.last_sensor_id {
            sensors.push(self.sensor_info(sensor_id)?);
        }
        info!("enumerated {} devices, {} sensors", devices.len(), sensors.len());

        Ok(Inventory {
            system,
            counts,
            devices,
            sensors,
        })
    }
}
