use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use simarine::{Inventory, Session, SessionConfig, TCP_PORT, UDP_PORT};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Discovers a Simarine Pico on the local network, enumerates its devices and sensors, and optionally watches live sensor states."
)]
struct Opt {
    /// Skip UDP discovery and connect to this host directly.
    #[structopt(long)]
    host: Option<IpAddr>,

    /// Give up on discovery after this many seconds.
    #[structopt(long, name = "seconds")]
    timeout: Option<u64>,

    #[structopt(long, default_value = "5001")]
    tcp_port: u16,

    #[structopt(long, default_value = "43210")]
    udp_port: u16,

    /// Keep polling sensor states after enumerating.
    #[structopt(long)]
    watch: bool,

    /// Log verbosity; repeat for more.
    #[structopt(short, parse(from_occurrences))]
    verbose: usize,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    stderrlog::new()
        .verbosity(opt.verbose)
        .init()
        .context("failed to initialize logging")?;

    let config = SessionConfig {
        tcp_port: opt.tcp_port,
        udp_port: opt.udp_port,
        discovery_timeout: opt.timeout.map(Duration::from_secs),
        ..SessionConfig::default()
    };
    if (opt.tcp_port, opt.udp_port) != (TCP_PORT, UDP_PORT) {
        eprintln!(
            "using non-default ports tcp={} udp={}",
            opt.tcp_port, opt.udp_port
        );
    }

    let mut session = match opt.host {
        Some(host) => Session::connect(host, &config)
            .with_context(|| format!("failed to connect to {}", host))?,
        None => Session::open(&config).context("discovery failed")?,
    };

    let inventory = session.enumerate().context("enumeration failed")?;
    print_inventory(&inventory);

    if opt.watch {
        loop {
            for state in session.sensor_states().context("state poll failed")? {
                let sensor = inventory
                    .sensors
                    .iter()
                    .find(|sensor| sensor.sensor_id == state.sensor_id);
                match sensor.and_then(|s| s.sensor_type).and_then(|t| state.physical(t)) {
                    Some(physical) => println!("sensor {}: {}", state.sensor_id, physical),
                    None => println!(
                        "sensor {}: raw {:#010x}",
                        state.sensor_id,
                        state.state.as_u32()
                    ),
                }
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    Ok(())
}

fn print_inventory(inventory: &Inventory) {
    println!(
        "device {:08X}, firmware {}.{}",
        inventory.system.serial,
        inventory.system.firmware_major,
        inventory.system.firmware_minor
    );
    for device in &inventory.devices {
        println!(
            "  device {}: {} {}",
            device.device_id,
            device
                .device_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_owned()),
            device.name_or_role.as_deref().unwrap_or("(unnamed)")
        );
    }
    for sensor in &inventory.sensors {
        println!(
            "  sensor {}: {} on device {}",
            sensor.sensor_id,
            sensor
                .sensor_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_owned()),
            sensor
                .device_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_owned())
        );
    }
}
