//! Serial port checks and listing

use std::time::Duration;

use serialport::{SerialPortType, UsbPortInfo};

use crate::error::{ProbeError, Result};

/// Checks that a serial port endpoint is usable before a session starts
pub trait PortCheck: Send {
    /// Open and close the port, failing if it cannot be opened
    fn check(&self, port: &str, baud: u32) -> Result<()>;
}

/// Port check that really opens the port
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortCheck;

impl PortCheck for SerialPortCheck {
    fn check(&self, port: &str, baud: u32) -> Result<()> {
        let handle = serialport::new(port, baud)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| ProbeError::PortUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        drop(handle);

        log::debug!("Serial port {} opened and closed", port);
        Ok(())
    }
}

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// System name of the port
    pub name: String,
    /// Human-readable description, if known
    pub description: Option<String>,
}

fn describe_usb(info: &UsbPortInfo) -> String {
    let mut description = format!("USB {:04X}:{:04X}", info.vid, info.pid);
    if let Some(product) = &info.product {
        description.push(' ');
        description.push_str(product);
    }
    description
}

/// List the serial ports present on the system
pub fn list_ports() -> Result<Vec<PortEntry>> {
    let ports = serialport::available_ports()?
        .into_iter()
        .map(|p| PortEntry {
            description: match &p.port_type {
                SerialPortType::UsbPort(info) => Some(describe_usb(info)),
                SerialPortType::BluetoothPort => Some("Bluetooth".to_string()),
                SerialPortType::PciPort | SerialPortType::Unknown => None,
            },
            name: p.port_name,
        })
        .collect();

    Ok(ports)
}
