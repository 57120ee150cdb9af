//! Serial port handling
//!
//! Opens and lists the RS-232 ports an inverter may be attached to.

use serialport::{DataBits, FlowControl, Parity, SerialPortInfo, SerialPortType, StopBits};
use std::time::Duration;

use super::{ProtocolError, SerialTransport, DEFAULT_TIMEOUT_MS};

/// A port the inverter could be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path or name, e.g. `/dev/ttyUSB0` or `COM3`
    pub name: String,
    /// USB-to-serial adapter details, when the port is one
    pub usb: Option<UsbAdapter>,
}

/// Identity of a USB-to-serial adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbAdapter {
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
    /// Product string, if the adapter reports one
    pub product: Option<String>,
}

impl PortInfo {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usb: None,
        }
    }

    /// Whether the port is a USB adapter
    pub fn is_usb(&self) -> bool {
        self.usb.is_some()
    }

    /// Adapter product string, if the port is a USB adapter that reports one
    pub fn product(&self) -> Option<&str> {
        self.usb.as_ref().and_then(|usb| usb.product.as_deref())
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let usb = match info.port_type {
            SerialPortType::UsbPort(port) => Some(UsbAdapter {
                vid: port.vid,
                pid: port.pid,
                product: port.product,
            }),
            _ => None,
        };
        Self {
            name: info.port_name,
            usb,
        }
    }
}

/// Ordering rank: USB adapters, then CDC-ACM devices, then on-board UARTs,
/// then the rest. Device numbers compare numerically.
fn port_rank(name: &str) -> (u8, u32, &str) {
    let device = name.rsplit('/').next().unwrap_or(name);
    [(0, "ttyUSB"), (1, "ttyACM"), (2, "ttyS")]
        .into_iter()
        .find_map(|(rank, prefix)| {
            device
                .strip_prefix(prefix)
                .map(|n| (rank, n.parse().unwrap_or(u32::MAX), device))
        })
        .unwrap_or((3, 0, device))
}

fn sort_ports(ports: &mut Vec<PortInfo>) {
    ports.sort_by(|a, b| port_rank(&a.name).cmp(&port_rank(&b.name)));
    ports.dedup_by(|a, b| a.name == b.name);
}

/// Adapters present in /dev that enumeration did not report
#[cfg(target_os = "linux")]
fn dev_adapters() -> Vec<PortInfo> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyUSB") || name.starts_with("ttyACM"))
        .map(|name| PortInfo::named(format!("/dev/{name}")))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn dev_adapters() -> Vec<PortInfo> {
    Vec::new()
}

/// Available serial ports, USB adapters first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    // Enumerated entries come first so they win the dedup
    ports.extend(dev_adapters());
    sort_ports(&mut ports);
    ports
}

/// Open a serial port configured 8-N-1 without flow control
pub fn open_port(name: &str, baud_rate: u32) -> Result<SerialTransport, ProtocolError> {
    serialport::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
        .open()
        .map(SerialTransport::new)
        .map_err(|e| ProtocolError::PortOpen {
            port: name.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_adapters_sort_first() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyS0",
            "/dev/rfcomm0",
            "/dev/ttyUSB11",
            "/dev/ttyACM1",
            "/dev/ttyUSB2",
            "/dev/ttyS4",
        ]
        .into_iter()
        .map(PortInfo::named)
        .collect();

        sort_ports(&mut ports);

        let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/dev/ttyUSB2",
                "/dev/ttyUSB11",
                "/dev/ttyACM1",
                "/dev/ttyS0",
                "/dev/ttyS4",
                "/dev/rfcomm0",
            ]
        );
    }

    #[test]
    fn test_duplicate_keeps_enumerated_entry() {
        let mut ports = vec![
            PortInfo {
                name: "/dev/ttyUSB0".to_string(),
                usb: Some(UsbAdapter {
                    vid: 0x0403,
                    pid: 0x6001,
                    product: Some("FT232R USB UART".to_string()),
                }),
            },
            PortInfo::named("/dev/ttyUSB0"),
        ];

        sort_ports(&mut ports);

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].product(), Some("FT232R USB UART"));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let err = open_port("/dev/nt5000-does-not-exist", 9600).err().unwrap();
        assert!(matches!(err, ProtocolError::PortOpen { .. }));
    }
}
