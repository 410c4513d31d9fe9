//! multiflash-probe - Finding MULTI-Modules and programmers
//!
//! A module can appear on the host in three forms: as a Maple DFU
//! bootloader, as its running firmware's USB serial interface, or behind a
//! USBasp programmer. This crate classifies attached USB devices into those
//! forms, polls for them to appear or disappear, and checks that a serial
//! port can be opened.
//!
//! USB enumeration and port checks sit behind the [`UsbEnumerator`] and
//! [`PortCheck`] traits so callers can substitute their own.

pub mod enumerate;
pub mod error;
pub mod ids;
pub mod port;
pub mod probe;

pub use enumerate::{NusbEnumerator, UsbDeviceEntry, UsbEnumerator};
pub use error::{ProbeError, Result};
pub use ids::{DeviceClass, DeviceIds, UsbId};
pub use port::{list_ports, PortCheck, PortEntry, SerialPortCheck};
pub use probe::{DetectedDevice, DeviceProbe, DeviceState, WaitResult};
