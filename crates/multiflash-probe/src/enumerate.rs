//! Host USB device enumeration

use nusb::MaybeFuture;

use crate::error::{ProbeError, Result};

/// One attached USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceEntry {
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
    /// Platform bus identifier
    pub bus: String,
    /// Device address on the bus
    pub address: u8,
}

/// Source of the attached-device list
pub trait UsbEnumerator: Send {
    /// List every attached USB device, in host enumeration order
    fn devices(&self) -> Result<Vec<UsbDeviceEntry>>;
}

impl<E: UsbEnumerator + ?Sized> UsbEnumerator for Box<E> {
    fn devices(&self) -> Result<Vec<UsbDeviceEntry>> {
        (**self).devices()
    }
}

/// Enumerator backed by the host USB stack
#[derive(Debug, Clone, Copy, Default)]
pub struct NusbEnumerator;

impl UsbEnumerator for NusbEnumerator {
    fn devices(&self) -> Result<Vec<UsbDeviceEntry>> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| ProbeError::Enumeration(e.to_string()))?
            .map(|d| UsbDeviceEntry {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                bus: d.bus_id().to_string(),
                address: d.device_address(),
            })
            .collect();

        Ok(devices)
    }
}
