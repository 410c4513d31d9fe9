//! USB identities of the devices a module shows up as

use std::fmt;
use std::str::FromStr;

use multiflash_core::Transport;

use crate::error::ProbeError;

/// A USB vendor/product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
}

impl UsbId {
    /// Create a new ID pair
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Whether a device with these IDs is this identity
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

impl FromStr for UsbId {
    type Err = ProbeError;

    /// Parse `VID:PID`, both hex, with or without `0x`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProbeError::InvalidUsbId(s.to_string());

        let (vid, pid) = s.trim().split_once(':').ok_or_else(invalid)?;
        let parse = |part: &str| {
            let part = part.trim();
            let part = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);
            u16::from_str_radix(part, 16).map_err(|_| invalid())
        };

        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Maple DFU bootloader
pub const DEFAULT_BOOTLOADER_ID: UsbId = UsbId::new(0x1EAF, 0x0003);

/// MULTI firmware's own USB serial interface
pub const DEFAULT_APPLICATION_ID: UsbId = UsbId::new(0x1EAF, 0x0004);

/// USBasp programmer
pub const DEFAULT_ISP_ID: UsbId = UsbId::new(0x16C0, 0x05DC);

/// The three USB identities a probe looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIds {
    /// Module in DFU bootloader mode
    pub bootloader: UsbId,
    /// Module running firmware with USB serial
    pub application: UsbId,
    /// ISP programmer
    pub isp: UsbId,
}

impl Default for DeviceIds {
    fn default() -> Self {
        Self {
            bootloader: DEFAULT_BOOTLOADER_ID,
            application: DEFAULT_APPLICATION_ID,
            isp: DEFAULT_ISP_ID,
        }
    }
}

impl DeviceIds {
    /// Classify a device by its IDs
    pub fn classify(&self, vendor_id: u16, product_id: u16) -> Option<DeviceClass> {
        if self.bootloader.matches(vendor_id, product_id) {
            Some(DeviceClass::NativeBootloader)
        } else if self.application.matches(vendor_id, product_id) {
            Some(DeviceClass::NativeApplication)
        } else if self.isp.matches(vendor_id, product_id) {
            Some(DeviceClass::IspProgrammer)
        } else {
            None
        }
    }

    /// The IDs belonging to a class
    pub fn id_of(&self, class: DeviceClass) -> UsbId {
        match class {
            DeviceClass::NativeBootloader => self.bootloader,
            DeviceClass::NativeApplication => self.application,
            DeviceClass::IspProgrammer => self.isp,
        }
    }
}

/// What a matching USB device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Module in DFU bootloader mode
    NativeBootloader,
    /// Module running its firmware
    NativeApplication,
    /// USBasp programmer
    IspProgrammer,
}

impl DeviceClass {
    /// The device a transport talks to, if it is a USB device at all
    pub fn for_transport(transport: Transport) -> Option<Self> {
        match transport {
            Transport::NativeUsb => Some(Self::NativeBootloader),
            Transport::Isp => Some(Self::IspProgrammer),
            Transport::Serial => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeBootloader => write!(f, "MULTI-Module (DFU mode)"),
            Self::NativeApplication => write!(f, "MULTI-Module (USB serial)"),
            Self::IspProgrammer => write!(f, "USBasp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usb_id() {
        assert_eq!("1eaf:0003".parse::<UsbId>().unwrap(), DEFAULT_BOOTLOADER_ID);
        assert_eq!("0x16C0:0x05DC".parse::<UsbId>().unwrap(), DEFAULT_ISP_ID);
        assert!("1eaf".parse::<UsbId>().is_err());
        assert!("1eaf:zzzz".parse::<UsbId>().is_err());
        assert_eq!(DEFAULT_APPLICATION_ID.to_string(), "1EAF:0004");
    }

    #[test]
    fn test_classify() {
        let ids = DeviceIds::default();
        assert_eq!(
            ids.classify(0x1EAF, 0x0003),
            Some(DeviceClass::NativeBootloader)
        );
        assert_eq!(
            ids.classify(0x1EAF, 0x0004),
            Some(DeviceClass::NativeApplication)
        );
        assert_eq!(
            ids.classify(0x16C0, 0x05DC),
            Some(DeviceClass::IspProgrammer)
        );
        assert_eq!(ids.classify(0x1EAF, 0x0005), None);
    }
}
