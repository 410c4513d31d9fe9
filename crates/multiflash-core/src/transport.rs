//! Physical transports a module can be flashed through

use core::fmt;
use core::str::FromStr;

/// The three ways a MULTI-Module can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// STM32 USB port running the Maple DFU bootloader
    NativeUsb,
    /// STM32 system bootloader over a USB-to-serial adapter
    Serial,
    /// USBasp in-system programmer for Atmega328p modules
    Isp,
}

impl Transport {
    /// Whether a bootloader image can be written through this transport
    pub fn can_write_bootloader(&self) -> bool {
        matches!(self, Self::Serial | Self::Isp)
    }

    /// Short lowercase name as accepted on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::NativeUsb => "usb",
            Self::Serial => "serial",
            Self::Isp => "isp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeUsb => write!(f, "native USB"),
            Self::Serial => write!(f, "serial"),
            Self::Isp => write!(f, "USBasp"),
        }
    }
}

impl FromStr for Transport {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usb" | "native" | "native-usb" | "dfu" => Ok(Self::NativeUsb),
            "serial" | "uart" => Ok(Self::Serial),
            "isp" | "usbasp" => Ok(Self::Isp),
            _ => Err("unknown transport (expected usb, serial or isp)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("DFU".parse::<Transport>(), Ok(Transport::NativeUsb));
        assert_eq!("uart".parse::<Transport>(), Ok(Transport::Serial));
        assert_eq!("usbasp".parse::<Transport>(), Ok(Transport::Isp));
        assert!("jtag".parse::<Transport>().is_err());
    }

    #[test]
    fn test_bootloader_support() {
        assert!(!Transport::NativeUsb.can_write_bootloader());
        assert!(Transport::Serial.can_write_bootloader());
        assert!(Transport::Isp.can_write_bootloader());
    }
}
