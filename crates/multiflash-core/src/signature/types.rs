//! Firmware signature types

use alloc::string::String;
use core::fmt;

/// Microcontroller family a firmware image was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    /// Atmega328p
    Avr,
    /// STM32F103
    Stm32,
    /// OrangeRX (ATxmega32D4)
    OrangeRx,
    /// Signature named a module type we do not know
    Unknown,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Avr => "AVR",
            Self::Stm32 => "STM32",
            Self::OrangeRx => "OrangeRX",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Telemetry dialect the firmware was compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryType {
    /// OpenTX / EdgeTX telemetry
    OpenTx,
    /// erskyTx telemetry
    ErskyTx,
    /// Not specified at build time
    Undefined,
}

impl fmt::Display for TelemetryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OpenTx => "OpenTX",
            Self::ErskyTx => "erskyTx",
            Self::Undefined => "Undefined",
        };
        f.write_str(s)
    }
}

/// The 24 orderings of the four primary stick channels
///
/// Indexed by the 5-bit channel order field of a packed-hex signature.
pub const CHANNEL_ORDERS: [&str; 24] = [
    "AETR", "AERT", "ARET", "ARTE", "ATRE", "ATER", //
    "EATR", "EART", "ERAT", "ERTA", "ETRA", "ETAR", //
    "TEAR", "TERA", "TREA", "TRAE", "TARE", "TAER", //
    "RETA", "REAT", "RAET", "RATE", "RTAE", "RTEA",
];

/// Channel order recorded in a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    /// One of [`CHANNEL_ORDERS`]
    Known(&'static str),
    /// Legacy signatures predate the field
    Unknown,
    /// Packed field held an index past the end of the table
    Invalid(u8),
}

impl ChannelOrder {
    /// Look up a packed channel order index
    pub fn from_index(index: u8) -> Self {
        match CHANNEL_ORDERS.get(index as usize) {
            Some(order) => Self::Known(order),
            None => Self::Invalid(index),
        }
    }

    /// Text form; empty for an invalid index
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Known(order) => order,
            Self::Unknown => "Unknown",
            Self::Invalid(_) => "",
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which wire encoding a signature used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFormat {
    /// `multi-<type>-<flags>-<version>`
    V1,
    /// `multi-x<hex flags>-<version>`
    V2,
}

/// Compile-time configuration decoded from a firmware image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSignature {
    /// Encoding the signature was found in
    pub format: SignatureFormat,
    /// Target microcontroller
    pub module_type: ModuleType,
    /// Stick channel order
    pub channel_order: ChannelOrder,
    /// Built to run behind a bootloader
    pub bootloader_support: bool,
    /// Built with CHECK_FOR_BOOTLOADER
    pub check_for_bootloader: bool,
    /// Telemetry dialect
    pub telemetry_type: TelemetryType,
    /// Built with INVERT_TELEMETRY
    pub invert_telemetry: bool,
    /// Built with DEBUG_SERIAL
    pub debug_serial: bool,
    /// Dotted four-part version
    pub version: String,
    /// The 24-character signature text as found in the image
    pub raw: String,
}
