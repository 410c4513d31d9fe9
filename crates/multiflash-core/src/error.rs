//! Error types for multiflash-core
//!
//! Callers downgrade format errors (signature, EEPROM) to conservative
//! defaults. Size errors abort an operation before any device I/O.

use alloc::string::String;

#[cfg(feature = "std")]
use thiserror::Error;

/// Reasons a firmware signature could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum SignatureError {
    /// The `multi-` marker was found but fewer than 24 bytes follow it
    #[cfg_attr(feature = "std", error("signature truncated at offset {offset}"))]
    Truncated {
        /// Offset of the marker in the image
        offset: usize,
    },

    /// The signature window matched neither known grammar
    #[cfg_attr(feature = "std", error("signature does not match a known format: {0}"))]
    UnknownFormat(String),

    /// A numeric field of a packed-hex signature could not be converted
    #[cfg_attr(feature = "std", error("signature unparsable: {0}"))]
    Unparsable(String),
}

/// Emulated EEPROM errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum EepromError {
    /// Neither page status combination is valid/erased
    #[cfg_attr(feature = "std", error("no valid EEPROM page found"))]
    NoValidPage,

    /// The data is not the size the EEPROM layout requires
    #[cfg_attr(
        feature = "std",
        error("EEPROM data is {actual} bytes, expected {expected}")
    )]
    WrongSize {
        /// Required length in bytes
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Backup file is too small to contain an EEPROM block
    #[cfg_attr(feature = "std", error("backup too small to contain EEPROM data"))]
    BackupTooSmall,

    /// Every record slot is in use, even after a page transfer
    #[cfg_attr(feature = "std", error("EEPROM is full"))]
    Full,

    /// Virtual address is reserved or out of range
    #[cfg_attr(feature = "std", error("invalid EEPROM address 0x{0:04X}"))]
    InvalidAddress(u16),
}

/// Firmware size validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum SizeError {
    /// Image exceeds the computed ceiling for this configuration
    #[cfg_attr(
        feature = "std",
        error("firmware is {size} bytes, maximum for this module is {max} bytes")
    )]
    TooLarge {
        /// Size of the image in bytes
        size: u64,
        /// Computed maximum in bytes
        max: u64,
    },

    /// Operator declined to flash an image whose size cannot be verified
    #[cfg_attr(feature = "std", error("flashing an unverified firmware image was declined"))]
    Declined,

    /// The confirmation collaborator failed to produce an answer
    #[cfg_attr(feature = "std", error("could not obtain confirmation: {0}"))]
    ConfirmationFailed(String),
}

/// Result type alias for EEPROM operations
pub type Result<T> = core::result::Result<T, EepromError>;
