//! Error types for device probing

use thiserror::Error;

/// Probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The host USB device list could not be read
    #[error("USB enumeration failed: {0}")]
    Enumeration(String),

    /// A serial port could not be opened
    #[error("could not open port {port}: {reason}")]
    PortUnavailable {
        /// Port name as given
        port: String,
        /// Driver error text
        reason: String,
    },

    /// Serial port listing failed
    #[error("could not list serial ports: {0}")]
    PortList(#[from] serialport::Error),

    /// A `VID:PID` string could not be parsed
    #[error("invalid USB ID '{0}' (expected VID:PID in hex)")]
    InvalidUsbId(String),
}

/// Result type for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;
