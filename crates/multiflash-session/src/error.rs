//! Session error types

use multiflash_core::{EepromError, SizeError};
use multiflash_probe::ProbeError;
use thiserror::Error;

use crate::events::{Outcome, Phase};
use crate::tool::ToolError;

/// Why a session stopped before completing
#[derive(Debug, Error)]
pub enum SessionError {
    /// An input file has the wrong format
    #[error("{0}")]
    Format(String),

    /// EEPROM image problem
    #[error("EEPROM image: {0}")]
    Eeprom(#[from] EepromError),

    /// Firmware failed size validation
    #[error(transparent)]
    Size(#[from] SizeError),

    /// The port or device is not usable
    #[error("{0}")]
    DeviceNotFound(String),

    /// Device probing failed
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// An external tool could not be run
    #[error("{step} failed: {source}")]
    ToolExecution {
        /// Step that ran the tool
        step: Phase,
        /// Why it could not run
        source: ToolError,
    },

    /// An external tool exited with a non-zero status
    #[error("{step} failed: tool exited with status {code}")]
    ToolExit {
        /// Step that ran the tool
        step: Phase,
        /// Exit status
        code: i32,
    },

    /// A device wait expired
    #[error("{0}")]
    Timeout(String),

    /// The operator cancelled
    #[error("{0}")]
    Cancelled(String),

    /// The firmware or operation does not fit the module or transport
    #[error("{0}")]
    Incompatible(String),

    /// Local file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Terminal outcome this error leads to
    pub fn outcome(&self) -> Outcome {
        let reason = self.to_string();
        match self {
            Self::Cancelled(_) | Self::Timeout(_) | Self::Size(SizeError::Declined) => {
                Outcome::Cancelled(reason)
            }
            _ => Outcome::Failed(reason),
        }
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        let err = SessionError::ToolExit {
            step: Phase::Erase,
            code: 1,
        };
        assert_eq!(
            err.outcome(),
            Outcome::Failed("erase failed: tool exited with status 1".to_string())
        );

        let err = SessionError::Timeout("DFU device was not unplugged in time".to_string());
        assert!(matches!(err.outcome(), Outcome::Cancelled(_)));

        let err = SessionError::Size(SizeError::Declined);
        assert!(matches!(err.outcome(), Outcome::Cancelled(_)));

        let err = SessionError::Size(SizeError::TooLarge { size: 2, max: 1 });
        assert!(matches!(err.outcome(), Outcome::Failed(_)));
    }
}
