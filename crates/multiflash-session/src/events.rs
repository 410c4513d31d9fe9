//! Messages between a running session and its UI

use std::fmt;
use std::time::Duration;

use multiflash_probe::DeviceClass;

/// Where a session is in its workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not started
    Idle,
    /// Checking the port opens or the device is attached
    PortOrDeviceCheck,
    /// Asking the module to reboot into DFU mode
    ModeSwitch,
    /// Waiting for the operator to unplug and replug the module
    Recovery,
    /// Checking the STM32 really has 128 KiB of flash
    FlashSizeCheck,
    /// Erasing flash
    Erase,
    /// Writing the bootloader image
    WriteBootloader,
    /// Writing the firmware image
    WriteFirmware,
    /// Writing the AVR EEPROM
    WriteEeprom,
    /// Reading flash to a file
    Read,
    /// Replacing the DFU bootloader through the bootreloader
    UpgradeBootloader,
    /// Handing the port back to a serial monitor
    VerifyOrReconnect,
    /// Terminal: success
    Succeeded,
    /// Terminal: failure
    Failed,
    /// Terminal: cancelled
    Cancelled,
}

impl Phase {
    /// Whether this phase ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::PortOrDeviceCheck => "port check",
            Self::ModeSwitch => "switch to DFU mode",
            Self::Recovery => "DFU recovery",
            Self::FlashSizeCheck => "flash size check",
            Self::Erase => "erase",
            Self::WriteBootloader => "write bootloader",
            Self::WriteFirmware => "write firmware",
            Self::WriteEeprom => "write EEPROM",
            Self::Read => "read",
            Self::UpgradeBootloader => "bootloader upgrade",
            Self::VerifyOrReconnect => "reconnect",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed
    Succeeded,
    /// A step failed; the reason names it
    Failed(String),
    /// The operator cancelled or a recovery wait expired
    Cancelled(String),
}

impl Outcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed(_) => 1,
            Self::Cancelled(_) => 2,
        }
    }

    /// Whether the operation completed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::Cancelled(reason) => write!(f, "cancelled: {}", reason),
        }
    }
}

/// Emitted by a session while it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Operator-facing log line
    Log(String),
    /// External tool output or command line
    Verbose(String),
    /// Entered a new phase
    Phase(Phase),
    /// Started numbered step `step` of `total`
    Progress {
        /// 1-based step number
        step: usize,
        /// Number of steps planned
        total: usize,
        /// What the step does
        label: String,
    },
    /// A yes/no question; answer with [`Control::Confirm`]
    Prompt(String),
    /// Waiting for a device to appear or disappear
    AwaitDevice {
        /// Device being waited for
        kind: DeviceClass,
        /// `true` to wait for it to appear
        present: bool,
        /// Budget of this wait
        timeout: Duration,
    },
    /// One second of recovery elapsed
    RecoveryTick {
        /// Whole seconds since recovery started
        elapsed: u64,
        /// Recovery budget in seconds
        total: u64,
    },
    /// A live serial monitor must release the port
    SuspendMonitor {
        /// Port the monitor holds
        port: String,
    },
    /// A live serial monitor may reconnect
    ResumeMonitor {
        /// Port to reconnect to
        port: String,
        /// Wait this long first
        delay: Duration,
    },
    /// The session ended; always the last event
    Terminal(Outcome),
}

/// Sent to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Stop at the next poll or step boundary
    Cancel,
    /// Answer to the pending [`SessionEvent::Prompt`]
    Confirm(bool),
}
