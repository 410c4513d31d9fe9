//! Flashing configuration
//!
//! Settings can be loaded from a TOML file; every field is optional:
//!
//! ```toml
//! serial_baud = 115200
//! bootloader = "sticky-dfu"
//! disable_flash_verification = false
//! tools_dir = "tools"
//! bootloaders_dir = "bootloaders"
//! recovery_timeout_ms = 30000
//!
//! [device_ids]
//! bootloader = "1EAF:0003"
//! application = { vendor_id = 0x1EAF, product_id = 0x0004 }
//! isp = { vendor_id = "0x16C0", product_id = "0x05DC" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use multiflash_probe::{DeviceIds, UsbId};
use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("could not read {}: {source}", path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid configuration TOML
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which STM32 bootloader image is written over serial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StmBootloader {
    /// Stays in DFU mode until flashed, preferred for USB-capable radios
    #[default]
    StickyDfu,
    /// Original Maple bootloader, drops to firmware after a timeout
    Legacy,
}

impl StmBootloader {
    /// File name of the image under the bootloaders directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::StickyDfu => "StmMulti4in1_StickyDfu.bin",
            Self::Legacy => "StmMulti4in1_Legacy.bin",
        }
    }
}

/// Everything a [`FlashSession`](crate::FlashSession) needs to know besides
/// the operation itself
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashConfig {
    /// Baud rate for the STM32 serial bootloader
    pub serial_baud: u32,
    /// Bootloader image written over serial
    pub bootloader: StmBootloader,
    /// Skip the 128 KiB flash check before serial writes
    pub disable_flash_verification: bool,
    /// Directory holding the external tools and erase images
    pub tools_dir: PathBuf,
    /// Directory holding bootloader images
    pub bootloaders_dir: PathBuf,
    /// USB identities to look for
    #[serde(deserialize_with = "deserialize_device_ids")]
    pub device_ids: DeviceIds,
    /// How long to wait for DFU mode after a reset request
    pub mode_switch_timeout_ms: u64,
    /// Total budget of the unplug/replug recovery
    pub recovery_timeout_ms: u64,
    /// Interval between USB presence polls
    pub poll_interval_ms: u64,
    /// Delay before a live serial monitor reconnects
    pub monitor_reconnect_delay_ms: u64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            serial_baud: 115_200,
            bootloader: StmBootloader::default(),
            disable_flash_verification: false,
            tools_dir: PathBuf::from("tools"),
            bootloaders_dir: PathBuf::from("bootloaders"),
            device_ids: DeviceIds::default(),
            mode_switch_timeout_ms: 2_000,
            recovery_timeout_ms: 30_000,
            poll_interval_ms: 50,
            monitor_reconnect_delay_ms: 1_000,
        }
    }
}

impl FlashConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Mode switch wait budget
    pub fn mode_switch_timeout(&self) -> Duration {
        Duration::from_millis(self.mode_switch_timeout_ms)
    }

    /// Recovery wait budget
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// USB presence poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Serial monitor reconnect delay
    pub fn monitor_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.monitor_reconnect_delay_ms)
    }

    /// Path of the selected STM32 bootloader image
    pub fn stm_bootloader_path(&self) -> PathBuf {
        self.bootloaders_dir.join(self.bootloader.file_name())
    }
}

/// Device ID table as written in TOML
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlDeviceIds {
    bootloader: Option<TomlUsbId>,
    application: Option<TomlUsbId>,
    isp: Option<TomlUsbId>,
}

/// A USB ID, either `"VID:PID"` or a table of two numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlUsbId {
    Str(String),
    Pair {
        vendor_id: HexOrInt,
        product_id: HexOrInt,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u16),
    Str(String),
}

impl HexOrInt {
    fn value(&self) -> Result<u16, String> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Str(s) => parse_number(s),
        }
    }
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Result<u16, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

impl TomlUsbId {
    fn resolve(&self) -> Result<UsbId, String> {
        match self {
            Self::Str(s) => s.parse().map_err(|e| format!("{}", e)),
            Self::Pair {
                vendor_id,
                product_id,
            } => Ok(UsbId::new(vendor_id.value()?, product_id.value()?)),
        }
    }
}

fn deserialize_device_ids<'de, D>(deserializer: D) -> Result<DeviceIds, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let table = TomlDeviceIds::deserialize(deserializer)?;
    let mut ids = DeviceIds::default();

    let fields = [
        (table.bootloader, &mut ids.bootloader),
        (table.application, &mut ids.application),
        (table.isp, &mut ids.isp),
    ];
    for (value, slot) in fields {
        if let Some(value) = value {
            *slot = value.resolve().map_err(serde::de::Error::custom)?;
        }
    }

    Ok(ids)
}
