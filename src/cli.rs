//! CLI argument parsing

use clap::{Parser, Subcommand};
use multiflash_core::Transport;
use std::path::PathBuf;

fn parse_transport(s: &str) -> Result<Transport, String> {
    s.parse::<Transport>().map_err(String::from)
}

#[derive(Parser)]
#[command(name = "multiflash")]
#[command(author, version, about = "MULTI-Module firmware flasher", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to reach the module, shared by all device commands
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Transport [usb, serial, isp]
    #[arg(short, long, value_parser = parse_transport, default_value = "usb")]
    pub transport: Transport,

    /// Serial port (USB-serial adapter, or the module's own port for a
    /// DFU mode switch)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Serial baud rate (overrides the configuration file)
    #[arg(long)]
    pub baud: Option<u32>,

    /// Directory holding the external tools (overrides the configuration file)
    #[arg(long)]
    pub tools_dir: Option<PathBuf>,

    /// Answer yes to every question
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// A serial monitor holds the port; release it while flashing and
    /// report when it may reconnect
    #[arg(long)]
    pub monitor: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which MULTI-Module or programmer is attached
    Probe,

    /// List serial ports
    ListPorts,

    /// Show the signature, size limits and EEPROM of a firmware file
    Inspect {
        /// Firmware file
        file: PathBuf,
    },

    /// Show the EEPROM contents of a backup file
    Eeprom {
        /// Backup file (STM32 flash backup, or a 1 KiB AVR EEPROM file)
        file: PathBuf,

        /// Save the extracted EEPROM block to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Erase the module flash
    Erase {
        #[command(flatten)]
        target: TargetArgs,

        /// Also erase the EEPROM (removes the Global ID and model bindings)
        #[arg(long)]
        eeprom: bool,
    },

    /// Back up the module flash to a file
    Read {
        #[command(flatten)]
        target: TargetArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// ISP only: EEPROM output file [default: output with .eep extension]
        #[arg(long)]
        eeprom_output: Option<PathBuf>,
    },

    /// Write a firmware file to the module
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Firmware file
        #[arg(short, long)]
        input: PathBuf,

        /// Write the bootloader before the firmware (serial and ISP only)
        #[arg(long)]
        bootloader: bool,

        /// Don't start the firmware after writing
        #[arg(long)]
        no_run: bool,

        /// Skip the flash size check before serial writes
        #[arg(long)]
        no_flash_check: bool,
    },

    /// Write a 1 KiB EEPROM image to an AVR module (ISP only)
    WriteEeprom {
        #[command(flatten)]
        target: TargetArgs,

        /// EEPROM file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Upgrade the DFU bootloader (native USB only)
    UpgradeBootloader {
        #[command(flatten)]
        target: TargetArgs,
    },
}
