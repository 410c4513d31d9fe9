//! Command lines for each transport's tool

use std::path::{Path, PathBuf};

use multiflash_probe::UsbId;

use crate::config::FlashConfig;
use crate::tool::{Tool, ToolCommand};

/// Start of STM32 flash
pub const STM32_FLASH_BASE: &str = "0x8000000";

/// Application entry when the 8 KiB bootloader is resident
pub const STM32_APP_BASE_WITH_BOOTLOADER: &str = "0x8002000";

/// First flash page of the application when the bootloader is resident
const STM32_APP_PAGE_WITH_BOOTLOADER: u32 = 8;

/// Flash erased when the EEPROM is kept
pub const STM32_ERASE_KEEP_EEPROM: u32 = 129_024;

/// Flash erased including the EEPROM
pub const STM32_ERASE_ALL: u32 = 131_072;

/// 32 bytes above 64 KiB as read back from an MCU with only 64 KiB of
/// flash, which mirrors the start of the vector table
pub const MIRRORED_FLASH_PATTERN: [u8; 32] = [
    0x07, 0x49, 0x08, 0x80, 0x07, 0x49, 0x08, 0x80, 0x07, 0x49, 0x08, 0x80, 0x07, 0x49, 0x08,
    0x80, 0x07, 0x49, 0x08, 0x80, 0x07, 0x49, 0x08, 0x80, 0x07, 0x49, 0x08, 0x80, 0x07, 0x49,
    0x08, 0x80,
];

/// Milliseconds `maple-reset` waits for the port after the reset
const MAPLE_RESET_WAIT_MS: &str = "2000";

/// Atmega328p fuse and lock values
mod fuses {
    pub const UNLOCK: &str = "0x3F";
    pub const LOCK: &str = "0x0F";
    pub const EXTENDED: &str = "0xFD";
    pub const HIGH_BOOT: &str = "0xD6";
    pub const HIGH_NO_BOOT: &str = "0xD7";
    pub const LOW: &str = "0xFF";
}

/// AVR bootloader image under the bootloaders directory
const AVR_BOOTLOADER: &str = "AtmegaMultiBoot.hex";

/// Builds tool command lines from a configuration
pub struct CommandBuilder<'a> {
    config: &'a FlashConfig,
}

impl<'a> CommandBuilder<'a> {
    /// Create a builder for `config`
    pub fn new(config: &'a FlashConfig) -> Self {
        Self { config }
    }

    fn tool_file(&self, name: &str) -> PathBuf {
        self.config.tools_dir.join(name)
    }

    fn dfu(&self) -> ToolCommand {
        let id: UsbId = self.config.device_ids.bootloader;
        ToolCommand::new(Tool::DfuUtil)
            .arg("-a")
            .arg("2")
            .arg("-d")
            .arg(id.to_string())
    }

    /// Reboot a running module into DFU mode through its serial port
    pub fn maple_reset(&self, port: &str) -> ToolCommand {
        ToolCommand::new(Tool::MapleReset)
            .arg(port)
            .arg(MAPLE_RESET_WAIT_MS)
    }

    /// Native USB erase: DFU cannot erase, so an all-0xFF image is written
    pub fn dfu_erase(&self, include_eeprom: bool) -> ToolCommand {
        let image = if include_eeprom {
            "erase120.bin"
        } else {
            "erase118.bin"
        };
        self.dfu()
            .arg("-D")
            .path(&self.tool_file(image))
            .arg("-v")
    }

    /// Native USB read of the application area
    pub fn dfu_read(&self, output: &Path) -> ToolCommand {
        self.dfu().arg("-U").path(output).arg("-v")
    }

    /// Native USB firmware write
    pub fn dfu_write(&self, firmware: &Path, run_after: bool) -> ToolCommand {
        let cmd = self.dfu().arg("-D").path(firmware).arg("-v");
        if run_after {
            cmd.arg("-R")
        } else {
            cmd
        }
    }

    /// Native USB bootloader upgrade through the bootreloader image
    pub fn dfu_upgrade_bootloader(&self) -> ToolCommand {
        self.dfu()
            .arg("-D")
            .path(&self.tool_file("bootreloader.bin"))
            .arg("-v")
            .arg("-R")
    }

    fn stm32flash(&self) -> ToolCommand {
        ToolCommand::new(Tool::Stm32Flash)
    }

    fn baud(&self) -> String {
        self.config.serial_baud.to_string()
    }

    /// Read 32 bytes above 64 KiB into `scratch`
    pub fn stm32_flash_check(&self, scratch: &Path, port: &str) -> ToolCommand {
        self.stm32flash()
            .arg("-r")
            .path(scratch)
            .arg("-S")
            .arg("0x8010000:32")
            .arg("-b")
            .arg(self.baud())
            .arg(port)
    }

    /// Serial erase, optionally including the EEPROM pages
    pub fn stm32_erase(&self, include_eeprom: bool, port: &str) -> ToolCommand {
        let bytes = if include_eeprom {
            STM32_ERASE_ALL
        } else {
            STM32_ERASE_KEEP_EEPROM
        };
        self.stm32flash()
            .arg("-o")
            .arg("-S")
            .arg(format!("{}:{}", STM32_FLASH_BASE, bytes))
            .arg("-b")
            .arg(self.baud())
            .arg(port)
    }

    /// Serial write of the configured bootloader image
    pub fn stm32_write_bootloader(&self, port: &str) -> ToolCommand {
        self.stm32flash()
            .arg("-v")
            .arg("-e")
            .arg("0")
            .arg("-g")
            .arg(STM32_FLASH_BASE)
            .arg("-b")
            .arg(self.baud())
            .arg("-w")
            .path(&self.config.stm_bootloader_path())
            .arg(port)
    }

    /// Serial firmware write, behind the bootloader if one was written
    pub fn stm32_write_firmware(
        &self,
        firmware: &Path,
        port: &str,
        behind_bootloader: bool,
        run_after: bool,
    ) -> ToolCommand {
        let (start_page, entry) = if behind_bootloader {
            (STM32_APP_PAGE_WITH_BOOTLOADER, STM32_APP_BASE_WITH_BOOTLOADER)
        } else {
            (0, STM32_FLASH_BASE)
        };

        let cmd = self
            .stm32flash()
            .arg("-v")
            .arg("-s")
            .arg(start_page.to_string())
            .arg("-e")
            .arg("0")
            .arg("-b")
            .arg(self.baud())
            .arg("-w")
            .path(firmware)
            .arg(port);

        if run_after {
            cmd.arg("-g").arg(entry)
        } else {
            cmd
        }
    }

    /// Serial read of the whole flash
    pub fn stm32_read(&self, output: &Path, port: &str) -> ToolCommand {
        self.stm32flash()
            .arg("-b")
            .arg(self.baud())
            .arg("-r")
            .path(output)
            .arg(port)
    }

    fn avrdude(&self) -> ToolCommand {
        ToolCommand::new(Tool::Avrdude)
            .arg(format!(
                "-C{}",
                self.tool_file("avrdude.conf").display()
            ))
            .arg("-patmega328p")
            .arg("-cusbasp")
    }

    fn image_arg(memory: &str, op: char, path: &Path, format: char) -> String {
        format!("-U{}:{}:{}:{}", memory, op, path.display(), format)
    }

    /// ISP chip preparation: fuses, blank flash and optionally blank EEPROM
    pub fn avr_erase(&self, include_eeprom: bool, with_bootloader: bool) -> ToolCommand {
        let high = if with_bootloader {
            fuses::HIGH_BOOT
        } else {
            fuses::HIGH_NO_BOOT
        };

        let cmd = self
            .avrdude()
            .arg(format!("-Ulock:w:{}:m", fuses::UNLOCK))
            .arg(format!("-Uefuse:w:{}:m", fuses::EXTENDED))
            .arg(format!("-Uhfuse:w:{}:m", high))
            .arg(format!("-Ulfuse:w:{}:m", fuses::LOW))
            .arg(Self::image_arg(
                "flash",
                'w',
                &self.tool_file("erase32.bin"),
                'a',
            ));

        if include_eeprom {
            cmd.arg(Self::image_arg(
                "eeprom",
                'w',
                &self.tool_file("erase1.bin"),
                'r',
            ))
        } else {
            cmd
        }
    }

    /// ISP bootloader write, then lock the boot section
    pub fn avr_write_bootloader(&self) -> ToolCommand {
        let bootloader = self.config.bootloaders_dir.join(AVR_BOOTLOADER);
        self.avrdude()
            .arg("-D")
            .arg(Self::image_arg("flash", 'w', &bootloader, 'i'))
            .arg(format!("-Ulock:w:{}:m", fuses::LOCK))
    }

    /// ISP firmware write without chip erase
    pub fn avr_write_firmware(&self, firmware: &Path) -> ToolCommand {
        self.avrdude()
            .arg("-D")
            .arg(Self::image_arg("flash", 'w', firmware, 'a'))
    }

    /// ISP read of flash and EEPROM into two raw files
    pub fn avr_read(&self, flash: &Path, eeprom: &Path) -> ToolCommand {
        self.avrdude()
            .arg(Self::image_arg("flash", 'r', flash, 'r'))
            .arg(Self::image_arg("eeprom", 'r', eeprom, 'r'))
    }

    /// ISP write of a raw EEPROM image
    pub fn avr_write_eeprom(&self, eeprom: &Path) -> ToolCommand {
        self.avrdude()
            .arg(Self::image_arg("eeprom", 'w', eeprom, 'r'))
    }
}
