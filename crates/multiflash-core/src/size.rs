//! Maximum firmware size for a module configuration
//!
//! The ceiling depends on the target MCU, whether a bootloader occupies the
//! start of flash, and whether the image carries an STM32 EEPROM tail.

use alloc::format;
use alloc::string::String;

use crate::error::SizeError;
use crate::signature::{FirmwareSignature, ModuleType};
use crate::transport::Transport;

/// Flash of the largest supported MCU; nothing may exceed this
pub const ABSOLUTE_MAX: u64 = 131_072;

/// STM32 application area behind the 8 KiB bootloader (minus EEPROM)
pub const STM32_WITH_BOOTLOADER: u64 = 120_832;

/// STM32 application area without bootloader (minus EEPROM)
pub const STM32_WITHOUT_BOOTLOADER: u64 = 129_024;

/// Atmega328p application area behind the bootloader
pub const AVR_WITH_BOOTLOADER: u64 = 32_232;

/// Atmega328p application area without bootloader
pub const AVR_WITHOUT_BOOTLOADER: u64 = 32_744;

/// ATxmega32D4 application area
pub const ORANGERX_MAX: u64 = 32_744;

/// Size of the STM32 emulated EEPROM appended to a backup image
pub const EEPROM_TAIL: u64 = 2_048;

/// Operator confirmation collaborator
///
/// Asked once when an image carries no signature and its size therefore
/// cannot be checked against the real target.
pub trait Confirm {
    /// Ask a yes/no question; `Err` if no answer could be obtained
    fn confirm(&mut self, question: &str) -> Result<bool, String>;
}

/// Largest firmware image allowed for the given facts
pub fn max_allowed_size(
    signature: Option<&FirmwareSignature>,
    eeprom_present: bool,
    transport: Transport,
) -> u64 {
    let (base, stm32) = match signature {
        Some(sig) => match (sig.module_type, sig.bootloader_support) {
            (ModuleType::Stm32, true) => (STM32_WITH_BOOTLOADER, true),
            (ModuleType::Stm32, false) => (STM32_WITHOUT_BOOTLOADER, true),
            (ModuleType::Avr, true) => (AVR_WITH_BOOTLOADER, false),
            (ModuleType::Avr, false) => (AVR_WITHOUT_BOOTLOADER, false),
            (ModuleType::OrangeRx, _) => (ORANGERX_MAX, false),
            (ModuleType::Unknown, _) => return ABSOLUTE_MAX,
        },
        // Native USB implies the DFU bootloader is resident
        None if transport == Transport::NativeUsb => (STM32_WITH_BOOTLOADER, true),
        None => (STM32_WITHOUT_BOOTLOADER, true),
    };

    let max = if stm32 && eeprom_present {
        base + EEPROM_TAIL
    } else {
        base
    };

    max.min(ABSOLUTE_MAX)
}

/// Check an image size against its ceiling
///
/// An image without a signature needs an explicit yes from `confirm`
/// before it is accepted.
pub fn validate(
    file_size: u64,
    signature: Option<&FirmwareSignature>,
    eeprom_present: bool,
    transport: Transport,
    confirm: &mut dyn Confirm,
) -> Result<(), SizeError> {
    let max = max_allowed_size(signature, eeprom_present, transport);
    log::debug!(
        "Firmware size {} bytes, maximum {} bytes (eeprom: {})",
        file_size,
        max,
        eeprom_present
    );

    if file_size > max {
        return Err(SizeError::TooLarge {
            size: file_size,
            max,
        });
    }

    if signature.is_none() {
        let question = format!(
            "Firmware has no signature, its size ({} bytes) cannot be verified against the module. Continue?",
            file_size
        );
        match confirm.confirm(&question) {
            Ok(true) => {}
            Ok(false) => return Err(SizeError::Declined),
            Err(e) => return Err(SizeError::ConfirmationFailed(e)),
        }
    }

    Ok(())
}
