//! Module EEPROM decoding
//!
//! STM32 modules emulate EEPROM in the last two flash pages; AVR modules
//! have a real 1 KiB EEPROM. Both store the module's Global ID, the value
//! a radio uses to bind to this particular module.

pub mod avr;
pub mod backup;
pub mod stm32;

pub use avr::{AvrEeprom, AVR_EEPROM_SIZE};
pub use backup::{eeprom_is_empty, firmware_is_empty};
pub use stm32::{
    find_valid_page, has_valid_eeprom, read_global_id, read_variable, EmulatedEeprom, EEPROM_SIZE,
    PAGE_BASE0, PAGE_BASE1, PAGE_SIZE,
};
