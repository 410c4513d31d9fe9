//! Atmega328p EEPROM
//!
//! The AVR module uses its real 1 KiB EEPROM with fixed addresses, so
//! variables are plain byte offsets.

use alloc::vec::Vec;

use crate::error::{EepromError, Result};

/// Size of the Atmega328p EEPROM
pub const AVR_EEPROM_SIZE: usize = 1024;

/// Offset of the least significant Global ID byte
pub const GLOBAL_ID_OFFSET: usize = 10;

/// Read one EEPROM byte
pub fn read_byte(address: usize, data: &[u8]) -> Option<u8> {
    if data.len() != AVR_EEPROM_SIZE {
        return None;
    }
    data.get(address).copied()
}

/// Read the Global ID from bytes 10..=13, byte 13 most significant
pub fn read_global_id(data: &[u8]) -> u32 {
    if data.len() != AVR_EEPROM_SIZE {
        return 0;
    }
    let bytes = &data[GLOBAL_ID_OFFSET..GLOBAL_ID_OFFSET + 4];
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// An AVR EEPROM dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvrEeprom {
    data: Vec<u8>,
}

impl AvrEeprom {
    /// Load an EEPROM backup, which must be exactly 1 KiB
    pub fn from_backup(data: &[u8]) -> Result<Self> {
        if data.len() != AVR_EEPROM_SIZE {
            return Err(EepromError::WrongSize {
                expected: AVR_EEPROM_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            data: data.to_vec(),
        })
    }

    /// Raw EEPROM bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Byte at `address`
    pub fn read(&self, address: usize) -> Option<u8> {
        read_byte(address, &self.data)
    }

    /// The module's Global ID
    pub fn global_id(&self) -> u32 {
        read_global_id(&self.data)
    }

    /// Whether the dump is fully erased
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&b| b == 0xFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_global_id() {
        let mut data = vec![0xFF; AVR_EEPROM_SIZE];
        data[10..14].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        let ee = AvrEeprom::from_backup(&data).unwrap();
        assert_eq!(ee.global_id(), 0x1234_5678);
        assert_eq!(ee.read(13), Some(0x12));
        assert_eq!(ee.read(AVR_EEPROM_SIZE), None);
        assert!(!ee.is_empty());
    }

    #[test]
    fn test_wrong_size() {
        assert_eq!(
            AvrEeprom::from_backup(&[0xFF; 1023]),
            Err(EepromError::WrongSize {
                expected: AVR_EEPROM_SIZE,
                actual: 1023
            })
        );
        assert_eq!(read_global_id(&[0u8; 2048]), 0);
        assert_eq!(read_byte(0, &[0u8; 16]), None);
    }
}
