//! Inspection of full-flash STM32 backups

use super::stm32::EEPROM_SIZE;

/// Whether the firmware area of a backup (everything before the EEPROM)
/// is erased
pub fn firmware_is_empty(backup: &[u8]) -> bool {
    if backup.len() <= EEPROM_SIZE {
        return false;
    }
    backup[..backup.len() - EEPROM_SIZE].iter().all(|&b| b == 0xFF)
}

/// Whether the EEPROM area of a backup (the last 2 KiB) is erased
pub fn eeprom_is_empty(backup: &[u8]) -> bool {
    if backup.len() < EEPROM_SIZE {
        return false;
    }
    backup[backup.len() - EEPROM_SIZE..].iter().all(|&b| b == 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_blank_backup() {
        let backup = vec![0xFF; 131_072];
        assert!(firmware_is_empty(&backup));
        assert!(eeprom_is_empty(&backup));
    }

    #[test]
    fn test_populated_areas() {
        let mut backup = vec![0xFF; 131_072];
        backup[0] = 0x20;
        assert!(!firmware_is_empty(&backup));
        assert!(eeprom_is_empty(&backup));

        let mut backup = vec![0xFF; 131_072];
        backup[131_072 - EEPROM_SIZE] = 0x00;
        assert!(firmware_is_empty(&backup));
        assert!(!eeprom_is_empty(&backup));
    }

    #[test]
    fn test_short_backup() {
        assert!(!firmware_is_empty(&[0xFF; 100]));
        assert!(!eeprom_is_empty(&[0xFF; 100]));
    }
}
