//! Wear-leveled EEPROM emulation of the STM32F103
//!
//! Two 1 KiB flash pages hold an append-only log of `(address, value)`
//! records. At any time one page is valid (status `0x0000`) and the other
//! erased (status `0xFFFF`). Records are 4-byte slots, value first, then
//! address, both little-endian half-words as the MCU writes them:
//!
//! ```text
//! page base + 0   status
//! page base + 4   value  | address   <- oldest record
//! page base + 8   value  | address
//! ...
//! page base + 1020 value | address   <- last slot
//! ```
//!
//! Lookups scan from the end of the page backward so that the newest
//! record for an address wins.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{EepromError, Result};

/// Size of one EEPROM page
pub const PAGE_SIZE: usize = 0x400;

/// Base offset of page 0
pub const PAGE_BASE0: usize = 0;

/// Base offset of page 1
pub const PAGE_BASE1: usize = 0x400;

/// Total size of the emulated EEPROM (two pages)
pub const EEPROM_SIZE: usize = 2 * PAGE_SIZE;

/// Status of an erased page, also the content of an unused slot half-word
pub const PAGE_ERASED: u16 = 0xFFFF;

/// Status of the page holding current data
pub const PAGE_VALID: u16 = 0x0000;

/// Offset of the first record slot within a page
const FIRST_SLOT: usize = 4;

/// Size of one record slot
const SLOT_SIZE: usize = 4;

/// Offset of the address half-word of the lowest slot
const FIRST_ADDRESS: usize = FIRST_SLOT + 2;

/// Virtual address of the least significant Global ID byte
pub const GLOBAL_ID_ADDRESS: u16 = 10;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Find the base offset of the page holding current data
///
/// Data shorter than two pages has no valid page.
pub fn find_valid_page(data: &[u8]) -> Result<usize> {
    if data.len() < EEPROM_SIZE {
        return Err(EepromError::NoValidPage);
    }

    let status0 = read_u16(data, PAGE_BASE0);
    let status1 = read_u16(data, PAGE_BASE1);

    match (status0, status1) {
        (PAGE_VALID, PAGE_ERASED) => Ok(PAGE_BASE0),
        (PAGE_ERASED, PAGE_VALID) => Ok(PAGE_BASE1),
        _ => {
            log::debug!(
                "No valid EEPROM page (status words 0x{:04X}/0x{:04X})",
                status0,
                status1
            );
            Err(EepromError::NoValidPage)
        }
    }
}

/// Read the newest value stored for a virtual address
pub fn read_variable(address: u16, data: &[u8]) -> Option<u16> {
    if address == PAGE_ERASED {
        return None;
    }

    let base = find_valid_page(data).ok()?;
    let mut pos = base + PAGE_SIZE - 2;

    while pos >= base + FIRST_ADDRESS {
        if read_u16(data, pos) == address {
            return Some(read_u16(data, pos - 2));
        }
        pos -= SLOT_SIZE;
    }

    None
}

/// Read the 32-bit Global ID from virtual addresses 10..=13
///
/// Address 13 holds the most significant byte. Returns 0 when any of the
/// four variables is missing.
pub fn read_global_id(data: &[u8]) -> u32 {
    let mut id = 0u32;

    for i in (0..4).rev() {
        let Some(value) = read_variable(GLOBAL_ID_ADDRESS + i, data) else {
            return 0;
        };
        id = (id << 8) | u32::from(value as u8);
    }

    id
}

/// Whether the last two pages of an image form a valid emulated EEPROM
pub fn has_valid_eeprom(image: &[u8]) -> bool {
    image.len() >= EEPROM_SIZE && find_valid_page(&image[image.len() - EEPROM_SIZE..]).is_ok()
}

/// An owned, writable emulated EEPROM image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedEeprom {
    data: Vec<u8>,
}

impl Default for EmulatedEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedEeprom {
    /// Freshly formatted EEPROM: page 0 valid and empty, page 1 erased
    pub fn new() -> Self {
        let mut data = vec![0xFF; EEPROM_SIZE];
        write_u16(&mut data, PAGE_BASE0, PAGE_VALID);
        Self { data }
    }

    /// Wrap exactly [`EEPROM_SIZE`] bytes of EEPROM data
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != EEPROM_SIZE {
            return Err(EepromError::WrongSize {
                expected: EEPROM_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            data: data.to_vec(),
        })
    }

    /// Take the EEPROM block from the tail of a full flash backup
    pub fn from_backup(backup: &[u8]) -> Result<Self> {
        if backup.len() < EEPROM_SIZE {
            return Err(EepromError::BackupTooSmall);
        }
        Self::from_bytes(&backup[backup.len() - EEPROM_SIZE..])
    }

    /// Raw EEPROM bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Base offset of the valid page
    pub fn valid_page(&self) -> Result<usize> {
        find_valid_page(&self.data)
    }

    /// Newest value for a virtual address
    pub fn read(&self, address: u16) -> Option<u16> {
        read_variable(address, &self.data)
    }

    /// The module's Global ID, 0 if not fully present
    pub fn global_id(&self) -> u32 {
        read_global_id(&self.data)
    }

    /// Live variables of the valid page, newest value per address,
    /// ordered by address
    pub fn variables(&self) -> Vec<(u16, u16)> {
        let Ok(base) = self.valid_page() else {
            return Vec::new();
        };

        let mut live = BTreeMap::new();
        for slot in (base + FIRST_SLOT..base + PAGE_SIZE).step_by(SLOT_SIZE) {
            let value = read_u16(&self.data, slot);
            let address = read_u16(&self.data, slot + 2);
            if address != PAGE_ERASED {
                // Later slots overwrite earlier ones
                live.insert(address, value);
            }
        }

        live.into_iter().collect()
    }

    /// Append a record, transferring to the other page when full
    pub fn write(&mut self, address: u16, value: u16) -> Result<()> {
        if address == PAGE_ERASED {
            return Err(EepromError::InvalidAddress(address));
        }

        let base = self.valid_page()?;
        if self.append(base, address, value) {
            return Ok(());
        }

        log::debug!("EEPROM page at 0x{:03X} full, transferring", base);
        let new_base = self.transfer(base, address)?;

        if self.append(new_base, address, value) {
            Ok(())
        } else {
            Err(EepromError::Full)
        }
    }

    /// Write a record into the first free slot of a page
    fn append(&mut self, base: usize, address: u16, value: u16) -> bool {
        let free = (base + FIRST_SLOT..base + PAGE_SIZE)
            .step_by(SLOT_SIZE)
            .find(|&slot| self.data[slot..slot + SLOT_SIZE].iter().all(|&b| b == 0xFF));

        match free {
            Some(slot) => {
                write_u16(&mut self.data, slot, value);
                write_u16(&mut self.data, slot + 2, address);
                true
            }
            None => false,
        }
    }

    /// Copy the newest value of every variable except `skip` into the
    /// erased page and make it the valid one
    fn transfer(&mut self, base: usize, skip: u16) -> Result<usize> {
        let live: Vec<(u16, u16)> = self
            .variables()
            .into_iter()
            .filter(|&(address, _)| address != skip)
            .collect();

        let new_base = if base == PAGE_BASE0 {
            PAGE_BASE1
        } else {
            PAGE_BASE0
        };

        self.data[new_base..new_base + PAGE_SIZE].fill(0xFF);
        for (address, value) in live {
            if !self.append(new_base, address, value) {
                return Err(EepromError::Full);
            }
        }

        write_u16(&mut self.data, new_base, PAGE_VALID);
        self.data[base..base + PAGE_SIZE].fill(0xFF);

        Ok(new_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Vec<u8> {
        vec![0xFF; EEPROM_SIZE]
    }

    fn put_record(data: &mut [u8], slot: usize, address: u16, value: u16) {
        write_u16(data, slot, value);
        write_u16(data, slot + 2, address);
    }

    #[test]
    fn test_find_valid_page_both_orders() {
        let mut data = blank();
        write_u16(&mut data, PAGE_BASE0, PAGE_VALID);
        assert_eq!(find_valid_page(&data), Ok(PAGE_BASE0));

        let mut data = blank();
        write_u16(&mut data, PAGE_BASE1, PAGE_VALID);
        assert_eq!(find_valid_page(&data), Ok(PAGE_BASE1));
    }

    #[test]
    fn test_find_valid_page_rejects_equal_status() {
        let data = blank();
        assert_eq!(find_valid_page(&data), Err(EepromError::NoValidPage));

        let mut data = blank();
        write_u16(&mut data, PAGE_BASE0, PAGE_VALID);
        write_u16(&mut data, PAGE_BASE1, PAGE_VALID);
        assert_eq!(find_valid_page(&data), Err(EepromError::NoValidPage));

        let mut data = blank();
        write_u16(&mut data, PAGE_BASE0, 0xEEEE);
        assert_eq!(find_valid_page(&data), Err(EepromError::NoValidPage));
    }

    #[test]
    fn test_find_valid_page_short_data() {
        assert_eq!(find_valid_page(&[]), Err(EepromError::NoValidPage));
        assert_eq!(find_valid_page(&[0u8; 1024]), Err(EepromError::NoValidPage));
        assert_eq!(read_variable(10, &[0u8; 100]), None);
    }

    #[test]
    fn test_newest_record_wins() {
        let mut data = blank();
        write_u16(&mut data, PAGE_BASE1, PAGE_VALID);
        put_record(&mut data, PAGE_BASE1 + 4, 42, 0x1111);
        put_record(&mut data, PAGE_BASE1 + 8, 7, 0x0007);
        put_record(&mut data, PAGE_BASE1 + 12, 42, 0x2222);

        assert_eq!(read_variable(42, &data), Some(0x2222));
        assert_eq!(read_variable(7, &data), Some(0x0007));
        assert_eq!(read_variable(8, &data), None);
        assert_eq!(read_variable(0xFFFF, &data), None);
    }

    #[test]
    fn test_records_on_erased_page_are_ignored() {
        let mut data = blank();
        write_u16(&mut data, PAGE_BASE0, PAGE_VALID);
        put_record(&mut data, PAGE_BASE1 + 4, 42, 0x1234);
        assert_eq!(read_variable(42, &data), None);
    }

    #[test]
    fn test_last_slot_is_scanned() {
        let mut data = blank();
        write_u16(&mut data, PAGE_BASE0, PAGE_VALID);
        put_record(&mut data, PAGE_SIZE - 4, 3, 0xBEEF);
        assert_eq!(read_variable(3, &data), Some(0xBEEF));
    }

    #[test]
    fn test_global_id_from_full_backup() {
        // 128 KiB all-erased flash image with the EEPROM in the last 2 KiB
        let mut image = vec![0xFFu8; 131_072];
        let eeprom = image.len() - EEPROM_SIZE;
        write_u16(&mut image, eeprom + PAGE_BASE0, PAGE_VALID);
        write_u16(&mut image, eeprom + PAGE_BASE1, PAGE_ERASED);
        for (i, byte) in [0x01u16, 0x00, 0x00, 0x00].iter().enumerate() {
            put_record(&mut image, eeprom + 4 + i * 4, 10 + i as u16, *byte);
        }

        let ee = EmulatedEeprom::from_backup(&image).unwrap();
        assert_eq!(ee.global_id(), 1);
        assert!(has_valid_eeprom(&image));
    }

    #[test]
    fn test_global_id_byte_order() {
        let mut ee = EmulatedEeprom::new();
        ee.write(10, 0x78).unwrap();
        ee.write(11, 0x56).unwrap();
        ee.write(12, 0x34).unwrap();
        ee.write(13, 0x12).unwrap();
        assert_eq!(ee.global_id(), 0x1234_5678);
    }

    #[test]
    fn test_global_id_missing_part() {
        let mut ee = EmulatedEeprom::new();
        ee.write(10, 0x78).unwrap();
        ee.write(11, 0x56).unwrap();
        ee.write(13, 0x12).unwrap();
        assert_eq!(ee.global_id(), 0);
        assert_eq!(read_global_id(&blank()), 0);
    }

    #[test]
    fn test_write_then_transfer() {
        let mut ee = EmulatedEeprom::new();
        ee.write(1, 100).unwrap();
        ee.write(2, 200).unwrap();

        // 255 slots per page; fill the rest with updates to address 1
        for i in 0..253 {
            ee.write(1, i).unwrap();
        }
        assert_eq!(ee.valid_page(), Ok(PAGE_BASE0));

        ee.write(1, 999).unwrap();
        assert_eq!(ee.valid_page(), Ok(PAGE_BASE1));
        assert_eq!(ee.read(1), Some(999));
        assert_eq!(ee.read(2), Some(200));
        assert_eq!(ee.variables(), vec![(1, 999), (2, 200)]);
    }

    #[test]
    fn test_write_rejects_erased_address() {
        let mut ee = EmulatedEeprom::new();
        assert_eq!(ee.write(0xFFFF, 1), Err(EepromError::InvalidAddress(0xFFFF)));
    }

    #[test]
    fn test_from_bytes_wrong_size() {
        assert_eq!(
            EmulatedEeprom::from_bytes(&[0u8; 10]),
            Err(EepromError::WrongSize {
                expected: EEPROM_SIZE,
                actual: 10
            })
        );
        assert_eq!(
            EmulatedEeprom::from_backup(&[0u8; 100]),
            Err(EepromError::BackupTooSmall)
        );
    }
}
