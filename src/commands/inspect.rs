//! Firmware and backup inspection
//!
//! Neither command touches a device.

use std::fs;
use std::path::Path;

use multiflash_core::eeprom::{
    self, eeprom_is_empty, firmware_is_empty, AvrEeprom, EmulatedEeprom, AVR_EEPROM_SIZE,
};
use multiflash_core::signature::{self, ChannelOrder, SignatureScan};
use multiflash_core::size::max_allowed_size;
use multiflash_core::{ModuleType, Transport};

/// Read file contents into a Vec
fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let data = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    log::debug!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Print what a firmware file was built for and where it may be written
pub fn cmd_inspect(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = read_file(path)?;

    println!("Firmware Information");
    println!("====================");
    println!();
    println!(
        "File:            {} ({} bytes)",
        path.display(),
        image.len()
    );

    let signature = match signature::scan(&image) {
        SignatureScan::Found(sig) => Some(sig),
        SignatureScan::Unparsable(e) => {
            println!("Signature:       unreadable ({})", e);
            None
        }
        SignatureScan::Absent => {
            println!("Signature:       none");
            None
        }
    };

    if let Some(sig) = &signature {
        println!("Signature:       {}", sig.raw);
        println!("Version:         {}", sig.version);
        println!("Module type:     {}", sig.module_type);
        if let ChannelOrder::Known(order) = sig.channel_order {
            println!("Channel order:   {}", order);
        }
        println!("Telemetry:       {}", sig.telemetry_type);
        println!("Bootloader:      {}", yes_no(sig.bootloader_support));
        println!("Boot check:      {}", yes_no(sig.check_for_bootloader));
        println!("Inverted telem.: {}", yes_no(sig.invert_telemetry));
        println!("Debug serial:    {}", yes_no(sig.debug_serial));
    }

    let stm32 = signature
        .as_ref()
        .map_or(true, |s| s.module_type == ModuleType::Stm32);
    let eeprom_present = stm32 && eeprom::has_valid_eeprom(&image);
    println!("EEPROM data:     {}", yes_no(eeprom_present));
    if eeprom_present {
        if let Ok(eeprom) = EmulatedEeprom::from_backup(&image) {
            println!("Global ID:       0x{:08X}", eeprom.global_id());
        }
    }
    println!(
        "USB support:     {}",
        yes_no(signature::supports_native_usb(&image))
    );

    println!();
    println!("Size limits:");
    for transport in [Transport::NativeUsb, Transport::Serial, Transport::Isp] {
        let max = max_allowed_size(signature.as_ref(), eeprom_present, transport);
        let verdict = if image.len() as u64 <= max {
            "fits"
        } else {
            "too large"
        };
        println!("  {:<12} {:>7} bytes  {}", transport.to_string(), max, verdict);
    }

    Ok(())
}

/// Print the EEPROM of a backup, and optionally save the EEPROM block
pub fn cmd_eeprom(path: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let backup = read_file(path)?;

    if backup.len() == AVR_EEPROM_SIZE {
        let eeprom = AvrEeprom::from_backup(&backup)?;
        println!("AVR EEPROM ({} bytes)", AVR_EEPROM_SIZE);
        println!();
        if eeprom.is_empty() {
            println!("EEPROM is blank");
        } else {
            println!("Global ID: 0x{:08X}", eeprom.global_id());
        }
        if let Some(output) = output {
            fs::write(output, eeprom.as_bytes())?;
            println!("Wrote EEPROM to {}", output.display());
        }
        return Ok(());
    }

    let eeprom = EmulatedEeprom::from_backup(&backup)?;
    println!("STM32 flash backup ({} bytes)", backup.len());
    println!();
    println!("Firmware blank:  {}", yes_no(firmware_is_empty(&backup)));
    println!("EEPROM blank:    {}", yes_no(eeprom_is_empty(&backup)));

    match eeprom.valid_page() {
        Ok(base) => {
            println!("Valid page:      {}", base / eeprom::PAGE_SIZE);
            println!("Global ID:       0x{:08X}", eeprom.global_id());

            let variables = eeprom.variables();
            println!();
            println!("{} variable(s):", variables.len());
            for (address, value) in variables {
                println!("  0x{:04X} = 0x{:04X}", address, value);
            }
        }
        Err(e) => println!("EEPROM:          {}", e),
    }

    if let Some(output) = output {
        fs::write(output, eeprom.as_bytes())?;
        println!();
        println!("Wrote EEPROM to {}", output.display());
    }

    Ok(())
}
