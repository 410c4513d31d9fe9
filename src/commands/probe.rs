//! Probe and port listing commands

use multiflash_probe::{list_ports, DeviceProbe, DeviceState, NusbEnumerator};
use multiflash_session::FlashConfig;

/// Report which MULTI-Module form or programmer is attached
pub fn run_probe(config: &FlashConfig) -> Result<(), Box<dyn std::error::Error>> {
    let probe = DeviceProbe::new(NusbEnumerator, config.device_ids);

    match probe.probe() {
        DeviceState::NativeBootloader(device) => {
            println!("Found {}", device);
            println!("  Ready to flash over native USB");
        }
        DeviceState::NativeApplication(device) => {
            println!("Found {}", device);
            println!("  Firmware is running; flashing switches it to DFU mode");
            println!("  (pass its serial port with --port)");
        }
        DeviceState::IspProgrammer(device) => {
            println!("Found {}", device);
            println!("  Ready to flash an AVR module over ISP");
        }
        DeviceState::None => {
            println!("No MULTI-Module or USBasp found");
            println!();
            println!("Looking for:");
            println!("  {} (DFU mode)", config.device_ids.bootloader);
            println!("  {} (USB serial)", config.device_ids.application);
            println!("  {} (USBasp)", config.device_ids.isp);
        }
    }

    Ok(())
}

/// List serial ports
pub fn run_list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    println!("Serial ports:");
    println!();
    for port in ports {
        match port.description {
            Some(description) => println!("  {:<20} {}", port.name, description),
            None => println!("  {}", port.name),
        }
    }

    Ok(())
}
