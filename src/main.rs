//! multiflash - MULTI-Module firmware flasher
//!
//! Flashes, backs up and erases MULTI-Module RC transmitter modules over
//! three transports:
//! - **Native USB** - STM32 modules with the Maple DFU bootloader
//!   (`dfu-util`, with `maple-reset` to leave running firmware)
//! - **Serial** - STM32 system bootloader behind a USB-serial adapter
//!   (`stm32flash`)
//! - **ISP** - Atmega328p modules through a USBasp (`avrdude`)
//!
//! Firmware files are checked offline first: their build signature and
//! size must match the module and transport before any device is touched.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, TargetArgs};
use multiflash_session::{FlashConfig, Operation, Target};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG still wins over -v
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level(cli.verbose).as_str()),
    )
    .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut skip_flash_check = false;
    let (target, operation) = match cli.command {
        Commands::Probe => return commands::probe::run_probe(&config),
        Commands::ListPorts => return commands::probe::run_list_ports(),
        Commands::Inspect { file } => return commands::inspect::cmd_inspect(&file),
        Commands::Eeprom { file, output } => {
            return commands::inspect::cmd_eeprom(&file, output.as_deref())
        }
        Commands::Erase { target, eeprom } => (
            target,
            Operation::Erase {
                include_eeprom: eeprom,
            },
        ),
        Commands::Read {
            target,
            output,
            eeprom_output,
        } => (
            target,
            Operation::Read {
                output,
                eeprom_output,
            },
        ),
        Commands::Write {
            target,
            input,
            bootloader,
            no_run,
            no_flash_check,
        } => {
            skip_flash_check = no_flash_check;
            (
                target,
                Operation::Write {
                    firmware: input,
                    write_bootloader: bootloader,
                    run_after: !no_run,
                },
            )
        }
        Commands::WriteEeprom { target, input } => {
            (target, Operation::WriteEeprom { eeprom: input })
        }
        Commands::UpgradeBootloader { target } => (target, Operation::UpgradeBootloader),
    };

    let config = apply_overrides(config, &target, skip_flash_check);
    let assume_yes = target.yes;
    let target = session_target(&target);

    let outcome = commands::session::run(config, target, operation, assume_yes)?;
    if !outcome.is_success() {
        std::process::exit(outcome.exit_code());
    }

    Ok(())
}

/// Default log filter for a `-v` count
fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn session_target(args: &TargetArgs) -> Target {
    Target {
        transport: args.transport,
        port: args.port.clone(),
        monitor_active: args.monitor,
    }
}

/// Load the configuration file, or defaults when none is given
fn load_config(path: Option<&Path>) -> Result<FlashConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(FlashConfig::from_toml_file(path)?),
        None => Ok(FlashConfig::default()),
    }
}

/// Command line flags win over the configuration file
fn apply_overrides(
    mut config: FlashConfig,
    args: &TargetArgs,
    skip_flash_check: bool,
) -> FlashConfig {
    if let Some(baud) = args.baud {
        config.serial_baud = baud;
    }
    if let Some(dir) = &args.tools_dir {
        config.tools_dir = dir.clone();
    }
    if skip_flash_check {
        config.disable_flash_verification = true;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiflash_core::Transport;

    fn target_args(args: &[&str]) -> TargetArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Erase { target, .. } => target,
            _ => panic!("expected erase"),
        }
    }

    #[test]
    fn test_log_level_follows_verbosity() {
        assert_eq!(log_level(0), log::LevelFilter::Info);
        assert_eq!(log_level(1), log::LevelFilter::Debug);
        assert_eq!(log_level(2), log::LevelFilter::Trace);
        assert_eq!(log_level(5), log::LevelFilter::Trace);
    }

    #[test]
    fn test_verbose_flag_is_global() {
        let cli = Cli::try_parse_from(["multiflash", "erase", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(log_level(cli.verbose).as_str(), "TRACE");
    }

    #[test]
    fn test_monitor_flag_reaches_session() {
        let args = target_args(&[
            "multiflash",
            "erase",
            "-t",
            "serial",
            "-p",
            "COM3",
            "--monitor",
        ]);
        let target = session_target(&args);
        assert_eq!(target.transport, Transport::Serial);
        assert_eq!(target.port.as_deref(), Some("COM3"));
        assert!(target.monitor_active);

        let target = session_target(&target_args(&["multiflash", "erase"]));
        assert_eq!(target.transport, Transport::NativeUsb);
        assert!(!target.monitor_active);
    }

    #[test]
    fn test_overrides_win_over_config() {
        let args = target_args(&["multiflash", "erase", "--baud", "57600"]);
        let config = apply_overrides(FlashConfig::default(), &args, true);
        assert_eq!(config.serial_baud, 57600);
        assert!(config.disable_flash_verification);
    }
}
