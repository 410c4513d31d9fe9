//! The flash session state machine
//!
//! A session runs one operation against one module:
//!
//! ```text
//! Idle -> PortOrDeviceCheck -> [ModeSwitch] -> Erase -> [WriteBootloader]
//!      -> WriteFirmware -> [VerifyOrReconnect] -> Succeeded | Failed | Cancelled
//! ```
//!
//! Everything that can be decided from the input files (signature, size,
//! transport compatibility) is checked before the device is touched.
//! Progress leaves the session only as [`SessionEvent`]s and the operator
//! reaches it only through [`Control`] messages.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use multiflash_core::eeprom::{self, AvrEeprom};
use multiflash_core::signature::{self, ChannelOrder, FirmwareSignature, SignatureScan};
use multiflash_core::{size, Confirm, ModuleType, Transport};
use multiflash_probe::{
    DeviceClass, DeviceProbe, DeviceState, NusbEnumerator, PortCheck, SerialPortCheck,
    UsbEnumerator, WaitResult,
};

use crate::commands::{CommandBuilder, MIRRORED_FLASH_PATTERN};
use crate::config::FlashConfig;
use crate::error::{Result, SessionError};
use crate::events::{Control, Outcome, Phase, SessionEvent};
use crate::tool::{ProcessRunner, ToolCommand, ToolRunner};

const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";

/// The module end of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// How the module is reached
    pub transport: Transport,
    /// Serial port: the USB-serial adapter for [`Transport::Serial`], the
    /// module's own USB serial port for [`Transport::NativeUsb`]
    pub port: Option<String>,
    /// An operator serial monitor currently holds `port`
    pub monitor_active: bool,
}

/// What a session does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Erase flash, optionally including the EEPROM
    Erase {
        /// Also erase the EEPROM
        include_eeprom: bool,
    },
    /// Back up flash (and on ISP the EEPROM) to files
    Read {
        /// Flash backup file
        output: PathBuf,
        /// ISP only: EEPROM backup file, defaults to `output` with
        /// extension `eep`
        eeprom_output: Option<PathBuf>,
    },
    /// Write a firmware image
    Write {
        /// Firmware file
        firmware: PathBuf,
        /// Write the bootloader first (serial and ISP only)
        write_bootloader: bool,
        /// Start the firmware once written
        run_after: bool,
    },
    /// Write a 1 KiB EEPROM image (ISP only)
    WriteEeprom {
        /// EEPROM file
        eeprom: PathBuf,
    },
    /// Replace the DFU bootloader (native USB only)
    UpgradeBootloader,
}

impl Operation {
    /// Short verb for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::Erase { .. } => "Erasing",
            Self::Read { .. } => "Reading",
            Self::Write { .. } => "Writing",
            Self::WriteEeprom { .. } => "Writing EEPROM",
            Self::UpgradeBootloader => "Upgrading bootloader",
        }
    }
}

/// Hardware-facing collaborators of a session
pub struct Collaborators {
    /// USB device list
    pub usb: Box<dyn UsbEnumerator>,
    /// Serial port check
    pub ports: Box<dyn PortCheck>,
    /// External tool runner
    pub tools: Box<dyn ToolRunner>,
}

impl Collaborators {
    /// The real host USB stack, serial ports and tool processes
    pub fn system(config: &FlashConfig) -> Self {
        Self {
            usb: Box::new(NusbEnumerator),
            ports: Box::new(SerialPortCheck),
            tools: Box::new(ProcessRunner::new(config.tools_dir.clone())),
        }
    }
}

/// Channel ends a running session talks through
///
/// A detached link drops events and never reports a cancel.
#[derive(Default)]
pub(crate) struct Link {
    events: Option<Sender<SessionEvent>>,
    control: Option<Receiver<Control>>,
    cancelled: bool,
}

impl Link {
    pub(crate) fn new(events: Sender<SessionEvent>, control: Receiver<Control>) -> Self {
        Self {
            events: Some(events),
            control: Some(control),
            cancelled: false,
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // The UI may be gone; the session still runs to its end
            let _ = events.send(event);
        }
    }

    /// Drain pending control messages; true once a cancel was seen
    pub(crate) fn poll_cancel(&mut self) -> bool {
        let Some(control) = &self.control else {
            return self.cancelled;
        };

        loop {
            match control.try_recv() {
                Ok(Control::Cancel) => self.cancelled = true,
                Ok(Control::Confirm(answer)) => {
                    log::debug!("Ignoring unsolicited confirmation ({})", answer)
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.cancelled = true;
                    break;
                }
            }
        }

        self.cancelled
    }
}

impl Confirm for Link {
    fn confirm(&mut self, question: &str) -> std::result::Result<bool, String> {
        let Some(control) = &self.control else {
            return Err("no operator connected".to_string());
        };
        if let Some(events) = &self.events {
            let _ = events.send(SessionEvent::Prompt(question.to_string()));
        }

        match control.recv() {
            Ok(Control::Confirm(answer)) => Ok(answer),
            Ok(Control::Cancel) => {
                self.cancelled = true;
                Ok(false)
            }
            Err(_) => {
                self.cancelled = true;
                Err("operator disconnected".to_string())
            }
        }
    }
}

/// A firmware image that passed all offline checks
#[derive(Debug)]
struct PreparedFirmware {
    path: PathBuf,
    eeprom_present: bool,
}

/// One flash operation against one module
pub struct FlashSession {
    config: FlashConfig,
    target: Target,
    operation: Operation,
    pub(crate) probe: DeviceProbe<Box<dyn UsbEnumerator>>,
    ports: Box<dyn PortCheck>,
    tools: Box<dyn ToolRunner>,
    pub(crate) link: Link,
    phase: Phase,
    step: usize,
    total_steps: usize,
    module_type: Option<ModuleType>,
}

impl FlashSession {
    /// Create a session; nothing happens until it is run
    pub fn new(
        config: FlashConfig,
        target: Target,
        operation: Operation,
        collaborators: Collaborators,
    ) -> Self {
        let probe = DeviceProbe::new(collaborators.usb, config.device_ids)
            .with_poll_interval(config.poll_interval());

        Self {
            config,
            target,
            operation,
            probe,
            ports: collaborators.ports,
            tools: collaborators.tools,
            link: Link::default(),
            phase: Phase::Idle,
            step: 0,
            total_steps: 0,
            module_type: None,
        }
    }

    /// Transport this session uses
    pub fn transport(&self) -> Transport {
        self.target.transport
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of the current step, and of planned steps
    pub fn progress(&self) -> (usize, usize) {
        (self.step, self.total_steps)
    }

    /// Module type from the firmware signature, once known
    pub fn module_type(&self) -> Option<ModuleType> {
        self.module_type
    }

    pub(crate) fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Run to completion on the current thread
    ///
    /// Emits [`SessionEvent::Terminal`] exactly once, as the last event.
    pub fn run(mut self, events: Sender<SessionEvent>, control: Receiver<Control>) -> Outcome {
        self.link = Link::new(events, control);
        self.log(format!(
            "{} via {}",
            self.operation.name(),
            self.target.transport
        ));

        let outcome = match self.execute() {
            Ok(()) => Outcome::Succeeded,
            Err(e) => {
                log::error!("{}", e);
                e.outcome()
            }
        };

        self.phase = match outcome {
            Outcome::Succeeded => Phase::Succeeded,
            Outcome::Failed(_) => Phase::Failed,
            Outcome::Cancelled(_) => Phase::Cancelled,
        };
        self.link.emit(SessionEvent::Phase(self.phase));
        self.link.emit(SessionEvent::Terminal(outcome.clone()));

        outcome
    }

    fn execute(&mut self) -> Result<()> {
        let firmware = self.prepare()?;

        self.suspend_monitor();
        let mode_switch = self.check_endpoint()?;
        self.total_steps = self.plan(mode_switch);

        if mode_switch {
            self.mode_switch()?;
        }

        match self.operation.clone() {
            Operation::Erase { include_eeprom } => self.erase(include_eeprom, false)?,
            Operation::Read {
                output,
                eeprom_output,
            } => self.read(&output, eeprom_output)?,
            Operation::Write {
                write_bootloader,
                run_after,
                ..
            } => {
                let Some(firmware) = firmware else {
                    return Err(SessionError::Format("no firmware image".to_string()));
                };
                self.write(&firmware, write_bootloader, run_after)?
            }
            Operation::WriteEeprom { eeprom } => {
                self.begin_step(Phase::WriteEeprom, "Writing EEPROM")?;
                let cmd = CommandBuilder::new(&self.config).avr_write_eeprom(&eeprom);
                self.run_tool(Phase::WriteEeprom, &cmd)?;
            }
            Operation::UpgradeBootloader => {
                self.begin_step(Phase::UpgradeBootloader, "Writing bootreloader")?;
                let cmd = CommandBuilder::new(&self.config).dfu_upgrade_bootloader();
                self.run_tool(Phase::UpgradeBootloader, &cmd)?;
                self.log("Bootreloader written; the module replaces its bootloader on first run");
            }
        }

        self.reconnect();
        Ok(())
    }

    // -- Offline checks --

    /// Everything that can be rejected without touching a device
    fn prepare(&mut self) -> Result<Option<PreparedFirmware>> {
        let transport = self.target.transport;

        match &self.operation {
            Operation::Write {
                firmware,
                write_bootloader,
                ..
            } => {
                if *write_bootloader && !transport.can_write_bootloader() {
                    return Err(SessionError::Incompatible(format!(
                        "a bootloader cannot be written over {}",
                        transport
                    )));
                }
                let firmware = firmware.clone();
                self.prepare_firmware(&firmware).map(Some)
            }
            Operation::WriteEeprom { eeprom } => {
                if transport != Transport::Isp {
                    return Err(SessionError::Incompatible(format!(
                        "EEPROM images can only be written over {}",
                        Transport::Isp
                    )));
                }
                let data = read_input(eeprom)?;
                let image = AvrEeprom::from_backup(&data)?;
                self.log(format!("EEPROM Global ID: 0x{:08X}", image.global_id()));
                Ok(None)
            }
            Operation::UpgradeBootloader => {
                if transport != Transport::NativeUsb {
                    return Err(SessionError::Incompatible(format!(
                        "the bootloader can only be upgraded over {}",
                        Transport::NativeUsb
                    )));
                }
                Ok(None)
            }
            Operation::Erase { .. } | Operation::Read { .. } => Ok(None),
        }
    }

    fn prepare_firmware(&mut self, path: &Path) -> Result<PreparedFirmware> {
        let image = read_input(path)?;
        let transport = self.target.transport;

        let signature = match signature::scan(&image) {
            SignatureScan::Found(sig) => Some(sig),
            SignatureScan::Unparsable(e) => {
                log::warn!("Ignoring firmware signature: {}", e);
                None
            }
            SignatureScan::Absent => None,
        };

        match &signature {
            Some(sig) => {
                self.log(describe_signature(sig));
                self.module_type = Some(sig.module_type);
            }
            None => self.log("Firmware has no signature"),
        }

        check_compatibility(signature.as_ref(), &image, transport)?;

        let stm32_image = signature
            .as_ref()
            .map_or(true, |s| s.module_type == ModuleType::Stm32);
        let eeprom_present = stm32_image && eeprom::has_valid_eeprom(&image);
        if eeprom_present {
            self.log("Firmware image includes EEPROM data");
        }

        let result = size::validate(
            image.len() as u64,
            signature.as_ref(),
            eeprom_present,
            transport,
            &mut self.link,
        );
        if self.link.cancelled {
            return Err(SessionError::Cancelled(CANCELLED_BY_OPERATOR.to_string()));
        }
        result?;

        Ok(PreparedFirmware {
            path: path.to_path_buf(),
            eeprom_present,
        })
    }

    // -- Endpoint --

    fn port(&self) -> Result<String> {
        self.target
            .port
            .clone()
            .ok_or_else(|| SessionError::DeviceNotFound("no serial port given".to_string()))
    }

    fn check_port(&self, port: &str) -> Result<()> {
        self.ports
            .check(port, self.config.serial_baud)
            .map_err(|e| SessionError::DeviceNotFound(e.to_string()))
    }

    /// Confirm the endpoint is usable; returns whether a mode switch is
    /// needed first
    fn check_endpoint(&mut self) -> Result<bool> {
        self.enter_phase(Phase::PortOrDeviceCheck);

        match self.target.transport {
            Transport::Serial => {
                let port = self.port()?;
                self.check_port(&port)?;
                Ok(false)
            }
            Transport::Isp => match self.probe.find(DeviceClass::IspProgrammer) {
                Some(device) => {
                    self.log(format!("Found {}", device));
                    Ok(false)
                }
                None => Err(SessionError::DeviceNotFound(format!(
                    "{} ({}) not found",
                    DeviceClass::IspProgrammer,
                    self.config.device_ids.isp
                ))),
            },
            Transport::NativeUsb => match self.probe.probe() {
                DeviceState::NativeBootloader(device) => {
                    self.log(format!("Found {}", device));
                    Ok(false)
                }
                DeviceState::NativeApplication(device) => {
                    self.log(format!("Found {}", device));
                    let port = self.port()?;
                    self.check_port(&port)?;
                    Ok(true)
                }
                DeviceState::IspProgrammer(_) | DeviceState::None => Err(
                    SessionError::DeviceNotFound("no MULTI-Module found on USB".to_string()),
                ),
            },
        }
    }

    fn plan(&self, mode_switch: bool) -> usize {
        let transport = self.target.transport;
        let mut steps = usize::from(mode_switch);

        steps += match &self.operation {
            Operation::Write {
                write_bootloader, ..
            } => match transport {
                Transport::NativeUsb => 1,
                Transport::Serial => {
                    2 + usize::from(*write_bootloader)
                        + usize::from(!self.config.disable_flash_verification)
                }
                Transport::Isp => 2 + usize::from(*write_bootloader),
            },
            _ => 1,
        };

        steps
    }

    fn suspend_monitor(&mut self) {
        if !self.target.monitor_active {
            return;
        }
        if let Some(port) = self.target.port.clone() {
            log::debug!("Asking serial monitor to release {}", port);
            self.link.emit(SessionEvent::SuspendMonitor { port });
        }
    }

    fn reconnect(&mut self) {
        if !self.target.monitor_active {
            return;
        }
        if let Some(port) = self.target.port.clone() {
            self.enter_phase(Phase::VerifyOrReconnect);
            self.link.emit(SessionEvent::ResumeMonitor {
                port,
                delay: self.config.monitor_reconnect_delay(),
            });
        }
    }

    fn mode_switch(&mut self) -> Result<()> {
        self.begin_step(Phase::ModeSwitch, "Switching to DFU mode")?;

        let port = self.port()?;
        let cmd = CommandBuilder::new(&self.config).maple_reset(&port);
        let code = self.run_tool_status(Phase::ModeSwitch, &cmd)?;
        if code != 0 {
            log::debug!("maple-reset exited with {}, checking for DFU device", code);
        }

        let timeout = self.config.mode_switch_timeout();
        let Self { probe, link, .. } = self;
        let result = probe.wait_until(DeviceClass::NativeBootloader, true, timeout, |_| {
            link.poll_cancel()
        });

        match result {
            WaitResult::Reached => {
                self.log("Module is in DFU mode");
                Ok(())
            }
            WaitResult::Cancelled => Err(SessionError::Cancelled(
                CANCELLED_BY_OPERATOR.to_string(),
            )),
            WaitResult::TimedOut => {
                self.log("Module did not switch to DFU mode");
                self.recover()
            }
        }
    }

    // -- Operations --

    fn erase(&mut self, include_eeprom: bool, with_bootloader: bool) -> Result<()> {
        let label = if include_eeprom {
            "Erasing flash and EEPROM"
        } else {
            "Erasing flash"
        };
        self.begin_step(Phase::Erase, label)?;

        let builder = CommandBuilder::new(&self.config);
        let cmd = match self.target.transport {
            Transport::NativeUsb => builder.dfu_erase(include_eeprom),
            Transport::Serial => builder.stm32_erase(include_eeprom, &self.port()?),
            Transport::Isp => builder.avr_erase(include_eeprom, with_bootloader),
        };
        self.run_tool(Phase::Erase, &cmd)
    }

    fn read(&mut self, output: &Path, eeprom_output: Option<PathBuf>) -> Result<()> {
        self.begin_step(Phase::Read, "Reading flash")?;

        let builder = CommandBuilder::new(&self.config);
        let cmd = match self.target.transport {
            Transport::NativeUsb => builder.dfu_read(output),
            Transport::Serial => builder.stm32_read(output, &self.port()?),
            Transport::Isp => {
                let eeprom_output = eeprom_output.unwrap_or_else(|| output.with_extension("eep"));
                self.log(format!("EEPROM will be saved to {}", eeprom_output.display()));
                builder.avr_read(output, &eeprom_output)
            }
        };
        self.run_tool(Phase::Read, &cmd)?;

        self.log(format!("Flash saved to {}", output.display()));
        Ok(())
    }

    fn write(
        &mut self,
        firmware: &PreparedFirmware,
        write_bootloader: bool,
        run_after: bool,
    ) -> Result<()> {
        match self.target.transport {
            Transport::NativeUsb => self.write_native(&firmware.path, run_after),
            Transport::Serial => {
                let port = self.port()?;
                if !self.config.disable_flash_verification {
                    self.flash_size_check(&port)?;
                }

                self.erase(firmware.eeprom_present, false)?;

                if write_bootloader {
                    self.begin_step(Phase::WriteBootloader, "Writing bootloader")?;
                    let cmd = CommandBuilder::new(&self.config).stm32_write_bootloader(&port);
                    self.run_tool(Phase::WriteBootloader, &cmd)?;
                }

                self.begin_step(Phase::WriteFirmware, "Writing firmware")?;
                let cmd = CommandBuilder::new(&self.config).stm32_write_firmware(
                    &firmware.path,
                    &port,
                    write_bootloader,
                    run_after,
                );
                self.run_tool(Phase::WriteFirmware, &cmd)
            }
            Transport::Isp => {
                self.erase(false, write_bootloader)?;

                if write_bootloader {
                    self.begin_step(Phase::WriteBootloader, "Writing bootloader")?;
                    let cmd = CommandBuilder::new(&self.config).avr_write_bootloader();
                    self.run_tool(Phase::WriteBootloader, &cmd)?;
                }

                self.begin_step(Phase::WriteFirmware, "Writing firmware")?;
                let cmd = CommandBuilder::new(&self.config).avr_write_firmware(&firmware.path);
                self.run_tool(Phase::WriteFirmware, &cmd)
            }
        }
    }

    /// DFU write, with one recovery and retry if the first attempt fails
    fn write_native(&mut self, firmware: &Path, run_after: bool) -> Result<()> {
        self.begin_step(Phase::WriteFirmware, "Writing firmware")?;
        let cmd = CommandBuilder::new(&self.config).dfu_write(firmware, run_after);

        let code = self.run_tool_status(Phase::WriteFirmware, &cmd)?;
        self.check_cancelled()?;
        if code == 0 {
            return Ok(());
        }

        self.log(format!("Write failed (status {}), attempting DFU recovery", code));
        self.recover()?;

        self.enter_phase(Phase::WriteFirmware);
        self.log("Writing firmware again");
        self.run_tool(Phase::WriteFirmware, &cmd)
    }

    /// Abort if the MCU mirrors its first 64 KiB above 0x08010000
    fn flash_size_check(&mut self, port: &str) -> Result<()> {
        self.begin_step(Phase::FlashSizeCheck, "Checking flash size")?;

        let scratch =
            std::env::temp_dir().join(format!("multiflash-{}-flash-check.bin", std::process::id()));
        let cmd = CommandBuilder::new(&self.config).stm32_flash_check(&scratch, port);
        self.run_tool(Phase::FlashSizeCheck, &cmd)?;

        let data = fs::read(&scratch);
        let _ = fs::remove_file(&scratch);
        let data = data?;

        if data == MIRRORED_FLASH_PATTERN {
            return Err(SessionError::Incompatible(
                "the MCU has only 64 KiB of usable flash, 128 KiB is required".to_string(),
            ));
        }

        log::debug!("Flash above 64 KiB is usable");
        Ok(())
    }

    // -- Plumbing --

    pub(crate) fn log(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.link.emit(SessionEvent::Log(message));
    }

    pub(crate) fn enter_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.link.emit(SessionEvent::Phase(phase));
    }

    pub(crate) fn check_cancelled(&mut self) -> Result<()> {
        if self.link.poll_cancel() {
            Err(SessionError::Cancelled(CANCELLED_BY_OPERATOR.to_string()))
        } else {
            Ok(())
        }
    }

    fn begin_step(&mut self, phase: Phase, label: &str) -> Result<()> {
        self.check_cancelled()?;

        self.step += 1;
        self.enter_phase(phase);
        log::info!("[{}/{}] {}", self.step, self.total_steps, label);
        self.link.emit(SessionEvent::Progress {
            step: self.step,
            total: self.total_steps,
            label: label.to_string(),
        });
        Ok(())
    }

    /// Run a tool and return its exit status
    fn run_tool_status(&mut self, step: Phase, cmd: &ToolCommand) -> Result<i32> {
        self.link.emit(SessionEvent::Verbose(cmd.to_string()));

        let Self { tools, link, .. } = self;
        tools
            .run(cmd, &mut |line: &str| {
                log::debug!("{}: {}", cmd.tool, line);
                link.emit(SessionEvent::Verbose(line.to_string()));
            })
            .map_err(|source| SessionError::ToolExecution { step, source })
    }

    /// Run a tool; any non-zero status fails `step`
    fn run_tool(&mut self, step: Phase, cmd: &ToolCommand) -> Result<()> {
        let code = self.run_tool_status(step, cmd)?;

        // A cancel that arrived while the tool ran discards its result
        self.check_cancelled()?;

        if code != 0 {
            return Err(SessionError::ToolExit { step, code });
        }
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| SessionError::Format(format!("could not read {}: {}", path.display(), e)))
}

fn describe_signature(sig: &FirmwareSignature) -> String {
    let mut text = format!(
        "Firmware {} for {}, telemetry {}",
        sig.version, sig.module_type, sig.telemetry_type
    );
    if sig.bootloader_support {
        text.push_str(", bootloader support");
    }
    if let ChannelOrder::Known(order) = sig.channel_order {
        text.push_str(&format!(", channel order {}", order));
    }
    text
}

/// Reject firmware the transport cannot or must not write
fn check_compatibility(
    sig: Option<&FirmwareSignature>,
    image: &[u8],
    transport: Transport,
) -> Result<()> {
    if let Some(sig) = sig {
        match (sig.module_type, transport) {
            (ModuleType::Avr, Transport::Serial | Transport::NativeUsb) => {
                return Err(SessionError::Incompatible(format!(
                    "AVR firmware cannot be written over {}",
                    transport
                )));
            }
            (ModuleType::Stm32, Transport::Isp) => {
                return Err(SessionError::Incompatible(format!(
                    "STM32 firmware cannot be written with a {}",
                    transport
                )));
            }
            _ => {}
        }
    }

    if transport == Transport::NativeUsb {
        let bootloader_build = sig.is_some_and(|s| s.bootloader_support);
        if !bootloader_build && !signature::supports_native_usb(image) {
            return Err(SessionError::Incompatible(
                "firmware was not built with USB support and would leave the module unflashable over native USB"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use multiflash_probe::{ProbeError, UsbDeviceEntry, UsbId};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    pub(crate) const BOOTLOADER: UsbId = UsbId::new(0x1EAF, 0x0003);
    pub(crate) const APPLICATION: UsbId = UsbId::new(0x1EAF, 0x0004);

    pub(crate) fn device(id: UsbId) -> UsbDeviceEntry {
        UsbDeviceEntry {
            vendor_id: id.vendor_id,
            product_id: id.product_id,
            bus: "1".to_string(),
            address: 9,
        }
    }

    /// Scripted USB device lists; the last one repeats forever
    pub(crate) struct FakeUsb {
        script: Mutex<VecDeque<Vec<UsbDeviceEntry>>>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl FakeUsb {
        pub(crate) fn new(script: Vec<Vec<UsbDeviceEntry>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl UsbEnumerator for FakeUsb {
        fn devices(&self) -> multiflash_probe::Result<Vec<UsbDeviceEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script.front().cloned().unwrap_or_default())
            }
        }
    }

    pub(crate) struct FakePorts {
        ok: bool,
    }

    impl PortCheck for FakePorts {
        fn check(&self, port: &str, _baud: u32) -> multiflash_probe::Result<()> {
            if self.ok {
                Ok(())
            } else {
                Err(ProbeError::PortUnavailable {
                    port: port.to_string(),
                    reason: "busy".to_string(),
                })
            }
        }
    }

    /// Records every command; returns scripted exit codes, then 0
    pub(crate) struct FakeTools {
        codes: VecDeque<i32>,
        pub(crate) log: Arc<Mutex<Vec<ToolCommand>>>,
        flash_check_data: Vec<u8>,
    }

    impl ToolRunner for FakeTools {
        fn run(
            &mut self,
            command: &ToolCommand,
            output: &mut dyn FnMut(&str),
        ) -> std::result::Result<i32, crate::tool::ToolError> {
            self.log.lock().unwrap().push(command.clone());
            output("fake tool output");

            if command.args.first().map(String::as_str) == Some("-r")
                && command.tool == crate::tool::Tool::Stm32Flash
            {
                fs::write(&command.args[1], &self.flash_check_data).unwrap();
            }
            Ok(self.codes.pop_front().unwrap_or(0))
        }
    }

    pub(crate) struct Fixture {
        pub(crate) config: FlashConfig,
        pub(crate) usb: Vec<Vec<UsbDeviceEntry>>,
        pub(crate) ports_ok: bool,
        pub(crate) codes: Vec<i32>,
        pub(crate) flash_check_data: Vec<u8>,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let mut config = FlashConfig::default();
            config.poll_interval_ms = 1;
            config.mode_switch_timeout_ms = 20;
            config.recovery_timeout_ms = 500;
            config.disable_flash_verification = true;
            Self {
                config,
                usb: vec![vec![]],
                ports_ok: true,
                codes: Vec::new(),
                flash_check_data: vec![0xFF; 32],
            }
        }

        pub(crate) fn session(
            self,
            target: Target,
            operation: Operation,
        ) -> (FlashSession, Arc<Mutex<Vec<ToolCommand>>>, Arc<AtomicUsize>) {
            let usb = FakeUsb::new(self.usb);
            let calls = usb.calls.clone();
            let tools = FakeTools {
                codes: self.codes.into(),
                log: Arc::new(Mutex::new(Vec::new())),
                flash_check_data: self.flash_check_data,
            };
            let log = tools.log.clone();
            let session = FlashSession::new(
                self.config,
                target,
                operation,
                Collaborators {
                    usb: Box::new(usb),
                    ports: Box::new(FakePorts { ok: self.ports_ok }),
                    tools: Box::new(tools),
                },
            );
            (session, log, calls)
        }
    }

    pub(crate) fn target(transport: Transport, port: Option<&str>) -> Target {
        Target {
            transport,
            port: port.map(str::to_string),
            monitor_active: false,
        }
    }

    /// Write a firmware file with the given signature into the temp dir
    pub(crate) fn firmware_file(name: &str, signature: Option<&[u8]>, len: usize) -> PathBuf {
        let mut image = vec![0xFFu8; len];
        if let Some(sig) = signature {
            image[0x100..0x100 + sig.len()].copy_from_slice(sig);
        }
        let path = std::env::temp_dir().join(format!(
            "multiflash-test-{}-{}.bin",
            std::process::id(),
            name
        ));
        fs::write(&path, image).unwrap();
        path
    }

    /// Run synchronously with no operator input except pre-sent controls
    pub(crate) fn run(session: FlashSession, controls: &[Control]) -> (Outcome, Vec<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel();
        let (control_tx, control_rx) = mpsc::channel();
        for c in controls {
            control_tx.send(*c).unwrap();
        }
        let outcome = session.run(event_tx, control_rx);
        drop(control_tx);
        (outcome, event_rx.try_iter().collect())
    }

    fn commands(log: &Arc<Mutex<Vec<ToolCommand>>>) -> Vec<String> {
        log.lock().unwrap().iter().map(|c| c.to_string()).collect()
    }

    fn assert_single_terminal_last(events: &[SessionEvent]) {
        let terminals = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Terminal(_)))
            .count();
        assert_eq!(terminals, 1);
        assert!(matches!(events.last(), Some(SessionEvent::Terminal(_))));
    }

    const STM_BOOT_SIG: &[u8] = b"multi-stm-bcsid-01020304";
    const AVR_SIG: &[u8] = b"multi-avr-bctid-01000000";

    #[test]
    fn test_serial_write_with_bootloader() {
        let firmware = firmware_file("serial-bl", Some(STM_BOOT_SIG), 60_000);
        let (session, log, _) = Fixture::new().session(
            target(Transport::Serial, Some("/dev/ttyUSB0")),
            Operation::Write {
                firmware: firmware.clone(),
                write_bootloader: true,
                run_after: true,
            },
        );

        let (outcome, events) = run(session, &[]);
        assert_eq!(outcome, Outcome::Succeeded);
        assert_single_terminal_last(&events);

        let cmds = commands(&log);
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], "stm32flash -o -S 0x8000000:129024 -b 115200 /dev/ttyUSB0");
        assert!(cmds[1].starts_with("stm32flash -v -e 0 -g 0x8000000 -b 115200 -w"));
        assert_eq!(
            cmds[2],
            format!(
                "stm32flash -v -s 8 -e 0 -b 115200 -w {} /dev/ttyUSB0 -g 0x8002000",
                firmware.display()
            )
        );

        let steps: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Progress { step, total, .. } => Some((*step, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(steps, [(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_serial_erase_failure_names_step() {
        let mut fixture = Fixture::new();
        fixture.codes = vec![1];
        let (session, log, _) = fixture.session(
            target(Transport::Serial, Some("COM4")),
            Operation::Erase {
                include_eeprom: true,
            },
        );

        let (outcome, events) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("erase failed: tool exited with status 1".to_string())
        );
        assert_eq!(commands(&log).len(), 1);
        assert_single_terminal_last(&events);
    }

    #[test]
    fn test_serial_port_unusable() {
        let mut fixture = Fixture::new();
        fixture.ports_ok = false;
        let (session, log, _) = fixture.session(
            target(Transport::Serial, Some("COM4")),
            Operation::Erase {
                include_eeprom: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("could not open port COM4: busy".to_string())
        );
        assert!(commands(&log).is_empty());
    }

    #[test]
    fn test_flash_size_check_rejects_64k_mcu() {
        let firmware = firmware_file("flash-check", Some(STM_BOOT_SIG), 1_000);
        let mut fixture = Fixture::new();
        fixture.config.disable_flash_verification = false;
        fixture.flash_check_data = MIRRORED_FLASH_PATTERN.to_vec();
        let (session, log, _) = fixture.session(
            target(Transport::Serial, Some("COM4")),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert!(matches!(outcome, Outcome::Failed(ref r) if r.contains("64 KiB")));
        // Only the check ran, nothing was erased
        assert_eq!(commands(&log).len(), 1);
    }

    #[test]
    fn test_native_usb_write_retries_after_recovery() {
        let firmware = firmware_file("usb-retry", Some(STM_BOOT_SIG), 50_000);
        let mut fixture = Fixture::new();
        fixture.codes = vec![74, 0];
        fixture.usb = vec![
            // endpoint check
            vec![device(BOOTLOADER)],
            // recovery: still attached, then unplugged, then back
            vec![device(BOOTLOADER)],
            vec![],
            vec![device(BOOTLOADER)],
        ];
        let (session, log, _) = fixture.session(
            target(Transport::NativeUsb, None),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: true,
            },
        );

        let (outcome, events) = run(session, &[]);
        assert_eq!(outcome, Outcome::Succeeded);

        let cmds = commands(&log);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], cmds[1]);
        assert!(cmds[0].ends_with("-v -R"));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Phase(Phase::Recovery))));
    }

    #[test]
    fn test_native_usb_second_write_failure_is_terminal() {
        let firmware = firmware_file("usb-fail", Some(STM_BOOT_SIG), 50_000);
        let mut fixture = Fixture::new();
        fixture.codes = vec![74, 74];
        fixture.usb = vec![vec![device(BOOTLOADER)], vec![], vec![device(BOOTLOADER)]];
        let (session, log, _) = fixture.session(
            target(Transport::NativeUsb, None),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("write firmware failed: tool exited with status 74".to_string())
        );
        assert_eq!(commands(&log).len(), 2);
    }

    #[test]
    fn test_mode_switch_then_erase() {
        let mut fixture = Fixture::new();
        fixture.usb = vec![vec![device(APPLICATION)], vec![device(BOOTLOADER)]];
        let (session, log, _) = fixture.session(
            target(Transport::NativeUsb, Some("/dev/ttyACM0")),
            Operation::Erase {
                include_eeprom: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert_eq!(outcome, Outcome::Succeeded);

        let cmds = commands(&log);
        assert_eq!(cmds[0], "maple-reset /dev/ttyACM0 2000");
        assert_eq!(
            cmds[1],
            "dfu-util -a 2 -d 1EAF:0003 -D tools/erase118.bin -v"
        );
    }

    #[test]
    fn test_device_not_found() {
        let (session, log, _) = Fixture::new().session(
            target(Transport::NativeUsb, None),
            Operation::UpgradeBootloader,
        );

        let (outcome, events) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("no MULTI-Module found on USB".to_string())
        );
        assert!(commands(&log).is_empty());
        assert_single_terminal_last(&events);
    }

    #[test]
    fn test_isp_programmer_missing() {
        let (session, _, _) = Fixture::new().session(
            target(Transport::Isp, None),
            Operation::Erase {
                include_eeprom: false,
            },
        );
        let (outcome, _) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("USBasp (16C0:05DC) not found".to_string())
        );
    }

    #[test]
    fn test_cancel_before_first_step() {
        let mut fixture = Fixture::new();
        fixture.usb = vec![vec![device(BOOTLOADER)]];
        let (session, log, _) = fixture.session(
            target(Transport::NativeUsb, None),
            Operation::Read {
                output: PathBuf::from("backup.bin"),
                eeprom_output: None,
            },
        );

        let (outcome, events) = run(session, &[Control::Cancel]);
        assert_eq!(
            outcome,
            Outcome::Cancelled(CANCELLED_BY_OPERATOR.to_string())
        );
        assert!(commands(&log).is_empty());
        assert_single_terminal_last(&events);
    }

    #[test]
    fn test_oversized_firmware_never_touches_device() {
        let firmware = firmware_file("too-big", Some(STM_BOOT_SIG), 120_833);
        let (session, log, usb_calls) = Fixture::new().session(
            target(Transport::NativeUsb, None),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed(
                "firmware is 120833 bytes, maximum for this module is 120832 bytes".to_string()
            )
        );
        assert!(commands(&log).is_empty());
        assert_eq!(usb_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_avr_firmware_over_serial_rejected() {
        let firmware = firmware_file("avr-serial", Some(AVR_SIG), 30_000);
        let (session, log, _) = Fixture::new().session(
            target(Transport::Serial, Some("COM4")),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("AVR firmware cannot be written over serial".to_string())
        );
        assert!(commands(&log).is_empty());
    }

    #[test]
    fn test_unsigned_firmware_declined() {
        let firmware = firmware_file("unsigned", None, 10_000);
        let (session, log, _) = Fixture::new().session(
            target(Transport::Serial, Some("COM4")),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, events) = run(session, &[Control::Confirm(false)]);
        assert!(matches!(outcome, Outcome::Cancelled(_)));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Prompt(_))));
        assert!(commands(&log).is_empty());
    }

    #[test]
    fn test_cancel_at_prompt() {
        let firmware = firmware_file("unsigned-cancel", None, 10_000);
        let (session, log, usb_calls) = Fixture::new().session(
            target(Transport::Serial, Some("COM4")),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, events) = run(session, &[Control::Cancel]);
        assert_eq!(
            outcome,
            Outcome::Cancelled(CANCELLED_BY_OPERATOR.to_string())
        );
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Prompt(_))));
        assert!(commands(&log).is_empty());
        assert_eq!(usb_calls.load(Ordering::SeqCst), 0);
        assert_single_terminal_last(&events);
    }

    #[test]
    fn test_unsigned_firmware_accepted() {
        let firmware = firmware_file("unsigned-ok", None, 10_000);
        let (session, log, _) = Fixture::new().session(
            target(Transport::Serial, Some("COM4")),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, _) = run(session, &[Control::Confirm(true)]);
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(commands(&log).len(), 2);
    }

    #[test]
    fn test_native_usb_needs_usb_capable_firmware() {
        let firmware = firmware_file("no-usb", Some(b"multi-stm-xcsid-01020304"), 10_000);
        let (session, _, _) = Fixture::new().session(
            target(Transport::NativeUsb, None),
            Operation::Write {
                firmware,
                write_bootloader: false,
                run_after: false,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert!(matches!(outcome, Outcome::Failed(ref r) if r.contains("USB support")));
    }

    #[test]
    fn test_monitor_hand_off() {
        let mut fixture = Fixture::new();
        fixture.config.monitor_reconnect_delay_ms = 250;
        let mut t = target(Transport::Serial, Some("COM7"));
        t.monitor_active = true;
        let (session, _, _) = fixture.session(
            t,
            Operation::Erase {
                include_eeprom: false,
            },
        );

        let (outcome, events) = run(session, &[]);
        assert_eq!(outcome, Outcome::Succeeded);

        let suspend = events
            .iter()
            .position(|e| matches!(e, SessionEvent::SuspendMonitor { .. }))
            .unwrap();
        let resume = events
            .iter()
            .position(|e| {
                *e == SessionEvent::ResumeMonitor {
                    port: "COM7".to_string(),
                    delay: std::time::Duration::from_millis(250),
                }
            })
            .unwrap();
        let first_progress = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Progress { .. }))
            .unwrap();
        assert!(suspend < first_progress);
        assert!(first_progress < resume);
    }

    #[test]
    fn test_isp_read_defaults_eeprom_file() {
        let mut fixture = Fixture::new();
        fixture.usb = vec![vec![device(UsbId::new(0x16C0, 0x05DC))]];
        let (session, log, _) = fixture.session(
            target(Transport::Isp, None),
            Operation::Read {
                output: PathBuf::from("multi.bin"),
                eeprom_output: None,
            },
        );

        let (outcome, _) = run(session, &[]);
        assert_eq!(outcome, Outcome::Succeeded);
        assert!(commands(&log)[0].ends_with("-Uflash:r:multi.bin:r -Ueeprom:r:multi.eep:r"));
    }

    #[test]
    fn test_write_eeprom_requires_1k_image() {
        let eeprom = firmware_file("eeprom-bad", None, 2_048);
        let mut fixture = Fixture::new();
        fixture.usb = vec![vec![device(UsbId::new(0x16C0, 0x05DC))]];
        let (session, log, _) =
            fixture.session(target(Transport::Isp, None), Operation::WriteEeprom { eeprom });

        let (outcome, _) = run(session, &[]);
        assert_eq!(
            outcome,
            Outcome::Failed("EEPROM image: EEPROM data is 2048 bytes, expected 1024".to_string())
        );
        assert!(commands(&log).is_empty());
    }
}
