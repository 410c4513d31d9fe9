//! DFU recovery
//!
//! When a module does not enter DFU mode on its own, or a DFU write fails,
//! the operator has to unplug the module and plug it back in. Both waits
//! share one budget.

use std::time::{Duration, Instant};

use multiflash_probe::{DeviceClass, WaitResult};

use crate::error::{Result, SessionError};
use crate::events::{Phase, SessionEvent};
use crate::session::FlashSession;

const TICK: Duration = Duration::from_secs(1);

impl FlashSession {
    /// Wait for the operator to unplug and replug the module
    pub(crate) fn recover(&mut self) -> Result<()> {
        self.enter_phase(Phase::Recovery);
        let budget = self.config().recovery_timeout();
        let start = Instant::now();

        if self.probe.is_present(DeviceClass::NativeBootloader) {
            self.log("Unplug the MULTI-Module");
            match self.wait_ticking(false, budget, start, budget) {
                WaitResult::Reached => {}
                WaitResult::TimedOut => {
                    return Err(SessionError::Timeout(
                        "DFU device was not unplugged in time".to_string(),
                    ))
                }
                WaitResult::Cancelled => {
                    return Err(SessionError::Cancelled("recovery cancelled".to_string()))
                }
            }
        }

        self.log("Plug the MULTI-Module back in");
        let remaining = budget.saturating_sub(start.elapsed());
        match self.wait_ticking(true, remaining, start, budget) {
            WaitResult::Reached => {
                self.log("DFU device found");
                Ok(())
            }
            WaitResult::TimedOut => Err(SessionError::Timeout(
                "DFU device was not plugged in in time".to_string(),
            )),
            WaitResult::Cancelled => Err(SessionError::Cancelled("recovery cancelled".to_string())),
        }
    }

    /// Wait for the DFU device, announcing the wait and emitting a
    /// [`SessionEvent::RecoveryTick`] once a second
    fn wait_ticking(
        &mut self,
        want_present: bool,
        timeout: Duration,
        start: Instant,
        total: Duration,
    ) -> WaitResult {
        let class = DeviceClass::NativeBootloader;
        self.link.emit(SessionEvent::AwaitDevice {
            kind: class,
            present: want_present,
            timeout,
        });

        let mut next_tick = start.elapsed() + TICK;
        let Self { probe, link, .. } = self;
        probe.wait_until(class, want_present, timeout, |_| {
            let elapsed = start.elapsed();
            if elapsed >= next_tick {
                link.emit(SessionEvent::RecoveryTick {
                    elapsed: elapsed.as_secs(),
                    total: total.as_secs(),
                });
                next_tick = elapsed + TICK;
            }
            link.poll_cancel()
        })
    }
}
