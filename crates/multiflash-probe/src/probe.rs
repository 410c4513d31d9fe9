//! Device classification and presence polling

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::enumerate::{UsbDeviceEntry, UsbEnumerator};
use crate::ids::{DeviceClass, DeviceIds, UsbId};

/// Default interval between two presence polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A matching device found on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevice {
    /// What the device is
    pub class: DeviceClass,
    /// Its USB IDs
    pub id: UsbId,
    /// Platform bus identifier
    pub bus: String,
    /// Address on the bus
    pub address: u8,
}

impl fmt::Display for DetectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] at bus {} address {}",
            self.class, self.id, self.bus, self.address
        )
    }
}

/// Snapshot of which known device is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// Module in DFU bootloader mode
    NativeBootloader(DetectedDevice),
    /// Module running firmware with USB serial
    NativeApplication(DetectedDevice),
    /// USBasp programmer
    IspProgrammer(DetectedDevice),
    /// Nothing known attached
    None,
}

impl DeviceState {
    /// The detected device, if any
    pub fn device(&self) -> Option<&DetectedDevice> {
        match self {
            Self::NativeBootloader(d) | Self::NativeApplication(d) | Self::IspProgrammer(d) => {
                Some(d)
            }
            Self::None => None,
        }
    }

    fn from_device(device: DetectedDevice) -> Self {
        match device.class {
            DeviceClass::NativeBootloader => Self::NativeBootloader(device),
            DeviceClass::NativeApplication => Self::NativeApplication(device),
            DeviceClass::IspProgrammer => Self::IspProgrammer(device),
        }
    }
}

/// How a presence wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The wanted presence or absence was observed
    Reached,
    /// The budget ran out first
    TimedOut,
    /// The poll callback asked to stop
    Cancelled,
}

/// Detects MULTI-Modules and ISP programmers on the USB bus
pub struct DeviceProbe<E> {
    enumerator: E,
    ids: DeviceIds,
    poll_interval: Duration,
}

impl<E: UsbEnumerator> DeviceProbe<E> {
    /// Create a probe using the given enumerator and identities
    pub fn new(enumerator: E, ids: DeviceIds) -> Self {
        Self {
            enumerator,
            ids,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the presence poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Identities this probe matches
    pub fn ids(&self) -> &DeviceIds {
        &self.ids
    }

    fn matching(&self) -> Vec<DetectedDevice> {
        let entries = match self.enumerator.devices() {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("{}", e);
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry: UsbDeviceEntry| {
                let class = self.ids.classify(entry.vendor_id, entry.product_id)?;
                Some(DetectedDevice {
                    class,
                    id: UsbId::new(entry.vendor_id, entry.product_id),
                    bus: entry.bus,
                    address: entry.address,
                })
            })
            .collect()
    }

    /// Current device state
    ///
    /// Only one known device is expected. If several are attached the one
    /// enumerated last is reported.
    pub fn probe(&self) -> DeviceState {
        let found = self.matching();
        if found.len() > 1 {
            log::debug!("{} known devices attached, using the last one", found.len());
        }
        found
            .into_iter()
            .last()
            .map(DeviceState::from_device)
            .unwrap_or(DeviceState::None)
    }

    /// The last enumerated device of a given class
    pub fn find(&self, class: DeviceClass) -> Option<DetectedDevice> {
        self.matching().into_iter().rev().find(|d| d.class == class)
    }

    /// Whether a device of the given class is attached
    pub fn is_present(&self, class: DeviceClass) -> bool {
        self.find(class).is_some()
    }

    /// Poll until a device of `class` is present (or absent), or the
    /// timeout elapses
    pub fn wait_for(&self, class: DeviceClass, want_present: bool, timeout: Duration) -> bool {
        self.wait_until(class, want_present, timeout, |_| false) == WaitResult::Reached
    }

    /// Like [`wait_for`](Self::wait_for), calling `on_poll` with the elapsed
    /// time before each poll; a `true` return stops the wait
    ///
    /// A zero timeout returns [`WaitResult::TimedOut`] without polling.
    pub fn wait_until(
        &self,
        class: DeviceClass,
        want_present: bool,
        timeout: Duration,
        mut on_poll: impl FnMut(Duration) -> bool,
    ) -> WaitResult {
        if timeout.is_zero() {
            return WaitResult::TimedOut;
        }

        let start = Instant::now();
        loop {
            if on_poll(start.elapsed()) {
                return WaitResult::Cancelled;
            }
            if self.is_present(class) == want_present {
                log::trace!(
                    "{} {} after {:?}",
                    class,
                    if want_present { "appeared" } else { "gone" },
                    start.elapsed()
                );
                return WaitResult::Reached;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return WaitResult::TimedOut;
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProbeError, Result};
    use crate::ids::{DEFAULT_APPLICATION_ID, DEFAULT_BOOTLOADER_ID, DEFAULT_ISP_ID};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn entry(id: UsbId, address: u8) -> UsbDeviceEntry {
        UsbDeviceEntry {
            vendor_id: id.vendor_id,
            product_id: id.product_id,
            bus: "1".to_string(),
            address,
        }
    }

    /// Returns scripted device lists in turn, repeating the last one
    struct Scripted {
        script: Mutex<VecDeque<Vec<UsbDeviceEntry>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(script: Vec<Vec<UsbDeviceEntry>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: Mutex::new(script.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl UsbEnumerator for Scripted {
        fn devices(&self) -> Result<Vec<UsbDeviceEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script.front().cloned().unwrap_or_default())
            }
        }
    }

    struct Failing;

    impl UsbEnumerator for Failing {
        fn devices(&self) -> Result<Vec<UsbDeviceEntry>> {
            Err(ProbeError::Enumeration("no permission".to_string()))
        }
    }

    fn probe(script: Vec<Vec<UsbDeviceEntry>>) -> (DeviceProbe<Scripted>, Arc<AtomicUsize>) {
        let (enumerator, calls) = Scripted::new(script);
        (
            DeviceProbe::new(enumerator, DeviceIds::default())
                .with_poll_interval(Duration::from_millis(1)),
            calls,
        )
    }

    #[test]
    fn test_probe_classifies() {
        let (p, _) = probe(vec![vec![
            entry(UsbId::new(0x046D, 0xC52B), 1),
            entry(DEFAULT_APPLICATION_ID, 7),
        ]]);
        match p.probe() {
            DeviceState::NativeApplication(d) => assert_eq!(d.address, 7),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_probe_last_enumerated_wins() {
        let (p, _) = probe(vec![vec![
            entry(DEFAULT_BOOTLOADER_ID, 3),
            entry(DEFAULT_ISP_ID, 4),
        ]]);
        assert!(matches!(p.probe(), DeviceState::IspProgrammer(_)));
        assert_eq!(p.find(DeviceClass::NativeBootloader).unwrap().address, 3);
    }

    #[test]
    fn test_probe_is_idempotent() {
        let (p, _) = probe(vec![vec![entry(DEFAULT_BOOTLOADER_ID, 3)]]);
        let first = p.probe();
        assert_eq!(first, p.probe());
        assert_eq!(first.device().unwrap().id, DEFAULT_BOOTLOADER_ID);
    }

    #[test]
    fn test_enumeration_failure_is_none() {
        let p = DeviceProbe::new(Failing, DeviceIds::default());
        assert_eq!(p.probe(), DeviceState::None);
        assert!(!p.is_present(DeviceClass::NativeBootloader));
    }

    #[test]
    fn test_wait_for_appearance() {
        let (p, _) = probe(vec![
            vec![],
            vec![],
            vec![entry(DEFAULT_BOOTLOADER_ID, 5)],
        ]);
        assert!(p.wait_for(
            DeviceClass::NativeBootloader,
            true,
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_wait_for_absence_times_out() {
        let (p, _) = probe(vec![vec![entry(DEFAULT_BOOTLOADER_ID, 5)]]);
        assert!(!p.wait_for(
            DeviceClass::NativeBootloader,
            false,
            Duration::from_millis(20)
        ));
    }

    #[test]
    fn test_zero_budget_does_not_poll() {
        let (p, calls) = probe(vec![vec![entry(DEFAULT_BOOTLOADER_ID, 5)]]);
        assert!(!p.wait_for(DeviceClass::NativeBootloader, true, Duration::ZERO));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_cancelled_by_callback() {
        let (p, _) = probe(vec![vec![]]);
        let mut polls = 0;
        let result = p.wait_until(
            DeviceClass::NativeBootloader,
            true,
            Duration::from_secs(5),
            |_| {
                polls += 1;
                polls == 3
            },
        );
        assert_eq!(result, WaitResult::Cancelled);
        assert_eq!(polls, 3);
    }
}
