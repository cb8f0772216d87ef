use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{RunLock, StateStore, StoreError};
use crate::domain::{BatteryMode, PeakWindowState};

/// Process-local store for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    peak_state: Mutex<Option<PeakWindowState>>,
    mode: Mutex<Option<BatteryMode>>,
    locked: Arc<AtomicBool>,
    fail_writes: AtomicBool,
    writes: Mutex<u32>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(peak_state: Option<PeakWindowState>, mode: Option<BatteryMode>) -> Self {
        Self {
            peak_state: Mutex::new(peak_state),
            mode: Mutex::new(mode),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail with an I/O error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> u32 {
        *self.writes.lock()
    }

    pub fn peak_state(&self) -> Option<PeakWindowState> {
        *self.peak_state.lock()
    }

    pub fn mode(&self) -> Option<BatteryMode> {
        *self.mode.lock()
    }

    fn check_writable(&self, record: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: PathBuf::from(format!("memory://{record}")),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated write failure"),
            });
        }
        *self.writes.lock() += 1;
        Ok(())
    }
}

impl StateStore for InMemoryStateStore {
    fn load_peak_state(&self) -> Result<Option<PeakWindowState>, StoreError> {
        Ok(*self.peak_state.lock())
    }

    fn save_peak_state(&self, state: &PeakWindowState) -> Result<(), StoreError> {
        self.check_writable("peak_state")?;
        *self.peak_state.lock() = Some(*state);
        Ok(())
    }

    fn load_commanded_mode(&self) -> Result<Option<BatteryMode>, StoreError> {
        Ok(*self.mode.lock())
    }

    fn save_commanded_mode(&self, mode: BatteryMode) -> Result<(), StoreError> {
        self.check_writable("last_mode")?;
        *self.mode.lock() = Some(mode);
        Ok(())
    }

    fn acquire_run_lock(&self) -> Result<RunLock, StoreError> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StoreError::Locked {
                path: PathBuf::from("memory://dispatch.lock"),
            });
        }
        let locked = Arc::clone(&self.locked);
        Ok(RunLock::new(move || locked.store(false, Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_round_trip() {
        let store = InMemoryStateStore::new();
        let lock = store.acquire_run_lock().unwrap();
        assert!(store.acquire_run_lock().is_err());
        drop(lock);
        assert!(store.acquire_run_lock().is_ok());
    }

    #[test]
    fn test_failing_writes_leave_state_untouched() {
        let store = InMemoryStateStore::with_state(None, Some(BatteryMode::SolarFirst));
        store.fail_writes(true);
        assert!(store.save_commanded_mode(BatteryMode::GridCharge).is_err());
        assert_eq!(store.mode(), Some(BatteryMode::SolarFirst));
        assert_eq!(store.write_count(), 0);
    }
}
