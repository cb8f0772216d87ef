use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::{RunLock, StateStore, StoreError};
use crate::domain::{BatteryMode, PeakWindowState};

const PEAK_STATE_FILE: &str = "peak_state.txt";
const MODE_FILE: &str = "last_mode.txt";
const LOCK_FILE: &str = "dispatch.lock";
const RECLAIM_FILE: &str = "dispatch.lock.reclaim";

/// Plain-text state files in one directory, replaced via write-then-rename
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
    stale_lock_after: Duration,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>, stale_lock_after: Duration) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            stale_lock_after,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_record(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn write_record(&self, name: &str, content: &str) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        let temp_path = path.with_extension("tmp");
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let mut file = fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        // Atomic replace
        fs::rename(&temp_path, &path).map_err(io_err)?;
        debug!(path = %path.display(), %content, "state record written");
        Ok(())
    }

    fn lock_is_stale(&self, path: &Path) -> bool {
        let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.stale_lock_after)
            .unwrap_or(false)
    }

    fn try_create_lock(&self, path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(
            file,
            "pid={} acquired={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load_peak_state(&self) -> Result<Option<PeakWindowState>, StoreError> {
        let Some(raw) = self.read_record(PEAK_STATE_FILE)? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable peak state record");
                Ok(None)
            }
        }
    }

    fn save_peak_state(&self, state: &PeakWindowState) -> Result<(), StoreError> {
        self.write_record(PEAK_STATE_FILE, &state.to_string())
    }

    fn load_commanded_mode(&self) -> Result<Option<BatteryMode>, StoreError> {
        let Some(raw) = self.read_record(MODE_FILE)? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(mode) => Ok(Some(mode)),
            Err(_) => {
                warn!(record = %raw, "ignoring unreadable commanded mode record");
                Ok(None)
            }
        }
    }

    fn save_commanded_mode(&self, mode: BatteryMode) -> Result<(), StoreError> {
        self.write_record(MODE_FILE, &mode.to_string())
    }

    fn acquire_run_lock(&self) -> Result<RunLock, StoreError> {
        let path = self.dir.join(LOCK_FILE);
        match self.try_create_lock(&path) {
            Ok(()) => return Ok(held_lock(path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(source) => return Err(StoreError::Io { path, source }),
        }
        if !self.lock_is_stale(&path) {
            return Err(StoreError::Locked { path });
        }
        self.reclaim_stale_lock(path)
    }
}

impl FileStateStore {
    /// Only the holder of the reclaim marker may delete the run lock, and it
    /// re-checks staleness after taking the marker. A lock created by a
    /// concurrent reclaimer is therefore never removed.
    fn reclaim_stale_lock(&self, path: PathBuf) -> Result<RunLock, StoreError> {
        let marker = self.dir.join(RECLAIM_FILE);
        match self.try_create_lock(&marker) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Left behind by a run that died mid-reclaim
                if self.lock_is_stale(&marker) {
                    warn!(path = %marker.display(), "removing abandoned reclaim marker");
                    if let Err(e) = fs::remove_file(&marker) {
                        warn!(
                            path = %marker.display(),
                            error = %e,
                            "failed to remove reclaim marker"
                        );
                    }
                }
                return Err(StoreError::Locked { path });
            }
            Err(source) => return Err(StoreError::Io { path: marker, source }),
        }

        let result = self.replace_if_stale(path);
        if let Err(e) = fs::remove_file(&marker) {
            warn!(path = %marker.display(), error = %e, "failed to release reclaim marker");
        }
        result
    }

    fn replace_if_stale(&self, path: PathBuf) -> Result<RunLock, StoreError> {
        if self.lock_is_stale(&path) {
            warn!(
                path = %path.display(),
                stale_after_secs = self.stale_lock_after.as_secs(),
                "reclaiming abandoned run lock"
            );
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Io { path, source }),
            }
        }
        match self.try_create_lock(&path) {
            Ok(()) => Ok(held_lock(path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::Locked { path }),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

fn held_lock(path: PathBuf) -> RunLock {
    RunLock::new(move || {
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to release run lock");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileStateStore {
        FileStateStore::new(dir.path().join("state"), Duration::from_secs(1800)).unwrap()
    }

    #[test]
    fn test_missing_records_load_as_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.load_peak_state().unwrap().is_none());
        assert!(store.load_commanded_mode().unwrap().is_none());
    }

    #[test]
    fn test_records_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        {
            let store = store(&dir);
            store.save_peak_state(&PeakWindowState::peak(date)).unwrap();
            store.save_commanded_mode(BatteryMode::GridCharge).unwrap();
        }
        let store = store(&dir);
        assert_eq!(
            store.load_peak_state().unwrap(),
            Some(PeakWindowState::peak(date))
        );
        assert_eq!(
            store.load_commanded_mode().unwrap(),
            Some(BatteryMode::GridCharge)
        );

        let on_disk = fs::read_to_string(store.dir().join(PEAK_STATE_FILE)).unwrap();
        assert_eq!(on_disk, "Peak-2025-06-01");
        assert!(!store.dir().join("peak_state.tmp").exists());
    }

    #[test]
    fn test_corrupt_records_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.dir().join(PEAK_STATE_FILE), "garbage").unwrap();
        fs::write(store.dir().join(MODE_FILE), "SELF_CONSUMPTION").unwrap();
        assert!(store.load_peak_state().unwrap().is_none());
        assert!(store.load_commanded_mode().unwrap().is_none());
    }

    #[test]
    fn test_run_lock_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let lock = store.acquire_run_lock().unwrap();
        assert!(store.dir().join(LOCK_FILE).exists());
        assert!(matches!(
            store.acquire_run_lock(),
            Err(StoreError::Locked { .. })
        ));

        drop(lock);
        assert!(!store.dir().join(LOCK_FILE).exists());
        assert!(store.acquire_run_lock().is_ok());
    }

    fn backdate(path: &Path, by: Duration) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let lock_path = store.dir().join(LOCK_FILE);
        fs::write(&lock_path, "pid=1").unwrap();
        backdate(&lock_path, Duration::from_secs(3600));

        let lock = store.acquire_run_lock().unwrap();
        assert!(!store.dir().join(RECLAIM_FILE).exists());
        assert!(matches!(
            store.acquire_run_lock(),
            Err(StoreError::Locked { .. })
        ));
        drop(lock);
    }

    #[test]
    fn test_fresh_lock_is_not_reclaimed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.dir().join(LOCK_FILE), "pid=1").unwrap();

        assert!(matches!(
            store.acquire_run_lock(),
            Err(StoreError::Locked { .. })
        ));
    }

    #[test]
    fn test_abandoned_reclaim_marker_is_cleared() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let lock_path = store.dir().join(LOCK_FILE);
        let marker = store.dir().join(RECLAIM_FILE);
        fs::write(&lock_path, "pid=1").unwrap();
        fs::write(&marker, "pid=1").unwrap();
        backdate(&lock_path, Duration::from_secs(3600));
        backdate(&marker, Duration::from_secs(3600));

        assert!(store.acquire_run_lock().is_err());
        assert!(!marker.exists());
        assert!(store.acquire_run_lock().is_ok());
    }

    #[test]
    fn test_concurrent_reclaim_has_single_holder() {
        use std::sync::{Arc, Barrier};

        const THREADS: usize = 6;
        for _ in 0..100 {
            let dir = TempDir::new().unwrap();
            let store = store(&dir);
            let lock_path = store.dir().join(LOCK_FILE);
            fs::write(&lock_path, "pid=1").unwrap();
            backdate(&lock_path, Duration::from_secs(3600));

            let barrier = Arc::new(Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let store = store.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.acquire_run_lock()
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let holders = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(holders, 1);
            assert!(results
                .iter()
                .all(|r| matches!(r, Ok(_) | Err(StoreError::Locked { .. }))));
        }
    }
}
