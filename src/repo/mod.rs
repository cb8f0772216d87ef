//! Durable controller state: the peak window record, the last commanded mode
//! and the single-flight run lock guarding both.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{BatteryMode, PeakWindowState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Run lock held at {}", path.display())]
    Locked { path: PathBuf },
}

/// Holds the run lock until dropped
pub struct RunLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RunLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Persistence for the two records that outlive an invocation.
///
/// Writes must replace the previous record atomically. Missing or unreadable
/// records load as `None`.
pub trait StateStore: Send + Sync {
    fn load_peak_state(&self) -> Result<Option<PeakWindowState>, StoreError>;
    fn save_peak_state(&self, state: &PeakWindowState) -> Result<(), StoreError>;
    fn load_commanded_mode(&self) -> Result<Option<BatteryMode>, StoreError>;
    fn save_commanded_mode(&self, mode: BatteryMode) -> Result<(), StoreError>;
    /// Fails with [`StoreError::Locked`] while another run holds the lock.
    fn acquire_run_lock(&self) -> Result<RunLock, StoreError>;
}
