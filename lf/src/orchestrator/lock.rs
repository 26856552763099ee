//! Exclusive run lock over a store directory

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use fs2::FileExt;
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "run.lock";

/// Held for the duration of a run; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting; fails if another run holds it
    pub fn acquire(dir: &Path) -> Result<Self> {
        debug!(dir = %dir.display(), "RunLock::acquire: called");
        fs::create_dir_all(dir).context("Failed to create store directory")?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| eyre!("Another run is in progress (lock held on {})", path.display()))?;
        debug!(path = %path.display(), "RunLock::acquire: locked");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}
