//! Scratch directories for archive extraction, and the registry that makes
//! sure none of them outlive the process.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{FavError, Result};

pub const SCRATCH_PREFIX: &str = "archive_extract_";

/// Pause between the forced removal and the final retry.
const RETRY_DELAY: Duration = Duration::from_millis(500);

const PROBE_FILE: &str = ".write_probe";

/// Tracks every scratch directory created during the process lifetime.
///
/// Created once by the caller and shared through `Arc`; `cleanup_all` is
/// called at shutdown to sweep anything a transfer did not remove.
#[derive(Debug, Default)]
pub struct ScratchRegistry {
    dirs: Mutex<Vec<PathBuf>>,
}

impl ScratchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.dirs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, dir: &Path) {
        let mut dirs = self.lock();
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_path_buf());
        }
    }

    pub fn unregister(&self, dir: &Path) {
        self.lock().retain(|d| d != dir);
    }

    /// Directories currently tracked.
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Remove every tracked directory. Returns how many could not be removed;
    /// those stay tracked.
    pub fn cleanup_all(&self) -> usize {
        let dirs = std::mem::take(&mut *self.lock());
        if dirs.is_empty() {
            return 0;
        }
        info!(count = dirs.len(), "sweeping scratch directories");
        let leftover: Vec<PathBuf> = dirs.into_iter().filter(|d| !remove_dir_robust(d)).collect();
        let failed = leftover.len();
        self.lock().extend(leftover);
        failed
    }
}

/// Create a fresh scratch directory and make sure it is writable.
///
/// Tries the system temp dir first, then the directory of the running
/// executable.
pub fn create_scratch_dir() -> Result<PathBuf> {
    let mut last_err = None;
    for base in scratch_bases() {
        match create_in(&base) {
            Ok(dir) => {
                info!(path = %dir.display(), "created scratch directory");
                return Ok(dir);
            }
            Err(e) => {
                warn!(base = %base.display(), error = %e, "cannot use location for scratch directory");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        FavError::io(
            "no location for scratch directory",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        )
    }))
}

fn scratch_bases() -> Vec<PathBuf> {
    let mut bases = vec![env::temp_dir()];
    if let Some(exe_dir) = env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        bases.push(exe_dir);
    }
    bases
}

fn create_in(base: &Path) -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(base)
        .map_err(|e| FavError::io(format!("create scratch directory in {}", base.display()), e))?
        .keep();
    if let Err(e) = probe_writable(&dir) {
        let _ = fs::remove_dir_all(&dir);
        return Err(e);
    }
    Ok(dir)
}

/// Write and delete a throwaway file in `dir`.
pub fn probe_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(PROBE_FILE);
    fs::write(&probe, b"probe")
        .map_err(|e| FavError::io(format!("directory not writable: {}", dir.display()), e))?;
    fs::remove_file(&probe)
        .map_err(|e| FavError::io(format!("cannot remove probe file in {}", dir.display()), e))
}

/// Remove `dir` with escalation: recursive remove, forced OS removal, a short
/// wait, one more recursive remove. Returns whether the directory is gone.
/// A surviving directory is logged as a leak candidate.
pub fn remove_dir_robust(dir: &Path) -> bool {
    if !dir.exists() {
        return true;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!(path = %dir.display(), "removed scratch directory");
            return true;
        }
        Err(e) => warn!(path = %dir.display(), error = %e, "remove failed, forcing"),
    }

    force_remove(dir);
    thread::sleep(RETRY_DELAY);
    if dir.exists() {
        let _ = fs::remove_dir_all(dir);
    }
    if dir.exists() {
        warn!(path = %dir.display(), "scratch directory survived cleanup, leak candidate");
        false
    } else {
        true
    }
}

#[cfg(windows)]
fn force_remove(dir: &Path) {
    let status = Command::new("cmd").args(["/c", "rd", "/s", "/q"]).arg(dir).status();
    if let Err(e) = status {
        warn!(path = %dir.display(), error = %e, "forced removal failed to start");
    }
}

#[cfg(not(windows))]
fn force_remove(dir: &Path) {
    let status = Command::new("rm").arg("-rf").arg(dir).status();
    if let Err(e) = status {
        warn!(path = %dir.display(), error = %e, "forced removal failed to start");
    }
}
