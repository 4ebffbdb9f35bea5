use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::media::is_media_path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Delete every media file below `root` (the auto-clean step after a
/// successful save). Other files and the directories are left in place.
/// Paths that cannot be scanned count as failures.
pub fn purge_media(root: &Path) -> PurgeReport {
    let mut report = PurgeReport::default();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // Whatever sits below an unreadable directory stays behind
                warn!(error = %e, "cannot scan cache path");
                report.failed += 1;
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_media_path(path) {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot delete cached file");
                report.failed += 1;
            }
        }
    }
    info!(root = %root.display(), deleted = report.deleted, failed = report.failed, "cache cleaned");
    report
}
