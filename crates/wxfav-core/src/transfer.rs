//! Copy discovered entries into a destination with sequence-prefixed names.
//!
//! Entries are written in the order given; the sequence prefix is the only
//! thing that carries that order onto disk, so nothing here re-sorts.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::archive::ScratchExtraction;
use crate::cancel::CancellationToken;
use crate::error::{FavError, Result};
use crate::lease::LeaseSet;
use crate::media::MediaEntry;
use crate::scratch::probe_writable;
use crate::ProgressCallback;

/// Upper bound on `_<n>` suffixes tried for one colliding name.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferPhase {
    Idle,
    Preparing,
    Copying,
    Cleanup,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub saved: usize,
    pub failed: usize,
    /// Stopped early through the cancellation token
    pub cancelled: bool,
    /// Written files, in entry order
    pub outputs: Vec<PathBuf>,
}

/// Where the entries live. An archive extraction is owned by the transfer and
/// cleaned up when it finishes, however it finishes.
#[derive(Debug)]
pub enum TransferSource {
    Directory,
    Archive(ScratchExtraction),
}

impl TransferSource {
    fn leases(&self) -> Option<&LeaseSet> {
        match self {
            TransferSource::Directory => None,
            TransferSource::Archive(extraction) => Some(extraction.leases()),
        }
    }
}

fn enter(phase: &mut TransferPhase, next: TransferPhase) {
    debug!(from = ?*phase, to = ?next, "transfer phase");
    *phase = next;
}

/// Copy `entries` into `dest`, assigning each its `sequence`.
///
/// Only destination setup errors are returned; per-entry failures are logged
/// and counted in the report.
pub fn transfer(
    entries: &mut [MediaEntry],
    dest: &Path,
    source: TransferSource,
    progress: &ProgressCallback<'_>,
    cancel: Option<&CancellationToken>,
) -> Result<TransferReport> {
    let mut phase = TransferPhase::Idle;

    // Runs on every exit path, including unwinding.
    let source = scopeguard::guard(source, |mut source| {
        if let TransferSource::Archive(extraction) = &mut source {
            if !extraction.dispose() {
                warn!(path = %extraction.dir().display(), "scratch directory left behind");
            }
        }
    });

    enter(&mut phase, TransferPhase::Preparing);
    fs::create_dir_all(dest)
        .map_err(|e| FavError::io(format!("create destination {}", dest.display()), e))?;
    probe_writable(dest)?;

    enter(&mut phase, TransferPhase::Copying);
    let report = copy_all(entries, dest, source.leases(), progress, cancel);

    enter(&mut phase, TransferPhase::Cleanup);
    drop(source);
    enter(&mut phase, TransferPhase::Done);

    info!(
        saved = report.saved,
        failed = report.failed,
        cancelled = report.cancelled,
        dest = %dest.display(),
        "transfer finished"
    );
    Ok(report)
}

fn copy_all(
    entries: &mut [MediaEntry],
    dest: &Path,
    leases: Option<&LeaseSet>,
    progress: &ProgressCallback<'_>,
    cancel: Option<&CancellationToken>,
) -> TransferReport {
    let mut report = TransferReport::default();
    let total = entries.len();
    if total == 0 {
        return report;
    }
    let width = sequence_width(total);

    for (i, entry) in entries.iter_mut().enumerate() {
        if let Some(Err(e)) = cancel.map(CancellationToken::check) {
            warn!(done = i, total, error = %e, "transfer stopped");
            report.cancelled = true;
            break;
        }

        let sequence = format!("{:0width$}", i + 1, width = width);
        let base = sanitize_name(&entry.name, &entry.path);
        entry.sequence = Some(sequence.clone());

        match copy_entry(entry, dest, &sequence, &base, leases) {
            Ok(target) => {
                debug!(from = %entry.path.display(), to = %target.display(), "saved");
                report.saved += 1;
                report.outputs.push(target);
            }
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "cannot save file");
                report.failed += 1;
            }
        }

        let percent = ((i + 1) * 100 / total) as u8;
        progress(percent, &format!("saved {}/{}: {}", i + 1, total, entry.name));
    }
    report
}

/// Digits needed to print `count`.
pub fn sequence_width(count: usize) -> usize {
    count.to_string().len()
}

/// Replace characters that are invalid in file names and normalize to NFC.
/// Empty and dot-leading results get a placeholder built from a hash of the
/// source path.
pub fn sanitize_name(name: &str, source: &Path) -> String {
    let cleaned: String = name
        .nfc()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if !cleaned.is_empty() && !cleaned.starts_with('.') {
        return cleaned;
    }

    let digest = hex::encode(Sha256::digest(source.to_string_lossy().as_bytes()));
    let ext = Path::new(&cleaned)
        .extension()
        .or_else(|| source.extension())
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("file_{}{}", &digest[..8], ext)
}

fn split_name(base: &str) -> (&str, &str) {
    match base.rfind('.') {
        Some(idx) if idx > 0 => base.split_at(idx),
        _ => (base, ""),
    }
}

/// `<seq>_<base>` first, then `<seq>_<stem>_<n><ext>`.
fn candidate_name(sequence: &str, base: &str, n: u32) -> String {
    if n == 0 {
        return format!("{}_{}", sequence, base);
    }
    let (stem, ext) = split_name(base);
    format!("{}_{}_{}{}", sequence, stem, n, ext)
}

fn copy_entry(
    entry: &MediaEntry,
    dest: &Path,
    sequence: &str,
    base: &str,
    leases: Option<&LeaseSet>,
) -> io::Result<PathBuf> {
    let bytes = match leases {
        Some(leases) => leases.read(&entry.path)?,
        None => fs::read(&entry.path)?,
    };
    let modified = fs::metadata(&entry.path).and_then(|m| m.modified()).ok();

    let target = write_unique(dest, sequence, base, &bytes)?;

    if let Some(modified) = modified {
        if let Err(e) = filetime::set_file_mtime(&target, FileTime::from_system_time(modified)) {
            debug!(path = %target.display(), error = %e, "cannot copy modification time");
        }
    }

    let size = fs::metadata(&target)?.len();
    if size == 0 {
        let _ = fs::remove_file(&target);
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("written file is empty: {}", target.display()),
        ));
    }
    Ok(target)
}

/// Write `bytes` to a temp file in `dest`, then move it to the first free
/// candidate name without replacing anything.
fn write_unique(dest: &Path, sequence: &str, base: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let mut tmp = NamedTempFile::new_in(dest)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    for n in 0..=MAX_COLLISION_SUFFIX {
        let target = dest.join(candidate_name(sequence, base, n));
        if target.exists() {
            continue;
        }
        match tmp.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(e.error),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", base, dest.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn entry(dir: &Path, name: &str, data: &[u8]) -> MediaEntry {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        MediaEntry::new(name.to_string(), name.to_string(), path, None)
    }

    fn no_progress(_: u8, _: &str) {}

    #[test]
    fn test_sanitize_name() {
        let src = Path::new("/src/x.png");
        assert_eq!(sanitize_name("a:b*c?.jpg", src), "a_b_c_.jpg");
        assert_eq!(sanitize_name("dir/name.jpg", src), "dir_name.jpg");
        // Decomposed e + combining acute becomes one code point
        assert_eq!(sanitize_name("cafe\u{301}.jpg", src), "caf\u{e9}.jpg");

        let placeholder = sanitize_name("", src);
        assert!(placeholder.starts_with("file_"));
        assert!(placeholder.ends_with(".png"));
        assert_eq!(placeholder.len(), "file_".len() + 8 + ".png".len());
        assert!(sanitize_name(".hidden", src).starts_with("file_"));
    }

    #[test]
    fn test_sequence_width() {
        assert_eq!(sequence_width(9), 1);
        assert_eq!(sequence_width(12), 2);
        assert_eq!(sequence_width(100), 3);
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("03", "a.jpg", 0), "03_a.jpg");
        assert_eq!(candidate_name("03", "a.jpg", 2), "03_a_2.jpg");
        assert_eq!(candidate_name("1", "noext", 1), "1_noext_1");
    }

    #[test]
    fn test_existing_file_not_overwritten() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(dest.path().join("1_a.jpg"), b"old").unwrap();
        let mut entries = vec![entry(src.path(), "a.jpg", b"new")];

        let report = transfer(&mut entries, dest.path(), TransferSource::Directory, &no_progress, None)
            .unwrap();
        assert_eq!(report.saved, 1);
        assert_eq!(fs::read(dest.path().join("1_a.jpg")).unwrap(), b"old");
        assert_eq!(fs::read(dest.path().join("1_a_1.jpg")).unwrap(), b"new");
        assert_eq!(entries[0].sequence.as_deref(), Some("1"));
    }

    #[test]
    fn test_empty_source_counts_as_failure() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut entries = vec![entry(src.path(), "empty.jpg", b""), entry(src.path(), "b.jpg", b"b")];
        let report = transfer(&mut entries, dest.path(), TransferSource::Directory, &no_progress, None)
            .unwrap();
        assert_eq!((report.saved, report.failed), (1, 1));
        assert!(!dest.path().join("1_empty.jpg").exists());
        assert!(dest.path().join("2_b.jpg").exists());
    }

    #[test]
    fn test_progress_reaches_100() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut entries: Vec<_> = (0..3)
            .map(|i| entry(src.path(), &format!("{}.jpg", i), b"x"))
            .collect();
        let seen = Mutex::new(Vec::new());
        let progress = |p: u8, _: &str| seen.lock().unwrap().push(p);
        transfer(&mut entries, dest.path(), TransferSource::Directory, &progress, None).unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_progress_reported_for_every_entry() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut entries: Vec<_> = (0..10)
            .map(|i| entry(src.path(), &format!("{}.jpg", i), b"x"))
            .collect();
        let seen = Mutex::new(Vec::new());
        let progress = |p: u8, message: &str| seen.lock().unwrap().push((p, message.to_string()));
        transfer(&mut entries, dest.path(), TransferSource::Directory, &progress, None).unwrap();

        let seen = seen.into_inner().unwrap();
        let percents: Vec<u8> = seen.iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, [10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(seen[0].1, "saved 1/10: 0.jpg");
    }

    #[test]
    fn test_cancel_mid_transfer_keeps_saved_files() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut entries: Vec<_> = (0..4)
            .map(|i| entry(src.path(), &format!("{}.jpg", i), b"x"))
            .collect();
        let token = CancellationToken::new();
        let handler_side = token.clone();
        let progress = move |p: u8, _: &str| {
            if p >= 50 {
                handler_side.cancel();
            }
        };
        let report =
            transfer(&mut entries, dest.path(), TransferSource::Directory, &progress, Some(&token)).unwrap();
        assert!(report.cancelled);
        assert_eq!((report.saved, report.failed), (2, 0));
        assert!(dest.path().join("2_1.jpg").exists());
        assert!(!dest.path().join("3_2.jpg").exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut entries = vec![entry(src.path(), "a.jpg", b"a")];
        let token = CancellationToken::new();
        token.cancel();
        let report = transfer(
            &mut entries,
            dest.path(),
            TransferSource::Directory,
            &no_progress,
            Some(&token),
        )
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.saved, 0);
    }

    #[test]
    fn test_unwritable_destination_is_an_error() {
        let src = tempdir().unwrap();
        let blocker = src.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut entries = vec![entry(src.path(), "a.jpg", b"a")];
        let err = transfer(
            &mut entries,
            &blocker.join("out"),
            TransferSource::Directory,
            &no_progress,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FavError::PermissionOrIo { .. }));
    }
}
