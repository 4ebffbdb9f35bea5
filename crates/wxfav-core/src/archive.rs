//! Zip extraction into an isolated scratch directory.
//!
//! Archives carry no favorites database, so the only ordering hint left is the
//! number the client embeds after an underscore in exported file names.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use encoding_rs::GB18030;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{FavError, Result};
use crate::lease::{LeaseSet, DEFAULT_LEASE_LIMIT};
use crate::media::{is_media_path, path_id, MediaEntry, SortKey};
use crate::scratch::{self, ScratchRegistry};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Token for names without an `_<digits>` run; sorts them last.
pub const MISSING_TOKEN_SENTINEL: u64 = 999_999;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(\d+)").unwrap());

/// Number following the first underscore run of digits, or the sentinel.
pub fn underscore_token(name: &str) -> u64 {
    TOKEN_RE
        .captures(name)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(MISSING_TOKEN_SENTINEL)
}

/// `.zip` extension, or a local file header at the start of the file.
pub fn is_zip(path: &Path) -> bool {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if by_ext {
        return true;
    }
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == ZIP_MAGIC)
        .unwrap_or(false)
}

/// Decode a raw entry name: UTF-8, then GB18030 (common for archives made
/// on Chinese Windows), then lossy UTF-8.
fn decode_entry_name(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    let (decoded, _, had_errors) = GB18030.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Relative path for an entry name, `None` when it would leave the scratch
/// directory.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// Extracted archive contents plus leases on its media files.
///
/// Owns its scratch directory: dropping or disposing it releases the leases
/// and removes the directory. Move it into the transfer to keep it alive
/// until copying is done.
#[derive(Debug)]
pub struct ScratchExtraction {
    archive: PathBuf,
    dir: PathBuf,
    leases: LeaseSet,
    entries: Vec<MediaEntry>,
    registry: Arc<ScratchRegistry>,
    disposed: bool,
}

impl ScratchExtraction {
    /// Extract `archive` into a new scratch directory registered with
    /// `registry`.
    pub fn open(archive: &Path, registry: Arc<ScratchRegistry>) -> Result<Self> {
        Self::open_with_lease_limit(archive, registry, DEFAULT_LEASE_LIMIT)
    }

    /// Like [`open`](Self::open), holding at most `lease_limit` file handles.
    /// Media past the limit is still listed and read from disk.
    pub fn open_with_lease_limit(
        archive: &Path,
        registry: Arc<ScratchRegistry>,
        lease_limit: usize,
    ) -> Result<Self> {
        if !archive.is_file() {
            return Err(FavError::not_found("archive", archive));
        }
        if !is_zip(archive) {
            return Err(FavError::UnsupportedFormat {
                path: archive.to_path_buf(),
            });
        }

        let dir = scratch::create_scratch_dir()?;
        registry.register(&dir);
        let mut extraction = Self {
            archive: archive.to_path_buf(),
            dir,
            leases: LeaseSet::with_limit(lease_limit),
            entries: Vec::new(),
            registry,
            disposed: false,
        };

        // On error the value is dropped here, which removes the directory.
        let written = extract_all(archive, &extraction.dir)?;
        info!(archive = %archive.display(), files = written, "archive extracted");
        extraction.collect_entries();
        Ok(extraction)
    }

    fn collect_entries(&mut self) {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.dir).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable extracted path");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_media_path(path) {
                continue;
            }
            match self.leases.acquire(path) {
                Ok(true) => {}
                Ok(false) => debug!(path = %path.display(), "lease limit reached, reading from disk"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot lease extracted file, reading from disk")
                }
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let token = underscore_token(&name);
            entries.push(MediaEntry::new(
                path_id(path),
                name,
                path.to_path_buf(),
                Some(SortKey::Token(token)),
            ));
        }

        entries.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.name.cmp(&b.name)));
        info!(
            archive = %self.archive.display(),
            count = entries.len(),
            leases = self.leases.len(),
            "media files found in archive"
        );
        self.entries = entries;
    }

    /// Media entries in archive order. Computed once at extraction.
    pub fn entries(&self) -> &[MediaEntry] {
        &self.entries
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn leases(&self) -> &LeaseSet {
        &self.leases
    }

    /// Release leases and remove the scratch directory. Returns whether the
    /// directory is gone. Safe to call more than once.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return true;
        }
        self.disposed = true;
        self.leases.release_all();
        let removed = scratch::remove_dir_robust(&self.dir);
        if removed {
            self.registry.unregister(&self.dir);
        }
        removed
    }
}

impl Drop for ScratchExtraction {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Extract every entry of `archive` below `dest`. Returns the number of files
/// written; entries that cannot be written are logged and skipped.
fn extract_all(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive)
        .map_err(|e| FavError::io(format!("open archive {}", archive.display()), e))?;
    let mut zip = ZipArchive::new(file)?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = decode_entry_name(entry.name_raw());
        let Some(relative) = safe_relative_path(&name) else {
            warn!(entry = %name, "skipping entry outside the extraction directory");
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            if let Err(e) = fs::create_dir_all(&target) {
                warn!(path = %target.display(), error = %e, "cannot create directory");
            }
            continue;
        }

        let result = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| File::create(&target))
            .and_then(|mut out| io::copy(&mut entry, &mut out));
        match result {
            Ok(bytes) => {
                debug!(entry = %name, bytes, "extracted");
                written += 1;
            }
            Err(e) => warn!(entry = %name, error = %e, "cannot extract entry"),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_underscore_token() {
        assert_eq!(underscore_token("fav_12_photo.jpg"), 12);
        assert_eq!(underscore_token("IMG2023.jpg"), MISSING_TOKEN_SENTINEL);
        assert_eq!(underscore_token("a_7.png"), 7);
    }

    #[test]
    fn test_decode_gb18030_name() {
        let (bytes, _, _) = GB18030.encode("收藏/图片_1.jpg");
        assert!(std::str::from_utf8(&bytes).is_err());
        assert_eq!(decode_entry_name(&bytes), "收藏/图片_1.jpg");
        assert_eq!(decode_entry_name("plain.jpg".as_bytes()), "plain.jpg");
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(safe_relative_path("a/b.jpg"), Some(PathBuf::from("a").join("b.jpg")));
        assert_eq!(safe_relative_path("a\\b.jpg"), Some(PathBuf::from("a").join("b.jpg")));
        assert_eq!(safe_relative_path("../evil.jpg"), None);
        assert_eq!(safe_relative_path("/etc/passwd"), None);
        assert_eq!(safe_relative_path("./"), None);
    }

    #[test]
    fn test_zip_detection() {
        let dir = tempdir().unwrap();
        let renamed = dir.path().join("export.bin");
        build_zip(&renamed, &[("a.jpg", b"x")]);
        assert!(is_zip(&renamed));
        let text = dir.path().join("notes.txt");
        fs::write(&text, b"hello").unwrap();
        assert!(!is_zip(&text));
        assert!(is_zip(Path::new("whatever.ZIP")));
    }

    #[test]
    fn test_extract_orders_by_token() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("fav.zip");
        build_zip(
            &archive,
            &[
                ("fav_10.jpg", b"ten"),
                ("nested/fav_2.png", b"two"),
                ("cover.jpg", b"none"),
                ("readme.txt", b"skip"),
                ("fav_1.mp4", b"one"),
            ],
        );
        let registry = Arc::new(ScratchRegistry::new());
        let mut extraction = ScratchExtraction::open(&archive, registry.clone()).unwrap();
        let names: Vec<_> = extraction.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["fav_1.mp4", "fav_2.png", "fav_10.jpg", "cover.jpg"]);
        assert_eq!(extraction.leases().len(), 4);
        assert_eq!(registry.tracked(), vec![extraction.dir().to_path_buf()]);

        let scratch_dir = extraction.dir().to_path_buf();
        assert!(extraction.dispose());
        assert!(!scratch_dir.exists());
        assert!(registry.tracked().is_empty());
    }

    #[test]
    fn test_entries_past_lease_limit_are_kept() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("many.zip");
        let names: Vec<String> = (1..=25).map(|i| format!("fav_{}.jpg", i)).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"data"[..])).collect();
        build_zip(&archive, &files);

        let extraction =
            ScratchExtraction::open_with_lease_limit(&archive, Arc::new(ScratchRegistry::new()), 5).unwrap();
        assert_eq!(extraction.entries().len(), 25);
        assert_eq!(extraction.leases().len(), 5);
        let last = &extraction.entries()[24];
        assert_eq!(last.name, "fav_25.jpg");
        assert_eq!(extraction.leases().read(&last.path).unwrap(), b"data");
    }

    #[test]
    fn test_drop_removes_scratch() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("fav.zip");
        build_zip(&archive, &[("a_1.jpg", b"x")]);
        let registry = Arc::new(ScratchRegistry::new());
        let extraction = ScratchExtraction::open(&archive, registry.clone()).unwrap();
        let scratch_dir = extraction.dir().to_path_buf();
        drop(extraction);
        assert!(!scratch_dir.exists());
        assert!(registry.tracked().is_empty());
    }

    #[test]
    fn test_empty_archive_is_not_an_error() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        build_zip(&archive, &[("only.txt", b"x")]);
        let extraction = ScratchExtraction::open(&archive, Arc::new(ScratchRegistry::new())).unwrap();
        assert!(extraction.entries().is_empty());
    }

    #[test]
    fn test_open_errors() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ScratchRegistry::new());
        let missing = ScratchExtraction::open(&dir.path().join("nope.zip"), registry.clone());
        assert!(matches!(missing, Err(FavError::NotFound { .. })));

        let rar = dir.path().join("fav.rar");
        fs::write(&rar, b"Rar!\x1a\x07\x00").unwrap();
        let unsupported = ScratchExtraction::open(&rar, registry.clone());
        assert!(matches!(unsupported, Err(FavError::UnsupportedFormat { .. })));

        let broken = dir.path().join("broken.zip");
        fs::write(&broken, b"PK\x03\x04 truncated").unwrap();
        assert!(matches!(
            ScratchExtraction::open(&broken, registry.clone()),
            Err(FavError::Zip(_))
        ));
        assert!(registry.tracked().is_empty());
    }
}
