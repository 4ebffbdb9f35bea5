use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Image and video extensions recognised as media (lowercase, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "wmv", "flv"];

/// Lowercased extension of `path`, without the dot.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_media_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext) || VIDEO_EXTENSIONS.contains(&ext)
}

pub fn is_media_path(path: &Path) -> bool {
    extension_lower(path).is_some_and(|e| is_media_extension(&e))
}

/// Hex digest of the full path string; used as id when no store id exists.
pub fn path_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(&digest[..16])
}

/// Ordering value of one entry. One variant per source, so keys coming from
/// different sources never compare against each other within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SortKey {
    /// Rank in the order returned by the structured store.
    Store(u64),
    /// File modification time.
    Modified(DateTime<Utc>),
    /// Number extracted from the file name (archive order proxy).
    Token(u64),
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Store(rank) => write!(f, "store #{}", rank),
            SortKey::Modified(t) => write!(
                f,
                "modified {}",
                t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            SortKey::Token(n) => write!(f, "token {}", n),
        }
    }
}

/// Which ordering source won for a discovery run, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderingStrategy {
    StoreOrder,
    TimeOrder,
    FilenameNumericOrder,
    NoOrder,
}

impl OrderingStrategy {
    /// Human readable provenance, suitable for showing to the user.
    pub fn describe(self) -> &'static str {
        match self {
            OrderingStrategy::StoreOrder => {
                "store order (best): taken from the favorites database"
            }
            OrderingStrategy::TimeOrder => {
                "time order (good): file modification times, likely the order items were added"
            }
            OrderingStrategy::FilenameNumericOrder => {
                "filename order (fallback): modification times mostly identical, numbers in file names used as tie-break"
            }
            OrderingStrategy::NoOrder => "no order (worst): file system order",
        }
    }

    pub fn is_degraded(self) -> bool {
        self != OrderingStrategy::StoreOrder
    }
}

impl fmt::Display for OrderingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderingStrategy::StoreOrder => "store",
            OrderingStrategy::TimeOrder => "time",
            OrderingStrategy::FilenameNumericOrder => "filename-number",
            OrderingStrategy::NoOrder => "none",
        };
        f.write_str(s)
    }
}

/// One discovered media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEntry {
    /// Store row id, or a hash of the full path
    pub id: String,
    /// Display / save file name, always with an extension
    pub name: String,
    /// Absolute location at discovery time
    pub path: PathBuf,
    pub sort_key: Option<SortKey>,
    /// Zero padded rank, assigned right before transfer
    #[serde(default)]
    pub sequence: Option<String>,
}

impl MediaEntry {
    pub fn new(id: String, name: String, path: PathBuf, sort_key: Option<SortKey>) -> Self {
        Self {
            id,
            name,
            path,
            sort_key,
            sequence: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_extensions() {
        assert!(is_media_path(Path::new("a/b/IMG_1.JPG")));
        assert!(is_media_path(Path::new("clip.mkv")));
        assert!(!is_media_path(Path::new("notes.txt")));
        assert!(!is_media_path(Path::new("noext")));
    }

    #[test]
    fn test_path_id_is_stable() {
        let a = path_id(Path::new("/x/y.jpg"));
        assert_eq!(a, path_id(Path::new("/x/y.jpg")));
        assert_ne!(a, path_id(Path::new("/x/z.jpg")));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_strategy_ranking() {
        assert!(OrderingStrategy::StoreOrder < OrderingStrategy::TimeOrder);
        assert!(OrderingStrategy::FilenameNumericOrder < OrderingStrategy::NoOrder);
        assert!(!OrderingStrategy::StoreOrder.is_degraded());
        assert!(OrderingStrategy::NoOrder.is_degraded());
    }
}
