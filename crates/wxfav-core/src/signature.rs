use std::fs;
use std::path::Path;

use tracing::debug;

/// Files above this size with unknown content are assumed to be video.
const VIDEO_SIZE_GUESS: u64 = 1024 * 1024;

/// Guess an extension (without the dot) for a file that has none, from its
/// leading bytes. Unknown content is guessed by size; unreadable files get
/// "dat".
pub fn detect_extension(path: &Path) -> &'static str {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => {
            debug!(path = %path.display(), mime = kind.mime_type(), "detected file type");
            kind.extension()
        }
        Ok(None) => match fs::metadata(path) {
            Ok(meta) if meta.len() > VIDEO_SIZE_GUESS => "mp4",
            Ok(_) => "jpg",
            Err(_) => "dat",
        },
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not read file header");
            "dat"
        }
    }
}

/// Make sure `name` ends with the extension of `path`, detecting one from the
/// content when `path` has none.
pub fn ensure_extension(name: &str, path: &Path) -> String {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) if !e.is_empty() => e.to_string(),
        _ => detect_extension(path).to_string(),
    };
    let suffix = format!(".{}", ext.to_lowercase());
    if name.to_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}.{}", name, ext)
    }
}
