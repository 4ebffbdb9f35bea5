use std::path::Path;

use crate::media::VIDEO_EXTENSIONS;

/// Stem suffixes the client uses for generated video cover images (lowercase).
/// Longest first so stripping removes the whole suffix.
const THUMB_SUFFIXES: &[&str] = &["_thumbnail", "_thumb", "_th"];

const THUMB_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

fn strip_thumb_suffix(stem: &str) -> Option<&str> {
    THUMB_SUFFIXES.iter().find_map(|s| {
        let cut = stem.len().checked_sub(s.len())?;
        (stem.is_char_boundary(cut) && stem[cut..].eq_ignore_ascii_case(s)).then(|| &stem[..cut])
    })
}

/// Check whether `file_name` (inside `dir`) is a generated video thumbnail.
///
/// Covers `clip_th.jpg`, `clip_thumb.png`, `clip.mp4_th.jpg` and any file
/// whose stem minus the suffix names a video next to it.
pub fn is_video_thumbnail(file_name: &str, dir: &Path) -> bool {
    let path = Path::new(file_name);
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let Some(base) = strip_thumb_suffix(stem) else {
        return false;
    };

    // "_th"-style cover image: thumbnail by naming convention alone
    if THUMB_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }

    // Any other extension: only when the matching video is present
    let base = Path::new(base);
    let base = match base.extension().and_then(|e| e.to_str()) {
        Some(e) if VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()) => {
            return dir.join(base).exists();
        }
        _ => base,
    };
    VIDEO_EXTENSIONS.iter().any(|video_ext| {
        let mut candidate = base.as_os_str().to_os_string();
        candidate.push(".");
        candidate.push(video_ext);
        dir.join(candidate).exists()
    })
}

/// [`is_video_thumbnail`] for a full path.
pub fn is_thumbnail_path(path: &Path) -> bool {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str())) else {
        return false;
    };
    is_video_thumbnail(name, dir)
}
