//! Locate the favorites content directory below a user supplied root.
//!
//! WeChat moved its favorites cache around between releases, and users pick
//! anything from the install folder down to the cache folder itself. Each
//! layout is one probe; probes run in order and the first hit wins.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{FavError, Result};

/// Subpaths where historical client versions kept the favorites cache.
const KNOWN_LAYOUTS: &[&[&str]] = &[
    &["Favorites"],
    &["FileStorage", "Favorites"],
    &["WeChat Files", "Favorites"],
    &["Favorites", "File"],
    &["Favorites", "Images"],
    &["Favorites", "Videos"],
    &["FileStorage", "Fav"],
];

/// Layouts below a `wxid_*` account directory.
const ACCOUNT_LAYOUTS: &[&[&str]] = &[
    &["Favorites"],
    &["FileStorage", "Favorites"],
    &["FileStorage", "Fav"],
    &["Fav"],
];

/// Depth limit of the tree dump attached to a resolution failure.
const TREE_DUMP_DEPTH: usize = 3;

static FAV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^fav").unwrap());
pub(crate) static ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^wxid_.+").unwrap());

/// A single resolution attempt: description (for logs) and the probe itself.
type Probe = (&'static str, fn(&Path) -> Option<PathBuf>);

const PROBES: &[Probe] = &[
    ("root is a favorites folder", probe_root_name),
    ("known layout under root", probe_known_layouts),
    ("fav* directory under root", probe_fav_scan),
    ("account directory under root", probe_account_dirs),
    ("root holds files directly", probe_flat_root),
    ("completed FileStorage/Fav path", probe_completed_fav),
];

/// Check whether a folder name looks like a favorites folder.
pub fn is_favorites_name(name: &str) -> bool {
    FAV_RE.is_match(name)
}

/// Resolve `root` to the directory that actually holds favorites media.
pub fn resolve(root: &Path) -> Result<PathBuf> {
    if !root.exists() {
        return Err(FavError::not_found("cache directory", root));
    }

    for (description, probe) in PROBES {
        debug!(root = %root.display(), probe = description, "trying probe");
        if let Some(found) = probe(root) {
            info!(path = %found.display(), probe = description, "favorites directory resolved");
            return Ok(found);
        }
    }

    let tree = dump_tree(root, TREE_DUMP_DEPTH);
    warn!(root = %root.display(), "no favorites directory found, layout:\n{}", tree);
    Err(FavError::NotFound {
        what: "favorites directory",
        path: root.to_path_buf(),
        detail: format!("\ndirectory layout:\n{}", tree),
    })
}

fn leaf_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

fn probe_root_name(root: &Path) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }
    let name = leaf_name(root)?;
    if !is_favorites_name(&name) {
        return None;
    }
    if name.eq_ignore_ascii_case("favorites") {
        return Some(root.to_path_buf());
    }

    // Abbreviated form (e.g. "Fav"): prefer a full "Favorites" sibling.
    if let Some(parent) = root.parent() {
        for sibling in sorted_subdirs(parent) {
            if leaf_name(&sibling).is_some_and(|n| n.eq_ignore_ascii_case("favorites")) {
                return Some(sibling);
            }
        }
    }
    Some(root.to_path_buf())
}

fn probe_layouts(base: &Path, layouts: &[&[&str]]) -> Option<PathBuf> {
    layouts.iter().find_map(|parts| {
        let candidate = parts.iter().fold(base.to_path_buf(), |p, part| p.join(part));
        debug!(path = %candidate.display(), "checking layout");
        candidate.is_dir().then_some(candidate)
    })
}

fn probe_known_layouts(root: &Path) -> Option<PathBuf> {
    probe_layouts(root, KNOWN_LAYOUTS)
}

fn probe_fav_scan(root: &Path) -> Option<PathBuf> {
    find_fav_dir(root)
}

fn probe_account_dirs(root: &Path) -> Option<PathBuf> {
    sorted_subdirs(root)
        .into_iter()
        .filter(|dir| leaf_name(dir).is_some_and(|n| ACCOUNT_RE.is_match(&n)))
        .find_map(|account| {
            info!(path = %account.display(), "found account directory");
            probe_layouts(&account, ACCOUNT_LAYOUTS).or_else(|| find_fav_dir(&account))
        })
}

fn probe_flat_root(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    let has_files = entries
        .flatten()
        .any(|e| e.file_type().is_ok_and(|t| t.is_file()));
    if has_files {
        warn!(root = %root.display(), "no favorites folder found, using the root directly");
        Some(root.to_path_buf())
    } else {
        None
    }
}

fn probe_completed_fav(root: &Path) -> Option<PathBuf> {
    let text = root.to_string_lossy().replace('\\', "/");
    let idx = text.find("FileStorage/Fav")?;
    let tail = &text[idx + "FileStorage/Fav".len()..];
    if tail.starts_with("orites") {
        return None;
    }
    let completed = format!("{}FileStorage/Favorites{}", &text[..idx], tail);
    let completed = PathBuf::from(completed);
    completed.is_dir().then_some(completed)
}

/// Breadth-first search for a directory whose name starts with "fav".
/// Children of a directory are checked before any of them is descended into,
/// in file name order, so the shallowest match wins over one found by
/// descending the first child.
fn find_fav_dir(base: &Path) -> Option<PathBuf> {
    let mut queue = VecDeque::from([base.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let children = sorted_subdirs(&dir);
        if let Some(hit) = children
            .iter()
            .find(|c| leaf_name(c).is_some_and(|n| is_favorites_name(&n)))
        {
            info!(path = %hit.display(), "found candidate favorites directory");
            return Some(hit.clone());
        }
        queue.extend(children);
    }
    None
}

pub(crate) fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

/// Render the directory tree under `root` down to `max_depth` levels.
pub fn dump_tree(root: &Path, max_depth: usize) -> String {
    let mut out = String::new();
    dump_tree_into(root, 0, max_depth, &mut out);
    out
}

fn dump_tree_into(path: &Path, level: usize, max_depth: usize, out: &mut String) {
    if level > max_depth {
        return;
    }
    let indent = "  ".repeat(level);
    let name = leaf_name(path).unwrap_or_else(|| path.display().to_string());
    let _ = writeln!(out, "{}[DIR] {}", indent, name);

    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    let mut children: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    children.sort();
    for child in children {
        if child.is_dir() {
            dump_tree_into(&child, level + 1, max_depth, out);
        } else if let Some(file) = leaf_name(&child) {
            let _ = writeln!(out, "{}  [FILE] {}", indent, file);
        }
    }
}
