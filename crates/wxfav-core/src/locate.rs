//! Find the logged-in account and its favorites folder on this machine.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::bytes::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::resolve::{sorted_subdirs, ACCOUNT_RE};

const WECHAT_FILES: &str = "WeChat Files";
const CONFIG_FILE: &str = "config.data";

/// Favorites folders below an account directory, in lookup order.
const FAVORITES_LAYOUTS: &[&[&str]] = &[
    &["Favorites"],
    &["FileStorage", "Favorites"],
    &["FileStorage", "Fav"],
];

static CONFIG_ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"wxid_[a-zA-Z0-9_-]{10,}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountLocation {
    /// The `WeChat Files` directory
    pub wechat_files: PathBuf,
    pub account: String,
    /// Favorites folder of the account, when one exists
    pub favorites: Option<PathBuf>,
}

/// Default `WeChat Files` locations for the current user.
pub fn candidate_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(docs) = dirs::document_dir() {
        roots.push(docs.join(WECHAT_FILES));
    }
    if let Some(home) = dirs::home_dir() {
        let docs = home.join("Documents").join(WECHAT_FILES);
        if !roots.contains(&docs) {
            roots.push(docs);
        }
    }
    if let Some(appdata) = env::var_os("APPDATA") {
        roots.push(PathBuf::from(appdata).join("Tencent").join("WeChat").join(WECHAT_FILES));
    }
    roots
}

/// Detect the account on this machine. Never fails; `None` when nothing is
/// found.
pub fn detect_account() -> Option<AccountLocation> {
    detect_in(&candidate_roots())
}

/// Detect the account using the first existing directory of `roots`.
pub fn detect_in(roots: &[PathBuf]) -> Option<AccountLocation> {
    let Some(wechat_files) = roots.iter().find(|p| p.is_dir()) else {
        warn!("no WeChat Files directory found");
        return None;
    };
    info!(path = %wechat_files.display(), "found WeChat Files directory");

    let account = latest_account_dir(wechat_files).or_else(|| account_from_config(wechat_files))?;
    let favorites = favorites_for(&wechat_files.join(&account));
    match &favorites {
        Some(path) => info!(account = %account, path = %path.display(), "found favorites folder"),
        None => warn!(account = %account, "account has no favorites folder"),
    }

    Some(AccountLocation {
        wechat_files: wechat_files.clone(),
        account,
        favorites,
    })
}

/// The `wxid_*` directory modified most recently.
fn latest_account_dir(wechat_files: &Path) -> Option<String> {
    let mut accounts: Vec<(SystemTime, String)> = sorted_subdirs(wechat_files)
        .into_iter()
        .filter_map(|dir| {
            let name = dir.file_name()?.to_str()?.to_string();
            if !ACCOUNT_RE.is_match(&name) {
                return None;
            }
            let modified = fs::metadata(&dir)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, name))
        })
        .collect();
    debug!(count = accounts.len(), "account directories");
    // Latest first; equal times keep name order
    accounts.sort_by(|a, b| b.0.cmp(&a.0));
    accounts.into_iter().next().map(|(_, name)| name)
}

fn account_from_config(wechat_files: &Path) -> Option<String> {
    let config = wechat_files.join(CONFIG_FILE);
    let bytes = match fs::read(&config) {
        Ok(b) => b,
        Err(e) => {
            debug!(path = %config.display(), error = %e, "no readable config file");
            return None;
        }
    };
    let found = CONFIG_ACCOUNT_RE
        .find(&bytes)
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
    if found.is_none() {
        warn!(path = %config.display(), "no account id in config file");
    }
    found
}

fn favorites_for(account_dir: &Path) -> Option<PathBuf> {
    FAVORITES_LAYOUTS.iter().find_map(|parts| {
        let candidate = parts.iter().fold(account_dir.to_path_buf(), |p, part| p.join(part));
        candidate.is_dir().then_some(candidate)
    })
}
