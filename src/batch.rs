use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Next unused integer among the purely numeric folder names in `parent`,
/// "1" when there are none or `parent` does not exist yet.
pub fn next_folder_number(parent: &Path) -> String {
    let Ok(entries) = fs::read_dir(parent) else {
        return "1".to_string();
    };
    let max = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| e.file_name().to_str()?.parse::<u64>().ok())
        .max();
    match max {
        Some(n) => (n + 1).to_string(),
        None => "1".to_string(),
    }
}

/// `<output>/<YYYY-MM-DD>/<name>`; an empty or missing name picks the next
/// numeric folder.
pub fn batch_folder(output: &Path, date: NaiveDate, name: Option<&str>) -> PathBuf {
    let date_folder = output.join(date.format("%Y-%m-%d").to_string());
    let name = match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => next_folder_number(&date_folder),
    };
    date_folder.join(name)
}
