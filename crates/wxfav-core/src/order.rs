//! Recover the order in which items were added to favorites.
//!
//! Strategies, best first: the favorites database, file modification times,
//! modification times with a file-name number as tie-break. Every failure in
//! a strategy is logged and the next one is tried; `find_order` never fails.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::media::{is_media_path, path_id, OrderingStrategy, SortKey};
use crate::store::{self, QueryTemplate, Store};
use crate::thumbnail::is_thumbnail_path;

/// When at least this share of files has a modification time identical to
/// another file's, times are not considered meaningful on their own and the
/// number embedded in the file name breaks the ties.
pub const SHARED_MTIME_THRESHOLD: f64 = 0.8;

/// Token used for names without digits. Sorts first; a known coarse fallback.
pub const MISSING_TOKEN: u64 = 0;

/// Sub folders the client stores favorites files in, keyed by item id.
const ID_FOLDERS: &[&str] = &["File", "Images", "Videos", "Media"];

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// First run of digits in `name`, or [`MISSING_TOKEN`].
pub fn numeric_token(name: &str) -> u64 {
    DIGITS_RE
        .find(name)
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .unwrap_or(MISSING_TOKEN)
}

fn has_token(name: &str) -> bool {
    DIGITS_RE.is_match(name)
}

/// Modification time of `path`, `None` if it cannot be read.
pub fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => Some(DateTime::<Utc>::from(t)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read modification time");
            None
        }
    }
}

/// Sort `items` by modification time, switching to (time, name number) when
/// most times coincide. Returns the strategy that describes the result.
///
/// The sort is stable; items without a time sort first.
pub fn smart_sort<T>(
    items: &mut [T],
    mtime: impl Fn(&T) -> Option<DateTime<Utc>>,
    name: impl Fn(&T) -> &str,
) -> OrderingStrategy {
    if items.is_empty() || items.iter().all(|i| mtime(i).is_none()) {
        return OrderingStrategy::NoOrder;
    }

    let time_of = |i: &T| mtime(i).unwrap_or(DateTime::<Utc>::MIN_UTC);
    items.sort_by_key(|i| time_of(i));

    let mut counts: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for i in items.iter() {
        *counts.entry(time_of(i)).or_default() += 1;
    }
    let shared = items.iter().filter(|i| counts[&time_of(i)] > 1).count();
    let shared_ratio = shared as f64 / items.len() as f64;

    if items.len() < 2 || shared_ratio < SHARED_MTIME_THRESHOLD {
        debug!(shared_ratio, "modification times are distinct enough");
        return OrderingStrategy::TimeOrder;
    }

    info!(
        shared_ratio,
        "most files share a modification time, using numbers in file names as tie-break"
    );
    items.sort_by_key(|i| (time_of(i), numeric_token(name(i))));

    if counts.len() == 1 && !items.iter().any(|i| has_token(name(i))) {
        OrderingStrategy::NoOrder
    } else {
        OrderingStrategy::FilenameNumericOrder
    }
}

/// One ordered item: identifier, display name, resolved file and sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedItem {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub sort_key: Option<SortKey>,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub strategy: OrderingStrategy,
    pub items: Vec<OrderedItem>,
    /// Database the order came from, if any
    pub store: Option<PathBuf>,
}

impl OrderResult {
    fn empty() -> Self {
        Self {
            strategy: OrderingStrategy::NoOrder,
            items: Vec::new(),
            store: None,
        }
    }
}

/// Finds the best available order for a content root.
#[derive(Debug, Clone)]
pub struct OrderingEngine {
    templates: Vec<QueryTemplate>,
}

impl Default for OrderingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderingEngine {
    pub fn new() -> Self {
        Self {
            templates: QueryTemplate::builtin(),
        }
    }

    /// Append extra query templates, tried after the built-in ones.
    pub fn with_extra_templates(mut self, extra: Vec<QueryTemplate>) -> Self {
        self.templates.extend(extra);
        self
    }

    pub fn find_order(&self, content_root: &Path) -> OrderResult {
        if let Some(db_path) = store::find_store(content_root) {
            match Store::open(&db_path) {
                Ok(store) => {
                    if let Some(items) = self.order_from_store(&store, content_root) {
                        return OrderResult {
                            strategy: OrderingStrategy::StoreOrder,
                            items,
                            store: Some(db_path),
                        };
                    }
                    info!(path = %db_path.display(), "store yielded no files, falling back to file times");
                }
                Err(e) => {
                    warn!(path = %db_path.display(), error = %e, "cannot read favorites database");
                }
            }
        }

        order_from_filesystem(content_root)
    }

    fn order_from_store(&self, store: &Store, content_root: &Path) -> Option<Vec<OrderedItem>> {
        let mut index: Option<FileIndex> = None;

        for template in &self.templates {
            if !store.supports(template) {
                debug!(sql = %template.sql(), "template does not match store schema");
                continue;
            }
            let rows = match store.rows(template) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(sql = %template.sql(), error = %e, "store query failed");
                    continue;
                }
            };
            info!(sql = %template.sql(), rows = rows.len(), "store query succeeded");
            if rows.is_empty() {
                continue;
            }

            let files = index.get_or_insert_with(|| FileIndex::build(content_root));
            let mut seen = HashSet::new();
            let mut items = Vec::new();
            for row in rows {
                let Some(path) = resolve_id(content_root, &row.id, files) else {
                    debug!(id = %row.id, "no file for store row");
                    continue;
                };
                if !is_saveable(&path) {
                    debug!(id = %row.id, path = %path.display(), "store row is not saveable media");
                    continue;
                }
                if !seen.insert(path.clone()) {
                    continue;
                }
                let rank = items.len() as u64;
                items.push(OrderedItem {
                    name: row.name.unwrap_or_else(|| format!("file_{}", row.id)),
                    id: row.id,
                    path,
                    sort_key: Some(SortKey::Store(rank)),
                });
            }

            if !items.is_empty() {
                info!(files = items.len(), "order taken from favorites database");
                return Some(items);
            }
        }
        None
    }
}

/// All files below a root, for id lookups.
struct FileIndex {
    files: Vec<PathBuf>,
}

impl FileIndex {
    fn build(root: &Path) -> Self {
        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable path while indexing");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        Self { files }
    }
}

/// Media worth saving: not a generated thumbnail, and either a media
/// extension or none at all (content is sniffed later).
fn is_saveable(path: &Path) -> bool {
    !is_thumbnail_path(path) && (path.extension().is_none() || is_media_path(path))
}

/// Store ids name a single file; anything else could point outside the root.
fn is_plain_id(id: &str) -> bool {
    let mut components = Path::new(id).components();
    !id.contains('\\')
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

fn file_name_str(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Map a store identifier to a file: conventional folders first, then a file
/// whose stem equals the id, then one whose name contains it.
fn resolve_id(content_root: &Path, id: &str, index: &FileIndex) -> Option<PathBuf> {
    if !is_plain_id(id) {
        warn!(id, "ignoring store id that is not a plain file name");
        return None;
    }
    let direct = std::iter::once(content_root.join(id))
        .chain(ID_FOLDERS.iter().map(|f| content_root.join(f).join(id)));
    for candidate in direct {
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let stem_match = index.files.iter().find(|p| {
        p.file_stem().and_then(|s| s.to_str()) == Some(id)
    });
    if let Some(p) = stem_match {
        return Some(p.clone());
    }

    index
        .files
        .iter()
        .find(|p| file_name_str(p).is_some_and(|n| n.contains(id)))
        .cloned()
}

/// Walk the root for media files and order them by modification time.
fn order_from_filesystem(content_root: &Path) -> OrderResult {
    info!(root = %content_root.display(), "ordering by file modification time");
    let paths: Vec<PathBuf> = WalkDir::new(content_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                warn!(error = %err, "skipping unreadable path while scanning");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_media_path(p))
        .collect();

    if paths.is_empty() {
        return OrderResult::empty();
    }

    let mut items: Vec<OrderedItem> = paths
        .into_par_iter()
        .map(|path| {
            let sort_key = modified_time(&path).map(SortKey::Modified);
            OrderedItem {
                id: path_id(&path),
                name: file_name_str(&path).unwrap_or_default().to_string(),
                path,
                sort_key,
            }
        })
        .collect();

    let strategy = smart_sort(
        &mut items,
        |i| match i.sort_key {
            Some(SortKey::Modified(t)) => Some(t),
            _ => None,
        },
        |i| i.name.as_str(),
    );

    OrderResult {
        strategy,
        items,
        store: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use rusqlite::Connection;
    use tempfile::tempdir;

    fn write_at(path: &Path, secs: i64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
        set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn names(result: &OrderResult) -> Vec<&str> {
        result.items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_numeric_token() {
        assert_eq!(numeric_token("IMG_0042_7.jpg"), 42);
        assert_eq!(numeric_token("photo.jpg"), MISSING_TOKEN);
        assert_eq!(numeric_token("99999999999999999999999.png"), u64::MAX);
    }

    #[test]
    fn test_time_order() {
        let dir = tempdir().unwrap();
        write_at(&dir.path().join("b.png"), 2_000);
        write_at(&dir.path().join("a.jpg"), 1_000);
        write_at(&dir.path().join("c.gif"), 3_000);
        fs::write(dir.path().join("readme.txt"), b"skip").unwrap();

        let result = OrderingEngine::new().find_order(dir.path());
        assert_eq!(result.strategy, OrderingStrategy::TimeOrder);
        assert_eq!(names(&result), ["a.jpg", "b.png", "c.gif"]);
        assert!(matches!(result.items[0].sort_key, Some(SortKey::Modified(_))));
    }

    #[test]
    fn test_shared_times_use_name_numbers() {
        let dir = tempdir().unwrap();
        for name in ["img_10.jpg", "img_2.jpg", "img_1.jpg", "img_33.jpg", "img_4.jpg"] {
            write_at(&dir.path().join(name), 5_000);
        }
        let result = OrderingEngine::new().find_order(dir.path());
        assert_eq!(result.strategy, OrderingStrategy::FilenameNumericOrder);
        assert_eq!(
            names(&result),
            ["img_1.jpg", "img_2.jpg", "img_4.jpg", "img_10.jpg", "img_33.jpg"]
        );
    }

    #[test]
    fn test_uniform_times_without_numbers_is_no_order() {
        let dir = tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            write_at(&dir.path().join(name), 5_000);
        }
        let result = OrderingEngine::new().find_order(dir.path());
        assert_eq!(result.strategy, OrderingStrategy::NoOrder);
        assert_eq!(result.items.len(), 3);
    }

    #[test]
    fn test_empty_root() {
        let dir = tempdir().unwrap();
        let result = OrderingEngine::new().find_order(dir.path());
        assert_eq!(result.strategy, OrderingStrategy::NoOrder);
        assert!(result.items.is_empty());
    }

    #[test]
    fn test_store_order_wins() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        // Files on disk have the opposite time order
        write_at(&root.join("File").join("101"), 9_000);
        write_at(&root.join("Images").join("IMG_102.jpg"), 1_000);
        write_at(&root.join("103.mp4"), 5_000);

        let conn = Connection::open(root.join("favorite.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE FavoritesItem (localId INTEGER, fileName TEXT, createTime INTEGER);
             INSERT INTO FavoritesItem VALUES (102, 'second.jpg', 20);
             INSERT INTO FavoritesItem VALUES (101, 'first.jpg', 10);
             INSERT INTO FavoritesItem VALUES (103, NULL, 30);
             INSERT INTO FavoritesItem VALUES (999, 'gone.jpg', 40);",
        )
        .unwrap();
        drop(conn);

        let result = OrderingEngine::new().find_order(root);
        assert_eq!(result.strategy, OrderingStrategy::StoreOrder);
        assert_eq!(names(&result), ["first.jpg", "second.jpg", "file_103"]);
        assert_eq!(result.items[0].path, root.join("File").join("101"));
        assert_eq!(result.items[1].path, root.join("Images").join("IMG_102.jpg"));
        assert_eq!(result.items[2].sort_key, Some(SortKey::Store(2)));
        assert_eq!(result.store, Some(root.join("favorite.db")));
    }

    #[test]
    fn test_unreadable_store_falls_back() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("favorite.db"), b"encrypted garbage, not sqlite").unwrap();
        write_at(&dir.path().join("a.jpg"), 1_000);
        let result = OrderingEngine::new().find_order(dir.path());
        assert_eq!(result.strategy, OrderingStrategy::TimeOrder);
        assert_eq!(names(&result), ["a.jpg"]);
    }

    #[test]
    fn test_store_without_media_rows_falls_back() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_at(&root.join("File").join("1.txt"), 1_000);
        write_at(&root.join("photo.jpg"), 2_000);
        let conn = Connection::open(root.join("favorite.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE FavoritesItem (localId INTEGER, fileName TEXT, createTime INTEGER);
             INSERT INTO FavoritesItem VALUES (1, 'notes.txt', 10);",
        )
        .unwrap();
        drop(conn);

        let result = OrderingEngine::new().find_order(root);
        assert_eq!(result.strategy, OrderingStrategy::TimeOrder);
        assert_eq!(result.store, None);
        assert_eq!(names(&result), ["photo.jpg"]);
    }

    #[test]
    fn test_store_ids_stay_inside_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Favorites");
        write_at(&dir.path().join("outside.jpg"), 1_000);
        write_at(&root.join("inside.jpg"), 2_000);
        let outside = dir.path().join("outside.jpg");
        let conn = Connection::open(root.join("favorite.db")).unwrap();
        conn.execute(
            "CREATE TABLE favorites (itemId TEXT, fileName TEXT, createTime INTEGER)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO favorites VALUES ('../outside.jpg', 'a.jpg', 1), (?1, 'b.jpg', 2)",
            [outside.to_str().unwrap()],
        )
        .unwrap();
        drop(conn);

        let result = OrderingEngine::new().find_order(&root);
        assert_eq!(result.strategy, OrderingStrategy::TimeOrder);
        assert_eq!(names(&result), ["inside.jpg"]);
        assert!(result.items.iter().all(|i| i.path.starts_with(&root)));
        assert!(!is_plain_id("../outside.jpg"));
        assert!(!is_plain_id("File\\1"));
        assert!(is_plain_id("1024"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdir_keeps_other_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        write_at(&dir.path().join("a.jpg"), 1_000);
        write_at(&dir.path().join("b.jpg"), 2_000);
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("notes.txt"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = OrderingEngine::new().find_order(dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(result.strategy, OrderingStrategy::TimeOrder);
        assert_eq!(names(&result), ["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_extra_templates() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_at(&root.join("r1.jpg"), 1_000);
        write_at(&root.join("r2.jpg"), 1_000);
        let conn = Connection::open(root.join("fav.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE FavItems (rid TEXT, title TEXT, ts INTEGER);
             INSERT INTO FavItems VALUES ('r2', 'two.jpg', 1);
             INSERT INTO FavItems VALUES ('r1', 'one.jpg', 2);",
        )
        .unwrap();
        drop(conn);

        let engine = OrderingEngine::new();
        assert_eq!(engine.find_order(root).strategy, OrderingStrategy::TimeOrder);

        let engine = engine.with_extra_templates(vec![QueryTemplate::new(
            "FavItems",
            "rid",
            "title",
            Some("ts"),
        )]);
        let result = engine.find_order(root);
        assert_eq!(result.strategy, OrderingStrategy::StoreOrder);
        assert_eq!(names(&result), ["two.jpg", "one.jpg"]);
    }
}
