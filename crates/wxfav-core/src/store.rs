//! Read-only access to the favorites database the client keeps next to its
//! cache. The schema is not ours and differs between client versions, so it
//! is probed: tables and columns are introspected and a data-driven list of
//! query templates is tried in order.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{FavError, Result};
use crate::resolve::ACCOUNT_RE;

/// Conventional database file names, in lookup order.
pub const STORE_FILE_NAMES: &[&str] = &[
    "favorite.db",
    "favorites.db",
    "FavoritesItem.db",
    "Favorites.db",
    "favoriteItem.db",
    "FavoriteStorage.db",
    "FavStorage.db",
    "WxFavorite.db",
    "wxfavorite.db",
    "fav.db",
    "Fav.db",
];

/// One way of reading (id, file name) rows from a store, in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub table: String,
    pub id_column: String,
    pub name_column: String,
    /// Column to sort by, ascending. Falls back to the id column.
    #[serde(default)]
    pub order_column: Option<String>,
}

/// (table, id column, name column, order column). Time columns first, then
/// sequence columns, then bare id order.
const BUILTIN_TEMPLATES: &[(&str, &str, &str, Option<&str>)] = &[
    ("FavoritesItem", "localId", "fileName", Some("createTime")),
    ("FavoritesItem", "localId", "fileName", Some("updateTime")),
    ("FavoritesItem", "localId", "fileName", Some("seq")),
    ("FavoritesItem", "localId", "fileName", Some("id")),
    ("favorites", "itemId", "fileName", Some("createTime")),
    ("favoriteItem", "id", "fileName", Some("createTime")),
    ("FavoritesItem", "localId", "fileName", None),
    ("favorites", "itemId", "fileName", None),
    ("favoriteItem", "id", "fileName", None),
];

impl QueryTemplate {
    pub fn new(table: &str, id_column: &str, name_column: &str, order_column: Option<&str>) -> Self {
        Self {
            table: table.to_string(),
            id_column: id_column.to_string(),
            name_column: name_column.to_string(),
            order_column: order_column.map(str::to_string),
        }
    }

    /// The templates known to work against past client versions.
    pub fn builtin() -> Vec<QueryTemplate> {
        BUILTIN_TEMPLATES
            .iter()
            .map(|(t, id, name, order)| QueryTemplate::new(t, id, name, *order))
            .collect()
    }

    fn order_by(&self) -> &str {
        self.order_column.as_deref().unwrap_or(&self.id_column)
    }

    pub fn sql(&self) -> String {
        format!(
            "SELECT {}, {} FROM {} ORDER BY {} ASC",
            quote_ident(&self.id_column),
            quote_ident(&self.name_column),
            quote_ident(&self.table),
            quote_ident(self.order_by()),
        )
    }
}

/// Load additional templates from a JSON array of template objects.
pub fn load_templates(path: &Path) -> Result<Vec<QueryTemplate>> {
    let text = fs::read_to_string(path)
        .map_err(|e| FavError::io(format!("reading query templates {}", path.display()), e))?;
    serde_json::from_str(&text).map_err(|e| {
        FavError::io(
            format!("parsing query templates {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A row returned by a store template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRow {
    pub id: String,
    pub name: Option<String>,
}

/// Open read-only handle to a favorites database plus its introspected schema.
pub struct Store {
    conn: Connection,
    path: PathBuf,
    /// lowercase table name -> lowercase column names
    tables: HashMap<String, Vec<String>>,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut store = Self {
            conn,
            path: path.to_path_buf(),
            tables: HashMap::new(),
        };
        store.introspect()?;
        Ok(store)
    }

    fn introspect(&mut self) -> rusqlite::Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE type = 'table'")?;
        let tables: Vec<(String, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        info!(path = %self.path.display(), tables = tables.len(), "store schema");
        for (name, sql) in tables {
            debug!(table = %name, sql = sql.as_deref().unwrap_or(""), "store table");
            let mut info = self
                .conn
                .prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))?;
            let columns: Vec<String> = info
                .query_map([], |row| row.get::<_, String>(1))?
                .filter_map(|c| c.ok())
                .map(|c| c.to_lowercase())
                .collect();
            self.tables.insert(name.to_lowercase(), columns);
        }
        Ok(())
    }

    /// Whether the template's table and columns exist in this store.
    pub fn supports(&self, template: &QueryTemplate) -> bool {
        let Some(columns) = self.tables.get(&template.table.to_lowercase()) else {
            return false;
        };
        [
            template.id_column.as_str(),
            template.name_column.as_str(),
            template.order_by(),
        ]
        .iter()
        .all(|c| columns.contains(&c.to_lowercase()))
    }

    /// Run one template. Rows with a NULL id are dropped.
    pub fn rows(&self, template: &QueryTemplate) -> rusqlite::Result<Vec<StoreRow>> {
        let mut stmt = self.conn.prepare(&template.sql())?;
        let rows = stmt.query_map([], |row| {
            let id = value_to_string(row.get_ref(0)?);
            let name = match row.get_ref(1)? {
                ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                _ => None,
            };
            Ok((id, name))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name) = row?;
            if let Some(id) = id {
                out.push(StoreRow {
                    id,
                    name: name.filter(|n| !n.trim().is_empty()),
                });
            }
        }
        Ok(out)
    }
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(hex::encode(b)),
    }
}

fn find_named_store(dir: &Path) -> Option<PathBuf> {
    STORE_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Ancestor of `path` ending at the first component matching `pred`.
fn ancestor_named(path: &Path, pred: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let mut acc = PathBuf::new();
    for component in path.components() {
        acc.push(component.as_os_str());
        if let Component::Normal(part) = component {
            if part.to_str().is_some_and(&pred) {
                return Some(acc);
            }
        }
    }
    None
}

fn is_db_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("db"))
}

/// Find the favorites database for a resolved content root.
///
/// Looks in the root, its parent, the `FileStorage` ancestor and the account
/// (`wxid_*`) ancestor, then falls back to any `.db` below the root.
pub fn find_store(content_root: &Path) -> Option<PathBuf> {
    if let Some(found) = find_named_store(content_root) {
        info!(path = %found.display(), "store found in content root");
        return Some(found);
    }

    if let Some(found) = content_root.parent().and_then(find_named_store) {
        info!(path = %found.display(), "store found in parent directory");
        return Some(found);
    }

    if let Some(found) = ancestor_named(content_root, |p| p == "FileStorage")
        .as_deref()
        .and_then(find_named_store)
    {
        info!(path = %found.display(), "store found in FileStorage directory");
        return Some(found);
    }

    if let Some(account) = ancestor_named(content_root, |p| ACCOUNT_RE.is_match(p)) {
        if let Some(found) = find_named_store(&account) {
            info!(path = %found.display(), "store found in account directory");
            return Some(found);
        }
        let related = WalkDir::new(&account)
            .sort_by_file_name()
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .find(|p| {
                is_db_file(p)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.to_lowercase().contains("fav"))
            });
        if let Some(found) = related {
            info!(path = %found.display(), "related store found below account directory");
            return Some(found);
        }
    }

    let any = WalkDir::new(content_root)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| is_db_file(p));
    match &any {
        Some(found) => info!(path = %found.display(), "database file found below content root"),
        None => warn!(root = %content_root.display(), "no favorites database found, using file system order"),
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store(path: &Path, ddl: &str) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(ddl).unwrap();
        conn
    }

    #[test]
    fn test_builtin_sql() {
        let t = &QueryTemplate::builtin()[0];
        assert_eq!(
            t.sql(),
            r#"SELECT "localId", "fileName" FROM "FavoritesItem" ORDER BY "createTime" ASC"#
        );
        let bare = QueryTemplate::new("favorites", "itemId", "fileName", None);
        assert!(bare.sql().ends_with(r#"ORDER BY "itemId" ASC"#));
    }

    #[test]
    fn test_supports_and_rows() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("favorite.db");
        let conn = make_store(
            &db,
            "CREATE TABLE FavoritesItem (localId INTEGER, fileName TEXT, createTime INTEGER);
             INSERT INTO FavoritesItem VALUES (7, 'late.jpg', 300);
             INSERT INTO FavoritesItem VALUES (3, 'early.jpg', 100);
             INSERT INTO FavoritesItem VALUES (NULL, 'orphan.jpg', 50);
             INSERT INTO FavoritesItem VALUES (5, NULL, 200);",
        );
        drop(conn);

        let store = Store::open(&db).unwrap();
        let templates = QueryTemplate::builtin();
        assert!(store.supports(&templates[0]));
        assert!(!store.supports(&templates[1])); // no updateTime column
        assert!(!store.supports(&templates[4])); // no favorites table

        let rows = store.rows(&templates[0]).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["3", "5", "7"]);
        assert_eq!(rows[1].name, None);
    }

    #[test]
    fn test_find_store_in_parent_and_account() {
        let dir = tempdir().unwrap();
        let fav = dir.path().join("wxid_x1").join("FileStorage").join("Favorites");
        fs::create_dir_all(&fav).unwrap();
        assert_eq!(find_store(&fav), None);

        let account_db = dir.path().join("wxid_x1").join("Msg").join("WxFav_1.db");
        fs::create_dir_all(account_db.parent().unwrap()).unwrap();
        fs::write(&account_db, b"").unwrap();
        assert_eq!(find_store(&fav), Some(account_db));

        let parent_db = fav.parent().unwrap().join("Fav.db");
        fs::write(&parent_db, b"").unwrap();
        assert_eq!(find_store(&fav), Some(parent_db));
    }

    #[test]
    fn test_load_templates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.json");
        fs::write(
            &path,
            r#"[{"table": "FavItems", "id_column": "rid", "name_column": "title", "order_column": "ts"},
                {"table": "FavItems", "id_column": "rid", "name_column": "title"}]"#,
        )
        .unwrap();
        let templates = load_templates(&path).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[1].order_column, None);
        assert!(load_templates(&dir.path().join("missing.json")).is_err());
    }
}
