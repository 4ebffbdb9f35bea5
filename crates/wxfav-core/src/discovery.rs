use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rayon::prelude::*;
use tracing::info;

use crate::error::Result;
use crate::media::{MediaEntry, OrderingStrategy, SortKey};
use crate::order::{self, OrderResult, OrderedItem, OrderingEngine};
use crate::resolve;
use crate::signature::ensure_extension;
use crate::store::QueryTemplate;
use crate::thumbnail::is_thumbnail_path;

/// Entries listed in the ordering summary log.
const SUMMARY_PREVIEW: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Store query templates tried after the built-in ones
    pub extra_templates: Vec<QueryTemplate>,
}

/// Result of one discovery run.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub content_root: PathBuf,
    pub entries: Vec<MediaEntry>,
    pub strategy: OrderingStrategy,
    /// Database the order was read from, for `StoreOrder`
    pub store: Option<PathBuf>,
}

impl Discovery {
    /// Where the order of `entries` came from, for display.
    pub fn describe_strategy(&self) -> String {
        match &self.store {
            Some(store) if self.strategy == OrderingStrategy::StoreOrder => {
                format!("{} ({})", self.strategy.describe(), store.display())
            }
            _ => self.strategy.describe().to_string(),
        }
    }
}

/// Discovery bound to one content root. The first `discover` call scans; later
/// calls return the cached result.
#[derive(Debug)]
pub struct MediaDiscovery {
    content_root: PathBuf,
    engine: OrderingEngine,
    cache: OnceLock<Discovery>,
}

impl MediaDiscovery {
    /// Resolve `root` to its content directory.
    pub fn new(root: &Path, options: &DiscoverOptions) -> Result<Self> {
        let content_root = resolve::resolve(root)?;
        let engine = OrderingEngine::new().with_extra_templates(options.extra_templates.clone());
        Ok(Self::for_content_root(content_root, engine))
    }

    /// Use `content_root` as is, without resolution.
    pub fn for_content_root(content_root: PathBuf, engine: OrderingEngine) -> Self {
        Self {
            content_root,
            engine,
            cache: OnceLock::new(),
        }
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn discover(&self) -> &Discovery {
        self.cache.get_or_init(|| self.run())
    }

    pub fn into_discovery(self) -> Discovery {
        match self.cache.into_inner() {
            Some(discovery) => discovery,
            None => run_discovery(&self.content_root, &self.engine),
        }
    }

    fn run(&self) -> Discovery {
        run_discovery(&self.content_root, &self.engine)
    }
}

fn run_discovery(content_root: &Path, engine: &OrderingEngine) -> Discovery {
    info!(root = %content_root.display(), "discovering media");
    let order = engine.find_order(content_root);
    let store = order.store.clone();
    let (entries, strategy) = collect(order);
    let discovery = Discovery {
        content_root: content_root.to_path_buf(),
        entries,
        strategy,
        store,
    };
    log_summary(&discovery);
    discovery
}

/// Turn an ordering result into media entries.
///
/// Store order is taken verbatim; the engine already dropped thumbnails and
/// non-media rows. Otherwise times are read again and the
/// smart sort decides the final order and strategy.
fn collect(order: OrderResult) -> (Vec<MediaEntry>, OrderingStrategy) {
    if order.strategy == OrderingStrategy::StoreOrder {
        let entries = order.items.into_iter().map(store_entry).collect();
        return (entries, OrderingStrategy::StoreOrder);
    }

    let mut entries: Vec<MediaEntry> = order
        .items
        .into_par_iter()
        .filter(|item| !is_thumbnail_path(&item.path))
        .map(|item| {
            let sort_key = order::modified_time(&item.path).map(SortKey::Modified);
            MediaEntry::new(item.id, item.name, item.path, sort_key)
        })
        .collect();

    let strategy = order::smart_sort(
        &mut entries,
        |e| match e.sort_key {
            Some(SortKey::Modified(t)) => Some(t),
            _ => None,
        },
        |e| e.name.as_str(),
    );
    (entries, strategy)
}

fn store_entry(item: OrderedItem) -> MediaEntry {
    let name = ensure_extension(&item.name, &item.path);
    MediaEntry::new(item.id, name, item.path, item.sort_key)
}

fn log_summary(discovery: &Discovery) {
    info!(
        strategy = %discovery.strategy,
        files = discovery.entries.len(),
        "ordering: {}",
        discovery.describe_strategy()
    );
    for (i, entry) in discovery.entries.iter().take(SUMMARY_PREVIEW).enumerate() {
        let key = entry
            .sort_key
            .map(|k| k.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("  {}. {} [{}]", i + 1, entry.name, key);
    }
    if discovery.entries.len() > SUMMARY_PREVIEW {
        info!("  ... {} more", discovery.entries.len() - SUMMARY_PREVIEW);
    }
}
