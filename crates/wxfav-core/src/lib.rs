pub mod archive;
pub mod cancel;
pub mod discovery;
pub mod error;
pub mod lease;
pub mod locate;
pub mod media;
pub mod order;
pub mod purge;
pub mod resolve;
pub mod scratch;
pub mod signature;
pub mod store;
pub mod thumbnail;
pub mod transfer;

use std::path::Path;
use std::sync::Arc;

pub use archive::ScratchExtraction;
pub use cancel::CancellationToken;
pub use discovery::{DiscoverOptions, Discovery, MediaDiscovery};
pub use error::{FavError, Result};
pub use media::{MediaEntry, OrderingStrategy, SortKey};
pub use purge::{purge_media, PurgeReport};
pub use scratch::ScratchRegistry;
pub use transfer::{transfer, TransferReport, TransferSource};

/// Progress callback: (percent 0..=100, message). Called once per entry.
pub type ProgressCallback<'a> = dyn Fn(u8, &str) + Send + Sync + 'a;

/// Resolve `root` and discover its media with the built-in store queries.
pub fn discover(root: &Path) -> Result<Discovery> {
    discover_with(root, &DiscoverOptions::default())
}

pub fn discover_with(root: &Path, options: &DiscoverOptions) -> Result<Discovery> {
    Ok(MediaDiscovery::new(root, options)?.into_discovery())
}

/// Extract a zip archive; entries are available through
/// [`ScratchExtraction::entries`].
pub fn discover_archive(path: &Path, registry: Arc<ScratchRegistry>) -> Result<ScratchExtraction> {
    ScratchExtraction::open(path, registry)
}

/// Transfer every entry of an extraction, consuming it so the scratch
/// directory is removed once copying is done.
pub fn transfer_archive(
    extraction: ScratchExtraction,
    dest: &Path,
    progress: &ProgressCallback<'_>,
    cancel: Option<&CancellationToken>,
) -> Result<(Vec<MediaEntry>, TransferReport)> {
    let mut entries = extraction.entries().to_vec();
    let report = transfer(
        &mut entries,
        dest,
        TransferSource::Archive(extraction),
        progress,
        cancel,
    )?;
    Ok((entries, report))
}
