//! Resource leases: keep a file's bytes readable while it is held.
//!
//! A lease is an open read handle. On unix an unlinked file stays readable
//! through it; on Windows the open handle makes deletion fail. Either way the
//! bytes survive until the lease is released.
//!
//! Every lease costs a file descriptor, so a set holds at most `limit` of
//! them. Paths past the limit are read from disk.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

#[derive(Debug)]
pub struct Lease {
    file: File,
}

impl Lease {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Read the whole file through the held handle.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        handle.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Default number of handles one set may keep open.
pub const DEFAULT_LEASE_LIMIT: usize = 128;

/// Leases keyed by path.
#[derive(Debug)]
pub struct LeaseSet {
    leases: HashMap<PathBuf, Lease>,
    limit: usize,
}

impl Default for LeaseSet {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LEASE_LIMIT)
    }
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            leases: HashMap::new(),
            limit,
        }
    }

    /// Take a lease on `path`. Returns `Ok(false)` when the set is full and
    /// the path stays unleased. Re-acquiring a held path is a no-op.
    pub fn acquire(&mut self, path: &Path) -> io::Result<bool> {
        if self.leases.contains_key(path) {
            return Ok(true);
        }
        if self.leases.len() >= self.limit {
            return Ok(false);
        }
        let lease = Lease::acquire(path)?;
        self.leases.insert(path.to_path_buf(), lease);
        Ok(true)
    }

    pub fn is_leased(&self, path: &Path) -> bool {
        self.leases.contains_key(path)
    }

    /// Read `path` through its lease when one is held, else from disk.
    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.leases.get(path) {
            Some(lease) => lease.read_all(),
            None => std::fs::read(path),
        }
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Close every handle.
    pub fn release_all(&mut self) {
        if !self.leases.is_empty() {
            debug!(count = self.leases.len(), "releasing file leases");
        }
        self.leases.clear();
    }
}
