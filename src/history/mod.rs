//! Snapshot archive.
//!
//! Append-only history of [`MetricSnapshot`]s keyed by dimension type and
//! value. Snapshots are immutable once committed; writers to one key are
//! serialized through [`KeyLocks`].

pub mod file_store;
pub mod memory;

pub use file_store::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

use crate::error::StoreError;
use crate::models::{DimensionType, MetricSnapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of one historical archive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchiveKey {
    pub dimension_type: DimensionType,
    pub dimension_value: String,
}

impl ArchiveKey {
    pub fn new(dimension_type: DimensionType, dimension_value: impl Into<String>) -> Self {
        Self {
            dimension_type,
            dimension_value: dimension_value.into(),
        }
    }

    /// Key a snapshot is archived under.
    pub fn of(snapshot: &MetricSnapshot) -> Self {
        Self::new(snapshot.dimension_type, snapshot.dimension_value.clone())
    }

    pub fn matches(&self, snapshot: &MetricSnapshot) -> bool {
        self.dimension_type == snapshot.dimension_type
            && self.dimension_value == snapshot.dimension_value
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.dimension_type, self.dimension_value)
    }
}

/// Persistence for scored snapshots.
///
/// Range results are ordered oldest first. Unreadable individual entries
/// are skipped; errors are reserved for write failures and archives that
/// cannot be enumerated at all.
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot. Saving the same key and timestamp again replaces it.
    fn save(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError>;

    /// Snapshots with `start <= timestamp <= end`.
    fn load_range(
        &self,
        key: &ArchiveKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError>;

    /// Most recent snapshot strictly before `before`.
    fn load_latest_before(
        &self,
        key: &ArchiveKey,
        before: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError>;

    /// Whole history of one key.
    fn load_all(&self, key: &ArchiveKey) -> Result<Vec<MetricSnapshot>, StoreError>;

    /// Dimension values archived for one dimension type, sorted.
    fn keys(&self, dimension_type: DimensionType) -> Result<Vec<ArchiveKey>, StoreError>;

    fn count(&self, key: &ArchiveKey) -> Result<usize, StoreError> {
        Ok(self.load_all(key)?.len())
    }

    /// Snapshot closest to `target`; the earlier one wins a tie.
    fn load_nearest(
        &self,
        key: &ArchiveKey,
        target: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        Ok(self
            .load_all(key)?
            .into_iter()
            .min_by_key(|s| ((s.timestamp - target).abs(), s.timestamp)))
    }
}

/// Per-key write locks.
///
/// One lock per archive key, created on first use. A poisoned lock is
/// recovered since it guards no data of its own.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<ArchiveKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &ArchiveKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Run `f` while holding the lock for `key`. The lock is released when
    /// `f` returns or unwinds.
    pub fn with_lock<T>(&self, key: &ArchiveKey, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
