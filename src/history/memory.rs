//! In-memory archive.

use super::{ArchiveKey, SnapshotStore};
use crate::error::StoreError;
use crate::models::{DimensionType, MetricSnapshot};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

type Archive = BTreeMap<ArchiveKey, BTreeMap<DateTime<Utc>, MetricSnapshot>>;

/// Archive held in process memory. Lost on drop.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    archive: RwLock<Archive>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Archive) -> T) -> T {
        let archive = self.archive.read().unwrap_or_else(PoisonError::into_inner);
        f(&archive)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        let mut archive = self.archive.write().unwrap_or_else(PoisonError::into_inner);
        archive
            .entry(ArchiveKey::of(snapshot))
            .or_default()
            .insert(snapshot.timestamp, snapshot.clone());
        Ok(())
    }

    fn load_range(
        &self,
        key: &ArchiveKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.read(|archive| {
            archive
                .get(key)
                .map(|history| history.range(start..=end).map(|(_, s)| s.clone()).collect())
                .unwrap_or_default()
        }))
    }

    fn load_latest_before(
        &self,
        key: &ArchiveKey,
        before: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        Ok(self.read(|archive| {
            archive
                .get(key)
                .and_then(|history| history.range(..before).next_back())
                .map(|(_, s)| s.clone())
        }))
    }

    fn load_all(&self, key: &ArchiveKey) -> Result<Vec<MetricSnapshot>, StoreError> {
        Ok(self.read(|archive| {
            archive
                .get(key)
                .map(|history| history.values().cloned().collect())
                .unwrap_or_default()
        }))
    }

    fn keys(&self, dimension_type: DimensionType) -> Result<Vec<ArchiveKey>, StoreError> {
        Ok(self.read(|archive| {
            archive
                .keys()
                .filter(|k| k.dimension_type == dimension_type)
                .cloned()
                .collect()
        }))
    }

    fn count(&self, key: &ArchiveKey) -> Result<usize, StoreError> {
        Ok(self.read(|archive| archive.get(key).map_or(0, BTreeMap::len)))
    }
}
