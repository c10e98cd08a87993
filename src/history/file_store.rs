//! JSON-file-per-snapshot archive.
//!
//! Layout: `<root>/<dimension_type>/<encoded value>/<timestamp>.json`.
//!
//! Encoded values too long for a file name keep a readable prefix plus a
//! SHA-256 suffix; their real value is recovered from the snapshots inside.

use super::{ArchiveKey, KeyLocks, SnapshotStore};
use crate::error::StoreError;
use crate::models::{DimensionType, MetricSnapshot};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.9fZ";

/// Longest encoded value used verbatim as a directory name.
const MAX_COMPONENT_LEN: usize = 128;

/// Readable part of a shortened directory name.
const SHORT_PREFIX_LEN: usize = 80;

/// Separates the prefix from the digest; never produced by plain encoding.
const DIGEST_MARK: char = '~';

/// Archive rooted at a directory on disk.
#[derive(Debug)]
pub struct FileSnapshotStore {
    root: PathBuf,
    locks: KeyLocks,
}

impl FileSnapshotStore {
    /// The root is created lazily on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &ArchiveKey) -> PathBuf {
        self.root
            .join(key.dimension_type.as_str())
            .join(encode_value(&key.dimension_value))
    }

    fn snapshot_path(&self, key: &ArchiveKey, timestamp: DateTime<Utc>) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}.json", timestamp.format(TIMESTAMP_FORMAT)))
    }

    /// Every readable snapshot of `key`, oldest first.
    fn read_key(&self, key: &ArchiveKey) -> Result<Vec<MetricSnapshot>, StoreError> {
        let dir = self.key_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(snapshot) = read_snapshot(&path, key) {
                snapshots.push(snapshot);
            }
        }

        snapshots.sort_by_key(|s| s.timestamp);
        debug!("Loaded {} snapshot(s) for {}", snapshots.len(), key);
        Ok(snapshots)
    }
}

/// Real value behind a shortened directory name, from any snapshot filed there.
fn value_of_shortened(dimension_type: DimensionType, dir: &Path, name: &str) -> Option<String> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter_map(|path| fs::read_to_string(path).ok())
        .filter_map(|content| serde_json::from_str::<MetricSnapshot>(&content).ok())
        .find(|s| {
            s.dimension_type == dimension_type && encode_value(&s.dimension_value) == name
        })
        .map(|s| s.dimension_value)
}

fn read_snapshot(path: &Path, key: &ArchiveKey) -> Option<MetricSnapshot> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Skipping unreadable snapshot {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<MetricSnapshot>(&content) {
        Ok(snapshot) if key.matches(&snapshot) => Some(snapshot),
        Ok(snapshot) => {
            warn!(
                "Skipping snapshot {}: belongs to {}, found under {}",
                path.display(),
                ArchiveKey::of(&snapshot),
                key
            );
            None
        }
        Err(e) => {
            warn!("Skipping corrupt snapshot {}: {}", path.display(), e);
            None
        }
    }
}

fn keeps_byte(byte: u8, first: bool) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || (byte == b'.' && !first)
}

/// Encode a dimension value as a single safe path component.
pub fn encode_value(value: &str) -> String {
    if value.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(value.len());
    for (i, byte) in value.bytes().enumerate() {
        if keeps_byte(byte, i == 0) {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    if encoded.len() > MAX_COMPONENT_LEN {
        shorten(value, &encoded)
    } else {
        encoded
    }
}

/// Prefix of `encoded` cut on an escape boundary, plus a digest of `value`.
fn shorten(value: &str, encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut cut = SHORT_PREFIX_LEN;
    if bytes[cut - 1] == b'%' {
        cut -= 1;
    } else if bytes[cut - 2] == b'%' {
        cut -= 2;
    }

    let digest = Sha256::digest(value.as_bytes());
    format!("{}{}{}", &encoded[..cut], DIGEST_MARK, hex::encode(&digest[..16]))
}

/// Inverse of [`encode_value`]; `None` for names it could not have produced
/// and for shortened names.
pub fn decode_value(encoded: &str) -> Option<String> {
    if encoded == "%" {
        return Some(String::new());
    }
    if encoded.contains(DIGEST_MARK) {
        return None;
    }

    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        let key = ArchiveKey::of(snapshot);
        let dir = self.key_dir(&key);
        let path = self.snapshot_path(&key, snapshot.timestamp);
        let json = serde_json::to_string_pretty(snapshot)?;

        self.locks.with_lock(&key, || -> Result<(), StoreError> {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

            let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
            tmp.write_all(json.as_bytes())
                .and_then(|_| tmp.as_file().sync_all())
                .map_err(|e| StoreError::io(tmp.path(), e))?;
            tmp.persist(&path).map_err(|e| StoreError::Persist {
                path: path.clone(),
                source: e.error,
            })?;

            debug!("Saved snapshot {}", path.display());
            Ok(())
        })
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
        let mut snapshots = self.read_key(key)?;
        snapshots.retain(|s| s.timestamp >= start && s.timestamp <= end);
        Ok(snapshots)
    }

    fn load_latest_before(
        &self,
        key: &ArchiveKey,
        before: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        Ok(self
            .read_key(key)?
            .into_iter()
            .filter(|s| s.timestamp < before)
            .last())
    }

    fn load_all(&self, key: &ArchiveKey) -> Result<Vec<MetricSnapshot>, StoreError> {
        self.read_key(key)
    }

    fn keys(&self, dimension_type: DimensionType) -> Result<Vec<ArchiveKey>, StoreError> {
        let dir = self.root.join(dimension_type.as_str());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                StoreError::io(path, io::Error::from(e))
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            let value = if name.contains(DIGEST_MARK) {
                value_of_shortened(dimension_type, entry.path(), &name)
            } else {
                decode_value(&name)
            };
            match value {
                Some(value) => keys.push(ArchiveKey::new(dimension_type, value)),
                None => warn!(
                    "Ignoring unrecognized archive directory {}",
                    entry.path().display()
                ),
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OkrStatus;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;
    use std::thread;
    use tempfile::tempdir;

    fn snapshot(value: &str, ts: DateTime<Utc>, score: f64) -> MetricSnapshot {
        MetricSnapshot {
            dimension_type: DimensionType::Country,
            dimension_value: value.to_string(),
            timestamp: ts,
            total_entities: 40,
            per_kr_actuals: BTreeMap::from([("kr1".to_string(), 12.0)]),
            per_kr_scores: BTreeMap::from([("kr1".to_string(), score)]),
            overall_score: score,
            status: OkrStatus::Caution,
            low_confidence: false,
            tallies: BTreeMap::new(),
        }
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_round_trip_latest_before() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let saved = snapshot("France", ts(1), 71.5);

        store.save(&saved).unwrap();

        let key = ArchiveKey::of(&saved);
        let loaded = store
            .load_latest_before(&key, saved.timestamp + Duration::seconds(1))
            .unwrap();
        assert_eq!(loaded, Some(saved.clone()));

        // Strictly before.
        assert_eq!(store.load_latest_before(&key, saved.timestamp).unwrap(), None);
    }

    #[test]
    fn test_repeating_decimals_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let scores = [
            100.0 * 50.0 / 90.0,
            100.0 * 17.0 / 33.0,
            100.0 / 3.0,
            100.0 * 2.0 / 7.0,
            0.25 * 100.0 * 11.0 / 13.0 + 0.75 * 100.0 / 9.0,
        ];

        let mut saved = Vec::new();
        for (hour, score) in scores.iter().enumerate() {
            let mut s = snapshot("France", ts(1) + Duration::hours(hour as i64), *score);
            s.per_kr_actuals.insert("kr1".to_string(), 100.0 * 31.0 / 47.0);
            store.save(&s).unwrap();
            saved.push(s);
        }

        let key = ArchiveKey::new(DimensionType::Country, "France");
        assert_eq!(store.load_all(&key).unwrap(), saved);

        let last = saved.last().unwrap();
        let loaded = store
            .load_latest_before(&key, last.timestamp + Duration::seconds(1))
            .unwrap();
        assert_eq!(loaded.as_ref(), Some(last));
    }

    #[test]
    fn test_load_range_is_ordered_and_inclusive() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        for day in [9, 2, 5, 7] {
            store.save(&snapshot("France", ts(day), day as f64)).unwrap();
        }

        let key = ArchiveKey::new(DimensionType::Country, "France");
        let days: Vec<f64> = store
            .load_range(&key, ts(2), ts(7))
            .unwrap()
            .iter()
            .map(|s| s.overall_score)
            .collect();
        assert_eq!(days, vec![2.0, 5.0, 7.0]);

        assert!(store.load_range(&key, ts(7), ts(2)).unwrap().is_empty());
        assert_eq!(store.count(&key).unwrap(), 4);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("never-created"));
        let key = ArchiveKey::new(DimensionType::Site, "Oslo");

        assert!(store.load_all(&key).unwrap().is_empty());
        assert!(store.keys(DimensionType::Site).unwrap().is_empty());
    }

    #[test]
    fn test_same_timestamp_overwrites() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        store.save(&snapshot("France", ts(3), 50.0)).unwrap();
        store.save(&snapshot("France", ts(3), 55.0)).unwrap();

        let key = ArchiveKey::new(DimensionType::Country, "France");
        let all = store.load_all(&key).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].overall_score, 55.0);
    }

    #[test]
    fn test_corrupt_entries_are_skipped() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.save(&snapshot("France", ts(1), 60.0)).unwrap();

        let key = ArchiveKey::new(DimensionType::Country, "France");
        let key_dir = store.key_dir(&key);
        fs::write(key_dir.join("20250502T000000.000000000Z.json"), "{ not json").unwrap();

        // Valid JSON filed under the wrong key.
        let stray = serde_json::to_string(&snapshot("Spain", ts(3), 10.0)).unwrap();
        fs::write(key_dir.join("20250503T000000.000000000Z.json"), stray).unwrap();

        let all = store.load_all(&key).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].overall_score, 60.0);
    }

    #[test]
    fn test_hostile_values_stay_inside_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("archive");
        let store = FileSnapshotStore::new(&root);

        for value in ["..", "a/b", "", "Île-de-France", "."] {
            store.save(&snapshot(value, ts(1), 1.0)).unwrap();
        }

        assert!(!dir.path().join("country").exists());
        let values: Vec<String> = store
            .keys(DimensionType::Country)
            .unwrap()
            .into_iter()
            .map(|k| k.dimension_value)
            .collect();
        assert_eq!(values.len(), 5);
        for value in ["..", "a/b", "", "Île-de-France", "."] {
            assert!(values.iter().any(|v| v == value), "missing {value:?}");
        }
    }

    #[test]
    fn test_long_values_get_short_directories() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let long = "北京市海淀区".repeat(20);
        let longer = format!("{}中关村", long);

        for value in [&long, &longer] {
            store.save(&snapshot(value, ts(1), 42.0)).unwrap();
        }

        let key = ArchiveKey::new(DimensionType::Country, long.as_str());
        let name = encode_value(&long);
        assert!(name.len() <= MAX_COMPONENT_LEN);
        assert_ne!(name, encode_value(&longer));
        assert_eq!(decode_value(&name), None);

        let loaded = store.load_all(&key).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].dimension_value, long);

        let values: Vec<String> = store
            .keys(DimensionType::Country)
            .unwrap()
            .into_iter()
            .map(|k| k.dimension_value)
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values.contains(&long));
        assert!(values.contains(&longer));
    }

    #[test]
    fn test_shortened_name_keeps_whole_escapes() {
        for pad in 0..3 {
            let value = format!("{}{}", "a".repeat(pad), "東".repeat(60));
            let name = encode_value(&value);
            let (prefix, digest) = name.split_once(DIGEST_MARK).unwrap();
            assert_eq!(digest.len(), 32);
            assert!(prefix.len() <= SHORT_PREFIX_LEN);

            let bytes = prefix.as_bytes();
            for (i, byte) in bytes.iter().enumerate() {
                if *byte == b'%' {
                    assert!(i + 2 < bytes.len(), "split escape in {prefix}");
                }
            }
        }
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(encode_value("United Kingdom"), "United%20Kingdom");
        assert_eq!(encode_value(".."), "%2E.");
        assert_eq!(encode_value("v1.2"), "v1.2");
        assert_eq!(decode_value("United%20Kingdom").as_deref(), Some("United Kingdom"));
        assert_eq!(decode_value("%zz"), None);
        assert_eq!(decode_value("%4"), None);
    }

    #[test]
    fn test_load_nearest() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        for day in [1, 8, 15] {
            store.save(&snapshot("France", ts(day), day as f64)).unwrap();
        }

        let key = ArchiveKey::new(DimensionType::Country, "France");
        let nearest = store.load_nearest(&key, ts(7)).unwrap().unwrap();
        assert_eq!(nearest.overall_score, 8.0);
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        thread::scope(|s| {
            for writer in 0..4u32 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..5u32 {
                        let at = ts(1) + Duration::minutes(i64::from(writer * 10 + i));
                        store.save(&snapshot("France", at, 50.0)).unwrap();
                    }
                });
            }
        });

        let key = ArchiveKey::new(DimensionType::Country, "France");
        assert_eq!(store.count(&key).unwrap(), 20);

        // No temp files left behind.
        let leftovers = fs::read_dir(store.key_dir(&key))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().and_then(|x| x.to_str()) != Some("json"))
                    .unwrap_or(true)
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
