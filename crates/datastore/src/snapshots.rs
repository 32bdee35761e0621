//! Durable store of forecast-bounds snapshots.
//!
//! One ordered sequence per asset, pruned to a retention window and
//! persisted as a single versioned JSON document. Appends update memory
//! first and persist in the background; the file is written through a
//! temp-then-rename so a crash mid-write never corrupts the previous
//! document. Loading tolerates a missing, unparsable, or wrong-version
//! file by starting empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{BoundsSnapshot, Error, ProbabilityBounds};

/// Document schema version, compared verbatim on load.
const STORE_VERSION: &str = "1";

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    snapshots: HashMap<String, Vec<BoundsSnapshot>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Append-only, retention-bounded snapshot store.
///
/// Clones share state; the store is the single writer of its file.
#[derive(Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    retention_ms: i64,
    snapshots: Arc<DashMap<String, Vec<BoundsSnapshot>>>,
    /// Held across every file write, so concurrent persists serialize.
    last_persist_error: Arc<Mutex<Option<String>>>,
}

impl SnapshotStore {
    /// Load the store from `path`, starting empty on any problem.
    pub fn load(path: impl Into<PathBuf>, retention_hours: i64) -> Self {
        let path = path.into();
        let snapshots = DashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<StoreDocument>(&contents) {
                Ok(doc) if doc.version == STORE_VERSION => {
                    let mut total = 0usize;
                    for (asset, seq) in doc.snapshots {
                        total += seq.len();
                        snapshots.insert(asset, seq);
                    }
                    info!(
                        "Loaded {} snapshots across {} assets from {:?}",
                        total,
                        snapshots.len(),
                        path
                    );
                }
                Ok(doc) => {
                    warn!(
                        "Snapshot store version mismatch ({} != {}), starting empty",
                        doc.version, STORE_VERSION
                    );
                }
                Err(e) => {
                    warn!("Failed to parse snapshot store: {}, starting empty", e);
                }
            },
            Err(_) => {
                info!("No snapshot store at {:?}, starting empty", path);
            }
        }

        let store = Self {
            path,
            retention_ms: retention_hours * 3_600_000,
            snapshots: Arc::new(snapshots),
            last_persist_error: Arc::new(Mutex::new(None)),
        };
        store.prune_at(now_ms());
        store
    }

    /// Record a snapshot of `bounds` taken now, prune, and persist.
    ///
    /// Returns once memory is updated; the file write runs on a blocking
    /// task. A failed write is logged and recorded in the health slot;
    /// memory is never rolled back, and the next successful persist
    /// rewrites the full document. Must be called from within a Tokio
    /// runtime.
    pub fn append(&self, asset: &str, bounds: ProbabilityBounds) {
        let now = now_ms();
        self.insert(
            asset,
            BoundsSnapshot {
                timestamp: now,
                bounds,
            },
        );
        self.prune_at(now);
        debug!(
            "Appended bounds snapshot for {} ({} stored)",
            asset,
            self.snapshot_count(asset)
        );
        self.persist_async();
    }

    /// Raw insert, no prune or persist.
    pub(crate) fn insert(&self, asset: &str, snapshot: BoundsSnapshot) {
        self.snapshots
            .entry(asset.to_string())
            .or_default()
            .push(snapshot);
    }

    /// Remove entries older than the retention window. Idempotent.
    pub fn prune(&self) {
        self.prune_at(now_ms());
    }

    fn prune_at(&self, now_ms: i64) {
        let cutoff = now_ms - self.retention_ms;
        for mut entry in self.snapshots.iter_mut() {
            entry.value_mut().retain(|s| s.timestamp >= cutoff);
        }
        self.snapshots.retain(|_, seq| !seq.is_empty());
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Snapshots of `asset` whose timestamp satisfies `predicate`,
    /// in stored order. Read-only.
    pub fn query(&self, asset: &str, predicate: impl Fn(i64) -> bool) -> Vec<BoundsSnapshot> {
        self.snapshots
            .get(asset)
            .map(|seq| {
                seq.iter()
                    .filter(|s| predicate(s.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The snapshot closest in time to `target_ms`, or `None` if the
    /// asset has no history. Exact-distance ties keep the first snapshot
    /// in stored order.
    pub fn nearest(&self, asset: &str, target_ms: i64) -> Option<BoundsSnapshot> {
        let seq = self.snapshots.get(asset)?;
        let mut best: Option<&BoundsSnapshot> = None;
        let mut best_distance = i64::MAX;
        for snapshot in seq.iter() {
            let distance = (snapshot.timestamp - target_ms).abs();
            if distance < best_distance {
                best_distance = distance;
                best = Some(snapshot);
            }
        }
        best.cloned()
    }

    /// Whether `asset` has at least `min_count` snapshots AND the oldest
    /// is at least `min_hours` old. Gates analytics that need a minimum
    /// observation window.
    pub fn sufficiency(&self, asset: &str, min_count: usize, min_hours: f64) -> bool {
        let Some(seq) = self.snapshots.get(asset) else {
            return false;
        };
        if seq.len() < min_count {
            return false;
        }
        let now = now_ms();
        seq.iter()
            .map(|s| s.timestamp)
            .min()
            .map(|oldest| (now - oldest) as f64 / 3_600_000.0 >= min_hours)
            .unwrap_or(false)
    }

    pub fn snapshot_count(&self, asset: &str) -> usize {
        self.snapshots.get(asset).map(|seq| seq.len()).unwrap_or(0)
    }

    pub fn assets(&self) -> Vec<String> {
        self.snapshots.iter().map(|e| e.key().clone()).collect()
    }

    /// The last persistence failure, if the most recent write failed.
    pub fn persistence_health(&self) -> Option<String> {
        self.last_persist_error.lock().unwrap().clone()
    }

    // ── Persistence ───────────────────────────────────────────────────

    fn document(&self) -> StoreDocument {
        StoreDocument {
            version: STORE_VERSION.to_string(),
            snapshots: self
                .snapshots
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    fn persist_async(&self) {
        let json = match serde_json::to_string_pretty(&self.document()) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize snapshot store: {}", e);
                return;
            }
        };
        let path = self.path.clone();
        let health = Arc::clone(&self.last_persist_error);
        tokio::task::spawn_blocking(move || {
            let mut slot = health.lock().unwrap();
            match write_atomic(&path, &json) {
                Ok(()) => *slot = None,
                Err(e) => {
                    warn!("Failed to persist snapshot store: {}", e);
                    *slot = Some(e.to_string());
                }
            }
        });
    }

    /// Synchronous atomic persist, for shutdown.
    pub fn flush(&self) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&self.document())?;
        let mut slot = self.last_persist_error.lock().unwrap();
        let result = write_atomic(&self.path, &json);
        match &result {
            Ok(()) => *slot = None,
            Err(e) => *slot = Some(e.to_string()),
        }
        result.map_err(Error::from)
    }
}

/// Write `contents` to a temp file beside `path`, then rename over it.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BoundLevel;
    use std::sync::atomic::{AtomicU64, Ordering};

    static STORE_ID: AtomicU64 = AtomicU64::new(0);

    fn temp_store_path() -> PathBuf {
        let id = STORE_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "range-bot-store-{}-{}.json",
            std::process::id(),
            id
        ))
    }

    fn bounds(below_at_65k: f64) -> ProbabilityBounds {
        ProbabilityBounds {
            levels: vec![BoundLevel {
                price: 65_000.0,
                probability_above: 1.0 - below_at_65k,
                probability_below: below_at_65k,
            }],
        }
    }

    fn snap(timestamp: i64) -> BoundsSnapshot {
        BoundsSnapshot {
            timestamp,
            bounds: bounds(0.5),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let store = SnapshotStore::load(temp_store_path(), 48);
        assert!(store.assets().is_empty());
        assert_eq!(store.snapshot_count("BTC"), 0);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let path = temp_store_path();
        std::fs::write(&path, "{not json").unwrap();
        let store = SnapshotStore::load(&path, 48);
        assert!(store.assets().is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_version_mismatch_loads_empty() {
        let path = temp_store_path();
        let doc = serde_json::json!({
            "version": "0",
            "snapshots": { "BTC": [ { "timestamp": now_ms(), "bounds": { "levels": [] } } ] }
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        let store = SnapshotStore::load(&path, 48);
        assert_eq!(store.snapshot_count("BTC"), 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = temp_store_path();
        let store = SnapshotStore::load(&path, 48);
        let now = now_ms();
        store.insert(
            "BTC",
            BoundsSnapshot {
                timestamp: now - 10_000,
                bounds: bounds(0.2),
            },
        );
        store.insert(
            "BTC",
            BoundsSnapshot {
                timestamp: now - 5_000,
                bounds: bounds(0.8),
            },
        );
        store.insert("ETH", snap(now - 1_000));
        store.flush().unwrap();

        let reloaded = SnapshotStore::load(&path, 48);
        assert_eq!(reloaded.snapshot_count("BTC"), 2);
        assert_eq!(reloaded.snapshot_count("ETH"), 1);
        let original = store.query("BTC", |_| true);
        let restored = reloaded.query("BTC", |_| true);
        assert_eq!(original, restored, "sequences survive the round trip");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_prune_removes_only_expired_entries_and_is_idempotent() {
        let store = SnapshotStore::load(temp_store_path(), 48);
        let now = now_ms();
        let retention_ms = 48 * 3_600_000;
        store.insert("BTC", snap(now - retention_ms - 3_600_000)); // expired
        store.insert("BTC", snap(now - retention_ms + 3_600_000)); // kept
        store.insert("BTC", snap(now - 1_000)); // kept

        store.prune();
        assert_eq!(store.snapshot_count("BTC"), 2);

        store.prune();
        assert_eq!(store.snapshot_count("BTC"), 2, "second prune is a no-op");
    }

    #[test]
    fn test_prune_drops_assets_left_empty() {
        let store = SnapshotStore::load(temp_store_path(), 1);
        let now = now_ms();
        store.insert("DOGE", snap(now - 2 * 3_600_000));
        store.prune();
        assert!(store.assets().is_empty());
    }

    #[tokio::test]
    async fn test_append_prunes_and_survives_flush() {
        let path = temp_store_path();
        let store = SnapshotStore::load(&path, 48);
        store.append("BTC", bounds(0.4));
        assert_eq!(store.snapshot_count("BTC"), 1);
        store.flush().unwrap();
        assert!(store.persistence_health().is_none());

        let reloaded = SnapshotStore::load(&path, 48);
        assert_eq!(reloaded.snapshot_count("BTC"), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_query_filters_by_timestamp() {
        let store = SnapshotStore::load(temp_store_path(), 48);
        let now = now_ms();
        store.insert("BTC", snap(now - 30_000));
        store.insert("BTC", snap(now - 20_000));
        store.insert("BTC", snap(now - 10_000));

        let recent = store.query("BTC", |ts| ts > now - 25_000);
        assert_eq!(recent.len(), 2);
        assert!(store.query("ETH", |_| true).is_empty());
    }

    #[test]
    fn test_nearest_picks_minimum_distance() {
        let store = SnapshotStore::load(temp_store_path(), i64::MAX / 3_600_000);
        store.insert("BTC", snap(100));
        store.insert("BTC", snap(200));
        store.insert("BTC", snap(400));

        let hit = store.nearest("BTC", 250).unwrap();
        assert_eq!(hit.timestamp, 200, "distance 50 beats distance 150");
        assert!(store.nearest("ETH", 250).is_none());
    }

    #[test]
    fn test_nearest_tie_keeps_first_in_stored_order() {
        let store = SnapshotStore::load(temp_store_path(), i64::MAX / 3_600_000);
        store.insert("BTC", snap(100));
        store.insert("BTC", snap(300));

        let hit = store.nearest("BTC", 200).unwrap();
        assert_eq!(hit.timestamp, 100);
    }

    #[test]
    fn test_sufficiency_requires_count_and_age() {
        let store = SnapshotStore::load(temp_store_path(), 48);
        let now = now_ms();

        assert!(!store.sufficiency("BTC", 1, 0.0), "empty asset is insufficient");

        store.insert("BTC", snap(now - 7 * 3_600_000));
        store.insert("BTC", snap(now - 3 * 3_600_000));
        assert!(!store.sufficiency("BTC", 3, 6.0), "too few snapshots");
        assert!(store.sufficiency("BTC", 2, 6.0));

        store.insert("BTC", snap(now - 1_000));
        assert!(store.sufficiency("BTC", 3, 6.0));
        assert!(!store.sufficiency("BTC", 3, 12.0), "oldest is too young");
    }

    #[test]
    fn test_flush_failure_sets_health_and_keeps_memory() {
        let blocker = temp_store_path();
        std::fs::write(&blocker, "plain file").unwrap();
        // Path has a regular file as its parent directory — writes fail.
        let store = SnapshotStore::load(blocker.join("store.json"), 48);
        store.insert("BTC", snap(now_ms()));

        assert!(store.flush().is_err());
        assert!(store.persistence_health().is_some());
        assert_eq!(store.snapshot_count("BTC"), 1, "memory is not rolled back");
        std::fs::remove_file(&blocker).ok();
    }
}
