//! Point-in-time snapshot of the entity set, used to bound WAL replay cost.
//!
//! Grounded on the keep-N-most-recent cleanup contract of the teacher's
//! event-sourcing snapshot store (`enterprise/eventsource/snapshot.rs`),
//! adapted from per-aggregate snapshots to a single whole-store snapshot
//! file per compaction, as spec §4.1 requires.

use crate::entity::Entity;
use crate::error::FiberResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How many compacted snapshots are retained on disk; older ones are
/// deleted after a successful compaction (spec §3 "Lifecycle").
pub const RETAINED_SNAPSHOTS: usize = 3;

/// Bookkeeping carried alongside a snapshot's entity map.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotMetadata {
    /// Number of entities materialized into this snapshot.
    pub total_entries: usize,
    /// When the compaction that produced this snapshot ran.
    pub last_compaction: Option<DateTime<Utc>>,
}

/// `{timestamp, entities, metadata}` as specified in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Wall-clock time the snapshot was written.
    pub timestamp: DateTime<Utc>,
    /// `"type:id"` -> Entity.
    pub entities: BTreeMap<String, Entity>,
    /// Entry count and compaction bookkeeping.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Build a snapshot from the current logical entity set.
    pub fn new(entities: BTreeMap<String, Entity>, timestamp: DateTime<Utc>) -> Self {
        let total_entries = entities.len();
        Self {
            timestamp,
            entities,
            metadata: SnapshotMetadata {
                total_entries,
                last_compaction: Some(timestamp),
            },
        }
    }

    /// Snapshot file name for a given wall-clock timestamp, per the
    /// `wal.log.snapshot.<unixMillis>` on-disk layout (spec §6).
    pub fn file_name(timestamp: DateTime<Utc>) -> String {
        format!("wal.log.snapshot.{}", timestamp.timestamp_millis())
    }

    /// Write this snapshot to `<dir>/wal.log.snapshot.<unixMillis>`.
    pub fn write_to(&self, dir: &Path) -> FiberResult<PathBuf> {
        let path = dir.join(Self::file_name(self.timestamp));
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Load a snapshot from an explicit file path.
    pub fn read_from(path: &Path) -> FiberResult<Snapshot> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Find the most recently written snapshot file in `dir`, if any,
    /// ordered by the embedded millisecond timestamp (not mtime, so
    /// ordering is stable even across filesystems with coarse mtime
    /// resolution).
    pub fn find_latest(dir: &Path) -> FiberResult<Option<PathBuf>> {
        let candidates = list_snapshot_files(dir)?;
        Ok(candidates.into_iter().max_by_key(|(ts, _)| *ts).map(|(_, p)| p))
    }

    /// Delete every snapshot file in `dir` beyond the `RETAINED_SNAPSHOTS`
    /// most recent.
    pub fn prune_old(dir: &Path) -> FiberResult<()> {
        let mut candidates = list_snapshot_files(dir)?;
        candidates.sort_by_key(|(ts, _)| std::cmp::Reverse(*ts));
        for (_, path) in candidates.into_iter().skip(RETAINED_SNAPSHOTS) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

fn list_snapshot_files(dir: &Path) -> FiberResult<Vec<(i64, PathBuf)>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(suffix) = name.strip_prefix("wal.log.snapshot.") {
            if let Ok(ts) = suffix.parse::<i64>() {
                out.push((ts, entry.path()));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_finds_latest_snapshot() {
        let dir = tempdir().unwrap();
        let s1 = Snapshot::new(BTreeMap::new(), Utc::now());
        s1.write_to(dir.path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let s2 = Snapshot::new(BTreeMap::new(), Utc::now());
        let path2 = s2.write_to(dir.path()).unwrap();

        let latest = Snapshot::find_latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest, path2);
    }

    #[test]
    fn prunes_to_retained_count() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            let ts = Utc::now() + chrono::Duration::milliseconds(i);
            Snapshot::new(BTreeMap::new(), ts).write_to(dir.path()).unwrap();
        }
        Snapshot::prune_old(dir.path()).unwrap();
        let remaining = list_snapshot_files(dir.path()).unwrap();
        assert_eq!(remaining.len(), RETAINED_SNAPSHOTS);
    }
}
