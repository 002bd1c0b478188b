//! Snapshot stores keyed by match id and tick
//!
//! Each record holds the full serialized `GameState` for one tick and is
//! upserted, so replaying the same tick overwrites instead of duplicating.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::game::GameState;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The narrow persistence interface the match loop relies on
pub trait SnapshotStore: Send + Sync {
    /// Upsert the state recorded for `tick`
    fn put(&self, match_id: Uuid, tick: u64, state: &GameState) -> Result<(), StoreError>;

    /// State at the highest stored tick
    fn latest(&self, match_id: Uuid) -> Result<Option<GameState>, StoreError>;

    /// Every match with at least one snapshot
    fn matches(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Drop every snapshot of a match, before a fresh run reuses its id
    fn clear(&self, match_id: Uuid) -> Result<(), StoreError>;
}

/// In-process store, lost on restart
#[derive(Default)]
pub struct MemorySnapshotStore {
    records: RwLock<HashMap<Uuid, BTreeMap<u64, String>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_count(&self, match_id: Uuid) -> usize {
        self.records.read().get(&match_id).map_or(0, BTreeMap::len)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, match_id: Uuid, tick: u64, state: &GameState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        self.records
            .write()
            .entry(match_id)
            .or_default()
            .insert(tick, json);
        Ok(())
    }

    fn latest(&self, match_id: Uuid) -> Result<Option<GameState>, StoreError> {
        let records = self.records.read();
        let Some((_, json)) = records.get(&match_id).and_then(|ticks| ticks.last_key_value()) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(json)?))
    }

    fn matches(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.records.read().keys().copied().collect())
    }

    fn clear(&self, match_id: Uuid) -> Result<(), StoreError> {
        self.records.write().remove(&match_id);
        Ok(())
    }
}

/// One JSON file per tick under `<root>/<match_id>/<tick>.json`
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn match_dir(&self, match_id: Uuid) -> PathBuf {
        self.root.join(match_id.to_string())
    }

    fn tick_of(path: &Path) -> Option<u64> {
        if path.extension()? != "json" {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn put(&self, match_id: Uuid, tick: u64, state: &GameState) -> Result<(), StoreError> {
        let dir = self.match_dir(match_id);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec(state)?;
        let tmp = dir.join(format!("{:010}.json.tmp", tick));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(format!("{:010}.json", tick)))?;
        Ok(())
    }

    fn latest(&self, match_id: Uuid) -> Result<Option<GameState>, StoreError> {
        let dir = self.match_dir(match_id);
        if !dir.exists() {
            return Ok(None);
        }

        let mut newest: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if let Some(tick) = Self::tick_of(&path) {
                if newest.as_ref().map_or(true, |(best, _)| tick > *best) {
                    newest = Some((tick, path));
                }
            }
        }

        match newest {
            Some((_, path)) => Ok(Some(serde_json::from_slice(&fs::read(path)?)?)),
            None => Ok(None),
        }
    }

    fn matches(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|s| Uuid::parse_str(s).ok()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn clear(&self, match_id: Uuid) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.match_dir(match_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
