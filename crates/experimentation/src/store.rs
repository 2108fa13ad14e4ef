//! Device-level assignment persistence.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ExperimentError, ExperimentResult};

pub const DEFAULT_STORAGE_KEY: &str = "unified-decisioning-experiments";
pub const RETENTION_DAYS: i64 = 30;

/// String key-value persistence, the equivalent of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String) -> ExperimentResult<()>;
}

impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    fn get_item(&self, key: &str) -> Option<String> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: String) -> ExperimentResult<()> {
        (**self).set_item(key, value)
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    items: DashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|value| value.clone())
    }

    fn set_item(&self, key: &str, value: String) -> ExperimentResult<()> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }
}

/// Key-value store mirrored to a JSON object on disk. A write only becomes
/// visible once the file holding it has been written.
pub struct FileKvStore {
    items: DashMap<String, String>,
    path: PathBuf,
    writes: Mutex<()>,
}

impl FileKvStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let items = DashMap::new();
        if path.exists() {
            let bytes = fs::read(&path)?;
            if !bytes.is_empty() {
                let stored: BTreeMap<String, String> = serde_json::from_slice(&bytes)
                    .map_err(|err| io::Error::new(ErrorKind::InvalidData, format!("{err}")))?;
                for (key, value) in stored {
                    items.insert(key, value);
                }
            }
        }
        Ok(Self {
            items,
            path,
            writes: Mutex::new(()),
        })
    }

    fn persist(&self, snapshot: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| io::Error::new(ErrorKind::Other, format!("{err}")))?;
        fs::write(&self.path, json)
    }
}

impl KeyValueStore for FileKvStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|value| value.clone())
    }

    fn set_item(&self, key: &str, value: String) -> ExperimentResult<()> {
        let _guard = self.writes.lock();
        let mut snapshot: BTreeMap<String, String> = self
            .items
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.insert(key.to_string(), value.clone());
        self.persist(&snapshot)
            .map_err(|err| ExperimentError::storage(format!("{}: {err}", self.path.display())))?;
        self.items.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAssignment {
    pub treatment: String,
    /// `YYYY-MM-DD`
    pub date: String,
}

type Assignments = BTreeMap<String, StoredAssignment>;

/// Remembers which treatment a device was given per experiment. All entries
/// live in one JSON blob under a single key.
pub struct AssignmentStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl AssignmentStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(kv, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    fn read(&self) -> Assignments {
        let Some(raw) = self.kv.get_item(&self.key) else {
            return Assignments::new();
        };
        match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(key = %self.key, error = %err, "discarding unreadable assignment blob");
                Assignments::new()
            }
        }
    }

    pub fn all(&self) -> BTreeMap<String, StoredAssignment> {
        self.read()
    }

    pub fn get(&self, experiment_id: &str) -> Option<String> {
        self.read()
            .get(experiment_id)
            .map(|entry| entry.treatment.clone())
    }

    pub fn set(&self, experiment_id: &str, treatment: &str) -> ExperimentResult<()> {
        self.set_at(experiment_id, treatment, Utc::now())
    }

    /// Writes the assignment dated `now`, dropping entries stored more than
    /// 30 calendar days before it. Entries with an unreadable date are kept.
    pub fn set_at(&self, experiment_id: &str, treatment: &str, now: DateTime<Utc>) -> ExperimentResult<()> {
        let mut assignments = self.read();
        let today = now.date_naive();
        assignments.retain(|id, entry| {
            let Some(stored) = parse_day(&entry.date) else {
                return true;
            };
            let keep = (today - stored).num_days() <= RETENTION_DAYS;
            if !keep {
                debug!(experiment = %id, date = %entry.date, "evicting stale assignment");
            }
            keep
        });
        assignments.insert(
            experiment_id.to_string(),
            StoredAssignment {
                treatment: treatment.to_string(),
                date: now.date_naive().format("%Y-%m-%d").to_string(),
            },
        );
        let json = serde_json::to_string(&assignments)
            .map_err(|err| ExperimentError::storage(err.to_string()))?;
        self.kv.set_item(&self.key, json)
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}
