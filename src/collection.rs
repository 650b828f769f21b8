use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::domain::{Reading, SourceIdentity};
use crate::error::PlateError;
use crate::parser::RecordParser;

type OrderKey = (NaiveDateTime, SourceIdentity);

/// Parsed readings keyed by source identity, kept in acquisition order.
#[derive(Debug, Default, Clone)]
pub struct ReadingCollection {
    keys: HashMap<SourceIdentity, NaiveDateTime>,
    ordered: BTreeMap<OrderKey, Arc<Reading>>,
}

impl ReadingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every file with `extension` directly inside `dir`. Files that
    /// fail to parse are logged and left out.
    pub fn scan(dir: &Path, extension: &str) -> Result<Self, PlateError> {
        let entries = fs::read_dir(dir)
            .map_err(|err| PlateError::Filesystem(format!("read {}: {err}", dir.display())))?;

        let mut collection = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|err| PlateError::Filesystem(err.to_string()))?
                .path();
            if !path.is_file() || !has_extension(&path, extension) {
                continue;
            }
            match RecordParser::parse(&path) {
                Ok(reading) => {
                    collection.add(reading);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping file"),
            }
        }
        debug!(dir = %dir.display(), readings = collection.len(), "directory scanned");
        Ok(collection)
    }

    /// Inserts `reading`, replacing any entry with the same identity.
    pub fn add(&mut self, reading: Reading) {
        let identity = reading.identity().clone();
        let acquired_at = reading.acquired_at();
        if let Some(previous) = self.keys.insert(identity.clone(), acquired_at) {
            self.ordered.remove(&(previous, identity.clone()));
        }
        self.ordered
            .insert((acquired_at, identity), Arc::new(reading));
    }

    /// Removes the entry for `identity`, returning it if present.
    pub fn remove(&mut self, identity: &SourceIdentity) -> Option<Arc<Reading>> {
        let acquired_at = self.keys.remove(identity)?;
        self.ordered.remove(&(acquired_at, identity.clone()))
    }

    pub fn get(&self, identity: &SourceIdentity) -> Option<&Reading> {
        let acquired_at = self.keys.get(identity)?;
        self.ordered
            .get(&(*acquired_at, identity.clone()))
            .map(Arc::as_ref)
    }

    pub fn contains(&self, identity: &SourceIdentity) -> bool {
        self.keys.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Readings ascending by acquisition time, ties broken by identity.
    pub fn ordered_by_time(&self) -> impl Iterator<Item = &Reading> + '_ {
        self.ordered.values().map(Arc::as_ref)
    }

    /// Immutable view of the current state for a render worker.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            readings: self.ordered.values().cloned().collect(),
        }
    }
}

/// Time-ordered readings detached from the live collection.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    readings: Arc<[Arc<Reading>]>,
}

impl Snapshot {
    pub fn readings(&self) -> &[Arc<Reading>] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
