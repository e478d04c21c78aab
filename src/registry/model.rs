use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A pod's latest model and the record it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub path: PathBuf,
    /// Increases with every [`ModelRegistry::record`], also when the path repeats
    pub version: u64,
}

#[derive(Debug, Default)]
struct Records {
    latest: HashMap<String, ModelRecord>,
    next_version: u64,
}

/// Latest model artifact per pod.
///
/// Written by the training dispatcher on success and by `ImportModel`; read
/// by `ExportModel` and `GetInference`.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    records: RwLock<Records>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pod: &str) -> Result<PathBuf> {
        self.latest(pod).map(|record| record.path)
    }

    pub fn latest(&self, pod: &str) -> Result<ModelRecord> {
        self.records
            .read()
            .latest
            .get(pod)
            .cloned()
            .ok_or_else(|| Error::UnknownModel(pod.to_string()))
    }

    pub fn contains(&self, pod: &str) -> bool {
        self.records.read().latest.contains_key(pod)
    }

    /// Record `path` as the pod's latest model, returning the one it replaces
    pub fn record(&self, pod: &str, path: impl AsRef<Path>) -> Option<PathBuf> {
        let mut records = self.records.write();
        records.next_version += 1;
        let record = ModelRecord {
            path: path.as_ref().to_path_buf(),
            version: records.next_version,
        };
        records
            .latest
            .insert(pod.to_string(), record)
            .map(|previous| previous.path)
    }
}
