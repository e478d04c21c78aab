use crate::connector::ConnectorManager;
use crate::data::DataManager;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles owned by an initialized pod.
#[derive(Debug)]
pub struct Pod {
    name: String,
    data: Arc<DataManager>,
    connectors: Arc<ConnectorManager>,
}

impl Pod {
    pub fn new(name: impl Into<String>, data: DataManager, connectors: ConnectorManager) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(data),
            connectors: Arc::new(connectors),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Arc<DataManager> {
        &self.data
    }

    pub fn connectors(&self) -> &Arc<ConnectorManager> {
        &self.connectors
    }
}

/// Initialized pods by name.
///
/// Only the event loop inserts; a pod exists once its `Init` command has been
/// applied and lives for the rest of the process.
#[derive(Debug, Default)]
pub struct PodRegistry {
    pods: RwLock<HashMap<String, Arc<Pod>>>,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<Pod>> {
        self.pods
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPod(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pods.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.pods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.read().is_empty()
    }

    /// Insert or replace a pod. Re-initializing a pod swaps in fresh handles;
    /// jobs holding the old ones keep them until they finish.
    pub(crate) fn insert(&self, pod: Pod) -> Option<Arc<Pod>> {
        self.pods.write().insert(pod.name.clone(), Arc::new(pod))
    }
}
