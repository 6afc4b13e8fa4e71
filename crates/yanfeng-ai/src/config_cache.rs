use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::errors::{BridgeError, BridgeResult};

/// Load-once cache of YAML files keyed by path.
///
/// Owned by whoever needs it; a file is read the first time its path is requested
/// and served from memory afterwards.
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: Mutex<HashMap<PathBuf, Arc<Value>>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_yaml(&self, path: &Path) -> BridgeResult<Arc<Value>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| BridgeError::Config("config cache lock poisoned".into()))?;

        if let Some(value) = entries.get(path) {
            return Ok(value.clone());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let value: Value = serde_yaml::from_str(&text)
            .map_err(|e| BridgeError::Config(format!("invalid YAML in {}: {}", path.display(), e)))?;
        debug!("Loaded YAML config from {}", path.display());

        let value = Arc::new(value);
        entries.insert(path.to_path_buf(), value.clone());
        Ok(value)
    }

    /// Load a file and deserialize it into `T`
    pub fn load_as<T: DeserializeOwned>(&self, path: &Path) -> BridgeResult<T> {
        let value = self.load_yaml(path)?;
        T::deserialize(value.as_ref())
            .map_err(|e| BridgeError::Config(format!("unexpected shape in {}: {}", path.display(), e)))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
