use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::ConfigStore;

/// In-process store used for tests and previews.
#[derive(Debug, Default)]
pub struct MemoryStore {
    label: String,
    present: bool,
    values: Mutex<BTreeMap<String, String>>,
    read_only: BTreeSet<String>,
    writes: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            present: true,
            values: Mutex::new(BTreeMap::new()),
            read_only: BTreeSet::new(),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// A store that reports itself as absent.
    pub fn absent(label: impl Into<String>) -> Self {
        Self {
            present: false,
            ..Self::new(label)
        }
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Writes to `key` fail, the way a protected registry value does.
    pub fn with_read_only(mut self, key: &str) -> Self {
        self.read_only.insert(key.to_string());
        self
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    /// Every write in the order it happened.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }
}

impl ConfigStore for MemoryStore {
    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.present)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow!("memory store '{}' lock poisoned", self.label))?;
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        if !self.present {
            return Err(anyhow!("memory store '{}' does not exist", self.label));
        }
        if self.read_only.contains(key) {
            return Err(anyhow!("access denied writing '{key}' in memory store '{}'", self.label));
        }
        self.values
            .lock()
            .map_err(|_| anyhow!("memory store '{}' lock poisoned", self.label))?
            .insert(key.to_string(), value.to_string());
        self.writes
            .lock()
            .map_err(|_| anyhow!("memory store '{}' lock poisoned", self.label))?
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}
