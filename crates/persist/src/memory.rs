use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{ConfigKey, Detail, Manifest, ManifestError, OperationRecord, StateKey};

#[derive(Default)]
struct Inner {
    state: BTreeMap<StateKey, bool>,
    config: BTreeMap<ConfigKey, String>,
    log: Vec<OperationRecord>,
}

/// In-process manifest for tests and dry runs. Nothing is written to disk.
#[derive(Default)]
pub struct MemoryManifest {
    inner: Mutex<Inner>,
}

impl MemoryManifest {
    pub fn new() -> Self { Self::default() }

    pub fn with_state(self, key: StateKey, value: bool) -> Self {
        if let Ok(mut g) = self.inner.lock() { g.state.insert(key, value); }
        self
    }

    pub fn with_config(self, key: ConfigKey, value: &str) -> Self {
        if let Ok(mut g) = self.inner.lock() { g.config.insert(key, value.to_string()); }
        self
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> Result<T, ManifestError> {
        let mut g = self.inner.lock().map_err(|_| ManifestError::Poisoned)?;
        Ok(f(&mut g))
    }
}

impl Manifest for MemoryManifest {
    fn get_state(&self, key: StateKey) -> Result<Option<bool>, ManifestError> {
        self.with(|i| i.state.get(&key).copied())
    }

    fn update_state(&self, key: StateKey, value: bool) -> Result<(), ManifestError> {
        self.with(|i| { i.state.insert(key, value); })
    }

    fn get_config(&self, key: ConfigKey) -> Result<Option<String>, ManifestError> {
        self.with(|i| i.config.get(&key).cloned())
    }

    fn update_config(&self, key: ConfigKey, value: Option<&str>) -> Result<(), ManifestError> {
        self.with(|i| match value {
            Some(v) => { i.config.insert(key, v.to_string()); }
            None => { i.config.remove(&key); }
        })
    }

    fn log_operation(&self, name: &str, detail: Detail) -> Result<OperationRecord, ManifestError> {
        let rec = OperationRecord::new(name, detail);
        self.with(|i| i.log.push(rec.clone()))?;
        Ok(rec)
    }

    fn operations(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>, ManifestError> {
        self.with(|i| {
            let take = limit.unwrap_or(i.log.len());
            i.log.iter().rev().take(take).cloned().collect()
        })
    }
}
