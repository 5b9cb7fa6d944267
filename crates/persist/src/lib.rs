//! Gatehouse manifest: the durable local record of what has been provisioned.
//!
//! Three facets: boolean state flags, string config values (both last-write-wins)
//! and an append-only operation log.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod memory;
mod sqlite;

pub use memory::MemoryManifest;
pub use sqlite::SqliteManifest;

pub type Detail = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("manifest detail is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manifest i/o error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("manifest lock poisoned")]
    Poisoned,
    #[error("unknown manifest key '{0}'")]
    UnknownKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    Deployed,
    LoadbalancerConfigured,
}

impl StateKey {
    pub const ALL: [StateKey; 2] = [StateKey::Deployed, StateKey::LoadbalancerConfigured];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Deployed => "deployed",
            StateKey::LoadbalancerConfigured => "loadbalancer_configured",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    Region,
    LoadbalancerPath,
    LoadbalancerUrl,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 3] = [ConfigKey::Region, ConfigKey::LoadbalancerPath, ConfigKey::LoadbalancerUrl];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Region => "region",
            ConfigKey::LoadbalancerPath => "loadbalancer_path",
            ConfigKey::LoadbalancerUrl => "loadbalancer_url",
        }
    }
}

impl FromStr for StateKey {
    type Err = ManifestError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateKey::ALL.into_iter().find(|k| k.as_str() == s).ok_or_else(|| ManifestError::UnknownKey(s.to_string()))
    }
}

impl FromStr for ConfigKey {
    type Err = ManifestError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL.into_iter().find(|k| k.as_str() == s).ok_or_else(|| ManifestError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One appended operation-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub name: String,
    pub detail: Detail,
    /// RFC 3339, UTC.
    pub ts: String,
}

impl OperationRecord {
    fn new(name: &str, detail: Detail) -> Self {
        Self { id: uuid::Uuid::new_v4().to_string(), name: name.to_string(), detail, ts: now_rfc3339() }
    }
}

/// Manifest store contract consumed by the orchestrator.
pub trait Manifest: Send + Sync {
    fn get_state(&self, key: StateKey) -> Result<Option<bool>, ManifestError>;
    fn update_state(&self, key: StateKey, value: bool) -> Result<(), ManifestError>;
    fn get_config(&self, key: ConfigKey) -> Result<Option<String>, ManifestError>;
    /// `None` clears the value.
    fn update_config(&self, key: ConfigKey, value: Option<&str>) -> Result<(), ManifestError>;
    fn log_operation(&self, name: &str, detail: Detail) -> Result<OperationRecord, ManifestError>;
    /// Most recent first.
    fn operations(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>, ManifestError>;
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_strings() {
        for k in StateKey::ALL {
            assert_eq!(k.as_str().parse::<StateKey>().unwrap(), k);
        }
        for k in ConfigKey::ALL {
            assert_eq!(k.to_string().parse::<ConfigKey>().unwrap(), k);
        }
        assert!(matches!("initialized".parse::<StateKey>(), Err(ManifestError::UnknownKey(_))));
    }

    #[test]
    fn timestamps_are_utc_rfc3339() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'), "ts={}", ts);
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
