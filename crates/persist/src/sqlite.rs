use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use metrics::{counter, histogram};
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::{ConfigKey, Detail, Manifest, ManifestError, OperationRecord, StateKey};

/// SQLite-backed manifest. Simple and synchronous; one file per project.
pub struct SqliteManifest {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteManifest {
    pub fn open(path: &str) -> Result<Self, ManifestError> {
        let started = std::time::Instant::now();
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| ManifestError::Io { path: parent.display().to_string(), source })?;
        }
        let db = rusqlite::Connection::open(path)?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS state (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS operations (
                seq    INTEGER PRIMARY KEY AUTOINCREMENT,
                id     TEXT NOT NULL,
                name   TEXT NOT NULL,
                detail TEXT NOT NULL,
                ts     TEXT NOT NULL
            );",
        )?;
        histogram!("manifest_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path = %path, "manifest opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, ManifestError> {
        self.db.lock().map_err(|_| ManifestError::Poisoned)
    }
}

impl Manifest for SqliteManifest {
    fn get_state(&self, key: StateKey) -> Result<Option<bool>, ManifestError> {
        let db = self.conn()?;
        let v: Option<i64> = db
            .query_row("SELECT value FROM state WHERE key = ?1", [key.as_str()], |row| row.get(0))
            .optional()?;
        Ok(v.map(|v| v != 0))
    }

    fn update_state(&self, key: StateKey, value: bool) -> Result<(), ManifestError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO state(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key.as_str(), value as i64),
        )?;
        counter!("manifest_write_total", 1u64, "facet" => "state");
        Ok(())
    }

    fn get_config(&self, key: ConfigKey) -> Result<Option<String>, ManifestError> {
        let db = self.conn()?;
        let v = db
            .query_row("SELECT value FROM config WHERE key = ?1", [key.as_str()], |row| row.get(0))
            .optional()?;
        Ok(v)
    }

    fn update_config(&self, key: ConfigKey, value: Option<&str>) -> Result<(), ManifestError> {
        let db = self.conn()?;
        match value {
            Some(v) => {
                db.execute(
                    "INSERT INTO config(key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    (key.as_str(), v),
                )?;
            }
            None => {
                db.execute("DELETE FROM config WHERE key = ?1", [key.as_str()])?;
            }
        }
        counter!("manifest_write_total", 1u64, "facet" => "config");
        Ok(())
    }

    fn log_operation(&self, name: &str, detail: Detail) -> Result<OperationRecord, ManifestError> {
        let rec = OperationRecord::new(name, detail);
        let detail_json = serde_json::to_string(&rec.detail)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO operations(id, name, detail, ts) VALUES (?1, ?2, ?3, ?4)",
            (&rec.id, &rec.name, &detail_json, &rec.ts),
        )?;
        counter!("manifest_write_total", 1u64, "facet" => "log");
        Ok(rec)
    }

    fn operations(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>, ManifestError> {
        let db = self.conn()?;
        let cap = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = db.prepare("SELECT id, name, detail, ts FROM operations ORDER BY seq DESC LIMIT ?1")?;
        let mut rows = stmt.query([cap])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let detail: String = row.get(2)?;
            out.push(OperationRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                detail: serde_json::from_str(&detail)?,
                ts: row.get(3)?,
            });
        }
        Ok(out)
    }
}
