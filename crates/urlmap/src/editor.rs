use std::path::PathBuf;

use gatehouse_core::Topology;
use gatehouse_exec::{CommandExecutor, Gcloud};
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::document::{append_rule, fingerprint, remove_rules_with_prefix, strip_output_only};
use crate::{PathRule, UrlMapError};

/// Fetch/patch/import cycle against the shared URL map.
///
/// Read-modify-write with no server-side lock: a fingerprint preflight narrows the
/// window between describe and import but concurrent editors can still race.
pub struct UrlMapEditor<'a> {
    exec: &'a dyn CommandExecutor,
    gcloud: &'a Gcloud,
    topology: &'a Topology,
    scratch: PathBuf,
    preflight: bool,
}

fn default_scratch() -> PathBuf {
    std::env::var_os("GATEHOUSE_URLMAP_SCRATCH")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("url-map-update.json"))
}

impl<'a> UrlMapEditor<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, gcloud: &'a Gcloud, topology: &'a Topology) -> Self {
        // Enabled by default; set GATEHOUSE_DISABLE_URLMAP_PREFLIGHT=1 to skip the fingerprint guard.
        let preflight = std::env::var("GATEHOUSE_DISABLE_URLMAP_PREFLIGHT")
            .map(|v| !(v == "1" || v.eq_ignore_ascii_case("true")))
            .unwrap_or(true);
        Self { exec, gcloud, topology, scratch: default_scratch(), preflight }
    }

    pub fn with_scratch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch = path.into();
        self
    }

    pub fn with_preflight(mut self, on: bool) -> Self {
        self.preflight = on;
        self
    }

    /// Current document as returned by `describe --format=json`.
    pub fn fetch(&self) -> Result<Json, UrlMapError> {
        let inv = self.gcloud.command(["compute", "url-maps", "describe", self.topology.url_map.as_str(), "--format=json"]);
        let out = self.exec.run_checked(&inv)?;
        let doc: Json = serde_json::from_str(&out.stdout)?;
        if !doc.is_object() {
            return Err(UrlMapError::NotAnObject);
        }
        Ok(doc)
    }

    /// Route `path`, `path/` and `path/*` to `service` (a fully-qualified backend
    /// service reference), rewriting the prefix to `/`. Nothing is imported when an
    /// identical rule is already in place.
    pub fn add_rule(&self, path: &str, service: &str, host_rewrite: Option<&str>) -> Result<(), UrlMapError> {
        let rule = PathRule::for_prefix(path, service, host_rewrite);
        let mut doc = self.fetch()?;
        let seen = fingerprint(&doc);
        if !append_rule(&mut doc, &self.topology.path_matcher, &rule)? {
            info!(path = %path, "path rule already in place; url map left as is");
            return Ok(());
        }
        self.write_back(seen, doc)?;
        info!(path = %path, service = %service, host_rewrite = ?host_rewrite, "path rule added");
        Ok(())
    }

    /// Remove every rule in any matcher with a path starting with `prefix`. Returns how many went.
    pub fn remove_rule(&self, prefix: &str) -> Result<usize, UrlMapError> {
        let mut doc = self.fetch()?;
        let seen = fingerprint(&doc);
        let removed = remove_rules_with_prefix(&mut doc, prefix);
        if removed == 0 {
            info!(prefix = %prefix, "no path rules matched; url map left as is");
            return Ok(0);
        }
        self.write_back(seen, doc)?;
        info!(prefix = %prefix, removed, "path rules removed");
        Ok(removed)
    }

    fn write_back(&self, seen: Option<String>, doc: Json) -> Result<(), UrlMapError> {
        if self.preflight {
            if let Some(before) = seen {
                let after = fingerprint(&self.fetch()?).unwrap_or_default();
                if !after.is_empty() && after != before {
                    counter!("urlmap_stale_blocked_total", 1u64);
                    warn!(url_map = %self.topology.url_map, before = %before, after = %after, "url map changed under us");
                    return Err(UrlMapError::Stale { before, after });
                }
            }
        }

        let doc = strip_output_only(doc);
        let body = serde_json::to_string_pretty(&doc)?;
        let scratch = self.scratch.display().to_string();
        std::fs::write(&self.scratch, body).map_err(|source| UrlMapError::Scratch { path: scratch.clone(), source })?;
        debug!(scratch = %scratch, "url map written to scratch file");

        let inv = self.gcloud.command([
            "compute".to_string(),
            "url-maps".to_string(),
            "import".to_string(),
            self.topology.url_map.clone(),
            format!("--source={}", scratch),
            "--quiet".to_string(),
        ]);
        match self.exec.run_checked(&inv) {
            Ok(_) => {
                counter!("urlmap_import_total", 1u64, "outcome" => "ok");
                Ok(())
            }
            Err(e) => {
                counter!("urlmap_import_total", 1u64, "outcome" => "error");
                Err(e.into())
            }
        }
    }
}
