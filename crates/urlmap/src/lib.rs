//! Gatehouse URL map editing.
//!
//! The compute API has no "add one path rule" call, so the whole URL map is
//! fetched, patched in memory, stripped of output-only fields and imported back.
//! The import replaces the document atomically; a failed import leaves the
//! previous document in place.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

mod document;
mod editor;

pub use document::{append_rule, fingerprint, matcher_rule_paths, remove_rules_with_prefix, strip_output_only, OUTPUT_ONLY_FIELDS};
pub use editor::UrlMapEditor;

#[derive(Debug, thiserror::Error)]
pub enum UrlMapError {
    #[error("url map command failed: {0}")]
    Command(#[from] gatehouse_exec::ExecError),
    #[error("url map JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("url map document is not a JSON object")]
    NotAnObject,
    #[error("path matcher '{0}' not found in url map")]
    MatcherNotFound(String),
    #[error("url map changed during edit (fingerprint {before} -> {after}); re-run to pick up the new document")]
    Stale { before: String, after: String },
    #[error("writing scratch file {path}: {source}")]
    Scratch { path: String, #[source] source: std::io::Error },
}

/// A routing rule as it appears under `pathMatchers[].pathRules[]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    pub paths: SmallVec<[String; 3]>,
    pub route_action: RouteAction,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAction {
    pub url_rewrite: UrlRewrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRewrite {
    pub path_prefix_rewrite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_rewrite: Option<String>,
}

impl PathRule {
    /// Rule group for one logical path: `/p`, `/p/` and `/p/*`, rewritten to `/`.
    pub fn for_prefix(path: &str, service: impl Into<String>, host_rewrite: Option<&str>) -> Self {
        Self {
            paths: smallvec![path.to_string(), format!("{}/", path), format!("{}/*", path)],
            route_action: RouteAction {
                url_rewrite: UrlRewrite {
                    path_prefix_rewrite: "/".to_string(),
                    host_rewrite: host_rewrite.map(str::to_string),
                },
            },
            service: service.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_serializes_in_api_shape() {
        let r = PathRule::for_prefix("/acme", "svc-ref", Some("acme-xyz.a.run.app"));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["paths"], serde_json::json!(["/acme", "/acme/", "/acme/*"]));
        assert_eq!(v["routeAction"]["urlRewrite"]["pathPrefixRewrite"], "/");
        assert_eq!(v["routeAction"]["urlRewrite"]["hostRewrite"], "acme-xyz.a.run.app");
        assert_eq!(v["service"], "svc-ref");

        let plain = serde_json::to_value(PathRule::for_prefix("/acme", "svc-ref", None)).unwrap();
        assert!(plain["routeAction"]["urlRewrite"].get("hostRewrite").is_none());
    }
}
