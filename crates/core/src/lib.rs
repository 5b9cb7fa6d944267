//! Gatehouse core types: project context, shared load-balancer topology and
//! the resource names derived from them.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod names;

pub use names::{normalize_path, BACKEND_SERVICES_BASE};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn require(field: &'static str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Invalid { field, reason: "must not be empty".into() });
    }
    Ok(())
}

/// Per-project configuration, resolved before any operation and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectContext {
    pub project_name: String,
    pub gcp_project_id: String,
    pub default_region: String,
    pub service_account: String,
}

impl ProjectContext {
    pub fn new(
        project_name: impl Into<String>,
        gcp_project_id: impl Into<String>,
        default_region: impl Into<String>,
        service_account: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let ctx = Self {
            project_name: project_name.into(),
            gcp_project_id: gcp_project_id.into(),
            default_region: default_region.into(),
            service_account: service_account.into(),
        };
        require("project_name", &ctx.project_name)?;
        require("gcp_project_id", &ctx.gcp_project_id)?;
        require("default_region", &ctx.default_region)?;
        if ctx.project_name.contains('/') {
            return Err(CoreError::Invalid { field: "project_name", reason: "must not contain '/'".into() });
        }
        Ok(ctx)
    }

    pub fn neg_name(&self) -> String { format!("{}-neg", self.project_name) }

    pub fn backend_name(&self) -> String { format!("{}-backend", self.project_name) }

    pub fn security_policy_name(&self) -> String {
        format!("default-security-policy-for-backend-service-{}", self.backend_name())
    }

    pub fn oauth_display_name(&self) -> String { format!("IAP-{}", self.backend_name()) }

    /// Path prefix used when the operator does not pick one.
    pub fn default_path(&self) -> String { format!("/{}", self.project_name) }

    /// Fully-qualified reference to the project's global backend service, as URL maps expect it.
    pub fn backend_service_ref(&self) -> String {
        format!("{}/{}/global/backendServices/{}", BACKEND_SERVICES_BASE, self.gcp_project_id, self.backend_name())
    }
}

/// The shared routing resources every project is attached to. One per environment;
/// passed explicitly to whatever needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Name of the shared URL map.
    pub url_map: String,
    /// Path matcher inside the URL map that new rules are appended to.
    pub path_matcher: String,
    /// Public domain served by the load balancer.
    pub domain: String,
    /// IAP OAuth brand resource, `projects/<number>/brands/<number>`.
    pub oauth_brand: String,
    /// Domain granted IAP access to every backend.
    pub iap_domain: String,
}

impl Topology {
    pub fn validate(&self) -> Result<(), CoreError> {
        require("url_map", &self.url_map)?;
        require("path_matcher", &self.path_matcher)?;
        require("domain", &self.domain)?;
        require("oauth_brand", &self.oauth_brand)?;
        require("iap_domain", &self.iap_domain)?;
        if self.domain.contains("://") {
            return Err(CoreError::Invalid { field: "domain", reason: "expected a bare hostname".into() });
        }
        Ok(())
    }

    pub fn public_url(&self, path: &str) -> String { format!("https://{}{}", self.domain, path) }
}

/// IAP OAuth client credentials. Held in memory for one run only.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub display_name: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}
