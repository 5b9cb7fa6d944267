//! Backend service provisioning.
//!
//! The existing service is classified before anything is changed:
//! - absent: create it
//! - backends attached: adopt, re-attach the security policy best-effort
//! - no backends but `portName` set: delete and recreate (a port name blocks
//!   serverless NEG attachment)
//! - no backends, no `portName`: attach the NEG

use gatehouse_core::OAuthClient;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{info, warn};

use crate::probe::{Prober, ResourceKind};
use crate::{Cloud, ProvisionError, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    Absent,
    Attached,
    Poisoned { port_name: String },
    Detached,
}

impl BackendState {
    /// Classify a `describe --format=json` body (`None` when the service is absent).
    pub fn classify(described: Option<&Json>) -> Self {
        let Some(body) = described else { return BackendState::Absent };
        let has_backends = body.get("backends").and_then(|b| b.as_array()).map(|b| !b.is_empty()).unwrap_or(false);
        if has_backends {
            return BackendState::Attached;
        }
        match body.get("portName").and_then(|p| p.as_str()).filter(|p| !p.is_empty()) {
            Some(port_name) => BackendState::Poisoned { port_name: port_name.to_string() },
            None => BackendState::Detached,
        }
    }
}

/// What `ensure` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAction {
    Adopted,
    AttachedNeg,
    Recreated,
    Created,
}

pub struct BackendServiceProvisioner<'a> {
    cloud: Cloud<'a>,
}

impl<'a> BackendServiceProvisioner<'a> {
    pub fn new(cloud: Cloud<'a>) -> Self { Self { cloud } }

    pub fn ensure(&self, region: &str, oauth: &OAuthClient) -> Result<BackendAction, ProvisionError> {
        let backend = self.cloud.ctx.backend_name();
        let described = Prober::new(self.cloud).describe_json(ResourceKind::BackendService, &backend)?;
        let state = BackendState::classify(described.as_ref());
        info!(backend = %backend, state = ?state, "backend service probed");

        match state {
            BackendState::Attached => {
                if let Err(e) = self.attach_policy() {
                    warn!(backend = %backend, error = %e, "could not re-attach security policy to existing backend");
                }
                Ok(BackendAction::Adopted)
            }
            BackendState::Detached => {
                self.attach_neg(region)?;
                info!(backend = %backend, "NEG attached to existing backend service");
                Ok(BackendAction::AttachedNeg)
            }
            BackendState::Poisoned { port_name } => {
                warn!(backend = %backend, port_name = %port_name, "backend has a port name and no backends; recreating");
                self.delete()?;
                self.create_fresh(region, oauth)?;
                Ok(BackendAction::Recreated)
            }
            BackendState::Absent => {
                self.create_fresh(region, oauth)?;
                Ok(BackendAction::Created)
            }
        }
    }

    /// Create with IAP and CORS headers, attach the NEG, attach the policy. Not resumable midway.
    fn create_fresh(&self, region: &str, oauth: &OAuthClient) -> Result<(), ProvisionError> {
        let backend = self.cloud.ctx.backend_name();
        let origin = format!("https://{}", self.cloud.topology.domain);
        info!(backend = %backend, "creating backend service");
        let create = self.cloud.gcloud.command([
            "compute".to_string(),
            "backend-services".to_string(),
            "create".to_string(),
            backend.clone(),
            "--global".to_string(),
            "--load-balancing-scheme=EXTERNAL_MANAGED".to_string(),
            format!("--iap=enabled,oauth2-client-id={},oauth2-client-secret={}", oauth.client_id, oauth.client_secret),
            "--custom-response-header=Access-Control-Allow-Methods: GET,POST,OPTIONS".to_string(),
            format!("--custom-response-header=Access-Control-Allow-Origin: {}", origin),
            "--custom-response-header=Access-Control-Allow-Headers: *".to_string(),
            "--custom-response-header=Access-Control-Allow-Credentials: true".to_string(),
        ]);
        self.cloud.exec.run_checked(&create).map_err(ProvisionError::command(Step::BackendService))?;
        self.attach_neg(region)?;
        self.attach_policy()?;
        counter!("lb_resource_created_total", 1u64, "kind" => "backend_service");
        info!(backend = %backend, "backend service created with IAP enabled");
        Ok(())
    }

    fn attach_neg(&self, region: &str) -> Result<(), ProvisionError> {
        let inv = self.cloud.gcloud.command([
            "compute".to_string(),
            "backend-services".to_string(),
            "add-backend".to_string(),
            self.cloud.ctx.backend_name(),
            "--global".to_string(),
            format!("--network-endpoint-group={}", self.cloud.ctx.neg_name()),
            format!("--network-endpoint-group-region={}", region),
        ]);
        self.cloud.exec.run_checked(&inv).map(|_| ()).map_err(ProvisionError::command(Step::BackendService))
    }

    fn attach_policy(&self) -> Result<(), ProvisionError> {
        let inv = self.cloud.gcloud.command([
            "compute".to_string(),
            "backend-services".to_string(),
            "update".to_string(),
            self.cloud.ctx.backend_name(),
            "--global".to_string(),
            format!("--security-policy={}", self.cloud.ctx.security_policy_name()),
        ]);
        self.cloud.exec.run_checked(&inv).map(|_| ()).map_err(ProvisionError::command(Step::BackendService))
    }

    fn delete(&self) -> Result<(), ProvisionError> {
        let inv = self.cloud.gcloud.command([
            "compute".to_string(),
            "backend-services".to_string(),
            "delete".to_string(),
            self.cloud.ctx.backend_name(),
            "--global".to_string(),
            "--quiet".to_string(),
        ]);
        self.cloud.exec.run_checked(&inv).map(|_| ()).map_err(ProvisionError::command(Step::BackendService))
    }
}
