//! Gatehouse ops: provisions a Cloud Run backend behind the shared HTTPS load
//! balancer and tears it down again.
//!
//! Steps run strictly in dependency order (NEG, OAuth client, security policy,
//! backend service, IAP binding, URL-map rule). Every step returns a value;
//! adding stops at the first failure, removal absorbs failures into a report.

#![forbid(unsafe_code)]

use std::fmt;

use gatehouse_core::{CoreError, ProjectContext, Topology};
use gatehouse_exec::{CommandExecutor, ExecError, Gcloud};
use gatehouse_persist::ManifestError;
use gatehouse_urlmap::UrlMapError;

pub mod backend;
pub mod cloudrun;
pub mod confirm;
pub mod iap;
pub mod neg;
pub mod oauth;
pub mod orchestrator;
pub mod policy;
pub mod probe;

pub use backend::{BackendAction, BackendServiceProvisioner, BackendState};
pub use cloudrun::CloudRunLookup;
pub use confirm::{ConfirmPolicy, Confirmer, ScriptedConfirmer, StdinConfirmer};
pub use iap::IapAccessGrantor;
pub use neg::NegProvisioner;
pub use oauth::{GcloudOAuthClients, OAuthClientFactory};
pub use orchestrator::{AddOptions, AddOutcome, LoadBalancer, RemoveOptions, RemoveOutcome, StepOutcome, StepReport, TeardownReport, TeardownStep};
pub use policy::SecurityPolicyProvisioner;
pub use probe::{Prober, ResourceKind};

/// Provisioning steps, used for error context, logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Neg,
    OAuthClient,
    SecurityPolicy,
    BackendService,
    IapAccess,
    CloudRunUrl,
    UrlMap,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Neg => "neg",
            Step::OAuthClient => "oauth_client",
            Step::SecurityPolicy => "security_policy",
            Step::BackendService => "backend_service",
            Step::IapAccess => "iap_access",
            Step::CloudRunUrl => "cloud_run_url",
            Step::UrlMap => "url_map",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{step}: {source}")]
    Command { step: Step, #[source] source: ExecError },
    #[error("{step}: unparseable command output: {detail}")]
    UnparseableOutput { step: Step, detail: String },
    #[error("{step}: invalid JSON from describe: {source}")]
    Json { step: Step, #[source] source: serde_json::Error },
    #[error("Cloud Run service is not deployed yet; deploy it before adding it to the load balancer")]
    NotDeployed,
    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("url map: {0}")]
    UrlMap(#[from] UrlMapError),
    #[error("invalid input: {0}")]
    Invalid(#[from] CoreError),
    #[error("reading confirmation: {0}")]
    Prompt(#[source] std::io::Error),
}

impl ProvisionError {
    pub(crate) fn command(step: Step) -> impl FnOnce(ExecError) -> ProvisionError {
        move |source| ProvisionError::Command { step, source }
    }
}

/// Handles every provisioning component shares for one run.
#[derive(Clone, Copy)]
pub struct Cloud<'a> {
    pub exec: &'a dyn CommandExecutor,
    pub gcloud: &'a Gcloud,
    pub ctx: &'a ProjectContext,
    pub topology: &'a Topology,
}

impl<'a> Cloud<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, gcloud: &'a Gcloud, ctx: &'a ProjectContext, topology: &'a Topology) -> Self {
        Self { exec, gcloud, ctx, topology }
    }
}

/// Whether an ensure-style step found the resource or had to make it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Existing,
    Created,
}
