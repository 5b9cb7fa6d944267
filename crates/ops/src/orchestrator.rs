//! Add/remove a project on the shared load balancer.
//!
//! `add` runs the provisioning chain in order and stops at the first failure,
//! leaving whatever was already created in place (every step adopts existing
//! resources, so re-running picks up where it stopped). `remove` runs every
//! teardown step regardless of earlier failures and reports them instead.

use std::fmt;

use gatehouse_core::normalize_path;
use gatehouse_exec::Invocation;
use gatehouse_persist::{ConfigKey, Detail, Manifest, StateKey};
use gatehouse_urlmap::UrlMapEditor;
use metrics::counter;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{error, info, warn};

use crate::backend::BackendServiceProvisioner;
use crate::cloudrun::CloudRunLookup;
use crate::confirm::{ConfirmPolicy, Confirmer};
use crate::iap::IapAccessGrantor;
use crate::neg::NegProvisioner;
use crate::oauth::OAuthClientFactory;
use crate::policy::{SecurityPolicyProvisioner, RATE_LIMIT_COUNT, RATE_LIMIT_INTERVAL_SECS};
use crate::{Cloud, ProvisionError, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOptions {
    pub path: Option<String>,
    pub region: Option<String>,
    pub cloud_run_service: Option<String>,
    pub use_host_rewrite: bool,
}

impl Default for AddOptions {
    fn default() -> Self { Self { path: None, region: None, cloud_run_service: None, use_host_rewrite: true } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AddOutcome {
    Completed { url: String, path: String },
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub path: Option<String>,
    pub skip_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum RemoveOutcome {
    Completed(TeardownReport),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    PathRule,
    BackendService,
    Neg,
    SecurityPolicy,
}

impl TeardownStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::PathRule => "path_rule",
            TeardownStep::BackendService => "backend_service",
            TeardownStep::Neg => "neg",
            TeardownStep::SecurityPolicy => "security_policy",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Warning(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: TeardownStep,
    pub target: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub path: String,
    pub steps: Vec<StepReport>,
}

impl TeardownReport {
    pub fn warnings(&self) -> usize { self.steps.iter().filter(|s| matches!(s.outcome, StepOutcome::Warning(_))).count() }

    pub fn is_clean(&self) -> bool { self.warnings() == 0 }
}

fn step<T>(step: Step, f: impl FnOnce() -> Result<T, ProvisionError>) -> Result<T, ProvisionError> {
    let res = f();
    let outcome = if res.is_ok() { "ok" } else { "error" };
    counter!("lb_step_total", 1u64, "step" => step.as_str(), "outcome" => outcome);
    if let Err(e) = &res {
        error!(step = %step, error = %e, "provisioning step failed");
    }
    res
}

pub struct LoadBalancer<'a> {
    cloud: Cloud<'a>,
    manifest: &'a dyn Manifest,
    confirmer: &'a dyn Confirmer,
    oauth: &'a dyn OAuthClientFactory,
    url_map: UrlMapEditor<'a>,
}

impl<'a> LoadBalancer<'a> {
    pub fn new(
        cloud: Cloud<'a>,
        manifest: &'a dyn Manifest,
        confirmer: &'a dyn Confirmer,
        oauth: &'a dyn OAuthClientFactory,
    ) -> Self {
        let url_map = UrlMapEditor::new(cloud.exec, cloud.gcloud, cloud.topology);
        Self { cloud, manifest, confirmer, oauth, url_map }
    }

    /// Swap the URL-map editor (scratch location, preflight).
    pub fn with_url_map_editor(mut self, editor: UrlMapEditor<'a>) -> Self {
        self.url_map = editor;
        self
    }

    pub fn add_to_loadbalancer(&self, opts: &AddOptions) -> Result<AddOutcome, ProvisionError> {
        let ctx = self.cloud.ctx;
        if self.manifest.get_state(StateKey::Deployed)? != Some(true) {
            warn!(project = %ctx.project_name, "refusing to add: Cloud Run service not deployed");
            return Err(ProvisionError::NotDeployed);
        }

        let path = normalize_path(opts.path.as_deref().unwrap_or(&ctx.default_path()))?;
        let region = match &opts.region {
            Some(r) => r.clone(),
            None => self.manifest.get_config(ConfigKey::Region)?.unwrap_or_else(|| ctx.default_region.clone()),
        };
        let service = opts.cloud_run_service.clone().unwrap_or_else(|| ctx.project_name.clone());
        let backend = ctx.backend_name();
        let url = self.cloud.topology.public_url(&path);

        let plan = vec![
            format!("Adding {} to the load balancer", ctx.project_name),
            format!("  Path:              {}/*", path),
            format!("  URL:               {}", url),
            format!("  Backend:           {}", backend),
            format!("  Cloud Run service: {}", service),
            format!("  Region:            {}", region),
        ];
        if !self.confirmer.confirm(&plan, ConfirmPolicy::Lenient).map_err(ProvisionError::Prompt)? {
            info!(project = %ctx.project_name, "add cancelled by operator");
            return Ok(AddOutcome::Cancelled);
        }

        step(Step::Neg, || NegProvisioner::new(self.cloud).ensure(&region, &service))?;
        info!(display_name = %ctx.oauth_display_name(), "minting a new OAuth client for this run");
        let oauth = step(Step::OAuthClient, || self.oauth.create(&ctx.oauth_display_name()))?;
        step(Step::SecurityPolicy, || SecurityPolicyProvisioner::new(self.cloud).ensure())?;
        step(Step::BackendService, || BackendServiceProvisioner::new(self.cloud).ensure(&region, &oauth))?;
        step(Step::IapAccess, || IapAccessGrantor::new(self.cloud).grant(&backend))?;
        let host = if opts.use_host_rewrite { CloudRunLookup::new(self.cloud).hostname(&service, &region) } else { None };
        step(Step::UrlMap, || Ok(self.url_map.add_rule(&path, &ctx.backend_service_ref(), host.as_deref())?))?;

        self.manifest.update_state(StateKey::LoadbalancerConfigured, true)?;
        self.manifest.update_config(ConfigKey::LoadbalancerPath, Some(&path))?;
        self.manifest.update_config(ConfigKey::LoadbalancerUrl, Some(&url))?;
        let mut detail = Detail::new();
        detail.insert("path".into(), Json::from(path.clone()));
        detail.insert("backend_name".into(), Json::from(backend.clone()));
        detail.insert("oauth_client".into(), Json::from(oauth.display_name.clone()));
        detail.insert("domain".into(), Json::from(self.cloud.topology.domain.clone()));
        self.manifest.log_operation("loadbalancer_add", detail)?;

        info!(
            url = %url,
            iap_domain = %self.cloud.topology.iap_domain,
            rate_limit = RATE_LIMIT_COUNT,
            interval_secs = RATE_LIMIT_INTERVAL_SECS,
            "load balancer configuration complete"
        );
        Ok(AddOutcome::Completed { url, path })
    }

    pub fn remove_from_loadbalancer(&self, opts: &RemoveOptions) -> Result<RemoveOutcome, ProvisionError> {
        let ctx = self.cloud.ctx;
        let path = match &opts.path {
            Some(p) => normalize_path(p)?,
            None => match self.manifest.get_config(ConfigKey::LoadbalancerPath)? {
                Some(p) => match normalize_path(&p) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(recorded = %p, error = %e, "recorded path is invalid; falling back to the default path");
                        normalize_path(&ctx.default_path())?
                    }
                },
                None => normalize_path(&ctx.default_path())?,
            },
        };
        let region = self.manifest.get_config(ConfigKey::Region)?.unwrap_or_else(|| ctx.default_region.clone());
        let backend = ctx.backend_name();
        let neg = ctx.neg_name();
        let policy = ctx.security_policy_name();

        if !opts.skip_confirmation {
            let summary = vec![
                format!("Removing {} from the load balancer", ctx.project_name),
                "This will remove:".to_string(),
                format!("  - Path rule: {}/*", path),
                format!("  - Backend service: {}", backend),
                format!("  - Network endpoint group: {}", neg),
                format!("  - Security policy: {}", policy),
                "The IAP OAuth client is kept.".to_string(),
            ];
            if !self.confirmer.confirm(&summary, ConfirmPolicy::Strict).map_err(ProvisionError::Prompt)? {
                info!(project = %ctx.project_name, "remove cancelled by operator");
                return Ok(RemoveOutcome::Cancelled);
            }
        }

        let mut steps = Vec::with_capacity(4);
        let rule = match self.url_map.remove_rule(&path) {
            Ok(_) => StepOutcome::Done,
            Err(e) => StepOutcome::Warning(format!("removing path rule: {}", e)),
        };
        steps.push(self.report(TeardownStep::PathRule, format!("{}/*", path), rule));

        let g = self.cloud.gcloud;
        let delete_backend = g.command([
            "compute".to_string(),
            "backend-services".to_string(),
            "delete".to_string(),
            backend.clone(),
            "--global".to_string(),
            "--quiet".to_string(),
        ]);
        steps.push(self.report(TeardownStep::BackendService, backend.clone(), self.best_effort(&delete_backend)));

        let delete_neg = g.command([
            "compute".to_string(),
            "network-endpoint-groups".to_string(),
            "delete".to_string(),
            neg.clone(),
            format!("--region={}", region),
            "--quiet".to_string(),
        ]);
        steps.push(self.report(TeardownStep::Neg, neg, self.best_effort(&delete_neg)));

        let delete_policy = g.command([
            "compute".to_string(),
            "security-policies".to_string(),
            "delete".to_string(),
            policy.clone(),
            "--quiet".to_string(),
        ]);
        steps.push(self.report(TeardownStep::SecurityPolicy, policy, self.best_effort(&delete_policy)));

        let report = TeardownReport { path: path.clone(), steps };

        self.manifest.update_state(StateKey::LoadbalancerConfigured, false)?;
        self.manifest.update_config(ConfigKey::LoadbalancerPath, None)?;
        self.manifest.update_config(ConfigKey::LoadbalancerUrl, None)?;
        let mut detail = Detail::new();
        detail.insert("path".into(), Json::from(path));
        detail.insert("backend_name".into(), Json::from(backend));
        detail.insert("warnings".into(), Json::from(report.warnings()));
        self.manifest.log_operation("loadbalancer_remove", detail)?;

        info!(project = %ctx.project_name, warnings = report.warnings(), "removed from load balancer");
        Ok(RemoveOutcome::Completed(report))
    }

    fn best_effort(&self, inv: &Invocation) -> StepOutcome {
        match self.cloud.exec.run(inv) {
            Ok(out) if out.success() => StepOutcome::Done,
            Ok(out) if out.stderr.trim().is_empty() => StepOutcome::Warning(format!("exited with {:?}", out.code)),
            Ok(out) => StepOutcome::Warning(out.stderr.trim().to_string()),
            Err(e) => StepOutcome::Warning(e.to_string()),
        }
    }

    fn report(&self, step: TeardownStep, target: String, outcome: StepOutcome) -> StepReport {
        match &outcome {
            StepOutcome::Done => {
                counter!("lb_teardown_step_total", 1u64, "step" => step.as_str(), "outcome" => "done");
                info!(step = %step, target = %target, "deleted");
            }
            StepOutcome::Warning(msg) => {
                counter!("lb_teardown_step_total", 1u64, "step" => step.as_str(), "outcome" => "warning");
                warn!(step = %step, target = %target, warning = %msg, "teardown step did not complete");
            }
        }
        StepReport { step, target, outcome }
    }
}
