//! Existence checks via `describe`.
//!
//! Any non-zero exit counts as "absent". A transient auth failure therefore looks
//! the same as a missing resource; the following create call will surface it.

use gatehouse_exec::Invocation;
use serde_json::Value as Json;
use tracing::debug;

use crate::{Cloud, ProvisionError, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind<'r> {
    Neg { region: &'r str },
    SecurityPolicy,
    BackendService,
    CloudRunService { region: &'r str },
}

impl ResourceKind<'_> {
    fn step(&self) -> Step {
        match self {
            ResourceKind::Neg { .. } => Step::Neg,
            ResourceKind::SecurityPolicy => Step::SecurityPolicy,
            ResourceKind::BackendService => Step::BackendService,
            ResourceKind::CloudRunService { .. } => Step::CloudRunUrl,
        }
    }
}

pub struct Prober<'a> {
    cloud: Cloud<'a>,
}

impl<'a> Prober<'a> {
    pub fn new(cloud: Cloud<'a>) -> Self { Self { cloud } }

    fn describe(&self, kind: ResourceKind<'_>, name: &str) -> Invocation {
        let g = self.cloud.gcloud;
        let args: Vec<String> = match kind {
            ResourceKind::Neg { region } => {
                vec!["compute".into(), "network-endpoint-groups".into(), "describe".into(), name.into(), format!("--region={}", region)]
            }
            ResourceKind::SecurityPolicy => vec!["compute".into(), "security-policies".into(), "describe".into(), name.into()],
            ResourceKind::BackendService => {
                vec!["compute".into(), "backend-services".into(), "describe".into(), name.into(), "--global".into()]
            }
            ResourceKind::CloudRunService { region } => {
                vec!["run".into(), "services".into(), "describe".into(), name.into(), format!("--region={}", region)]
            }
        };
        g.command(args.into_iter().chain(std::iter::once("--format=json".to_string())))
    }

    pub fn exists(&self, kind: ResourceKind<'_>, name: &str) -> bool {
        match self.cloud.exec.run(&self.describe(kind, name)) {
            Ok(out) => {
                debug!(kind = ?kind, name = %name, exists = out.success(), "probed");
                out.success()
            }
            Err(e) => {
                debug!(kind = ?kind, name = %name, error = %e, "probe failed to run; treating as absent");
                false
            }
        }
    }

    /// Parsed `describe` body, `None` when the resource is absent.
    pub fn describe_json(&self, kind: ResourceKind<'_>, name: &str) -> Result<Option<Json>, ProvisionError> {
        let out = match self.cloud.exec.run(&self.describe(kind, name)) {
            Ok(out) if out.success() => out,
            Ok(_) => return Ok(None),
            Err(e) => {
                debug!(kind = ?kind, name = %name, error = %e, "describe failed to run; treating as absent");
                return Ok(None);
            }
        };
        serde_json::from_str(&out.stdout)
            .map(Some)
            .map_err(|source| ProvisionError::Json { step: kind.step(), source })
    }
}
