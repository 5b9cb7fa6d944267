use metrics::counter;
use tracing::{info, warn};

use crate::probe::{Prober, ResourceKind};
use crate::{Cloud, Ensured, ProvisionError, Step};

/// Lowest user priority: the rule is evaluated after every other rule.
pub const RATE_LIMIT_RULE_PRIORITY: u32 = 2_147_483_646;
pub const RATE_LIMIT_COUNT: u32 = 500;
pub const RATE_LIMIT_INTERVAL_SECS: u32 = 60;

/// Cloud Armor policy with a per-IP throttle as its default rule.
pub struct SecurityPolicyProvisioner<'a> {
    cloud: Cloud<'a>,
}

impl<'a> SecurityPolicyProvisioner<'a> {
    pub fn new(cloud: Cloud<'a>) -> Self { Self { cloud } }

    pub fn ensure(&self) -> Result<Ensured, ProvisionError> {
        let policy = self.cloud.ctx.security_policy_name();
        if Prober::new(self.cloud).exists(ResourceKind::SecurityPolicy, &policy) {
            // Trusted as-is: the throttle rule is not compared against what we would create.
            warn!(policy = %policy, "security policy already exists; rate-limit rule not re-verified");
            return Ok(Ensured::Existing);
        }

        info!(policy = %policy, "creating security policy");
        let create = self.cloud.gcloud.command([
            "compute".to_string(),
            "security-policies".to_string(),
            "create".to_string(),
            policy.clone(),
            format!("--description=Default security policy for: {}", self.cloud.ctx.backend_name()),
        ]);
        self.cloud.exec.run_checked(&create).map_err(ProvisionError::command(Step::SecurityPolicy))?;

        let rule = self.cloud.gcloud.command([
            "compute".to_string(),
            "security-policies".to_string(),
            "rules".to_string(),
            "create".to_string(),
            RATE_LIMIT_RULE_PRIORITY.to_string(),
            format!("--security-policy={}", policy),
            "--action=throttle".to_string(),
            "--description=Default rate limiting rule".to_string(),
            "--src-ip-ranges=*".to_string(),
            format!("--rate-limit-threshold-count={}", RATE_LIMIT_COUNT),
            format!("--rate-limit-threshold-interval-sec={}", RATE_LIMIT_INTERVAL_SECS),
            "--conform-action=allow".to_string(),
            "--exceed-action=deny-403".to_string(),
            "--enforce-on-key=IP".to_string(),
        ]);
        self.cloud.exec.run_checked(&rule).map_err(ProvisionError::command(Step::SecurityPolicy))?;
        counter!("lb_resource_created_total", 1u64, "kind" => "security_policy");
        info!(policy = %policy, count = RATE_LIMIT_COUNT, interval_secs = RATE_LIMIT_INTERVAL_SECS, "security policy created with rate limiting");
        Ok(Ensured::Created)
    }
}
