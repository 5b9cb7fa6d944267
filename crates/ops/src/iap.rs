use tracing::{info, warn};

use crate::{Cloud, ProvisionError, Step};

pub const IAP_ACCESSOR_ROLE: &str = "roles/iap.httpsResourceAccessor";

/// Grants the topology's IAP domain access to a backend service.
pub struct IapAccessGrantor<'a> {
    cloud: Cloud<'a>,
}

impl<'a> IapAccessGrantor<'a> {
    pub fn new(cloud: Cloud<'a>) -> Self { Self { cloud } }

    /// A non-zero exit is logged and ignored: the binding usually already exists.
    pub fn grant(&self, backend_name: &str) -> Result<(), ProvisionError> {
        let domain = &self.cloud.topology.iap_domain;
        let inv = self.cloud.gcloud.command([
            "iap".to_string(),
            "web".to_string(),
            "add-iam-policy-binding".to_string(),
            "--resource-type=backend-services".to_string(),
            format!("--service={}", backend_name),
            format!("--member=domain:{}", domain),
            format!("--role={}", IAP_ACCESSOR_ROLE),
        ]);
        let out = self.cloud.exec.run(&inv).map_err(ProvisionError::command(Step::IapAccess))?;
        if out.success() {
            info!(backend = %backend_name, domain = %domain, "IAP access granted");
        } else {
            warn!(backend = %backend_name, domain = %domain, stderr = %out.stderr.trim(), "IAP binding not added (may already exist)");
        }
        Ok(())
    }
}
