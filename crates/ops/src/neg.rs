use metrics::counter;
use tracing::info;

use crate::probe::{Prober, ResourceKind};
use crate::{Cloud, Ensured, ProvisionError, Step};

/// Serverless network endpoint group pointing at the project's Cloud Run service.
pub struct NegProvisioner<'a> {
    cloud: Cloud<'a>,
}

impl<'a> NegProvisioner<'a> {
    pub fn new(cloud: Cloud<'a>) -> Self { Self { cloud } }

    pub fn ensure(&self, region: &str, cloud_run_service: &str) -> Result<Ensured, ProvisionError> {
        let neg = self.cloud.ctx.neg_name();
        if Prober::new(self.cloud).exists(ResourceKind::Neg { region }, &neg) {
            info!(neg = %neg, region = %region, "NEG already exists");
            return Ok(Ensured::Existing);
        }
        info!(neg = %neg, region = %region, service = %cloud_run_service, "creating serverless NEG");
        let inv = self.cloud.gcloud.command([
            "compute".to_string(),
            "network-endpoint-groups".to_string(),
            "create".to_string(),
            neg.clone(),
            format!("--region={}", region),
            "--network-endpoint-type=SERVERLESS".to_string(),
            format!("--cloud-run-service={}", cloud_run_service),
        ]);
        self.cloud.exec.run_checked(&inv).map_err(ProvisionError::command(Step::Neg))?;
        counter!("lb_resource_created_total", 1u64, "kind" => "neg");
        info!(neg = %neg, "NEG created");
        Ok(Ensured::Created)
    }
}
