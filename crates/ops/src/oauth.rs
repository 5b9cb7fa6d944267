//! IAP OAuth client creation.
//!
//! A new client is minted on every call; there is no lookup by display name.
//! The CLI only prints the credentials as text, so scraping that output is
//! confined to `parse_create_output`.

use gatehouse_core::OAuthClient;
use gatehouse_exec::CommandExecutor;
use gatehouse_exec::Gcloud;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::{ProvisionError, Step};

static NAME_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*name:\s*(\S+)\s*$").expect("static regex"));
static SECRET_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*secret:\s*(\S+)\s*$").expect("static regex"));

/// Creates IAP OAuth clients and hands back typed credentials.
pub trait OAuthClientFactory {
    fn create(&self, display_name: &str) -> Result<OAuthClient, ProvisionError>;
}

/// `gcloud iap oauth-clients create` under one brand.
pub struct GcloudOAuthClients<'a> {
    exec: &'a dyn CommandExecutor,
    gcloud: &'a Gcloud,
    brand: &'a str,
}

impl<'a> GcloudOAuthClients<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, gcloud: &'a Gcloud, brand: &'a str) -> Self {
        Self { exec, gcloud, brand }
    }
}

impl OAuthClientFactory for GcloudOAuthClients<'_> {
    fn create(&self, display_name: &str) -> Result<OAuthClient, ProvisionError> {
        info!(display_name = %display_name, brand = %self.brand, "creating IAP OAuth client");
        let inv = self.gcloud.unscoped([
            "iap".to_string(),
            "oauth-clients".to_string(),
            "create".to_string(),
            self.brand.to_string(),
            format!("--display_name={}", display_name),
        ]);
        let out = self.exec.run_checked(&inv).map_err(ProvisionError::command(Step::OAuthClient))?;
        let client = parse_create_output(&out.stdout, display_name)?;
        counter!("lb_resource_created_total", 1u64, "kind" => "oauth_client");
        info!(client_id = %client.client_id, "OAuth client created");
        Ok(client)
    }
}

/// Pull the client id (last segment of `name:`) and `secret:` out of the create output.
pub fn parse_create_output(stdout: &str, display_name: &str) -> Result<OAuthClient, ProvisionError> {
    let client_id = NAME_LINE
        .captures(stdout)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let client_secret = SECRET_LINE.captures(stdout).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Ok(OAuthClient { client_id, client_secret, display_name: display_name.to_string() }),
        (id, secret) => {
            let mut missing = Vec::new();
            if id.is_none() { missing.push("name"); }
            if secret.is_none() { missing.push("secret"); }
            Err(ProvisionError::UnparseableOutput {
                step: Step::OAuthClient,
                detail: format!("missing {} line(s) in oauth-clients create output", missing.join(" and ")),
            })
        }
    }
}
