use tracing::warn;

use crate::probe::{Prober, ResourceKind};
use crate::Cloud;

/// Resolves the hostname Cloud Run serves a service on, for the URL-map host rewrite.
pub struct CloudRunLookup<'a> {
    cloud: Cloud<'a>,
}

impl<'a> CloudRunLookup<'a> {
    pub fn new(cloud: Cloud<'a>) -> Self { Self { cloud } }

    /// `None` on any failure; the rule is then added without a host rewrite.
    pub fn hostname(&self, service: &str, region: &str) -> Option<String> {
        let described = match Prober::new(self.cloud).describe_json(ResourceKind::CloudRunService { region }, service) {
            Ok(Some(v)) => v,
            Ok(None) => {
                warn!(service = %service, region = %region, "could not describe Cloud Run service; skipping host rewrite");
                return None;
            }
            Err(e) => {
                warn!(service = %service, error = %e, "could not read Cloud Run service URL; skipping host rewrite");
                return None;
            }
        };
        let url = described.get("status").and_then(|s| s.get("url")).and_then(|u| u.as_str()).unwrap_or("");
        let host = host_of(url);
        if host.is_none() {
            warn!(service = %service, "Cloud Run service has no URL yet; skipping host rewrite");
        }
        host
    }
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")).unwrap_or(url);
    let host = rest.trim_end_matches('/');
    if host.is_empty() { None } else { Some(host.to_string()) }
}
