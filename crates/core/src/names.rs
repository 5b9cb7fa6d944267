//! Path prefix normalisation and fixed resource-reference prefixes.

use crate::CoreError;

pub const BACKEND_SERVICES_BASE: &str = "https://www.googleapis.com/compute/v1/projects";

/// Normalise an operator-supplied path prefix: leading `/` required, trailing `/` dropped.
///
/// The bare root is rejected because removal matches rules by prefix and `/` would
/// match every rule in the URL map.
pub fn normalize_path(raw: &str) -> Result<String, CoreError> {
    let p = raw.trim();
    if !p.starts_with('/') {
        return Err(CoreError::Invalid { field: "path", reason: format!("'{}' must start with '/'", p) });
    }
    if p.contains('*') || p.chars().any(char::is_whitespace) {
        return Err(CoreError::Invalid { field: "path", reason: format!("'{}' must not contain '*' or whitespace", p) });
    }
    let trimmed = p.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(CoreError::Invalid { field: "path", reason: "the root path would match every rule".into() });
    }
    Ok(trimmed.to_string())
}
