//! In-memory edits on the URL map JSON. Unknown fields are carried through untouched.

use serde_json::{Map, Value as Json};

use crate::{PathRule, UrlMapError};

/// Server-assigned fields the import call rejects. `id` is handled separately.
pub const OUTPUT_ONLY_FIELDS: &[&str] = &["creationTimestamp", "selfLink", "fingerprint", "kind"];

fn matchers_mut(doc: &mut Json) -> Option<&mut Vec<Json>> {
    doc.get_mut("pathMatchers").and_then(|m| m.as_array_mut())
}

/// Add `rule` to the path matcher called `matcher`. A rule with the same path group
/// is replaced in place instead of duplicated. Returns `false` when an identical
/// rule was already there and the document is unchanged.
pub fn append_rule(doc: &mut Json, matcher: &str, rule: &PathRule) -> Result<bool, UrlMapError> {
    if !doc.is_object() {
        return Err(UrlMapError::NotAnObject);
    }
    let rule_json = serde_json::to_value(rule)?;
    let target = matchers_mut(doc)
        .and_then(|ms| ms.iter_mut().find(|m| m.get("name").and_then(|n| n.as_str()) == Some(matcher)))
        .and_then(|m| m.as_object_mut())
        .ok_or_else(|| UrlMapError::MatcherNotFound(matcher.to_string()))?;
    let rules = target.entry("pathRules").or_insert_with(|| Json::Array(Vec::new()));
    let Some(arr) = rules.as_array_mut() else {
        *rules = Json::Array(vec![rule_json]);
        return Ok(true);
    };
    match arr.iter_mut().find(|r| rule_paths(r).eq(rule.paths.iter().map(String::as_str))) {
        Some(existing) if *existing == rule_json => Ok(false),
        Some(existing) => {
            *existing = rule_json;
            Ok(true)
        }
        None => {
            arr.push(rule_json);
            Ok(true)
        }
    }
}

/// Drop every path rule, in every matcher, that has any path starting with `prefix`.
/// Returns the number of rules removed.
pub fn remove_rules_with_prefix(doc: &mut Json, prefix: &str) -> usize {
    let mut removed = 0usize;
    if let Some(ms) = matchers_mut(doc) {
        for m in ms.iter_mut() {
            let Some(rules) = m.get_mut("pathRules").and_then(|r| r.as_array_mut()) else { continue };
            let before = rules.len();
            rules.retain(|rule| !rule_paths(rule).any(|p| p.starts_with(prefix)));
            removed += before - rules.len();
        }
    }
    removed
}

fn rule_paths(rule: &Json) -> impl Iterator<Item = &str> {
    rule.get("paths").and_then(|p| p.as_array()).into_iter().flatten().filter_map(|p| p.as_str())
}

/// Remove output-only fields at top level and in each path matcher.
/// A top-level `id` survives only as a JSON integer.
pub fn strip_output_only(mut v: Json) -> Json {
    if let Some(obj) = v.as_object_mut() {
        strip_fields(obj);
        if let Some(id) = obj.remove("id") {
            if let Some(n) = id_as_integer(&id) {
                obj.insert("id".into(), Json::from(n));
            }
        }
    }
    if let Some(ms) = matchers_mut(&mut v) {
        for m in ms.iter_mut() {
            if let Some(obj) = m.as_object_mut() {
                strip_fields(obj);
            }
        }
    }
    v
}

fn strip_fields(obj: &mut Map<String, Json>) {
    for f in OUTPUT_ONLY_FIELDS {
        obj.remove(*f);
    }
}

fn id_as_integer(id: &Json) -> Option<u64> {
    match id {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub fn fingerprint(doc: &Json) -> Option<String> {
    doc.get("fingerprint").and_then(|f| f.as_str()).map(str::to_string)
}

/// Path groups of every rule in `matcher`, in document order.
pub fn matcher_rule_paths(doc: &Json, matcher: &str) -> Vec<Vec<String>> {
    doc.get("pathMatchers")
        .and_then(|m| m.as_array())
        .into_iter()
        .flatten()
        .filter(|m| m.get("name").and_then(|n| n.as_str()) == Some(matcher))
        .flat_map(|m| m.get("pathRules").and_then(|r| r.as_array()).into_iter().flatten())
        .map(|rule| rule_paths(rule).map(str::to_string).collect())
        .collect()
}
