//! Scripted executor for tests: prefix-matched canned outputs plus a call log.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{CommandExecutor, CommandOutput, ExecError, Invocation};

/// Verbs that change cloud-side state.
pub const MUTATING_VERBS: &[&str] = &["create", "delete", "add-backend", "update", "import", "add-iam-policy-binding"];

struct Rule {
    pattern: Vec<String>,
    outputs: VecDeque<CommandOutput>,
}

/// Matches invocation args by prefix; the longest matching pattern wins.
/// Queued outputs are consumed in order and the last one is sticky.
/// Unmatched calls get the fallback (exit 1, "not found").
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
    fallback: CommandOutput,
}

impl Default for ScriptedExecutor {
    fn default() -> Self { Self::new() }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fallback: CommandOutput::failed(1, "ERROR: (gcloud) resource not found"),
        }
    }

    pub fn on(&self, pattern: &[&str], output: CommandOutput) -> &Self {
        let pattern: Vec<String> = pattern.iter().map(|s| s.to_string()).collect();
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(r) => r.outputs.push_back(output),
            None => rules.push(Rule { pattern, outputs: VecDeque::from(vec![output]) }),
        }
        self
    }

    pub fn calls(&self) -> Vec<Invocation> { self.calls.lock().unwrap().clone() }

    pub fn calls_matching(&self, pattern: &[&str]) -> Vec<Invocation> {
        self.calls().into_iter().filter(|c| prefix_matches(pattern, &c.args)).collect()
    }

    pub fn mutating_calls(&self) -> Vec<Invocation> {
        self.calls().into_iter().filter(is_mutating).collect()
    }
}

fn prefix_matches<S: AsRef<str>>(pattern: &[S], args: &[String]) -> bool {
    args.len() >= pattern.len() && pattern.iter().zip(args).all(|(p, a)| p.as_ref() == a)
}

/// True when the positional part of the command names a mutating verb.
pub fn is_mutating(inv: &Invocation) -> bool {
    inv.args
        .iter()
        .take_while(|a| !a.starts_with("--"))
        .any(|a| MUTATING_VERBS.contains(&a.as_str()))
}

impl CommandExecutor for ScriptedExecutor {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(inv.clone());
        let mut rules = self.rules.lock().unwrap();
        let best = rules
            .iter_mut()
            .filter(|r| prefix_matches(&r.pattern, &inv.args))
            .max_by_key(|r| r.pattern.len());
        let out = match best {
            Some(rule) if rule.outputs.len() > 1 => rule.outputs.pop_front().unwrap_or_default(),
            Some(rule) => rule.outputs.front().cloned().unwrap_or_default(),
            None => self.fallback.clone(),
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_pattern_wins_and_last_output_sticks() {
        let f = ScriptedExecutor::new();
        f.on(&["compute"], CommandOutput::ok("generic"));
        f.on(&["compute", "url-maps", "describe"], CommandOutput::ok("first"));
        f.on(&["compute", "url-maps", "describe"], CommandOutput::ok("second"));
        let inv = Invocation::new("gcloud").args(["compute", "url-maps", "describe", "lb"]);
        assert_eq!(f.run(&inv).unwrap().stdout, "first");
        assert_eq!(f.run(&inv).unwrap().stdout, "second");
        assert_eq!(f.run(&inv).unwrap().stdout, "second");
        let other = Invocation::new("gcloud").args(["compute", "backend-services", "list"]);
        assert_eq!(f.run(&other).unwrap().stdout, "generic");
        assert_eq!(f.calls().len(), 4);
    }

    #[test]
    fn mutating_verbs_are_detected_before_flags() {
        let m = Invocation::new("gcloud").args(["compute", "security-policies", "rules", "create", "2147483646"]);
        let r = Invocation::new("gcloud").args(["compute", "backend-services", "describe", "x", "--description=update"]);
        assert!(is_mutating(&m));
        assert!(!is_mutating(&r));
    }
}
