//! Interactive yes/no gate in front of mutations.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPolicy {
    /// `y` or `yes`, any case. Used before additive changes.
    Lenient,
    /// Only the full word `yes`, any case. Used before deletions.
    Strict,
}

impl ConfirmPolicy {
    pub fn accepts(&self, answer: &str) -> bool {
        let a = answer.trim();
        match self {
            ConfirmPolicy::Lenient => a.eq_ignore_ascii_case("y") || a.eq_ignore_ascii_case("yes"),
            ConfirmPolicy::Strict => a.eq_ignore_ascii_case("yes"),
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            ConfirmPolicy::Lenient => "(y/N)",
            ConfirmPolicy::Strict => "(yes/N)",
        }
    }
}

pub trait Confirmer {
    /// Show `summary`, ask, and report whether the answer passes `policy`.
    fn confirm(&self, summary: &[String], policy: ConfirmPolicy) -> std::io::Result<bool>;
}

/// Prints to stdout and reads one line from stdin.
#[derive(Debug, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, summary: &[String], policy: ConfirmPolicy) -> std::io::Result<bool> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out)?;
        for line in summary {
            writeln!(out, "{}", line)?;
        }
        writeln!(out)?;
        write!(out, "Do you want to continue? {}: ", policy.hint())?;
        out.flush()?;
        drop(out);

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(policy.accepts(&answer))
    }
}

/// Replays canned answers and keeps what it was shown.
#[derive(Debug, Default)]
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<String>>,
    shown: Mutex<Vec<Vec<String>>>,
}

impl ScriptedConfirmer {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { answers: Mutex::new(answers.into_iter().map(Into::into).collect()), shown: Mutex::new(Vec::new()) }
    }

    /// Summaries shown so far, one entry per prompt.
    pub fn shown(&self) -> Vec<Vec<String>> {
        self.shown.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, summary: &[String], policy: ConfirmPolicy) -> std::io::Result<bool> {
        if let Ok(mut s) = self.shown.lock() {
            s.push(summary.to_vec());
        }
        // An exhausted script behaves like stdin at EOF.
        let answer = self.answers.lock().ok().and_then(|mut a| a.pop_front()).unwrap_or_default();
        Ok(policy.accepts(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_takes_y_or_yes() {
        for a in ["y", "Y", "yes", "YES", " yes\n"] {
            assert!(ConfirmPolicy::Lenient.accepts(a), "{:?}", a);
        }
        for a in ["", "n", "no", "yep", "sure"] {
            assert!(!ConfirmPolicy::Lenient.accepts(a), "{:?}", a);
        }
    }

    #[test]
    fn strict_needs_the_full_word() {
        assert!(ConfirmPolicy::Strict.accepts("yes"));
        assert!(ConfirmPolicy::Strict.accepts("yes\n"));
        assert!(ConfirmPolicy::Strict.accepts("Yes"));
        assert!(!ConfirmPolicy::Strict.accepts("y"));
        assert!(!ConfirmPolicy::Strict.accepts("Y"));
        assert!(!ConfirmPolicy::Strict.accepts(""));
    }

    #[test]
    fn scripted_answers_run_out_as_no() {
        let c = ScriptedConfirmer::new(["y"]);
        assert!(c.confirm(&["plan".to_string()], ConfirmPolicy::Lenient).unwrap());
        assert!(!c.confirm(&[], ConfirmPolicy::Lenient).unwrap());
        assert_eq!(c.shown().len(), 2);
        assert_eq!(c.shown()[0], vec!["plan".to_string()]);
    }
}
