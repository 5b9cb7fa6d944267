//! Gatehouse exec: runs external cloud CLI commands and hands back exit code,
//! stdout and stderr. Non-zero exits are data, not errors, unless the caller
//! asks for `run_checked`.

#![forbid(unsafe_code)]

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

mod gcloud;

pub use gcloud::Gcloud;

/// Flags whose values must never reach logs or error messages.
const SECRET_MARKERS: &[&str] = &["oauth2-client-secret="];

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start `{command}`: {source}")]
    Spawn { command: String, #[source] source: std::io::Error },
    #[error("i/o error while running `{command}`: {source}")]
    Io { command: String, #[source] source: std::io::Error },
    #[error("`{command}` exited with {}: {}", exit_label(.code), .stderr.trim())]
    Failed { command: String, code: Option<i32>, stderr: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (killed by signal)".to_string(),
    }
}

/// One external command: program, argument vector and an optional stdin payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), stdin: None }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Command line for logs, with secret-bearing arguments masked.
    pub fn render(&self) -> String {
        let mut out = self.program.clone();
        for a in &self.args {
            out.push(' ');
            out.push_str(&redact(a));
        }
        out
    }
}

fn redact(arg: &str) -> String {
    let mut s = arg.to_string();
    for marker in SECRET_MARKERS {
        if let Some(idx) = s.find(marker) {
            let start = idx + marker.len();
            let end = s[start..].find(',').map(|e| start + e).unwrap_or(s.len());
            s.replace_range(start..end, "***");
        }
    }
    s
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool { self.code == Some(0) }
}

/// Blocking command execution boundary. Implementations never time out or retry.
pub trait CommandExecutor: Send + Sync {
    /// Run and capture. A non-zero exit is returned as `Ok` for the caller to inspect.
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, ExecError>;

    /// Run and treat a non-zero exit as `ExecError::Failed`.
    fn run_checked(&self, inv: &Invocation) -> Result<CommandOutput, ExecError> {
        let out = self.run(inv)?;
        if out.success() {
            Ok(out)
        } else {
            Err(ExecError::Failed { command: inv.render(), code: out.code, stderr: out.stderr })
        }
    }
}

/// Real executor backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self { Self }
}

impl CommandExecutor for ProcessExecutor {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, ExecError> {
        let started = Instant::now();
        let rendered = inv.render();
        debug!(command = %rendered, "running command");

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if inv.stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd.spawn().map_err(|source| {
            counter!("lb_command_total", 1u64, "outcome" => "spawn_error");
            ExecError::Spawn { command: rendered.clone(), source }
        })?;
        // Feed stdin from its own thread so a child that fills its stdout pipe before
        // reading all input cannot stall us. The sink drops at thread end, closing the pipe.
        let writer = match (&inv.stdin, child.stdin.take()) {
            (Some(payload), Some(mut sink)) => {
                let payload = payload.clone().into_bytes();
                Some(std::thread::spawn(move || sink.write_all(&payload)))
            }
            _ => None,
        };
        let output = child
            .wait_with_output()
            .map_err(|source| ExecError::Io { command: rendered.clone(), source })?;
        if let Some(writer) = writer {
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::Other, "stdin writer panicked")));
            match written {
                // The child quit without reading everything; its exit status says why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(command = %rendered, "child closed stdin early");
                }
                Err(source) => return Err(ExecError::Io { command: rendered, source }),
                Ok(()) => {}
            }
        }

        let out = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        histogram!("lb_command_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("lb_command_total", 1u64, "outcome" => if out.success() { "ok" } else { "nonzero" });
        debug!(command = %rendered, code = ?out.code, "command finished");
        Ok(out)
    }
}
