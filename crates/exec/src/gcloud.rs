use crate::Invocation;

/// Builds `gcloud` invocations scoped to one cloud project.
#[derive(Debug, Clone)]
pub struct Gcloud {
    program: String,
    project_id: String,
}

impl Gcloud {
    /// Uses `GATEHOUSE_GCLOUD` as the binary when set, `gcloud` otherwise.
    pub fn new(project_id: impl Into<String>) -> Self {
        let program = std::env::var("GATEHOUSE_GCLOUD").unwrap_or_else(|_| "gcloud".to_string());
        Self::with_program(program, project_id)
    }

    pub fn with_program(program: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self { program: program.into(), project_id: project_id.into() }
    }

    pub fn project_id(&self) -> &str { &self.project_id }

    /// Project-scoped command: `--project=<id>` is appended after the given args.
    pub fn command<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.program).args(args).arg(format!("--project={}", self.project_id))
    }

    /// Command addressed by a fully-qualified resource name, no `--project` flag.
    pub fn unscoped<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.program).args(args)
    }
}
