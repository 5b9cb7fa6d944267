#![forbid(unsafe_code)]

use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use gatehouse_core::{ProjectContext, Topology};
use gatehouse_exec::{Gcloud, ProcessExecutor};
use gatehouse_ops::{
    AddOptions, AddOutcome, Cloud, GcloudOAuthClients, LoadBalancer, RemoveOptions, RemoveOutcome, StdinConfirmer,
    StepOutcome,
};
use gatehouse_persist::{ConfigKey, Manifest, SqliteManifest, StateKey};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gatehouse", version, about = "Put a Cloud Run service behind the shared HTTPS load balancer")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Manifest database
    #[arg(long, env = "GATEHOUSE_MANIFEST", global = true, default_value = ".gatehouse/manifest.db")]
    manifest: String,

    #[command(flatten)]
    project: ProjectArgs,

    #[command(flatten)]
    topology: TopologyArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ProjectArgs {
    /// Project name; resource names are derived from it
    #[arg(long, env = "GATEHOUSE_PROJECT_NAME", global = true)]
    project_name: Option<String>,
    /// GCP project id
    #[arg(long = "gcp-project", env = "GATEHOUSE_GCP_PROJECT", global = true)]
    gcp_project: Option<String>,
    #[arg(long, env = "GATEHOUSE_DEFAULT_REGION", global = true, default_value = "us-central1")]
    default_region: String,
    #[arg(long, env = "GATEHOUSE_SERVICE_ACCOUNT", global = true, default_value = "")]
    service_account: String,
}

#[derive(Args, Debug)]
struct TopologyArgs {
    /// Shared URL map
    #[arg(long, env = "GATEHOUSE_URL_MAP", global = true)]
    url_map: Option<String>,
    #[arg(long, env = "GATEHOUSE_PATH_MATCHER", global = true, default_value = "path-matcher-1")]
    path_matcher: String,
    /// Public domain served by the load balancer
    #[arg(long, env = "GATEHOUSE_DOMAIN", global = true)]
    domain: Option<String>,
    /// IAP OAuth brand, projects/<number>/brands/<number>
    #[arg(long, env = "GATEHOUSE_OAUTH_BRAND", global = true)]
    oauth_brand: Option<String>,
    /// Domain granted IAP access
    #[arg(long, env = "GATEHOUSE_IAP_DOMAIN", global = true)]
    iap_domain: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision NEG, OAuth client, security policy, backend service and path rule
    Add {
        /// Path prefix (default: /<project-name>)
        #[arg(long)]
        path: Option<String>,
        /// Region of the Cloud Run service (default: manifest, then --default-region)
        #[arg(long)]
        region: Option<String>,
        /// Cloud Run service name (default: project name)
        #[arg(long)]
        service: Option<String>,
        /// Do not rewrite the Host header to the Cloud Run hostname
        #[arg(long = "no-host-rewrite", action = ArgAction::SetTrue)]
        no_host_rewrite: bool,
    },
    /// Remove the path rule and delete the project's load-balancer resources
    Remove {
        /// Path prefix (default: manifest, then /<project-name>)
        #[arg(long)]
        path: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long = "yes", short = 'y', action = ArgAction::SetTrue)]
        yes: bool,
    },
    /// Show manifest flags, config and recent operations
    Status {
        #[arg(long = "limit", default_value_t = 10)]
        limit: usize,
    },
    /// Edit manifest entries directly
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ManifestCommands {
    /// Set a state flag, e.g. `set-state deployed true`
    SetState {
        key: String,
        #[arg(action = ArgAction::Set)]
        value: bool,
    },
    /// Set a config value; omit the value to clear it
    SetConfig { key: String, value: Option<String> },
}

impl ProjectArgs {
    fn resolve(&self) -> Result<ProjectContext> {
        let name = self.project_name.as_deref().context("--project-name (GATEHOUSE_PROJECT_NAME) is required")?;
        let gcp = self.gcp_project.as_deref().context("--gcp-project (GATEHOUSE_GCP_PROJECT) is required")?;
        Ok(ProjectContext::new(name, gcp, self.default_region.as_str(), self.service_account.as_str())?)
    }
}

impl TopologyArgs {
    fn resolve(&self) -> Result<Topology> {
        let topology = Topology {
            url_map: self.url_map.clone().context("--url-map (GATEHOUSE_URL_MAP) is required")?,
            path_matcher: self.path_matcher.clone(),
            domain: self.domain.clone().context("--domain (GATEHOUSE_DOMAIN) is required")?,
            oauth_brand: self.oauth_brand.clone().context("--oauth-brand (GATEHOUSE_OAUTH_BRAND) is required")?,
            iap_domain: self.iap_domain.clone().context("--iap-domain (GATEHOUSE_IAP_DOMAIN) is required")?,
        };
        topology.validate()?;
        Ok(topology)
    }
}

fn init_tracing() {
    let env = std::env::var("GATEHOUSE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GATEHOUSE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GATEHOUSE_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(serde::Serialize)]
struct Status {
    state: serde_json::Map<String, serde_json::Value>,
    config: serde_json::Map<String, serde_json::Value>,
    operations: Vec<gatehouse_persist::OperationRecord>,
}

fn status(manifest: &dyn Manifest, limit: usize) -> Result<Status> {
    let mut state = serde_json::Map::new();
    for k in StateKey::ALL {
        state.insert(k.to_string(), manifest.get_state(k)?.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null));
    }
    let mut config = serde_json::Map::new();
    for k in ConfigKey::ALL {
        config.insert(k.to_string(), manifest.get_config(k)?.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null));
    }
    Ok(Status { state, config, operations: manifest.operations(Some(limit))? })
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let manifest = SqliteManifest::open(&cli.manifest).with_context(|| format!("opening manifest {}", cli.manifest))?;

    match cli.command {
        Commands::Add { path, region, service, no_host_rewrite } => {
            let ctx = cli.project.resolve()?;
            let topology = cli.topology.resolve()?;
            let exec = ProcessExecutor::new();
            let gcloud = Gcloud::new(ctx.gcp_project_id.clone());
            let oauth = GcloudOAuthClients::new(&exec, &gcloud, &topology.oauth_brand);
            let lb = LoadBalancer::new(Cloud::new(&exec, &gcloud, &ctx, &topology), &manifest, &StdinConfirmer, &oauth);
            let opts = AddOptions { path, region, cloud_run_service: service, use_host_rewrite: !no_host_rewrite };
            info!(project = %ctx.project_name, "add invoked");
            let outcome = lb.add_to_loadbalancer(&opts).map_err(|e| {
                error!(error = %e, "add failed");
                e
            })?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Output::Human => match &outcome {
                    AddOutcome::Completed { url, .. } => {
                        println!();
                        println!("Load balancer configuration complete.");
                        println!("  Service URL:    {}", url);
                        println!("  Authentication: IAP for {}", topology.iap_domain);
                        println!(
                            "  Rate limiting:  {} requests per {}s per IP",
                            gatehouse_ops::policy::RATE_LIMIT_COUNT,
                            gatehouse_ops::policy::RATE_LIMIT_INTERVAL_SECS
                        );
                    }
                    AddOutcome::Cancelled => println!("Operation cancelled"),
                },
            }
        }
        Commands::Remove { path, yes } => {
            let ctx = cli.project.resolve()?;
            let topology = cli.topology.resolve()?;
            let exec = ProcessExecutor::new();
            let gcloud = Gcloud::new(ctx.gcp_project_id.clone());
            let oauth = GcloudOAuthClients::new(&exec, &gcloud, &topology.oauth_brand);
            let lb = LoadBalancer::new(Cloud::new(&exec, &gcloud, &ctx, &topology), &manifest, &StdinConfirmer, &oauth);
            info!(project = %ctx.project_name, "remove invoked");
            let outcome = lb.remove_from_loadbalancer(&RemoveOptions { path, skip_confirmation: yes })?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Output::Human => match &outcome {
                    RemoveOutcome::Completed(report) => {
                        for s in &report.steps {
                            match &s.outcome {
                                StepOutcome::Done => println!("✓ {} {}", s.step, s.target),
                                StepOutcome::Warning(msg) => println!("! {} {}: {}", s.step, s.target, msg),
                            }
                        }
                        println!("Removed {} from the load balancer ({} warning(s))", report.path, report.warnings());
                    }
                    RemoveOutcome::Cancelled => println!("Operation cancelled"),
                },
            }
        }
        Commands::Status { limit } => {
            let st = status(&manifest, limit)?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&st)?),
                Output::Human => {
                    for (k, v) in st.state.iter().chain(st.config.iter()) {
                        println!("{:<24} {}", k, if v.is_null() { "-".to_string() } else { json_text(v) });
                    }
                    if !st.operations.is_empty() {
                        println!();
                        for op in &st.operations {
                            println!("{}  {:<20} {}", op.ts, op.name, serde_json::Value::Object(op.detail.clone()));
                        }
                    }
                }
            }
        }
        Commands::Manifest { command } => match command {
            ManifestCommands::SetState { key, value } => {
                let key: StateKey = key.parse()?;
                manifest.update_state(key, value)?;
                info!(key = %key, value, "manifest state updated");
            }
            ManifestCommands::SetConfig { key, value } => {
                let key: ConfigKey = key.parse()?;
                manifest.update_config(key, value.as_deref())?;
                info!(key = %key, value = ?value, "manifest config updated");
            }
        },
    }
    Ok(())
}

fn json_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
