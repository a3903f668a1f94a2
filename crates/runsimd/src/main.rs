//! runsimd - Simulation operator
//!
//! Watches `Simulation` resources and the Jobs they own, and runs one
//! reconciliation pass whenever either changes.
//!
//! ## Commands
//!
//! - `run`: start the controller loop
//! - `crd`: print the `Simulation` CustomResourceDefinition as YAML

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use runsim_api::constants::NAME_LABEL_KEY;
use runsim_api::Simulation;
use runsim_controller::options::{
    DEFAULT_LOGS_BUCKET, DEFAULT_S3_ENDPOINT, DEFAULT_S3_REGION, DEFAULT_SEED_CONCURRENCY,
};
use runsim_controller::telemetry::init_tracing;
use runsim_controller::{
    ControllerError, ControllerOptions, KubeCluster, LogBackupOptions, PassOutcome, Reconciler,
    S3LogStore,
};
use runsim_genesis::{GenesisFetcher, DEFAULT_FETCH_TIMEOUT};
use tracing::{debug, info, warn, Level};

/// Delay before the pass following a defaulting write.
const DEFAULTED_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "runsimd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs blockchain simulations as Kubernetes Jobs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller loop
    Run(RunArgs),

    /// Print the Simulation CRD manifest
    Crd,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Archive the logs of finished Jobs to object storage
    #[arg(long, env = "RUNSIM_LOG_BACKUP")]
    log_backup: bool,

    /// S3 endpoint host, or URL for S3-compatible stores
    #[arg(long, env = "RUNSIM_S3_ENDPOINT", default_value = DEFAULT_S3_ENDPOINT)]
    s3_endpoint: String,

    #[arg(long, env = "RUNSIM_S3_REGION", default_value = DEFAULT_S3_REGION)]
    s3_region: String,

    /// Bucket receiving archived logs
    #[arg(long, env = "RUNSIM_LOGS_BUCKET", default_value = DEFAULT_LOGS_BUCKET)]
    logs_bucket: String,

    #[arg(long, env = "RUNSIM_S3_ACCESS_KEY_ID")]
    s3_access_key_id: Option<String>,

    #[arg(long, env = "RUNSIM_S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    s3_secret_access_key: Option<String>,

    /// Image pull secret attached to every simulation pod
    #[arg(long, env = "RUNSIM_IMAGE_PULL_SECRET")]
    image_pull_secret: Option<String>,

    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "RUNSIM_NAMESPACE")]
    namespace: Option<String>,

    /// Seeds converged concurrently within one pass
    #[arg(long, env = "RUNSIM_SEED_CONCURRENCY", default_value_t = DEFAULT_SEED_CONCURRENCY)]
    seed_concurrency: usize,
}

impl RunArgs {
    fn controller_options(&self) -> ControllerOptions {
        let mut options = ControllerOptions::default().with_seed_concurrency(self.seed_concurrency);
        if let Some(secret) = &self.image_pull_secret {
            options = options.with_image_pull_secret(secret);
        }
        if self.log_backup {
            let mut backup = LogBackupOptions::default()
                .with_endpoint(&self.s3_endpoint)
                .with_region(&self.s3_region)
                .with_bucket(&self.logs_bucket);
            if let (Some(key_id), Some(secret)) = (&self.s3_access_key_id, &self.s3_secret_access_key) {
                backup = backup.with_credentials(key_id, secret);
            }
            options = options.with_log_backup(backup);
        }
        options
    }
}

struct ControllerContext {
    reconciler: Reconciler,
    options: ControllerOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Crd => cmd_crd(),
    }
}

fn cmd_crd() -> Result<()> {
    let manifest = serde_yaml::to_string(&Simulation::crd()).context("Failed to render CRD")?;
    print!("{manifest}");
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let options = args.controller_options();
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let fetcher = GenesisFetcher::new(DEFAULT_FETCH_TIMEOUT).context("Failed to create genesis HTTP client")?;
    let mut reconciler = Reconciler::new(cluster, Arc::new(fetcher), &options);
    if let Some(backup) = &options.log_backup {
        let store = S3LogStore::new(backup).context("Failed to configure log archive store")?;
        reconciler = reconciler.with_log_archiver(Arc::new(store));
        info!(bucket = %backup.bucket, endpoint = %backup.endpoint_url(), "log backup enabled");
    }

    let (simulations, jobs): (Api<Simulation>, Api<Job>) = match &args.namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    info!(
        namespace = args.namespace.as_deref().unwrap_or("*"),
        seed_concurrency = options.seed_concurrency,
        "runsimd started"
    );

    let context = Arc::new(ControllerContext { reconciler, options });
    Controller::new(simulations, watcher::Config::default())
        .owns(jobs, watcher::Config::default().labels(NAME_LABEL_KEY))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(simulation = %obj.name, "pass completed"),
                Err(err) => warn!(error = %err, "controller error"),
            }
        })
        .await;

    info!("runsimd stopped");
    Ok(())
}

async fn reconcile(sim: Arc<Simulation>, ctx: Arc<ControllerContext>) -> Result<Action, ControllerError> {
    let namespace = sim.namespace().unwrap_or_default();
    match ctx.reconciler.reconcile(&namespace, &sim.name_any()).await? {
        PassOutcome::Defaulted => Ok(Action::requeue(DEFAULTED_REQUEUE)),
        PassOutcome::Gone | PassOutcome::Reconciled(_) => Ok(Action::await_change()),
    }
}

fn error_policy(sim: Arc<Simulation>, err: &ControllerError, ctx: Arc<ControllerContext>) -> Action {
    let retry = ctx.options.retry_after(err);
    warn!(
        simulation = %sim.name_any(),
        error = %err,
        retry_secs = retry.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(retry)
}
