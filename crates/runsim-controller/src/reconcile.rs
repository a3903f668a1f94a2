//! One reconciliation pass over a simulation.
//!
//! A pass reads the simulation, converges its Jobs to the desired seed set,
//! folds their state into a fresh status value and persists that value with
//! a single compare-and-set write. Nothing is persisted when a step fails;
//! the pass is simply retried.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use runsim_api::{fill_defaults, GenesisInfo, GenesisSource, Simulation, SimulationStatus};
use runsim_genesis::{GenesisError, GenesisFetcher, GenesisMetadata};
use tracing::{debug, Instrument};

use crate::archive::LogArchiver;
use crate::cluster::{ClusterApi, LogStore};
use crate::error::{ClusterError, ControllerError, Result};
use crate::factory::job_name;
use crate::lifecycle::JobLifecycle;
use crate::obs;
use crate::options::ControllerOptions;
use crate::status::{aggregate, forget_job, job_phase, merge_job};

/// Resolves the metadata of a genesis document published at a URL.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<GenesisMetadata, GenesisError>;
}

#[async_trait]
impl MetadataFetcher for GenesisFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<GenesisMetadata, GenesisError> {
        GenesisFetcher::fetch(self, url).await
    }
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The simulation no longer exists
    Gone,
    /// Defaults were persisted; Jobs are created on the next pass
    Defaulted,
    /// Jobs were converged and this status persisted
    Reconciled(SimulationStatus),
}

/// Drives simulations to their desired set of Jobs.
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    lifecycle: JobLifecycle,
    archiver: Option<LogArchiver>,
    genesis: Arc<dyn MetadataFetcher>,
    seed_concurrency: usize,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, genesis: Arc<dyn MetadataFetcher>, options: &ControllerOptions) -> Self {
        Self {
            lifecycle: JobLifecycle::new(cluster.clone(), options.image_pull_secret.clone()),
            cluster,
            archiver: None,
            genesis,
            seed_concurrency: options.seed_concurrency.max(1),
        }
    }

    /// Archive the logs of finished Jobs into `store`.
    pub fn with_log_archiver(mut self, store: Arc<dyn LogStore>) -> Self {
        self.archiver = Some(LogArchiver::new(self.cluster.clone(), store));
        self
    }

    /// Run one pass for the simulation `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<PassOutcome> {
        self.run_pass(namespace, name)
            .instrument(obs::simulation_span(namespace, name))
            .await
    }

    async fn run_pass(&self, namespace: &str, name: &str) -> Result<PassOutcome> {
        let fetched = self
            .cluster
            .get_simulation(namespace, name)
            .await
            .map_err(|source| ControllerError::Fetch {
                name: name.to_string(),
                source,
            })?;
        let Some(mut sim) = fetched else {
            debug!("simulation is gone");
            return Ok(PassOutcome::Gone);
        };

        if fill_defaults(&mut sim) {
            self.cluster.replace_simulation(&sim).await?;
            obs::emit_defaults_applied(name);
            return Ok(PassOutcome::Defaulted);
        }

        self.reconcile_simulation(&sim).await.map(PassOutcome::Reconciled)
    }

    /// Converge the Jobs of an already defaulted simulation and persist its
    /// status.
    pub async fn reconcile_simulation(&self, sim: &Simulation) -> Result<SimulationStatus> {
        let seeds = desired_seeds(sim);

        let pending: Vec<_> = seeds.iter().map(|seed| self.converge_seed(sim, seed)).collect();
        let jobs: Vec<Job> = stream::iter(pending)
            .buffered(self.seed_concurrency)
            .try_collect()
            .await?;

        let mut status = sim.status.clone().unwrap_or_default();
        for job in &jobs {
            status = merge_job(status, job)?;
        }

        status = self.prune(sim, &seeds, status).await?;
        status = aggregate(status);
        status = self.resolve_genesis(sim, status).await?;

        if sim.status.as_ref() == Some(&status) {
            debug!("status unchanged");
            return Ok(status);
        }

        let mut updated = sim.clone();
        updated.status = Some(status.clone());
        self.cluster.replace_simulation_status(&updated).await?;
        obs::emit_status_updated(&sim.name_any(), &status.status, status.job_status.len());
        Ok(status)
    }

    /// Make sure the Job for `seed` exists and handle it once it finished.
    async fn converge_seed(&self, sim: &Simulation, seed: &str) -> Result<Job> {
        let job = match self.lifecycle.get(sim, seed).await? {
            Some(job) => job,
            None => match self.lifecycle.create(sim, seed).await {
                Ok(job) => job,
                // Another writer got there first; use theirs.
                Err(ControllerError::Cluster(ClusterError::AlreadyExists { .. })) => {
                    self.lifecycle.get(sim, seed).await?.ok_or_else(|| {
                        ClusterError::NotFound {
                            kind: "Job",
                            name: job_name(sim, seed),
                        }
                    })?
                }
                Err(err) => return Err(err),
            },
        };

        if job_phase(&job).is_terminal() {
            if let Some(archiver) = &self.archiver {
                archiver.archive(sim, &job).await?;
            }
            self.lifecycle.release_eviction_protection(&job).await?;
        }
        Ok(job)
    }

    /// Delete Jobs whose seed is no longer desired and drop their entries.
    async fn prune(&self, sim: &Simulation, seeds: &[String], mut status: SimulationStatus) -> Result<SimulationStatus> {
        let desired: BTreeSet<String> = seeds.iter().map(|s| job_name(sim, s)).collect();

        let mut stale: BTreeSet<String> = status
            .job_status
            .iter()
            .map(|e| e.name.clone())
            .filter(|n| !desired.contains(n))
            .collect();
        for job in self.lifecycle.list_owned(sim).await? {
            let name = job.name_any();
            if !desired.contains(&name) {
                stale.insert(name);
            }
        }

        for name in stale {
            self.lifecycle.delete_named(sim, &name).await?;
            status = forget_job(status, &name);
        }
        Ok(status)
    }

    /// Record the metadata of a URL genesis the first time it is seen.
    async fn resolve_genesis(&self, sim: &Simulation, mut status: SimulationStatus) -> Result<SimulationStatus> {
        let Some(GenesisSource::FromUrl(url)) = sim.spec.config.genesis.as_ref() else {
            return Ok(status);
        };
        if status.genesis.is_some() {
            return Ok(status);
        }

        let meta = self.genesis.fetch(url).await?;
        obs::emit_genesis_resolved(&sim.name_any(), &meta.chain_id, &meta.sha256);
        status.genesis = Some(GenesisInfo {
            chain_id: meta.chain_id,
            sha256: meta.sha256,
        });
        Ok(status)
    }
}

/// Configured seeds with duplicates removed, first occurrence wins.
fn desired_seeds(sim: &Simulation) -> Vec<String> {
    let mut seen = BTreeSet::new();
    sim.spec
        .config
        .seeds
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}
