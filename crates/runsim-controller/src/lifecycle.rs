//! Lifecycle of the Jobs owned by a simulation.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{LocalObjectReference, Pod};
use kube::{Resource, ResourceExt};
use runsim_api::constants::{EVICTION_PROTECTION_ANNOTATION, EVICTION_RELEASED};
use runsim_api::Simulation;

use crate::cluster::ClusterApi;
use crate::error::{ClusterError, ControllerError, Result};
use crate::factory::{build_job, job_name, simulation_labels};
use crate::obs;

/// Label Kubernetes puts on the pods of a Job.
pub const JOB_NAME_LABEL: &str = "job-name";

const EVICTION_RELEASE_ATTEMPTS: usize = 3;

/// Creates, finds and deletes the Jobs of a simulation.
pub struct JobLifecycle {
    cluster: Arc<dyn ClusterApi>,
    image_pull_secret: Option<String>,
}

impl JobLifecycle {
    pub fn new(cluster: Arc<dyn ClusterApi>, image_pull_secret: Option<String>) -> Self {
        Self {
            cluster,
            image_pull_secret,
        }
    }

    /// The Job running `seed`, if it exists.
    pub async fn get(&self, sim: &Simulation, seed: &str) -> Result<Option<Job>> {
        let namespace = sim.namespace().unwrap_or_default();
        Ok(self.cluster.get_job(&namespace, &job_name(sim, seed)).await?)
    }

    /// Create the Job running `seed`, owned by `sim`.
    pub async fn create(&self, sim: &Simulation, seed: &str) -> Result<Job> {
        let owner = sim
            .controller_owner_ref(&())
            .ok_or_else(|| ControllerError::NotPersisted { name: sim.name_any() })?;

        let mut job = build_job(sim, seed);
        job.metadata.owner_references = Some(vec![owner]);
        if let Some(secret) = &self.image_pull_secret {
            if let Some(pod) = job.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
                pod.image_pull_secrets = Some(vec![LocalObjectReference {
                    name: secret.clone().into(),
                }]);
            }
        }

        let created = self.cluster.create_job(&job).await?;
        obs::emit_job_created(&sim.name_any(), seed, &created.name_any());
        Ok(created)
    }

    /// Delete the Job running `seed` together with its pods.
    pub async fn delete(&self, sim: &Simulation, seed: &str) -> Result<()> {
        self.delete_named(sim, &job_name(sim, seed)).await
    }

    pub(crate) async fn delete_named(&self, sim: &Simulation, name: &str) -> Result<()> {
        let namespace = sim.namespace().unwrap_or_default();
        self.cluster.delete_job(&namespace, name).await?;
        obs::emit_job_deleted(&sim.name_any(), name);
        Ok(())
    }

    /// Every Job labelled as belonging to `sim`.
    pub async fn list_owned(&self, sim: &Simulation) -> Result<Vec<Job>> {
        let namespace = sim.namespace().unwrap_or_default();
        Ok(self.cluster.list_jobs(&namespace, &simulation_labels(sim)).await?)
    }

    /// Allow the autoscaler to evict the pods of a finished Job.
    ///
    /// Returns the number of pods updated. Pods that cannot be updated are
    /// logged and skipped; they are retried on the next pass.
    pub async fn release_eviction_protection(&self, job: &Job) -> Result<usize> {
        let namespace = job.namespace().unwrap_or_default();
        let pods = self.cluster.list_pods(&namespace, &job_selector(job)).await?;

        let mut released = 0;
        for pod in pods {
            let pod_name = pod.name_any();
            match self.release_pod(&namespace, pod).await {
                Ok(true) => {
                    released += 1;
                    obs::emit_eviction_released(&job.name_any(), &pod_name);
                }
                Ok(false) => {}
                Err(err) => obs::emit_eviction_release_failed(&pod_name, &err),
            }
        }
        Ok(released)
    }

    /// Returns whether the pod was updated.
    async fn release_pod(&self, namespace: &str, mut pod: Pod) -> std::result::Result<bool, ClusterError> {
        let mut attempt = 1;
        loop {
            if eviction_released(&pod) {
                return Ok(false);
            }
            pod.annotations_mut().insert(
                EVICTION_PROTECTION_ANNOTATION.to_string(),
                EVICTION_RELEASED.to_string(),
            );
            match self.cluster.replace_pod(&pod).await {
                Ok(_) => return Ok(true),
                Err(ClusterError::Conflict { .. }) if attempt < EVICTION_RELEASE_ATTEMPTS => {
                    attempt += 1;
                    match self.cluster.get_pod(namespace, &pod.name_any()).await? {
                        Some(fresh) => pod = fresh,
                        None => return Ok(false),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn eviction_released(pod: &Pod) -> bool {
    pod.annotations().get(EVICTION_PROTECTION_ANNOTATION).map(String::as_str) == Some(EVICTION_RELEASED)
}

/// Labels selecting the pods of `job`: its selector when set, otherwise the
/// `job-name` label.
pub(crate) fn job_selector(job: &Job) -> BTreeMap<String, String> {
    job.spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .and_then(|s| s.match_labels.clone())
        .filter(|labels| !labels.is_empty())
        .unwrap_or_else(|| BTreeMap::from([(JOB_NAME_LABEL.to_string(), job.name_any())]))
}
