//! Exactly-once archival of the container logs of finished Jobs.
//!
//! A Job is archived at most once: the marker annotation is written only
//! after every container log has been uploaded, and the write is
//! conditional on the Job's resource version. A pass that fails halfway
//! leaves the marker unset and the next pass uploads everything again,
//! overwriting the partial objects.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use runsim_api::constants::{ARCHIVED_CONTAINERS, LOG_BACKUP_ANNOTATION, SEED_ANNOTATION};
use runsim_api::Simulation;
use tracing::debug;

use crate::cluster::{ClusterApi, LogStore};
use crate::error::{ControllerError, Result};
use crate::lifecycle::job_selector;
use crate::obs;
use crate::status::job_phase;

/// Content type of archived log objects.
pub const LOG_CONTENT_TYPE: &str = "text/plain";

const MARKER_VALUE: &str = "true";

/// What an archive attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The Job has not finished yet
    NotTerminal,
    /// The marker annotation was already present
    AlreadyArchived,
    Archived { objects: usize, bytes: u64 },
}

/// Object key of one archived container log.
pub fn log_key(run: &str, seed: &str, container: &str) -> String {
    format!("{run}/{seed}/{container}.log")
}

/// Uploads Job logs to a [`LogStore`].
pub struct LogArchiver {
    cluster: Arc<dyn ClusterApi>,
    store: Arc<dyn LogStore>,
}

impl LogArchiver {
    pub fn new(cluster: Arc<dyn ClusterApi>, store: Arc<dyn LogStore>) -> Self {
        Self { cluster, store }
    }

    /// Archive the logs of `job` if it is terminal and not archived yet.
    pub async fn archive(&self, sim: &Simulation, job: &Job) -> Result<ArchiveOutcome> {
        if !job_phase(job).is_terminal() {
            return Ok(ArchiveOutcome::NotTerminal);
        }
        if job.annotations().contains_key(LOG_BACKUP_ANNOTATION) {
            return Ok(ArchiveOutcome::AlreadyArchived);
        }

        let job_name = job.name_any();
        let namespace = job.namespace().unwrap_or_default();
        let seed = job
            .annotations()
            .get(SEED_ANNOTATION)
            .cloned()
            .ok_or_else(|| ControllerError::MissingAnnotation {
                job: job_name.clone(),
                annotation: SEED_ANNOTATION,
            })?;

        let pods = self.cluster.list_pods(&namespace, &job_selector(job)).await?;
        let pod = pods
            .first()
            .map(|p| p.name_any())
            .ok_or_else(|| ControllerError::NoPods { job: job_name.clone() })?;

        let run = sim.name_any();
        let mut bytes = 0;
        for container in ARCHIVED_CONTAINERS {
            let key = log_key(&run, &seed, container);
            let body = self.cluster.container_logs(&namespace, &pod, container).await?;
            let written = self.store.put_stream(&key, body, LOG_CONTENT_TYPE).await?;
            debug!(key = %key, bytes = written, "container log uploaded");
            bytes += written;
        }

        let mut marked = job.clone();
        marked
            .annotations_mut()
            .insert(LOG_BACKUP_ANNOTATION.to_string(), MARKER_VALUE.to_string());
        self.cluster.replace_job(&marked).await?;

        obs::emit_logs_archived(&job_name, ARCHIVED_CONTAINERS.len(), bytes);
        Ok(ArchiveOutcome::Archived {
            objects: ARCHIVED_CONTAINERS.len(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_group_logs_by_run_and_seed() {
        assert_eq!(log_key("sim", "42", "state"), "sim/42/state.log");
    }
}
