//! Status aggregation.
//!
//! Status is a value: every step takes the current `SimulationStatus` and
//! returns the next one. The reconciler threads it through a pass and
//! persists it once.

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use runsim_api::constants::SEED_ANNOTATION;
use runsim_api::{JobStatus, SimStatus, SimulationStatus};

use crate::error::{ControllerError, Result};

/// Derive the status of a single Job from its pod counters.
pub fn job_phase(job: &Job) -> SimStatus {
    let Some(status) = job.status.as_ref() else {
        return SimStatus::Pending;
    };
    if status.succeeded.unwrap_or(0) > 0 {
        SimStatus::Succeeded
    } else if status.failed.unwrap_or(0) > 0 {
        SimStatus::Failed
    } else if status.active.unwrap_or(0) > 0 {
        SimStatus::Running
    } else {
        SimStatus::Pending
    }
}

/// Record the observed state of `job`, updating its entry by name or
/// appending a new one.
pub fn merge_job(mut status: SimulationStatus, job: &Job) -> Result<SimulationStatus> {
    let name = job.name_any();
    let phase = job_phase(job);

    if let Some(entry) = status.job_status.iter_mut().find(|e| e.name == name) {
        entry.status = phase;
        return Ok(status);
    }

    let seed = job
        .annotations()
        .get(SEED_ANNOTATION)
        .cloned()
        .ok_or_else(|| ControllerError::MissingAnnotation {
            job: name.clone(),
            annotation: SEED_ANNOTATION,
        })?;
    status.job_status.push(JobStatus {
        name,
        seed,
        status: phase,
    });
    Ok(status)
}

/// Drop the entry for the Job `name`, if any.
pub fn forget_job(mut status: SimulationStatus, name: &str) -> SimulationStatus {
    status.job_status.retain(|e| e.name != name);
    status
}

/// Recompute the counters and the aggregate phase from the Job entries.
pub fn aggregate(mut status: SimulationStatus) -> SimulationStatus {
    let count = |phase: SimStatus| status.job_status.iter().filter(|e| e.status == phase).count() as u32;
    let running = count(SimStatus::Running);
    let succeeded = count(SimStatus::Succeeded);
    let failed = count(SimStatus::Failed);
    let pending = count(SimStatus::Pending);
    let total = status.job_status.len() as u32;

    status.status = if succeeded == total {
        SimStatus::Succeeded
    } else if failed > 0 {
        SimStatus::Failed
    } else if pending == total {
        SimStatus::Pending
    } else {
        SimStatus::Running
    };
    status.running = running;
    status.succeeded = succeeded;
    status.failed = failed;
    status.pending = pending;
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus as K8sJobStatus;
    use std::collections::BTreeMap;

    fn job(name: &str, seed: Option<&str>, active: i32, succeeded: i32, failed: i32) -> Job {
        let mut job = Job::default();
        job.metadata.name = Some(name.to_string());
        if let Some(seed) = seed {
            job.metadata.annotations = Some(BTreeMap::from([(SEED_ANNOTATION.to_string(), seed.to_string())]));
        }
        job.status = Some(K8sJobStatus {
            active: Some(active),
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        });
        job
    }

    fn entries(phases: &[SimStatus]) -> SimulationStatus {
        SimulationStatus {
            job_status: phases
                .iter()
                .enumerate()
                .map(|(i, p)| JobStatus {
                    name: format!("sim-{i}"),
                    seed: i.to_string(),
                    status: *p,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn phase_priority() {
        assert_eq!(job_phase(&job("j", None, 1, 1, 1)), SimStatus::Succeeded);
        assert_eq!(job_phase(&job("j", None, 1, 0, 1)), SimStatus::Failed);
        assert_eq!(job_phase(&job("j", None, 1, 0, 0)), SimStatus::Running);
        assert_eq!(job_phase(&job("j", None, 0, 0, 0)), SimStatus::Pending);
        assert_eq!(job_phase(&Job::default()), SimStatus::Pending);
    }

    #[test]
    fn merge_appends_then_updates_in_place() {
        let status = merge_job(SimulationStatus::default(), &job("sim-1", Some("1"), 0, 0, 0)).unwrap();
        let status = merge_job(status, &job("sim-2", Some("2"), 1, 0, 0)).unwrap();
        let status = merge_job(status, &job("sim-1", Some("1"), 1, 0, 0)).unwrap();

        let names: Vec<&str> = status.job_status.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["sim-1", "sim-2"]);
        assert_eq!(status.job_status[0].status, SimStatus::Running);
        assert_eq!(status.job_status[0].seed, "1");
    }

    #[test]
    fn merge_requires_seed_annotation_for_new_entries() {
        let err = merge_job(SimulationStatus::default(), &job("sim-1", None, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, ControllerError::MissingAnnotation { .. }));
    }

    #[test]
    fn forget_removes_only_the_named_entry() {
        let status = forget_job(entries(&[SimStatus::Running, SimStatus::Failed]), "sim-0");
        assert_eq!(status.job_status.len(), 1);
        assert_eq!(status.job_status[0].name, "sim-1");
    }

    #[test]
    fn aggregate_counts_every_phase() {
        let status = aggregate(entries(&[
            SimStatus::Running,
            SimStatus::Succeeded,
            SimStatus::Succeeded,
            SimStatus::Pending,
        ]));
        assert_eq!(
            (status.running, status.succeeded, status.failed, status.pending),
            (1, 2, 0, 1)
        );
        assert_eq!(status.status, SimStatus::Running);
    }

    #[test]
    fn aggregate_phase_law() {
        use SimStatus::*;
        assert_eq!(aggregate(entries(&[Succeeded, Succeeded])).status, Succeeded);
        assert_eq!(aggregate(entries(&[Succeeded, Failed, Running])).status, Failed);
        assert_eq!(aggregate(entries(&[Pending, Pending])).status, Pending);
        assert_eq!(aggregate(entries(&[Pending, Running])).status, Running);
    }

    #[test]
    fn empty_status_aggregates_to_succeeded() {
        let status = aggregate(SimulationStatus::default());
        assert_eq!(status.status, SimStatus::Succeeded);
        assert_eq!(status.succeeded, 0);
    }

    #[test]
    fn pending_and_succeeded_mix_reports_running() {
        let status = aggregate(entries(&[SimStatus::Pending, SimStatus::Succeeded]));
        assert_eq!(status.status, SimStatus::Running);
        assert_eq!(status.running, 0);
    }
}
