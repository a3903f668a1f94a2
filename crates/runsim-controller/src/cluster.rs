//! Cluster and archive store seams.
//!
//! These traits are the only way the engine talks to the outside world:
//! - `ClusterApi`: Kubernetes objects (simulations, Jobs, pods, pod logs)
//! - `LogStore`: durable storage for archived container logs
//!
//! Writes that replace an object are conditional on the resource version the
//! caller read; a stale write fails with `ClusterError::Conflict`.
//! In-memory implementations live in the `fakes` module.

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use runsim_api::Simulation;

use crate::error::{ClusterResult, StoreResult};

/// Container output as a stream of chunks.
pub type LogStream = BoxStream<'static, io::Result<Bytes>>;

/// Kubernetes object access needed by the reconciler.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a simulation; `None` when it does not exist.
    async fn get_simulation(&self, namespace: &str, name: &str) -> ClusterResult<Option<Simulation>>;

    /// Replace a simulation's spec and metadata.
    async fn replace_simulation(&self, sim: &Simulation) -> ClusterResult<Simulation>;

    /// Replace a simulation's status subresource.
    async fn replace_simulation_status(&self, sim: &Simulation) -> ClusterResult<Simulation>;

    /// Fetch a Job; `None` when it does not exist.
    async fn get_job(&self, namespace: &str, name: &str) -> ClusterResult<Option<Job>>;

    /// List Jobs carrying every label in `labels`.
    async fn list_jobs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<Vec<Job>>;

    /// Create a Job. Fails with `AlreadyExists` on a name collision.
    async fn create_job(&self, job: &Job) -> ClusterResult<Job>;

    async fn replace_job(&self, job: &Job) -> ClusterResult<Job>;

    /// Delete a Job and its pods. Deleting a missing Job succeeds.
    async fn delete_job(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>>;

    /// List pods carrying every label in `labels`.
    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<Vec<Pod>>;

    async fn replace_pod(&self, pod: &Pod) -> ClusterResult<Pod>;

    /// Stream the output of one container of a pod.
    async fn container_logs(&self, namespace: &str, pod: &str, container: &str) -> ClusterResult<LogStream>;
}

/// Durable object storage for archived logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Upload `body` as the object `key`, overwriting any previous object.
    /// Returns the number of bytes written.
    async fn put_stream(&self, key: &str, body: LogStream, content_type: &str) -> StoreResult<u64>;
}

/// Render labels as a Kubernetes equality selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `object_labels` carries every label of `selector`.
pub fn labels_match(object_labels: Option<&BTreeMap<String, String>>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| object_labels.and_then(|l| l.get(k)) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_sorted_and_comma_separated() {
        let labels = BTreeMap::from([
            ("simulation".to_string(), "sim".to_string()),
            ("app".to_string(), "runsim".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "app=runsim,simulation=sim");
    }

    #[test]
    fn labels_match_requires_every_pair() {
        let selector = BTreeMap::from([("simulation".to_string(), "sim".to_string())]);
        let matching = BTreeMap::from([
            ("simulation".to_string(), "sim".to_string()),
            ("other".to_string(), "x".to_string()),
        ]);
        let different = BTreeMap::from([("simulation".to_string(), "other".to_string())]);

        assert!(labels_match(Some(&matching), &selector));
        assert!(!labels_match(Some(&different), &selector));
        assert!(!labels_match(None, &selector));
        assert!(labels_match(None, &BTreeMap::new()));
    }
}
