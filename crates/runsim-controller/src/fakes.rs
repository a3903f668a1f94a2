//! In-memory fakes for the cluster and store seams (testing only)
//!
//! Provides `MemoryCluster`, `MemoryLogStore` and `StaticMetadata`, which
//! satisfy the trait contracts without a Kubernetes API server, an object
//! store or the network. `MemoryCluster` enforces resource-version
//! compare-and-set on every replace so that lost races surface as
//! `ClusterError::Conflict` exactly as they would against a real cluster.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use runsim_api::constants::{EVICTION_PROTECTED, EVICTION_PROTECTION_ANNOTATION};
use runsim_api::Simulation;
use runsim_genesis::{GenesisError, GenesisMetadata};

use crate::cluster::{labels_match, ClusterApi, LogStore, LogStream};
use crate::error::{ClusterError, ClusterResult, StoreError, StoreResult};
use crate::lifecycle::JOB_NAME_LABEL;
use crate::reconcile::MetadataFetcher;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

// ---------------------------------------------------------------------------
// MemoryCluster
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClusterState {
    simulations: BTreeMap<Key, Simulation>,
    jobs: BTreeMap<Key, Job>,
    pods: BTreeMap<Key, Pod>,
    /// (namespace, pod, container) -> output
    logs: HashMap<(String, String, String), Vec<u8>>,
    resource_version: u64,
    status_writes: usize,
    job_creates: usize,
    /// Pod replacements still to be rejected with a conflict.
    pod_conflicts: usize,
}

impl ClusterState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// Compare-and-set check: a write without a resource version is
/// unconditional, otherwise it must match the stored one.
fn check_version(kind: &'static str, name: &str, stored: Option<&String>, incoming: Option<&String>) -> ClusterResult<()> {
    match incoming {
        Some(v) if stored != Some(v) => Err(ClusterError::Conflict {
            kind,
            name: name.to_string(),
        }),
        _ => Ok(()),
    }
}

/// In-memory cluster holding simulations, Jobs, pods and pod logs.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a simulation as if created by a user. Assigns a uid, a
    /// namespace (`default` when unset) and a resource version.
    pub fn insert_simulation(&self, mut sim: Simulation) -> Simulation {
        let mut state = self.state.lock().unwrap();
        let namespace = sim.namespace().unwrap_or_else(|| "default".to_string());
        sim.metadata.namespace = Some(namespace.clone());
        if sim.metadata.uid.is_none() {
            sim.metadata.uid = Some(format!("uid-{}", sim.name_any()));
        }
        sim.metadata.resource_version = Some(state.next_version());
        state.simulations.insert(key(&namespace, &sim.name_any()), sim.clone());
        sim
    }

    pub fn simulation(&self, namespace: &str, name: &str) -> Option<Simulation> {
        self.state.lock().unwrap().simulations.get(&key(namespace, name)).cloned()
    }

    /// Bump a simulation's resource version, as a concurrent writer would.
    pub fn touch_simulation(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        if let Some(sim) = state.simulations.get_mut(&key(namespace, name)) {
            sim.metadata.resource_version = Some(version);
        }
    }

    pub fn remove_simulation(&self, namespace: &str, name: &str) {
        self.state.lock().unwrap().simulations.remove(&key(namespace, name));
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(&key(namespace, name)).cloned()
    }

    /// Names of every Job in `namespace`, sorted.
    pub fn job_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Set the pod counters of a Job, as the Job controller would.
    pub fn set_job_counts(&self, namespace: &str, name: &str, active: i32, succeeded: i32, failed: i32) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        if let Some(job) = state.jobs.get_mut(&key(namespace, name)) {
            job.status = Some(JobStatus {
                active: Some(active),
                succeeded: Some(succeeded),
                failed: Some(failed),
                ..Default::default()
            });
            job.metadata.resource_version = Some(version);
        }
    }

    /// Delete a Job behind the controller's back. Its pods are kept.
    pub fn remove_job(&self, namespace: &str, name: &str) {
        self.state.lock().unwrap().jobs.remove(&key(namespace, name));
    }

    /// Store a Job directly, bypassing `create_job` bookkeeping.
    pub fn insert_job(&self, mut job: Job) {
        let mut state = self.state.lock().unwrap();
        job.metadata.resource_version = Some(state.next_version());
        let namespace = job.namespace().unwrap_or_else(|| "default".to_string());
        state.jobs.insert(key(&namespace, &job.name_any()), job);
    }

    /// Add the pod `{job}-pod` for a Job, carrying eviction protection and
    /// the given output per container.
    pub fn add_pod(&self, namespace: &str, job: &str, logs: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let pod_name = format!("{job}-pod");
        let mut pod = Pod::default();
        pod.metadata.name = Some(pod_name.clone());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.labels = Some(BTreeMap::from([(JOB_NAME_LABEL.to_string(), job.to_string())]));
        pod.metadata.annotations = Some(BTreeMap::from([(
            EVICTION_PROTECTION_ANNOTATION.to_string(),
            EVICTION_PROTECTED.to_string(),
        )]));
        pod.metadata.resource_version = Some(state.next_version());
        state.pods.insert(key(namespace, &pod_name), pod);
        for (container, output) in logs {
            state.logs.insert(
                (namespace.to_string(), pod_name.clone(), container.to_string()),
                output.as_bytes().to_vec(),
            );
        }
        pod_name
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(&key(namespace, name)).cloned()
    }

    /// Reject the next `count` pod replacements with a conflict, as if
    /// another writer raced each of them.
    pub fn conflict_pod_replacements(&self, count: usize) {
        self.state.lock().unwrap().pod_conflicts = count;
    }

    /// Number of successful status subresource writes.
    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    /// Number of successful Job creations.
    pub fn job_creates(&self) -> usize {
        self.state.lock().unwrap().job_creates
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get_simulation(&self, namespace: &str, name: &str) -> ClusterResult<Option<Simulation>> {
        Ok(self.simulation(namespace, name))
    }

    async fn replace_simulation(&self, sim: &Simulation) -> ClusterResult<Simulation> {
        let mut state = self.state.lock().unwrap();
        let name = sim.name_any();
        let k = key(&sim.namespace().unwrap_or_default(), &name);
        let stored = state
            .simulations
            .get(&k)
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Simulation",
                name: name.clone(),
            })?;
        check_version("Simulation", &name, stored.metadata.resource_version.as_ref(), sim.metadata.resource_version.as_ref())?;

        // The main resource ignores status changes.
        let mut next = sim.clone();
        next.status = stored.status.clone();
        next.metadata.resource_version = Some(state.next_version());
        state.simulations.insert(k, next.clone());
        Ok(next)
    }

    async fn replace_simulation_status(&self, sim: &Simulation) -> ClusterResult<Simulation> {
        let mut state = self.state.lock().unwrap();
        let name = sim.name_any();
        let k = key(&sim.namespace().unwrap_or_default(), &name);
        let stored = state
            .simulations
            .get(&k)
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Simulation",
                name: name.clone(),
            })?;
        check_version("Simulation", &name, stored.metadata.resource_version.as_ref(), sim.metadata.resource_version.as_ref())?;

        // The status subresource ignores everything but status.
        let mut next = stored.clone();
        next.status = sim.status.clone();
        next.metadata.resource_version = Some(state.next_version());
        state.simulations.insert(k, next.clone());
        state.status_writes += 1;
        Ok(next)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> ClusterResult<Option<Job>> {
        Ok(self.job(namespace, name))
    }

    async fn list_jobs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<Vec<Job>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|((ns, _), job)| ns == namespace && labels_match(job.metadata.labels.as_ref(), labels))
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn create_job(&self, job: &Job) -> ClusterResult<Job> {
        let mut state = self.state.lock().unwrap();
        let name = job.name_any();
        let k = key(&job.namespace().unwrap_or_default(), &name);
        if state.jobs.contains_key(&k) {
            return Err(ClusterError::AlreadyExists { kind: "Job", name });
        }

        let mut created = job.clone();
        if let Some(spec) = created.spec.as_mut() {
            spec.selector = Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(JOB_NAME_LABEL.to_string(), name.clone())])),
                ..Default::default()
            });
        }
        created.metadata.uid = Some(format!("uid-{name}"));
        created.metadata.resource_version = Some(state.next_version());
        state.jobs.insert(k, created.clone());
        state.job_creates += 1;
        Ok(created)
    }

    async fn replace_job(&self, job: &Job) -> ClusterResult<Job> {
        let mut state = self.state.lock().unwrap();
        let name = job.name_any();
        let k = key(&job.namespace().unwrap_or_default(), &name);
        let stored = state.jobs.get(&k).ok_or_else(|| ClusterError::NotFound {
            kind: "Job",
            name: name.clone(),
        })?;
        check_version("Job", &name, stored.metadata.resource_version.as_ref(), job.metadata.resource_version.as_ref())?;

        let mut next = job.clone();
        next.metadata.resource_version = Some(state.next_version());
        state.jobs.insert(k, next.clone());
        Ok(next)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.remove(&key(namespace, name));
        let selector = BTreeMap::from([(JOB_NAME_LABEL.to_string(), name.to_string())]);
        state
            .pods
            .retain(|(ns, _), pod| !(ns == namespace && labels_match(pod.metadata.labels.as_ref(), &selector)));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        Ok(self.pod(namespace, name))
    }

    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<Vec<Pod>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && labels_match(pod.metadata.labels.as_ref(), labels))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn replace_pod(&self, pod: &Pod) -> ClusterResult<Pod> {
        let mut state = self.state.lock().unwrap();
        let name = pod.name_any();
        let k = key(&pod.namespace().unwrap_or_default(), &name);
        let stored = state.pods.get(&k).ok_or_else(|| ClusterError::NotFound {
            kind: "Pod",
            name: name.clone(),
        })?;
        check_version("Pod", &name, stored.metadata.resource_version.as_ref(), pod.metadata.resource_version.as_ref())?;
        if state.pod_conflicts > 0 {
            state.pod_conflicts -= 1;
            return Err(ClusterError::Conflict { kind: "Pod", name });
        }

        let mut next = pod.clone();
        next.metadata.resource_version = Some(state.next_version());
        state.pods.insert(k, next.clone());
        Ok(next)
    }

    async fn container_logs(&self, namespace: &str, pod: &str, container: &str) -> ClusterResult<LogStream> {
        let state = self.state.lock().unwrap();
        if !state.pods.contains_key(&key(namespace, pod)) {
            return Err(ClusterError::NotFound {
                kind: "Pod",
                name: pod.to_string(),
            });
        }
        let output = state
            .logs
            .get(&(namespace.to_string(), pod.to_string(), container.to_string()))
            .cloned()
            .unwrap_or_default();
        // Split into small chunks so consumers see a real stream.
        let chunks: Vec<io::Result<Bytes>> = output
            .chunks(16)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

// ---------------------------------------------------------------------------
// MemoryLogStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

/// In-memory log store backed by a `HashMap<key, object>`.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_keys_containing: Mutex<Option<String>>,
    puts: AtomicUsize,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject uploads whose key contains `fragment`; `None` accepts all.
    pub fn fail_keys_containing(&self, fragment: Option<&str>) {
        *self.fail_keys_containing.lock().unwrap() = fragment.map(str::to_string);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|o| o.content_type.clone())
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of successful uploads, overwrites included.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn put_stream(&self, key: &str, mut body: LogStream, content_type: &str) -> StoreResult<u64> {
        let failing = self.fail_keys_containing.lock().unwrap().clone();
        if failing.is_some_and(|f| key.contains(&f)) {
            return Err(StoreError::Backend(format!("injected failure for {key}")));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StoreError::Source {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            buf.extend_from_slice(&chunk);
        }

        let written = buf.len() as u64;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: buf.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// StaticMetadata
// ---------------------------------------------------------------------------

/// Metadata fetcher answering every URL with the same metadata.
#[derive(Debug)]
pub struct StaticMetadata {
    metadata: GenesisMetadata,
    calls: AtomicUsize,
}

impl StaticMetadata {
    pub fn new(chain_id: &str, sha256: &str) -> Self {
        Self {
            metadata: GenesisMetadata {
                chain_id: chain_id.to_string(),
                sha256: sha256.to_string(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataFetcher for StaticMetadata {
    async fn fetch(&self, _url: &str) -> Result<GenesisMetadata, GenesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runsim_api::SimulationSpec;

    #[tokio::test]
    async fn stale_status_write_conflicts() {
        let cluster = MemoryCluster::new();
        let sim = cluster.insert_simulation(Simulation::new("sim", SimulationSpec::default()));
        cluster.touch_simulation("default", "sim");

        let err = cluster.replace_simulation_status(&sim).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict { .. }));
        assert_eq!(cluster.status_writes(), 0);
    }

    #[tokio::test]
    async fn create_job_rejects_duplicates_and_sets_selector() {
        let cluster = MemoryCluster::new();
        let mut job = Job::default();
        job.metadata.name = Some("sim-1".to_string());
        job.metadata.namespace = Some("default".to_string());
        job.spec = Some(Default::default());

        let created = cluster.create_job(&job).await.unwrap();
        let selector = created.spec.unwrap().selector.unwrap().match_labels.unwrap();
        assert_eq!(selector[JOB_NAME_LABEL], "sim-1");

        let err = cluster.create_job(&job).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn deleting_a_job_removes_its_pods() {
        let cluster = MemoryCluster::new();
        cluster.add_pod("default", "sim-1", &[]);
        cluster.delete_job("default", "sim-1").await.unwrap();
        cluster.delete_job("default", "sim-1").await.unwrap();
        assert!(cluster.pod("default", "sim-1-pod").is_none());
    }

    #[tokio::test]
    async fn log_store_counts_uploads() {
        let store = MemoryLogStore::new();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ])
        .boxed();
        let written = store.put_stream("a/b.log", body, "text/plain").await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(store.object("a/b.log").unwrap(), b"hello world");
        assert_eq!(store.content_type("a/b.log").as_deref(), Some("text/plain"));
        assert_eq!(store.puts(), 1);
    }
}
