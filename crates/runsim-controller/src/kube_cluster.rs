//! `ClusterApi` backed by a live Kubernetes API server.

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use futures::{AsyncBufRead, AsyncBufReadExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use runsim_api::Simulation;
use serde_json::json;

use crate::cluster::{label_selector, ClusterApi, LogStream};
use crate::error::{ClusterError, ClusterResult};

/// Kubernetes client wrapper implementing [`ClusterApi`].
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn simulations(&self, namespace: &str) -> Api<Simulation> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate an API failure on `kind/name` into a `ClusterError`.
fn map_err(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::Api(other.to_string()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_simulation(&self, namespace: &str, name: &str) -> ClusterResult<Option<Simulation>> {
        self.simulations(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_err("Simulation", name, e))
    }

    async fn replace_simulation(&self, sim: &Simulation) -> ClusterResult<Simulation> {
        let name = sim.name_any();
        self.simulations(&sim.namespace().unwrap_or_default())
            .replace(&name, &PostParams::default(), sim)
            .await
            .map_err(|e| map_err("Simulation", &name, e))
    }

    async fn replace_simulation_status(&self, sim: &Simulation) -> ClusterResult<Simulation> {
        let name = sim.name_any();
        // The resource version in the patch makes the write conditional.
        let patch = json!({
            "apiVersion": "tools.cosmos.network/v1",
            "kind": "Simulation",
            "metadata": { "resourceVersion": sim.resource_version() },
            "status": sim.status,
        });
        self.simulations(&sim.namespace().unwrap_or_default())
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err("Simulation", &name, e))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> ClusterResult<Option<Job>> {
        self.jobs(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_err("Job", name, e))
    }

    async fn list_jobs(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<Vec<Job>> {
        let params = ListParams::default().labels(&label_selector(labels));
        match self.jobs(namespace).list(&params).await {
            Ok(list) => Ok(list.items),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(Vec::new()),
            Err(e) => Err(map_err("Job", namespace, e)),
        }
    }

    async fn create_job(&self, job: &Job) -> ClusterResult<Job> {
        let name = job.name_any();
        self.jobs(&job.namespace().unwrap_or_default())
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| map_err("Job", &name, e))
    }

    async fn replace_job(&self, job: &Job) -> ClusterResult<Job> {
        let name = job.name_any();
        self.jobs(&job.namespace().unwrap_or_default())
            .replace(&name, &PostParams::default(), job)
            .await
            .map_err(|e| map_err("Job", &name, e))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        match self.jobs(namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(map_err("Job", name, e)),
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        self.pods(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_err("Pod", name, e))
    }

    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>) -> ClusterResult<Vec<Pod>> {
        let params = ListParams::default().labels(&label_selector(labels));
        match self.pods(namespace).list(&params).await {
            Ok(list) => Ok(list.items),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(Vec::new()),
            Err(e) => Err(map_err("Pod", namespace, e)),
        }
    }

    async fn replace_pod(&self, pod: &Pod) -> ClusterResult<Pod> {
        let name = pod.name_any();
        self.pods(&pod.namespace().unwrap_or_default())
            .replace(&name, &PostParams::default(), pod)
            .await
            .map_err(|e| map_err("Pod", &name, e))
    }

    async fn container_logs(&self, namespace: &str, pod: &str, container: &str) -> ClusterResult<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        let reader = self
            .pods(namespace)
            .log_stream(pod, &params)
            .await
            .map_err(|e| map_err("Pod", pod, e))?;
        Ok(raw_chunks(reader))
    }
}

/// Forward a reader's buffered chunks unchanged; container output need not
/// be UTF-8 or newline terminated.
fn raw_chunks<R>(reader: R) -> LogStream
where
    R: AsyncBufRead + Send + 'static,
{
    stream::try_unfold(Box::pin(reader), |mut reader| async move {
        let chunk = Bytes::copy_from_slice(reader.fill_buf().await?);
        if chunk.is_empty() {
            return Ok(None);
        }
        reader.consume_unpin(chunk.len());
        Ok::<_, io::Error>(Some((chunk, reader)))
    })
    .boxed()
}
