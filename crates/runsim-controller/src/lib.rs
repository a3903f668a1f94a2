//! runsim-controller: Simulation reconciliation engine
//!
//! Turns a `Simulation` resource into one Kubernetes Job per seed and keeps
//! the two in step: missing Jobs are created, Jobs for removed seeds are
//! deleted, Job outcomes are folded into the simulation's status, finished
//! Jobs have their logs archived once and their eviction protection lifted.
//!
//! ## Key Components
//!
//! - `Reconciler`: one pass over a simulation
//! - `JobLifecycle`: create/find/delete the Jobs of a simulation
//! - `LogArchiver`: exactly-once upload of finished Job logs
//! - `status`: per-Job status derivation and aggregation
//! - `ClusterApi` / `LogStore`: seams to Kubernetes and object storage,
//!   with `KubeCluster`, `S3LogStore` and in-memory fakes

pub mod archive;
pub mod cluster;
pub mod error;
pub mod factory;
pub mod fakes;
pub mod kube_cluster;
pub mod lifecycle;
pub mod obs;
pub mod options;
pub mod reconcile;
pub mod s3;
pub mod status;
pub mod telemetry;

pub use archive::{ArchiveOutcome, LogArchiver};
pub use cluster::{ClusterApi, LogStore, LogStream};
pub use error::{ClusterError, ControllerError, Result, StoreError};
pub use factory::build_job;
pub use kube_cluster::KubeCluster;
pub use lifecycle::JobLifecycle;
pub use options::{ControllerOptions, LogBackupOptions};
pub use reconcile::{MetadataFetcher, PassOutcome, Reconciler};
pub use s3::S3LogStore;
