//! Structured observability hooks for simulation reconciliation.
//!
//! This module provides:
//! - A per-simulation tracing span attached to every reconciliation pass
//! - Emission functions for lifecycle events: job creation and deletion,
//!   log archival, eviction release, defaulting, genesis resolution and
//!   status persistence
//!
//! Events are emitted at `info!` level with an `event` field naming them.
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn, Span};

/// Span tagging every event of one pass with the simulation it belongs to.
///
/// Attach it with `Instrument::instrument` so it survives await points.
pub fn simulation_span(namespace: &str, name: &str) -> Span {
    tracing::info_span!("runsim.reconcile", namespace = %namespace, simulation = %name)
}

/// Emit event: a Job was created for a seed.
///
/// # Example
///
/// ```ignore
/// emit_job_created("sim", "42", "sim-42");
/// // logs: event=job.created simulation=sim seed=42 job=sim-42
/// ```
pub fn emit_job_created(simulation: &str, seed: &str, job: &str) {
    info!(event = "job.created", simulation = %simulation, seed = %seed, job = %job);
}

/// Emit event: a Job was deleted because its seed is no longer desired.
pub fn emit_job_deleted(simulation: &str, job: &str) {
    info!(event = "job.deleted", simulation = %simulation, job = %job);
}

pub fn emit_logs_archived(job: &str, objects: usize, bytes: u64) {
    info!(event = "logs.archived", job = %job, objects = objects, bytes = bytes);
}

pub fn emit_eviction_released(job: &str, pod: &str) {
    info!(event = "eviction.released", job = %job, pod = %pod);
}

/// Emit event: eviction protection could not be released (warning level).
pub fn emit_eviction_release_failed(pod: &str, error: &dyn std::fmt::Display) {
    warn!(event = "eviction.release_failed", pod = %pod, error = %error);
}

/// Emit event: defaults were filled in and persisted.
pub fn emit_defaults_applied(simulation: &str) {
    info!(event = "simulation.defaulted", simulation = %simulation);
}

pub fn emit_genesis_resolved(simulation: &str, chain_id: &str, sha256: &str) {
    info!(
        event = "genesis.resolved",
        simulation = %simulation,
        chain_id = %chain_id,
        sha256 = %sha256,
    );
}

/// Emit event: the aggregate status was persisted.
pub fn emit_status_updated(simulation: &str, status: &dyn std::fmt::Display, jobs: usize) {
    info!(event = "status.updated", simulation = %simulation, status = %status, jobs = jobs);
}
