//! runsim-api: the `Simulation` custom resource
//!
//! This crate owns the persisted wire contract of the operator: the
//! `tools.cosmos.network/v1` `Simulation` resource, the annotations and labels
//! stamped on the Jobs it owns, and the default-filling rules applied on first
//! observation.
//!
//! ## Key Components
//!
//! - `Simulation` / `SimulationSpec` / `SimulationStatus`: the resource schema
//! - `GenesisSource`: tagged genesis origin (config map key or URL)
//! - `fill_defaults`: idempotent defaulting with change detection

pub mod constants;
mod defaults;
mod types;

pub use defaults::{default_resources, default_seeds, fill_defaults};
pub use types::{
    ConfigMapGenesis, ConfigSpec, GenesisInfo, GenesisSource, JobStatus, SimStatus, Simulation,
    SimulationSpec, SimulationStatus, TargetSpec,
};
