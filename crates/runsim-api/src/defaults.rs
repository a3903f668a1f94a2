//! Default-filling for freshly observed simulations.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::constants::*;
use crate::types::{GenesisSource, Simulation};

/// Fill every unset optional field of the simulation spec with its default.
///
/// Returns `true` when `sim.spec` differs from what it was before the call, in
/// which case the caller must persist it before acting on it.
pub fn fill_defaults(sim: &mut Simulation) -> bool {
    let before = sim.spec.clone();

    let target = &mut sim.spec.target;
    set_if_empty(&mut target.repo, DEFAULT_REPO);
    set_if_empty(&mut target.version, DEFAULT_VERSION);
    set_if_empty(&mut target.package, DEFAULT_PACKAGE);

    let config = &mut sim.spec.config;
    set_if_empty(&mut config.test, DEFAULT_TEST);
    set_if_zero(&mut config.blocks, DEFAULT_BLOCKS);
    set_if_zero(&mut config.block_size, DEFAULT_BLOCK_SIZE);
    set_if_zero(&mut config.period, DEFAULT_PERIOD);
    set_if_empty(&mut config.timeout, DEFAULT_TIMEOUT);

    if config.seeds.is_empty() {
        config.seeds = default_seeds();
    }

    if resources_unset(&config.resources) {
        config.resources = default_resources();
    }

    if let Some(GenesisSource::FromConfigMap(cm)) = config.genesis.as_mut() {
        set_if_empty(&mut cm.key, DEFAULT_GENESIS_CONFIGMAP_KEY);
    }

    before != sim.spec
}

pub fn default_seeds() -> Vec<String> {
    DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect()
}

pub fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(quantities(DEFAULT_CPU_LIMIT, DEFAULT_MEMORY_LIMIT)),
        requests: Some(quantities(DEFAULT_CPU_REQUEST, DEFAULT_MEMORY_REQUEST)),
        ..Default::default()
    }
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn resources_unset(resources: &ResourceRequirements) -> bool {
    let empty = |m: &Option<BTreeMap<String, Quantity>>| m.as_ref().map_or(true, |m| m.is_empty());
    empty(&resources.limits) && empty(&resources.requests)
}

fn set_if_empty(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}

fn set_if_zero(field: &mut u32, default: u32) {
    if *field == 0 {
        *field = default;
    }
}
