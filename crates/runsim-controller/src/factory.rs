//! Job template for one (simulation, seed) pair.
//!
//! Everything here is pure: the same simulation and seed always produce the
//! same Job, and nothing is read from or written to the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, KeyToPath, PodSpec, PodTemplateSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use runsim_api::constants::{
    EVICTION_PROTECTED, EVICTION_PROTECTION_ANNOTATION, NAME_LABEL_KEY, PARAMS_CONTAINER,
    SEED_ANNOTATION, SIMULATION_CONTAINER, STATE_CONTAINER,
};
use runsim_api::{GenesisSource, Simulation};

const WORKSPACE_VOLUME: &str = "data";
const GO_CACHE_VOLUME: &str = "go";
const GENESIS_VOLUME: &str = "genesis";

const WORKSPACE_PATH: &str = "/workspace";
const GO_CACHE_PATH: &str = "/go";
const CONFIG_MAP_GENESIS_PATH: &str = "/config";
const DOWNLOADED_GENESIS_PATH: &str = "/genesis";
const DOWNLOADED_GENESIS_FILE: &str = "genesis.json";

/// Named pipe the simulation writes its exported params to.
pub const PARAMS_FIFO: &str = "/workspace/params.fifo";
/// Named pipe the simulation writes its exported state to.
pub const STATE_FIFO: &str = "/workspace/state.fifo";

const GIT_IMAGE: &str = "alpine/git";
const GO_IMAGE: &str = "golang";
const UTIL_IMAGE: &str = "busybox";
const CURL_IMAGE: &str = "curlimages/curl";

// Opening a FIFO for writing blocks until a reader shows up, hence the
// timeout when the sidecar already exited.
const FIFO_CLEANUP_TRAP: &str = "trap 'for f in /workspace/params.fifo /workspace/state.fifo; do timeout 5 sh -c \": > $f\" || true; done' EXIT";

/// Deterministic Job name for a seed.
pub fn job_name(sim: &Simulation, seed: &str) -> String {
    format!("{}-{}", sim.name_any(), seed)
}

/// Labels stamped on every Job of a simulation.
pub fn simulation_labels(sim: &Simulation) -> BTreeMap<String, String> {
    BTreeMap::from([(NAME_LABEL_KEY.to_string(), sim.name_any())])
}

/// Build the Job running `seed` for `sim`.
///
/// The Job carries no owner reference; that is attached on creation.
pub fn build_job(sim: &Simulation, seed: &str) -> Job {
    let genesis = sim.spec.config.genesis.as_ref();

    let mut volumes = vec![empty_dir(WORKSPACE_VOLUME), empty_dir(GO_CACHE_VOLUME)];
    let mut init_containers = vec![clone_container(sim), go_mod_container(), fifo_container()];
    let mut simulation_mounts = vec![mount(WORKSPACE_VOLUME, WORKSPACE_PATH), mount(GO_CACHE_VOLUME, GO_CACHE_PATH)];

    match genesis {
        Some(GenesisSource::FromConfigMap(cm)) => {
            volumes.push(Volume {
                name: GENESIS_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: cm.name.clone().into(),
                    items: Some(vec![KeyToPath {
                        key: cm.key.clone(),
                        path: cm.key.clone(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            });
            simulation_mounts.push(read_only_mount(GENESIS_VOLUME, CONFIG_MAP_GENESIS_PATH));
        }
        Some(GenesisSource::FromUrl(url)) => {
            volumes.push(empty_dir(GENESIS_VOLUME));
            init_containers.push(download_genesis_container(url));
            simulation_mounts.push(read_only_mount(GENESIS_VOLUME, DOWNLOADED_GENESIS_PATH));
        }
        None => {}
    }

    let simulation = Container {
        name: SIMULATION_CONTAINER.to_string(),
        image: Some(GO_IMAGE.to_string()),
        args: Some(vec![
            "bash".to_string(),
            "-c".to_string(),
            format!(
                "{FIFO_CLEANUP_TRAP}\ncd {WORKSPACE_PATH} && {}",
                simulation_command(sim, seed)
            ),
        ]),
        volume_mounts: Some(simulation_mounts),
        resources: Some(sim.spec.config.resources.clone()),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(sim, seed)),
            namespace: sim.namespace(),
            labels: Some(simulation_labels(sim)),
            annotations: Some(BTreeMap::from([(
                SEED_ANNOTATION.to_string(),
                seed.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(simulation_labels(sim)),
                    annotations: Some(BTreeMap::from([(
                        EVICTION_PROTECTION_ANNOTATION.to_string(),
                        EVICTION_PROTECTED.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    volumes: Some(volumes),
                    init_containers: Some(init_containers),
                    containers: vec![
                        simulation,
                        fifo_reader(PARAMS_CONTAINER, PARAMS_FIFO),
                        fifo_reader(STATE_CONTAINER, STATE_FIFO),
                    ],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// The `go test` invocation for one seed.
pub fn simulation_command(sim: &Simulation, seed: &str) -> String {
    let target = &sim.spec.target;
    let config = &sim.spec.config;
    let selector = if config.benchmark { "-bench" } else { "-run" };

    let mut cmd = format!(
        "go test {package} {selector} {test} -Enabled=true -NumBlocks={blocks} -Verbose=true \
         -Commit=true -BlockSize={block_size} -Seed={seed} -Period={period} \
         -ExportParamsPath={PARAMS_FIFO} -ExportStatePath={STATE_FIFO} -v -timeout {timeout}",
        package = target.package,
        test = config.test,
        blocks = config.blocks,
        block_size = config.block_size,
        period = config.period,
        timeout = config.timeout,
    );

    if let Some(path) = genesis_path(config.genesis.as_ref()) {
        cmd.push_str(&format!(" -Genesis={path}"));
    }
    cmd
}

/// Path of the genesis file inside the simulation container.
fn genesis_path(genesis: Option<&GenesisSource>) -> Option<String> {
    match genesis? {
        GenesisSource::FromConfigMap(cm) => Some(format!("{CONFIG_MAP_GENESIS_PATH}/{}", cm.key)),
        GenesisSource::FromUrl(_) => Some(format!("{DOWNLOADED_GENESIS_PATH}/{DOWNLOADED_GENESIS_FILE}")),
    }
}

fn clone_container(sim: &Simulation) -> Container {
    let target = &sim.spec.target;
    Container {
        name: "clone-repo".to_string(),
        image: Some(GIT_IMAGE.to_string()),
        args: Some(
            [
                "clone",
                "--single-branch",
                "--depth",
                "1",
                "--branch",
                &target.version,
                &target.repo,
                WORKSPACE_PATH,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ),
        volume_mounts: Some(vec![mount(WORKSPACE_VOLUME, WORKSPACE_PATH)]),
        ..Default::default()
    }
}

fn go_mod_container() -> Container {
    Container {
        name: "go-mod".to_string(),
        image: Some(GO_IMAGE.to_string()),
        args: Some(vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("cd {WORKSPACE_PATH} && go mod download"),
        ]),
        volume_mounts: Some(vec![mount(WORKSPACE_VOLUME, WORKSPACE_PATH), mount(GO_CACHE_VOLUME, GO_CACHE_PATH)]),
        ..Default::default()
    }
}

fn fifo_container() -> Container {
    Container {
        name: "mkfifo".to_string(),
        image: Some(UTIL_IMAGE.to_string()),
        command: Some(vec![
            "mkfifo".to_string(),
            PARAMS_FIFO.to_string(),
            STATE_FIFO.to_string(),
        ]),
        volume_mounts: Some(vec![mount(WORKSPACE_VOLUME, WORKSPACE_PATH)]),
        ..Default::default()
    }
}

// TLS verification is disabled for genesis downloads: genesis files are
// commonly served from hosts with self-signed certificates.
fn download_genesis_container(url: &str) -> Container {
    Container {
        name: "download-genesis".to_string(),
        image: Some(CURL_IMAGE.to_string()),
        args: Some(vec![
            "--insecure".to_string(),
            "--fail".to_string(),
            "--silent".to_string(),
            "--show-error".to_string(),
            "--location".to_string(),
            "--output".to_string(),
            format!("{DOWNLOADED_GENESIS_PATH}/{DOWNLOADED_GENESIS_FILE}"),
            url.to_string(),
        ]),
        volume_mounts: Some(vec![mount(GENESIS_VOLUME, DOWNLOADED_GENESIS_PATH)]),
        ..Default::default()
    }
}

fn fifo_reader(name: &str, fifo: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(UTIL_IMAGE.to_string()),
        command: Some(vec!["cat".to_string(), fifo.to_string()]),
        volume_mounts: Some(vec![mount(WORKSPACE_VOLUME, WORKSPACE_PATH)]),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn mount(volume: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn read_only_mount(volume: &str, path: &str) -> VolumeMount {
    VolumeMount {
        read_only: Some(true),
        ..mount(volume, path)
    }
}
