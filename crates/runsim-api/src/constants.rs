//! Well-known names shared between the operator and the simulation Jobs.

/// Repository cloned when `target.repo` is unset.
pub const DEFAULT_REPO: &str = "https://github.com/cosmos/cosmos-sdk";
/// Branch or tag checked out when `target.version` is unset.
pub const DEFAULT_VERSION: &str = "master";
/// Go package holding the simulation tests.
pub const DEFAULT_PACKAGE: &str = "./simapp";
pub const DEFAULT_TEST: &str = "TestFullAppSimulation";
pub const DEFAULT_BLOCKS: u32 = 100;
pub const DEFAULT_BLOCK_SIZE: u32 = 200;
pub const DEFAULT_PERIOD: u32 = 1;
pub const DEFAULT_TIMEOUT: &str = "24h";
pub const DEFAULT_GENESIS_CONFIGMAP_KEY: &str = "genesis.json";

/// Seeds run when the simulation does not list any.
pub const DEFAULT_SEEDS: &[&str] = &[
    "1",
    "2",
    "4",
    "7",
    "32",
    "123",
    "124",
    "582",
    "1893",
    "2989",
    "3012",
    "4728",
    "37827",
    "981928",
    "87821",
    "891823782",
    "989182",
    "89182391",
    "11",
    "22",
    "44",
    "77",
    "99",
    "2020",
    "3232",
    "123123",
    "124124",
    "582582",
    "18931893",
    "29892989",
    "30123012",
    "47284728",
    "7601778",
    "8090485",
    "977367484",
    "491163361",
    "424254581",
    "673398983",
    "9071117693009442039",
    "5577006791947779410",
    "4037200794235010051",
    "2775422040480279449",
    "894385949183117216",
];

pub const DEFAULT_CPU_LIMIT: &str = "2000m";
pub const DEFAULT_MEMORY_LIMIT: &str = "1Gi";
pub const DEFAULT_CPU_REQUEST: &str = "750m";
pub const DEFAULT_MEMORY_REQUEST: &str = "512Mi";

/// Job annotation carrying the seed the Job was created for.
pub const SEED_ANNOTATION: &str = "tools.cosmos.network/simulation-seed";
/// Job annotation present once the container logs have been archived.
pub const LOG_BACKUP_ANNOTATION: &str = "tools.cosmos.network/logs-backed-up";
/// Pod annotation asking the node autoscaler not to reclaim the node.
pub const EVICTION_PROTECTION_ANNOTATION: &str = "karpenter.sh/do-not-evict";
pub const EVICTION_PROTECTED: &str = "true";
pub const EVICTION_RELEASED: &str = "false";
/// Job label holding the owning simulation's name.
pub const NAME_LABEL_KEY: &str = "simulation";

pub const SIMULATION_CONTAINER: &str = "simulation";
pub const STATE_CONTAINER: &str = "state";
pub const PARAMS_CONTAINER: &str = "params";

/// Containers whose output is archived, in upload order.
pub const ARCHIVED_CONTAINERS: [&str; 3] = [SIMULATION_CONTAINER, STATE_CONTAINER, PARAMS_CONTAINER];
