//! Schema of the `Simulation` custom resource.
//!
//! Field names are part of the persisted contract with resources already
//! deployed in clusters; renaming any of them is a breaking change.

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{
    ArrayValidation, InstanceType, ObjectValidation, Schema, SchemaObject, StringValidation,
};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Desired state of a simulation campaign.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "tools.cosmos.network",
    version = "v1",
    kind = "Simulation",
    plural = "simulations",
    status = "SimulationStatus",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Running","type":"integer","jsonPath":".status.running"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"integer","jsonPath":".status.succeeded"}"#,
    printcolumn = r#"{"name":"Failed","type":"integer","jsonPath":".status.failed"}"#,
    printcolumn = r#"{"name":"Pending","type":"integer","jsonPath":".status.pending"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSpec {
    /// Package to run simulations for.
    #[serde(default)]
    pub target: TargetSpec,
    /// Simulation parameters.
    #[serde(default)]
    pub config: ConfigSpec,
}

/// Source tree holding the simulation.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Git repository containing the package.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo: String,
    /// Branch or tag to check out.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Go package path inside the repository.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub package: String,
}

/// Execution parameters shared by every seed of a simulation.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Name of the test (or benchmark) to run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test: String,
    /// Number of blocks to simulate.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub blocks: u32,
    /// Operations per block.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub block_size: u32,
    /// Block period.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub period: u32,
    /// Go duration after which a simulation is failed, e.g. `24h`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    /// Run the target as a benchmark instead of a test.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub benchmark: bool,
    /// Seeds to run, one Job per seed. Integer seeds are read as strings.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "seeds_from_numbers_or_strings"
    )]
    #[schemars(schema_with = "seeds_schema")]
    pub seeds: Vec<String>,
    /// Compute resources for the simulation container of every Job.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Genesis file handed to the simulation. An empty object reads as unset.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_genesis_as_none"
    )]
    #[schemars(schema_with = "genesis_schema")]
    pub genesis: Option<GenesisSource>,
}

/// Where the genesis document comes from. Exactly one origin is set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum GenesisSource {
    /// A key of a config map in the simulation's namespace.
    FromConfigMap(ConfigMapGenesis),
    /// A URL downloaded by the Job before the simulation starts.
    FromUrl(String),
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapGenesis {
    /// Config map name.
    pub name: String,
    /// Key holding the genesis file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// Status of one Job, or of the whole simulation.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
pub enum SimStatus {
    #[default]
    Pending,
    Running,
    #[serde(rename = "Succeed", alias = "Succeeded")]
    Succeeded,
    Failed,
}

impl SimStatus {
    /// Succeeded and Failed never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SimStatus::Succeeded | SimStatus::Failed)
    }
}

impl std::fmt::Display for SimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SimStatus::Pending => "Pending",
            SimStatus::Running => "Running",
            SimStatus::Succeeded => "Succeed",
            SimStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Observed state of a simulation.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    /// Aggregate status over every tracked Job.
    #[serde(default)]
    pub status: SimStatus,
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub pending: u32,
    /// Per Job status, in creation order.
    #[serde(default)]
    pub job_status: Vec<JobStatus>,
    /// Metadata of a URL genesis, resolved once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis: Option<GenesisInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Name of the Job running the seed.
    pub name: String,
    #[serde(deserialize_with = "seed_from_number_or_string")]
    pub seed: String,
    pub status: SimStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenesisInfo {
    pub chain_id: String,
    /// Hex SHA-256 of the complete genesis document.
    pub sha256: String,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// A seed as stored by older operators (integer) or by this one (string).
#[derive(Deserialize)]
#[serde(untagged)]
enum SeedRepr {
    Text(String),
    Number(serde_json::Number),
}

impl From<SeedRepr> for String {
    fn from(seed: SeedRepr) -> Self {
        match seed {
            SeedRepr::Text(s) => s,
            SeedRepr::Number(n) => n.to_string(),
        }
    }
}

fn seed_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    SeedRepr::deserialize(deserializer).map(String::from)
}

fn seeds_from_numbers_or_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let seeds = Option::<Vec<SeedRepr>>::deserialize(deserializer)?;
    Ok(seeds.unwrap_or_default().into_iter().map(String::from).collect())
}

fn empty_genesis_as_none<'de, D>(deserializer: D) -> Result<Option<GenesisSource>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => GenesisSource::deserialize(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn string_schema(min_length: Option<u32>) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        string: min_length.map(|min| {
            Box::new(StringValidation {
                min_length: Some(min),
                ..Default::default()
            })
        }),
        ..Default::default()
    }
    .into()
}

fn object_schema(required: &[&str], properties: Vec<(&str, Schema)>) -> SchemaObject {
    SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        object: Some(Box::new(ObjectValidation {
            required: required.iter().map(|r| r.to_string()).collect(),
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema))
                .collect(),
            ..Default::default()
        })),
        ..Default::default()
    }
}

// Structural schema for the tagged genesis enum: both origins as optional
// properties, exactly one present.
fn genesis_schema(_: &mut SchemaGenerator) -> Schema {
    let config_map = object_schema(
        &["name"],
        vec![("name", string_schema(Some(1))), ("key", string_schema(None))],
    );
    let mut schema = object_schema(
        &[],
        vec![
            ("fromConfigMap", config_map.into()),
            ("fromUrl", string_schema(Some(1))),
        ],
    );
    if let Some(object) = schema.object.as_mut() {
        object.min_properties = Some(1);
        object.max_properties = Some(1);
    }
    schema
        .extensions
        .insert("nullable".to_string(), Value::Bool(true));
    schema.into()
}

// Seeds accept integers as well as strings.
fn seeds_schema(_: &mut SchemaGenerator) -> Schema {
    let mut item = SchemaObject::default();
    item.extensions
        .insert("x-kubernetes-int-or-string".to_string(), Value::Bool(true));
    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn genesis_source_uses_tagged_wire_format() {
        let config: ConfigSpec = serde_json::from_value(serde_json::json!({
            "genesis": { "fromConfigMap": { "name": "gen" } }
        }))
        .unwrap();
        assert_eq!(
            config.genesis,
            Some(GenesisSource::FromConfigMap(ConfigMapGenesis {
                name: "gen".to_string(),
                key: String::new(),
            }))
        );

        let url = GenesisSource::FromUrl("https://example.com/genesis.json".to_string());
        assert_eq!(
            serde_json::to_value(&url).unwrap(),
            serde_json::json!({ "fromUrl": "https://example.com/genesis.json" })
        );
    }

    #[test]
    fn status_serializes_with_stable_field_names() {
        let status = SimulationStatus {
            status: SimStatus::Succeeded,
            succeeded: 1,
            job_status: vec![JobStatus {
                name: "sim-1".to_string(),
                seed: "1".to_string(),
                status: SimStatus::Succeeded,
            }],
            genesis: Some(GenesisInfo {
                chain_id: "test-1".to_string(),
                sha256: "ab".to_string(),
            }),
            ..Default::default()
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "Succeed");
        assert_eq!(value["succeeded"], 1);
        assert_eq!(value["running"], 0);
        assert_eq!(value["jobStatus"][0]["seed"], "1");
        assert_eq!(value["genesis"]["chainId"], "test-1");
    }

    #[test]
    fn succeeded_spelling_is_accepted_when_reading() {
        let legacy: SimStatus = serde_json::from_str("\"Succeed\"").unwrap();
        let long: SimStatus = serde_json::from_str("\"Succeeded\"").unwrap();
        assert_eq!(legacy, SimStatus::Succeeded);
        assert_eq!(long, SimStatus::Succeeded);
    }

    #[test]
    fn config_spec_reads_camel_case_fields() {
        let config: ConfigSpec = serde_json::from_value(serde_json::json!({
            "blockSize": 50,
            "seeds": ["1", "abc"],
            "benchmark": true
        }))
        .unwrap();
        assert_eq!(config.block_size, 50);
        assert_eq!(config.seeds, vec!["1", "abc"]);
        assert!(config.benchmark);
    }

    #[test]
    fn empty_genesis_object_reads_as_unset() {
        let config: ConfigSpec = serde_json::from_value(serde_json::json!({
            "test": "TestFullAppSimulation",
            "genesis": {}
        }))
        .unwrap();
        assert_eq!(config.genesis, None);
        assert_eq!(config.test, "TestFullAppSimulation");

        let config: ConfigSpec = serde_json::from_value(serde_json::json!({ "genesis": null })).unwrap();
        assert_eq!(config.genesis, None);

        let err = serde_json::from_value::<ConfigSpec>(serde_json::json!({
            "genesis": { "fromUrl": "a", "fromConfigMap": { "name": "b" } }
        }));
        assert!(err.is_err());
    }

    #[test]
    fn crd_requires_exactly_one_genesis_origin() {
        let crd = serde_json::to_value(Simulation::crd()).unwrap();
        let genesis = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
            ["properties"]["config"]["properties"]["genesis"];
        assert_eq!(genesis["minProperties"], 1);
        assert_eq!(genesis["maxProperties"], 1);
        assert_eq!(genesis["nullable"], true);
        assert_eq!(genesis["properties"]["fromConfigMap"]["required"][0], "name");
        assert_eq!(genesis["properties"]["fromUrl"]["minLength"], 1);
    }

    #[test]
    fn integer_seeds_are_read_as_strings() {
        let config: ConfigSpec = serde_json::from_value(serde_json::json!({
            "seeds": [1, "2", 47]
        }))
        .unwrap();
        assert_eq!(config.seeds, vec!["1", "2", "47"]);

        let status: SimulationStatus = serde_json::from_value(serde_json::json!({
            "status": "Running",
            "jobStatus": [{ "name": "sim-4", "seed": 4, "status": "Succeed" }]
        }))
        .unwrap();
        assert_eq!(status.job_status[0].seed, "4");
        assert_eq!(serde_json::to_value(&status).unwrap()["jobStatus"][0]["seed"], "4");

        let crd = serde_json::to_value(Simulation::crd()).unwrap();
        let seeds = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
            ["properties"]["config"]["properties"]["seeds"];
        assert_eq!(seeds["items"]["x-kubernetes-int-or-string"], true);
    }

    #[test]
    fn crd_carries_printer_columns_and_status_subresource() {
        let crd = Simulation::crd();
        assert_eq!(crd.spec.group, "tools.cosmos.network");
        assert_eq!(crd.spec.names.kind, "Simulation");

        let version = &crd.spec.versions[0];
        let columns = version.additional_printer_columns.as_ref().unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Status", "Running", "Succeeded", "Failed", "Pending"]);
        assert!(version.subresources.as_ref().unwrap().status.is_some());

        let yaml = serde_yaml::to_string(&crd).unwrap();
        assert!(yaml.contains("fromConfigMap"));
    }
}
