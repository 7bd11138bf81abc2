use crate::container::{prepare, ContainerSpec};
use crate::error::RunnerError;
use crate::staging::FileStaging;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

const TASK_SCHEMA: &str = r#"{
    "$schema": "http://json-schema.org/draft-07/schema#",
    "title": "Terraform CLI task",
    "type": "object",
    "properties": {
        "id": { "type": "string" },
        "type": { "type": "string" },
        "beforeCommands": { "type": "array", "items": { "type": "string" } },
        "commands": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
        "env": { "type": "object", "additionalProperties": { "type": "string" } },
        "docker": {
            "type": "object",
            "properties": {
                "image": { "type": "string" },
                "entryPoint": { "type": "array", "items": { "type": "string" } },
                "entrypoint": { "type": "array", "items": { "type": "string" } },
                "user": { "type": "string" },
                "pullPolicy": { "enum": ["ALWAYS", "IF_NOT_PRESENT", "NEVER"] },
                "networkMode": { "type": "string" },
                "extraHosts": { "type": "array", "items": { "type": "string" } },
                "cpus": { "type": "number", "exclusiveMinimum": 0 },
                "memory": { "type": "string" }
            },
            "additionalProperties": false
        },
        "containerImage": { "type": "string", "minLength": 1 },
        "inputFiles": {
            "type": ["object", "string"],
            "additionalProperties": { "type": "string" }
        },
        "outputFiles": { "type": "array", "items": { "type": "string" } },
        "namespaceFiles": {},
        "warningOnStdErr": { "type": "boolean" }
    },
    "required": ["commands"],
    "additionalProperties": false
}"#;

static TASK_VALIDATOR: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: Value = serde_json::from_str(TASK_SCHEMA).expect("task schema must be valid JSON");
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("task schema must compile")
});

/// A Terraform CLI task as written in a workflow file. Fields arrive already
/// rendered by the host engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerraformCliTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_commands: Option<Vec<String>>,
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<ContainerSpec>,
    /// Overrides `docker.image` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    #[serde(flatten)]
    pub files: FileStaging,
    #[serde(default = "default_warning_on_std_err")]
    pub warning_on_std_err: bool,
}

fn default_warning_on_std_err() -> bool {
    true
}

impl TerraformCliTask {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            id: None,
            before_commands: None,
            commands,
            env: None,
            docker: None,
            container_image: None,
            files: FileStaging::default(),
            warning_on_std_err: true,
        }
    }

    /// Effective container settings with defaults applied.
    pub fn container_spec(&self) -> ContainerSpec {
        let mut spec = self.docker.clone().unwrap_or_default();
        if let Some(image) = &self.container_image {
            spec.image = Some(image.clone());
        }
        prepare(spec)
    }

    #[instrument(skip(yaml))]
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RunnerError> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|err| RunnerError::invalid(format!("task is not valid YAML: {err}")))?;
        let value = serde_json::to_value(document)
            .map_err(|err| RunnerError::invalid(format!("task is not a JSON-compatible document: {err}")))?;
        Self::from_value(value)
    }

    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self, RunnerError> {
        debug!("Loading task definition");
        let raw = fs::read_to_string(path).map_err(|err| {
            RunnerError::io(format!("Failed to read task file {}: {}", path.display(), err))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_value(value: Value) -> Result<Self, RunnerError> {
        validate_task(&value)?;
        serde_json::from_value(value)
            .map_err(|err| RunnerError::invalid(format!("task definition is malformed: {err}")))
    }
}

fn validate_task(instance: &Value) -> Result<(), RunnerError> {
    if let Err(errors) = TASK_VALIDATOR.validate(instance) {
        let messages: Vec<String> = errors
            .map(|error| format!("{} at {}", error, error.instance_path))
            .collect();
        return Err(RunnerError::invalid(format!(
            "task definition failed validation: {}",
            messages.join(", ")
        )));
    }

    Ok(())
}
