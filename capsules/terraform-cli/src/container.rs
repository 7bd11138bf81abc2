use serde::{Deserialize, Serialize};

/// Image used when the task does not name one.
pub const DEFAULT_IMAGE: &str = "hashicorp/terraform";

/// Working directory of the script inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullPolicy {
    #[default]
    Always,
    IfNotPresent,
    Never,
}

impl PullPolicy {
    /// Value for the runtime's `--pull` flag.
    pub fn as_flag(&self) -> &'static str {
        match self {
            PullPolicy::Always => "always",
            PullPolicy::IfNotPresent => "missing",
            PullPolicy::Never => "never",
        }
    }
}

/// Container settings for one invocation.
///
/// Only `image` and `entry_point` are interpreted by the runner; the remaining
/// fields are handed to the execution backend untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        rename = "entryPoint",
        alias = "entrypoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub entry_point: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ContainerSpec {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_entry_point(mut self, entry_point: Vec<String>) -> Self {
        self.entry_point = Some(entry_point);
        self
    }

    /// Image to run, falling back to [`DEFAULT_IMAGE`].
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    pub fn entry_point(&self) -> &[String] {
        self.entry_point.as_deref().unwrap_or_default()
    }
}

/// Fill in the defaults the runner relies on.
///
/// An unset image becomes [`DEFAULT_IMAGE`]. An unset or empty entrypoint
/// becomes `[""]`, which clears the image's baked-in entrypoint so the script
/// is started through the interpreter alone.
pub fn prepare(mut spec: ContainerSpec) -> ContainerSpec {
    if spec.image.is_none() {
        spec.image = Some(DEFAULT_IMAGE.to_string());
    }
    if spec.entry_point.as_ref().map_or(true, |ep| ep.is_empty()) {
        spec.entry_point = Some(vec![String::new()]);
    }
    spec
}
