//! Execution backends: the systems that actually run the assembled script.
//!
//! The runner only talks to [`ExecutionBackend`]. Each backend provisions its
//! own working directory per call, stages input files before the script starts
//! and harvests output globs after it exits.

mod docker;
mod local;
mod process;

pub use docker::DockerCliBackend;
pub use local::LocalShellBackend;

use crate::container::ContainerSpec;
use crate::error::RunnerError;
use crate::staging::InputSource;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Everything a backend needs for one invocation.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Already passed through [`crate::prepare`].
    pub container: ContainerSpec,
    pub interpreter: Vec<String>,
    pub script: String,
    pub env: BTreeMap<String, String>,
    pub input_files: BTreeMap<PathBuf, InputSource>,
    pub output_patterns: Vec<String>,
    pub namespace_files: Option<Value>,
    pub artifacts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct BackendOutput {
    pub exit_code: i32,
    pub output_files: BTreeMap<String, PathBuf>,
}

pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Run the request to completion, handing every output line to `sink` as
    /// it arrives. A non-zero exit code is a normal return value here.
    fn execute(
        &self,
        request: &BackendRequest,
        sink: &mut dyn FnMut(Stream, &str),
    ) -> Result<BackendOutput, RunnerError>;
}

/// Pick the backend from `TFCTL_CONTAINER_RUNTIME`.
///
/// `local` runs on the host shell, any other value names the container runtime
/// binary, and an unset variable means `docker`. `timeout` is the caller's
/// deadline; the runner itself never imposes one.
pub fn detect_backend(timeout: Option<Duration>) -> Box<dyn ExecutionBackend> {
    match detect_runtime_kind() {
        RuntimeKind::Local => {
            let backend = LocalShellBackend::new();
            match timeout {
                Some(limit) => Box::new(backend.with_timeout(limit)),
                None => Box::new(backend),
            }
        }
        RuntimeKind::Binary(runtime_bin) => {
            let backend = DockerCliBackend::new(runtime_bin);
            match timeout {
                Some(limit) => Box::new(backend.with_timeout(limit)),
                None => Box::new(backend),
            }
        }
    }
}

fn detect_runtime_kind() -> RuntimeKind {
    match env::var("TFCTL_CONTAINER_RUNTIME") {
        Ok(val) if val.trim().eq_ignore_ascii_case("local") => RuntimeKind::Local,
        Ok(val) if !val.trim().is_empty() => RuntimeKind::Binary(val.trim().to_string()),
        _ => RuntimeKind::Binary("docker".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RuntimeKind {
    Binary(String),
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn runtime_defaults_to_docker() {
        env::remove_var("TFCTL_CONTAINER_RUNTIME");
        assert_eq!(
            detect_runtime_kind(),
            RuntimeKind::Binary("docker".to_string())
        );
        assert_eq!(detect_backend(None).name(), "docker");
    }

    #[test]
    #[serial]
    fn runtime_env_selects_backend() {
        env::set_var("TFCTL_CONTAINER_RUNTIME", "LOCAL");
        assert_eq!(detect_runtime_kind(), RuntimeKind::Local);
        assert_eq!(detect_backend(None).name(), "local");

        env::set_var("TFCTL_CONTAINER_RUNTIME", " podman ");
        assert_eq!(
            detect_runtime_kind(),
            RuntimeKind::Binary("podman".to_string())
        );
        assert_eq!(
            detect_backend(Some(Duration::from_secs(5))).name(),
            "podman"
        );

        env::remove_var("TFCTL_CONTAINER_RUNTIME");
    }
}
