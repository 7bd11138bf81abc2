use super::process::{self, Completion};
use super::{BackendOutput, BackendRequest, ExecutionBackend, Stream};
use crate::container::CONTAINER_WORKDIR;
use crate::error::{truncate, RunnerError};
use crate::staging::WorkingDirectory;
use std::env;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Exit code the docker CLI uses when it could not create or start the
/// container. A script may also `exit 125`, so the code alone is ambiguous;
/// see [`is_runtime_failure`].
const RUNTIME_FAILURE_EXIT: i32 = 125;

/// Stderr lines the runtime itself prints when `run` fails before the script
/// starts.
const RUNTIME_ERROR_PREFIXES: [&str; 4] = [
    "docker: ",
    "Error response from daemon",
    "Unable to find image",
    "Error: initializing source",
];

/// Runs the script through a docker-compatible CLI (`docker`, `podman`, ...).
#[derive(Debug, Clone)]
pub struct DockerCliBackend {
    runtime_bin: String,
    timeout: Option<Duration>,
}

impl DockerCliBackend {
    pub fn new(runtime_bin: impl Into<String>) -> Self {
        Self {
            runtime_bin: runtime_bin.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn kill_container(&self, name: &str) {
        let result = Command::new(&self.runtime_bin)
            .arg("kill")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(err) = result {
            warn!(container = %name, error = %err, "failed to kill timed out container");
        }
    }
}

impl Default for DockerCliBackend {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ExecutionBackend for DockerCliBackend {
    fn name(&self) -> &str {
        &self.runtime_bin
    }

    fn execute(
        &self,
        request: &BackendRequest,
        sink: &mut dyn FnMut(Stream, &str),
    ) -> Result<BackendOutput, RunnerError> {
        let workdir = WorkingDirectory::create()?;
        workdir.materialize(&request.input_files)?;

        if request.namespace_files.is_some() {
            debug!("namespace files are staged by the host engine");
        }

        let container_name = format!("tfctl-{}", Uuid::new_v4());
        let mut command = Command::new(&self.runtime_bin);
        configure_command(&mut command, request, workdir.path(), &container_name)?;
        debug!(command = %command_line_string(&command), "starting container");
        info!(
            runtime = %self.runtime_bin,
            image = %request.container.image(),
            container = %container_name,
            "running script in container"
        );

        let mut stderr_tail = String::new();
        let mut tee = |stream: Stream, line: &str| {
            if stream == Stream::Stderr {
                stderr_tail.push_str(line);
                stderr_tail.push('\n');
                if stderr_tail.len() > 8192 {
                    let cut = stderr_tail.len() - 4096;
                    let cut = (cut..stderr_tail.len())
                        .find(|i| stderr_tail.is_char_boundary(*i))
                        .unwrap_or(stderr_tail.len());
                    stderr_tail.drain(..cut);
                }
            }
            sink(stream, line);
        };

        let completion = process::stream_process(command, self.timeout, &mut tee).map_err(|err| {
            RunnerError::BackendUnavailable {
                message: format!(
                    "Failed to spawn container runtime '{}': {}",
                    self.runtime_bin, err
                ),
            }
        })?;

        match completion {
            Completion::TimedOut(after) => {
                self.kill_container(&container_name);
                Err(RunnerError::TimedOut { after })
            }
            Completion::Exited(exit_code) if is_runtime_failure(exit_code, &stderr_tail) => {
                Err(RunnerError::BackendUnavailable {
                    message: format!(
                        "container runtime '{}' could not start {}: {}",
                        self.runtime_bin,
                        request.container.image(),
                        truncate(stderr_tail.trim(), 2048)
                    ),
                })
            }
            Completion::Exited(exit_code) => {
                let output_files = workdir
                    .harvest(&request.output_patterns, request.artifacts_dir.as_deref())?;
                Ok(BackendOutput {
                    exit_code,
                    output_files,
                })
            }
        }
    }
}

fn configure_command(
    command: &mut Command,
    request: &BackendRequest,
    workdir: &Path,
    container_name: &str,
) -> Result<(), RunnerError> {
    let spec = &request.container;

    command.arg("run");
    command.arg("--rm");
    command.arg("--name").arg(container_name);
    command.arg("--pull").arg(spec.pull_policy.as_flag());

    let workdir = workdir.canonicalize().map_err(|err| {
        RunnerError::io(format!(
            "Failed to canonicalize working directory {}: {}",
            workdir.display(),
            err
        ))
    })?;
    command.arg("--mount").arg(format!(
        "type=bind,source={},target={}",
        workdir.display(),
        CONTAINER_WORKDIR
    ));
    command.arg("--workdir").arg(CONTAINER_WORKDIR);
    command.arg("--user").arg(container_user(spec.user.as_deref()));

    if let Some(network) = spec.network_mode.as_deref().filter(|n| !n.trim().is_empty()) {
        command.arg("--network").arg(network);
    }
    for host in &spec.extra_hosts {
        command.arg("--add-host").arg(host);
    }

    // Resource limits: task settings win over TFCTL_CONTAINER_* defaults.
    let cpus = spec
        .cpus
        .map(|c| c.to_string())
        .or_else(|| non_empty_env("TFCTL_CONTAINER_CPUS"));
    if let Some(cpus) = cpus {
        command.arg("--cpus").arg(cpus);
    }
    let memory = spec
        .memory
        .clone()
        .or_else(|| non_empty_env("TFCTL_CONTAINER_MEMORY"));
    if let Some(memory) = memory {
        command.arg("--memory").arg(memory);
    }

    for (key, value) in &request.env {
        command.arg("--env").arg(format!("{}={}", key, value));
    }

    let entry_point = spec.entry_point();
    let (first, rest) = match entry_point.split_first() {
        Some((first, rest)) => (first.as_str(), rest),
        None => ("", &[][..]),
    };
    command.arg("--entrypoint").arg(first);
    command.arg(spec.image());
    command.args(rest);

    command.args(&request.interpreter);
    command.arg(&request.script);

    Ok(())
}

/// Exit 125 counts as a runtime failure only when the runtime reported an
/// error of its own; otherwise it is the script's exit code.
fn is_runtime_failure(exit_code: i32, stderr: &str) -> bool {
    exit_code == RUNTIME_FAILURE_EXIT
        && stderr.lines().any(|line| {
            let line = line.trim_start();
            RUNTIME_ERROR_PREFIXES
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn container_user(explicit: Option<&str>) -> String {
    if let Some(user) = explicit.filter(|u| !u.trim().is_empty()) {
        return user.to_string();
    }
    if let Some(user) = non_empty_env("TFCTL_CONTAINER_USER") {
        return user;
    }
    #[cfg(unix)]
    {
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        format!("{}:{}", uid, gid)
    }
    #[cfg(not(unix))]
    {
        "65534:65534".to_string()
    }
}

fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let escaped = arg.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

/// Printable command line with `--env` values masked.
fn command_line_string(cmd: &Command) -> String {
    let mut s = String::new();
    s.push_str(&cmd.get_program().to_string_lossy());
    let mut mask_next = false;
    for a in cmd.get_args() {
        let a = a.to_string_lossy();
        s.push(' ');
        if mask_next {
            let key = a.split('=').next().unwrap_or_default();
            s.push_str(key);
            s.push_str("=***");
            mask_next = false;
            continue;
        }
        mask_next = a == "--env";
        if a.is_empty() || a.contains(' ') || a.contains('"') || a.contains('\'') {
            s.push_str(&shell_escape(&a));
        } else {
            s.push_str(&a);
        }
    }
    s
}
