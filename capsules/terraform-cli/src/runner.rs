use crate::backend::{detect_backend, BackendRequest, ExecutionBackend, Stream};
use crate::container::{prepare, ContainerSpec};
use crate::error::{truncate, RunnerError};
use crate::outputs::{CapturedVars, OutputCollector};
use crate::script::{assemble_script, interpreter};
use crate::staging::{check_output_patterns, FileStaging};
use crate::task::TerraformCliTask;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

const STDERR_TAIL_LINES: usize = 50;

/// Outcome of a script that ran to completion with exit code 0.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub vars: CapturedVars,
    pub output_files: BTreeMap<String, PathBuf>,
    pub std_out_line_count: usize,
    pub std_err_line_count: usize,
    /// Stderr was written while `warning_on_std_err` was enabled.
    pub warning: bool,
    pub duration_ms: f64,
    pub started_at: DateTime<Utc>,
}

/// Turns a command request into a single backend execution.
///
/// Holds no state between invocations, so one runner may serve concurrent
/// callers.
pub struct CommandRunner {
    backend: Box<dyn ExecutionBackend>,
    warning_on_std_err: bool,
    artifacts_dir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(backend: Box<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            warning_on_std_err: true,
            artifacts_dir: None,
        }
    }

    /// Backend chosen from `TFCTL_CONTAINER_RUNTIME`.
    pub fn from_env(timeout: Option<Duration>) -> Self {
        Self::new(detect_backend(timeout))
    }

    pub fn with_warning_on_std_err(mut self, enabled: bool) -> Self {
        self.warning_on_std_err = enabled;
        self
    }

    /// Directory receiving harvested output files.
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Prepare, assemble and execute a task definition.
    #[instrument(skip_all, fields(task = task.id.as_deref().unwrap_or("terraform")))]
    pub fn run(&self, task: &TerraformCliTask) -> Result<ExecutionResult, RunnerError> {
        let container = task.container_spec();
        let script = assemble_script(task.before_commands.as_deref(), &task.commands)?;
        debug!(image = %container.image(), lines = script.lines().count(), "task prepared");

        self.execute_with(
            &container,
            &script,
            task.env.as_ref(),
            &task.files,
            task.warning_on_std_err,
        )
    }

    /// Execute an assembled script with the runner's stderr policy.
    pub fn execute(
        &self,
        container: &ContainerSpec,
        script: &str,
        env: Option<&BTreeMap<String, String>>,
        staging: &FileStaging,
    ) -> Result<ExecutionResult, RunnerError> {
        self.execute_with(container, script, env, staging, self.warning_on_std_err)
    }

    #[instrument(skip_all, fields(backend = %self.backend.name(), image = %container.image()))]
    fn execute_with(
        &self,
        container: &ContainerSpec,
        script: &str,
        env: Option<&BTreeMap<String, String>>,
        staging: &FileStaging,
        warn_on_stderr: bool,
    ) -> Result<ExecutionResult, RunnerError> {
        let output_patterns = staging.output_patterns();
        check_output_patterns(&output_patterns)?;

        let request = BackendRequest {
            container: prepare(container.clone()),
            interpreter: interpreter(),
            script: script.to_string(),
            env: env.cloned().unwrap_or_default(),
            input_files: staging.resolved_inputs()?,
            output_patterns,
            namespace_files: staging.namespace_files.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let mut collector = OutputCollector::new();
        let mut std_out_line_count = 0usize;
        let mut std_err_line_count = 0usize;
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        info!(inputs = request.input_files.len(), "executing script");
        let output = {
            let mut sink = |stream: Stream, line: &str| {
                match stream {
                    Stream::Stdout => {
                        std_out_line_count += 1;
                        info!(stream = "stdout", "{}", line);
                    }
                    Stream::Stderr => {
                        std_err_line_count += 1;
                        if warn_on_stderr {
                            warn!(stream = "stderr", "{}", line);
                        } else {
                            info!(stream = "stderr", "{}", line);
                        }
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line.to_string());
                    }
                }
                collector.consume(line);
            };
            self.backend.execute(&request, &mut sink)
        };

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                error!(code = err.code(), error = %err, "execution failed");
                return Err(err);
            }
        };
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        if output.exit_code != 0 {
            let stderr = Vec::from(stderr_tail).join("\n");
            error!(exit_code = output.exit_code, duration_ms, "script exited with non-zero code");
            return Err(RunnerError::ExecutionFailed {
                exit_code: output.exit_code,
                stderr: truncate(&stderr, 2048),
            });
        }

        let warning = warn_on_stderr && std_err_line_count > 0;
        if warning {
            warn!(lines = std_err_line_count, "script wrote to stderr");
        }

        let vars = collector.into_vars();
        info!(
            exit_code = output.exit_code,
            duration_ms,
            vars = vars.len(),
            output_files = output.output_files.len(),
            "execution completed"
        );

        Ok(ExecutionResult {
            exit_code: output.exit_code,
            vars,
            output_files: output.output_files,
            std_out_line_count,
            std_err_line_count,
            warning,
            duration_ms,
            started_at,
        })
    }
}
