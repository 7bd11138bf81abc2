use super::process::{self, Completion};
use super::{BackendOutput, BackendRequest, ExecutionBackend, Stream};
use crate::error::RunnerError;
use crate::staging::WorkingDirectory;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// Runs the interpreter directly on the host inside a staged working
/// directory. There is no isolation: image, entrypoint and container options
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct LocalShellBackend {
    timeout: Option<Duration>,
}

impl LocalShellBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl ExecutionBackend for LocalShellBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn execute(
        &self,
        request: &BackendRequest,
        sink: &mut dyn FnMut(Stream, &str),
    ) -> Result<BackendOutput, RunnerError> {
        let (program, args) = request
            .interpreter
            .split_first()
            .ok_or_else(|| RunnerError::invalid("interpreter cannot be empty"))?;

        let workdir = WorkingDirectory::create()?;
        workdir.materialize(&request.input_files)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(&request.script)
            .current_dir(workdir.path())
            .envs(&request.env);

        debug!(
            image = %request.container.image(),
            workdir = %workdir.path().display(),
            "local backend ignores container settings"
        );
        info!(interpreter = %program, "running script on host shell");

        let completion = process::stream_process(command, self.timeout, sink).map_err(|err| {
            RunnerError::BackendUnavailable {
                message: format!("Failed to spawn interpreter '{}': {}", program, err),
            }
        })?;

        match completion {
            Completion::TimedOut(after) => Err(RunnerError::TimedOut { after }),
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
