//! # Terraform CLI capsule
//!
//! Runs Terraform CLI commands inside an isolated container. A task supplies
//! setup commands, main commands, environment variables and file staging
//! directives; the runner fills in container defaults, wraps every command into
//! one `/bin/sh -c` script, hands it to an execution backend and collects the
//! result.
//!
//! ```no_run
//! use capsules_terraform_cli::{CommandRunner, TerraformCliTask};
//!
//! let task = TerraformCliTask::from_yaml_str(
//!     r#"
//! beforeCommands:
//!   - terraform init
//! commands:
//!   - terraform validate
//! "#,
//! )?;
//!
//! let result = CommandRunner::from_env(None).run(&task)?;
//! println!("exit code {}", result.exit_code);
//! # Ok::<(), capsules_terraform_cli::RunnerError>(())
//! ```
//!
//! Scripts pass values back by printing a marker line:
//!
//! ```text
//! ::{"outputs":{"key":"value"}}::
//! ```

pub mod backend;
mod container;
mod error;
mod outputs;
mod runner;
mod script;
mod staging;
mod task;

pub use backend::{
    detect_backend, BackendOutput, BackendRequest, DockerCliBackend, ExecutionBackend,
    LocalShellBackend, Stream,
};
pub use container::{prepare, ContainerSpec, PullPolicy, CONTAINER_WORKDIR, DEFAULT_IMAGE};
pub use error::RunnerError;
pub use outputs::{parse_marker, CapturedVars, Marker, OutputCollector};
pub use runner::{CommandRunner, ExecutionResult};
pub use script::{assemble_script, interpreter, INTERPRETER};
pub use staging::{
    check_output_patterns, sanitize_relative, FileStaging, InputFiles, InputSource,
    WorkingDirectory,
};
pub use task::TerraformCliTask;
