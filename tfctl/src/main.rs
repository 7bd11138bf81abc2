use anyhow::{Context, Result};
use capsules_terraform_cli::{
    assemble_script, interpreter, CommandRunner, RunnerError, TerraformCliTask,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "tfctl", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Terraform CLI task from a YAML file
    Run {
        /// Path to task YAML
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Directory receiving harvested output files
        #[arg(long, value_name = "DIR", env = "TFCTL_ARTIFACTS_DIR")]
        artifacts_dir: Option<PathBuf>,
        /// Abort the script after this long (e.g. 90s, 5m)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Print the prepared container and assembled script without running it
    Script {
        /// Path to task YAML
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print version and exit
    Version,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run {
            file,
            artifacts_dir,
            timeout,
        } => {
            let task = load_task(&file);
            let mut runner = CommandRunner::from_env(timeout);
            if let Some(dir) = artifacts_dir {
                runner = runner.with_artifacts_dir(dir);
            }
            tracing::info!(backend = runner.backend_name(), file = %file.display(), "running task");

            match runner.run(&task) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Err(err) => fail(&err),
            }
        }
        Commands::Script { file } => {
            let task = load_task(&file);
            let script = match assemble_script(task.before_commands.as_deref(), &task.commands) {
                Ok(script) => script,
                Err(err) => fail(&err),
            };
            let rendered = json!({
                "container": task.container_spec(),
                "interpreter": interpreter(),
                "script": script,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&rendered).context("Failed to render script")?
            );
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

fn load_task(file: &Path) -> TerraformCliTask {
    match TerraformCliTask::from_path(file) {
        Ok(task) => task,
        Err(err) => fail(&err),
    }
}

/// Report a runner failure and exit with the script's own code when it has one.
fn fail(err: &RunnerError) -> ! {
    eprintln!("Error: {}", err);
    if let RunnerError::ExecutionFailed { stderr, .. } = err {
        if !stderr.is_empty() {
            eprintln!("{}", stderr);
        }
    }
    let report = json!({
        "error": {
            "code": err.code(),
            "message": err.to_string(),
            "exitCode": err.exit_code(),
        }
    });
    println!("{}", report);
    std::process::exit(err.exit_code().unwrap_or(2));
}
