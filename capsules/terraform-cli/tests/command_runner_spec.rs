use capsules_terraform_cli::{
    assemble_script, prepare, CommandRunner, ContainerSpec, FileStaging, InputFiles,
    LocalShellBackend, RunnerError, TerraformCliTask,
};
use std::collections::BTreeMap;
use std::fs;
use std::time::{Duration, Instant};

fn commands(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn local_runner() -> CommandRunner {
    CommandRunner::new(Box::new(LocalShellBackend::new()))
}

#[test]
fn single_command_exits_zero() {
    let task = TerraformCliTask::new(commands(&["echo 'Terraform v1.6.6'"]));
    let result = local_runner().run(&task).unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.std_out_line_count, 1);
    assert!(result.vars.is_empty());
    assert!(result.output_files.is_empty());
    assert!(!result.warning);
}

#[test]
fn env_values_flow_into_captured_vars() {
    let mut task = TerraformCliTask::new(commands(&[
        r#"echo "::{\"outputs\":{\"customEnv\":\"$MY_KEY\"}}::""#,
        "echo 'Success! The configuration is valid.' | tr -d ' \\n' | xargs -0 -I {} echo '::{\"outputs\":{}}::'",
    ]));
    task.before_commands = Some(commands(&["echo init"]));
    let mut env = BTreeMap::new();
    env.insert("MY_KEY".to_string(), "MY_VALUE".to_string());
    task.env = Some(env);

    let result = local_runner().run(&task).unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.vars.get("customEnv"), Some("MY_VALUE"));
    assert_eq!(result.vars.len(), 1);
}

#[test]
fn setup_commands_run_before_main_commands() {
    let artifacts = tempfile::tempdir().unwrap();
    let mut task = TerraformCliTask::new(commands(&["echo validate >> order.txt"]));
    task.before_commands = Some(commands(&["echo init > order.txt"]));
    task.files.output_files = Some(vec!["order.txt".to_string()]);

    let result = local_runner()
        .with_artifacts_dir(artifacts.path())
        .run(&task)
        .unwrap();

    let order = result.output_files.get("order.txt").unwrap();
    assert!(order.starts_with(artifacts.path()));
    assert_eq!(fs::read_to_string(order).unwrap(), "init\nvalidate\n");
}

#[test]
fn failing_setup_does_not_abort_script() {
    let mut task = TerraformCliTask::new(commands(&[
        r#"echo "::{\"outputs\":{\"reached\":\"yes\"}}::""#,
    ]));
    task.before_commands = Some(commands(&["false"]));

    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.vars.get("reached"), Some("yes"));
}

#[test]
fn chained_commands_stop_at_first_failure() {
    let task = TerraformCliTask::new(commands(&["false && echo unreachable", "echo done"]));
    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.std_out_line_count, 1);

    let task = TerraformCliTask::new(commands(&["set -e", "false", "echo unreachable"]));
    let err = local_runner().run(&task).unwrap_err();
    assert_eq!(err.exit_code(), Some(1));
}

#[test]
fn non_zero_exit_is_execution_failed_with_stderr() {
    let task = TerraformCliTask::new(commands(&[
        "echo 'Error: Missing required argument' >&2",
        "exit 4",
    ]));

    match local_runner().run(&task) {
        Err(RunnerError::ExecutionFailed { exit_code, stderr }) => {
            assert_eq!(exit_code, 4);
            assert!(stderr.contains("Missing required argument"));
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
}

#[test]
fn empty_commands_are_invalid() {
    let task = TerraformCliTask::new(vec![]);
    let err = local_runner().run(&task).unwrap_err();
    assert!(matches!(err, RunnerError::InvalidRequest { .. }));
    assert_eq!(err.code(), "TERRAFORM_CLI_INVALID_REQUEST");
}

#[test]
fn stderr_marks_warning_only_when_enabled() {
    let mut task = TerraformCliTask::new(commands(&["echo 'Warning: provider is deprecated' >&2"]));

    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.std_err_line_count, 1);
    assert!(result.warning);

    task.warning_on_std_err = false;
    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.std_err_line_count, 1);
    assert!(!result.warning);
}

#[test]
fn inline_and_encoded_input_files_are_staged() {
    let mut inline = BTreeMap::new();
    inline.insert(
        "terraform.tfvars".to_string(),
        "username = \"cicd\"\n".to_string(),
    );
    inline.insert(
        "modules/net/main.tf".to_string(),
        "# network\n".to_string(),
    );
    let mut task = TerraformCliTask::new(commands(&[
        "cp terraform.tfvars copy.tfvars",
        "test -f modules/net/main.tf",
    ]));
    task.files.input_files = Some(InputFiles::Inline(inline));
    task.files.output_files = Some(vec!["*.tfvars".to_string()]);

    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.output_files.len(), 2);
    let copy = result.output_files.get("copy.tfvars").unwrap();
    assert_eq!(fs::read_to_string(copy).unwrap(), "username = \"cicd\"\n");

    let mut task = TerraformCliTask::new(commands(&[
        r#"echo "::{\"outputs\":{\"content\":\"$(cat main.tf)\"}}::""#,
    ]));
    task.files.input_files = Some(InputFiles::Encoded(
        r#"{"main.tf":"terraform-block"}"#.to_string(),
    ));
    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.vars.get("content"), Some("terraform-block"));
}

#[test]
fn host_file_sources_are_copied() {
    let host = tempfile::tempdir().unwrap();
    let source = host.path().join("backend.tf");
    fs::write(&source, "backend-config").unwrap();

    let mut inline = BTreeMap::new();
    inline.insert(
        "backend.tf".to_string(),
        format!("file://{}", source.display()),
    );
    let mut task = TerraformCliTask::new(commands(&[
        r#"echo "::{\"outputs\":{\"backend\":\"$(cat backend.tf)\"}}::""#,
    ]));
    task.files.input_files = Some(InputFiles::Inline(inline));

    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.vars.get("backend"), Some("backend-config"));
}

#[test]
fn escaping_input_path_is_invalid() {
    let mut inline = BTreeMap::new();
    inline.insert("../outside.tf".to_string(), "oops".to_string());
    let mut task = TerraformCliTask::new(commands(&["true"]));
    task.files.input_files = Some(InputFiles::Inline(inline));

    let err = local_runner().run(&task).unwrap_err();
    assert!(matches!(err, RunnerError::InvalidRequest { .. }));
}

#[test]
fn empty_output_patterns_capture_nothing() {
    let mut task = TerraformCliTask::new(commands(&["echo plan > plan.txt"]));
    task.files.output_files = Some(vec![]);
    let result = local_runner().run(&task).unwrap();
    assert!(result.output_files.is_empty());
}

#[test]
fn duplicate_marker_keys_take_the_last_value() {
    let task = TerraformCliTask::new(commands(&[
        r#"echo '::{"outputs":{"state":"planned","workspace":"default"}}::'"#,
        r#"echo '::{"outputs":{"state":"applied"}}::'"#,
    ]));
    let result = local_runner().run(&task).unwrap();
    let entries: Vec<_> = result.vars.iter().collect();
    assert_eq!(entries, vec![("state", "applied"), ("workspace", "default")]);
}

#[test]
fn caller_timeout_stops_the_script() {
    let runner = CommandRunner::new(Box::new(
        LocalShellBackend::new().with_timeout(Duration::from_millis(300)),
    ));
    let task = TerraformCliTask::new(commands(&["sleep 10"]));

    let err = runner.run(&task).unwrap_err();
    assert!(matches!(err, RunnerError::TimedOut { .. }));
}

#[test]
fn execute_accepts_assembled_parts() {
    let setup = commands(&["echo one"]);
    let main = commands(&["echo two"]);
    let script = assemble_script(Some(setup.as_slice()), &main).unwrap();
    let spec = prepare(ContainerSpec::default());

    let result = local_runner()
        .execute(&spec, &script, None, &FileStaging::default())
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.std_out_line_count, 2);
}

#[test]
fn background_process_does_not_delay_completion() {
    let runner = CommandRunner::new(Box::new(
        LocalShellBackend::new().with_timeout(Duration::from_secs(2)),
    ));
    let task = TerraformCliTask::new(commands(&["sleep 5 &", "echo done"]));

    let started = Instant::now();
    let result = runner.run(&task).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.std_out_line_count, 1);
    assert!(started.elapsed() < Duration::from_secs(2));

    let task = TerraformCliTask::new(commands(&["sleep 4 &", "echo done"]));
    let started = Instant::now();
    let result = local_runner().run(&task).unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[cfg(unix)]
#[test]
fn outputs_linking_outside_the_working_directory_are_not_collected() {
    let host = tempfile::tempdir().unwrap();
    let secret = host.path().join("credentials");
    fs::write(&secret, "aws_secret_access_key = hunter2").unwrap();

    let artifacts = tempfile::tempdir().unwrap();
    let mut task = TerraformCliTask::new(vec![
        format!("ln -s {} leak.txt", secret.display()),
        format!("ln -s {} hostdir", host.path().display()),
        "echo plan > plan.txt".to_string(),
    ]);
    task.files.output_files = Some(vec!["*.txt".to_string(), "hostdir/*".to_string()]);

    let result = local_runner()
        .with_artifacts_dir(artifacts.path())
        .run(&task)
        .unwrap();

    assert_eq!(
        result.output_files.keys().collect::<Vec<_>>(),
        vec!["plan.txt"]
    );
    assert!(!artifacts.path().join("leak.txt").exists());
}
