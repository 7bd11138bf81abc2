use crate::error::RunnerError;

/// Fixed interpreter invocation; the assembled script is its last argument.
pub const INTERPRETER: [&str; 2] = ["/bin/sh", "-c"];

pub fn interpreter() -> Vec<String> {
    INTERPRETER.iter().map(|part| part.to_string()).collect()
}

/// Join setup and main commands into one script body, one command per line.
///
/// Commands are taken verbatim. No `set -e` is added, so a failing setup
/// command does not stop later lines unless the caller chains them.
pub fn assemble_script(setup: Option<&[String]>, main: &[String]) -> Result<String, RunnerError> {
    if main.is_empty() {
        return Err(RunnerError::invalid("at least one command is required"));
    }

    let script = setup
        .unwrap_or_default()
        .iter()
        .chain(main)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");

    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn main_only_has_no_leading_content() {
        let main = lines(&["terraform version"]);
        assert_eq!(assemble_script(None, &main).unwrap(), "terraform version");
        assert_eq!(
            assemble_script(Some(&[][..]), &main).unwrap(),
            "terraform version"
        );
    }

    #[test]
    fn setup_precedes_main_in_order() {
        let setup = lines(&["terraform init"]);
        let main = lines(&["terraform validate"]);
        assert_eq!(
            assemble_script(Some(setup.as_slice()), &main).unwrap(),
            "terraform init\nterraform validate"
        );
    }

    #[test]
    fn commands_are_not_deduplicated() {
        let setup = lines(&["echo a", "echo a"]);
        let main = lines(&["echo b", "echo a"]);
        assert_eq!(
            assemble_script(Some(setup.as_slice()), &main).unwrap(),
            "echo a\necho a\necho b\necho a"
        );
    }

    #[test]
    fn empty_main_is_rejected() {
        let setup = lines(&["terraform init"]);
        let err = assemble_script(Some(setup.as_slice()), &[]).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidRequest { .. }));
    }

    #[test]
    fn interpreter_is_sh_dash_c() {
        assert_eq!(interpreter(), vec!["/bin/sh", "-c"]);
    }
}
