use crate::error::RunnerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const SOURCE_PREFIX: &str = "file://";

/// Files to write into the working directory before the script runs.
///
/// Either an inline `path -> content` map, or a string holding the same map
/// encoded as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputFiles {
    Inline(BTreeMap<String, String>),
    Encoded(String),
}

impl InputFiles {
    pub fn resolve(&self) -> Result<BTreeMap<PathBuf, InputSource>, RunnerError> {
        let decoded;
        let entries = match self {
            InputFiles::Inline(map) => map,
            InputFiles::Encoded(text) => {
                decoded = serde_json::from_str::<BTreeMap<String, String>>(text).map_err(
                    |err| RunnerError::invalid(format!("inputFiles is not a JSON object: {err}")),
                )?;
                &decoded
            }
        };

        entries
            .iter()
            .map(|(path, content)| Ok((sanitize_relative(path)?, InputSource::from_value(content))))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Content(String),
    /// `file://` descriptor: copy the host file.
    HostFile(PathBuf),
}

impl InputSource {
    pub fn from_value(value: &str) -> Self {
        match value.strip_prefix(SOURCE_PREFIX) {
            Some(path) if !path.is_empty() => InputSource::HostFile(PathBuf::from(path)),
            _ => InputSource::Content(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStaging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_files: Option<InputFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_files: Option<Vec<String>>,
    /// Resolved by the host engine; forwarded as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_files: Option<Value>,
}

impl FileStaging {
    pub fn resolved_inputs(&self) -> Result<BTreeMap<PathBuf, InputSource>, RunnerError> {
        match &self.input_files {
            Some(files) => files.resolve(),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Output globs; absent and empty both mean "capture nothing".
    pub fn output_patterns(&self) -> Vec<String> {
        self.output_files.clone().unwrap_or_default()
    }
}

/// Reject absolute paths and anything that climbs out of the working directory.
pub fn sanitize_relative(path: &str) -> Result<PathBuf, RunnerError> {
    let mut sanitized = PathBuf::new();
    for comp in Path::new(path).components() {
        match comp {
            Component::Normal(part) => sanitized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RunnerError::invalid(format!(
                    "path '{path}' must stay inside the working directory"
                )))
            }
        }
    }

    if sanitized.as_os_str().is_empty() {
        return Err(RunnerError::invalid(format!(
            "path '{path}' does not name a file"
        )));
    }

    Ok(sanitized)
}

/// Output globs are resolved against the working directory and may not leave it.
pub fn check_output_patterns(patterns: &[String]) -> Result<(), RunnerError> {
    for pattern in patterns {
        let escapes = Path::new(pattern).components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(RunnerError::invalid(format!(
                "output pattern '{pattern}' must stay inside the working directory"
            )));
        }
        glob::Pattern::new(pattern).map_err(|err| {
            RunnerError::invalid(format!("Invalid output pattern '{pattern}': {err}"))
        })?;
    }
    Ok(())
}

/// Per-invocation scratch directory shared with the container.
#[derive(Debug)]
pub struct WorkingDirectory {
    dir: TempDir,
}

impl WorkingDirectory {
    pub fn create() -> Result<Self, RunnerError> {
        let dir = tempfile::Builder::new()
            .prefix("tfctl-work-")
            .tempdir()
            .map_err(|err| RunnerError::io(format!("Failed to create working directory: {err}")))?;

        // Any container UID must be able to write state files here.
        #[cfg(unix)]
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o777)).map_err(|err| {
            RunnerError::io(format!(
                "Failed to set permissions on working directory {}: {}",
                dir.path().display(),
                err
            ))
        })?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn materialize(&self, inputs: &BTreeMap<PathBuf, InputSource>) -> Result<(), RunnerError> {
        for (relative, source) in inputs {
            let target = self.path().join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| {
                    RunnerError::io(format!(
                        "Failed to create input directory {}: {}",
                        parent.display(),
                        err
                    ))
                })?;
            }

            match source {
                InputSource::Content(content) => fs::write(&target, content).map_err(|err| {
                    RunnerError::io(format!(
                        "Failed to write input file {}: {}",
                        relative.display(),
                        err
                    ))
                })?,
                InputSource::HostFile(host) => {
                    fs::copy(host, &target).map_err(|err| {
                        RunnerError::io(format!(
                            "Failed to copy {} to input file {}: {}",
                            host.display(),
                            relative.display(),
                            err
                        ))
                    })?;
                }
            }

            #[cfg(unix)]
            fs::set_permissions(&target, fs::Permissions::from_mode(0o666)).map_err(|err| {
                RunnerError::io(format!(
                    "Failed to set permissions on input file {}: {}",
                    relative.display(),
                    err
                ))
            })?;

            debug!(path = %relative.display(), "staged input file");
        }
        Ok(())
    }

    /// Copy files matching `patterns` out of the working directory.
    ///
    /// Files land under `artifacts_dir`, or a fresh persistent temp directory
    /// when none is given. Keys are paths relative to the working directory.
    pub fn harvest(
        &self,
        patterns: &[String],
        artifacts_dir: Option<&Path>,
    ) -> Result<BTreeMap<String, PathBuf>, RunnerError> {
        let mut harvested = BTreeMap::new();
        if patterns.is_empty() {
            return Ok(harvested);
        }

        check_output_patterns(patterns)?;

        let destination = match artifacts_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|err| {
                    RunnerError::io(format!(
                        "Failed to create artifacts directory {}: {}",
                        dir.display(),
                        err
                    ))
                })?;
                dir.to_path_buf()
            }
            None => tempfile::Builder::new()
                .prefix("tfctl-outputs-")
                .tempdir()
                .map_err(|err| {
                    RunnerError::io(format!("Failed to create artifacts directory: {err}"))
                })?
                .into_path(),
        };

        let canonical_root = self.path().canonicalize().map_err(|err| {
            RunnerError::io(format!(
                "Failed to canonicalize working directory {}: {}",
                self.path().display(),
                err
            ))
        })?;
        let root = glob::Pattern::escape(&self.path().to_string_lossy());
        for pattern in patterns {
            let full = format!("{}/{}", root, pattern);
            let entries = glob::glob(&full).map_err(|err| {
                RunnerError::invalid(format!("Invalid output pattern '{pattern}': {err}"))
            })?;

            for path in entries.filter_map(|entry| entry.ok()) {
                let Ok(relative) = path.strip_prefix(self.path()) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if harvested.contains_key(&key) {
                    continue;
                }
                let Ok(meta) = fs::symlink_metadata(&path) else {
                    continue;
                };
                if meta.is_dir() {
                    continue;
                }
                let Some(source) = resolve_inside(&path, &canonical_root) else {
                    warn!(path = %key, "skipping output that resolves outside the working directory");
                    continue;
                };

                let target = destination.join(relative);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|err| {
                        RunnerError::io(format!(
                            "Failed to create output directory {}: {}",
                            parent.display(),
                            err
                        ))
                    })?;
                }
                fs::copy(&source, &target).map_err(|err| {
                    RunnerError::io(format!("Failed to collect output file {key}: {err}"))
                })?;

                debug!(path = %key, "collected output file");
                harvested.insert(key, target);
            }
        }

        Ok(harvested)
    }
}

/// Resolved location of a harvestable output: a regular file, not a symlink,
/// that lives under `root` once every parent directory is resolved.
fn resolve_inside(path: &Path, root: &Path) -> Option<PathBuf> {
    let meta = fs::symlink_metadata(path).ok()?;
    if !meta.file_type().is_file() {
        return None;
    }
    let resolved = path.canonicalize().ok()?;
    resolved.starts_with(root).then_some(resolved)
}
