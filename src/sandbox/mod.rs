//! Execution sandbox
//!
//! One sandbox per session. It owns a long-lived variable environment, runs
//! code fragments against it and reports what happened. Faults in the code are
//! part of the `ExecutionOutcome`; `SandboxError` means the sandbox itself is
//! gone.

mod python;

pub use python::{PythonSandbox, PythonSandboxLauncher};

use crate::error::SandboxError;
use crate::events::ExecutionOutcome;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Marker printed by executed code after saving an image
pub const IMAGE_MARKER: &str = "IMAGE_PATH:";

/// Name under which the session directory is bound into the environment
pub const SESSION_DIR_VARIABLE: &str = "session_output_dir";

/// Narrow, prompt-safe description of what is in scope: name -> type/shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub variables: IndexMap<String, String>,
}

impl EnvironmentState {
    /// Text embedded into the system instructions
    pub fn render(&self) -> String {
        if self.variables.is_empty() {
            return "(no variables defined)".to_string();
        }
        self.variables
            .iter()
            .map(|(name, description)| format!("- {}: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A persistent execution environment
#[async_trait]
pub trait CodeSandbox: Send {
    /// Run a fragment. New and updated variables survive to the next call.
    async fn run(&mut self, code: &str) -> Result<ExecutionOutcome, SandboxError>;

    /// Describe what is currently in scope. No side effects on the environment.
    async fn describe_environment(&mut self) -> Result<EnvironmentState, SandboxError>;

    /// Pre-seed a variable before the first round
    async fn bind(&mut self, name: &str, value: serde_json::Value) -> Result<(), SandboxError>;
}

/// Creates the one sandbox a session uses
#[async_trait]
pub trait SandboxLauncher: Send + Sync {
    async fn launch(&self, session_dir: &Path) -> Result<Box<dyn CodeSandbox>, SandboxError>;
}

/// Paths announced by `IMAGE_PATH:` marker lines, in output order
pub fn image_markers(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(IMAGE_MARKER))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .collect()
}

/// Resolve a marker path to a `/`-separated path relative to `output_root`.
///
/// Relative marker paths are taken relative to `session_dir` (the worker's
/// working directory). Anything that does not land inside `session_dir` is
/// rejected.
pub fn resolve_artifact(marker_path: &str, session_dir: &Path, output_root: &Path) -> Option<String> {
    let session_dir = absolutize(session_dir);
    let output_root = absolutize(output_root);

    let candidate = Path::new(marker_path);
    let resolved = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&session_dir.join(candidate))
    };

    if !resolved.starts_with(&session_dir) || resolved == session_dir {
        tracing::warn!(
            path = marker_path,
            session_dir = %session_dir.display(),
            "Ignoring image outside the session directory"
        );
        return None;
    }

    let relative = resolved.strip_prefix(&output_root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Absolute, lexically normalized form of a path
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&cwd.join(path))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
