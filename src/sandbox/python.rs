//! Python worker sandbox
//!
//! Each session gets its own `python3` process running an embedded driver that
//! keeps one globals namespace alive across requests. Requests and replies are
//! newline-delimited JSON on the worker's stdin/stdout. Heavy numeric work runs
//! in that process, so it never blocks the async runtime.

use super::{CodeSandbox, EnvironmentState, SandboxLauncher};
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::events::ExecutionOutcome;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const DRIVER: &str = include_str!("driver.py");

/// Limit for control requests (startup, describe, bind)
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    variables: Vec<(String, String)>,
}

/// A live interpreter process
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Worker {
    async fn spawn(python: &Path, session_dir: &Path) -> Result<Self, SandboxError> {
        let mut child = Command::new(python)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .current_dir(session_dir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                interpreter: python.to_path_buf(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdin is unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Protocol("worker stdout is unavailable".to_string()))?;

        // Stray writes to the real stdout/stderr end up here; keep the pipe drained.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "sandbox", "{}", line);
                }
            });
        }

        let mut worker = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let ready = tokio::time::timeout(CONTROL_TIMEOUT, worker.read_reply())
            .await
            .map_err(|_| SandboxError::Protocol("worker did not start in time".to_string()))??;
        if !ready.ok {
            return Err(SandboxError::Protocol("worker failed its startup handshake".to_string()));
        }

        Ok(worker)
    }

    async fn request(&mut self, request: &serde_json::Value) -> Result<Reply, SandboxError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| SandboxError::Protocol(format!("failed to encode request: {}", e)))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, SandboxError> {
        let line = self
            .stdout
            .next_line()
            .await?
            .ok_or(SandboxError::WorkerExited)?;
        serde_json::from_str(&line)
            .map_err(|e| SandboxError::Protocol(format!("malformed reply: {} (raw: {})", e, line)))
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Persistent Python environment for one session
pub struct PythonSandbox {
    config: SandboxConfig,
    session_dir: PathBuf,
    worker: Option<Worker>,
    /// Replayed into a fresh worker after a reset
    bindings: Vec<(String, serde_json::Value)>,
}

impl PythonSandbox {
    /// Start the worker for a session
    pub async fn start(config: SandboxConfig, session_dir: &Path) -> Result<Self, SandboxError> {
        if which::which(&config.python).is_err() && !config.python.exists() {
            return Err(SandboxError::InterpreterNotFound(
                config.python.display().to_string(),
            ));
        }

        let worker = Worker::spawn(&config.python, session_dir).await?;
        tracing::info!(
            session_dir = %session_dir.display(),
            python = %config.python.display(),
            "Sandbox worker started"
        );

        Ok(Self {
            config,
            session_dir: session_dir.to_path_buf(),
            worker: Some(worker),
            bindings: Vec::new(),
        })
    }

    async fn worker(&mut self) -> Result<&mut Worker, SandboxError> {
        if self.worker.is_none() {
            tracing::warn!(session_dir = %self.session_dir.display(), "Restarting sandbox worker");
            let mut worker = Worker::spawn(&self.config.python, &self.session_dir).await?;
            for (name, value) in &self.bindings {
                let reply = worker
                    .request(&json!({"op": "bind", "name": name, "value": value}))
                    .await?;
                if !reply.ok {
                    return Err(SandboxError::Protocol(format!("failed to rebind '{}'", name)));
                }
            }
            self.worker = Some(worker);
        }
        self.worker.as_mut().ok_or(SandboxError::WorkerExited)
    }

    async fn control(&mut self, request: serde_json::Value) -> Result<Reply, SandboxError> {
        let worker = self.worker().await?;
        let result = tokio::time::timeout(CONTROL_TIMEOUT, worker.request(&request)).await;
        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                self.discard_worker().await;
                Err(e)
            }
            Err(_) => {
                self.discard_worker().await;
                Err(SandboxError::Protocol("worker stopped responding".to_string()))
            }
        }
    }

    async fn discard_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.kill().await;
        }
    }

    fn truncate_output(&self, mut output: String) -> String {
        let limit = self.config.output_limit;
        if output.len() > limit {
            let mut cut = limit;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n\n(Output truncated due to length limit)");
        }
        output
    }
}

#[async_trait]
impl CodeSandbox for PythonSandbox {
    async fn run(&mut self, code: &str) -> Result<ExecutionOutcome, SandboxError> {
        let timeout = self.config.timeout;
        let worker = self.worker().await?;
        let result = tokio::time::timeout(timeout, worker.request(&json!({"op": "run", "code": code}))).await;

        match result {
            Ok(Ok(reply)) => {
                let stdout = self.truncate_output(reply.stdout);
                Ok(if reply.ok {
                    ExecutionOutcome::success(stdout)
                } else {
                    ExecutionOutcome::failure(
                        stdout,
                        reply.error.unwrap_or_else(|| "Execution failed".to_string()),
                    )
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Sandbox worker died while running code");
                self.discard_worker().await;
                Ok(ExecutionOutcome::failure(
                    "",
                    "The Python process exited while running this code; the environment was reset and all variables are gone",
                ))
            }
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Code execution timed out");
                self.discard_worker().await;
                Ok(ExecutionOutcome::failure(
                    "",
                    format!(
                        "Execution timed out after {} seconds; the environment was reset and all variables are gone",
                        timeout.as_secs()
                    ),
                ))
            }
        }
    }

    async fn describe_environment(&mut self) -> Result<EnvironmentState, SandboxError> {
        let reply = self.control(json!({"op": "describe"})).await?;
        if !reply.ok {
            return Err(SandboxError::Protocol(
                reply.error.unwrap_or_else(|| "describe failed".to_string()),
            ));
        }
        Ok(EnvironmentState {
            variables: reply.variables.into_iter().collect(),
        })
    }

    async fn bind(&mut self, name: &str, value: serde_json::Value) -> Result<(), SandboxError> {
        let reply = self
            .control(json!({"op": "bind", "name": name, "value": value.clone()}))
            .await?;
        if !reply.ok {
            return Err(SandboxError::Protocol(
                reply.error.unwrap_or_else(|| format!("failed to bind '{}'", name)),
            ));
        }
        self.bindings.retain(|(existing, _)| existing != name);
        self.bindings.push((name.to_string(), value));
        Ok(())
    }
}

/// Launches a `PythonSandbox` per session
#[derive(Debug, Clone)]
pub struct PythonSandboxLauncher {
    config: SandboxConfig,
}

impl PythonSandboxLauncher {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SandboxLauncher for PythonSandboxLauncher {
    async fn launch(&self, session_dir: &Path) -> Result<Box<dyn CodeSandbox>, SandboxError> {
        let sandbox = PythonSandbox::start(self.config.clone(), session_dir).await?;
        Ok(Box::new(sandbox))
    }
}
