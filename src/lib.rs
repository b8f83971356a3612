//! Analyst Agent - an LLM data-analysis agent
//!
//! This crate provides:
//! - A round-bounded agent loop that asks a model for analysis code, runs it
//!   in a persistent per-session Python environment and streams progress events
//! - An OpenAI-compatible streaming model client
//! - CLI/REPL interface for running analyses from a terminal

pub mod config;
pub mod dataset;
pub mod error;
pub mod prompt;
pub mod session;
pub mod telemetry;

// Agent system
pub mod agent;
pub mod channel;
pub mod events;
pub mod parser;
pub mod provider;
pub mod sandbox;

pub use agent::{AgentSettings, AnalysisAgent, RunOutcome, RunSummary};
pub use channel::{event_channel, EventReceiver, EventSender, Received};
pub use config::Config;
pub use error::{AgentError, ConfigError, ProviderError, SandboxError, SetupError};
pub use events::{ExecutionOutcome, ReportContent, StreamEvent, StreamItem};
pub use parser::ParsedAction;
pub use provider::{ModelClient, ProviderClient, ProviderConfig};
pub use sandbox::{CodeSandbox, PythonSandboxLauncher, SandboxLauncher};
