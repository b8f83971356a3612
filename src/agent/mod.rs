//! Analysis agent
//!
//! `AnalysisAgent` owns the round loop for one goal at a time:
//! - builds the prompt from the session transcript and the sandbox environment
//! - streams the model response and parses it into an action
//! - runs generated code in the session's sandbox and feeds the outcome back
//!
//! Everything a run produces leaves through its `EventSender`.

mod config;
mod orchestrator;

pub use config::AgentSettings;
pub use orchestrator::*;
