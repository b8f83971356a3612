//! LLM Provider layer
//!
//! The orchestrator only sees `ModelClient`: a prompt and system instructions
//! go in, an ordered stream of text fragments comes out. `ProviderClient` is
//! the OpenAI-compatible implementation.

mod client;
mod config;

pub use client::*;
pub use config::*;

use crate::error::ProviderError;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Ordered text fragments of one model response
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Model invocation collaborator
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a streamed completion. Errors before the first fragment are
    /// returned here; errors mid-stream arrive as stream items.
    async fn call(&self, prompt: &str, system_instructions: &str) -> Result<TextStream, ProviderError>;
}
