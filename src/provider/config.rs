//! Provider configuration

use crate::config::{LlmConfig, LlmProvider};
use serde::{Deserialize, Serialize};

/// Configuration for an OpenAI-compatible provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name for the provider
    pub name: String,
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,
    /// Environment variable name for the API key
    pub api_key_env: String,
    /// Default model to use
    pub default_model: String,
}

impl ProviderConfig {
    /// Create a DashScope provider config (OpenAI-compatible mode)
    pub fn dashscope() -> Self {
        Self {
            name: "DashScope".to_string(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            default_model: "qwen-turbo".to_string(),
        }
    }

    /// Create an OpenAI provider config
    pub fn openai() -> Self {
        Self {
            name: "OpenAI".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    /// Create an OpenRouter provider config
    pub fn openrouter() -> Self {
        Self {
            name: "OpenRouter".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            default_model: "qwen/qwen-2.5-72b-instruct".to_string(),
        }
    }

    /// Create a custom provider config (e.g., LM Studio, vLLM)
    pub fn custom(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            default_model: default_model.into(),
        }
    }

    /// Provider preset for an LLM config, with its base URL and model applied
    pub fn from_llm_config(llm: &LlmConfig) -> Self {
        let mut config = match llm.provider {
            LlmProvider::DashScope => Self::dashscope(),
            LlmProvider::OpenAI => Self::openai(),
            LlmProvider::OpenRouter => Self::openrouter(),
            LlmProvider::Custom => Self::custom("Custom", "", "DASHSCOPE_API_KEY", ""),
        };
        if let Some(base_url) = llm.base_url.as_deref().filter(|u| !u.is_empty()) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = llm.model.as_deref().filter(|m| !m.is_empty()) {
            config.default_model = model.to_string();
        }
        config
    }
}
