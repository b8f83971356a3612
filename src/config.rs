//! Configuration for the analyst agent

use crate::error::ConfigError;
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_ROUNDS: u32 = 10;

/// Main configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Root under which one directory per session is created
    pub output_dir: PathBuf,

    /// Round budget per analysis
    pub max_rounds: u32,

    /// Code execution settings
    pub sandbox: SandboxConfig,

    /// Telemetry settings
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider type (dashscope, openai, openrouter, custom)
    pub provider: LlmProvider,

    /// API key (can also be set via environment variable)
    pub api_key: Option<String>,

    /// Base URL override (None = provider default)
    pub base_url: Option<String>,

    /// Model override (None = provider default)
    pub model: Option<String>,

    /// Temperature for sampling
    pub temperature: f32,

    /// Maximum tokens for response
    pub max_tokens: u32,

    /// Retries for the initial request on rate limits and gateway errors
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LlmProvider {
    #[default]
    DashScope,
    OpenAI,
    OpenRouter,
    /// Custom OpenAI-compatible endpoint (e.g., LM Studio, vLLM)
    Custom,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::DashScope => "dashscope",
            LlmProvider::OpenAI => "openai",
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Custom => "custom",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "dashscope" => LlmProvider::DashScope,
            "openai" => LlmProvider::OpenAI,
            "openrouter" => LlmProvider::OpenRouter,
            _ => LlmProvider::Custom,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Python interpreter used for the per-session worker
    pub python: PathBuf,

    /// Wall-clock limit for one code execution
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Captured output beyond this many bytes is truncated
    pub output_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Directory for log files
    pub log_dir: PathBuf,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            output_dir: PathBuf::from("outputs"),
            max_rounds: DEFAULT_MAX_ROUNDS,
            sandbox: SandboxConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::DashScope,
            api_key: None,
            base_url: None,
            model: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 2,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: which::which("python3").unwrap_or_else(|_| PathBuf::from("python3")),
            timeout: Duration::from_secs(120),
            output_limit: 30_000,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: dirs::data_dir()
                .map(|d| d.join("analyst_agent").join("logs"))
                .unwrap_or_else(|| PathBuf::from(".analyst_logs")),
            verbose: false,
        }
    }
}

impl Config {
    /// Build config from the process environment, loading `.env` first
    ///
    /// Unset variables keep their defaults. Malformed numeric values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(provider) = lookup("ANALYST_PROVIDER") {
            config.llm.provider = LlmProvider::parse(&provider);
        }
        // DASHSCOPE_* overrides only make sense for DashScope-style endpoints
        let dashscope_style = matches!(
            config.llm.provider,
            LlmProvider::DashScope | LlmProvider::Custom
        );
        let override_var = |generic: &str, dashscope: &str| {
            lookup(generic)
                .or_else(|| if dashscope_style { lookup(dashscope) } else { None })
                .filter(|v| !v.is_empty())
        };
        config.llm.base_url = override_var("ANALYST_BASE_URL", "DASHSCOPE_BASE_URL");
        config.llm.model = override_var("ANALYST_MODEL", "DASHSCOPE_MODEL");

        let key_env = config.provider().api_key_env;
        config.llm.api_key = lookup(&key_env).filter(|k| !k.is_empty());

        if let Some(dir) = lookup("ANALYST_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(rounds) = lookup("ANALYST_MAX_ROUNDS") {
            config.max_rounds = rounds.parse().map_err(|e| ConfigError::Invalid {
                name: "ANALYST_MAX_ROUNDS",
                reason: format!("{}", e),
            })?;
        }
        if let Some(python) = lookup("ANALYST_PYTHON") {
            config.sandbox.python = PathBuf::from(python);
        }

        Ok(config)
    }

    /// Provider preset with this config's overrides applied
    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig::from_llm_config(&self.llm)
    }

    /// Check that the values needed to run an analysis are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let provider = self.provider();
        if self.llm.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Missing(provider.api_key_env));
        }
        if provider.base_url.is_empty() {
            return Err(ConfigError::Missing("ANALYST_BASE_URL".to_string()));
        }
        if provider.default_model.is_empty() {
            return Err(ConfigError::Missing("ANALYST_MODEL".to_string()));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid {
                name: "max_rounds",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Set verbose logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.telemetry.verbose = verbose;
        self
    }

    /// Set log directory
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.telemetry.log_dir = log_dir;
        self
    }

    /// Set API key
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.llm.api_key = Some(api_key);
        self
    }

    /// Point at a custom OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.llm.base_url = Some(base_url.to_string());
        self.llm.provider = LlmProvider::Custom;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.llm.model = Some(model.to_string());
        self
    }

    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_dashscope() {
        let config = Config::default();
        assert_eq!(config.llm.provider, LlmProvider::DashScope);
        assert_eq!(config.provider().default_model, "qwen-turbo");
        assert_eq!(
            config.provider().base_url,
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.max_rounds, 10);
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DASHSCOPE_API_KEY", "sk-test"),
            ("DASHSCOPE_MODEL", "qwen-max"),
            ("ANALYST_MAX_ROUNDS", "4"),
            ("ANALYST_OUTPUT_DIR", "/tmp/out"),
        ]))
        .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model.as_deref(), Some("qwen-max"));
        assert_eq!(config.provider().default_model, "qwen-max");
        assert_eq!(config.max_rounds, 4);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_round_count_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("ANALYST_MAX_ROUNDS", "many")])).unwrap_err();
        assert!(err.to_string().contains("ANALYST_MAX_ROUNDS"));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref name) if name == "DASHSCOPE_API_KEY"));

        let err = Config::default()
            .with_api_key("sk".to_string())
            .with_max_rounds(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_rounds"));
    }

    #[test]
    fn test_openai_provider_uses_its_own_endpoint_and_key() {
        let config = Config::from_lookup(lookup_from(&[
            ("ANALYST_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("DASHSCOPE_API_KEY", "sk-dashscope"),
            ("DASHSCOPE_MODEL", "qwen-max"),
        ]))
        .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::OpenAI);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-openai"));
        let provider = config.provider();
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
        assert_eq!(provider.default_model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_key_names_the_provider_variable() {
        let mut config = Config::default();
        config.llm.provider = LlmProvider::OpenRouter;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref name) if name == "OPENROUTER_API_KEY"));

        let config = Config::from_lookup(lookup_from(&[
            ("ANALYST_PROVIDER", "openrouter"),
            ("OPENROUTER_API_KEY", "sk-or"),
            ("ANALYST_MODEL", "qwen/qwen-2.5-7b-instruct"),
        ]))
        .unwrap();
        assert_eq!(config.provider().base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.provider().default_model, "qwen/qwen-2.5-7b-instruct");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_endpoint_requires_base_url() {
        let mut config = Config::default().with_api_key("sk".to_string());
        config.llm.provider = LlmProvider::Custom;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ANALYST_BASE_URL"));

        let config = config.with_base_url("http://localhost:1234/v1").with_model("local");
        assert!(config.validate().is_ok());
    }
}
