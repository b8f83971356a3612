//! OpenAI-compatible provider client
//!
//! Streams chat completions over raw HTTP and forwards the text deltas. Only
//! the initial request is retried; once fragments have started flowing a
//! failure is reported to the caller.

use super::{ModelClient, ProviderConfig, TextStream};
use crate::config::LlmConfig;
use crate::error::ProviderError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// Internal types for parsing streaming responses
#[derive(Debug, serde::Deserialize)]
struct StreamChunkDelta {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoice {
    delta: StreamChunkDelta,
}

#[derive(Debug, serde::Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
    error: Option<serde_json::Value>,
}

/// One decoded SSE payload
#[derive(Debug, Clone, PartialEq)]
enum SseData {
    Text(String),
    Done,
}

/// Incremental decoder for `data:` lines of a chat completion stream.
///
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across network chunks survive intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Decode whatever is left once the body ends without a trailing newline
    fn finish(&mut self) -> Result<Vec<SseData>, ProviderError> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        self.push(b"\n")
    }

    fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseData>, ProviderError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                out.push(SseData::Done);
                break;
            }

            let chunk: StreamChunk = serde_json::from_str(data)
                .map_err(|e| ProviderError::Stream(format!("malformed chunk: {} (raw: {})", e, data)))?;
            if let Some(error) = chunk.error {
                return Err(ProviderError::Stream(format!("provider reported error: {}", error)));
            }
            if let Some(usage) = &chunk.usage {
                tracing::debug!(
                    target: "llm",
                    input_tokens = usage.prompt_tokens,
                    output_tokens = usage.completion_tokens,
                    "Token usage"
                );
            }
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        out.push(SseData::Text(content));
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Send decoded fragments on. Returns false once the stream is over.
fn forward(
    decoded: Result<Vec<SseData>, ProviderError>,
    tx: &mpsc::UnboundedSender<Result<String, ProviderError>>,
) -> bool {
    match decoded {
        Ok(items) => {
            for item in items {
                match item {
                    SseData::Text(text) => {
                        if tx.send(Ok(text)).is_err() {
                            return false;
                        }
                    }
                    SseData::Done => return false,
                }
            }
            true
        }
        Err(e) => {
            let _ = tx.send(Err(e));
            false
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    INITIAL_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF)
}

/// OpenAI-compatible streaming client
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    http_client: reqwest::Client,
}

impl ProviderClient {
    /// Create a client from the LLM section of the config
    pub fn new(llm: &LlmConfig) -> Result<Self, ProviderError> {
        let config = ProviderConfig::from_llm_config(llm);
        let api_key = match llm.api_key.clone().filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => Self::get_api_key(&config)?,
        };

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Build(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_key,
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_retries: llm.max_retries,
            http_client,
        })
    }

    /// Get API key from environment (loading .env first)
    fn get_api_key(config: &ProviderConfig) -> Result<String, ProviderError> {
        let _ = dotenvy::dotenv();
        std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey(config.api_key_env.clone()))
    }

    /// Get the provider config
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_messages(
        prompt: &str,
        system_instructions: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_instructions.to_string())
            .build()
            .map_err(|e| ProviderError::Build(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| ProviderError::Build(e.to_string()))?;
        Ok(vec![system.into(), user.into()])
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }
        Ok(response)
    }

    async fn send_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.send_once(body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let wait = backoff(attempt);
                    tracing::warn!(
                        target: "llm",
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "Retrying LLM request"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    async fn call(&self, prompt: &str, system_instructions: &str) -> Result<TextStream, ProviderError> {
        let messages = Self::build_messages(prompt, system_instructions)?;
        let body = serde_json::json!({
            "model": self.config.default_model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true}
        });

        tracing::info!(
            target: "llm",
            provider = %self.config.name,
            model = %self.config.default_model,
            prompt_chars = prompt.len(),
            "Starting streamed LLM call"
        );

        let response = self.send_with_retry(&body).await?;
        let (tx, rx) = mpsc::unbounded_channel::<Result<String, ProviderError>>();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(result) = stream.next().await {
                let decoded = match result {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(e) => Err(ProviderError::Stream(e.to_string())),
                };
                if !forward(decoded, &tx) {
                    return;
                }
            }
            forward(decoder.finish(), &tx);
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_yields_text_in_order() {
        let mut decoder = SseDecoder::default();
        let input = concat!(
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"action: \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"generate_code\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let items = decoder.push(input.as_bytes()).unwrap();
        assert_eq!(
            items,
            vec![
                SseData::Text("action: ".to_string()),
                SseData::Text("generate_code".to_string()),
                SseData::Done
            ]
        );
    }

    #[test]
    fn test_decoder_handles_split_lines_and_utf8() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"均值\"}}]}\n";
        let bytes = line.as_bytes();
        // Split inside the first multi-byte character
        let split = line.find('均').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(
            decoder.push(&bytes[split..]).unwrap(),
            vec![SseData::Text("均值".to_string())]
        );
    }

    #[test]
    fn test_decoder_rejects_malformed_chunk() {
        let mut decoder = SseDecoder::default();
        let err = decoder.push(b"data: {not json}\n").unwrap_err();
        assert!(matches!(err, ProviderError::Stream(_)));

        let mut decoder = SseDecoder::default();
        let err = decoder
            .push(b"data: {\"error\":{\"message\":\"quota exceeded\"}}\n")
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_usage_only_chunk_is_not_text() {
        let mut decoder = SseDecoder::default();
        let items = decoder
            .push(b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5}}\n")
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_unterminated_final_line_is_decoded() {
        let mut decoder = SseDecoder::default();
        let items = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}")
            .unwrap();
        assert!(items.is_empty());

        let items = decoder.finish().unwrap();
        assert!(matches!(items.as_slice(), [SseData::Text(t)] if t == "tail"));
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_forward_stops_at_done() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let items = vec![
            SseData::Text("a".to_string()),
            SseData::Done,
            SseData::Text("b".to_string()),
        ];
        assert!(!forward(Ok(items), &tx));
        assert_eq!(rx.try_recv().unwrap().unwrap(), "a");
        assert!(rx.try_recv().is_err());

        assert!(forward(Ok(vec![SseData::Text("c".to_string())]), &tx));
        assert_eq!(rx.try_recv().unwrap().unwrap(), "c");
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(10), MAX_BACKOFF);
    }

    #[test]
    fn test_messages_serialize_as_chat_format() {
        let messages = ProviderClient::build_messages("user: hi", "be brief").unwrap();
        let value = serde_json::to_value(&messages).unwrap();
        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[0]["content"], "be brief");
        assert_eq!(value[1]["role"], "user");
        assert_eq!(value[1]["content"], "user: hi");
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let llm = LlmConfig {
            api_key: Some("sk-explicit".to_string()),
            ..LlmConfig::default()
        };
        let client = ProviderClient::new(&llm).unwrap();
        assert_eq!(client.api_key, "sk-explicit");
        assert_eq!(client.config().default_model, "qwen-turbo");
    }
}
