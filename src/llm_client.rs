// src/llm_client.rs
//
// Client for the internal inference gateway (OpenAI-compatible API in front
// of the self-hosted Llama 3 8B Instruct deployment). Non-streaming calls
// retry transient failures with exponential backoff; streaming calls hand
// deltas to the caller through a bounded channel.
use crate::errors::ChatError;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

const MODEL_NAME: &str = "meta-llama-3-8b-instruct";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayMessage {
    pub role: String,
    pub content: String,
}

impl GatewayMessage {
    pub fn system(content: impl Into<String>) -> Self {
        GatewayMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        GatewayMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<GatewayMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: GatewayMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

impl LlmClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model: MODEL_NAME.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_chat(&self, messages: Vec<GatewayMessage>) -> Result<String, String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.0,
            max_tokens: 2048,
            stream: false,
        };

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(300)),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("content-type", "application/json")
                .timeout(REQUEST_TIMEOUT)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("inference gateway connection error (retrying): {}", e);
                        backoff::Error::transient(format!("Connection error: {}", e))
                    } else {
                        tracing::error!("inference gateway permanent error: {}", e);
                        backoff::Error::permanent(format!("Request error: {}", e))
                    }
                })?;

            let status = response.status();
            let response_text = response
                .text()
                .await
                .map_err(|e| backoff::Error::permanent(format!("Failed to read response: {}", e)))?;

            // Retry on 503, 502, 429 (rate limit), 500 errors
            if matches!(status.as_u16(), 500 | 502 | 503 | 429) {
                tracing::warn!("inference gateway returned {} (retrying)", status);
                return Err(backoff::Error::transient(format!(
                    "API error ({}): {}",
                    status, response_text
                )));
            }

            if !status.is_success() {
                tracing::error!("inference gateway error ({}): {}", status, response_text);
                return Err(backoff::Error::permanent(format!(
                    "API error ({}): {}",
                    status, response_text
                )));
            }

            serde_json::from_str::<ChatCompletionResponse>(&response_text).map_err(|e| {
                backoff::Error::permanent(format!("Failed to parse response: {}", e))
            })
        };

        let response = retry(backoff_config, operation).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "No choices in gateway response".to_string())
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String, String> {
        self.generate_chat(vec![GatewayMessage::user(prompt)]).await
    }

    /// Streams completion deltas. The returned receiver yields text fragments
    /// in generation order, then closes; a failed stream surfaces the error
    /// as its final item.
    pub async fn stream_chat(
        &self,
        messages: Vec<GatewayMessage>,
    ) -> Result<mpsc::Receiver<Result<String, String>>, String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.0,
            max_tokens: 2048,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Request error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("API error ({}): {}", status, body));
        }

        let (tx, rx) = mpsc::channel(16);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(format!("Stream read error: {}", e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // The gateway frames deltas as SSE lines: "data: {json}\n\n"
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() || payload == "[DONE]" {
                        continue;
                    }

                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            let delta = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(delta) = delta {
                                if tx.send(Ok(delta)).await.is_err() {
                                    // Consumer hung up; stop reading.
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!("skipping malformed stream frame: {}", e);
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Single-prompt completion seam shared by the title generator and the
/// guardrails classifier, so both can be tested against a scripted model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError>;
}

#[async_trait]
impl CompletionModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        self.generate_text(prompt).await.map_err(ChatError::Llm)
    }
}
