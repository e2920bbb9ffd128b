use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use tutor_core::{ChatGenerator, ChatMessage, ChatRole, FinishReason, GeneratorChunk, GeneratorError};

/// OpenAI-chat-completions-compatible client, blocking and streaming
/// (spec §6 "Generator collaborator"), grounded on the request/response
/// and retry-classification style of `codegraph-ai::openai_llm_provider`.
pub struct HttpChatGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    #[serde(default)]
    content: String,
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

impl HttpChatGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            max_tokens,
            temperature,
        }
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: &m.content,
            })
            .collect()
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Classifies a non-2xx response into the generator error taxonomy
    /// (spec §7): 429 -> rate limit, 404 -> model not found, 5xx ->
    /// service unavailable, a body mentioning context length -> context
    /// length, otherwise unknown.
    async fn classify_error_response(response: reqwest::Response) -> GeneratorError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::TOO_MANY_REQUESTS => GeneratorError::RateLimit(body),
            StatusCode::NOT_FOUND => GeneratorError::ModelNotFound(body),
            s if s.is_server_error() => GeneratorError::ServiceUnavailable(body),
            s if s == StatusCode::BAD_REQUEST && body.to_lowercase().contains("context") => {
                GeneratorError::ContextLength(body)
            }
            _ => GeneratorError::Unknown(format!("{status}: {body}")),
        }
    }

    fn classify_transport_error(e: reqwest::Error) -> GeneratorError {
        if e.is_timeout() {
            GeneratorError::Timeout(e.to_string())
        } else if e.is_connect() {
            GeneratorError::Connection(e.to_string())
        } else {
            GeneratorError::Unknown(e.to_string())
        }
    }
}

#[async_trait]
impl ChatGenerator for HttpChatGenerator {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GeneratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .request_builder("/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_error_response(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Unknown(format!("failed to parse completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GeneratorError::Unknown("completion response had no choices".to_string()))
    }

    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>, GeneratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .request_builder("/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_error_response(response).await);
        }

        let (tx, rx) = mpsc::channel(DEFAULT_STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut carry = String::new();

            while let Some(next) = byte_stream.next().await {
                // Consumer dropped the receiver: stop pulling from the
                // upstream connection promptly (spec §5 "Cancellation").
                if tx.is_closed() {
                    return;
                }

                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(Self::classify_transport_error(e))).await;
                        return;
                    }
                };

                carry.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = carry.find('\n') {
                    let line = carry[..newline].trim_end_matches('\r').to_string();
                    carry.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if payload == "[DONE]" {
                        return;
                    }

                    let chunk: ChatStreamChunk = match serde_json::from_str(payload) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed SSE chunk from generator backend");
                            continue;
                        }
                    };

                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    let finish_reason = match choice.finish_reason.as_deref() {
                        Some("length") => Some(FinishReason::Length),
                        Some(_) => Some(FinishReason::Stop),
                        None => None,
                    };

                    if tx
                        .send(Ok(GeneratorChunk {
                            delta: choice.delta.content,
                            finish_reason,
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .send()
            .await
            .ok()
            .and_then(|r| if r.status().is_success() { Some(()) } else { None })
            .is_some()
    }
}

/// Bounded rendezvous between the backend's upstream SSE connection and
/// the generator's own consumer (spec §9 "Backpressure").
const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 4;
