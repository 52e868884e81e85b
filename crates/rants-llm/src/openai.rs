use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::unbounded;
use futures::StreamExt;
use rand::Rng;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::backend::{ModelBackend, TokenStream};
use crate::errors::BackendError;
use crate::types::{CompletionRequest, CompletionResult, Usage};

const UPSTREAM_BODY_EXCERPT_BYTES: usize = 2048;

/// Retry behavior shared by every request this backend makes.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

/// OpenAI-compatible HTTP adapter over a configured `base_url`.
pub struct OpenAiBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAiBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        policy: RetryPolicy,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
            policy,
        }
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }
        body
    }

    /// Per-attempt timeout: the configured request timeout, clipped to
    /// whatever wallclock the caller has left.
    fn attempt_timeout(&self, deadline: Option<Instant>) -> Result<Duration, BackendError> {
        let Some(deadline) = deadline else {
            return Ok(self.policy.request_timeout);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BackendError::Timeout(Duration::ZERO));
        }
        Ok(self.policy.request_timeout.min(remaining))
    }

    async fn send_once(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let timeout = self.attempt_timeout(request.deadline)?;
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(timeout)
            .json(&Self::request_body(request, stream));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                BackendError::Timeout(timeout)
            } else {
                BackendError::Connect(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::UpstreamStatus {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }
        Ok(response)
    }

    async fn send_with_retries(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(request, stream).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        backend = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying backend request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff.as_secs_f64() * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..self.policy.backoff.as_secs_f64().max(0.001));
        Duration::from_secs_f64(base + jitter)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, BackendError> {
        let response = self.send_with_retries(&request, false).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|error| BackendError::Decode(error.to_string()))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = Usage {
            input_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: payload["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };
        Ok(CompletionResult { text, usage })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, BackendError> {
        let response = self.send_with_retries(&request, true).await?;
        let (tx, rx) = unbounded::<Result<String, BackendError>>();

        tokio::spawn(async move {
            let mut parser = crate::sse::SseParser::new();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        let _ = tx.unbounded_send(Err(BackendError::Stream(error.to_string())));
                        return;
                    }
                };
                let text = String::from_utf8_lossy(&chunk);
                for payload in parser.push(&text) {
                    if payload.trim() == "[DONE]" {
                        return;
                    }
                    if let Some(delta) = delta_content(&payload) {
                        if !delta.is_empty() && tx.unbounded_send(Ok(delta)).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(rx))
    }

    async fn healthy(&self) -> bool {
        let mut builder = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(2));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        matches!(builder.send().await, Ok(response) if response.status().is_success())
    }
}

fn delta_content(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
}

fn excerpt(body: &str) -> String {
    if body.len() <= UPSTREAM_BODY_EXCERPT_BYTES {
        return body.to_string();
    }
    let mut end = UPSTREAM_BODY_EXCERPT_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
