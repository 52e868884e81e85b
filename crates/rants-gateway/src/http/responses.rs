//! `POST /v1/responses`: the primary path. The gateway runs the full loop,
//! executes tools itself, and either returns the finished response object
//! or streams the loop as SSE.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use super::auth::{authenticate, check_rate_limit};
use super::AppState;
use crate::errors::GatewayError;
use crate::events::{ChannelEventSink, NoopEventSink, SessionEvent};
use crate::orchestrator::RunOptions;
use crate::streaming::ResponsesSseEncoder;

/// Recognized request fields; anything else is silently ignored. Client
/// `tools` are accepted on the wire, but the fixed registry governs which
/// tools can actually compile and execute.
#[derive(Debug, Deserialize)]
pub struct ResponsesRequest {
    pub model: Option<String>,
    pub input: Option<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub previous_response_id: Option<String>,
}

pub async fn create_response(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResponsesRequest>,
) -> Response {
    let tenant_id = match authenticate(&state, &headers) {
        Ok(tenant_id) => tenant_id,
        Err(response) => return response,
    };
    if let Err(response) = check_rate_limit(&state, &tenant_id) {
        return response;
    }

    let options = match build_options(&state, &tenant_id, &request) {
        Ok(options) => options,
        Err(error) => return error.into_response(),
    };

    if request.stream {
        let (sink, rx) = ChannelEventSink::pair();
        let orchestrator = state.orchestrator.clone();
        tokio::spawn(async move {
            let _ = orchestrator.run(options, Arc::new(sink)).await;
        });

        let mut encoder = ResponsesSseEncoder::new();
        let frames = rx.flat_map(move |event| {
            let terminal = matches!(
                event,
                SessionEvent::Completed { .. } | SessionEvent::Failed { .. }
            );
            let mut out: Vec<Result<Event, Infallible>> = encoder
                .encode(&event)
                .into_iter()
                .map(|frame| Ok(Event::default().data(frame.data)))
                .collect();
            if terminal {
                out.push(Ok(Event::default().data("[DONE]")));
            }
            stream::iter(out)
        });
        return Sse::new(frames).into_response();
    }

    match state.orchestrator.run(options, Arc::new(NoopEventSink)).await {
        Ok(result) => Json(result.response).into_response(),
        Err(error) => error.into_response(),
    }
}

fn build_options(
    state: &AppState,
    tenant_id: &str,
    request: &ResponsesRequest,
) -> Result<RunOptions, GatewayError> {
    let virtual_model = &state.config.rlm.rants_one.name;
    let model = request
        .model
        .as_deref()
        .ok_or_else(|| GatewayError::bad_request("model is required"))?;
    if model != virtual_model {
        return Err(GatewayError::bad_request(format!("unknown model '{model}'")));
    }

    let input = request
        .input
        .as_ref()
        .ok_or_else(|| GatewayError::bad_request("input is required"))?;
    let (system, user) = normalize_input(input)?;
    if user.trim().is_empty() {
        return Err(GatewayError::bad_request("input must not be empty"));
    }

    let mut options = RunOptions::new(tenant_id, model, user);
    options.system = system;
    options.previous_response_id = request.previous_response_id.clone();
    options.temperature = request.temperature;
    options.max_output_tokens = request.max_output_tokens;
    options.tool_choice = request
        .tool_choice
        .as_ref()
        .map(tool_choice_label)
        .unwrap_or_else(|| "auto".to_string());
    options.stream_generator = request.stream;
    Ok(options)
}

fn tool_choice_label(value: &Value) -> String {
    match value {
        Value::String(label) => label.clone(),
        other => other.to_string(),
    }
}

/// Normalize `input` (string, or array of `{role, content}` where content
/// is a string or `input_text` parts) into an optional system prompt plus
/// the user text.
pub fn normalize_input(input: &Value) -> Result<(Option<String>, String), GatewayError> {
    match input {
        Value::String(text) => Ok((None, text.clone())),
        Value::Array(items) => {
            let mut system_parts = Vec::new();
            let mut user_parts = Vec::new();
            for item in items {
                let role = item
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("user");
                let text = content_text(item.get("content"));
                if text.is_empty() {
                    continue;
                }
                if role == "system" {
                    system_parts.push(text);
                } else {
                    user_parts.push(text);
                }
            }
            let system = if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n"))
            };
            Ok((system, user_parts.join("\n")))
        }
        _ => Err(GatewayError::bad_request(
            "input must be a string or an array of messages",
        )),
    }
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| {
                matches!(
                    part.get("type").and_then(Value::as_str),
                    Some("input_text") | Some("text")
                )
            })
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_input_passes_through() {
        let (system, user) = normalize_input(&json!("hello")).expect("string input");
        assert!(system.is_none());
        assert_eq!(user, "hello");
    }

    #[test]
    fn message_array_splits_system_from_user() {
        let input = json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": [{"type": "input_text", "text": "hi"}]},
        ]);
        let (system, user) = normalize_input(&input).expect("message array");
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(user, "hi");
    }

    #[test]
    fn non_message_input_is_rejected() {
        assert!(normalize_input(&json!(42)).is_err());
    }

    #[test]
    fn unknown_request_fields_are_ignored() {
        let raw = json!({
            "model": "rants_one",
            "input": "hi",
            "reasoning": {"effort": "high"},
            "wibble": true,
        });
        let request: ResponsesRequest =
            serde_json::from_value(raw).expect("unknown fields ignored");
        assert_eq!(request.model.as_deref(), Some("rants_one"));
        assert!(!request.stream);
    }
}
