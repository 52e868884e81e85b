//! `POST /v1/chat/completions`: the OpenAI chat shim.
//!
//! Without `tools` the request runs the normal loop. With `tools` the shim
//! runs exactly one generation + compilation and hands the resulting calls
//! back to the client in OpenAI `tool_calls` form, executing nothing; the
//! client sends `role:"tool"` follow-ups which are treated as the ground
//! truth transcript for that turn and are not persisted as a session.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{authenticate, check_rate_limit};
use super::AppState;
use crate::errors::GatewayError;
use crate::events::NoopEventSink;
use crate::orchestrator::{RunOptions, RunResult};
use crate::response::{ChatCompletion, ChatMessage, ChatToolCall, ChatToolFunction};
use crate::streaming::chunk_text;

const CHUNK_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionsRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionsRequest>,
) -> Response {
    let tenant_id = match authenticate(&state, &headers) {
        Ok(tenant_id) => tenant_id,
        Err(response) => return response,
    };
    if let Err(response) = check_rate_limit(&state, &tenant_id) {
        return response;
    }

    let shim_mode = !request.tools.is_empty();
    let options = match build_options(&state, &tenant_id, &request, shim_mode) {
        Ok(options) => options,
        Err(error) => return error.into_response(),
    };

    let result = match state.orchestrator.run(options, Arc::new(NoopEventSink)).await {
        Ok(result) => result,
        Err(error) => return error.into_response(),
    };

    let text = result.response.output_text();
    let tool_calls = shim_tool_calls(&result, shim_mode);
    let finish_reason = if tool_calls.is_some() { "tool_calls" } else { "stop" };
    let created = result.response.created_at as i64;
    let completion_id = format!(
        "chatcmpl-{}",
        result
            .response
            .id
            .strip_prefix("resp_")
            .unwrap_or(&result.response.id)
    );
    let model = result.response.model.clone();

    if request.stream {
        return stream_chunks(completion_id, created, model, text, tool_calls, finish_reason);
    }

    let message = ChatMessage {
        role: "assistant".to_string(),
        content: if text.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(text)
        },
        tool_calls,
    };
    Json(ChatCompletion::new(
        completion_id,
        created,
        model,
        message,
        finish_reason,
    ))
    .into_response()
}

fn build_options(
    state: &AppState,
    tenant_id: &str,
    request: &ChatCompletionsRequest,
    shim_mode: bool,
) -> Result<RunOptions, GatewayError> {
    let virtual_model = &state.config.rlm.rants_one.name;
    let model = request
        .model
        .as_deref()
        .ok_or_else(|| GatewayError::bad_request("model is required"))?;
    if model != virtual_model {
        return Err(GatewayError::bad_request(format!("unknown model '{model}'")));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::bad_request("messages must not be empty"));
    }

    let (system, user) = normalize_messages(&request.messages);
    if user.trim().is_empty() {
        return Err(GatewayError::bad_request("messages carry no text content"));
    }

    let mut options = RunOptions::new(tenant_id, model, user);
    options.system = system;
    options.temperature = request.temperature;
    options.max_output_tokens = request.max_tokens;
    options.tool_choice = request
        .tool_choice
        .as_ref()
        .and_then(Value::as_str)
        .unwrap_or("auto")
        .to_string();
    // Shim turns are client-owned: one generation + compilation, nothing
    // executed, nothing persisted.
    options.execute_tools = !shim_mode;
    options.persist = !shim_mode;
    Ok(options)
}

/// Flatten `messages[]` into a system prompt plus role-prefixed lines.
/// `role:"tool"` entries ride along as observations, making the incoming
/// message list the full ground truth for the turn.
fn normalize_messages(messages: &[Value]) -> (Option<String>, String) {
    let mut system_parts = Vec::new();
    let mut lines = Vec::new();
    for message in messages {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user");
        let text = match message.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter(|part| {
                    matches!(
                        part.get("type").and_then(Value::as_str),
                        Some("text") | Some("input_text")
                    )
                })
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        };
        if text.is_empty() {
            continue;
        }
        if role == "system" {
            system_parts.push(text);
        } else {
            lines.push(format!("{role}: {text}"));
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, lines.join("\n"))
}

fn shim_tool_calls(result: &RunResult, shim_mode: bool) -> Option<Vec<ChatToolCall>> {
    if !shim_mode {
        return None;
    }
    let calls = result.last_step_tool_calls();
    if calls.is_empty() {
        return None;
    }
    Some(
        calls
            .iter()
            .map(|call| ChatToolCall {
                id: format!("call_{}", call.id.simple()),
                call_type: "function".to_string(),
                function: ChatToolFunction {
                    name: call.tool.clone(),
                    arguments: call.parameters.to_string(),
                },
            })
            .collect(),
    )
}

fn stream_chunks(
    id: String,
    created: i64,
    model: String,
    text: String,
    tool_calls: Option<Vec<ChatToolCall>>,
    finish_reason: &str,
) -> Response {
    let chunk = |delta: Value, finish: Option<&str>| {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish,
            }],
        })
        .to_string()
    };

    let mut frames = Vec::new();
    for piece in chunk_text(&text, CHUNK_SIZE) {
        frames.push(chunk(json!({ "content": piece }), None));
    }
    if let Some(calls) = &tool_calls {
        let indexed: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let mut value = serde_json::to_value(call).unwrap_or_default();
                value["index"] = json!(index);
                value
            })
            .collect();
        frames.push(chunk(json!({ "tool_calls": indexed }), None));
    }
    frames.push(chunk(json!({}), Some(finish_reason)));
    frames.push("[DONE]".to_string());

    let events = stream::iter(
        frames
            .into_iter()
            .map(|data| Ok::<_, Infallible>(Event::default().data(data))),
    );
    Sse::new(events).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_tool_observations_in_order() {
        let messages = vec![
            json!({"role": "system", "content": "be brief"}),
            json!({"role": "user", "content": "fix the readme"}),
            json!({"role": "tool", "content": "{\"ok\": true}"}),
        ];
        let (system, user) = normalize_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(user, "user: fix the readme\ntool: {\"ok\": true}");
    }

    #[test]
    fn content_part_arrays_are_flattened() {
        let messages = vec![json!({
            "role": "user",
            "content": [{"type": "text", "text": "hello"}],
        })];
        let (_, user) = normalize_messages(&messages);
        assert_eq!(user, "user: hello");
    }
}
