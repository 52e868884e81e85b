//! Tool compiler: turns a plain-English tool intent into a validated
//! `tool_calls` array via the dedicated deterministic backend.
//!
//! Raw compiler output never leaves this module; it is logged at debug and
//! discarded. One repair invocation is attempted on parse or validation
//! failure before the step fails with `ToolCompileError`.

use std::sync::Arc;

use rants_llm::{CompletionRequest, Message, ModelBackend};
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::{ErrorKind, GatewayError};
use crate::tools::{validate_parameters, ToolRegistry};
use crate::transcript::{CanonicalTranscript, ToolCallRecord};

const SYSTEM_PROMPT: &str = "Return JSON only. Schema: {\"tool_calls\": [{\"tool\": <name>, \
                             \"parameters\": <object>}, ...]}. No prose, no code fences.";

pub struct ToolCompiler {
    backend: Arc<dyn ModelBackend>,
    model: String,
    /// Byte budget for the transcript summary; newest context wins.
    compact_context_max_bytes: usize,
}

impl ToolCompiler {
    pub fn new(backend: Arc<dyn ModelBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            compact_context_max_bytes: 8 * 1024,
        }
    }

    pub async fn compile(
        &self,
        registry: &ToolRegistry,
        transcript: &CanonicalTranscript,
        intent: &str,
        deadline: Instant,
    ) -> Result<Vec<ToolCallRecord>, GatewayError> {
        let payload = json!({
            "tool_schemas": registry.schemas(),
            "context": compact_context(transcript, self.compact_context_max_bytes),
            "tool_intent": intent,
        });
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(payload.to_string()),
        ];

        let raw = self.invoke(messages.clone(), deadline).await?;
        match parse_and_validate(&raw, registry) {
            Ok(calls) => return Ok(calls),
            Err(error) => {
                tracing::debug!(%error, "tool compiler output rejected; attempting repair");
                let mut repair_messages = messages;
                repair_messages.push(Message::assistant(raw));
                repair_messages.push(Message::user(format!(
                    "Your previous output was invalid: {error}. \
                     Return the corrected JSON object only."
                )));
                let repaired = self.invoke(repair_messages, deadline).await?;
                parse_and_validate(&repaired, registry).map_err(|error| {
                    GatewayError::new(
                        ErrorKind::ToolCompileError,
                        format!("tool compilation failed after repair: {error}"),
                    )
                })
            }
        }
    }

    async fn invoke(
        &self,
        messages: Vec<Message>,
        deadline: Instant,
    ) -> Result<String, GatewayError> {
        let request = CompletionRequest::new(self.model.clone(), messages)
            .with_temperature(0.0)
            .with_deadline(deadline);
        let result = tokio::time::timeout_at(deadline, self.backend.complete(request))
            .await
            .map_err(|_| GatewayError::deadline_exceeded())??;
        Ok(result.text)
    }
}

/// System + user + the most recent step outputs, clipped head-first so the
/// newest observations always survive the byte budget.
fn compact_context(transcript: &CanonicalTranscript, max_bytes: usize) -> String {
    let mut sections = Vec::new();
    if let Some(system) = &transcript.system {
        sections.push(format!("system: {system}"));
    }
    sections.push(format!("user: {}", transcript.user));
    for step in &transcript.steps {
        if !step.generator_output.trim().is_empty() {
            sections.push(format!("assistant: {}", step.generator_output.trim()));
        }
        for (call, result) in step.tool_calls.iter().zip(&step.tool_results) {
            sections.push(format!("{} -> {}", call.tool, result.output));
        }
    }

    let mut context = sections.join("\n");
    if context.len() > max_bytes {
        let mut start = context.len() - max_bytes;
        while start < context.len() && !context.is_char_boundary(start) {
            start += 1;
        }
        context = context.split_off(start);
    }
    context
}

fn parse_and_validate(raw: &str, registry: &ToolRegistry) -> Result<Vec<ToolCallRecord>, String> {
    let parsed = parse_tool_calls(raw)?;
    let mut calls = Vec::with_capacity(parsed.len());
    for (index, entry) in parsed.into_iter().enumerate() {
        let tool = entry
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("entry {index} is missing a 'tool' name"))?
            .to_string();
        let registered = registry
            .get(&tool)
            .ok_or_else(|| format!("entry {index} names unknown tool '{tool}'"))?;
        let parameters = entry
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));
        validate_parameters(&registered.schema.schema, &parameters)
            .map_err(|error| format!("entry {index} ('{tool}'): {error}"))?;
        calls.push(ToolCallRecord {
            id: Uuid::new_v4(),
            tool,
            parameters,
        });
    }
    Ok(calls)
}

/// Tolerant parse: the raw body as JSON, the contents of a single top-level
/// code fence, or the first balanced JSON object in the text.
fn parse_tool_calls(raw: &str) -> Result<Vec<Value>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("compiler returned an empty body".to_string());
    }

    let candidates = [
        Some(raw.to_string()),
        strip_code_fence(raw),
        first_balanced_object(raw),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return extract_calls(&value);
        }
    }
    Err("no JSON object with a 'tool_calls' array was found".to_string())
}

fn extract_calls(value: &Value) -> Result<Vec<Value>, String> {
    let calls = value
        .get("tool_calls")
        .ok_or_else(|| "top-level object is missing 'tool_calls'".to_string())?
        .as_array()
        .ok_or_else(|| "'tool_calls' must be an array".to_string())?;
    Ok(calls.iter().filter(|call| call.is_object()).cloned().collect())
}

fn strip_code_fence(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix("```")?;
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.rfind("```")?;
    Some(rest[..end].trim().to_string())
}

fn first_balanced_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, character) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match character {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::default_registry;
    use crate::transcript::Step;

    #[test]
    fn raw_json_body_parses() {
        let registry = default_registry();
        let raw = r#"{"tool_calls": [{"tool": "bash", "parameters": {"command": "ls"}}]}"#;
        let calls = parse_and_validate(raw, &registry).expect("valid payload");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "bash");
    }

    #[test]
    fn fenced_body_parses() {
        let registry = default_registry();
        let raw = "```json\n{\"tool_calls\": [{\"tool\": \"ls\", \"parameters\": {}}]}\n```";
        let calls = parse_and_validate(raw, &registry).expect("fenced payload");
        assert_eq!(calls[0].tool, "ls");
    }

    #[test]
    fn prose_wrapped_object_parses_via_balanced_scan() {
        let registry = default_registry();
        let raw = "Here you go: {\"tool_calls\": [{\"tool\": \"ls\", \"parameters\": {}}]} done";
        let calls = parse_and_validate(raw, &registry).expect("embedded payload");
        assert_eq!(calls[0].tool, "ls");
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let registry = default_registry();
        let raw = r#"{"tool_calls": [{"tool": "nuke", "parameters": {}}]}"#;
        let error = parse_and_validate(raw, &registry).expect_err("unknown tool");
        assert!(error.contains("unknown tool 'nuke'"));
    }

    #[test]
    fn schema_violation_is_rejected_with_detail() {
        let registry = default_registry();
        let raw = r#"{"tool_calls": [{"tool": "bash", "parameters": {}}]}"#;
        let error = parse_and_validate(raw, &registry).expect_err("missing command");
        assert!(error.contains("missing required parameter 'command'"));
    }

    #[test]
    fn balanced_scan_ignores_braces_inside_strings() {
        let raw = r#"note {"tool_calls": [{"tool": "bash", "parameters": {"command": "echo {"}}]}"#;
        let object = first_balanced_object(raw).expect("balanced object");
        assert!(serde_json::from_str::<Value>(&object).is_ok());
    }

    #[test]
    fn compact_context_keeps_the_newest_bytes() {
        let mut transcript = CanonicalTranscript::new(Some("sys".to_string()), "question", &[]);
        let mut step = Step::begin();
        step.generator_output = "old ".repeat(100);
        transcript.steps.push(step);
        let mut last = Step::begin();
        last.generator_output = "NEWEST".to_string();
        transcript.steps.push(last);

        let context = compact_context(&transcript, 64);
        assert!(context.len() <= 64);
        assert!(context.contains("NEWEST"));
    }
}
