//! RLM engine: builds the generator system prompt that enforces the output
//! contract, converts the canonical transcript into backend messages, and
//! parses generator output into `(user_text, tool_intent?)`.

use rants_llm::{CompletionRequest, Message};
use tokio::time::Instant;

use crate::tools::ToolSchema;
use crate::transcript::CanonicalTranscript;

pub const TOOL_INTENT_PREFIX: &str = "TOOL_INTENT:";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratorOutput {
    /// User-visible text with every intent-looking line stripped.
    pub text: String,
    pub tool_intent: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RlmEngine;

impl RlmEngine {
    /// The generator speaks user-facing text only. Tool use is requested by
    /// a single trailing `TOOL_INTENT:` line; the generator never sees or
    /// writes tool JSON.
    pub fn build_system_prompt(
        &self,
        extra_system: Option<&str>,
        schemas: &[ToolSchema],
        tool_choice: &str,
    ) -> String {
        let mut prompt = String::from(
            "You are the generator model for the RANTS gateway. \
             Respond with user-facing text only. \
             If a tool should be used, end your output with exactly one line: \
             TOOL_INTENT: <plain English description of what the tool should do>. \
             Never output JSON, code, schemas, or parameter names for tools, and \
             never include reasoning or analysis blocks.",
        );
        if !schemas.is_empty() {
            prompt.push_str("\n\navailable_tools:");
            for schema in schemas {
                prompt.push_str(&format!("\n- {}: {}", schema.name, schema.description));
            }
            prompt.push_str(&format!("\ntool_choice: {tool_choice}"));
        }
        if let Some(extra) = extra_system {
            if !extra.trim().is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(extra);
            }
        }
        prompt
    }

    /// Render the transcript for the generator: system, user, then per step
    /// the assistant's prior output (with its intent line restored so the
    /// model can see what it already asked for) and the tool observations.
    pub fn build_request(
        &self,
        transcript: &CanonicalTranscript,
        schemas: &[ToolSchema],
        tool_choice: &str,
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        deadline: Instant,
    ) -> CompletionRequest {
        let mut messages = vec![Message::system(self.build_system_prompt(
            transcript.system.as_deref(),
            schemas,
            tool_choice,
        ))];
        messages.push(Message::user(transcript.user.clone()));

        for step in &transcript.steps {
            let mut assistant = step.generator_output.clone();
            if let Some(intent) = &step.tool_intent {
                if !assistant.is_empty() && !assistant.ends_with('\n') {
                    assistant.push('\n');
                }
                assistant.push_str(TOOL_INTENT_PREFIX);
                assistant.push(' ');
                assistant.push_str(intent);
            }
            if !assistant.is_empty() {
                messages.push(Message::assistant(assistant));
            }
            if !step.tool_results.is_empty() {
                let observations: Vec<String> = step
                    .tool_calls
                    .iter()
                    .zip(&step.tool_results)
                    .map(|(call, result)| {
                        format!("{} -> {}", call.tool, result.output)
                    })
                    .collect();
                messages.push(Message::user(format!(
                    "Tool results:\n{}",
                    observations.join("\n")
                )));
            }
        }

        let mut request = CompletionRequest::new(model, messages).with_deadline(deadline);
        request.temperature = temperature;
        request.max_tokens = max_tokens;
        request
    }

    /// Split on the last line matching `^TOOL_INTENT:\s*(.+)$`. Every
    /// intent-prefixed line is stripped from the visible text (terminator
    /// included); only the last one with a non-empty remainder counts as
    /// the intent.
    pub fn parse_output(text: &str) -> GeneratorOutput {
        let mut intent = None;
        let mut visible = String::new();
        for segment in text.split_inclusive('\n') {
            let line = segment.trim_end_matches(['\r', '\n']);
            match line.strip_prefix(TOOL_INTENT_PREFIX) {
                Some(rest) => {
                    let rest = rest.trim();
                    if !rest.is_empty() {
                        intent = Some(rest.to_string());
                    }
                }
                None => visible.push_str(segment),
            }
        }
        GeneratorOutput {
            text: visible,
            tool_intent: intent,
        }
    }
}
