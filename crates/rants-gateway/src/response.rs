//! External wire shapes: the `/v1/responses` response object and the
//! `/v1/chat/completions` envelope, matching the OpenAI formats the
//! original gateway emits byte-for-byte at the field level.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::transcript::SessionStatus;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputTextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
    pub annotations: Vec<Value>,
}

impl OutputTextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            content_type: "output_text".to_string(),
            text: text.into(),
            annotations: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub id: String,
    pub status: String,
    pub role: String,
    pub content: Vec<OutputTextContent>,
}

impl OutputMessage {
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_type: "message".to_string(),
            id: id.into(),
            status: "completed".to_string(),
            role: "assistant".to_string(),
            content: vec![OutputTextContent::new(text)],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    pub object: String,
    pub created_at: f64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub model: String,
    pub output: Vec<OutputMessage>,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub text: Value,
    pub tool_choice: Value,
    pub tools: Vec<Value>,
    pub truncation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ResponseObject {
    pub fn new(model: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: format!("resp_{}", Uuid::new_v4().simple()),
            object: "response".to_string(),
            created_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            status: SessionStatus::Running.as_str().to_string(),
            error: None,
            model: model.into(),
            output: Vec::new(),
            parallel_tool_calls: true,
            previous_response_id: None,
            store: true,
            temperature: None,
            text: serde_json::json!({ "format": { "type": "text" } }),
            tool_choice: Value::String("auto".to_string()),
            tools: Vec::new(),
            truncation: "disabled".to_string(),
            usage: None,
            user: Some(tenant_id.into()),
        }
    }

    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|message| &message.content)
            .map(|content| content.text.as_str())
            .collect()
    }
}

/// `chat.completion` tool call in OpenAI function form; `arguments` is the
/// JSON-encoded parameter object, not the object itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ChatToolFunction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatToolFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletion {
    pub fn new(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        message: ChatMessage,
        finish_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion".to_string(),
            created,
            model: model.into(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: finish_reason.into(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_object_serializes_expected_static_fields() {
        let mut response = ResponseObject::new("rants_one", "anonymous");
        response.output.push(OutputMessage::assistant("msg_1", "hi"));
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["object"], "response");
        assert_eq!(value["truncation"], "disabled");
        assert_eq!(value["text"]["format"]["type"], "text");
        assert_eq!(value["output"][0]["content"][0]["type"], "output_text");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn output_text_concatenates_content_parts() {
        let mut response = ResponseObject::new("rants_one", "anonymous");
        response.output.push(OutputMessage::assistant("msg_1", "a"));
        response.output.push(OutputMessage::assistant("msg_2", "b"));
        assert_eq!(response.output_text(), "ab");
    }
}
