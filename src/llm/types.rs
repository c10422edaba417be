//! Wire types for the provider's stateful Responses endpoint.
//!
//! Only the parts of the protocol the agent consumes are modeled; everything
//! else rides along in the raw JSON kept for the session log.

use serde::{Deserialize, Serialize};

/// A function tool advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// One content part of an input message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    InputImage { file_id: String },
    InputFile { file_id: String },
}

/// One item of a request's `input` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    Message(InputMessage),
    FunctionCallOutput(FunctionCallOutput),
}

impl InputItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        InputItem::Message(InputMessage {
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: text.into() }],
        })
    }

    pub fn user_parts(content: Vec<ContentPart>) -> Self {
        InputItem::Message(InputMessage {
            role: "user".to_string(),
            content,
        })
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        InputItem::FunctionCallOutput(FunctionCallOutput {
            kind: "function_call_output".to_string(),
            call_id: call_id.into(),
            output: output.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallOutput {
    #[serde(rename = "type")]
    pub kind: String,
    pub call_id: String,
    pub output: String,
}

/// Request body for creating a response.
#[derive(Debug, Clone, Serialize)]
pub struct CreateResponseRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// One item of a response's `output` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

/// A parsed provider response, with the raw JSON retained for logging.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub id: String,
    pub output: Vec<OutputItem>,
    pub raw: serde_json::Value,
}

impl ProviderResponse {
    /// Concatenated text of all message items.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for item in &self.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if let OutputContent::OutputText { text: t } = part {
                        text.push_str(t);
                    }
                }
            }
        }
        text
    }

    /// All function calls, in the order the model returned them.
    pub fn function_calls(&self) -> Vec<(&str, &str, &str)> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => Some((call_id.as_str(), name.as_str(), arguments.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// An uploaded provider file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_items_serialize_to_wire_shapes() {
        let message = serde_json::to_value(InputItem::user_text("hello")).unwrap();
        assert_eq!(message["role"], "user");
        assert_eq!(message["content"][0]["type"], "input_text");

        let output = serde_json::to_value(InputItem::function_call_output("call_1", "done")).unwrap();
        assert_eq!(output["type"], "function_call_output");
        assert_eq!(output["call_id"], "call_1");

        let image = serde_json::to_value(InputItem::user_parts(vec![ContentPart::InputImage {
            file_id: "file-abc".to_string(),
        }]))
        .unwrap();
        assert_eq!(image["content"][0]["type"], "input_image");
        assert_eq!(image["content"][0]["file_id"], "file-abc");
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let request = CreateResponseRequest {
            model: "m".to_string(),
            input: vec![],
            instructions: None,
            previous_response_id: Some("resp_1".to_string()),
            tools: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("instructions").is_none());
        assert!(value.get("tools").is_none());
        assert_eq!(value["previous_response_id"], "resp_1");
    }

    #[test]
    fn test_output_parsing_tolerates_unknown_items() {
        let raw = serde_json::json!([
            {"type": "reasoning", "summary": []},
            {"type": "message", "role": "assistant", "content": [
                {"type": "output_text", "text": "hi"},
            ]},
            {"type": "function_call", "call_id": "c1", "name": "add_clips", "arguments": "{}"},
        ]);
        let output: Vec<OutputItem> = serde_json::from_value(raw.clone()).unwrap();
        let response = ProviderResponse {
            id: "resp_1".to_string(),
            output,
            raw,
        };
        assert_eq!(response.text(), "hi");
        let calls = response.function_calls();
        assert_eq!(calls, vec![("c1", "add_clips", "{}")]);
    }
}
