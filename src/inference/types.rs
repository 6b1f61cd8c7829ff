//! Shared types for the inference client.
//!
//! These mirror the Gemini `generateContent` API, used both for request
//! building and response parsing. Conversation history is a `Vec<Content>`.

use serde::{Deserialize, Serialize};

// ─── Conversation ────────────────────────────────────────────────────────────

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn model() -> Self {
        Role::Model
    }
}

/// One role-tagged turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default = "Role::model")]
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A user turn holding plain text.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    /// A model turn recording a function call.
    pub fn model_function_call(call: FunctionCall) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::function_call(call)],
        }
    }

    /// A user turn carrying function responses.
    pub fn user_function_responses(responses: Vec<FunctionResponse>) -> Self {
        Self {
            role: Role::User,
            parts: responses.into_iter().map(Part::function_response).collect(),
        }
    }
}

/// A single part of a turn, as it appears on the wire.
///
/// Exactly one of `text`, `function_call` or `function_response` is expected
/// to be set; use [`Part::kind`] to branch on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(
        default,
        rename = "functionCall",
        skip_serializing_if = "Option::is_none"
    )]
    pub function_call: Option<FunctionCall>,
    #[serde(
        default,
        rename = "functionResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub function_response: Option<FunctionResponse>,
    /// Set on reasoning summaries emitted by thinking models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    /// Opaque signature that must be echoed back with the part.
    #[serde(
        default,
        rename = "thoughtSignature",
        skip_serializing_if = "Option::is_none"
    )]
    pub thought_signature: Option<String>,
}

/// Typed view of a [`Part`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartKind<'a> {
    Text(&'a str),
    FunctionCall(&'a FunctionCall),
    FunctionResponse(&'a FunctionResponse),
    /// Inline data, executable code and other kinds this client ignores.
    Other,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Default::default()
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> PartKind<'_> {
        match (&self.function_call, &self.function_response, &self.text) {
            (Some(call), _, _) => PartKind::FunctionCall(call),
            (None, Some(response), _) => PartKind::FunctionResponse(response),
            (None, None, Some(text)) => PartKind::Text(text),
            (None, None, None) => PartKind::Other,
        }
    }

    pub fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        let args = match args {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            name: name.into(),
            args,
        }
    }

    /// Arguments as a JSON object value.
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::Value::Object(self.args.clone())
    }
}

/// The result of a function call, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

impl FunctionResponse {
    /// Wrap a text result the way the conversation loop reports tool output.
    pub fn text_result(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: serde_json::json!({ "result": text.into() }),
        }
    }
}

// ─── Tool Declarations ───────────────────────────────────────────────────────

/// A callable the model may request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The tool block of a request: every declaration the model may call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelToolSpec {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

impl ModelToolSpec {
    pub fn is_empty(&self) -> bool {
        self.function_declarations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.function_declarations.len()
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Sampling settings sent with every request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationConfig {
    fn is_unset(&self) -> bool {
        self.temperature.is_none() && self.max_output_tokens.is_none()
    }
}

/// Request body for `POST {model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireToolSpec>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(rename = "generationConfig", skip_serializing_if = "GenerationConfig::is_unset")]
    pub generation_config: GenerationConfig,
}

/// System instruction block (role-less content).
#[derive(Debug, Clone, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

/// Declarations as serialized for the API, after schema cleanup.
#[derive(Debug, Clone, Serialize)]
pub struct WireToolSpec {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Response body of `generateContent`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    pub prompt_feedback: Option<serde_json::Value>,
    #[serde(default, rename = "usageMetadata")]
    pub usage_metadata: Option<UsageMetadata>,
}

/// One generated candidate. Only the first is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default, rename = "finishReason")]
    pub finish_reason: Option<String>,
}

/// Token accounting reported by the API.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    pub prompt_token_count: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    pub candidates_token_count: u64,
}

impl ModelResponse {
    /// A response whose first candidate is `content`.
    pub fn from_content(content: Content) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(content),
                finish_reason: Some("STOP".into()),
            }],
            ..Default::default()
        }
    }

    /// The turn to append to history, if the model produced one.
    pub fn content(&self) -> Option<&Content> {
        self.candidates.first().and_then(|c| c.content.as_ref())
    }

    /// Concatenated answer text, excluding thought parts.
    ///
    /// `None` when the response carries no text at all.
    pub fn text(&self) -> Option<String> {
        let content = self.content()?;
        let mut out: Option<String> = None;
        for part in content.parts.iter().filter(|p| !p.is_thought()) {
            if let PartKind::Text(text) = part.kind() {
                out.get_or_insert_with(String::new).push_str(text);
            }
        }
        out
    }

    /// Every function call in the response, in emission order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| match p.kind() {
                        PartKind::FunctionCall(call) => Some(call),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Why generation produced no candidate, if the prompt was blocked.
    pub fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
