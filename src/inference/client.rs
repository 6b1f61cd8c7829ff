//! Gemini inference client.
//!
//! Sends `generateContent` requests carrying the conversation history and
//! the tool declarations, and decodes the structured response. One request,
//! one response: no streaming, no retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::types::{
    Content, GenerateContentRequest, GenerationConfig, ModelResponse, ModelToolSpec, Part,
    SystemInstruction, WireFunctionDeclaration, WireToolSpec,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON Schema keywords the API rejects inside function parameters.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties", "title", "default"];

/// Longest error body kept in an `HttpError`.
const MAX_ERROR_BODY: usize = 2000;

// ─── ResponseDriver ──────────────────────────────────────────────────────────

/// Produces one model response for a history and a tool catalog.
#[async_trait]
pub trait ResponseDriver: Send + Sync {
    async fn generate(
        &self,
        history: &[Content],
        tools: &ModelToolSpec,
    ) -> Result<ModelResponse, InferenceError>;
}

// ─── GeminiClient ────────────────────────────────────────────────────────────

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: HttpClient,
    config: ModelConfig,
    api_key: String,
}

impl GeminiClient {
    /// Create a client from the model configuration.
    ///
    /// Resolves the API key up front; does NOT check connectivity.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        let api_key = config.resolved_api_key()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// The configured model name.
    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn api_url(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model_name
        )
    }

    /// Build the request body for one call.
    pub fn build_request(&self, history: &[Content], tools: &ModelToolSpec) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: history.to_vec(),
            tools: to_wire_tools(tools),
            system_instruction: self
                .config
                .system_instruction
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| SystemInstruction {
                    parts: vec![Part::text(s.clone())],
                }),
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: self.config.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ResponseDriver for GeminiClient {
    async fn generate(
        &self,
        history: &[Content],
        tools: &ModelToolSpec,
    ) -> Result<ModelResponse, InferenceError> {
        let body = self.build_request(history, tools);

        tracing::debug!(
            model = %self.config.model_name,
            turns = history.len(),
            tools = tools.len(),
            "generateContent request"
        );

        let response = self
            .http
            .post(self.api_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
            }
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: text,
            });
        }

        let raw = response.text().await.map_err(|e| self.map_send_error(e))?;
        let parsed: ModelResponse =
            serde_json::from_str(&raw).map_err(|e| InferenceError::ParseError {
                reason: format!("invalid generateContent response: {e}"),
            })?;

        if let Some(reason) = parsed.block_reason() {
            tracing::warn!(model = %self.config.model_name, reason, "prompt blocked by the model");
        }
        if let Some(usage) = parsed.usage_metadata {
            tracing::debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "generateContent usage"
            );
        }

        Ok(parsed)
    }
}

// ─── Schema cleanup ──────────────────────────────────────────────────────────

/// Convert declarations to their wire form. All declarations go in one
/// tool block; an empty catalog sends no tools at all.
fn to_wire_tools(tools: &ModelToolSpec) -> Vec<WireToolSpec> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![WireToolSpec {
        function_declarations: tools
            .function_declarations
            .iter()
            .map(|decl| WireFunctionDeclaration {
                name: decl.name.clone(),
                description: decl.description.clone(),
                parameters: wire_parameters(&decl.parameters),
            })
            .collect(),
    }]
}

/// Parameters for the wire, or `None` for a tool that takes no arguments
/// (the API rejects object schemas with no properties).
fn wire_parameters(schema: &serde_json::Value) -> Option<serde_json::Value> {
    let cleaned = sanitize_schema(schema);
    let obj = cleaned.as_object()?;
    let is_object = obj.get("type").and_then(|t| t.as_str()) == Some("object");
    let no_properties = obj
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|p| p.is_empty())
        .unwrap_or(true);
    if obj.is_empty() || (is_object && no_properties) {
        return None;
    }
    Some(cleaned)
}

/// Strip keywords the API rejects, recursively through nested schemas.
///
/// Property *names* are never touched, only schema keywords.
pub fn sanitize_schema(schema: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in obj {
        if UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "properties" => match value.as_object() {
                Some(props) => serde_json::Value::Object(
                    props
                        .iter()
                        .map(|(name, sub)| (name.clone(), sanitize_schema(sub)))
                        .collect(),
                ),
                None => value.clone(),
            },
            "items" => sanitize_schema(value),
            "anyOf" | "oneOf" | "allOf" => match value.as_array() {
                Some(variants) => {
                    serde_json::Value::Array(variants.iter().map(sanitize_schema).collect())
                }
                None => value.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }
    serde_json::Value::Object(out)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::{FunctionCall, FunctionDeclaration, FunctionResponse};

    fn client() -> GeminiClient {
        GeminiClient::from_config(ModelConfig {
            api_key: "test-key".into(),
            base_url: "http://localhost:9/v1beta/models/".into(),
            model_name: "gemini-test".into(),
            temperature: Some(0.1),
            system_instruction: Some("Answer briefly.".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn price_tool() -> ModelToolSpec {
        ModelToolSpec {
            function_declarations: vec![FunctionDeclaration {
                name: "lookup_price".into(),
                description: "Look up a price".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "title": "lookup_priceArguments",
                    "properties": {
                        "bar_code": {"type": "string", "title": "Bar Code"},
                        "title": {"type": "string", "default": "x"}
                    },
                    "required": ["bar_code"],
                    "additionalProperties": false,
                    "$schema": "http://json-schema.org/draft-07/schema#"
                }),
            }],
        }
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        assert_eq!(
            client().api_url(),
            "http://localhost:9/v1beta/models/gemini-test:generateContent"
        );
    }

    #[test]
    fn test_build_request_shape() {
        let history = vec![
            Content::user_text("How much is 123?"),
            Content::model_function_call(FunctionCall::new(
                "lookup_price",
                serde_json::json!({"bar_code": "123"}),
            )),
            Content::user_function_responses(vec![FunctionResponse::text_result(
                "lookup_price",
                "$1.50",
            )]),
        ];
        let body = serde_json::to_value(client().build_request(&history, &price_tool())).unwrap();

        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"]["bar_code"], "123");
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["result"],
            "$1.50"
        );
        let decl = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "lookup_price");
        assert!(decl["parameters"].get("additionalProperties").is_none());
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Answer briefly.");
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_sanitize_schema_keeps_property_names() {
        let cleaned = sanitize_schema(&price_tool().function_declarations[0].parameters);
        assert!(cleaned.get("title").is_none());
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        // a property literally named "title" survives, its keywords are cleaned
        assert_eq!(cleaned["properties"]["title"], serde_json::json!({"type": "string"}));
        assert_eq!(cleaned["properties"]["bar_code"], serde_json::json!({"type": "string"}));
        assert_eq!(cleaned["required"], serde_json::json!(["bar_code"]));
    }

    #[test]
    fn test_sanitize_schema_nested_items() {
        let schema = serde_json::json!({
            "type": "array",
            "items": {"type": "object", "additionalProperties": true,
                      "properties": {"n": {"anyOf": [{"type": "string", "title": "S"}, {"type": "null"}]}}}
        });
        let cleaned = sanitize_schema(&schema);
        assert!(cleaned["items"].get("additionalProperties").is_none());
        assert_eq!(
            cleaned["items"]["properties"]["n"]["anyOf"][0],
            serde_json::json!({"type": "string"})
        );
    }

    #[test]
    fn test_no_argument_tool_sends_no_parameters() {
        let spec = ModelToolSpec {
            function_declarations: vec![FunctionDeclaration {
                name: "get_product_categories".into(),
                description: "List categories".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
        };
        let wire = to_wire_tools(&spec);
        assert!(wire[0].function_declarations[0].parameters.is_none());
    }

    #[test]
    fn test_empty_spec_sends_no_tools() {
        assert!(to_wire_tools(&ModelToolSpec::default()).is_empty());
    }
}
