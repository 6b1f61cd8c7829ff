//! Model configuration and environment interpolation.
//!
//! The `model` section of `toolchat.yaml` deserializes into [`ModelConfig`].
//! String values may reference the environment as `${VAR}` or
//! `${VAR:-default}`; see [`interpolate_env_vars`].

use serde::Deserialize;

use super::errors::InferenceError;

/// Public Generative Language API base.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Model used when the config does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro-preview-05-06";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Runtime configuration of the generative model endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Falls back to `$GEMINI_API_KEY` when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_base_url() -> String {
    GEMINI_API_BASE.to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            base_url: default_base_url(),
            api_key: String::new(),
            temperature: None,
            max_output_tokens: None,
            system_instruction: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// The API key to send, resolving the environment fallback.
    pub fn resolved_api_key(&self) -> Result<String, InferenceError> {
        if !self.api_key.trim().is_empty() {
            return Ok(self.api_key.trim().to_string());
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(InferenceError::ConfigError {
                reason: format!("no API key configured (set model.api_key or ${API_KEY_ENV})"),
            }),
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TOOLCHAT_NONEXISTENT_VAR__");
        let input = "${__TOOLCHAT_NONEXISTENT_VAR__:-/fallback/path}";
        assert_eq!(interpolate_env_vars(input), "/fallback/path");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__TOOLCHAT_INFERENCE_VAR__", "/custom/path");
        let input = "${__TOOLCHAT_INFERENCE_VAR__:-/fallback/path}";
        assert_eq!(interpolate_env_vars(input), "/custom/path");
        std::env::remove_var("__TOOLCHAT_INFERENCE_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with $dollar but no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn test_model_config_defaults() {
        let config: ModelConfig = serde_yaml::from_str("temperature: 0.2\n").unwrap();
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.base_url, GEMINI_API_BASE);
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.request_timeout_secs, 120);
        assert!(config.max_output_tokens.is_none());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = ModelConfig {
            api_key: "  from-config ".into(),
            ..Default::default()
        };
        assert_eq!(config.resolved_api_key().unwrap(), "from-config");
    }
}
