//! Oracle backed by Anthropic's Messages API.

use super::{Oracle, OracleOptions, Prompt};
use crate::error::OracleError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Non-streaming Messages API client.
#[derive(Clone)]
pub struct AnthropicOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicOracle {
    pub fn new(api_key: impl Into<String>) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OracleError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Create an oracle from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, OracleError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| OracleError::NoApiKey)?;
        Self::new(api_key)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| OracleError::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_request(&self, prompt: &Prompt, options: &OracleOptions) -> ApiRequest {
        ApiRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: options.max_tokens,
            system: Some(prompt.system().to_string()),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: vec![ApiContentBlock::Text {
                    text: prompt.render_user(),
                }],
            }],
            temperature: options.temperature,
        }
    }
}

#[async_trait]
impl Oracle for AnthropicOracle {
    async fn generate(&self, prompt: &Prompt, options: &OracleOptions) -> Result<String, OracleError> {
        let request = self.build_request(prompt, options);
        let headers = self.build_headers()?;

        tracing::debug!(purpose = ?prompt.purpose(), model = %request.model, "oracle request");
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        tracing::debug!(
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            stop_reason = api_response.stop_reason.as_deref().unwrap_or("none"),
            "oracle response"
        );
        collect_text(api_response)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn collect_text(response: ApiResponse) -> Result<String, OracleError> {
    let text: String = response
        .content
        .into_iter()
        .filter_map(|c| match c {
            ApiContent::Text { text } => Some(text),
            ApiContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(OracleError::Empty);
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::PromptPurpose;

    #[test]
    fn test_request_shape() {
        let oracle = AnthropicOracle::new("test-key").unwrap();
        let prompt = Prompt::new(PromptPurpose::Answer, "You are a judge.")
            .with_section("STORY", "A man asks for water.")
            .with_player_input("Was he thirsty?");
        let request = oracle.build_request(&prompt, &OracleOptions::default());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["system"], "You are a judge.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        let text = json["messages"][0]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("<player_input>\nWas he thirsty?\n</player_input>"));
    }

    #[test]
    fn test_model_override() {
        let oracle = AnthropicOracle::new("k").unwrap();
        let prompt = Prompt::new(PromptPurpose::Classify, "s");
        let request = oracle.build_request(&prompt, &OracleOptions::default().with_model("other"));
        assert_eq!(request.model, "other");
    }

    #[test]
    fn test_collect_text_skips_other_blocks() {
        let response: ApiResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "VERDICT: YES"},
                    {"type": "thinking", "thinking": "..."},
                    {"type": "text", "text": "\nEXPLANATION: ok"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(collect_text(response).unwrap(), "VERDICT: YES\nEXPLANATION: ok");
    }

    #[test]
    fn test_empty_response_is_an_error() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#,
        )
        .unwrap();
        assert!(matches!(collect_text(response), Err(OracleError::Empty)));
    }
}
