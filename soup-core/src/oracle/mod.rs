//! Language oracle abstraction.
//!
//! The oracle is the only component that talks to a language model. It is
//! used for turn classification, verdicts and end-of-session summaries,
//! each through a structured [`Prompt`] that keeps player text fenced off
//! from instructions.

pub mod anthropic;
pub mod prompt;

pub use anthropic::AnthropicOracle;
pub use prompt::{Prompt, PromptPurpose, PromptTemplates};

use crate::error::OracleError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Generation settings passed with every oracle call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleOptions {
    /// Model override. `None` uses the oracle's own default.
    pub model: Option<String>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 512,
            temperature: Some(0.2),
        }
    }
}

impl OracleOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    /// Settings for short label-only replies.
    pub fn for_classification(&self) -> Self {
        Self {
            model: self.model.clone(),
            max_tokens: 16,
            temperature: Some(0.0),
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Generate free text for a prompt.
    async fn generate(&self, prompt: &Prompt, options: &OracleOptions) -> Result<String, OracleError>;

    /// Produce a short label for a classification prompt.
    async fn classify(&self, prompt: &Prompt, options: &OracleOptions) -> Result<String, OracleError> {
        let text = self
            .generate(prompt, &options.for_classification())
            .await?;
        Ok(text.trim().to_string())
    }

    /// Name used in logs.
    fn name(&self) -> &str;
}
