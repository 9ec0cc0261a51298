//! Engine configuration.
//!
//! [`GameConfig`] is built once at startup and shared behind an `Arc`.
//! Each session takes an immutable [`SessionConfig`] snapshot when it is
//! created, so changing the engine configuration later never alters a
//! running game.

use crate::oracle::prompt::{PromptTemplates, TEMPLATE_VERSION};
use crate::oracle::OracleOptions;
use crate::puzzle::Puzzle;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens when a hypothesis is judged partially correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// Treat it like a miss and keep playing.
    Continue,
    /// Count it as solved, at half score.
    Accept,
    /// Keep playing but let the player settle with `/accept`.
    #[default]
    RequireConfirmation,
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Questions plus hypotheses allowed before a session is aborted.
    pub max_turn_count: u32,
    /// Hints allowed when neither the session nor the puzzle says otherwise.
    pub default_hint_limit: u32,
    /// Deadline for classification plus verdict, in milliseconds.
    pub turn_timeout_ms: u64,
    /// Recent events shown to the classifier.
    pub classifier_context_events: usize,
    /// Documents retrieved per corpus query.
    pub retrieval_limit: usize,
    /// Prefix joined with the puzzle id to name its corpus.
    pub kb_id_prefix: String,
    pub partial_policy: PartialPolicy,
    pub prompts: PromptTemplates,
    pub oracle: OracleOptions,
    /// Explanations longer than this are cut.
    pub max_explanation_chars: usize,
    /// Merged free-text player memory is kept under this many characters.
    pub profile_char_budget: usize,
    /// Events kept in the episodic recency window.
    pub recent_window: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_turn_count: 100,
            default_hint_limit: 5,
            turn_timeout_ms: 60_000,
            classifier_context_events: 4,
            retrieval_limit: 5,
            kb_id_prefix: "game_".to_string(),
            partial_policy: PartialPolicy::default(),
            prompts: PromptTemplates::default(),
            oracle: OracleOptions::default(),
            max_explanation_chars: 200,
            profile_char_budget: 4000,
            recent_window: 10,
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turn_count(mut self, turns: u32) -> Self {
        self.max_turn_count = turns;
        self
    }

    pub fn with_default_hint_limit(mut self, hints: u32) -> Self {
        self.default_hint_limit = hints;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_partial_policy(mut self, policy: PartialPolicy) -> Self {
        self.partial_policy = policy;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_oracle(mut self, oracle: OracleOptions) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_kb_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.kb_id_prefix = prefix.into();
        self
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_turn_count == 0 {
            return Err("max_turn_count must be at least 1".into());
        }
        if self.turn_timeout_ms == 0 {
            return Err("turn_timeout_ms must be positive".into());
        }
        if self.retrieval_limit == 0 {
            return Err("retrieval_limit must be at least 1".into());
        }
        if self.kb_id_prefix.trim().is_empty() {
            return Err("kb_id_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Resolve the settings for a new session.
    ///
    /// Explicit session options win over puzzle constraints, which win over
    /// the engine defaults.
    pub fn resolve(&self, puzzle: &Puzzle, options: &SessionOptions) -> SessionConfig {
        SessionConfig {
            max_turns: options
                .max_turns
                .or(puzzle.constraints.max_turns)
                .unwrap_or(self.max_turn_count),
            hint_limit: options
                .hint_limit
                .or(puzzle.constraints.max_hints)
                .unwrap_or(self.default_hint_limit),
            partial_policy: options.partial_policy.unwrap_or(self.partial_policy),
            prompts: self.prompts,
        }
    }
}

/// Per-session overrides supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    pub max_turns: Option<u32>,
    pub hint_limit: Option<u32>,
    pub partial_policy: Option<PartialPolicy>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn with_hint_limit(mut self, hints: u32) -> Self {
        self.hint_limit = Some(hints);
        self
    }

    pub fn with_partial_policy(mut self, policy: PartialPolicy) -> Self {
        self.partial_policy = Some(policy);
        self
    }
}

/// Settings frozen into a session at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_turns: u32,
    pub hint_limit: u32,
    pub partial_policy: PartialPolicy,
    /// Persona, strictness and hint wording the session is judged with.
    pub prompts: PromptTemplates,
}

impl SessionConfig {
    /// Check resolved limits. Overrides bypass [`GameConfig::validate`].
    pub fn validate(&self) -> Result<(), String> {
        if self.max_turns == 0 {
            return Err("max_turns must be at least 1".into());
        }
        if self.prompts.version != TEMPLATE_VERSION {
            return Err(format!(
                "prompt template version {} is not supported (expected {TEMPLATE_VERSION})",
                self.prompts.version
            ));
        }
        Ok(())
    }
}
