//! Testing utilities for the puzzle engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedOracle` for deterministic tests without API calls
//! - `TestHarness` for an engine wired to in-memory stores
//! - Assertion helpers for verifying session state

use crate::config::{GameConfig, SessionOptions};
use crate::engine::{Collaborators, NewSession, SessionEngine};
use crate::error::{OracleError, Result};
use crate::id::{PlayerId, SessionId};
use crate::knowledge::KeywordCorpus;
use crate::memory::InMemoryDocumentStore;
use crate::oracle::{Oracle, OracleOptions, Prompt, PromptPurpose};
use crate::puzzle::{Puzzle, PuzzleCatalog};
use crate::session::{Phase, TurnEvent};
use crate::store::InMemorySessionStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Phrases that make the scripted classifier label input a hypothesis.
const HYPOTHESIS_KEYWORDS: &[&str] = &[
    "i think",
    "my guess",
    "the answer is",
    "hypothesis",
    "the solution is",
    "my theory",
    "i believe",
];

#[derive(Default)]
struct Script {
    queues: HashMap<PromptPurpose, VecDeque<std::result::Result<String, OracleError>>>,
    calls: HashMap<PromptPurpose, usize>,
    prompts: HashMap<PromptPurpose, Prompt>,
}

/// An oracle that replays queued replies per prompt purpose.
///
/// When a queue is empty it falls back to a fixed reply: keyword-based
/// labels for classification, `IRRELEVANT` for questions, `INCORRECT` for
/// hypotheses, and an error for summaries so the fallback summary runs.
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<Script>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a reply.
    pub fn push(&self, purpose: PromptPurpose, reply: impl Into<String>) {
        self.script()
            .queues
            .entry(purpose)
            .or_default()
            .push_back(Ok(reply.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, purpose: PromptPurpose, error: OracleError) {
        self.script()
            .queues
            .entry(purpose)
            .or_default()
            .push_back(Err(error));
    }

    /// Number of calls made for a purpose.
    pub fn calls(&self, purpose: PromptPurpose) -> usize {
        self.script().calls.get(&purpose).copied().unwrap_or(0)
    }

    /// The most recent prompt seen for a purpose.
    pub fn last_prompt(&self, purpose: PromptPurpose) -> Option<Prompt> {
        self.script().prompts.get(&purpose).cloned()
    }

    fn default_reply(prompt: &Prompt) -> std::result::Result<String, OracleError> {
        match prompt.purpose() {
            PromptPurpose::Classify => {
                let input = prompt.player_input().unwrap_or_default().to_lowercase();
                if HYPOTHESIS_KEYWORDS.iter().any(|kw| input.contains(kw)) {
                    Ok("HYPOTHESIS".to_string())
                } else {
                    Ok("QUESTION".to_string())
                }
            }
            PromptPurpose::Answer => Ok("VERDICT: IRRELEVANT".to_string()),
            PromptPurpose::Judge => Ok("VERDICT: INCORRECT".to_string()),
            PromptPurpose::Summarize => Err(OracleError::Network("no scripted summary".into())),
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(
        &self,
        prompt: &Prompt,
        _options: &OracleOptions,
    ) -> std::result::Result<String, OracleError> {
        let purpose = prompt.purpose();
        let queued = {
            let mut script = self.script();
            *script.calls.entry(purpose).or_default() += 1;
            script.prompts.insert(purpose, prompt.clone());
            script.queues.get_mut(&purpose).and_then(VecDeque::pop_front)
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        queued.unwrap_or_else(|| Self::default_reply(prompt))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// The classic hiccups puzzle.
pub fn sample_puzzle() -> Puzzle {
    Puzzle::new(
        "hiccups",
        "A man walks into a bar and asks the bartender for a glass of water. \
         The bartender pulls out a gun and points it at him. \
         The man says \"thank you\" and walks out.",
        "The man had hiccups. The bartender saw this and scared him with the gun \
         to cure them, so the man no longer needed the water.",
    )
    .with_title("The Man in the Bar")
    .with_hints([
        "The man was not thirsty.",
        "The bartender was trying to help him.",
    ])
    .with_additional_info("A sudden fright is an old remedy for hiccups.")
}

/// Second puzzle for tests that need more than one.
pub fn second_puzzle() -> Puzzle {
    Puzzle::new(
        "lighthouse",
        "A lighthouse keeper turned off the light and went to bed. \
         The next morning he heard news that made him weep.",
        "His dark lighthouse caused a ship to crash on the rocks during the night.",
    )
    .with_title("The Lighthouse")
    .with_hints(["Think about what a lighthouse is for."])
}

/// An engine on in-memory stores with a scripted oracle.
pub struct TestHarness {
    pub engine: Arc<SessionEngine>,
    pub oracle: Arc<ScriptedOracle>,
    pub corpus: Arc<KeywordCorpus>,
    pub sessions: Arc<InMemorySessionStore>,
    pub documents: Arc<InMemoryDocumentStore>,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(GameConfig::default())
    }

    pub fn with_config(config: GameConfig) -> Result<Self> {
        Self::build(config, ScriptedOracle::new())
    }

    /// Build with a customised oracle, e.g. one with a delay.
    pub fn build(config: GameConfig, oracle: ScriptedOracle) -> Result<Self> {
        let oracle = Arc::new(oracle);
        let corpus = Arc::new(KeywordCorpus::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());

        let catalog = PuzzleCatalog::from_puzzles([sample_puzzle(), second_puzzle()]);
        for puzzle in catalog.iter() {
            corpus
                .ingest_puzzle(&config.kb_id_prefix, puzzle)
                .map_err(crate::error::UpstreamError::from)?;
        }

        let engine = SessionEngine::new(
            config,
            catalog,
            Collaborators {
                oracle: oracle.clone(),
                corpus: corpus.clone(),
                sessions: sessions.clone(),
                documents: documents.clone(),
            },
        )?;
        Ok(Self {
            engine: Arc::new(engine),
            oracle,
            corpus,
            sessions,
            documents,
        })
    }

    /// Start a session on the hiccups puzzle.
    pub async fn create(&self, player: &str) -> NewSession {
        self.create_with(player, SessionOptions::default())
            .await
            .unwrap_or_else(|e| panic!("failed to create session: {e}"))
    }

    pub async fn create_with(&self, player: &str, options: SessionOptions) -> Result<NewSession> {
        self.engine
            .create_session(&sample_puzzle().id, &PlayerId::new(player), options)
            .await
    }

    pub async fn phase(&self, id: SessionId) -> Phase {
        self.status(id).await.0
    }

    /// Phase, turn index and hint count.
    pub async fn status(&self, id: SessionId) -> (Phase, u64, u32) {
        let status = self
            .engine
            .get_session_status(id)
            .await
            .unwrap_or_else(|e| panic!("no status for {id}: {e}"));
        let s = status.session;
        (s.phase(), s.turn_index(), s.hint_count())
    }

    pub async fn events(&self, id: SessionId) -> Vec<TurnEvent> {
        self.engine
            .session_events(id)
            .await
            .unwrap_or_else(|e| panic!("no events for {id}: {e}"))
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that a session is in the given phase.
#[track_caller]
pub fn assert_phase(actual: Phase, expected: Phase) {
    assert_eq!(actual, expected, "Expected phase {expected}, got {actual}");
}

/// Assert that event turn indices are exactly `0..len`.
#[track_caller]
pub fn assert_gapless(events: &[TurnEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(
            event.turn_index, i as u64,
            "Expected turn index {i} at position {i}, got {}",
            event.turn_index
        );
    }
}
