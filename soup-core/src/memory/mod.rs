//! Memory across turns, sessions and players.
//!
//! Three scopes:
//! - Episodic: the event log of one session, cached over the session store.
//! - Player: summaries and statistics about one player, merged on write.
//! - Global: cross-player puzzle statistics, written only by summarisation.

pub mod episodic;
pub mod semantic;
pub mod store;
pub mod summary;

pub use episodic::{EpisodicMemory, EpisodicQuery, Window};
pub use semantic::{GlobalMemory, MemoryQuery, PlayerMemory};
pub use store::{DocumentStore, FileDocumentStore, InMemoryDocumentStore};
pub use summary::{PlayerStats, PuzzleStats, SessionSummarizer, SessionSummary, SummarySource};

use crate::config::GameConfig;
use crate::error::MemoryError;
use crate::id::PlayerId;
use crate::oracle::Oracle;
use crate::session::{GameSession, TurnEvent};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of record kept in player or global memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryType {
    StyleProfile,
    PerformanceStats,
    SessionSummary,
    PuzzleStats,
    BehaviorPattern,
}

impl SummaryType {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryType::StyleProfile => "style_profile",
            SummaryType::PerformanceStats => "performance_stats",
            SummaryType::SessionSummary => "session_summary",
            SummaryType::PuzzleStats => "puzzle_stats",
            SummaryType::BehaviorPattern => "behavior_pattern",
        }
    }
}

/// Where a memory document lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Player(PlayerId),
    Global,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Player(id) => write!(f, "player:{id}"),
            Namespace::Global => f.write_str("global"),
        }
    }
}

/// A stored memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub namespace: String,
    pub id: String,
    pub summary_type: SummaryType,
    pub content: String,
    /// Incremented on every merge.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryDocument {
    pub fn new(
        namespace: impl Into<String>,
        id: impl Into<String>,
        summary_type: SummaryType,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.into(),
            id: id.into(),
            summary_type,
            content: content.into(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of the end-of-session memory update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemorySync {
    Updated {
        source: SummarySource,
        /// Version of the player's session summary record after the merge.
        profile_version: u32,
    },
    /// The turn is committed; only the memory update failed.
    Failed { reason: String },
}

/// Facade over the three memory scopes.
pub struct MemoryLayer {
    episodic: EpisodicMemory,
    players: PlayerMemory,
    global: GlobalMemory,
    summarizer: SessionSummarizer,
}

impl MemoryLayer {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        documents: Arc<dyn DocumentStore>,
        oracle: Arc<dyn Oracle>,
        config: &GameConfig,
    ) -> Self {
        Self {
            episodic: EpisodicMemory::new(sessions, config.recent_window),
            players: PlayerMemory::new(documents.clone(), config.profile_char_budget),
            global: GlobalMemory::new(documents, config.profile_char_budget),
            summarizer: SessionSummarizer::new(oracle, config.prompts, config.oracle.clone()),
        }
    }

    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    pub fn players(&self) -> &PlayerMemory {
        &self.players
    }

    pub fn global(&self) -> &GlobalMemory {
        &self.global
    }

    /// Player context for the judge, read once when a session starts.
    pub async fn player_context(&self, player: &PlayerId) -> Result<Option<String>, MemoryError> {
        self.players.context(player).await
    }

    /// Summarise a finished session and fold it into player and global
    /// memory.
    pub async fn record_session_end(
        &self,
        session: &GameSession,
        events: &[TurnEvent],
    ) -> Result<MemorySync, MemoryError> {
        let summary = self.summarizer.summarize(session, events).await;

        let mut entries = vec![(
            SummaryType::SessionSummary,
            format!("[{}] {}", session.puzzle_id(), summary.text),
        )];
        if let Some(style) = &summary.reasoning_style {
            entries.push((SummaryType::StyleProfile, style.clone()));
        }
        if !summary.mistakes.is_empty() || !summary.strengths.is_empty() {
            entries.push((
                SummaryType::BehaviorPattern,
                format!(
                    "Strengths: {}. Mistakes: {}.",
                    summary.strengths.join(", "),
                    summary.mistakes.join(", ")
                ),
            ));
        }
        entries.push((
            SummaryType::PerformanceStats,
            serde_json::to_string(&PlayerStats::from_session(session))?,
        ));

        let written = self.players.put_many(session.player_id(), entries).await?;
        self.global.record_puzzle(session).await?;

        let profile_version = written
            .iter()
            .find(|d| d.summary_type == SummaryType::SessionSummary)
            .map(|d| d.version)
            .unwrap_or_default();
        Ok(MemorySync::Updated {
            source: summary.source,
            profile_version,
        })
    }
}
