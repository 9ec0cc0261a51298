//! Tiered puzzle knowledge.
//!
//! Every document belongs to exactly one puzzle and carries a [`Tier`] that
//! is fixed when it is ingested. Retrieval always goes through the
//! [`gate::KnowledgeAccessGate`], which makes sure a caller only sees tiers
//! at or below the one its role admits.

pub mod corpus;
pub mod gate;

pub use corpus::{
    CorpusBackend, CorpusHealth, KeywordCorpus, KnowledgeCorpus, RemoteCorpus, ScoredDocument,
};
pub use gate::KnowledgeAccessGate;

use crate::id::PuzzleId;
use serde::{Deserialize, Serialize};

/// Visibility class of a knowledge document. Ordered from least to most
/// restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Visible to the player.
    Public,
    /// Released to the player one at a time by the hint command.
    Hint,
    /// The judge only.
    Secret,
}

impl Tier {
    /// True if a caller cleared for `self` may see a document of `tier`.
    #[inline]
    pub fn admits(self, tier: Tier) -> bool {
        tier <= self
    }
}

/// Who is asking for knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    /// Anything that ends up in player-facing text.
    Player,
    /// Verdict generation.
    Judge,
}

impl AccessRole {
    pub fn max_tier(self) -> Tier {
        match self {
            AccessRole::Player => Tier::Public,
            AccessRole::Judge => Tier::Secret,
        }
    }
}

/// A unit of puzzle knowledge. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    id: String,
    puzzle_id: PuzzleId,
    tier: Tier,
    content: String,
}

impl KnowledgeDocument {
    pub fn new(
        id: impl Into<String>,
        puzzle_id: PuzzleId,
        tier: Tier,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            puzzle_id,
            tier,
            content: content.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn puzzle_id(&self) -> &PuzzleId {
        &self.puzzle_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
