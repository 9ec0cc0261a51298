//! Error types for the puzzle engine.
//!
//! Component errors are plain thiserror enums. Everything that reaches a
//! caller is folded into [`Error`], which reports a stable [`ErrorKind`] so
//! front ends can branch on the class of failure without matching variants.

use crate::id::{PuzzleId, SessionId};
use crate::session::Phase;
use std::time::Duration;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input or request is malformed.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The turn could not be classified and the player should rephrase.
    #[error("Could not tell whether that was a question, a guess or a command. Please rephrase.")]
    ClassificationAmbiguous,

    /// The oracle or the knowledge corpus failed.
    #[error("Upstream unavailable: {0}")]
    Upstream(#[from] UpstreamError),

    /// Deliberation ran past the configured turn timeout.
    #[error("Turn timed out after {0:?}")]
    Timeout(Duration),

    /// The session was aborted while this turn was in flight.
    #[error("Turn cancelled because session {0} was aborted")]
    Cancelled(SessionId),

    /// Another turn is already being processed for the session.
    #[error("Session {0} is busy with another turn")]
    SessionBusy(SessionId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Puzzle not found: {0}")]
    PuzzleNotFound(PuzzleId),

    #[error("Hint limit reached ({limit} hints)")]
    HintLimitExceeded { limit: u32 },

    #[error("Turn limit reached ({limit} turns)")]
    TurnLimitExceeded { limit: u32 },

    /// The session is terminal and accepts no further turns.
    #[error("Session is {phase} and accepts no further turns")]
    SessionClosed { phase: Phase },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ClassificationAmbiguous,
    UpstreamUnavailable,
    LimitExceeded,
    Busy,
    NotFound,
    SchemaMismatch,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ClassificationAmbiguous => "classification_ambiguous",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::Busy => "busy",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::Storage => "storage",
        }
    }

    /// Process exit code used by the command-line driver.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::Busy => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::UpstreamUnavailable => 5,
            ErrorKind::LimitExceeded => 6,
            ErrorKind::SchemaMismatch => 7,
            ErrorKind::Storage => 8,
            ErrorKind::ClassificationAmbiguous => 9,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::SessionClosed { .. } | Error::Cancelled(_) => {
                ErrorKind::Validation
            }
            Error::Config(_) => ErrorKind::Validation,
            Error::ClassificationAmbiguous => ErrorKind::ClassificationAmbiguous,
            Error::Upstream(_) | Error::Timeout(_) => ErrorKind::UpstreamUnavailable,
            Error::SessionBusy(_) => ErrorKind::Busy,
            Error::SessionNotFound(_) | Error::PuzzleNotFound(_) => ErrorKind::NotFound,
            Error::HintLimitExceeded { .. } | Error::TurnLimitExceeded { .. } => {
                ErrorKind::LimitExceeded
            }
            Error::Store(StoreError::SchemaMismatch { .. } | StoreError::TemplateMismatch { .. }) => {
                ErrorKind::SchemaMismatch
            }
            Error::Store(_) | Error::Memory(_) => ErrorKind::Storage,
        }
    }

    /// True if the same input may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamUnavailable | ErrorKind::Busy | ErrorKind::ClassificationAmbiguous
        )
    }
}

/// Failures of the oracle or the knowledge corpus.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),

    #[error("knowledge corpus: {0}")]
    Corpus(#[from] CorpusError),

    /// The corpus was found unhealthy and has not recovered yet.
    #[error("knowledge corpus is degraded; judged turns are refused until it recovers")]
    Degraded,

    /// The oracle replied, but not with anything readable as a verdict.
    #[error("oracle reply could not be read as a verdict: {0:?}")]
    UnreadableVerdict(String),
}

/// Errors from language oracle calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("API key not found. Set ANTHROPIC_API_KEY environment variable.")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The oracle answered with no text at all.
    #[error("Empty response")]
    Empty,
}

/// Errors from the retrieval corpus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CorpusError {
    #[error("Unknown corpus: {0}")]
    UnknownCorpus(String),

    #[error("Corpus unavailable: {0}")]
    Unavailable(String),

    /// A document id was re-ingested with a different tier.
    #[error("Document {id} is already ingested as {existing:?}")]
    TierConflict {
        id: String,
        existing: crate::knowledge::Tier,
    },
}

/// Errors from the durable session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    /// The session was started with prompt templates this build cannot reproduce.
    #[error("Prompt template version mismatch: expected {expected}, found {found}")]
    TemplateMismatch { expected: u32, found: u32 },

    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// The stored events do not line up with the snapshot.
    #[error("Inconsistent session {session}: {reason}")]
    Inconsistent { session: SessionId, reason: String },
}

/// Errors from the memory layer.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An append would leave a hole or overlap in the event sequence.
    #[error("Event sequence gap in session {session}: expected turn {expected}, got {found}")]
    SequenceGap {
        session: SessionId,
        expected: u64,
        found: u64,
    },

    /// Two records could not be merged.
    #[error("Merge failed for {namespace}/{id}: {reason}")]
    Merge {
        namespace: String,
        id: String,
        reason: String,
    },
}
