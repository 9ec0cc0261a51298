//! Situation puzzle engine with an AI judge.
//!
//! A hidden story is withheld from the player, who asks yes/no questions and
//! eventually proposes what happened. This crate provides:
//! - Tiered puzzle knowledge with an access gate that never shows a player
//!   more than the public statement
//! - Turn classification and verdicts through a language oracle
//! - A per-session state machine with gapless, resumable event logs
//! - Session, player and global memory
//!
//! # Quick Start
//!
//! ```ignore
//! use soup_core::{Collaborators, GameConfig, SessionEngine, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SessionEngine::new(GameConfig::default(), catalog, collaborators)?;
//!     let session = engine
//!         .create_session(&"hiccups".into(), &"alice".into(), SessionOptions::default())
//!         .await?;
//!     println!("{}", session.intro);
//!
//!     let turn = engine.submit_turn(session.session_id, "Was he thirsty?").await?;
//!     println!("{}", turn.response);
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod knowledge;
pub mod memory;
pub mod oracle;
pub mod puzzle;
pub mod session;
pub mod store;
pub mod testing;
pub mod verdict;

// Primary public API
pub use config::{GameConfig, PartialPolicy, SessionConfig, SessionOptions};
pub use engine::{Collaborators, NewSession, SessionEngine};
pub use error::{Error, ErrorKind, Result};
pub use id::{PlayerId, PuzzleId, SessionId};
pub use knowledge::{CorpusBackend, KeywordCorpus, KnowledgeAccessGate, RemoteCorpus, Tier};
pub use memory::{FileDocumentStore, InMemoryDocumentStore, MemoryLayer, MemorySync};
pub use oracle::{AnthropicOracle, Oracle, OracleOptions, PromptTemplates};
pub use puzzle::{Puzzle, PuzzleCatalog};
pub use session::{GameSession, Phase, SessionStatus, TurnEvent, TurnResult};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use testing::{ScriptedOracle, TestHarness};
pub use verdict::{Answer, Judgement};
