//! Retrieval backends.
//!
//! Backends apply the tier filter before ranking, so documents above the
//! requested tier never take part in scoring. The gate re-checks every
//! result anyway.

use super::{KnowledgeDocument, Tier};
use crate::error::CorpusError;
use crate::id::PuzzleId;
use crate::puzzle::Puzzle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

/// A retrieved document with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: KnowledgeDocument,
    pub score: f32,
}

/// Result of a corpus health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusHealth {
    Ok,
    Degraded,
    Unavailable,
}

impl CorpusHealth {
    pub fn is_ok(self) -> bool {
        self == CorpusHealth::Ok
    }
}

/// Similarity search over tiered documents.
#[async_trait]
pub trait KnowledgeCorpus: Send + Sync {
    /// Return up to `limit` documents at or below `max_tier`, best first.
    async fn query(
        &self,
        corpus_id: &str,
        text: &str,
        max_tier: Tier,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, CorpusError>;

    async fn health_check(&self, corpus_id: &str) -> CorpusHealth;
}

/// The retrieval backends shipped with the engine. Chosen once at startup.
pub enum CorpusBackend {
    Keyword(KeywordCorpus),
    Remote(RemoteCorpus),
}

#[async_trait]
impl KnowledgeCorpus for CorpusBackend {
    async fn query(
        &self,
        corpus_id: &str,
        text: &str,
        max_tier: Tier,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, CorpusError> {
        match self {
            CorpusBackend::Keyword(c) => c.query(corpus_id, text, max_tier, limit).await,
            CorpusBackend::Remote(c) => c.query(corpus_id, text, max_tier, limit).await,
        }
    }

    async fn health_check(&self, corpus_id: &str) -> CorpusHealth {
        match self {
            CorpusBackend::Keyword(c) => c.health_check(corpus_id).await,
            CorpusBackend::Remote(c) => c.health_check(corpus_id).await,
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "was", "were", "and", "did", "does", "for", "are", "his", "her", "with", "that",
    "this", "what", "who", "why", "how", "not", "has", "had", "have", "you", "they", "him",
    "she", "from", "there", "into", "any", "some",
];

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// In-process corpus ranked by word overlap.
#[derive(Default)]
pub struct KeywordCorpus {
    collections: RwLock<HashMap<String, Vec<KnowledgeDocument>>>,
}

impl KeywordCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add documents to a corpus, creating it if needed.
    ///
    /// Re-ingesting an id with the same tier replaces its content; a
    /// different tier is rejected.
    pub fn ingest(
        &self,
        corpus_id: &str,
        documents: impl IntoIterator<Item = KnowledgeDocument>,
    ) -> Result<usize, CorpusError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| CorpusError::Unavailable("corpus lock poisoned".into()))?;
        let collection = collections.entry(corpus_id.to_string()).or_default();

        let mut count = 0;
        for doc in documents {
            match collection.iter_mut().find(|d| d.id() == doc.id()) {
                Some(existing) if existing.tier() != doc.tier() => {
                    return Err(CorpusError::TierConflict {
                        id: doc.id().to_string(),
                        existing: existing.tier(),
                    });
                }
                Some(existing) => *existing = doc,
                None => collection.push(doc),
            }
            count += 1;
        }
        Ok(count)
    }

    /// Ingest all documents of a puzzle into `<prefix><puzzle id>`.
    pub fn ingest_puzzle(&self, prefix: &str, puzzle: &Puzzle) -> Result<usize, CorpusError> {
        self.ingest(&corpus_id(prefix, &puzzle.id), puzzle.documents())
    }
}

#[async_trait]
impl KnowledgeCorpus for KeywordCorpus {
    async fn query(
        &self,
        corpus_id: &str,
        text: &str,
        max_tier: Tier,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, CorpusError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| CorpusError::Unavailable("corpus lock poisoned".into()))?;
        let docs = collections
            .get(corpus_id)
            .ok_or_else(|| CorpusError::UnknownCorpus(corpus_id.to_string()))?;

        let query = tokens(text);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredDocument> = docs
            .iter()
            .filter(|d| max_tier.admits(d.tier()))
            .filter_map(|d| {
                let overlap = tokens(d.content()).intersection(&query).count();
                (overlap > 0).then(|| ScoredDocument {
                    document: d.clone(),
                    score: overlap as f32 / query.len() as f32,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn health_check(&self, corpus_id: &str) -> CorpusHealth {
        match self.collections.read() {
            Ok(c) if c.contains_key(corpus_id) => CorpusHealth::Ok,
            Ok(_) => CorpusHealth::Unavailable,
            Err(_) => CorpusHealth::Degraded,
        }
    }
}

/// Name of the corpus holding a puzzle's documents.
pub fn corpus_id(prefix: &str, puzzle: &PuzzleId) -> String {
    format!("{prefix}{puzzle}")
}

#[derive(Serialize)]
struct RemoteQuery<'a> {
    corpus_id: &'a str,
    text: &'a str,
    max_tier: Tier,
    limit: usize,
}

#[derive(Deserialize)]
struct RemoteQueryResponse {
    documents: Vec<ScoredDocument>,
}

#[derive(Deserialize)]
struct RemoteHealthResponse {
    status: CorpusHealth,
}

/// Corpus served over HTTP.
///
/// `POST {base}/query` takes `{corpus_id, text, max_tier, limit}` and returns
/// `{documents: [{document, score}]}`. `GET {base}/health/{corpus_id}`
/// returns `{status}`.
pub struct RemoteCorpus {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteCorpus {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CorpusError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CorpusError::Unavailable(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl KnowledgeCorpus for RemoteCorpus {
    async fn query(
        &self,
        corpus_id: &str,
        text: &str,
        max_tier: Tier,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, CorpusError> {
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&RemoteQuery {
                corpus_id,
                text,
                max_tier,
                limit,
            })
            .send()
            .await
            .map_err(|e| CorpusError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CorpusError::UnknownCorpus(corpus_id.to_string()));
        }
        if !status.is_success() {
            return Err(CorpusError::Unavailable(format!("HTTP {status}")));
        }

        let body: RemoteQueryResponse = response
            .json()
            .await
            .map_err(|e| CorpusError::Unavailable(format!("bad response: {e}")))?;
        Ok(body.documents)
    }

    async fn health_check(&self, corpus_id: &str) -> CorpusHealth {
        let result = self
            .client
            .get(format!("{}/health/{corpus_id}", self.base_url))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => resp
                .json::<RemoteHealthResponse>()
                .await
                .map(|h| h.status)
                .unwrap_or(CorpusHealth::Degraded),
            Ok(_) => CorpusHealth::Degraded,
            Err(_) => CorpusHealth::Unavailable,
        }
    }
}
