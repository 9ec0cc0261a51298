//! The single path from callers to the corpus.

use super::corpus::{corpus_id, CorpusHealth, KnowledgeCorpus};
use super::{AccessRole, KnowledgeDocument, Tier};
use crate::error::CorpusError;
use crate::id::PuzzleId;
use std::sync::Arc;

/// Tier-enforcing wrapper around a [`KnowledgeCorpus`].
///
/// The requested tier is passed down so backends filter before ranking,
/// and every returned document is checked again here. A document above
/// the requested tier, or belonging to another puzzle, is dropped and
/// logged as an error.
pub struct KnowledgeAccessGate {
    corpus: Arc<dyn KnowledgeCorpus>,
    kb_id_prefix: String,
    limit: usize,
}

impl KnowledgeAccessGate {
    pub fn new(corpus: Arc<dyn KnowledgeCorpus>, kb_id_prefix: impl Into<String>, limit: usize) -> Self {
        Self {
            corpus,
            kb_id_prefix: kb_id_prefix.into(),
            limit,
        }
    }

    pub fn corpus_id(&self, puzzle: &PuzzleId) -> String {
        corpus_id(&self.kb_id_prefix, puzzle)
    }

    /// Retrieve documents for `puzzle` visible at `max_tier`.
    pub async fn query(
        &self,
        puzzle: &PuzzleId,
        text: &str,
        max_tier: Tier,
    ) -> Result<Vec<KnowledgeDocument>, CorpusError> {
        let corpus_id = self.corpus_id(puzzle);
        let hits = self
            .corpus
            .query(&corpus_id, text, max_tier, self.limit)
            .await?;

        let mut docs = Vec::with_capacity(hits.len());
        for hit in hits {
            let doc = hit.document;
            if !max_tier.admits(doc.tier()) || doc.puzzle_id() != puzzle {
                tracing::error!(
                    corpus = %corpus_id,
                    document = doc.id(),
                    tier = ?doc.tier(),
                    requested = ?max_tier,
                    "corpus returned a document outside the requested scope; dropped"
                );
                continue;
            }
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Retrieve documents at the tier a role is cleared for.
    pub async fn query_as(
        &self,
        role: AccessRole,
        puzzle: &PuzzleId,
        text: &str,
    ) -> Result<Vec<KnowledgeDocument>, CorpusError> {
        self.query(puzzle, text, role.max_tier()).await
    }

    pub async fn health(&self, puzzle: &PuzzleId) -> CorpusHealth {
        self.corpus.health_check(&self.corpus_id(puzzle)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KeywordCorpus, ScoredDocument};
    use crate::testing::sample_puzzle;
    use async_trait::async_trait;

    /// Corpus that ignores the tier filter entirely.
    struct LeakyCorpus(Vec<KnowledgeDocument>);

    #[async_trait]
    impl KnowledgeCorpus for LeakyCorpus {
        async fn query(
            &self,
            _corpus_id: &str,
            _text: &str,
            _max_tier: Tier,
            _limit: usize,
        ) -> Result<Vec<ScoredDocument>, CorpusError> {
            Ok(self
                .0
                .iter()
                .cloned()
                .map(|document| ScoredDocument { document, score: 1.0 })
                .collect())
        }

        async fn health_check(&self, _corpus_id: &str) -> CorpusHealth {
            CorpusHealth::Ok
        }
    }

    #[tokio::test]
    async fn test_player_queries_never_see_secret() {
        let puzzle = sample_puzzle();
        let corpus = KeywordCorpus::new();
        corpus.ingest_puzzle("game_", &puzzle).unwrap();
        let gate = KnowledgeAccessGate::new(Arc::new(corpus), "game_", 10);

        for text in ["hiccups", "bartender scared", "water gun thank", puzzle.truth.as_str()] {
            let docs = gate.query_as(AccessRole::Player, &puzzle.id, text).await.unwrap();
            assert!(docs.iter().all(|d| d.tier() == Tier::Public), "leak for {text:?}");
        }
    }

    #[tokio::test]
    async fn test_gate_drops_leaked_documents() {
        let puzzle = sample_puzzle();
        let gate = KnowledgeAccessGate::new(Arc::new(LeakyCorpus(puzzle.documents())), "game_", 10);

        let docs = gate.query(&puzzle.id, "anything", Tier::Public).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].tier(), Tier::Public);

        let docs = gate.query(&puzzle.id, "anything", Tier::Hint).await.unwrap();
        assert!(docs.iter().all(|d| d.tier() <= Tier::Hint));
        assert_eq!(docs.len(), 1 + puzzle.hints.len());
    }

    #[tokio::test]
    async fn test_gate_drops_other_puzzles() {
        let puzzle = sample_puzzle();
        let stray = KnowledgeDocument::new("other:statement", PuzzleId::new("other"), Tier::Public, "x");
        let gate = KnowledgeAccessGate::new(Arc::new(LeakyCorpus(vec![stray])), "game_", 10);

        let docs = gate.query(&puzzle.id, "x", Tier::Secret).await.unwrap();
        assert!(docs.is_empty());
    }
}
