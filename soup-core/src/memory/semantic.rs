//! Player and global memory.
//!
//! Writes never overwrite blindly. Prose records are appended to what is
//! already there and trimmed from the oldest end; statistics records are
//! decoded and added together.

use super::store::DocumentStore;
use super::summary::{PlayerStats, PuzzleStats};
use super::{MemoryDocument, Namespace, SummaryType};
use crate::error::MemoryError;
use crate::id::PlayerId;
use crate::session::GameSession;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const UPDATE_SEPARATOR: &str = "\n\nUpdated: ";

/// Filter for [`PlayerMemory::search`] and [`GlobalMemory::search`].
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Rank by word overlap with this text. Without it, newest first.
    pub text: Option<String>,
    pub summary_types: Option<Vec<SummaryType>>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = SummaryType>) -> Self {
        self.summary_types = Some(types.into_iter().collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn apply(&self, docs: Vec<MemoryDocument>) -> Vec<MemoryDocument> {
        let mut docs: Vec<MemoryDocument> = docs
            .into_iter()
            .filter(|d| {
                self.summary_types
                    .as_ref()
                    .map_or(true, |types| types.contains(&d.summary_type))
            })
            .filter(|d| self.since.map_or(true, |since| d.updated_at >= since))
            .collect();

        match &self.text {
            Some(text) => {
                let query = words(text);
                let mut scored: Vec<(usize, MemoryDocument)> = docs
                    .into_iter()
                    .map(|d| (words(&d.content).intersection(&query).count(), d))
                    .filter(|(score, _)| *score > 0)
                    .collect();
                scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.updated_at.cmp(&a.1.updated_at)));
                docs = scored.into_iter().map(|(_, d)| d).collect();
            }
            None => docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Combine an existing record's content with new content.
pub fn merge_content(
    summary_type: SummaryType,
    existing: &str,
    incoming: &str,
    char_budget: usize,
) -> Result<String, String> {
    match summary_type {
        SummaryType::PerformanceStats => {
            let mut stats: PlayerStats = serde_json::from_str(existing).map_err(|e| e.to_string())?;
            let update: PlayerStats = serde_json::from_str(incoming).map_err(|e| e.to_string())?;
            stats.merge(&update);
            serde_json::to_string(&stats).map_err(|e| e.to_string())
        }
        SummaryType::PuzzleStats => {
            let mut stats: PuzzleStats = serde_json::from_str(existing).map_err(|e| e.to_string())?;
            let update: PuzzleStats = serde_json::from_str(incoming).map_err(|e| e.to_string())?;
            stats.merge(&update);
            serde_json::to_string(&stats).map_err(|e| e.to_string())
        }
        _ => Ok(trim_to_budget(
            format!("{existing}{UPDATE_SEPARATOR}{incoming}"),
            char_budget,
        )),
    }
}

/// Drop the oldest updates until the text fits, then cut from the front if
/// a single update is still too long.
fn trim_to_budget(text: String, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text;
    }
    let mut parts: Vec<&str> = text.split(UPDATE_SEPARATOR).collect();
    while parts.len() > 1 {
        parts.remove(0);
        let len: usize = parts.iter().map(|p| p.chars().count()).sum::<usize>()
            + (parts.len() - 1) * UPDATE_SEPARATOR.chars().count();
        if len <= budget {
            break;
        }
    }
    let joined = parts.join(UPDATE_SEPARATOR);
    let count = joined.chars().count();
    if count <= budget {
        return joined;
    }
    joined.chars().skip(count - budget).collect()
}

async fn merge_put(
    store: &dyn DocumentStore,
    namespace: &str,
    id: &str,
    summary_type: SummaryType,
    content: String,
    char_budget: usize,
) -> Result<MemoryDocument, MemoryError> {
    let doc = match store.read(namespace, id).await? {
        Some(mut existing) => {
            existing.content = merge_content(summary_type, &existing.content, &content, char_budget)
                .map_err(|reason| MemoryError::Merge {
                    namespace: namespace.to_string(),
                    id: id.to_string(),
                    reason,
                })?;
            existing.version += 1;
            existing.updated_at = Utc::now();
            existing
        }
        None => MemoryDocument::new(namespace, id, summary_type, content),
    };
    store.write(&doc).await?;
    Ok(doc)
}

/// Memory about individual players. Updates for one player are serialised.
pub struct PlayerMemory {
    store: Arc<dyn DocumentStore>,
    locks: Mutex<HashMap<PlayerId, Arc<tokio::sync::Mutex<()>>>>,
    char_budget: usize,
}

impl PlayerMemory {
    pub fn new(store: Arc<dyn DocumentStore>, char_budget: usize) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            char_budget,
        }
    }

    fn player_lock(&self, player: &PlayerId) -> Result<Arc<tokio::sync::Mutex<()>>, MemoryError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| MemoryError::Io(std::io::Error::other("player lock map poisoned")))?;
        Ok(locks.entry(player.clone()).or_default().clone())
    }

    /// Merge one record into a player's memory.
    pub async fn put(
        &self,
        player: &PlayerId,
        summary_type: SummaryType,
        content: impl Into<String>,
    ) -> Result<MemoryDocument, MemoryError> {
        let mut docs = self.put_many(player, vec![(summary_type, content.into())]).await?;
        docs.pop()
            .ok_or_else(|| MemoryError::Io(std::io::Error::other("no record written")))
    }

    /// Merge several records under one hold of the player's lock.
    pub async fn put_many(
        &self,
        player: &PlayerId,
        entries: Vec<(SummaryType, String)>,
    ) -> Result<Vec<MemoryDocument>, MemoryError> {
        let lock = self.player_lock(player)?;
        let _guard = lock.lock().await;

        let namespace = Namespace::Player(player.clone()).to_string();
        let mut written = Vec::with_capacity(entries.len());
        for (summary_type, content) in entries {
            let doc = merge_put(
                self.store.as_ref(),
                &namespace,
                summary_type.as_str(),
                summary_type,
                content,
                self.char_budget,
            )
            .await?;
            written.push(doc);
        }
        Ok(written)
    }

    pub async fn get(
        &self,
        player: &PlayerId,
        summary_type: SummaryType,
    ) -> Result<Option<MemoryDocument>, MemoryError> {
        let namespace = Namespace::Player(player.clone()).to_string();
        self.store.read(&namespace, summary_type.as_str()).await
    }

    pub async fn search(
        &self,
        player: &PlayerId,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryDocument>, MemoryError> {
        let namespace = Namespace::Player(player.clone()).to_string();
        Ok(query.apply(self.store.list(&namespace).await?))
    }

    pub async fn stats(&self, player: &PlayerId) -> Result<Option<PlayerStats>, MemoryError> {
        match self.get(player, SummaryType::PerformanceStats).await? {
            Some(doc) => Ok(Some(serde_json::from_str(&doc.content)?)),
            None => Ok(None),
        }
    }

    /// Short description of a player for the judge, or `None` for a
    /// player with no history.
    pub async fn context(&self, player: &PlayerId) -> Result<Option<String>, MemoryError> {
        let mut parts = Vec::new();
        if let Some(stats) = self.stats(player).await? {
            parts.push(stats.render());
        }
        if let Some(style) = self.get(player, SummaryType::StyleProfile).await? {
            let latest = style.content.rsplit(UPDATE_SEPARATOR).next().unwrap_or_default();
            parts.push(format!("Reasoning style: {latest}"));
        }
        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(parts.join("\n")))
    }
}

/// Cross-player memory. Last writer wins for concurrent updates.
pub struct GlobalMemory {
    store: Arc<dyn DocumentStore>,
    char_budget: usize,
}

impl GlobalMemory {
    pub fn new(store: Arc<dyn DocumentStore>, char_budget: usize) -> Self {
        Self { store, char_budget }
    }

    fn namespace() -> String {
        Namespace::Global.to_string()
    }

    /// Only summarisation writes global memory.
    pub(crate) async fn put(
        &self,
        id: &str,
        summary_type: SummaryType,
        content: String,
    ) -> Result<MemoryDocument, MemoryError> {
        merge_put(
            self.store.as_ref(),
            &Self::namespace(),
            id,
            summary_type,
            content,
            self.char_budget,
        )
        .await
    }

    pub(crate) async fn record_puzzle(&self, session: &GameSession) -> Result<MemoryDocument, MemoryError> {
        let stats = PuzzleStats::from_session(session);
        self.put(
            &format!("puzzle_stats:{}", session.puzzle_id()),
            SummaryType::PuzzleStats,
            serde_json::to_string(&stats)?,
        )
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryDocument>, MemoryError> {
        self.store.read(&Self::namespace(), id).await
    }

    pub async fn puzzle_stats(
        &self,
        puzzle: &crate::id::PuzzleId,
    ) -> Result<Option<PuzzleStats>, MemoryError> {
        match self.get(&format!("puzzle_stats:{puzzle}")).await? {
            Some(doc) => Ok(Some(serde_json::from_str(&doc.content)?)),
            None => Ok(None),
        }
    }

    pub async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryDocument>, MemoryError> {
        Ok(query.apply(self.store.list(&Self::namespace()).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;

    #[test]
    fn test_text_merge_appends() {
        let merged = merge_content(SummaryType::StyleProfile, "asks broad questions", "narrows down fast", 1000).unwrap();
        assert_eq!(merged, "asks broad questions\n\nUpdated: narrows down fast");
    }

    #[test]
    fn test_text_merge_respects_budget() {
        let mut content = "first".to_string();
        for i in 0..20 {
            content = merge_content(SummaryType::SessionSummary, &content, &format!("update number {i}"), 60).unwrap();
            assert!(content.chars().count() <= 60);
        }
        assert!(content.ends_with("update number 19"));
        assert!(!content.contains("first"));
    }

    #[test]
    fn test_stats_merge_adds_counters() {
        let a = serde_json::to_string(&PlayerStats {
            sessions: 1,
            solved: 1,
            total_questions: 10,
            total_hints: 1,
            best_score: Some(850),
        })
        .unwrap();
        let b = serde_json::to_string(&PlayerStats {
            sessions: 1,
            solved: 0,
            total_questions: 4,
            total_hints: 0,
            best_score: None,
        })
        .unwrap();
        let merged: PlayerStats =
            serde_json::from_str(&merge_content(SummaryType::PerformanceStats, &a, &b, 10).unwrap()).unwrap();
        assert_eq!(merged.sessions, 2);
        assert_eq!(merged.solved, 1);
        assert_eq!(merged.total_questions, 14);
        assert_eq!(merged.best_score, Some(850));
    }

    #[test]
    fn test_stats_merge_rejects_garbage() {
        assert!(merge_content(SummaryType::PuzzleStats, "not json", "{}", 100).is_err());
    }

    #[tokio::test]
    async fn test_put_merges_and_versions() {
        let memory = PlayerMemory::new(Arc::new(InMemoryDocumentStore::new()), 1000);
        let player = PlayerId::new("alice");

        let first = memory.put(&player, SummaryType::StyleProfile, "methodical").await.unwrap();
        assert_eq!(first.version, 1);
        let second = memory.put(&player, SummaryType::StyleProfile, "creative").await.unwrap();
        assert_eq!(second.version, 2);
        assert!(second.content.contains("methodical"));
        assert!(second.content.contains("creative"));

        let found = memory
            .search(&player, &MemoryQuery::new().with_text("creative thinking"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let context = memory.context(&player).await.unwrap().unwrap();
        assert!(context.contains("Reasoning style: creative"));
        assert!(memory.context(&PlayerId::new("bob")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_puts_for_one_player_all_land() {
        let memory = Arc::new(PlayerMemory::new(Arc::new(InMemoryDocumentStore::new()), 100_000));
        let player = PlayerId::new("alice");

        let mut handles = Vec::new();
        for i in 0..8 {
            let memory = memory.clone();
            let player = player.clone();
            handles.push(tokio::spawn(async move {
                memory
                    .put(&player, SummaryType::SessionSummary, format!("session {i}"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let doc = memory.get(&player, SummaryType::SessionSummary).await.unwrap().unwrap();
        assert_eq!(doc.version, 8);
        for i in 0..8 {
            assert!(doc.content.contains(&format!("session {i}")));
        }
    }
}
