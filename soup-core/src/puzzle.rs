//! Puzzle definitions and the catalog they are loaded into.
//!
//! A puzzle lives in its own directory under the data root; the first JSON
//! file in that directory describes it and the directory name becomes its
//! id. The catalog is read once at startup and is immutable afterwards.

use crate::id::PuzzleId;
use crate::knowledge::{KnowledgeDocument, Tier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

/// Errors from loading puzzle files.
#[derive(Debug, Error)]
pub enum PuzzleError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid puzzle file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Puzzle {0} has an empty statement or answer")]
    Incomplete(PuzzleId),
}

/// Limits a puzzle may impose on its sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PuzzleConstraints {
    pub max_turns: Option<u32>,
    pub max_hints: Option<u32>,
}

/// One situation puzzle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: PuzzleId,
    pub title: String,
    /// The scenario shown to the player.
    pub statement: String,
    /// The hidden explanation. Never shown before the session ends.
    pub truth: String,
    /// Authored hints, released in order.
    #[serde(default)]
    pub hints: Vec<String>,
    /// Extra facts the judge may use but the player never sees.
    #[serde(default)]
    pub additional_info: Vec<String>,
    #[serde(default)]
    pub constraints: PuzzleConstraints,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Puzzle {
    pub fn new(
        id: impl Into<PuzzleId>,
        statement: impl Into<String>,
        truth: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            title: id.to_string(),
            id,
            statement: statement.into(),
            truth: truth.into(),
            hints: Vec::new(),
            additional_info: Vec::new(),
            constraints: PuzzleConstraints::default(),
            difficulty: None,
            tags: Vec::new(),
            language: default_language(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info.push(info.into());
        self
    }

    pub fn with_constraints(mut self, constraints: PuzzleConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Split the puzzle into tiered knowledge documents for ingestion.
    ///
    /// The statement is public, each hint is hint tier, and the truth plus
    /// every piece of additional info is secret.
    pub fn documents(&self) -> Vec<KnowledgeDocument> {
        let mut docs = Vec::with_capacity(2 + self.hints.len() + self.additional_info.len());
        docs.push(KnowledgeDocument::new(
            format!("{}:statement", self.id),
            self.id.clone(),
            Tier::Public,
            self.statement.clone(),
        ));
        for (i, hint) in self.hints.iter().enumerate() {
            docs.push(KnowledgeDocument::new(
                format!("{}:hint:{}", self.id, i + 1),
                self.id.clone(),
                Tier::Hint,
                hint.clone(),
            ));
        }
        docs.push(KnowledgeDocument::new(
            format!("{}:truth", self.id),
            self.id.clone(),
            Tier::Secret,
            self.truth.clone(),
        ));
        for (i, info) in self.additional_info.iter().enumerate() {
            docs.push(KnowledgeDocument::new(
                format!("{}:info:{}", self.id, i + 1),
                self.id.clone(),
                Tier::Secret,
                info.clone(),
            ));
        }
        docs
    }

    pub fn summary(&self) -> PuzzleSummary {
        PuzzleSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            difficulty: self.difficulty.clone(),
            tags: self.tags.clone(),
            language: self.language.clone(),
            hint_count: self.hints.len(),
        }
    }
}

/// Catalog listing entry. Carries nothing secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleSummary {
    pub id: PuzzleId,
    pub title: String,
    pub difficulty: Option<String>,
    pub tags: Vec<String>,
    pub language: String,
    pub hint_count: usize,
}

/// On-disk puzzle layout.
#[derive(Debug, Deserialize)]
struct PuzzleFile {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    puzzle: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    hints: Vec<Value>,
    #[serde(default)]
    additional_info: Vec<Value>,
    #[serde(default)]
    constraints: PuzzleConstraints,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

impl PuzzleFile {
    fn into_puzzle(self, id: PuzzleId, file_name: &str) -> Result<Puzzle, PuzzleError> {
        if self.puzzle.trim().is_empty() || self.answer.trim().is_empty() {
            return Err(PuzzleError::Incomplete(id));
        }

        let mut hints: Vec<String> = self.hints.iter().filter_map(value_text).collect();
        let mut additional_info = Vec::new();
        for info in &self.additional_info {
            // Inline {"hint": ...} entries are authored hints, not judge facts.
            let inline_hint = info
                .as_object()
                .and_then(|o| o.get("hint").or_else(|| o.get("Hint")))
                .and_then(value_text);
            match inline_hint {
                Some(hint) => hints.push(hint),
                None => additional_info.extend(value_text(info)),
            }
        }

        let language = self
            .language
            .unwrap_or_else(|| detect_language(file_name).to_string());

        Ok(Puzzle {
            title: self.title.unwrap_or_else(|| id.to_string()),
            id,
            statement: self.puzzle,
            truth: self.answer,
            hints,
            additional_info,
            constraints: self.constraints,
            difficulty: self.difficulty,
            tags: self.tags,
            language,
        })
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn detect_language(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.contains("_zh") || lower.contains("chinese") {
        "zh"
    } else {
        "en"
    }
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || name.starts_with("template")
}

/// Read-only collection of puzzles keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PuzzleCatalog {
    puzzles: BTreeMap<PuzzleId, Arc<Puzzle>>,
}

impl PuzzleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_puzzles(puzzles: impl IntoIterator<Item = Puzzle>) -> Self {
        let mut catalog = Self::new();
        for puzzle in puzzles {
            catalog.insert(puzzle);
        }
        catalog
    }

    pub fn insert(&mut self, puzzle: Puzzle) {
        self.puzzles.insert(puzzle.id.clone(), Arc::new(puzzle));
    }

    /// Load every puzzle directory under `root`.
    ///
    /// Directories starting with `.`, `_` or `template` are skipped, as are
    /// directories without a JSON file.
    pub async fn load_dir(root: impl AsRef<Path>) -> Result<Self, PuzzleError> {
        let root = root.as_ref();
        let mut catalog = Self::new();
        let mut entries = fs::read_dir(root).await.map_err(io_error(root))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error(root))? {
            let dir = entry.path();
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            if !entry.file_type().await.map_err(io_error(&dir))?.is_dir() || is_skipped_dir(&name) {
                continue;
            }
            let Some(file) = first_json_file(&dir).await? else {
                tracing::debug!(dir = %dir.display(), "skipping puzzle dir without json");
                continue;
            };
            let bytes = fs::read(&file).await.map_err(io_error(&file))?;
            let raw: PuzzleFile =
                serde_json::from_slice(&bytes).map_err(|source| PuzzleError::Json {
                    path: file.clone(),
                    source,
                })?;
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            catalog.insert(raw.into_puzzle(PuzzleId::new(name), &file_name)?);
        }

        tracing::info!(root = %root.display(), puzzles = catalog.len(), "loaded puzzle catalog");
        Ok(catalog)
    }

    pub fn get(&self, id: &PuzzleId) -> Option<Arc<Puzzle>> {
        self.puzzles.get(id).cloned()
    }

    pub fn list(&self) -> Vec<PuzzleSummary> {
        self.puzzles.values().map(|p| p.summary()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Puzzle>> {
        self.puzzles.values()
    }

    pub fn len(&self) -> usize {
        self.puzzles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puzzles.is_empty()
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PuzzleError {
    let path = path.to_path_buf();
    move |source| PuzzleError::Io { path, source }
}

async fn first_json_file(dir: &Path) -> Result<Option<PathBuf>, PuzzleError> {
    let mut entries = fs::read_dir(dir).await.map_err(io_error(dir))?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_puzzle;

    #[test]
    fn test_documents_are_tiered() {
        let puzzle = sample_puzzle();
        let docs = puzzle.documents();

        let public: Vec<_> = docs.iter().filter(|d| d.tier() == Tier::Public).collect();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].content(), puzzle.statement);

        let hints = docs.iter().filter(|d| d.tier() == Tier::Hint).count();
        assert_eq!(hints, puzzle.hints.len());

        assert!(docs
            .iter()
            .any(|d| d.tier() == Tier::Secret && d.content() == puzzle.truth));
        assert!(docs
            .iter()
            .filter(|d| d.tier() != Tier::Secret)
            .all(|d| !d.content().contains(&puzzle.truth)));
    }

    #[tokio::test]
    async fn test_load_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("lighthouse");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(
            dir.join("lighthouse_en.json"),
            r#"{
                "title": "The Lighthouse",
                "puzzle": "A man turns off a light and many people die.",
                "answer": "He was a lighthouse keeper and a ship crashed.",
                "hints": ["Think about his job."],
                "additional_info": [{"hint": "It was near the sea."}, "The ship hit rocks."],
                "constraints": {"max_hints": 2},
                "tags": ["classic"]
            }"#,
        )
        .unwrap();
        std::fs::create_dir(root.path().join("_drafts")).unwrap();
        std::fs::write(root.path().join("_drafts").join("x.json"), "not json").unwrap();
        std::fs::create_dir(root.path().join("empty")).unwrap();

        let catalog = PuzzleCatalog::load_dir(root.path()).await.unwrap();
        assert_eq!(catalog.len(), 1);

        let puzzle = catalog.get(&PuzzleId::new("lighthouse")).unwrap();
        assert_eq!(puzzle.title, "The Lighthouse");
        assert_eq!(puzzle.hints.len(), 2);
        assert_eq!(puzzle.additional_info, vec!["The ship hit rocks.".to_string()]);
        assert_eq!(puzzle.constraints.max_hints, Some(2));
        assert_eq!(puzzle.language, "en");
    }

    #[tokio::test]
    async fn test_load_dir_rejects_incomplete() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("p.json"), r#"{"puzzle": "Only a statement"}"#).unwrap();

        let err = PuzzleCatalog::load_dir(root.path()).await.unwrap_err();
        assert!(matches!(err, PuzzleError::Incomplete(_)));
    }

    #[tokio::test]
    async fn test_bundled_puzzles_load() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../data/puzzles");
        let catalog = PuzzleCatalog::load_dir(root).await.unwrap();
        assert!(catalog.get(&PuzzleId::new("hiccups")).is_some());
        let lighthouse = catalog.get(&PuzzleId::new("lighthouse")).unwrap();
        assert_eq!(lighthouse.hints.len(), 2);
    }
}
