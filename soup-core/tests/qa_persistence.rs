//! Save, resume and memory across engine restarts on the filesystem stores.

use soup_core::memory::{DocumentStore, FileDocumentStore, SummaryType};
use soup_core::oracle::PromptPurpose;
use soup_core::session::{MessageType, Role, TurnEvent};
use soup_core::store::{FileSessionStore, SessionSnapshot};
use soup_core::testing::{assert_gapless, sample_puzzle, second_puzzle, ScriptedOracle};
use soup_core::{
    Collaborators, ErrorKind, GameConfig, KeywordCorpus, Phase, PlayerId, PuzzleCatalog,
    SessionEngine, SessionId, SessionOptions,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Build an engine whose sessions and memory live under `root`.
async fn engine_at(root: &Path, oracle: Arc<ScriptedOracle>) -> SessionEngine {
    let config = GameConfig::default();
    let catalog = PuzzleCatalog::from_puzzles([sample_puzzle(), second_puzzle()]);
    let corpus = KeywordCorpus::new();
    for puzzle in catalog.iter() {
        corpus.ingest_puzzle(&config.kb_id_prefix, puzzle).unwrap();
    }
    let sessions = FileSessionStore::open(root.join("sessions")).await.unwrap();
    let documents = FileDocumentStore::open(root.join("memory")).await.unwrap();

    SessionEngine::new(
        config,
        catalog,
        Collaborators {
            oracle,
            corpus: Arc::new(corpus),
            sessions: Arc::new(sessions),
            documents: Arc::new(documents),
        },
    )
    .unwrap()
}

async fn start(engine: &SessionEngine, player: &str) -> SessionId {
    engine
        .create_session(&sample_puzzle().id, &PlayerId::new(player), SessionOptions::new())
        .await
        .unwrap()
        .session_id
}

// =============================================================================
// Resume
// =============================================================================

#[tokio::test]
async fn test_resume_after_restart_is_identical() {
    let dir = TempDir::new().unwrap();
    let oracle = Arc::new(ScriptedOracle::new());

    let (id, before) = {
        let engine = engine_at(dir.path(), oracle.clone()).await;
        let id = start(&engine, "alice").await;
        oracle.push(PromptPurpose::Answer, "VERDICT: NO");
        engine.submit_turn(id, "Was he thirsty?").await.unwrap();
        engine.submit_turn(id, "/hint").await.unwrap();
        let before = engine.get_session_status(id).await.unwrap().session;
        (id, before)
    };

    let engine = engine_at(dir.path(), oracle.clone()).await;
    let resumed = engine.resume_session(id).await.unwrap();
    assert_eq!(resumed, before);
    assert_eq!(resumed.turn_index(), 4);
    assert_eq!(resumed.hint_count(), 1);

    oracle.push(PromptPurpose::Answer, "VERDICT: YES");
    let next = engine.submit_turn(id, "Did the gun scare him?").await.unwrap();
    assert_eq!(next.turn_index, 6);

    let events = engine.session_events(id).await.unwrap();
    assert_eq!(events.len(), 6);
    assert_gapless(&events);
}

#[tokio::test]
async fn test_snapshot_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(dir.path(), Arc::new(ScriptedOracle::new())).await;
    let id = start(&engine, "alice").await;
    engine.submit_turn(id, "Was he thirsty?").await.unwrap();

    let session = engine.get_session_status(id).await.unwrap().session;
    let json = SessionSnapshot::new(&session).to_json().unwrap();
    let back = SessionSnapshot::from_json(&json).unwrap();
    assert_eq!(back.session, session);
}

#[tokio::test]
async fn test_uncommitted_tail_is_discarded() {
    let dir = TempDir::new().unwrap();
    let oracle = Arc::new(ScriptedOracle::new());
    let id = {
        let engine = engine_at(dir.path(), oracle.clone()).await;
        let id = start(&engine, "alice").await;
        engine.submit_turn(id, "Was he thirsty?").await.unwrap();
        id
    };

    // A crash after appending events but before the snapshot was replaced.
    let orphan = TurnEvent {
        session_id: id,
        turn_index: 2,
        timestamp: chrono::Utc::now(),
        role: Role::Player,
        message_type: MessageType::Question,
        content: "Was it night?".into(),
        verdict: None,
    };
    let log = dir
        .path()
        .join("sessions")
        .join("events")
        .join(format!("{id}.jsonl"));
    let mut content = std::fs::read_to_string(&log).unwrap();
    content.push_str(&serde_json::to_string(&orphan).unwrap());
    content.push('\n');
    std::fs::write(&log, content).unwrap();

    let engine = engine_at(dir.path(), oracle).await;
    let events = engine.session_events(id).await.unwrap();
    assert_eq!(events.len(), 2);

    let next = engine.submit_turn(id, "Was it night?").await.unwrap();
    assert_eq!(next.turn_index, 4);
    assert_gapless(&engine.session_events(id).await.unwrap());
}

#[tokio::test]
async fn test_failed_snapshot_write_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let oracle = Arc::new(ScriptedOracle::new());
    let root = dir.path().join("sessions");
    let id = {
        let engine = engine_at(dir.path(), oracle.clone()).await;
        let id = start(&engine, "alice").await;
        let snapshot = root.join("sessions").join(format!("{id}.json"));
        let log = root.join("events").join(format!("{id}.jsonl"));

        // A directory in place of the snapshot makes the rename fail.
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();
        let err = engine.submit_turn(id, "/help").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        let logged = std::fs::read_to_string(&log).unwrap_or_default();
        assert_eq!(logged.lines().count(), 0);

        std::fs::remove_dir(&snapshot).unwrap();
        let retried = engine.submit_turn(id, "/help").await.unwrap();
        assert_eq!(retried.turn_index, 2);
        id
    };

    let engine = engine_at(dir.path(), oracle).await;
    let resumed = engine.resume_session(id).await.unwrap();
    assert_eq!(resumed.turn_index(), 2);
    let events = engine.session_events(id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_gapless(&events);
}

#[tokio::test]
async fn test_schema_mismatch_only_affects_that_session() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(dir.path(), Arc::new(ScriptedOracle::new())).await;
    let good = start(&engine, "alice").await;

    let stale = SessionId::new();
    std::fs::write(
        dir.path().join("sessions").join("sessions").join(format!("{stale}.json")),
        r#"{"schema_version": 0, "saved_at": "2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let restarted = engine_at(dir.path(), Arc::new(ScriptedOracle::new())).await;
    let err = restarted.resume_session(stale).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

    restarted.resume_session(good).await.unwrap();
    let listed = restarted.list_sessions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id(), good);
}

#[tokio::test]
async fn test_aborted_session_stays_aborted_after_restart() {
    let dir = TempDir::new().unwrap();
    let oracle = Arc::new(ScriptedOracle::new());
    let id = {
        let engine = engine_at(dir.path(), oracle.clone()).await;
        let id = start(&engine, "alice").await;
        engine.submit_turn(id, "Was he thirsty?").await.unwrap();
        engine.abort_session(id).await.unwrap();
        id
    };

    let engine = engine_at(dir.path(), oracle).await;
    let status = engine.get_session_status(id).await.unwrap();
    assert_eq!(status.session.phase(), Phase::Aborted);
    assert!(status.truth.is_some());
    assert_eq!(engine.session_events(id).await.unwrap().len(), 2);
}

// =============================================================================
// Memory
// =============================================================================

#[tokio::test]
async fn test_player_memory_merges_across_sessions() {
    let dir = TempDir::new().unwrap();
    let oracle = Arc::new(ScriptedOracle::new());
    let engine = engine_at(dir.path(), oracle.clone()).await;
    let alice = PlayerId::new("alice");

    let first = start(&engine, "alice").await;
    oracle.push(PromptPurpose::Classify, "HYPOTHESIS");
    oracle.push(PromptPurpose::Judge, "VERDICT: CORRECT");
    oracle.push(
        PromptPurpose::Summarize,
        "SUMMARY: Went straight for the answer.\nREASONING_STYLE: Intuitive\n\
         MISTAKES: none\nSTRENGTHS: bold guesses",
    );
    engine.submit_turn(first, "He had hiccups").await.unwrap();

    let second = start(&engine, "alice").await;
    let profile = engine
        .get_session_status(second)
        .await
        .unwrap()
        .session
        .player_profile()
        .map(str::to_string)
        .unwrap();
    assert!(profile.contains("Reasoning style: Intuitive"));

    engine.submit_turn(second, "Was he thirsty?").await.unwrap();
    let result = engine.submit_turn(second, "/quit").await.unwrap();
    assert!(result.memory_sync.is_some());

    let players = engine.memory().players();
    let summary = players
        .get(&alice, SummaryType::SessionSummary)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.version, 2);
    assert!(summary.content.contains("Went straight for the answer."));
    assert!(summary.content.contains("Did not complete the puzzle."));

    let stats = players.stats(&alice).await.unwrap().unwrap();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.solved, 1);
    assert_eq!(stats.best_score, Some(1000));

    let puzzle_stats = engine
        .memory()
        .global()
        .puzzle_stats(&sample_puzzle().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(puzzle_stats.total_sessions, 2);
    assert_eq!(puzzle_stats.success_count, 1);

    // Memory is on disk, namespaced per player.
    let documents = FileDocumentStore::open(dir.path().join("memory")).await.unwrap();
    let stored = documents.list("player:alice").await.unwrap();
    assert!(stored.iter().any(|d| d.summary_type == SummaryType::StyleProfile));
    assert!(documents.list("player:bob").await.unwrap().is_empty());
}
