//! Turn flow through the session engine with a scripted oracle.

use soup_core::error::{ErrorKind, OracleError};
use soup_core::memory::{MemorySync, SummarySource};
use soup_core::oracle::PromptPurpose;
use soup_core::session::{EndReason, Verdict};
use soup_core::testing::{assert_gapless, assert_phase, sample_puzzle, ScriptedOracle, TestHarness};
use soup_core::{Answer, Error, GameConfig, Judgement, PartialPolicy, Phase, SessionId, SessionOptions};
use std::time::Duration;

// =============================================================================
// The hiccups scenario
// =============================================================================

#[tokio::test]
async fn test_hiccups_scenario() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;

    h.oracle.push(
        PromptPurpose::Answer,
        "VERDICT: NO\nEXPLANATION: His thirst is not the point.",
    );
    let asked = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap();
    assert_eq!(asked.verdict, Some(Verdict::Answer(Answer::No)));
    assert_eq!(asked.transitions, vec![Phase::Intro, Phase::Playing]);
    assert_eq!(asked.turn_index, 2);
    assert!(asked.memory_sync.is_none());

    h.oracle.push(PromptPurpose::Classify, "HYPOTHESIS");
    h.oracle.push(PromptPurpose::Judge, "VERDICT: CORRECT\nEXPLANATION: Exactly.");
    let solved = h
        .engine
        .submit_turn(id, "He had hiccups and was scared on purpose")
        .await
        .unwrap();

    assert_eq!(solved.verdict, Some(Verdict::Judgement(Judgement::Correct)));
    assert_eq!(
        solved.transitions,
        vec![Phase::Playing, Phase::AwaitingFinal, Phase::Completed]
    );
    assert_phase(solved.phase, Phase::Completed);
    assert_eq!(solved.score, Some(990));
    assert_eq!(
        solved.memory_sync,
        Some(MemorySync::Updated {
            source: SummarySource::Fallback,
            profile_version: 1,
        })
    );

    let status = h.engine.get_session_status(id).await.unwrap();
    assert_eq!(status.session.end_reason(), Some(EndReason::Solved));
    assert_eq!(status.truth.as_deref(), Some(sample_puzzle().truth.as_str()));

    let events = h.events(id).await;
    assert_eq!(events.len(), 4);
    assert_gapless(&events);
}

#[tokio::test]
async fn test_terminal_session_rejects_turns() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;
    h.engine.submit_turn(id, "/quit").await.unwrap();

    let err = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed { phase: Phase::Aborted }));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// =============================================================================
// Limits
// =============================================================================

#[tokio::test]
async fn test_sixth_hint_fails_and_count_stays() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;

    for expected in 1..=5 {
        let result = h.engine.submit_turn(id, "/hint").await.unwrap();
        assert_eq!(result.hint_count, expected);
    }
    let err = h.engine.submit_turn(id, "/hint").await.unwrap_err();
    assert!(matches!(err, Error::HintLimitExceeded { limit: 5 }));
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let (phase, turn_index, hints) = h.status(id).await;
    assert_eq!(hints, 5);
    assert_eq!(turn_index, 10);
    assert_phase(phase, Phase::Intro);

    // The session carries on after a refused hint.
    h.engine.submit_turn(id, "Was he thirsty?").await.unwrap();
}

#[tokio::test]
async fn test_session_option_overrides_hint_limit() {
    let h = TestHarness::new().unwrap();
    let id = h
        .create_with("alice", SessionOptions::new().with_hint_limit(1))
        .await
        .unwrap()
        .session_id;
    h.engine.submit_turn(id, "/hint").await.unwrap();
    let err = h.engine.submit_turn(id, "/hint").await.unwrap_err();
    assert!(matches!(err, Error::HintLimitExceeded { limit: 1 }));
}

#[tokio::test]
async fn test_turn_cap_aborts_on_last_judged_turn() {
    let h = TestHarness::new().unwrap();
    let id = h
        .create_with("alice", SessionOptions::new().with_max_turns(2))
        .await
        .unwrap()
        .session_id;

    let first = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap();
    assert_phase(first.phase, Phase::Playing);

    // Commands do not count against the cap.
    h.engine.submit_turn(id, "/status").await.unwrap();

    let last = h.engine.submit_turn(id, "Was he sick?").await.unwrap();
    assert_phase(last.phase, Phase::Aborted);
    assert_eq!(last.transitions, vec![Phase::Playing, Phase::Aborted]);
    assert!(last.response.contains(&sample_puzzle().truth));
    assert!(matches!(last.memory_sync, Some(MemorySync::Updated { .. })));

    let err = h.engine.submit_turn(id, "Was it night?").await.unwrap_err();
    assert!(matches!(err, Error::TurnLimitExceeded { limit: 2 }));
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let events = h.events(id).await;
    assert_eq!(events.len(), 6);
    assert_gapless(&events);
}

// =============================================================================
// Partially correct hypotheses
// =============================================================================

async fn partial(h: &TestHarness, id: SessionId) -> soup_core::TurnResult {
    h.oracle.push(PromptPurpose::Classify, "HYPOTHESIS");
    h.oracle.push(PromptPurpose::Judge, "VERDICT: PARTIALLY_CORRECT");
    h.engine
        .submit_turn(id, "The bartender wanted to help him somehow")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_partial_requires_confirmation_by_default() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;

    let judged = partial(&h, id).await;
    assert_phase(judged.phase, Phase::Playing);
    assert_eq!(
        judged.transitions,
        vec![Phase::Intro, Phase::Playing, Phase::AwaitingFinal, Phase::Playing]
    );
    assert!(judged.response.contains("/accept"));

    let accepted = h.engine.submit_turn(id, "/accept").await.unwrap();
    assert_phase(accepted.phase, Phase::Completed);
    assert_eq!(
        accepted.transitions,
        vec![Phase::Playing, Phase::AwaitingFinal, Phase::Completed]
    );
    assert_eq!(accepted.score, Some(500));

    let status = h.engine.get_session_status(id).await.unwrap();
    assert_eq!(status.session.end_reason(), Some(EndReason::SettledPartial));
}

#[tokio::test]
async fn test_further_question_clears_pending_partial() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;
    partial(&h, id).await;

    h.engine.submit_turn(id, "Was he thirsty?").await.unwrap();
    let err = h.engine.submit_turn(id, "/accept").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_partial_accept_policy_completes_at_half_score() {
    let config = GameConfig::default().with_partial_policy(PartialPolicy::Accept);
    let h = TestHarness::with_config(config).unwrap();
    let id = h.create("alice").await.session_id;

    let judged = partial(&h, id).await;
    assert_phase(judged.phase, Phase::Completed);
    assert_eq!(judged.score, Some(500));
}

#[tokio::test]
async fn test_partial_continue_policy_keeps_playing() {
    let h = TestHarness::new().unwrap();
    let id = h
        .create_with(
            "alice",
            SessionOptions::new().with_partial_policy(PartialPolicy::Continue),
        )
        .await
        .unwrap()
        .session_id;

    let judged = partial(&h, id).await;
    assert_phase(judged.phase, Phase::Playing);
    assert!(h.engine.submit_turn(id, "/accept").await.is_err());
}

#[tokio::test]
async fn test_incorrect_hypothesis_reverts_to_playing() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;

    let judged = h.engine.submit_turn(id, "I think he was a spy").await.unwrap();
    assert_eq!(judged.verdict, Some(Verdict::Judgement(Judgement::Incorrect)));
    assert_eq!(
        judged.transitions,
        vec![Phase::Intro, Phase::Playing, Phase::AwaitingFinal, Phase::Playing]
    );
    assert_eq!(h.oracle.calls(PromptPurpose::Judge), 1);
}

// =============================================================================
// Upstream failures
// =============================================================================

#[tokio::test]
async fn test_oracle_error_leaves_state_unchanged_and_retry_succeeds() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;
    let before = h.status(id).await;

    h.oracle
        .push_error(PromptPurpose::Answer, OracleError::Network("connection reset".into()));
    let err = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(err.is_retryable());
    assert_eq!(h.status(id).await, before);
    assert!(h.events(id).await.is_empty());

    h.oracle.push(PromptPurpose::Answer, "VERDICT: NO");
    let retried = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap();
    assert_eq!(retried.turn_index, 2);
    let events = h.events(id).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].content, "Was he thirsty?");
    assert_eq!(events[1].verdict, Some(Verdict::Answer(Answer::No)));
}

#[tokio::test]
async fn test_classifier_failures_fail_closed() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;

    h.oracle.push(PromptPurpose::Classify, "I am not sure");
    let err = h.engine.submit_turn(id, "hmm the gun").await.unwrap_err();
    assert!(matches!(err, Error::ClassificationAmbiguous));

    h.oracle
        .push_error(PromptPurpose::Classify, OracleError::Api { status: 529, message: "overloaded".into() });
    let err = h.engine.submit_turn(id, "hmm the gun").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);

    // Neither reached the judge.
    assert_eq!(h.oracle.calls(PromptPurpose::Answer), 0);
    assert_eq!(h.oracle.calls(PromptPurpose::Judge), 0);
    assert_eq!(h.status(id).await.1, 0);
}

#[tokio::test]
async fn test_unreadable_verdict_is_upstream_error() {
    let h = TestHarness::new().unwrap();
    let id = h.create("alice").await.session_id;
    h.oracle.push(PromptPurpose::Answer, "Let me think about that.");
    let err = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(h.status(id).await.1, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_commits_nothing() {
    let config = GameConfig::default().with_turn_timeout(Duration::from_secs(1));
    let h = TestHarness::build(config, ScriptedOracle::new().with_delay(Duration::from_secs(5))).unwrap();
    let id = h.create("alice").await.session_id;

    let err = h.engine.submit_turn(id, "Was he thirsty?").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(h.status(id).await, (Phase::Intro, 0, 0));
}

// =============================================================================
// Concurrency and cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_turns_one_busy() {
    let h = TestHarness::build(
        GameConfig::default(),
        ScriptedOracle::new().with_delay(Duration::from_millis(50)),
    )
    .unwrap();
    let id = h.create("alice").await.session_id;

    let (a, b) = tokio::join!(
        h.engine.submit_turn(id, "Was he thirsty?"),
        h.engine.submit_turn(id, "Was it raining?"),
    );
    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(Error::SessionBusy(_))))
        .count();
    assert_eq!((ok, busy), (1, 1));
    assert_eq!(h.events(id).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_progress_independently() {
    let h = TestHarness::build(
        GameConfig::default(),
        ScriptedOracle::new().with_delay(Duration::from_millis(50)),
    )
    .unwrap();
    let a = h.create("alice").await.session_id;
    let b = h.create("bob").await.session_id;

    let (ra, rb) = tokio::join!(
        h.engine.submit_turn(a, "Was he thirsty?"),
        h.engine.submit_turn(b, "Was he thirsty?"),
    );
    assert!(ra.is_ok());
    assert!(rb.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_abort_cancels_in_flight_turn() {
    let h = TestHarness::build(
        GameConfig::default(),
        ScriptedOracle::new().with_delay(Duration::from_secs(30)),
    )
    .unwrap();
    let id = h.create("alice").await.session_id;

    let engine = h.engine.clone();
    let turn = tokio::spawn(async move { engine.submit_turn(id, "Was he thirsty?").await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let aborted = h.engine.abort_session(id).await.unwrap();
    assert_phase(aborted.phase(), Phase::Aborted);
    assert_eq!(aborted.end_reason(), Some(EndReason::Aborted));

    let err = turn.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(h.events(id).await.is_empty());

    let again = h.engine.abort_session(id).await.unwrap_err();
    assert!(matches!(again, Error::SessionClosed { .. }));
}

// =============================================================================
// Lookup failures
// =============================================================================

#[tokio::test]
async fn test_unknown_ids() {
    let h = TestHarness::new().unwrap();
    let missing = SessionId::new();
    let err = h.engine.submit_turn(missing, "Was he thirsty?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h
        .engine
        .create_session(&"no-such-puzzle".into(), &"alice".into(), SessionOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PuzzleNotFound(_)));

    let err = h.create_with("  ", SessionOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_unknown_schema_version_is_rejected() {
    let h = TestHarness::new().unwrap();
    let stale = SessionId::new();
    h.sessions
        .put_raw_snapshot(stale, r#"{"schema_version": 2, "session": {}}"#)
        .unwrap();

    let err = h.engine.get_session_status(stale).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

    // Other sessions are unaffected.
    let id = h.create("alice").await.session_id;
    h.engine.submit_turn(id, "Was he thirsty?").await.unwrap();

    let listed = h.engine.list_sessions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id(), id);
}
