//! The session engine: one entry point per turn.
//!
//! Each session has a slot holding its state, its puzzle, a single-slot
//! turn lock and a cancellation signal. A turn takes the lock with
//! `try_lock`, so a second concurrent turn fails fast with
//! [`Error::SessionBusy`]. Oracle and corpus calls happen first, against a
//! copy of the state; nothing is written until all of them succeed, and
//! then the events and the snapshot are committed together.

use crate::classifier::{Classification, Command, TurnClassifier, UnparseableCause};
use crate::config::{GameConfig, PartialPolicy, SessionOptions};
use crate::error::{Error, Result, UpstreamError};
use crate::id::{PlayerId, PuzzleId, SessionId};
use crate::knowledge::{KnowledgeAccessGate, KnowledgeCorpus};
use crate::memory::{DocumentStore, MemoryLayer, MemorySync};
use crate::oracle::prompt::qa_pairs;
use crate::oracle::Oracle;
use crate::puzzle::{Puzzle, PuzzleCatalog, PuzzleSummary};
use crate::session::{
    EndReason, GameSession, MessageType, Phase, Role, SessionStatus, TurnEvent, TurnResult, Verdict,
};
use crate::store::SessionStore;
use crate::verdict::{HypothesisVerdict, JudgeContext, Judgement, QuestionVerdict, VerdictEngine};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

/// Log target for game lifecycle events.
pub const GAME_EVENT: &str = "soup::game";

/// Question/answer pairs shown by the history command.
const HISTORY_PAIRS: usize = 10;

/// External services the engine is built on.
pub struct Collaborators {
    pub oracle: Arc<dyn Oracle>,
    pub corpus: Arc<dyn KnowledgeCorpus>,
    pub sessions: Arc<dyn SessionStore>,
    pub documents: Arc<dyn DocumentStore>,
}

/// Returned by [`SessionEngine::create_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: SessionId,
    /// Opening text with the puzzle statement.
    pub intro: String,
}

struct SessionSlot {
    turn: tokio::sync::Mutex<()>,
    state: RwLock<GameSession>,
    puzzle: Arc<Puzzle>,
    cancel: Notify,
}

impl SessionSlot {
    fn new(session: GameSession, puzzle: Arc<Puzzle>) -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            state: RwLock::new(session),
            puzzle,
            cancel: Notify::new(),
        }
    }

    fn snapshot(&self) -> Result<GameSession> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| Error::Validation("session state lock poisoned".into()))
    }

    fn replace(&self, session: GameSession) {
        match self.state.write() {
            Ok(mut state) => *state = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }
}

/// What the oracle-facing half of a turn decided.
enum Deliberation {
    Question(QuestionVerdict),
    Hypothesis(HypothesisVerdict),
    Command(Command),
}

/// The player-facing half of a turn before it is committed.
struct Reply {
    message_type: MessageType,
    response: String,
    verdict: Option<Verdict>,
}

/// Orchestrates sessions: classification, verdicts, commands, persistence
/// and memory.
pub struct SessionEngine {
    config: Arc<GameConfig>,
    catalog: Arc<PuzzleCatalog>,
    classifier: TurnClassifier,
    verdicts: VerdictEngine,
    gate: Arc<KnowledgeAccessGate>,
    memory: MemoryLayer,
    store: Arc<dyn SessionStore>,
    sessions: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
    degraded: AtomicBool,
}

impl SessionEngine {
    pub fn new(config: GameConfig, catalog: PuzzleCatalog, collaborators: Collaborators) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let Collaborators {
            oracle,
            corpus,
            sessions,
            documents,
        } = collaborators;

        let gate = Arc::new(KnowledgeAccessGate::new(
            corpus,
            config.kb_id_prefix.clone(),
            config.retrieval_limit,
        ));
        let classifier = TurnClassifier::new(
            oracle.clone(),
            config.prompts,
            config.oracle.clone(),
            config.classifier_context_events,
        );
        let verdicts = VerdictEngine::new(
            oracle.clone(),
            gate.clone(),
            config.oracle.clone(),
            config.max_explanation_chars,
        );
        let memory = MemoryLayer::new(sessions.clone(), documents, oracle, &config);

        Ok(Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            classifier,
            verdicts,
            gate,
            memory,
            store: sessions,
            sessions: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryLayer {
        &self.memory
    }

    pub fn puzzles(&self) -> Vec<PuzzleSummary> {
        self.catalog.list()
    }

    /// True while judged turns are refused because the corpus failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, Arc<SessionSlot>>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Validation("session registry lock poisoned".into()))
    }

    /// The slot for a session, loading it from the store if this process
    /// has not seen it yet.
    async fn slot(&self, id: SessionId) -> Result<Arc<SessionSlot>> {
        let cached = self.registry()?.get(&id).cloned();
        if let Some(slot) = cached {
            return Ok(slot);
        }

        let stored = self
            .store
            .load(id)
            .await?
            .ok_or(Error::SessionNotFound(id))?;
        let puzzle = self
            .catalog
            .get(stored.session.puzzle_id())
            .ok_or_else(|| Error::PuzzleNotFound(stored.session.puzzle_id().clone()))?;

        // Finished sessions are served from the store without staying resident.
        if stored.session.phase().is_terminal() {
            return Ok(Arc::new(SessionSlot::new(stored.session, puzzle)));
        }

        let mut registry = self.registry()?;
        if let Some(slot) = registry.get(&id) {
            return Ok(slot.clone());
        }
        tracing::info!(
            session_id = %id,
            turn_index = stored.session.turn_index(),
            phase = %stored.session.phase(),
            "resumed session from store"
        );
        self.memory.episodic().open(id, stored.events);
        let slot = Arc::new(SessionSlot::new(stored.session, puzzle));
        registry.insert(id, slot.clone());
        Ok(slot)
    }

    /// Drop a finished session's slot and cached events.
    fn evict(&self, id: SessionId) {
        if let Ok(mut registry) = self.sessions.lock() {
            registry.remove(&id);
        }
        self.memory.episodic().close(id);
        tracing::debug!(session_id = %id, "evicted finished session");
    }

    /// Start a new session on a puzzle.
    pub async fn create_session(
        &self,
        puzzle_id: &PuzzleId,
        player_id: &PlayerId,
        options: SessionOptions,
    ) -> Result<NewSession> {
        if player_id.is_blank() {
            return Err(Error::Validation("player id must not be empty".into()));
        }
        let puzzle = self
            .catalog
            .get(puzzle_id)
            .ok_or_else(|| Error::PuzzleNotFound(puzzle_id.clone()))?;

        let profile = match self.memory.player_context(player_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(player_id = %player_id, error = %e, "could not read player memory; starting without it");
                None
            }
        };

        let config = self.config.resolve(&puzzle, &options);
        config.validate().map_err(Error::Validation)?;
        let session = GameSession::new(puzzle_id.clone(), player_id.clone(), config, profile);
        let id = session.session_id();
        self.store.create(&session).await?;

        self.memory.episodic().open(id, Vec::new());
        self.registry()?
            .insert(id, Arc::new(SessionSlot::new(session, puzzle.clone())));

        tracing::info!(
            target: GAME_EVENT,
            event = "session_start",
            session_id = %id,
            player_id = %player_id,
            puzzle_id = %puzzle_id,
            max_turns = config.max_turns,
            hint_limit = config.hint_limit,
        );
        Ok(NewSession {
            session_id: id,
            intro: config.prompts.intro(&puzzle),
        })
    }

    /// Process one player input.
    pub async fn submit_turn(&self, id: SessionId, raw_input: &str) -> Result<TurnResult> {
        let input = raw_input.trim();
        if input.is_empty() {
            return Err(Error::Validation("input must not be empty".into()));
        }

        let slot = self.slot(id).await?;
        let _turn = slot.turn.try_lock().map_err(|_| Error::SessionBusy(id))?;

        let cancelled = slot.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        let before = slot.snapshot()?;
        if before.phase().is_terminal() {
            return Err(match before.end_reason() {
                Some(EndReason::TurnLimit) => Error::TurnLimitExceeded {
                    limit: before.config().max_turns,
                },
                _ => Error::SessionClosed {
                    phase: before.phase(),
                },
            });
        }

        let timeout = self.config.turn_timeout();
        let deliberation = tokio::select! {
            outcome = tokio::time::timeout(timeout, self.deliberate(&slot.puzzle, &before, input)) => {
                outcome.map_err(|_| {
                    tracing::warn!(session_id = %id, ?timeout, "turn timed out");
                    Error::Timeout(timeout)
                })??
            }
            _ = &mut cancelled => {
                tracing::info!(session_id = %id, "turn cancelled by abort");
                return Err(Error::Cancelled(id));
            }
        };

        let mut next = before.clone();
        let mut transitions = vec![before.phase()];
        let reply = self.apply(&mut next, &slot.puzzle, input, deliberation, &mut transitions)?;

        let now = Utc::now();
        let events = [
            TurnEvent {
                session_id: id,
                turn_index: before.turn_index(),
                timestamp: now,
                role: Role::Player,
                message_type: reply.message_type,
                content: input.to_string(),
                verdict: None,
            },
            TurnEvent {
                session_id: id,
                turn_index: before.turn_index() + 1,
                timestamp: now,
                role: Role::System,
                message_type: reply.message_type,
                content: reply.response.clone(),
                verdict: reply.verdict,
            },
        ];
        next.turn_index += events.len() as u64;
        next.touch();

        self.memory.episodic().append(&next, &events).await?;
        slot.replace(next.clone());
        tracing::debug!(
            session_id = %id,
            turn_index = next.turn_index(),
            phase = %next.phase(),
            message_type = ?reply.message_type,
            "turn committed"
        );

        let memory_sync = if next.phase().is_terminal() {
            let sync = self.close_out(&next).await;
            self.evict(id);
            Some(sync)
        } else {
            None
        };

        Ok(TurnResult {
            session_id: id,
            message_type: reply.message_type,
            response: reply.response,
            verdict: reply.verdict,
            phase: next.phase(),
            transitions,
            turn_index: next.turn_index(),
            hint_count: next.hint_count(),
            score: next.score(),
            memory_sync,
        })
    }

    /// Classify the input and call the judge. Reads only.
    async fn deliberate(&self, puzzle: &Puzzle, session: &GameSession, input: &str) -> Result<Deliberation> {
        let recent = self
            .memory
            .episodic()
            .recent(session.session_id(), self.config.classifier_context_events);
        let context = JudgeContext {
            player_profile: session.player_profile(),
            templates: session.config().prompts,
        };

        match self.classifier.classify(input, &recent).await {
            Classification::Command(Command::Unparseable(UnparseableCause::Oracle(e))) => {
                Err(UpstreamError::Oracle(e).into())
            }
            Classification::Command(Command::Unparseable(UnparseableCause::UnknownLabel(_))) => {
                Err(Error::ClassificationAmbiguous)
            }
            Classification::Command(Command::Unknown(word)) => Err(Error::Validation(format!(
                "unknown command '{word}'. Type /help for the list of commands"
            ))),
            Classification::Command(command) => Ok(Deliberation::Command(command)),
            Classification::Question => {
                self.check_corpus(puzzle).await?;
                let verdict = self
                    .verdicts
                    .answer_question(puzzle, input, context)
                    .await
                    .map_err(|e| self.note_upstream(e))?;
                Ok(Deliberation::Question(verdict))
            }
            Classification::Hypothesis => {
                self.check_corpus(puzzle).await?;
                let verdict = self
                    .verdicts
                    .judge_hypothesis(puzzle, input, context)
                    .await
                    .map_err(|e| self.note_upstream(e))?;
                Ok(Deliberation::Hypothesis(verdict))
            }
        }
    }

    /// Refuse judged turns while degraded, unless the corpus has recovered.
    async fn check_corpus(&self, puzzle: &Puzzle) -> Result<()> {
        if !self.degraded.load(Ordering::SeqCst) {
            return Ok(());
        }
        let health = self.gate.health(&puzzle.id).await;
        if health.is_ok() {
            self.degraded.store(false, Ordering::SeqCst);
            tracing::info!(puzzle_id = %puzzle.id, "knowledge corpus recovered; leaving degraded mode");
            Ok(())
        } else {
            Err(UpstreamError::Degraded.into())
        }
    }

    fn note_upstream(&self, error: UpstreamError) -> Error {
        if let UpstreamError::Corpus(e) = &error {
            if !self.degraded.swap(true, Ordering::SeqCst) {
                tracing::warn!(error = %e, "knowledge corpus failed; entering degraded mode");
            }
        }
        error.into()
    }

    /// Apply a deliberated turn to a copy of the session.
    fn apply(
        &self,
        session: &mut GameSession,
        puzzle: &Puzzle,
        input: &str,
        deliberation: Deliberation,
        trail: &mut Vec<Phase>,
    ) -> Result<Reply> {
        let reply = match deliberation {
            Deliberation::Question(verdict) => {
                session.begin_play(trail)?;
                session.pending_partial = false;
                session.questions_asked += 1;
                Reply {
                    message_type: MessageType::Question,
                    response: session
                        .config()
                        .prompts
                        .format_answer(verdict.answer, verdict.explanation.as_deref()),
                    verdict: Some(Verdict::Answer(verdict.answer)),
                }
            }
            Deliberation::Hypothesis(verdict) => {
                self.apply_hypothesis(session, puzzle, input, verdict, trail)?
            }
            Deliberation::Command(command) => {
                return self.apply_command(session, puzzle, command, trail);
            }
        };

        let limit = session.config().max_turns;
        if !session.phase().is_terminal() && session.judged_turns() >= limit {
            session.abort(EndReason::TurnLimit, trail)?;
            return Ok(Reply {
                response: format!(
                    "{}\n\nThat was your last turn ({limit} allowed). The full story: {}",
                    reply.response, puzzle.truth
                ),
                ..reply
            });
        }
        Ok(reply)
    }

    fn apply_hypothesis(
        &self,
        session: &mut GameSession,
        puzzle: &Puzzle,
        input: &str,
        verdict: HypothesisVerdict,
        trail: &mut Vec<Phase>,
    ) -> Result<Reply> {
        session.begin_play(trail)?;
        session.pending_partial = false;
        session.hypotheses_made += 1;
        session.advance(Phase::AwaitingFinal, trail)?;

        let mut response = session
            .config()
            .prompts
            .format_judgement(verdict.judgement, verdict.explanation.as_deref());
        match (verdict.judgement, session.config().partial_policy) {
            (Judgement::Correct, _) => {
                let score = session.complete(EndReason::Solved, trail)?;
                response.push_str(&format!("\n\nThe full story: {}\nScore: {score}", puzzle.truth));
            }
            (Judgement::PartiallyCorrect, PartialPolicy::Accept) => {
                let score = session.complete(EndReason::SettledPartial, trail)?;
                response.push_str(&format!(
                    "\n\nClose enough. The full story: {}\nScore: {score}",
                    puzzle.truth
                ));
            }
            (Judgement::PartiallyCorrect, PartialPolicy::RequireConfirmation) => {
                session.advance(Phase::Playing, trail)?;
                session.pending_partial = true;
                response.push_str("\n\nType /accept to settle for partial credit, or keep digging.");
            }
            (Judgement::PartiallyCorrect, PartialPolicy::Continue) | (Judgement::Incorrect, _) => {
                session.advance(Phase::Playing, trail)?;
            }
        }

        tracing::info!(
            target: GAME_EVENT,
            event = "hypothesis_verdict",
            session_id = %session.session_id(),
            verdict = %verdict.judgement,
            hypothesis_len = input.chars().count(),
            phase = %session.phase(),
        );
        Ok(Reply {
            message_type: MessageType::Hypothesis,
            response,
            verdict: Some(Verdict::Judgement(verdict.judgement)),
        })
    }

    fn apply_command(
        &self,
        session: &mut GameSession,
        puzzle: &Puzzle,
        command: Command,
        trail: &mut Vec<Phase>,
    ) -> Result<Reply> {
        let response = match command {
            Command::Hint => {
                let limit = session.config().hint_limit;
                if session.hint_count() >= limit {
                    return Err(Error::HintLimitExceeded { limit });
                }
                session.hint_count += 1;
                let number = session.hint_count();
                tracing::info!(
                    target: GAME_EVENT,
                    event = "hint_used",
                    session_id = %session.session_id(),
                    hint_number = number,
                    hint_limit = limit,
                );
                match puzzle.hints.get(number as usize - 1) {
                    Some(hint) => format!("Hint {number}/{limit}: {hint}"),
                    None => session.config().prompts.hint_nudge(number, limit),
                }
            }
            Command::Status => SessionStatus {
                session: session.clone(),
                title: puzzle.title.clone(),
                statement: puzzle.statement.clone(),
                truth: None,
            }
            .render(),
            Command::History => self.history(session.session_id()),
            Command::Help => session.config().prompts.help_text(),
            Command::Abort => {
                session.abort(EndReason::PlayerQuit, trail)?;
                format!("You gave up. The full story: {}", puzzle.truth)
            }
            Command::Accept => {
                if !session.pending_partial() {
                    return Err(Error::Validation(
                        "there is no partially correct hypothesis to accept".into(),
                    ));
                }
                session.advance(Phase::AwaitingFinal, trail)?;
                let score = session.complete(EndReason::SettledPartial, trail)?;
                format!("Settled. The full story: {}\nScore: {score}", puzzle.truth)
            }
            Command::Unknown(word) => {
                return Err(Error::Validation(format!("unknown command '{word}'")));
            }
            Command::Unparseable(_) => return Err(Error::ClassificationAmbiguous),
        };
        Ok(Reply {
            message_type: MessageType::Command,
            response,
            verdict: None,
        })
    }

    fn history(&self, id: SessionId) -> String {
        let events = self.memory.episodic().recent(id, usize::MAX);
        let pairs = qa_pairs(&events);
        if pairs.is_empty() {
            return "No questions asked yet.".to_string();
        }
        let skip = pairs.len().saturating_sub(HISTORY_PAIRS);
        pairs
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, (q, a))| format!("Q{}: {q}\n    A: {a}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Summarise a finished session into player and global memory.
    async fn close_out(&self, session: &GameSession) -> MemorySync {
        tracing::info!(
            target: GAME_EVENT,
            event = "session_end",
            session_id = %session.session_id(),
            player_id = %session.player_id(),
            puzzle_id = %session.puzzle_id(),
            phase = %session.phase(),
            end_reason = ?session.end_reason(),
            score = ?session.score(),
            questions = session.questions_asked(),
            hints = session.hint_count(),
        );

        let result = match self.memory.episodic().scan(session.session_id()).await {
            Ok(events) => self.memory.record_session_end(session, &events).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(sync) => sync,
            Err(e) => {
                tracing::warn!(session_id = %session.session_id(), error = %e, "memory update failed");
                MemorySync::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Current state of a session. The truth is included once it is over.
    pub async fn get_session_status(&self, id: SessionId) -> Result<SessionStatus> {
        let slot = self.slot(id).await?;
        let session = slot.snapshot()?;
        let truth = session
            .phase()
            .is_terminal()
            .then(|| slot.puzzle.truth.clone());
        Ok(SessionStatus {
            title: slot.puzzle.title.clone(),
            statement: slot.puzzle.statement.clone(),
            truth,
            session,
        })
    }

    /// Abort a session from outside a turn. An in-flight turn is cancelled
    /// best-effort; committed events are kept.
    pub async fn abort_session(&self, id: SessionId) -> Result<GameSession> {
        let slot = self.slot(id).await?;
        slot.cancel.notify_waiters();
        let _turn = slot.turn.lock().await;

        let mut session = slot.snapshot()?;
        if session.phase().is_terminal() {
            return Err(Error::SessionClosed {
                phase: session.phase(),
            });
        }
        let mut trail = Vec::new();
        session.abort(EndReason::Aborted, &mut trail)?;
        session.touch();
        self.store.save(&session).await?;
        slot.replace(session.clone());

        if let MemorySync::Failed { reason } = self.close_out(&session).await {
            tracing::debug!(session_id = %id, %reason, "abort kept despite memory failure");
        }
        self.evict(id);
        Ok(session)
    }

    /// Load a session into this engine, e.g. after a restart.
    pub async fn resume_session(&self, id: SessionId) -> Result<GameSession> {
        self.slot(id).await?.snapshot()
    }

    pub async fn list_sessions(&self) -> Result<Vec<GameSession>> {
        Ok(self.store.list().await?)
    }

    /// Every committed event of a session, oldest first.
    pub async fn session_events(&self, id: SessionId) -> Result<Vec<TurnEvent>> {
        self.slot(id).await?;
        Ok(self.memory.episodic().scan(id).await?)
    }
}
