//! Session state and the transitions it allows.
//!
//! A [`GameSession`] is only ever changed by the engine while it holds the
//! session's turn lock. Callers get clones.

use crate::config::SessionConfig;
use crate::error::Error;
use crate::id::{PlayerId, PuzzleId, SessionId};
use crate::memory::MemorySync;
use crate::verdict::{Answer, Judgement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Points a solved session starts from.
pub const BASE_SCORE: u32 = 1000;
/// Lowest score a solved session can get.
pub const MIN_SCORE: u32 = 100;
const QUESTION_PENALTY: u32 = 10;
const HINT_PENALTY: u32 = 50;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Intro,
    Playing,
    /// Transient while a hypothesis is judged. Never persisted.
    AwaitingFinal,
    Completed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Intro, Playing) => true,
            (Playing, AwaitingFinal) => true,
            (AwaitingFinal, Completed) | (AwaitingFinal, Playing) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intro => "INTRO",
            Phase::Playing => "PLAYING",
            Phase::AwaitingFinal => "AWAITING_FINAL",
            Phase::Completed => "COMPLETED",
            Phase::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Solved,
    /// A partially correct hypothesis was accepted.
    SettledPartial,
    PlayerQuit,
    TurnLimit,
    /// Aborted through the engine API rather than a player command.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    Hypothesis,
    Command,
}

/// Verdict attached to a system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verdict {
    Answer(Answer),
    Judgement(Judgement),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Answer(a) => a.fmt(f),
            Verdict::Judgement(j) => j.fmt(f),
        }
    }
}

/// One entry in a session's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    pub session_id: SessionId,
    pub turn_index: u64,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

/// Score for a solved session.
pub fn score_for(questions: u32, hints: u32) -> u32 {
    let penalty = questions
        .saturating_mul(QUESTION_PENALTY)
        .saturating_add(hints.saturating_mul(HINT_PENALTY));
    BASE_SCORE.saturating_sub(penalty).max(MIN_SCORE)
}

/// State of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub(crate) session_id: SessionId,
    pub(crate) puzzle_id: PuzzleId,
    pub(crate) player_id: PlayerId,
    pub(crate) phase: Phase,
    pub(crate) turn_index: u64,
    pub(crate) hint_count: u32,
    pub(crate) questions_asked: u32,
    pub(crate) hypotheses_made: u32,
    pub(crate) pending_partial: bool,
    pub(crate) score: Option<u32>,
    pub(crate) end_reason: Option<EndReason>,
    pub(crate) config: SessionConfig,
    /// Player memory read once at creation.
    pub(crate) player_profile: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    pub(crate) fn new(
        puzzle_id: PuzzleId,
        player_id: PlayerId,
        config: SessionConfig,
        player_profile: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            puzzle_id,
            player_id,
            phase: Phase::Intro,
            turn_index: 0,
            hint_count: 0,
            questions_asked: 0,
            hypotheses_made: 0,
            pending_partial: false,
            score: None,
            end_reason: None,
            config,
            player_profile,
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn puzzle_id(&self) -> &PuzzleId {
        &self.puzzle_id
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of committed events.
    pub fn turn_index(&self) -> u64 {
        self.turn_index
    }

    pub fn hint_count(&self) -> u32 {
        self.hint_count
    }

    pub fn questions_asked(&self) -> u32 {
        self.questions_asked
    }

    pub fn hypotheses_made(&self) -> u32 {
        self.hypotheses_made
    }

    /// Questions plus hypotheses. Counted against the turn limit.
    pub fn judged_turns(&self) -> u32 {
        self.questions_asked + self.hypotheses_made
    }

    pub fn pending_partial(&self) -> bool {
        self.pending_partial
    }

    pub fn score(&self) -> Option<u32> {
        self.score
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn player_profile(&self) -> Option<&str> {
        self.player_profile.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn hints_remaining(&self) -> u32 {
        self.config.hint_limit.saturating_sub(self.hint_count)
    }

    pub fn turns_remaining(&self) -> u32 {
        self.config.max_turns.saturating_sub(self.judged_turns())
    }

    /// Move to `next`, recording it in `trail`.
    pub(crate) fn advance(&mut self, next: Phase, trail: &mut Vec<Phase>) -> Result<(), Error> {
        if self.phase == next {
            return Ok(());
        }
        if !self.phase.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        trail.push(next);
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Leave the intro on the first question or hypothesis.
    pub(crate) fn begin_play(&mut self, trail: &mut Vec<Phase>) -> Result<(), Error> {
        if self.phase == Phase::Intro {
            self.advance(Phase::Playing, trail)?;
        }
        Ok(())
    }

    pub(crate) fn complete(
        &mut self,
        reason: EndReason,
        trail: &mut Vec<Phase>,
    ) -> Result<u32, Error> {
        let full = score_for(self.questions_asked, self.hint_count);
        let score = match reason {
            EndReason::SettledPartial => full / 2,
            _ => full,
        };
        self.advance(Phase::Completed, trail)?;
        self.score = Some(score);
        self.end_reason = Some(reason);
        self.pending_partial = false;
        Ok(score)
    }

    pub(crate) fn abort(&mut self, reason: EndReason, trail: &mut Vec<Phase>) -> Result<(), Error> {
        self.advance(Phase::Aborted, trail)?;
        self.end_reason = Some(reason);
        self.pending_partial = false;
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Outcome of one submitted turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub session_id: SessionId,
    pub message_type: MessageType,
    /// Player-facing reply.
    pub response: String,
    pub verdict: Option<Verdict>,
    pub phase: Phase,
    /// Phases passed through, starting with the phase before the turn.
    pub transitions: Vec<Phase>,
    pub turn_index: u64,
    pub hint_count: u32,
    pub score: Option<u32>,
    /// Set when the turn ended the session.
    pub memory_sync: Option<MemorySync>,
}

/// Read-only view of a session for status displays.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session: GameSession,
    pub title: String,
    pub statement: String,
    /// The hidden answer, only once the session is over.
    pub truth: Option<String>,
}

impl SessionStatus {
    pub fn render(&self) -> String {
        let s = &self.session;
        let mut out = format!(
            "{} [{}]\nQuestions: {}  Hypotheses: {}  Hints: {}/{}  Turns left: {}",
            self.title,
            s.phase,
            s.questions_asked,
            s.hypotheses_made,
            s.hint_count,
            s.config.hint_limit,
            s.turns_remaining(),
        );
        if s.pending_partial {
            out.push_str("\nA partially correct hypothesis is pending. Type /accept to settle for it.");
        }
        if let Some(score) = s.score {
            out.push_str(&format!("\nScore: {score}"));
        }
        if let Some(truth) = &self.truth {
            out.push_str(&format!("\nAnswer: {truth}"));
        }
        out
    }
}
