//! End-of-session summaries and the statistics kept alongside them.

use crate::oracle::{Oracle, OracleOptions, PromptTemplates};
use crate::session::{GameSession, Phase, Role, TurnEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Events included in a summary transcript.
const TRANSCRIPT_EVENTS: usize = 40;

/// Running totals for one player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStats {
    pub sessions: u32,
    pub solved: u32,
    pub total_questions: u32,
    pub total_hints: u32,
    pub best_score: Option<u32>,
}

impl PlayerStats {
    pub fn from_session(session: &GameSession) -> Self {
        Self {
            sessions: 1,
            solved: u32::from(session.phase() == Phase::Completed),
            total_questions: session.questions_asked(),
            total_hints: session.hint_count(),
            best_score: session.score(),
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.sessions += other.sessions;
        self.solved += other.solved;
        self.total_questions += other.total_questions;
        self.total_hints += other.total_hints;
        self.best_score = self.best_score.max(other.best_score);
    }

    pub fn success_rate(&self) -> f64 {
        if self.sessions == 0 {
            return 0.0;
        }
        f64::from(self.solved) / f64::from(self.sessions)
    }

    pub fn render(&self) -> String {
        let avg = if self.sessions == 0 {
            0.0
        } else {
            f64::from(self.total_questions) / f64::from(self.sessions)
        };
        format!(
            "Played {} sessions, solved {} ({:.0}%), {:.1} questions per session on average.",
            self.sessions,
            self.solved,
            self.success_rate() * 100.0,
            avg
        )
    }
}

/// Running totals for one puzzle across all players.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PuzzleStats {
    pub total_sessions: u32,
    pub total_questions: u32,
    pub success_count: u32,
}

impl PuzzleStats {
    pub fn from_session(session: &GameSession) -> Self {
        Self {
            total_sessions: 1,
            total_questions: session.questions_asked(),
            success_count: u32::from(session.phase() == Phase::Completed),
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.total_sessions += other.total_sessions;
        self.total_questions += other.total_questions;
        self.success_count += other.success_count;
    }

    pub fn avg_questions(&self) -> f64 {
        if self.total_sessions == 0 {
            return 0.0;
        }
        f64::from(self.total_questions) / f64::from(self.total_sessions)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_sessions == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(self.total_sessions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Oracle,
    /// Built from counters because the oracle failed or replied badly.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub text: String,
    pub reasoning_style: Option<String>,
    pub mistakes: Vec<String>,
    pub strengths: Vec<String>,
    pub source: SummarySource,
}

pub struct SessionSummarizer {
    oracle: Arc<dyn Oracle>,
    templates: PromptTemplates,
    options: OracleOptions,
}

impl SessionSummarizer {
    pub fn new(oracle: Arc<dyn Oracle>, templates: PromptTemplates, options: OracleOptions) -> Self {
        Self {
            oracle,
            templates,
            options,
        }
    }

    /// Summarise a finished session. Falls back to a statistical summary
    /// when the oracle is unavailable.
    pub async fn summarize(&self, session: &GameSession, events: &[TurnEvent]) -> SessionSummary {
        let prompt = self
            .templates
            .summary_prompt(&outcome(session), &transcript(events));
        match self.oracle.generate(&prompt, &self.options).await {
            Ok(raw) => match parse_summary(&raw) {
                Some(summary) => summary,
                None => {
                    tracing::warn!(session_id = %session.session_id(), "summary reply unreadable, using fallback");
                    fallback_summary(session, events)
                }
            },
            Err(e) => {
                tracing::warn!(session_id = %session.session_id(), error = %e, "summary failed, using fallback");
                fallback_summary(session, events)
            }
        }
    }
}

fn outcome(session: &GameSession) -> String {
    format!(
        "{} after {} questions, {} hypotheses and {} hints. Score: {}.",
        if session.phase() == Phase::Completed { "Solved" } else { "Not solved" },
        session.questions_asked(),
        session.hypotheses_made(),
        session.hint_count(),
        session
            .score()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into()),
    )
}

fn transcript(events: &[TurnEvent]) -> String {
    let start = events.len().saturating_sub(TRANSCRIPT_EVENTS);
    events[start..]
        .iter()
        .map(|e| {
            let who = match e.role {
                Role::Player => "Player",
                Role::System => "Judge",
            };
            format!("{who}: {}", e.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_field(text: &str) -> Vec<String> {
    let lower = text.trim().to_lowercase();
    if matches!(lower.as_str(), "" | "none" | "none observed" | "n/a") {
        return Vec::new();
    }
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a `SUMMARY:` / `REASONING_STYLE:` / `MISTAKES:` / `STRENGTHS:` reply.
pub fn parse_summary(raw: &str) -> Option<SessionSummary> {
    let mut summary = SessionSummary {
        text: String::new(),
        reasoning_style: None,
        mistakes: Vec::new(),
        strengths: Vec::new(),
        source: SummarySource::Oracle,
    };
    for line in raw.lines() {
        let Some((label, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim().to_ascii_uppercase().as_str() {
            "SUMMARY" => summary.text = value.to_string(),
            "REASONING_STYLE" if !value.is_empty() => summary.reasoning_style = Some(value.to_string()),
            "MISTAKES" => summary.mistakes = list_field(value),
            "STRENGTHS" => summary.strengths = list_field(value),
            _ => {}
        }
    }
    (!summary.text.is_empty()).then_some(summary)
}

/// Summary built from session counters alone.
pub fn fallback_summary(session: &GameSession, events: &[TurnEvent]) -> SessionSummary {
    let mut parts = vec![
        format!("Session with {} events.", events.len()),
        format!("Asked {} questions.", session.questions_asked()),
    ];
    if session.hint_count() > 0 {
        parts.push(format!("Used {} hints.", session.hint_count()));
    }
    parts.push(if session.phase() == Phase::Completed {
        "Successfully solved the puzzle.".to_string()
    } else {
        "Did not complete the puzzle.".to_string()
    });

    let questions = session.questions_asked();
    let reasoning_style = if questions > 10 {
        Some("Methodical - asks many questions")
    } else if questions < 3 && session.hypotheses_made() > 0 {
        Some("Intuitive - jumps to conclusions quickly")
    } else if questions >= 3 {
        Some("Balanced approach")
    } else {
        None
    };

    SessionSummary {
        text: parts.join(" "),
        reasoning_style: reasoning_style.map(str::to_string),
        mistakes: Vec::new(),
        strengths: Vec::new(),
        source: SummarySource::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary() {
        let summary = parse_summary(
            "SUMMARY: Solved it in six questions.\n\
             REASONING_STYLE: Narrows down quickly\n\
             MISTAKES: None observed\n\
             STRENGTHS: focused questions, good recall",
        )
        .unwrap();
        assert_eq!(summary.text, "Solved it in six questions.");
        assert_eq!(summary.reasoning_style.as_deref(), Some("Narrows down quickly"));
        assert!(summary.mistakes.is_empty());
        assert_eq!(summary.strengths, vec!["focused questions", "good recall"]);
        assert_eq!(summary.source, SummarySource::Oracle);
    }

    #[test]
    fn test_parse_summary_requires_summary_line() {
        assert!(parse_summary("REASONING_STYLE: careful").is_none());
    }

    #[test]
    fn test_puzzle_stats_rates() {
        let mut stats = PuzzleStats {
            total_sessions: 2,
            total_questions: 10,
            success_count: 1,
        };
        stats.merge(&PuzzleStats {
            total_sessions: 2,
            total_questions: 2,
            success_count: 2,
        });
        assert_eq!(stats.avg_questions(), 3.0);
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(PuzzleStats::default().success_rate(), 0.0);
    }
}
