//! Verdicts on questions and hypotheses.
//!
//! The judge sees the full truth through the gate at secret tier; what it
//! writes back is parsed into closed enums, and the free-text explanation
//! is checked for leaks before anyone else sees it.

use crate::error::UpstreamError;
use crate::knowledge::{AccessRole, KnowledgeAccessGate, KnowledgeDocument, Tier};
use crate::oracle::{Oracle, OracleOptions, PromptTemplates};
use crate::puzzle::Puzzle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Answer to a yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Answer {
    Yes,
    No,
    YesAndNo,
    Irrelevant,
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Answer::Yes => "YES",
            Answer::No => "NO",
            Answer::YesAndNo => "YES_AND_NO",
            Answer::Irrelevant => "IRRELEVANT",
        })
    }
}

/// Judgement on a proposed solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Judgement {
    Correct,
    PartiallyCorrect,
    Incorrect,
}

impl fmt::Display for Judgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Judgement::Correct => "CORRECT",
            Judgement::PartiallyCorrect => "PARTIALLY_CORRECT",
            Judgement::Incorrect => "INCORRECT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionVerdict {
    pub answer: Answer,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypothesisVerdict {
    pub judgement: Judgement,
    pub explanation: Option<String>,
}

/// What the judge knows about the session besides the input itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct JudgeContext<'a> {
    pub player_profile: Option<&'a str>,
    /// The session's template snapshot.
    pub templates: PromptTemplates,
}

pub struct VerdictEngine {
    oracle: Arc<dyn Oracle>,
    gate: Arc<KnowledgeAccessGate>,
    options: OracleOptions,
    max_explanation_chars: usize,
}

impl VerdictEngine {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        gate: Arc<KnowledgeAccessGate>,
        options: OracleOptions,
        max_explanation_chars: usize,
    ) -> Self {
        Self {
            oracle,
            gate,
            options,
            max_explanation_chars,
        }
    }

    pub async fn answer_question(
        &self,
        puzzle: &Puzzle,
        question: &str,
        context: JudgeContext<'_>,
    ) -> Result<QuestionVerdict, UpstreamError> {
        let evidence = self
            .gate
            .query_as(AccessRole::Judge, &puzzle.id, question)
            .await?;
        let prompt =
            context
                .templates
                .question_prompt(puzzle, &evidence, context.player_profile, question);
        let raw = self.oracle.generate(&prompt, &self.options).await?;

        let (answer, explanation) =
            parse_answer(&raw).ok_or_else(|| UpstreamError::UnreadableVerdict(clip(&raw, 120)))?;
        Ok(QuestionVerdict {
            answer,
            explanation: self.screen(explanation, puzzle, &evidence),
        })
    }

    pub async fn judge_hypothesis(
        &self,
        puzzle: &Puzzle,
        hypothesis: &str,
        context: JudgeContext<'_>,
    ) -> Result<HypothesisVerdict, UpstreamError> {
        let evidence = self
            .gate
            .query_as(AccessRole::Judge, &puzzle.id, hypothesis)
            .await?;
        let prompt = context.templates.hypothesis_prompt(puzzle, &evidence, hypothesis);
        let raw = self.oracle.generate(&prompt, &self.options).await?;

        let (judgement, explanation) = parse_judgement(&raw)
            .ok_or_else(|| UpstreamError::UnreadableVerdict(clip(&raw, 120)))?;
        Ok(HypothesisVerdict {
            judgement,
            explanation: self.screen(explanation, puzzle, &evidence),
        })
    }

    /// Drop explanations that quote secret material, and cut long ones.
    fn screen(
        &self,
        explanation: Option<String>,
        puzzle: &Puzzle,
        evidence: &[KnowledgeDocument],
    ) -> Option<String> {
        let explanation = explanation?;
        let haystack = normalize(&explanation);
        let secrets = std::iter::once(puzzle.truth.as_str())
            .chain(puzzle.additional_info.iter().map(String::as_str))
            .chain(
                evidence
                    .iter()
                    .filter(|d| d.tier() == Tier::Secret)
                    .map(KnowledgeDocument::content),
            );
        for secret in secrets {
            let needle = normalize(secret);
            if needle.chars().count() >= 12 && haystack.contains(&needle) {
                tracing::warn!(puzzle_id = %puzzle.id, "explanation quoted secret text; withheld");
                return None;
            }
        }
        Some(clip(&explanation, self.max_explanation_chars))
    }
}

fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut to at most `max` characters, marking the cut.
fn clip(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Uppercased words of the `VERDICT:` lines, or of the first non-empty line
/// when there are none.
fn verdict_words(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut selected: Vec<&str> = lines
        .iter()
        .filter_map(|l| strip_label(l, "VERDICT"))
        .collect();
    if selected.is_empty() {
        selected.extend(lines.first().copied());
    }
    selected
        .iter()
        .flat_map(|l| l.split(|c: char| !(c.is_alphanumeric() || c == '_')))
        .filter(|w| !w.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(':')?;
    let head = head.trim().trim_matches(|c: char| c == '*' || c == '#');
    head.eq_ignore_ascii_case(label).then_some(rest.trim())
}

fn explanation_of(raw: &str) -> Option<String> {
    raw.lines()
        .find_map(|l| strip_label(l.trim(), "EXPLANATION"))
        .map(str::to_string)
        .filter(|e| !e.is_empty())
}

/// Parse a question verdict.
///
/// When the reply carries both YES and NO, either as `YES_AND_NO` or as two
/// separate answers, the result is [`Answer::YesAndNo`].
pub fn parse_answer(raw: &str) -> Option<(Answer, Option<String>)> {
    let words = verdict_words(raw);
    let has = |w: &str| words.iter().any(|x| x == w);

    let joined = words.join(" ");
    let answer = if has("YES_AND_NO") || joined.contains("YES AND NO") || (has("YES") && has("NO")) {
        Answer::YesAndNo
    } else if has("IRRELEVANT") && !has("YES") && !has("NO") {
        Answer::Irrelevant
    } else if has("IRRELEVANT") {
        return None;
    } else if has("YES") {
        Answer::Yes
    } else if has("NO") {
        Answer::No
    } else {
        return None;
    };
    Some((answer, explanation_of(raw)))
}

/// Parse a hypothesis judgement.
pub fn parse_judgement(raw: &str) -> Option<(Judgement, Option<String>)> {
    let words = verdict_words(raw);
    let has = |w: &str| words.iter().any(|x| x == w);

    let judgement = if has("PARTIAL") || has("PARTIALLY") || has("PARTIALLY_CORRECT") {
        Judgement::PartiallyCorrect
    } else if has("INCORRECT") || has("WRONG") || (has("NOT") && has("CORRECT")) {
        Judgement::Incorrect
    } else if has("CORRECT") {
        Judgement::Correct
    } else {
        return None;
    };
    Some((judgement, explanation_of(raw)))
}
