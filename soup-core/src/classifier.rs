//! Turn classification.
//!
//! Prefixed input (`/hint`, `!status`, `\quit`) is parsed locally and never
//! reaches the oracle. Everything else is labelled by the oracle, and a
//! reply that is not one of the known labels becomes
//! [`Command::Unparseable`] rather than a guess.

use crate::error::OracleError;
use crate::oracle::{Oracle, OracleOptions, PromptTemplates};
use crate::session::{MessageType, TurnEvent};
use std::sync::Arc;

/// Characters that mark a line as a command.
pub const COMMAND_PREFIXES: [char; 3] = ['/', '!', '\\'];

/// Why a turn could not be classified.
#[derive(Debug, Clone)]
pub enum UnparseableCause {
    /// The oracle call itself failed.
    Oracle(OracleError),
    /// The oracle replied with something that is not a label.
    UnknownLabel(String),
}

#[derive(Debug, Clone)]
pub enum Command {
    Hint,
    Status,
    History,
    Help,
    Abort,
    /// Settle for a pending partially correct hypothesis.
    Accept,
    /// A prefixed word that is not a command.
    Unknown(String),
    Unparseable(UnparseableCause),
}

#[derive(Debug, Clone)]
pub enum Classification {
    Question,
    Hypothesis,
    Command(Command),
}

impl Classification {
    pub fn message_type(&self) -> MessageType {
        match self {
            Classification::Question => MessageType::Question,
            Classification::Hypothesis => MessageType::Hypothesis,
            Classification::Command(_) => MessageType::Command,
        }
    }
}

fn command_word(word: &str) -> Option<Command> {
    match word.to_ascii_lowercase().as_str() {
        "hint" | "h" => Some(Command::Hint),
        "status" | "s" => Some(Command::Status),
        "history" | "hist" => Some(Command::History),
        "help" | "?" => Some(Command::Help),
        "quit" | "exit" | "q" | "abort" => Some(Command::Abort),
        "accept" => Some(Command::Accept),
        _ => None,
    }
}

/// Parse a prefixed command. Returns `None` if the input has no prefix.
pub fn parse_command(input: &str) -> Option<Command> {
    let rest = input.trim().strip_prefix(COMMAND_PREFIXES)?;
    let word = rest.split_whitespace().next().unwrap_or_default();
    Some(command_word(word).unwrap_or_else(|| Command::Unknown(word.to_string())))
}

/// Read an oracle label such as `QUESTION` or `COMMAND:HINT`.
pub fn parse_label(label: &str) -> Option<Classification> {
    let line = label.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned: String = line
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ':' || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    let cleaned = cleaned.trim();

    if let Some(rest) = cleaned.strip_prefix("COMMAND") {
        let sub = rest.trim_start_matches(|c: char| c == ':' || c == '_' || c.is_whitespace());
        return command_word(sub.split_whitespace().next()?).map(Classification::Command);
    }
    match cleaned.split_whitespace().next()? {
        "QUESTION" => Some(Classification::Question),
        "HYPOTHESIS" => Some(Classification::Hypothesis),
        _ => None,
    }
}

pub struct TurnClassifier {
    oracle: Arc<dyn Oracle>,
    templates: PromptTemplates,
    options: OracleOptions,
    context_events: usize,
}

impl TurnClassifier {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        templates: PromptTemplates,
        options: OracleOptions,
        context_events: usize,
    ) -> Self {
        Self {
            oracle,
            templates,
            options,
            context_events,
        }
    }

    /// Classify one raw player input. Never fails; failures are reported
    /// as [`Command::Unparseable`].
    pub async fn classify(&self, raw_input: &str, recent: &[TurnEvent]) -> Classification {
        if let Some(command) = parse_command(raw_input) {
            return Classification::Command(command);
        }

        let start = recent.len().saturating_sub(self.context_events);
        let prompt = self
            .templates
            .classification_prompt(&recent[start..], raw_input);

        match self.oracle.classify(&prompt, &self.options).await {
            Ok(label) => parse_label(&label).unwrap_or_else(|| {
                tracing::debug!(label = %label, "unrecognised classification label");
                Classification::Command(Command::Unparseable(UnparseableCause::UnknownLabel(label)))
            }),
            Err(e) => {
                tracing::warn!(error = %e, oracle = self.oracle.name(), "classification failed");
                Classification::Command(Command::Unparseable(UnparseableCause::Oracle(e)))
            }
        }
    }
}
