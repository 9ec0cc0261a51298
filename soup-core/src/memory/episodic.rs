//! Per-session event memory.

use crate::error::MemoryError;
use crate::id::SessionId;
use crate::session::{GameSession, MessageType, Role, TurnEvent};
use crate::store::SessionStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// How far back a search looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// The configured recency window.
    #[default]
    Recent,
    /// Every event in the session.
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct EpisodicQuery {
    pub window: Window,
    /// Case-insensitive substring match on content.
    pub text: Option<String>,
    pub role: Option<Role>,
    pub message_type: Option<MessageType>,
    pub limit: Option<usize>,
}

impl EpisodicQuery {
    pub fn recent() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            window: Window::Full,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Event log of every open session, kept in step with the session store.
///
/// Writes go through [`EpisodicMemory::append`], which refuses anything
/// that would leave a gap or overlap in turn indices.
pub struct EpisodicMemory {
    store: Arc<dyn SessionStore>,
    sessions: RwLock<HashMap<SessionId, Vec<TurnEvent>>>,
    window: usize,
}

impl EpisodicMemory {
    pub fn new(store: Arc<dyn SessionStore>, window: usize) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
            window,
        }
    }

    fn poisoned() -> MemoryError {
        MemoryError::Io(std::io::Error::other("episodic cache lock poisoned"))
    }

    /// Start tracking a session with its committed events.
    pub(crate) fn open(&self, id: SessionId, events: Vec<TurnEvent>) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(id, events);
        }
    }

    pub(crate) fn is_open(&self, id: SessionId) -> bool {
        self.sessions
            .read()
            .map(|s| s.contains_key(&id))
            .unwrap_or(false)
    }

    /// Stop tracking a session. Its events stay readable through [`Self::scan`].
    pub(crate) fn close(&self, id: SessionId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(&id);
        }
    }

    /// Commit a turn: append `events` and persist `session` as one unit.
    pub(crate) async fn append(
        &self,
        session: &GameSession,
        events: &[TurnEvent],
    ) -> Result<(), MemoryError> {
        let id = session.session_id();
        let expected = {
            let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
            match sessions.get(&id) {
                Some(log) => log.len() as u64,
                None => session.turn_index().saturating_sub(events.len() as u64),
            }
        };

        for (offset, event) in events.iter().enumerate() {
            let want = expected + offset as u64;
            if event.turn_index != want || event.session_id != id {
                return Err(MemoryError::SequenceGap {
                    session: id,
                    expected: want,
                    found: event.turn_index,
                });
            }
        }
        let next = expected + events.len() as u64;
        if session.turn_index() != next {
            return Err(MemoryError::SequenceGap {
                session: id,
                expected: next,
                found: session.turn_index(),
            });
        }

        self.store.commit_turn(session, events).await?;

        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        sessions.entry(id).or_default().extend_from_slice(events);
        Ok(())
    }

    pub fn get(&self, id: SessionId, turn_index: u64) -> Option<TurnEvent> {
        let sessions = self.sessions.read().ok()?;
        sessions.get(&id)?.get(turn_index as usize).cloned()
    }

    /// The last `n` events of a session, oldest first.
    pub fn recent(&self, id: SessionId, n: usize) -> Vec<TurnEvent> {
        let Ok(sessions) = self.sessions.read() else {
            return Vec::new();
        };
        match sessions.get(&id) {
            Some(log) => log[log.len().saturating_sub(n)..].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, id: SessionId) -> usize {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(&id).map(Vec::len))
            .unwrap_or(0)
    }

    /// Events matching `query`, oldest first.
    pub fn search(&self, id: SessionId, query: &EpisodicQuery) -> Vec<TurnEvent> {
        let pool = match query.window {
            Window::Recent => self.recent(id, self.window),
            Window::Full => self.recent(id, usize::MAX),
        };
        let needle = query.text.as_ref().map(|t| t.to_lowercase());
        let mut hits: Vec<TurnEvent> = pool
            .into_iter()
            .filter(|e| query.role.map_or(true, |r| e.role == r))
            .filter(|e| query.message_type.map_or(true, |m| e.message_type == m))
            .filter(|e| {
                needle
                    .as_ref()
                    .map_or(true, |n| e.content.to_lowercase().contains(n.as_str()))
            })
            .collect();
        if let Some(limit) = query.limit {
            let start = hits.len().saturating_sub(limit);
            hits.drain(..start);
        }
        hits
    }

    /// Every committed event of a session, loading from the store if the
    /// session is not open.
    pub async fn scan(&self, id: SessionId) -> Result<Vec<TurnEvent>, MemoryError> {
        if self.is_open(id) {
            return Ok(self.recent(id, usize::MAX));
        }
        Ok(self
            .store
            .load(id)
            .await?
            .map(|stored| stored.events)
            .unwrap_or_default())
    }
}
