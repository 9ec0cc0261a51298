//! Durable session storage.
//!
//! A session is a versioned snapshot plus an append-only event log. A turn
//! is committed by appending its events and then replacing the snapshot, so
//! a crash between the two leaves extra events behind the snapshot. Those
//! are discarded on load; the snapshot is the commit point.

use crate::error::StoreError;
use crate::id::SessionId;
use crate::oracle::prompt::TEMPLATE_VERSION;
use crate::session::{GameSession, Phase, TurnEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A session as written to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub session: GameSession,
}

impl SessionSnapshot {
    pub fn new(session: &GameSession) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            session: session.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode a snapshot, rejecting unknown schema versions before looking
    /// at anything else, and sessions whose template version this build
    /// does not have.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        #[derive(Deserialize)]
        struct VersionHeader {
            schema_version: u32,
        }

        let header: VersionHeader = serde_json::from_str(json)?;
        if header.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: header.schema_version,
            });
        }
        let snapshot: Self = serde_json::from_str(json)?;
        let found = snapshot.session.config.prompts.version;
        if found != TEMPLATE_VERSION {
            return Err(StoreError::TemplateMismatch {
                expected: TEMPLATE_VERSION,
                found,
            });
        }
        Ok(snapshot)
    }
}

/// A loaded session with its committed events.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub session: GameSession,
    pub events: Vec<TurnEvent>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a brand new session.
    async fn create(&self, session: &GameSession) -> Result<(), StoreError>;

    /// Replace the snapshot without adding events.
    async fn save(&self, session: &GameSession) -> Result<(), StoreError>;

    /// Append `events` and replace the snapshot as one commit.
    async fn commit_turn(&self, session: &GameSession, events: &[TurnEvent]) -> Result<(), StoreError>;

    /// Load a session and its committed events.
    async fn load(&self, id: SessionId) -> Result<Option<StoredSession>, StoreError>;

    async fn list(&self) -> Result<Vec<GameSession>, StoreError>;
}

/// Check that `events` is the gapless log of `session`, dropping any
/// uncommitted tail. Returns the number of events dropped.
pub fn reconcile(session: &GameSession, events: &mut Vec<TurnEvent>) -> Result<usize, StoreError> {
    let id = session.session_id();
    for (i, event) in events.iter().enumerate() {
        if event.turn_index != i as u64 || event.session_id != id {
            return Err(StoreError::Inconsistent {
                session: id,
                reason: format!("event at position {i} has turn index {}", event.turn_index),
            });
        }
    }

    let committed = session.turn_index() as usize;
    if events.len() < committed {
        return Err(StoreError::Inconsistent {
            session: id,
            reason: format!(
                "snapshot is at turn {committed} but only {} events exist",
                events.len()
            ),
        });
    }
    if session.phase() == Phase::AwaitingFinal {
        return Err(StoreError::Inconsistent {
            session: id,
            reason: "snapshot caught in a transient phase".into(),
        });
    }

    let dropped = events.len() - committed;
    events.truncate(committed);
    Ok(dropped)
}

/// Session store kept in process memory. Snapshots still go through JSON
/// so the schema path is the same as on disk.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, (String, Vec<TurnEvent>)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, (String, Vec<TurnEvent>)>>, StoreError> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("session store lock poisoned")))
    }

    /// Overwrite a stored snapshot with raw JSON.
    pub fn put_raw_snapshot(&self, id: SessionId, json: impl Into<String>) -> Result<(), StoreError> {
        let mut sessions = self.lock()?;
        let entry = sessions.entry(id).or_insert_with(|| (String::new(), Vec::new()));
        entry.0 = json.into();
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &GameSession) -> Result<(), StoreError> {
        let json = SessionSnapshot::new(session).to_json()?;
        let mut sessions = self.lock()?;
        if sessions.contains_key(&session.session_id()) {
            return Err(StoreError::AlreadyExists(session.session_id()));
        }
        sessions.insert(session.session_id(), (json, Vec::new()));
        Ok(())
    }

    async fn save(&self, session: &GameSession) -> Result<(), StoreError> {
        let json = SessionSnapshot::new(session).to_json()?;
        let mut sessions = self.lock()?;
        let entry = sessions
            .get_mut(&session.session_id())
            .ok_or(StoreError::NotFound(session.session_id()))?;
        entry.0 = json;
        Ok(())
    }

    async fn commit_turn(&self, session: &GameSession, events: &[TurnEvent]) -> Result<(), StoreError> {
        let json = SessionSnapshot::new(session).to_json()?;
        let mut sessions = self.lock()?;
        let entry = sessions
            .get_mut(&session.session_id())
            .ok_or(StoreError::NotFound(session.session_id()))?;
        entry.1.extend_from_slice(events);
        entry.0 = json;
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<StoredSession>, StoreError> {
        let Some((json, events)) = self.lock()?.get(&id).cloned() else {
            return Ok(None);
        };
        let session = SessionSnapshot::from_json(&json)?.session;
        let mut events = events;
        reconcile(&session, &mut events)?;
        Ok(Some(StoredSession { session, events }))
    }

    async fn list(&self) -> Result<Vec<GameSession>, StoreError> {
        let raw: Vec<(SessionId, String)> = self
            .lock()?
            .iter()
            .map(|(id, (json, _))| (*id, json.clone()))
            .collect();
        let mut sessions = Vec::with_capacity(raw.len());
        for (id, json) in raw {
            match SessionSnapshot::from_json(&json) {
                Ok(snapshot) => sessions.push(snapshot.session),
                Err(e) => tracing::warn!(session_id = %id, error = %e, "skipping unreadable snapshot"),
            }
        }
        sessions.sort_by_key(|s| s.created_at());
        Ok(sessions)
    }
}

/// Session store on the local filesystem.
///
/// Layout under the root: `sessions/<id>.json` for snapshots and
/// `events/<id>.jsonl` for event logs. Snapshots are replaced atomically.
/// A commit whose snapshot write fails truncates the log back to the last
/// committed turn, so the log never runs ahead of the snapshot for long.
pub struct FileSessionStore {
    root: PathBuf,
    /// Logs whose rollback also failed. Trimmed before their next append.
    dirty: Mutex<HashSet<SessionId>>,
}

impl FileSessionStore {
    /// Open a store, creating its directories if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("sessions")).await?;
        fs::create_dir_all(root.join("events")).await?;
        Ok(Self {
            root,
            dirty: Mutex::new(HashSet::new()),
        })
    }

    fn mark_dirty(&self, id: SessionId, dirty: bool) {
        let mut set = self.dirty.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if dirty {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    fn is_dirty(&self, id: SessionId) -> bool {
        self.dirty
            .lock()
            .map(|set| set.contains(&id))
            .unwrap_or(true)
    }

    /// Cut the log of `id` down to its first `len` events.
    async fn truncate_events(&self, id: SessionId, len: usize) -> Result<(), StoreError> {
        let mut events = self.read_events(id).await?;
        if events.len() > len {
            events.truncate(len);
            self.rewrite_events(id, &events).await?;
        }
        Ok(())
    }

    fn snapshot_path(&self, id: SessionId) -> PathBuf {
        self.root.join("sessions").join(format!("{id}.json"))
    }

    fn events_path(&self, id: SessionId) -> PathBuf {
        self.root.join("events").join(format!("{id}.jsonl"))
    }

    async fn append_events(&self, id: SessionId, events: &[TurnEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(id))
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_events(&self, id: SessionId) -> Result<Vec<TurnEvent>, StoreError> {
        let content = match fs::read_to_string(self.events_path(id)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                // A torn final line is an append that never completed.
                Err(e) if i + 1 == lines.len() => {
                    tracing::warn!(session_id = %id, error = %e, "ignoring torn event line");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(events)
    }

    async fn rewrite_events(&self, id: SessionId, events: &[TurnEvent]) -> Result<(), StoreError> {
        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }
        write_atomic(&self.events_path(id), buf.as_bytes()).await?;
        Ok(())
    }

    async fn read_snapshot(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StoreError> {
        match fs::read_to_string(self.snapshot_path(id)).await {
            Ok(json) => SessionSnapshot::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, session: &GameSession) -> Result<(), StoreError> {
        let path = self.snapshot_path(session.session_id());
        if fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(session.session_id()));
        }
        let json = SessionSnapshot::new(session).to_json()?;
        write_atomic(&path, json.as_bytes()).await?;
        Ok(())
    }

    async fn save(&self, session: &GameSession) -> Result<(), StoreError> {
        let json = SessionSnapshot::new(session).to_json()?;
        write_atomic(&self.snapshot_path(session.session_id()), json.as_bytes()).await?;
        Ok(())
    }

    async fn commit_turn(&self, session: &GameSession, events: &[TurnEvent]) -> Result<(), StoreError> {
        let id = session.session_id();
        let committed = session.turn_index().saturating_sub(events.len() as u64) as usize;
        if self.is_dirty(id) {
            self.truncate_events(id, committed).await?;
            self.mark_dirty(id, false);
        }

        self.append_events(id, events).await?;
        if let Err(e) = self.save(session).await {
            if let Err(rollback) = self.truncate_events(id, committed).await {
                tracing::warn!(session_id = %id, error = %rollback, "could not roll back event log");
                self.mark_dirty(id, true);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<StoredSession>, StoreError> {
        let Some(snapshot) = self.read_snapshot(id).await? else {
            return Ok(None);
        };
        let session = snapshot.session;
        let mut events = self.read_events(id).await?;
        let dropped = reconcile(&session, &mut events)?;
        if dropped > 0 {
            tracing::warn!(session_id = %id, dropped, "discarding uncommitted events");
            self.rewrite_events(id, &events).await?;
        }
        Ok(Some(StoredSession { session, events }))
    }

    async fn list(&self) -> Result<Vec<GameSession>, StoreError> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(self.root.join("sessions")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path).await?;
            match SessionSnapshot::from_json(&json) {
                Ok(snapshot) => sessions.push(snapshot.session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot")
                }
            }
        }
        sessions.sort_by_key(|s| s.created_at());
        Ok(sessions)
    }
}

/// Write `bytes` to a sibling temp file, flush it, and rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await
}
