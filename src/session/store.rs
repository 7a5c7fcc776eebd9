// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session persistence
//!
//! `SessionStore` is the persistence boundary. Two backends are provided:
//! an in-memory map and a directory of JSON documents (one per session,
//! written through on every mutation).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::error::{Result, TandemError};
use crate::session::model::{Session, SessionMessage};

/// Read-modify-write closure applied atomically to a session
pub type SessionUpdate = Box<dyn FnOnce(&mut Session) + Send>;

/// Persistence boundary for sessions and their histories
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a session
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Look up a session, creating it bound to provider/model if unseen
    async fn get_or_create_session(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
    ) -> Result<Session>;

    /// All sessions, most recently updated first
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Apply `update` atomically and return the result
    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<Session>;

    /// Ordered history of a session
    async fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>>;

    /// Append to a session's history
    async fn append_message(&self, message: SessionMessage) -> Result<()>;

    /// Replace a stored message with the same id
    async fn update_message(&self, message: SessionMessage) -> Result<()>;

    /// Replace a session's whole history (compression and revert)
    async fn replace_messages(&self, session_id: &str, messages: Vec<SessionMessage>)
        -> Result<()>;
}

/// A session and its history, the unit of persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session: Session,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

/// Map of documents plus the mutation rules both backends share
#[derive(Debug, Default)]
struct Documents {
    by_id: HashMap<String, SessionDocument>,
}

impl Documents {
    fn get_mut(&mut self, session_id: &str) -> Result<&mut SessionDocument> {
        self.by_id
            .get_mut(session_id)
            .ok_or_else(|| TandemError::NotFound(format!("session {}", session_id)))
    }

    /// Returns the document and whether it was created
    fn get_or_create(
        &mut self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
    ) -> (&SessionDocument, bool) {
        let mut created = false;
        let doc = self
            .by_id
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                SessionDocument {
                    session: Session::new(session_id, provider_id, model_id),
                    messages: Vec::new(),
                }
            });
        (&*doc, created)
    }

    fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> =
            self.by_id.values().map(|doc| doc.session.clone()).collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    fn update(&mut self, session_id: &str, update: SessionUpdate) -> Result<&SessionDocument> {
        let doc = self.get_mut(session_id)?;
        update(&mut doc.session);
        doc.session.touch();
        Ok(&*doc)
    }

    fn append(&mut self, message: SessionMessage) -> Result<&SessionDocument> {
        let doc = self.get_mut(&message.session_id)?;
        if doc.messages.iter().any(|m| m.id == message.id) {
            return Err(TandemError::InvalidState(format!(
                "message {} already stored",
                message.id
            )));
        }
        doc.messages.push(message);
        doc.session.touch();
        Ok(&*doc)
    }

    fn update_message(&mut self, message: SessionMessage) -> Result<&SessionDocument> {
        let doc = self.get_mut(&message.session_id)?;
        let slot = doc
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| TandemError::NotFound(format!("message {}", message.id)))?;
        *slot = message;
        doc.session.touch();
        Ok(&*doc)
    }

    fn replace(
        &mut self,
        session_id: &str,
        messages: Vec<SessionMessage>,
    ) -> Result<&SessionDocument> {
        let doc = self.get_mut(session_id)?;
        doc.messages = messages;
        doc.session.touch();
        Ok(&*doc)
    }
}

/// In-memory store; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    documents: RwLock<Documents>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Documents> {
        match self.documents.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "tandem.session.store", "Session map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Documents> {
        match self.documents.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "tandem.session.store", "Session map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .read()
            .by_id
            .get(session_id)
            .map(|doc| doc.session.clone()))
    }

    async fn get_or_create_session(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
    ) -> Result<Session> {
        let mut documents = self.write();
        let (doc, created) = documents.get_or_create(session_id, provider_id, model_id);
        if created {
            tracing::debug!(target: "tandem.session.store", session_id, "Created session");
        }
        Ok(doc.session.clone())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.read().list())
    }

    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<Session> {
        let mut documents = self.write();
        Ok(documents.update(session_id, update)?.session.clone())
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let documents = self.read();
        let doc = documents
            .by_id
            .get(session_id)
            .ok_or_else(|| TandemError::NotFound(format!("session {}", session_id)))?;
        Ok(doc.messages.clone())
    }

    async fn append_message(&self, message: SessionMessage) -> Result<()> {
        self.write().append(message)?;
        Ok(())
    }

    async fn update_message(&self, message: SessionMessage) -> Result<()> {
        self.write().update_message(message)?;
        Ok(())
    }

    async fn replace_messages(
        &self,
        session_id: &str,
        messages: Vec<SessionMessage>,
    ) -> Result<()> {
        self.write().replace(session_id, messages)?;
        Ok(())
    }
}

/// Directory-backed store: `<dir>/<session_id>.json`
///
/// Documents are loaded when the store is opened and rewritten (via a
/// temporary file and rename) after every mutation.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    documents: Mutex<Documents>,
}

/// Ids become file names, so keep them to a safe alphabet
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TandemError::InvalidInput(format!(
            "session id '{}' must be non-empty and use only [A-Za-z0-9._-]",
            session_id
        )))
    }
}

impl FileSessionStore {
    /// Open or create a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut documents = Documents::default();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_document(&path) {
                Ok(doc) => {
                    documents.by_id.insert(doc.session.id.clone(), doc);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "tandem.session.store",
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable session file"
                    );
                }
            }
        }

        tracing::debug!(
            target: "tandem.session.store",
            dir = %dir.display(),
            sessions = documents.by_id.len(),
            "Opened session store"
        );

        Ok(Self {
            dir,
            documents: Mutex::new(documents),
        })
    }

    /// Directory this store writes to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_document(path: &Path) -> Result<SessionDocument> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    fn persist(&self, doc: &SessionDocument) -> Result<()> {
        let path = self.path_for(&doc.session.id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Apply `mutate` to a copy of one document, write it, and only then
    /// make it visible; a failed write leaves memory untouched
    fn write_through<F>(&self, session_id: &str, mutate: F) -> Result<Session>
    where
        F: FnOnce(&mut Documents) -> Result<()>,
    {
        let mut documents = self.lock();
        let current = documents
            .by_id
            .get(session_id)
            .cloned()
            .ok_or_else(|| TandemError::NotFound(format!("session {}", session_id)))?;

        let mut scratch = Documents::default();
        scratch.by_id.insert(session_id.to_string(), current);
        mutate(&mut scratch)?;
        let doc = scratch
            .by_id
            .remove(session_id)
            .ok_or_else(|| TandemError::NotFound(format!("session {}", session_id)))?;

        self.persist(&doc)?;
        let session = doc.session.clone();
        documents.by_id.insert(session_id.to_string(), doc);
        Ok(session)
    }

    fn lock(&self) -> MutexGuard<'_, Documents> {
        match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "tandem.session.store", "Session file lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .lock()
            .by_id
            .get(session_id)
            .map(|doc| doc.session.clone()))
    }

    async fn get_or_create_session(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
    ) -> Result<Session> {
        validate_session_id(session_id)?;
        let mut documents = self.lock();
        if let Some(doc) = documents.by_id.get(session_id) {
            return Ok(doc.session.clone());
        }
        let doc = SessionDocument {
            session: Session::new(session_id, provider_id, model_id),
            messages: Vec::new(),
        };
        self.persist(&doc)?;
        tracing::debug!(target: "tandem.session.store", session_id, "Created session");
        let session = doc.session.clone();
        documents.by_id.insert(session_id.to_string(), doc);
        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.lock().list())
    }

    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<Session> {
        self.write_through(session_id, |docs| docs.update(session_id, update).map(|_| ()))
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let documents = self.lock();
        let doc = documents
            .by_id
            .get(session_id)
            .ok_or_else(|| TandemError::NotFound(format!("session {}", session_id)))?;
        Ok(doc.messages.clone())
    }

    async fn append_message(&self, message: SessionMessage) -> Result<()> {
        let session_id = message.session_id.clone();
        self.write_through(&session_id, |docs| docs.append(message).map(|_| ()))?;
        Ok(())
    }

    async fn update_message(&self, message: SessionMessage) -> Result<()> {
        let session_id = message.session_id.clone();
        self.write_through(&session_id, |docs| docs.update_message(message).map(|_| ()))?;
        Ok(())
    }

    async fn replace_messages(
        &self,
        session_id: &str,
        messages: Vec<SessionMessage>,
    ) -> Result<()> {
        self.write_through(session_id, |docs| docs.replace(session_id, messages).map(|_| ()))?;
        Ok(())
    }
}

/// Find a message by id within a history
pub fn find_message(messages: &[SessionMessage], message_id: Uuid) -> Option<usize> {
    messages.iter().position(|m| m.id == message_id)
}
