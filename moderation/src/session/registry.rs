//! Explicit lifecycle for live sessions.
//!
//! The registry holds handles and status only. Session state stays inside
//! each session's task and is handed back as a [`SessionRecord`] on close.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use super::events::SessionEvent;
use super::machine::{SessionBuilder, SessionHandle};
use super::state::SessionRecord;
use crate::types::SessionId;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session already closed: {0}")]
    AlreadyClosed(SessionId),

    #[error("session id already in use: {0}")]
    Duplicate(SessionId),

    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
}

struct Entry {
    handle: SessionHandle,
    status: SessionStatus,
    join: Option<JoinHandle<SessionRecord>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a session and track it.
    pub async fn create(
        &self,
        builder: SessionBuilder,
    ) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(id) = builder.id() {
            if sessions.contains_key(id) {
                return Err(RegistryError::Duplicate(id.to_string()));
            }
        }

        let (handle, events, join) = builder.spawn();
        info!(session_id = %handle.id(), "Session registered");
        sessions.insert(
            handle.id().to_string(),
            Entry {
                handle: handle.clone(),
                status: SessionStatus::Active,
                join: Some(join),
            },
        );
        Ok((handle, events))
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .filter(|e| e.status == SessionStatus::Active)
            .map(|e| e.handle.clone())
    }

    /// Cancel the session and wait for its final record.
    pub async fn close(&self, id: &str) -> Result<SessionRecord, RegistryError> {
        let join = {
            let mut sessions = self.sessions.lock().await;
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let join = entry
                .join
                .take()
                .ok_or_else(|| RegistryError::AlreadyClosed(id.to_string()))?;
            entry.status = SessionStatus::Closed;
            entry.handle.close();
            join
        };

        let record = join.await?;
        info!(session_id = %id, "Session unregistered");
        Ok(record)
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().await;
        let mut out: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, e)| SessionSummary {
                session_id: id.clone(),
                status: e.status,
            })
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let registry = SessionRegistry::new();
        let (handle, _events) = registry
            .create(SessionBuilder::new(ModerationConfig::default()).session_id("a"))
            .await
            .unwrap();
        handle.inject("Ana", "Morning all.").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.get("a").await.is_some());
        assert_eq!(registry.list().await[0].status, SessionStatus::Active);

        let record = registry.close("a").await.unwrap();
        assert_eq!(record.session_id, "a");
        assert_eq!(record.transcript.len(), 1);

        assert!(registry.get("a").await.is_none());
        assert_eq!(registry.list().await[0].status, SessionStatus::Closed);
        assert!(matches!(
            registry.close("a").await,
            Err(RegistryError::AlreadyClosed(_))
        ));
        assert!(matches!(
            registry.close("missing").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new();
        registry
            .create(SessionBuilder::new(ModerationConfig::default()).session_id("dup"))
            .await
            .unwrap();
        let err = registry
            .create(SessionBuilder::new(ModerationConfig::default()).session_id("dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }
}
