//! Upstream connection state machine and reconnect backoff.
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ Reconnecting → Connecting …
//!                    │            │            │
//!                    └────────────┴────────────┴──▶ Failed (absorbing)
//! any non-terminal ──────────────────────────────▶ Closed
//! ```
//!
//! Every transition is validated against the table and recorded.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
    /// Reconnect budget exhausted or configuration failure.
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn is_legal_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    if to == Closed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Reconnecting)
            | (Connecting, Failed)
            | (Connected, Reconnecting)
            | (Reconnecting, Connecting)
            | (Reconnecting, Connected)
            | (Reconnecting, Failed)
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal connection transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

#[derive(Debug)]
pub struct ConnectionMachine {
    current: ConnectionState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Disconnected,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn advance(
        &mut self,
        to: ConnectionState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "Connection transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before reconnect `attempt` (1-based); `None` once exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path_with_reconnect() {
        let mut m = ConnectionMachine::new();
        m.advance(Connecting, None).unwrap();
        m.advance(Connected, None).unwrap();
        m.advance(Reconnecting, Some("socket reset")).unwrap();
        m.advance(Connecting, None).unwrap();
        m.advance(Connected, None).unwrap();
        m.advance(Closed, Some("session closed")).unwrap();
        assert_eq!(m.transitions().len(), 6);
        assert!(m.is_terminal());
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut m = ConnectionMachine::new();
        m.advance(Connecting, None).unwrap();
        m.advance(Failed, Some("bad key")).unwrap();
        let err = m.advance(Closed, None).unwrap_err();
        assert_eq!(err.from, Failed);
        assert!(m.advance(Connecting, None).is_err());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut m = ConnectionMachine::new();
        let err = m.advance(Connected, None).unwrap_err();
        assert_eq!(err.to_string(), "Illegal connection transition: disconnected → connected");
        assert_eq!(m.current(), Disconnected);
        assert!(m.transitions().is_empty());
    }

    #[test]
    fn test_reconnect_backoff() {
        let policy = ReconnectPolicy::new(&ReconnectConfig {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 1_500,
            audio_buffer_chunks: 8,
        });
        assert_eq!(policy.delay(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay(3), Some(Duration::from_millis(1500)));
        assert_eq!(policy.delay(4), Some(Duration::from_millis(1500)));
        assert_eq!(policy.delay(5), None);
    }
}
