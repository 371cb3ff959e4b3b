//! Duplicate and frequency suppression for interventions.
//!
//! ```text
//! candidate(type, message, now)
//!   ├─ now - last_accepted < min_interval             → MinInterval
//!   ├─ prune records older than the longest cooldown
//!   ├─ same fingerprint, age < cooldown(type)         → DuplicateMessage
//!   ├─ same type,        age < cooldown(type)         → TypeCooldown
//!   └─ admit(fingerprint)   … later: record(type, fingerprint, now)
//! ```
//!
//! Evaluation never mutates the cooldown clock; only [`DuplicateSuppressor::record`]
//! does, so a cycle that is cancelled after evaluation leaves no trace.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{CooldownConfig, SuppressorConfig};
use crate::types::InterventionType;

/// Content fingerprint: case-folded, whitespace-collapsed, blake3, 16 hex chars.
pub fn fingerprint(message: &str) -> String {
    let normalized = message
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let hash = blake3::hash(normalized.as_bytes()).to_hex();
    hash.as_str()[..16].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownRecord {
    pub intervention_type: InterventionType,
    pub fingerprint: String,
    pub at: Instant,
}

/// Why a candidate was vetoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressReason {
    MinInterval { remaining_ms: u64 },
    DuplicateMessage { age_ms: u64 },
    TypeCooldown {
        intervention_type: InterventionType,
        remaining_ms: u64,
    },
}

impl std::fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinInterval { remaining_ms } => {
                write!(f, "minimum interval not elapsed ({remaining_ms} ms left)")
            }
            Self::DuplicateMessage { age_ms } => {
                write!(f, "duplicate message sent {age_ms} ms ago")
            }
            Self::TypeCooldown {
                intervention_type,
                remaining_ms,
            } => write!(f, "{intervention_type} cooling down ({remaining_ms} ms left)"),
        }
    }
}

/// Outcome of [`DuplicateSuppressor::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admit { fingerprint: String },
    Suppress(SuppressReason),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateSuppressor {
    min_interval: Duration,
    cooldowns: CooldownConfig,
    max_recent: usize,
    recent: VecDeque<CooldownRecord>,
    last_accepted: Option<Instant>,
}

impl DuplicateSuppressor {
    pub fn new(config: &SuppressorConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            cooldowns: config.cooldowns.clone(),
            max_recent: config.max_recent.max(1),
            recent: VecDeque::with_capacity(config.max_recent),
            last_accepted: None,
        }
    }

    pub fn cooldown_for(&self, kind: InterventionType) -> Duration {
        self.cooldowns.for_type(kind)
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    pub fn records(&self) -> impl Iterator<Item = &CooldownRecord> {
        self.recent.iter()
    }

    /// Global spacing check, run at cycle start before any analysis work.
    pub fn check_interval(&self, now: Instant) -> Result<(), SuppressReason> {
        match self.last_accepted {
            Some(last) => {
                let since = now.saturating_duration_since(last);
                if since < self.min_interval {
                    Err(SuppressReason::MinInterval {
                        remaining_ms: (self.min_interval - since).as_millis() as u64,
                    })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// Decide whether `(kind, message)` may be emitted at `now`.
    pub fn evaluate(&mut self, kind: InterventionType, message: &str, now: Instant) -> Verdict {
        if let Err(reason) = self.check_interval(now) {
            return Verdict::Suppress(reason);
        }

        let fp = fingerprint(message);
        self.prune(now);

        let cooldown = self.cooldown_for(kind);
        for record in &self.recent {
            let age = now.saturating_duration_since(record.at);
            if age >= cooldown {
                continue;
            }
            if record.fingerprint == fp {
                return Verdict::Suppress(SuppressReason::DuplicateMessage {
                    age_ms: age.as_millis() as u64,
                });
            }
            if record.intervention_type == kind {
                return Verdict::Suppress(SuppressReason::TypeCooldown {
                    intervention_type: kind,
                    remaining_ms: (cooldown - age).as_millis() as u64,
                });
            }
        }
        Verdict::Admit { fingerprint: fp }
    }

    /// Record an emitted intervention and restart the global interval.
    pub fn record(&mut self, kind: InterventionType, fingerprint: String, now: Instant) {
        let cooldown = self.cooldown_for(kind);
        let duplicate = self.recent.iter().any(|r| {
            r.intervention_type == kind
                && r.fingerprint == fingerprint
                && now.saturating_duration_since(r.at) < cooldown
        });
        if !duplicate {
            if self.recent.len() == self.max_recent {
                self.recent.pop_front();
            }
            self.recent.push_back(CooldownRecord {
                intervention_type: kind,
                fingerprint,
                at: now,
            });
        }
        self.last_accepted = Some(now);
    }

    fn prune(&mut self, now: Instant) {
        let horizon = self.cooldowns.max();
        self.recent
            .retain(|r| now.saturating_duration_since(r.at) < horizon);
    }
}
