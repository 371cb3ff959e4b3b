//! Per-session blackboard: bounded audit log plus a current snapshot.
//!
//! ```text
//! orchestrator ──append──▶ [ev ev ev … ev]  (oldest evicted past capacity)
//!               ──update──▶ BlackboardSnapshot
//! ```
//!
//! Serializable to JSON for crash diagnostics. Not used for correctness.

pub mod events;

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use events::BlackboardEvent;

use crate::retry::AnalyzerHealth;
use crate::types::{Participant, TranscriptEntry};

/// Lines of transcript kept in the snapshot.
pub const SNAPSHOT_LINES: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlackboardSnapshot {
    pub participants: Vec<String>,
    pub recent_lines: Vec<String>,
    pub analyzer_health: BTreeMap<String, AnalyzerHealth>,
    pub transcript_count: usize,
    pub intervention_count: usize,
    pub cycles: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BlackboardSnapshot {
    pub fn refresh_session(
        &mut self,
        participants: &[Participant],
        transcript: &[TranscriptEntry],
        intervention_count: usize,
    ) {
        self.participants = participants.iter().map(|p| p.name.clone()).collect();
        let start = transcript.len().saturating_sub(SNAPSHOT_LINES);
        self.recent_lines = transcript[start..]
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.text))
            .collect();
        self.transcript_count = transcript.len();
        self.intervention_count = intervention_count;
        self.updated_at = Some(Utc::now());
    }
}

/// Aggregate counts over the retained events.
#[derive(Debug, Default, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: HashMap<String, usize>,
    pub interventions: usize,
    pub suppressed: usize,
    pub failures: usize,
    pub recoveries: usize,
}

impl EventStats {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a BlackboardEvent>) -> Self {
        let mut stats = Self::default();
        for event in events {
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;

            match event {
                BlackboardEvent::Intervention { .. } => stats.interventions += 1,
                BlackboardEvent::Suppressed { .. } => stats.suppressed += 1,
                BlackboardEvent::AnalyzerFailure { .. } => stats.failures += 1,
                BlackboardEvent::Recovery { .. } => stats.recoveries += 1,
                _ => {}
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Blackboard {
    capacity: usize,
    events: VecDeque<BlackboardEvent>,
    snapshot: BlackboardSnapshot,
}

impl Blackboard {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            snapshot: BlackboardSnapshot::default(),
        }
    }

    pub fn append(&mut self, event: BlackboardEvent) {
        tracing::trace!(event_type = event.event_type(), "Blackboard append");
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &BlackboardEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn snapshot(&self) -> &BlackboardSnapshot {
        &self.snapshot
    }

    pub fn snapshot_mut(&mut self) -> &mut BlackboardSnapshot {
        &mut self.snapshot
    }

    pub fn stats(&self) -> EventStats {
        EventStats::from_events(&self.events)
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(n: usize) -> BlackboardEvent {
        BlackboardEvent::Warning {
            message: format!("w{n}"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut board = Blackboard::new(200);
        for n in 0..250 {
            board.append(warning(n));
        }
        assert_eq!(board.len(), 200);
        match board.events().next().unwrap() {
            BlackboardEvent::Warning { message, .. } => assert_eq!(message, "w50"),
            other => panic!("unexpected event {other:?}"),
        };
    }

    #[test]
    fn test_snapshot_keeps_last_five_lines() {
        let mut board = Blackboard::new(10);
        let transcript: Vec<TranscriptEntry> = (0..8)
            .map(|i| TranscriptEntry::new("Ana", format!("line {i}")))
            .collect();
        board
            .snapshot_mut()
            .refresh_session(&[Participant::new("Ana")], &transcript, 2);
        let snap = board.snapshot();
        assert_eq!(snap.recent_lines.len(), SNAPSHOT_LINES);
        assert_eq!(snap.recent_lines[0], "Ana: line 3");
        assert_eq!(snap.transcript_count, 8);
        assert_eq!(snap.intervention_count, 2);
    }

    #[test]
    fn test_stats_and_json() {
        let mut board = Blackboard::new(10);
        board.append(warning(1));
        board.append(BlackboardEvent::Recovery {
            failures: 3,
            timestamp: Utc::now(),
        });
        let stats = board.stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.recoveries, 1);
        assert_eq!(stats.events_by_type["warning"], 1);

        let json = board.to_json().unwrap();
        assert_eq!(json["events"].as_array().unwrap().len(), 2);
        assert_eq!(json["capacity"], 10);
    }
}
