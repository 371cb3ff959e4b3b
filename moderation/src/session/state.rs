//! Mutable per-session state.
//!
//! Owned exclusively by the session task. Analyzers only ever see a
//! [`SessionView`] cut from it; cycle results come back as a
//! [`CycleReport`] and are folded in by [`SessionState::apply_report`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::connection::ConnectionState;
use super::events::{SpeakerShare, SpeakerStats};
use crate::analyzer::AnalyzerKind;
use crate::orchestrator::{CycleInput, CycleReport};
use crate::types::{short_id, Intervention, Participant, SessionId, SessionView, TranscriptEntry};

/// An utterance still being transcribed.
#[derive(Debug, Clone)]
struct PendingPartial {
    entry: TranscriptEntry,
    last_emit: Option<Instant>,
}

/// Everything a session leaves behind when it closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub title: String,
    pub agenda: String,
    pub participants: Vec<Participant>,
    pub transcript: Vec<TranscriptEntry>,
    pub interventions: Vec<Intervention>,
    pub parking_lot: Vec<String>,
}

#[derive(Debug)]
pub struct SessionState {
    session_id: SessionId,
    title: String,
    agenda: String,
    participants: Vec<Participant>,
    transcript: Vec<TranscriptEntry>,
    interventions: Vec<Intervention>,
    parking_lot: Vec<String>,
    pending: HashMap<String, PendingPartial>,
    finalized: HashSet<String>,
    connection: ConnectionState,
    unresolved: BTreeSet<AnalyzerKind>,
}

impl SessionState {
    pub fn new(
        session_id: impl Into<SessionId>,
        title: impl Into<String>,
        agenda: impl Into<String>,
        participants: Vec<Participant>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            title: title.into(),
            agenda: agenda.into(),
            participants,
            transcript: Vec::new(),
            interventions: Vec::new(),
            parking_lot: Vec::new(),
            pending: HashMap::new(),
            finalized: HashSet::new(),
            connection: ConnectionState::Disconnected,
            unresolved: BTreeSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn interventions(&self) -> &[Intervention] {
        &self.interventions
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn parking_lot(&self) -> &[String] {
        &self.parking_lot
    }

    pub fn unresolved(&self) -> &BTreeSet<AnalyzerKind> {
        &self.unresolved
    }

    pub fn pending_partials(&self) -> usize {
        self.pending.len()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    // ── Transcript ───────────────────────────────────────────────────────

    /// Fold a partial revision into the pending entry for `item_id`.
    ///
    /// Returns the entry to publish as a `transcript_update`, or `None` when
    /// the revision is empty, belongs to a finalized item, or falls inside
    /// the throttle window. The stored text always tracks the latest revision.
    pub fn apply_partial(
        &mut self,
        item_id: &str,
        text: &str,
        now: Instant,
        throttle: Duration,
    ) -> Option<TranscriptEntry> {
        if text.trim().is_empty() || self.finalized.contains(item_id) {
            return None;
        }

        let pending = self
            .pending
            .entry(item_id.to_string())
            .or_insert_with(|| PendingPartial {
                entry: TranscriptEntry::new(TranscriptEntry::UNKNOWN_SPEAKER, "")
                    .with_id(format!("rt_{item_id}")),
                last_emit: None,
            });
        pending.entry.text = text.to_string();

        let due = match pending.last_emit {
            Some(last) => now.saturating_duration_since(last) >= throttle,
            None => true,
        };
        if !due {
            return None;
        }
        pending.last_emit = Some(now);
        Some(pending.entry.clone())
    }

    /// Append a finalized utterance. A matching pending partial is consumed
    /// and its id reused, so one item always yields exactly one entry.
    pub fn apply_final(
        &mut self,
        text: &str,
        latency_ms: f64,
        item_id: Option<&str>,
        speaker: Option<&str>,
    ) -> Option<TranscriptEntry> {
        let text = text.trim();
        let pending = item_id.and_then(|id| self.pending.remove(id));
        if let Some(id) = item_id {
            if !self.finalized.insert(id.to_string()) {
                return None;
            }
        }
        if text.is_empty() {
            return None;
        }

        let speaker = speaker
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(TranscriptEntry::UNKNOWN_SPEAKER);
        let mut entry = TranscriptEntry::new(speaker, text);
        entry.latency_ms = latency_ms;
        if let Some(pending) = pending {
            entry.id = pending.entry.id;
        }
        Some(self.push(entry))
    }

    /// Append an injected line (dialogue or manual input).
    pub fn inject(&mut self, speaker: &str, text: &str) -> Option<TranscriptEntry> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(self.push(TranscriptEntry::new(speaker, text)))
    }

    /// Convert every pending partial into a final entry. Used on close.
    pub fn flush_partials(&mut self) -> Vec<TranscriptEntry> {
        let mut pending: Vec<(String, PendingPartial)> = self.pending.drain().collect();
        pending.sort_by_key(|(_, p)| p.entry.timestamp);

        let mut flushed = Vec::with_capacity(pending.len());
        for (item_id, partial) in pending {
            self.finalized.insert(item_id);
            let mut entry = partial.entry;
            entry.text = entry.text.trim().to_string();
            if entry.text.is_empty() {
                continue;
            }
            flushed.push(self.push(entry));
        }
        flushed
    }

    fn push(&mut self, mut entry: TranscriptEntry) -> TranscriptEntry {
        if let Some(last) = self.transcript.last() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        if let Some(p) = self.participants.iter_mut().find(|p| p.name == entry.speaker) {
            p.speaking_count += 1;
        }
        self.transcript.push(entry.clone());
        entry
    }

    // ── Roster and agenda ────────────────────────────────────────────────

    /// Merge a roster update, matching by id first and then by name.
    pub fn update_participants(&mut self, incoming: Vec<Participant>) {
        for participant in incoming {
            let existing = self
                .participants
                .iter()
                .position(|p| !participant.id.is_empty() && p.id == participant.id)
                .or_else(|| {
                    self.participants
                        .iter()
                        .position(|p| p.name == participant.name)
                });
            match existing {
                Some(idx) => {
                    let current = &mut self.participants[idx];
                    current.name = participant.name;
                    if !participant.role.is_empty() {
                        current.role = participant.role;
                    }
                    if current.id.is_empty() {
                        current.id = participant.id;
                    }
                }
                None => {
                    let mut participant = participant;
                    if participant.id.is_empty() {
                        participant.id = short_id("p");
                    }
                    self.participants.push(participant);
                }
            }
        }
    }

    pub fn update_agenda(&mut self, title: Option<String>, agenda: Option<String>) {
        if let Some(title) = title {
            self.title = title;
        }
        if let Some(agenda) = agenda {
            self.agenda = agenda;
        }
    }

    /// Per-speaker share of the transcript, most active first.
    pub fn speaker_stats(&self) -> SpeakerStats {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for entry in &self.transcript {
            match counts.iter_mut().find(|(s, _)| *s == entry.speaker) {
                Some((_, n)) => *n += 1,
                None => counts.push((entry.speaker.clone(), 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        let total = self.transcript.len();
        let speakers = counts
            .into_iter()
            .map(|(speaker, count)| SpeakerShare {
                speaker,
                count,
                percentage: ((count as f32 / total as f32) * 1000.0).round() / 10.0,
            })
            .collect();
        SpeakerStats { total, speakers }
    }

    // ── Cycle plumbing ───────────────────────────────────────────────────

    /// Read-only view over the last `recent_window` entries.
    pub fn view(&self, recent_window: usize) -> SessionView {
        let start = self.transcript.len().saturating_sub(recent_window);
        let mut view = SessionView::new(
            self.session_id.clone(),
            self.agenda.clone(),
            self.participants.clone(),
            self.transcript[start..].to_vec(),
        );
        view.title = self.title.clone();
        view
    }

    pub fn cycle_input(&self, recent_window: usize) -> CycleInput {
        CycleInput {
            view: self.view(recent_window),
            transcript_len: self.transcript.len(),
            unresolved: self.unresolved.clone(),
        }
    }

    /// Fold a settled cycle back into the session.
    ///
    /// Flagged domains stay unresolved until their analyzer clears them;
    /// failures leave the set untouched. Cancelled reports are ignored.
    pub fn apply_report(&mut self, report: &CycleReport) -> Option<&Intervention> {
        if report.cancelled {
            return None;
        }
        for kind in &report.flagged {
            self.unresolved.insert(*kind);
        }
        for kind in &report.cleared {
            self.unresolved.remove(kind);
        }

        let intervention = report.intervention.as_ref()?;
        if let Some(item) = &intervention.parking_lot_item {
            self.parking_lot.push(item.clone());
        }
        self.interventions.push(intervention.clone());
        self.interventions.last()
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            title: self.title.clone(),
            agenda: self.agenda.clone(),
            participants: self.participants.clone(),
            transcript: self.transcript.clone(),
            interventions: self.interventions.clone(),
            parking_lot: self.parking_lot.clone(),
        }
    }
}
