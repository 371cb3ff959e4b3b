//! The per-session task.
//!
//! ```text
//!  TranscriptionSource ─▶ supervisor ─finals──┐
//!                                  └─partials─┤
//!  SessionHandle ──control─────────────────────┤
//!                                              ▼
//!                                  ┌──────────────────────┐   spawn   ┌──────────────┐
//!                                  │ session task (select)│──────────▶│ cycle task   │
//!                                  │   owns SessionState  │◀──report──│ (orchestrator│
//!                                  └──────────┬───────────┘           │  mutex held) │
//!                                             │ SessionEvent          └──────────────┘
//!                                             ▼
//!                                         consumer
//! ```
//!
//! All session mutation happens on this one task. The select loop is biased:
//! cancellation, then finals, then cycle completion, then control, then
//! partials, then the pending-cycle timer. At most one cycle runs at a time;
//! finals that arrive while one is in flight coalesce into a single follow-up
//! cycle that sees the latest transcript.

use std::future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::ConnectionState;
use super::dialogue::{run_dialogue, DialogueGenerator};
use super::events::{ControlMessage, InterventionPayload, SessionEvent, SttStatus, UpstreamEvent};
use super::state::{SessionRecord, SessionState};
use super::upstream::{supervise, SupervisorChannels, TranscriptionSource};
use crate::analyzer::AnalyzerRegistry;
use crate::config::ModerationConfig;
use crate::orchestrator::{CycleReport, Orchestrator, SharedOrchestrator};
use crate::safety::{PermissiveClassifier, SafetyClassifier};
use crate::types::{short_id, Participant, SessionId, SessionView, TranscriptEntry};

/// Error code sent when dialogue is requested but no generator is configured.
pub const DIALOGUE_UNAVAILABLE: &str = "DIALOGUE_UNAVAILABLE";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("session {0} is closed")]
pub struct SessionClosed(pub SessionId);

// ── Builder ──────────────────────────────────────────────────────────────

pub struct SessionBuilder {
    config: ModerationConfig,
    session_id: Option<SessionId>,
    title: String,
    agenda: String,
    participants: Vec<Participant>,
    analyzers: Option<AnalyzerRegistry>,
    classifier: Arc<dyn SafetyClassifier>,
    source: Option<Box<dyn TranscriptionSource>>,
    dialogue: Option<Arc<dyn DialogueGenerator>>,
}

impl SessionBuilder {
    pub fn new(config: ModerationConfig) -> Self {
        Self {
            config,
            session_id: None,
            title: String::new(),
            agenda: String::new(),
            participants: Vec::new(),
            analyzers: None,
            classifier: Arc::new(PermissiveClassifier),
            source: None,
            dialogue: None,
        }
    }

    pub fn session_id(mut self, id: impl Into<SessionId>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn agenda(mut self, agenda: impl Into<String>) -> Self {
        self.agenda = agenda.into();
        self
    }

    pub fn participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = participants;
        self
    }

    /// Defaults to the heuristic analyzers.
    pub fn analyzers(mut self, registry: AnalyzerRegistry) -> Self {
        self.analyzers = Some(registry);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn SafetyClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Without a source the session runs on injected transcript only.
    pub fn source(mut self, source: Box<dyn TranscriptionSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn dialogue(mut self, generator: Arc<dyn DialogueGenerator>) -> Self {
        self.dialogue = Some(generator);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Start the session task. Must be called inside a tokio runtime.
    pub fn spawn(
        self,
    ) -> (
        SessionHandle,
        mpsc::Receiver<SessionEvent>,
        JoinHandle<SessionRecord>,
    ) {
        let Self {
            config,
            session_id,
            title,
            agenda,
            participants,
            analyzers,
            classifier,
            source,
            dialogue,
        } = self;
        let session_id = session_id.unwrap_or_else(|| short_id("sess"));
        let capacities = &config.session;

        let (finals_tx, finals_rx) = mpsc::channel(capacities.final_capacity.max(1));
        let (partials_tx, partials_rx) = mpsc::channel(capacities.partial_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(capacities.control_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacities.outbound_capacity.max(1));

        let cancel = CancellationToken::new();
        let registry =
            analyzers.unwrap_or_else(|| AnalyzerRegistry::with_heuristics(&config.planner));
        let orchestrator =
            Orchestrator::new(session_id.clone(), &config, registry, classifier).shared();

        let (audio, upstream) = match source {
            Some(source) => {
                let (audio_tx, audio_rx) = mpsc::channel(capacities.audio_capacity.max(1));
                let channels = SupervisorChannels {
                    finals: finals_tx,
                    partials: partials_tx,
                    audio: audio_rx,
                };
                let task = tokio::spawn(supervise(
                    source,
                    channels,
                    config.reconnect.clone(),
                    cancel.child_token(),
                ));
                (Some(audio_tx), Some(task))
            }
            None => (None, None),
        };

        let state = SessionState::new(session_id.clone(), title, agenda, participants);
        let (view_tx, _) = watch::channel(state.view(config.executor.recent_window));

        let task = SessionTask {
            state,
            config,
            orchestrator: orchestrator.clone(),
            outbound: outbound_tx,
            control: control_tx.downgrade(),
            cancel: cancel.clone(),
            audio,
            upstream,
            generator: dialogue,
            dialogue: None,
            view_tx,
            in_flight: None,
            pending: false,
            last_start: None,
            deadline: None,
        };
        let join = tokio::spawn(task.run(finals_rx, partials_rx, control_rx));

        let handle = SessionHandle {
            id: session_id,
            control: control_tx,
            cancel,
            orchestrator,
        };
        (handle, outbound_rx, join)
    }
}

// ── Handle ───────────────────────────────────────────────────────────────

/// Cheap, cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    control: mpsc::Sender<ControlMessage>,
    cancel: CancellationToken,
    orchestrator: SharedOrchestrator,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn send(&self, msg: ControlMessage) -> Result<(), SessionClosed> {
        self.control
            .send(msg)
            .await
            .map_err(|_| SessionClosed(self.id.clone()))
    }

    pub async fn inject(
        &self,
        speaker: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), SessionClosed> {
        self.send(ControlMessage::InjectTranscript {
            speaker: speaker.into(),
            text: text.into(),
        })
        .await
    }

    pub async fn audio(&self, chunk: Vec<u8>) -> Result<(), SessionClosed> {
        self.send(ControlMessage::Audio(chunk)).await
    }

    /// Cancel the session. In-flight analysis stops and its results are
    /// discarded; pending partials are still flushed to the transcript.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Blackboard dump. Waits for any in-flight cycle to finish.
    pub async fn diagnostics(&self) -> serde_json::Result<serde_json::Value> {
        self.orchestrator.lock().await.blackboard().to_json()
    }
}

// ── Task ─────────────────────────────────────────────────────────────────

struct SessionTask {
    state: SessionState,
    config: ModerationConfig,
    orchestrator: SharedOrchestrator,
    outbound: mpsc::Sender<SessionEvent>,
    /// Weak so a dropped handle still closes the control channel.
    control: mpsc::WeakSender<ControlMessage>,
    cancel: CancellationToken,
    audio: Option<mpsc::Sender<Vec<u8>>>,
    upstream: Option<JoinHandle<ConnectionState>>,
    generator: Option<Arc<dyn DialogueGenerator>>,
    dialogue: Option<CancellationToken>,
    view_tx: watch::Sender<SessionView>,
    in_flight: Option<JoinHandle<CycleReport>>,
    pending: bool,
    last_start: Option<Instant>,
    deadline: Option<Instant>,
}

impl SessionTask {
    async fn run(
        mut self,
        mut finals: mpsc::Receiver<UpstreamEvent>,
        mut partials: mpsc::Receiver<UpstreamEvent>,
        mut control: mpsc::Receiver<ControlMessage>,
    ) -> SessionRecord {
        info!(session_id = %self.state.session_id(), "Session started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(event) = finals.recv() => self.on_upstream(event).await,
                report = join_cycle(&mut self.in_flight) => self.on_cycle_done(report).await,
                msg = control.recv() => match msg {
                    Some(ControlMessage::Close) | None => break,
                    Some(msg) => self.on_control(msg).await,
                },
                Some(event) = partials.recv() => self.on_upstream(event).await,
                _ = wait_deadline(deadline) => {
                    self.deadline = None;
                    self.schedule();
                }
            }
        }

        drop((finals, partials, control));
        self.shutdown().await
    }

    async fn emit(&self, event: SessionEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(session_id = %self.state.session_id(), "Consumer gone, dropping event");
        }
    }

    async fn on_upstream(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Final {
                text,
                latency_ms,
                item_id,
                speaker,
            } => {
                let entry =
                    self.state
                        .apply_final(&text, latency_ms, item_id.as_deref(), speaker.as_deref());
                if let Some(entry) = entry {
                    self.on_new_entry(entry).await;
                }
            }
            UpstreamEvent::Partial { item_id, text } => {
                let throttle = self.config.session.partial_throttle();
                if let Some(entry) = self
                    .state
                    .apply_partial(&item_id, &text, Instant::now(), throttle)
                {
                    self.emit(SessionEvent::TranscriptUpdate(entry)).await;
                }
            }
            UpstreamEvent::SpeechEnded => {
                // Utterance boundary. The pending cycle still honors spacing.
                debug!(session_id = %self.state.session_id(), pending = self.pending, "Speech ended");
                self.schedule();
            }
            UpstreamEvent::Status(state) => {
                self.state.set_connection(state);
                if let Some(status) = SttStatus::from_connection(state) {
                    self.emit(SessionEvent::SttStatus { status }).await;
                }
            }
            UpstreamEvent::Failure(err) => {
                self.emit(SessionEvent::from(&err)).await;
            }
        }
    }

    async fn on_new_entry(&mut self, entry: TranscriptEntry) {
        debug!(
            session_id = %self.state.session_id(),
            entry_id = %entry.id,
            speaker = %entry.speaker,
            "Transcript entry"
        );
        self.emit(SessionEvent::Transcript(entry)).await;
        self.emit(SessionEvent::SpeakerStats(self.state.speaker_stats()))
            .await;
        self.publish_view();
        self.pending = true;
        self.schedule();
    }

    async fn on_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::UpdateParticipants(participants) => {
                self.state.update_participants(participants);
                self.publish_view();
            }
            ControlMessage::UpdateAgenda { title, agenda } => {
                self.state.update_agenda(title, agenda);
                self.publish_view();
            }
            ControlMessage::InjectTranscript { speaker, text } => {
                if let Some(entry) = self.state.inject(&speaker, &text) {
                    self.on_new_entry(entry).await;
                }
            }
            ControlMessage::StartDialogue => self.start_dialogue().await,
            ControlMessage::StopDialogue => {
                if let Some(token) = self.dialogue.take() {
                    token.cancel();
                    self.emit(SessionEvent::DialogueStatus { active: false })
                        .await;
                }
            }
            ControlMessage::Audio(chunk) => match &self.audio {
                Some(tx) => {
                    if let Err(e) = tx.try_send(chunk) {
                        debug!(session_id = %self.state.session_id(), error = %e, "Audio chunk dropped");
                    }
                }
                None => {
                    debug!(session_id = %self.state.session_id(), "No transcription source, dropping audio");
                }
            },
            // Handled by the select loop.
            ControlMessage::Close => {}
        }
    }

    async fn start_dialogue(&mut self) {
        if self.dialogue.is_some() {
            return;
        }
        let (Some(generator), Some(control)) = (self.generator.clone(), self.control.upgrade())
        else {
            self.emit(SessionEvent::error(
                DIALOGUE_UNAVAILABLE,
                "no dialogue generator configured",
                true,
            ))
            .await;
            return;
        };

        let token = self.cancel.child_token();
        self.dialogue = Some(token.clone());
        self.publish_view();
        tokio::spawn(run_dialogue(
            generator,
            self.view_tx.subscribe(),
            control,
            self.config.session.dialogue_interval(),
            token,
        ));
        info!(session_id = %self.state.session_id(), "Dialogue started");
        self.emit(SessionEvent::DialogueStatus { active: true }).await;
    }

    fn publish_view(&self) {
        if self.dialogue.is_some() {
            self.view_tx
                .send_replace(self.state.view(self.config.executor.recent_window));
        }
    }

    // ── Cycle scheduling ─────────────────────────────────────────────────

    /// Start the pending cycle now if spacing allows, otherwise arm the timer.
    fn schedule(&mut self) {
        if !self.pending || self.in_flight.is_some() {
            return;
        }
        let spacing = self.config.session.cycle_spacing();
        match self.last_start {
            Some(last) if Instant::now() < last + spacing => {
                self.deadline = Some(last + spacing);
            }
            _ => self.start_cycle(),
        }
    }

    fn start_cycle(&mut self) {
        self.pending = false;
        self.deadline = None;
        self.last_start = Some(Instant::now());

        let input = self.state.cycle_input(self.config.executor.recent_window);
        let orchestrator = self.orchestrator.clone();
        let cancel = self.cancel.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let mut orchestrator = orchestrator.lock().await;
            orchestrator.run_cycle(input, &cancel).await
        }));
    }

    async fn on_cycle_done(&mut self, report: Option<CycleReport>) {
        if let Some(report) = report {
            let payload = self
                .state
                .apply_report(&report)
                .map(InterventionPayload::from);
            if let Some(payload) = payload {
                self.emit(SessionEvent::Intervention(payload)).await;
            }
        }
        self.schedule();
    }

    async fn shutdown(mut self) -> SessionRecord {
        self.cancel.cancel();
        if let Some(cycle) = self.in_flight.take() {
            // Cancelled mid-flight: the report is discarded.
            let _ = cycle.await;
        }
        self.audio = None;
        if let Some(upstream) = self.upstream.take() {
            match upstream.await {
                Ok(state) => self.state.set_connection(state),
                Err(e) => warn!(session_id = %self.state.session_id(), error = %e, "Supervisor task failed"),
            }
        }

        for entry in self.state.flush_partials() {
            self.emit(SessionEvent::Transcript(entry)).await;
        }

        let record = self.state.record();
        info!(
            session_id = %record.session_id,
            transcript = record.transcript.len(),
            interventions = record.interventions.len(),
            "Session closed"
        );
        record
    }
}

/// Resolves when the in-flight cycle finishes; pending forever when idle.
async fn join_cycle(in_flight: &mut Option<JoinHandle<CycleReport>>) -> Option<CycleReport> {
    let Some(handle) = in_flight.as_mut() else {
        return future::pending().await;
    };
    let result = handle.await;
    *in_flight = None;
    match result {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "Analysis cycle task failed");
            None
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuppressorConfig;
    use std::time::Duration;

    fn config() -> ModerationConfig {
        ModerationConfig {
            suppressor: SuppressorConfig {
                min_interval_secs: 0,
                ..SuppressorConfig::default()
            },
            ..ModerationConfig::default()
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_lines_are_moderated() {
        let (handle, mut events, join) = SessionBuilder::new(config())
            .agenda("Q3 budget")
            .participants(vec![Participant::new("Ana"), Participant::new("Ben")])
            .spawn();

        handle.inject("Ana", "Let's look at the numbers.").await.unwrap();
        handle.inject("Ben", "No time, we must just decide.").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.close();

        let record = join.await.unwrap();
        let events = drain(&mut events).await;
        assert_eq!(record.transcript.len(), 2);
        assert_eq!(record.interventions.len(), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Intervention(p) if p.violated_principle.as_deref() == Some("Respect the timebox")
        )));
        assert!(events.iter().any(|e| e.event_type() == "speaker_stats"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialogue_without_generator_reports_error() {
        let (handle, mut events, join) = SessionBuilder::new(config()).spawn();
        handle.send(ControlMessage::StartDialogue).await.unwrap();
        handle.send(ControlMessage::Close).await.unwrap();
        join.await.unwrap();

        let events = drain(&mut events).await;
        assert!(matches!(
            &events[0],
            SessionEvent::Error { code, recoverable: true, .. } if code == DIALOGUE_UNAVAILABLE
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_close_fails() {
        let (handle, _events, join) = SessionBuilder::new(config()).session_id("s-closed").spawn();
        handle.close();
        join.await.unwrap();
        assert!(handle.is_closed());
        let err = handle.inject("Ana", "hello").await.unwrap_err();
        assert_eq!(err.to_string(), "session s-closed is closed");
    }
}
