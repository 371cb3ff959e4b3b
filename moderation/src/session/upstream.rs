//! Transcription source boundary and the connection supervisor.
//!
//! ```text
//!  audio (ControlMessage::Audio) ──▶ supervisor ──send_audio──▶ TranscriptionSource
//!                                      ▲    │                        │
//!                              faults  │    │ Status/Failure          │ UpstreamSink
//!                                      │    ▼                        ▼
//!                                   UpstreamSink ──finals (priority)──▶ session task
//!                                               └─partials (lossy)────▶
//! ```
//!
//! The supervisor owns the source for the session's lifetime. It runs
//! connect/reconnect with backoff, buffers audio while the link is down and
//! reports every connection state change. A configuration failure is final
//! and reported exactly once.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionMachine, ConnectionState, ReconnectPolicy};
use super::events::{UpstreamError, UpstreamEvent};
use crate::config::ReconnectConfig;

/// A streaming speech-to-text backend.
#[async_trait]
pub trait TranscriptionSource: Send {
    fn name(&self) -> &str;

    /// Open the stream. Transcripts and errors flow back through `sink`.
    async fn connect(&mut self, sink: UpstreamSink) -> Result<(), UpstreamError>;

    async fn send_audio(&mut self, chunk: &[u8]) -> Result<(), UpstreamError>;

    async fn disconnect(&mut self);
}

/// Handle a source uses to report transcripts and faults.
#[derive(Debug, Clone)]
pub struct UpstreamSink {
    finals: mpsc::Sender<UpstreamEvent>,
    partials: mpsc::Sender<UpstreamEvent>,
    faults: mpsc::UnboundedSender<UpstreamError>,
}

impl UpstreamSink {
    pub fn new(
        finals: mpsc::Sender<UpstreamEvent>,
        partials: mpsc::Sender<UpstreamEvent>,
        faults: mpsc::UnboundedSender<UpstreamError>,
    ) -> Self {
        Self {
            finals,
            partials,
            faults,
        }
    }

    /// Deliver a finalized utterance. Waits for room on the priority channel.
    pub async fn final_transcript(&self, text: &str, latency_ms: f64, item_id: Option<&str>) {
        self.final_transcript_from(None, text, latency_ms, item_id)
            .await;
    }

    /// Like [`final_transcript`](Self::final_transcript) with speaker attribution.
    pub async fn final_transcript_from(
        &self,
        speaker: Option<&str>,
        text: &str,
        latency_ms: f64,
        item_id: Option<&str>,
    ) {
        let event = UpstreamEvent::Final {
            text: text.to_string(),
            latency_ms,
            item_id: item_id.map(String::from),
            speaker: speaker.map(String::from),
        };
        if self.finals.send(event).await.is_err() {
            debug!("Session gone, dropping final transcript");
        }
    }

    /// Deliver a partial revision. Dropped if the partial channel is full.
    pub fn partial_transcript(&self, item_id: &str, text: &str) {
        let event = UpstreamEvent::Partial {
            item_id: item_id.to_string(),
            text: text.to_string(),
        };
        if let Err(e) = self.partials.try_send(event) {
            debug!(item_id, error = %e, "Partial transcript dropped");
        }
    }

    pub async fn speech_ended(&self) {
        let _ = self.finals.send(UpstreamEvent::SpeechEnded).await;
    }

    /// Report a stream fault to the supervisor.
    pub fn error(&self, err: UpstreamError) {
        let _ = self.faults.send(err);
    }
}

/// Channels the supervisor needs besides the source itself.
pub struct SupervisorChannels {
    pub finals: mpsc::Sender<UpstreamEvent>,
    pub partials: mpsc::Sender<UpstreamEvent>,
    pub audio: mpsc::Receiver<Vec<u8>>,
}

/// Run the connection supervisor until the session is cancelled or the
/// connection fails terminally.
pub async fn supervise(
    mut source: Box<dyn TranscriptionSource>,
    channels: SupervisorChannels,
    config: ReconnectConfig,
    cancel: CancellationToken,
) -> ConnectionState {
    let SupervisorChannels {
        finals,
        partials,
        mut audio,
    } = channels;
    let (fault_tx, mut faults) = mpsc::unbounded_channel();
    let sink = UpstreamSink::new(finals.clone(), partials, fault_tx);
    let policy = ReconnectPolicy::new(&config);
    let mut buffer = AudioBuffer::new(config.audio_buffer_chunks);
    let mut machine = ConnectionMachine::new();
    let mut attempt: u32 = 0;

    let report = |state: ConnectionState| {
        let finals = finals.clone();
        async move {
            let _ = finals.send(UpstreamEvent::Status(state)).await;
        }
    };

    move_to(&mut machine, ConnectionState::Connecting, None);
    report(ConnectionState::Connecting).await;

    loop {
        // ── Connecting ───────────────────────────────────────────────────
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = source.connect(sink.clone()) => res,
        };

        match connected {
            Ok(()) => {
                attempt = 0;
                move_to(&mut machine, ConnectionState::Connected, None);
                info!(source = source.name(), "Upstream connected");
                report(ConnectionState::Connected).await;

                let mut fault = None;
                while let Some(chunk) = buffer.pop() {
                    if let Err(e) = source.send_audio(&chunk).await {
                        buffer.push_front(chunk);
                        fault = Some(e);
                        break;
                    }
                }

                // ── Connected ────────────────────────────────────────────
                if fault.is_none() {
                    fault = loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break None,
                            Some(err) = faults.recv() => break Some(err),
                            chunk = audio.recv() => match chunk {
                                Some(chunk) => {
                                    if let Err(e) = source.send_audio(&chunk).await {
                                        buffer.push_back(chunk);
                                        break Some(e);
                                    }
                                }
                                // Session dropped its audio sender: it is closing.
                                None => break None,
                            },
                        }
                    };
                }

                let Some(err) = fault else {
                    break;
                };
                source.disconnect().await;
                if !err.is_recoverable() {
                    return fail(&mut machine, &finals, err).await;
                }
                warn!(source = source.name(), error = %err, "Upstream dropped, reconnecting");
                let _ = finals.send(UpstreamEvent::Failure(err.clone())).await;
                move_to(&mut machine, ConnectionState::Reconnecting, Some(&err.to_string()));
                report(ConnectionState::Reconnecting).await;
            }
            Err(err) if !err.is_recoverable() => {
                return fail(&mut machine, &finals, err).await;
            }
            Err(err) => {
                warn!(source = source.name(), attempt, error = %err, "Upstream connect failed");
                move_to(&mut machine, ConnectionState::Reconnecting, Some(&err.to_string()));
                report(ConnectionState::Reconnecting).await;
            }
        }

        // ── Reconnecting: back off while buffering audio ─────────────────
        attempt += 1;
        let Some(delay) = policy.delay(attempt) else {
            let err = UpstreamError::Exhausted {
                attempts: policy.max_attempts(),
            };
            return fail(&mut machine, &finals, err).await;
        };
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect backoff");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    move_to(&mut machine, ConnectionState::Closed, None);
                    return ConnectionState::Closed;
                }
                _ = &mut sleep => break,
                Some(chunk) = audio.recv() => buffer.push_back(chunk),
                // Faults from a dead stream are stale now.
                Some(_) = faults.recv() => {}
            }
        }
        move_to(&mut machine, ConnectionState::Connecting, None);
        report(ConnectionState::Connecting).await;
    }

    source.disconnect().await;
    move_to(&mut machine, ConnectionState::Closed, None);
    ConnectionState::Closed
}

fn move_to(machine: &mut ConnectionMachine, to: ConnectionState, reason: Option<&str>) {
    if let Err(e) = machine.advance(to, reason) {
        warn!(error = %e, "Ignoring illegal connection transition");
    }
}

async fn fail(
    machine: &mut ConnectionMachine,
    finals: &mpsc::Sender<UpstreamEvent>,
    err: UpstreamError,
) -> ConnectionState {
    error!(code = err.code(), error = %err, "Upstream failed");
    move_to(machine, ConnectionState::Failed, Some(&err.to_string()));
    let _ = finals.send(UpstreamEvent::Failure(err)).await;
    let _ = finals
        .send(UpstreamEvent::Status(ConnectionState::Failed))
        .await;
    ConnectionState::Failed
}

/// Bounded FIFO of audio chunks held while disconnected. Oldest chunks are
/// dropped first when full.
#[derive(Debug)]
pub struct AudioBuffer {
    capacity: usize,
    chunks: VecDeque<Vec<u8>>,
    dropped: u64,
}

impl AudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            chunks: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push_back(&mut self, chunk: Vec<u8>) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
            self.dropped += 1;
        }
        self.chunks.push_back(chunk);
    }

    /// Put a chunk back at the head after a failed send.
    pub fn push_front(&mut self, chunk: Vec<u8>) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_back();
            self.dropped += 1;
        }
        self.chunks.push_front(chunk);
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.chunks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
