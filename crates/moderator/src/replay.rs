//! Scripted transcription source.
//!
//! A script is JSON Lines, one upstream event per line, each stamped with
//! its offset from the first connect:
//!
//! ```text
//! {"at_ms": 0,    "event": "partial", "item_id": "x1", "text": "we should"}
//! {"at_ms": 400,  "event": "final",   "item_id": "x1", "text": "We should ship.", "speaker": "Ana"}
//! {"at_ms": 450,  "event": "speech_ended"}
//! {"at_ms": 9000, "event": "fault",   "kind": "connection", "message": "socket reset"}
//! ```
//!
//! A fault ends the current connection. Playback resumes from the next line
//! when the supervisor reconnects, with the timeline still anchored at the
//! first connect, so lines that fell due while disconnected play at once.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moderation::{SessionHandle, TranscriptionSource, UpstreamError, UpstreamSink};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

// ── Script format ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptLine {
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub step: ScriptStep,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptStep {
    Partial {
        item_id: String,
        text: String,
    },
    Final {
        text: String,
        #[serde(default)]
        speaker: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        latency_ms: f64,
    },
    SpeechEnded,
    Fault {
        kind: FaultKind,
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Configuration,
    Connection,
    Stream,
}

impl FaultKind {
    fn into_error(self, message: String) -> UpstreamError {
        match self {
            Self::Configuration => UpstreamError::Configuration(message),
            Self::Connection => UpstreamError::Connection(message),
            Self::Stream => UpstreamError::Stream(message),
        }
    }
}

/// A line of text to inject as if typed by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InjectLine {
    #[serde(default)]
    pub at_ms: u64,
    pub speaker: String,
    pub text: String,
}

/// Parse JSON Lines, skipping blank lines and `#` comments.
pub fn parse_jsonl<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, ReplayError> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| ReplayError::Parse {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ReplayError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_jsonl(&raw)
}

/// Load a transcription script, ordered by offset.
pub fn load_script(path: &Path) -> Result<Vec<ScriptLine>, ReplayError> {
    let mut lines: Vec<ScriptLine> = read_jsonl(path)?;
    lines.sort_by_key(|l| l.at_ms);
    Ok(lines)
}

pub fn load_injections(path: &Path) -> Result<Vec<InjectLine>, ReplayError> {
    let mut lines: Vec<InjectLine> = read_jsonl(path)?;
    lines.sort_by_key(|l| l.at_ms);
    Ok(lines)
}

// ── Source ───────────────────────────────────────────────────────────────

pub struct ReplaySource {
    remaining: Arc<Mutex<VecDeque<ScriptLine>>>,
    origin: Option<Instant>,
    playback: Option<(CancellationToken, JoinHandle<()>)>,
    finished: CancellationToken,
}

impl ReplaySource {
    pub fn new(lines: Vec<ScriptLine>) -> Self {
        Self {
            remaining: Arc::new(Mutex::new(lines.into())),
            origin: None,
            playback: None,
            finished: CancellationToken::new(),
        }
    }

    /// Cancelled once the script is exhausted or hit a terminal fault.
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    async fn stop_playback(&mut self) {
        if let Some((cancel, task)) = self.playback.take() {
            cancel.cancel();
            let _ = task.await;
        }
    }
}

#[async_trait]
impl TranscriptionSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn connect(&mut self, sink: UpstreamSink) -> Result<(), UpstreamError> {
        self.stop_playback().await;
        let origin = *self.origin.get_or_insert_with(Instant::now);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(play(
            self.remaining.clone(),
            sink,
            origin,
            cancel.clone(),
            self.finished.clone(),
        ));
        self.playback = Some((cancel, task));
        Ok(())
    }

    async fn send_audio(&mut self, _chunk: &[u8]) -> Result<(), UpstreamError> {
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stop_playback().await;
    }
}

async fn play(
    remaining: Arc<Mutex<VecDeque<ScriptLine>>>,
    sink: UpstreamSink,
    origin: Instant,
    cancel: CancellationToken,
    finished: CancellationToken,
) {
    loop {
        let next = remaining.lock().await.front().cloned();
        let Some(line) = next else {
            info!("Replay script exhausted");
            finished.cancel();
            return;
        };

        let due = origin + Duration::from_millis(line.at_ms);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(due) => {}
        }
        remaining.lock().await.pop_front();

        match line.step {
            ScriptStep::Partial { item_id, text } => sink.partial_transcript(&item_id, &text),
            ScriptStep::Final {
                text,
                speaker,
                item_id,
                latency_ms,
            } => {
                sink.final_transcript_from(speaker.as_deref(), &text, latency_ms, item_id.as_deref())
                    .await
            }
            ScriptStep::SpeechEnded => sink.speech_ended().await,
            ScriptStep::Fault { kind, message } => {
                warn!(at_ms = line.at_ms, ?kind, "Replaying upstream fault");
                sink.error(kind.into_error(message));
                if kind == FaultKind::Configuration {
                    finished.cancel();
                }
                return;
            }
        }
    }
}

/// Inject typed lines into a session on their schedule.
pub async fn run_injections(
    handle: SessionHandle,
    lines: Vec<InjectLine>,
    cancel: CancellationToken,
) {
    let origin = Instant::now();
    for line in lines {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(origin + Duration::from_millis(line.at_ms)) => {}
        }
        if handle.inject(line.speaker, line.text).await.is_err() {
            debug!("Session closed, stopping injections");
            return;
        }
    }
}
