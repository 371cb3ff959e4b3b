//! Autonomous dialogue loop.
//!
//! When started, a [`DialogueGenerator`] is asked for the next line every
//! `dialogue_interval`. Generated lines go back to the session as injected
//! transcript, so they are moderated exactly like spoken ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::events::ControlMessage;
use crate::error::AnalyzerError;
use crate::types::SessionView;

/// One generated line of dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
}

/// Produces the next conversational turn.
#[async_trait]
pub trait DialogueGenerator: Send + Sync {
    /// `Ok(None)` ends the dialogue.
    async fn next_line(&self, session: &SessionView) -> Result<Option<DialogueLine>, AnalyzerError>;
}

/// Run the dialogue loop until cancelled, the generator ends, or the session
/// stops accepting control messages.
pub async fn run_dialogue(
    generator: Arc<dyn DialogueGenerator>,
    view: watch::Receiver<SessionView>,
    control: mpsc::Sender<ControlMessage>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut consecutive_errors = 0u32;
    loop {
        let snapshot = view.borrow().clone();
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            line = generator.next_line(&snapshot) => line,
        };

        match line {
            Ok(Some(line)) => {
                consecutive_errors = 0;
                debug!(speaker = %line.speaker, "Dialogue line generated");
                let msg = ControlMessage::InjectTranscript {
                    speaker: line.speaker,
                    text: line.text,
                };
                if control.send(msg).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("Dialogue generator finished");
                let _ = control.send(ControlMessage::StopDialogue).await;
                return;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(error = %e, consecutive_errors, "Dialogue generation failed");
                if consecutive_errors >= 3 {
                    let _ = control.send(ControlMessage::StopDialogue).await;
                    return;
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
