//! Scripted dialogue generator: plays a fixed cast of lines in order.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use moderation::{AnalyzerError, DialogueGenerator, DialogueLine, SessionView};
use serde::Deserialize;

use crate::replay::{read_jsonl, ReplayError};

#[derive(Debug, Clone, Deserialize)]
struct CastLine {
    speaker: String,
    text: String,
}

pub struct ScriptedDialogue {
    lines: Vec<DialogueLine>,
    cursor: AtomicUsize,
    repeat: bool,
}

impl ScriptedDialogue {
    pub fn new(lines: Vec<DialogueLine>, repeat: bool) -> Self {
        Self {
            lines,
            cursor: AtomicUsize::new(0),
            repeat,
        }
    }

    /// Load `{"speaker": ..., "text": ...}` lines.
    pub fn load(path: &Path, repeat: bool) -> Result<Self, ReplayError> {
        let lines = read_jsonl::<CastLine>(path)?
            .into_iter()
            .map(|l| DialogueLine {
                speaker: l.speaker,
                text: l.text,
            })
            .collect();
        Ok(Self::new(lines, repeat))
    }
}

#[async_trait]
impl DialogueGenerator for ScriptedDialogue {
    async fn next_line(&self, _session: &SessionView) -> Result<Option<DialogueLine>, AnalyzerError> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        if idx >= self.lines.len() && !self.repeat {
            return Ok(None);
        }
        Ok(Some(self.lines[idx % self.lines.len()].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> SessionView {
        SessionView::new("s", "", Vec::new(), Vec::new())
    }

    fn cast() -> Vec<DialogueLine> {
        vec![
            DialogueLine {
                speaker: "Skeptic".into(),
                text: "Show me the data.".into(),
            },
            DialogueLine {
                speaker: "Optimist".into(),
                text: "It looks promising.".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_ends_after_last_line() {
        let dialogue = ScriptedDialogue::new(cast(), false);
        let view = view();
        assert_eq!(dialogue.next_line(&view).await.unwrap().unwrap().speaker, "Skeptic");
        assert_eq!(dialogue.next_line(&view).await.unwrap().unwrap().speaker, "Optimist");
        assert_eq!(dialogue.next_line(&view).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_repeat_wraps_around() {
        let dialogue = ScriptedDialogue::new(cast(), true);
        let view = view();
        for _ in 0..2 {
            dialogue.next_line(&view).await.unwrap();
        }
        assert_eq!(dialogue.next_line(&view).await.unwrap().unwrap().speaker, "Skeptic");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cast.jsonl");
        std::fs::write(&path, "{\"speaker\": \"Ana\", \"text\": \"Hello.\"}\n").unwrap();
        let dialogue = ScriptedDialogue::load(&path, false).unwrap();
        let line = dialogue.next_line(&view()).await.unwrap().unwrap();
        assert_eq!(line.text, "Hello.");
    }
}
