//! Model-backed analyzer and safety classifier over an OpenAI-compatible
//! `/chat/completions` endpoint in JSON response mode.
//!
//! HTTP failures are mapped onto [`AnalyzerError`] so the engine's retry
//! policy can classify them:
//!
//! | Response            | Error           | Retried |
//! |---------------------|-----------------|---------|
//! | 429                 | `RateLimit`     | yes     |
//! | 5xx, connect errors | `Backend`       | yes     |
//! | malformed content   | `Parse`         | yes     |
//! | 4xx (other)         | `Configuration` | no      |
//! | client timeout      | `Timeout`       | no      |

use std::sync::Arc;

use async_trait::async_trait;
use moderation::analyzer::{Analyzer, AnalyzerKind};
use moderation::safety::{SafetyClassifier, SafetyVerdict};
use moderation::{AnalysisOutcome, AnalyzerError, InterventionType, SessionView, TranscriptEntry};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmConfig;

const DETAIL_LIMIT: usize = 200;
const TOPIC_CONTEXT_LINES: usize = 5;
const DRIFT_THRESHOLD: f32 = 0.7;

const TOPIC_SYSTEM: &str = "You assist a meeting facilitator. Judge whether the recent \
conversation still serves the meeting agenda. Answer only with a JSON object.";

const SAFETY_SYSTEM: &str = "You review messages a meeting facilitator is about to say out loud. \
Flag anything insulting, demeaning, threatening or otherwise unsafe. If a message is unsafe, \
offer a neutral rewrite when possible. Answer only with a JSON object.";

// ── Client ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: Arc<LlmConfig>,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one system + user exchange and parse the reply content as JSON.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<Value, AnalyzerError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.2,
            "max_tokens": 300,
        });

        let mut request = self.http.post(self.config.completions_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, &detail));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Parse(format!("response is not JSON: {e}")))?;
        extract_json_content(&payload)
    }

    fn request_error(&self, err: reqwest::Error) -> AnalyzerError {
        if err.is_timeout() {
            AnalyzerError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            AnalyzerError::Backend(err.to_string())
        }
    }
}

/// Map a non-success HTTP status onto the engine's error taxonomy.
pub fn status_error(status: StatusCode, detail: &str) -> AnalyzerError {
    let detail: String = detail.chars().take(DETAIL_LIMIT).collect();
    let message = format!("{status}: {}", detail.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        AnalyzerError::RateLimit(message)
    } else if status.is_server_error() {
        AnalyzerError::Backend(message)
    } else {
        AnalyzerError::Configuration(message)
    }
}

/// Pull `choices[0].message.content` out of a completion and parse it.
pub fn extract_json_content(payload: &Value) -> Result<Value, AnalyzerError> {
    let content = payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| AnalyzerError::Parse("completion has no message content".into()))?;
    let content = strip_code_fence(content);
    serde_json::from_str(content)
        .map_err(|e| AnalyzerError::Parse(format!("message content is not JSON: {e}")))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .trim_start_matches("json")
            .trim_end_matches("```")
            .trim(),
        None => trimmed,
    }
}

// ── Topic analyzer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    OnTopic,
    Drifting,
    OffTopic,
}

#[derive(Debug, Deserialize)]
pub struct TopicJudgement {
    pub status: TopicStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: f32,
}

pub struct LlmTopicAnalyzer {
    client: ChatClient,
}

impl LlmTopicAnalyzer {
    pub const NAME: &'static str = "topic_llm";

    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Analyzer for LlmTopicAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Topic
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn analyze(
        &self,
        session: &SessionView,
        recent: &[TranscriptEntry],
    ) -> Result<AnalysisOutcome, AnalyzerError> {
        let prompt = topic_prompt(&session.agenda, recent);
        let value = self.client.complete_json(TOPIC_SYSTEM, &prompt).await?;
        let judgement: TopicJudgement = serde_json::from_value(value)
            .map_err(|e| AnalyzerError::Parse(format!("topic judgement: {e}")))?;
        debug!(
            model = self.client.model(),
            status = ?judgement.status,
            confidence = judgement.confidence,
            "Topic judgement"
        );
        Ok(topic_outcome(&judgement, &session.agenda, recent.last()))
    }
}

pub fn topic_prompt(agenda: &str, recent: &[TranscriptEntry]) -> String {
    let agenda = if agenda.trim().is_empty() {
        "general discussion"
    } else {
        agenda
    };
    let start = recent.len().saturating_sub(TOPIC_CONTEXT_LINES);
    let lines: Vec<String> = recent[start..]
        .iter()
        .map(|e| format!("{}: {}", e.speaker, e.text))
        .collect();
    format!(
        "Meeting agenda: {agenda}\n\nRecent conversation:\n{}\n\n\
         Respond with JSON: {{\"status\": \"on_topic\" | \"drifting\" | \"off_topic\", \
         \"reason\": string, \"confidence\": number between 0 and 1}}",
        lines.join("\n")
    )
}

/// Turn a judgement into an outcome. Drift only counts when confident.
pub fn topic_outcome(
    judgement: &TopicJudgement,
    agenda: &str,
    latest: Option<&TranscriptEntry>,
) -> AnalysisOutcome {
    let target = if agenda.trim().is_empty() {
        "the agenda"
    } else {
        agenda
    };
    let flagged = match judgement.status {
        TopicStatus::OffTopic => true,
        TopicStatus::Drifting => judgement.confidence >= DRIFT_THRESHOLD,
        TopicStatus::OnTopic => false,
    };
    if !flagged {
        return AnalysisOutcome::clear(LlmTopicAnalyzer::NAME, InterventionType::TopicDrift);
    }

    let message = match judgement.status {
        TopicStatus::OffTopic => format!("Let's park that for later and come back to {target}."),
        _ => format!("We may be drifting. How does this connect to {target}?"),
    };
    let mut outcome = AnalysisOutcome::flag(
        LlmTopicAnalyzer::NAME,
        InterventionType::TopicDrift,
        message,
        judgement.confidence,
    );
    if let Some(latest) = latest {
        let head: String = latest.text.chars().take(30).collect();
        outcome = outcome.with_parking_lot_item(format!("'{head}...' to discuss later"));
    }
    outcome
}

// ── Safety classifier ────────────────────────────────────────────────────

pub struct LlmSafetyClassifier {
    client: ChatClient,
}

impl LlmSafetyClassifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SafetyClassifier for LlmSafetyClassifier {
    fn name(&self) -> &str {
        "safety_llm"
    }

    async fn check(&self, message: &str) -> Result<SafetyVerdict, AnalyzerError> {
        let prompt = format!(
            "Facilitator message:\n{message}\n\n\
             Respond with JSON: {{\"is_safe\": boolean, \"safe_message\": string or null, \
             \"reasons\": [string]}}"
        );
        let value = self.client.complete_json(SAFETY_SYSTEM, &prompt).await?;
        serde_json::from_value(value)
            .map_err(|e| AnalyzerError::Parse(format!("safety verdict: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(content: &str) -> Value {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            AnalyzerError::RateLimit(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            AnalyzerError::Backend(_)
        ));
        let err = status_error(StatusCode::UNAUTHORIZED, "bad key");
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_extract_content_handles_fences() {
        let value = extract_json_content(&completion("```json\n{\"is_safe\": true}\n```")).unwrap();
        assert_eq!(value["is_safe"], true);
        assert!(matches!(
            extract_json_content(&completion("not json")),
            Err(AnalyzerError::Parse(_))
        ));
        assert!(matches!(
            extract_json_content(&json!({ "choices": [] })),
            Err(AnalyzerError::Parse(_))
        ));
    }

    #[test]
    fn test_topic_outcome_thresholds() {
        let latest = TranscriptEntry::new("Ben", "Anyone watching the match tonight?");
        let off = TopicJudgement {
            status: TopicStatus::OffTopic,
            reason: "sports".into(),
            confidence: 0.9,
        };
        let outcome = topic_outcome(&off, "Q3 budget", Some(&latest));
        assert!(outcome.needs_intervention);
        assert_eq!(
            outcome.message,
            "Let's park that for later and come back to Q3 budget."
        );
        assert!(outcome.parking_lot_item.unwrap().starts_with("'Anyone watching"));

        let weak_drift = TopicJudgement {
            status: TopicStatus::Drifting,
            reason: String::new(),
            confidence: 0.4,
        };
        assert!(!topic_outcome(&weak_drift, "Q3 budget", Some(&latest)).needs_intervention);
    }

    #[test]
    fn test_topic_prompt_keeps_last_lines() {
        let recent: Vec<TranscriptEntry> = (0..8)
            .map(|i| TranscriptEntry::new("Ana", format!("line {i}")))
            .collect();
        let prompt = topic_prompt("", &recent);
        assert!(prompt.contains("general discussion"));
        assert!(!prompt.contains("line 2"));
        assert!(prompt.contains("line 7"));
    }

    #[test]
    fn test_safety_verdict_parses_from_model_json() {
        let value = json!({ "is_safe": false, "safe_message": "Let's stay on the idea.", "reasons": ["insult"] });
        let verdict: SafetyVerdict = serde_json::from_value(value).unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(verdict.safe_message.as_deref(), Some("Let's stay on the idea."));
    }
}
