use std::time::Duration;

use thiserror::Error;

pub const URL_VAR: &str = "MODERATOR_LLM_URL";
pub const MODEL_VAR: &str = "MODERATOR_LLM_MODEL";
pub const API_KEY_VAR: &str = "MODERATOR_LLM_API_KEY";
pub const TIMEOUT_VAR: &str = "MODERATOR_LLM_TIMEOUT_SECS";

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LlmConfigError {
    #[error("{var} is set but empty")]
    Empty { var: &'static str },

    #[error("invalid {var}={value}: expected a whole number of seconds")]
    Timeout { var: &'static str, value: String },
}

/// OpenAI-compatible chat endpoint used by the model-backed analyzers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// Base URL up to and including the API version, e.g. `http://localhost:8080/v1`.
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Read from the process environment. `None` when no endpoint is set.
    pub fn from_env() -> Result<Option<Self>, LlmConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, LlmConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(url) = lookup(URL_VAR) else {
            return Ok(None);
        };
        let url = url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(LlmConfigError::Empty { var: URL_VAR });
        }

        let model = lookup(MODEL_VAR)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.into());
        let api_key = lookup(API_KEY_VAR).filter(|k| !k.trim().is_empty());
        let timeout = match lookup(TIMEOUT_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| LlmConfigError::Timeout {
                    var: TIMEOUT_VAR,
                    value: raw,
                })?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Some(Self {
            url,
            model,
            api_key,
            timeout,
        }))
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url)
    }
}
