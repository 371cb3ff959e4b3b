//! Moderation engine configuration.
//!
//! Every field has a default so an empty TOML file (or no file at all) yields
//! a working engine. Load order: file, then `MODERATOR_*` environment
//! overrides, then [`ModerationConfig::validate`].
//!
//! ```toml
//! [suppressor]
//! min_interval_secs = 15
//!
//! [suppressor.cooldowns]
//! topic_drift = 60
//! principle_violation = 45
//!
//! [session]
//! cycle_spacing_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::InterventionType;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var} has invalid value {value:?}")]
    Env { var: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub planner: PlannerConfig,
    pub suppressor: SuppressorConfig,
    pub safety: SafetyConfig,
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub session: SessionConfig,
    pub reconnect: ReconnectConfig,
}

/// Planner triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub topic_interval: u32,
    pub participation_interval: u32,
    pub off_topic_keywords: Vec<String>,
    pub decision_keywords: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            topic_interval: 3,
            participation_interval: 5,
            off_topic_keywords: [
                "by the way",
                "off topic",
                "unrelated",
                "weekend",
                "lunch",
                "weather",
                "game last night",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            decision_keywords: [
                "we must",
                "just decide",
                "no time",
                "obviously",
                "everyone agrees",
                "final answer",
                "shut up",
                "stupid",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Per-type cooldowns in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub topic_drift: u64,
    pub principle_violation: u64,
    pub participation_imbalance: u64,
    pub decision_style: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            topic_drift: 60,
            principle_violation: 45,
            participation_imbalance: 90,
            decision_style: 60,
        }
    }
}

impl CooldownConfig {
    pub fn for_type(&self, kind: InterventionType) -> Duration {
        let secs = match kind {
            InterventionType::TopicDrift => self.topic_drift,
            InterventionType::PrincipleViolation => self.principle_violation,
            InterventionType::ParticipationImbalance => self.participation_imbalance,
            InterventionType::DecisionStyle => self.decision_style,
        };
        Duration::from_secs(secs)
    }

    /// Longest configured cooldown; records older than this are pruned.
    pub fn max(&self) -> Duration {
        InterventionType::all()
            .iter()
            .map(|t| self.for_type(*t))
            .max()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressorConfig {
    pub min_interval_secs: u64,
    pub max_recent: usize,
    pub cooldowns: CooldownConfig,
}

impl Default for SuppressorConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 15,
            max_recent: 10,
            cooldowns: CooldownConfig::default(),
        }
    }
}

impl SuppressorConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Maximum message length in characters, including the ellipsis.
    pub max_length: usize,
    /// Minimum message length accepted by adversarial review.
    pub min_length: usize,
    pub fallback_message: String,
    pub denylist: Vec<String>,
    pub denylist_notice: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_length: 220,
            min_length: 6,
            fallback_message: "Let's keep the conversation constructive and respectful.".into(),
            denylist: ["kill", "suicide", "self-harm", "terrorist", "bomb", "slur"]
                .into_iter()
                .map(String::from)
                .collect(),
            denylist_notice: "Let's pause and keep this discussion safe and respectful for everyone."
                .into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub timeout_ms: u64,
    /// Number of most recent transcript entries handed to analyzers.
    pub recent_window: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            recent_window: 20,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub confidence: f32,
    pub message: String,
    pub failure_window_secs: u64,
    pub failure_threshold: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            confidence: 0.2,
            message: "Quick check-in: is everyone aligned on where we are in the agenda?".into(),
            failure_window_secs: 60,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cycle_spacing_ms: u64,
    pub partial_throttle_ms: u64,
    pub max_blackboard_events: usize,
    pub final_capacity: usize,
    pub partial_capacity: usize,
    pub control_capacity: usize,
    pub outbound_capacity: usize,
    pub audio_capacity: usize,
    /// Delay between autonomous dialogue turns.
    pub dialogue_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cycle_spacing_ms: 1_000,
            partial_throttle_ms: 150,
            max_blackboard_events: 200,
            final_capacity: 256,
            partial_capacity: 64,
            control_capacity: 64,
            outbound_capacity: 256,
            audio_capacity: 64,
            dialogue_interval_ms: 4_000,
        }
    }
}

impl SessionConfig {
    pub fn cycle_spacing(&self) -> Duration {
        Duration::from_millis(self.cycle_spacing_ms)
    }

    pub fn partial_throttle(&self) -> Duration {
        Duration::from_millis(self.partial_throttle_ms)
    }

    pub fn dialogue_interval(&self) -> Duration {
        Duration::from_millis(self.dialogue_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Audio chunks held while the upstream is down; oldest dropped first.
    pub audio_buffer_chunks: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            audio_buffer_chunks: 256,
        }
    }
}

impl ModerationConfig {
    /// Parse from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MODERATOR_*` overrides. `lookup` abstracts the environment so
    /// tests need not mutate process state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, "MODERATOR_MIN_INTERVAL_SECS")? {
            self.suppressor.min_interval_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "MODERATOR_CYCLE_SPACING_MS")? {
            self.session.cycle_spacing_ms = v;
        }
        if let Some(v) = parse_env::<usize, _>(&lookup, "MODERATOR_MAX_MESSAGE_LEN")? {
            self.safety.max_length = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.planner.topic_interval == 0 || self.planner.participation_interval == 0 {
            return Err(ConfigError::Invalid(
                "planner intervals must be at least 1".into(),
            ));
        }
        if self.suppressor.max_recent == 0 {
            return Err(ConfigError::Invalid(
                "suppressor.max_recent must be at least 1".into(),
            ));
        }
        // Room for at least one character plus the ellipsis.
        if self.safety.max_length < 2 {
            return Err(ConfigError::Invalid(
                "safety.max_length must be at least 2".into(),
            ));
        }
        if self.safety.min_length > self.safety.max_length {
            return Err(ConfigError::Invalid(format!(
                "safety.min_length ({}) exceeds safety.max_length ({})",
                self.safety.min_length, self.safety.max_length
            )));
        }
        if self.safety.fallback_message.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "safety.fallback_message must not be empty".into(),
            ));
        }
        if self.executor.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "executor.timeout_ms must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recovery.confidence) {
            return Err(ConfigError::Invalid(
                "recovery.confidence must be within 0.0..=1.0".into(),
            ));
        }
        let capacities = [
            self.session.final_capacity,
            self.session.partial_capacity,
            self.session.control_capacity,
            self.session.outbound_capacity,
            self.session.audio_capacity,
        ];
        if capacities.contains(&0) {
            return Err(ConfigError::Invalid(
                "session channel capacities must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = ModerationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.suppressor.min_interval(), Duration::from_secs(15));
        assert_eq!(config.safety.max_length, 220);
        assert_eq!(config.session.cycle_spacing(), Duration::from_secs(1));
        assert_eq!(config.session.partial_throttle(), Duration::from_millis(150));
    }

    #[test]
    fn test_cooldown_lookup_and_max() {
        let cooldowns = CooldownConfig::default();
        assert_eq!(
            cooldowns.for_type(InterventionType::PrincipleViolation),
            Duration::from_secs(45)
        );
        assert_eq!(cooldowns.max(), Duration::from_secs(90));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ModerationConfig::from_toml_str(
            r#"
            [suppressor.cooldowns]
            topic_drift = 30

            [safety]
            max_length = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.suppressor.cooldowns.topic_drift, 30);
        assert_eq!(config.suppressor.cooldowns.principle_violation, 45);
        assert_eq!(config.safety.max_length, 120);
        assert_eq!(config.safety.min_length, 6);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[executor]\ntimeout_ms = 2500").unwrap();
        let config = ModerationConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.executor.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ModerationConfig::load(Some(Path::new("/nonexistent/moderator.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MODERATOR_MIN_INTERVAL_SECS", "5"),
            ("MODERATOR_CYCLE_SPACING_MS", "250"),
            ("MODERATOR_MAX_MESSAGE_LEN", "80"),
        ]
        .into_iter()
        .collect();
        let mut config = ModerationConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.suppressor.min_interval_secs, 5);
        assert_eq!(config.session.cycle_spacing_ms, 250);
        assert_eq!(config.safety.max_length, 80);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ModerationConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "MODERATOR_MIN_INTERVAL_SECS").then(|| "soon".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_validate_rejects_inverted_lengths() {
        let mut config = ModerationConfig::default();
        config.safety.min_length = 300;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("min_length")
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = ModerationConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
