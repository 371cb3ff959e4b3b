//! Command-line driver for the moderation engine.
//!
//! - `config`: model endpoint settings read from `MODERATOR_LLM_*`
//! - `llm`: model-backed topic analyzer and safety classifier
//! - `replay`: JSON Lines transcription scripts played as an upstream source
//! - `dialogue`: scripted autonomous dialogue

pub mod config;
pub mod dialogue;
pub mod llm;
pub mod replay;
