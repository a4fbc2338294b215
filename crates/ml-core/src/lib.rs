//! Core types for the Mollei conversation pipeline.
//!
//! Everything that more than one crate needs to agree on lives here:
//! - **Conversation state**: the per-turn record threaded through the
//!   pipeline, the sparse partial results agents contribute, and the
//!   closed vocabularies (severity, signal type, response modifier, ...)
//! - **Configuration**: `~/.mollei/config.toml` with serde defaults
//! - **Conversation cache**: recent-turn history consumed by the memory
//!   agent and written by the calling route
//! - **Input sanitizer**: prompt-injection filtering for user messages

pub mod config;
pub mod conversation_cache;
pub mod sanitize;
pub mod types;
