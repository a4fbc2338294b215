//! The five concrete stages.
//!
//! Parallel group: [`MoodSensor`], [`MemoryAgent`], [`SafetyMonitor`].
//! Sequential group, in order: [`EmotionReasoner`], [`ResponseGenerator`].

pub mod emotion_reasoner;
pub mod memory_agent;
pub mod mood_sensor;
pub mod response_generator;
pub mod safety_monitor;

pub use emotion_reasoner::EmotionReasoner;
pub use memory_agent::MemoryAgent;
pub use mood_sensor::MoodSensor;
pub use response_generator::{ResponseGenerator, FALLBACK_RESPONSE};
pub use safety_monitor::SafetyMonitor;
