//! The Mollei reasoning pipeline.
//!
//! Three analysis agents (mood, memory, safety) run concurrently against the
//! incoming state; their partial results are merged and handed to the
//! emotion reasoner and then the response generator. Every agent runs
//! behind [`agent::GuardedAgent`], which owns timeouts, circuit breaking,
//! fallbacks and latency accounting.

pub mod agent;
pub mod agents;
pub mod context;
pub mod crisis_resources;
pub mod pipeline;
pub mod prompts;
pub mod safety_heuristics;
pub mod state_machine;
