//! The model-call capability used by the pipeline agents.
//!
//! - **LLM providers**: a provider-agnostic async trait with whole and
//!   streamed completions, the Anthropic Messages implementation and a
//!   scripted mock for tests
//! - **Structured output**: JSON extraction and schema decoding of a completion
//! - **Models**: tier-to-model mapping
//! - **Cost tracking**: pricing and per-trace cost aggregation fed by trace
//!   events

pub mod cost_tracker;
pub mod llm;
pub mod models;
pub mod structured;
