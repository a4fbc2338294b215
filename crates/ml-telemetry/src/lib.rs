//! Logging setup and id generation for Mollei services.
//!
//! - **Logging**: human-readable and JSON output via `tracing-subscriber`
//! - **Tracing**: per-turn trace ids, span ids, and the `tracing` span a turn
//!   runs under so log lines correlate with pipeline spans

pub mod logging;
pub mod tracing_setup;
