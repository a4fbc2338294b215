//! Harness: reliability and observability plumbing shared by every
//! pipeline stage.
//!
//! - **Circuit breaker**: per-agent failure gate and the registry that owns
//!   one gate per agent id across requests
//! - **Abort signal**: cooperative cancellation tied to the caller's stream
//! - **Stream channel**: the outbound progress/delta/result/error contract
//!   plus a channel-backed implementation
//! - **Trace**: span abstraction, trace-event vocabulary and the event bus
//!   cost accounting subscribes to

pub mod abort;
pub mod circuit_breaker;
pub mod stream;
pub mod trace;
