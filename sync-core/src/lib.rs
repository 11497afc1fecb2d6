//! # sync-core
//!
//! Pure logic for livesync (no I/O, instant tests).
//!
//! This crate implements the state machines and decision rules of the live
//! query engine without any runtime, timers, or network access, enabling fast
//! unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual scheduling, fetching, and fan-out are performed by
//! `sync-client`, which interprets the results of these modules.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coalesce;
pub mod gate;
pub mod phase;
pub mod prepass;
pub mod refetch;

pub use coalesce::{CoalescingQueue, Enqueued};
pub use gate::{GateEvent, GateState};
pub use phase::{Phase, PhaseEvent};
pub use prepass::{PrepassRecorder, PrepassTable};
pub use refetch::{
    decide, plan_prepass, DecideInput, PrepassInput, PrepassPlan, RefetchDecision, RefetchRequest,
};
