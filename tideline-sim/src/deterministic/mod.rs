//! Deterministic execution primitives for the transport simulator.
//!
//! A seeded RNG and a cooperative turn scheduler. Given the same seed and the
//! same sequence of calls, every run dispatches the same events in the same
//! order with the same progress counters.

mod rng;
mod scheduler;

pub use rng::DeterministicRng;
pub use scheduler::{Scheduler, SchedulerError, TurnFn};
