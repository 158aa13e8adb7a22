//! Integration tests for Tideline
//!
//! These tests drive the simulator the way application code drives a real
//! transport: through a fetch-style wrapper that listens for lifecycle events
//! and settles a result on `loadend`.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/failure_paths.rs"]
mod failure_paths;
#[path = "integration/round_trip.rs"]
mod round_trip;
#[path = "integration/routing.rs"]
mod routing;
#[path = "integration/scheduling.rs"]
mod scheduling;
#[path = "integration/session_lifecycle.rs"]
mod session_lifecycle;
