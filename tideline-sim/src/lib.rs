//! Tideline Simulation - Deterministic transport emulation for tests.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::too_many_lines)]
//!
//! This crate stands in for an event-driven HTTP transport. Code under test
//! creates transports from a [`Session`], configures and sends them exactly as
//! it would the real thing, and observes the same events in the same order.
//! Responses come from handlers registered on the session instead of a
//! network.
//!
//! # Features
//!
//! - **Deterministic Execution**: Same seed and same calls produce the same events
//! - **Deferred Dispatch**: Nothing fires until the session scheduler is driven
//! - **Abort, Error and Timeout Branches**: Failure paths replay the real event tail
//! - **Request Log**: Every sent request is captured for assertions
//!
//! # Example
//!
//! ```rust,no_run
//! use tideline_core::TidelineConfig;
//! use tideline_sim::Session;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(TidelineConfig::default());
//! session.setup()?;
//! session.post("http://localhost/api", |_req, res| {
//!     res.status(201)
//!         .header("Content-type", "image/jpeg")
//!         .body("Hello World!")
//! });
//!
//! let transport = session.create_transport()?;
//! transport.open("POST", "http://localhost/api")?;
//! transport.send("payload")?;
//!
//! let body = transport.completion().await?;
//! assert_eq!(body, "Hello World!");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Deterministic Engine**: Seeded RNG and the cooperative turn scheduler
//! - **Transport Emulator**: Ready-state machine, listeners and progress replay
//! - **Session Controller**: Install state, routes, request log

pub mod deterministic;
pub mod session;
pub mod transport;

pub use deterministic::{DeterministicRng, Scheduler, SchedulerError};
pub use session::{Session, SessionError};
pub use transport::{
    Channel, EventKind, EventTarget, ListenerId, MockTransport, Outcome, ReadyState, StateError,
    TransportEvent, WeakTransport,
};
