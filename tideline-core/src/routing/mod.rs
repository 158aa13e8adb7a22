//! Route registration, matching and handler resolution

mod handler;
mod matcher;
mod resolver;
mod table;

pub use handler::{Handler, HandlerReply};
pub use matcher::{MethodMatcher, UrlMatcher};
pub use resolver::resolve;
pub use table::{Route, RouteTable};

/// Simulated network failures of a single request.
///
/// None of these are returned synchronously by the transport: they are
/// reported through the `error`/`timeout`/`abort` events and as the result
/// of awaiting the request's completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("No handler registered for {method} {url}")]
    NoHandler { method: String, url: String },

    #[error("Handler failed: {reason}")]
    Handler { reason: String },

    #[error("Handler returned invalid status code {status}")]
    InvalidResponse { status: u16 },

    #[error("Request aborted")]
    Aborted,

    #[error("Request timed out")]
    TimedOut,

    #[error("Scheduler went idle before the request completed")]
    Stalled,
}

impl TransportError {
    /// Checks if the failure surfaces as the transport's `error` event.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            TransportError::NoHandler { .. }
                | TransportError::Handler { .. }
                | TransportError::InvalidResponse { .. }
        )
    }
}
