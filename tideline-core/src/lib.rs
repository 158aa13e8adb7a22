//! Tideline Core - Descriptors, routing and handler resolution
//!
//! This crate provides the transport-independent building blocks of the
//! simulator: immutable request/response descriptors, the ordered route
//! table, the handler contract and the resolver that turns a handler's
//! reply into a single asynchronous outcome.

pub mod config;
pub mod http;
pub mod routing;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::TidelineConfig;
pub use http::{
    CredentialsMode, HeaderMap, RequestBody, RequestDescriptor, ResponseBuilder,
    ResponseDescriptor,
};
pub use routing::{
    Handler, HandlerReply, MethodMatcher, Route, RouteTable, TransportError, UrlMatcher,
};

/// Errors that can bubble up from any Tideline subsystem.
///
/// Simulated network failures travel as [`TransportError`]; programmer misuse
/// of the emulator or session is reported by the simulator crate and folded
/// in here through the `Usage` variant.
#[derive(Debug, thiserror::Error)]
pub enum TidelineError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Usage error: {reason}")]
    Usage { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TidelineError {
    /// Returns a short message suitable for test failure output.
    pub fn user_message(&self) -> String {
        match self {
            TidelineError::Transport(e) => match e {
                TransportError::NoHandler { method, url } => {
                    format!("No route registered for {method} {url}")
                }
                TransportError::Handler { reason } => format!("Handler failed: {reason}"),
                TransportError::InvalidResponse { status } => {
                    format!("Handler returned invalid status {status}")
                }
                _ => "Simulated request did not complete".to_string(),
            },
            TidelineError::Usage { reason } => format!("Invalid use: {reason}"),
            TidelineError::Json(_) => "Body is not valid JSON".to_string(),
        }
    }

    /// Checks if this error comes from calling code rather than a simulated failure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, TidelineError::Usage { .. })
    }

    /// Wraps any displayable misuse error.
    pub fn from_usage_error(error: impl std::fmt::Display) -> Self {
        TidelineError::Usage {
            reason: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TidelineError>;
