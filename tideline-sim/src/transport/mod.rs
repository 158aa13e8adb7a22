//! Transport emulator: state machine, event targets and progress replay.

mod emulator;
mod events;
mod listeners;
mod progress;

use std::fmt;

pub use emulator::{MockTransport, WeakTransport};
pub use events::{Channel, EventKind, TransportEvent, UnknownEvent};
pub use listeners::{EventTarget, Listener, ListenerId};
pub use progress::{MAX_PROGRESS_EVENTS, progress_marks};

use tideline_core::TidelineError;

/// Lifecycle state of a transport, ordered as the real transport reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReadyState {
    /// Created, `open` not yet called
    #[default]
    Unsent,
    /// `open` called; headers and body may be configured
    Opened,
    /// Response status and headers available
    HeadersReceived,
    /// Response body being delivered
    Loading,
    /// Finished, successfully or not
    Done,
}

impl ReadyState {
    /// Returns the numeric `readyState` value.
    pub fn code(self) -> u8 {
        match self {
            ReadyState::Unsent => 0,
            ReadyState::Opened => 1,
            ReadyState::HeadersReceived => 2,
            ReadyState::Loading => 3,
            ReadyState::Done => 4,
        }
    }

    /// Checks whether `abort` has anything to cancel in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ReadyState::Opened | ReadyState::HeadersReceived | ReadyState::Loading
        )
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Unsent => "UNSENT",
            ReadyState::Opened => "OPENED",
            ReadyState::HeadersReceived => "HEADERS_RECEIVED",
            ReadyState::Loading => "LOADING",
            ReadyState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of a transport. Set once, never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Outcome {
    /// No outcome yet
    #[default]
    Pending,
    /// Response fully delivered
    Loaded,
    /// Network error: no handler, handler failure or invalid response
    Errored,
    /// Cancelled through `abort`
    Aborted,
    /// Resolution exceeded the timeout, or the handler simulated one
    TimedOut,
}

impl Outcome {
    /// Checks whether an outcome has been reached.
    pub fn is_terminal(self) -> bool {
        self != Outcome::Pending
    }

    /// Checks whether the request ended without a response.
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Errored | Outcome::Aborted | Outcome::TimedOut)
    }

    /// Returns the event announcing this outcome, if it has one.
    pub fn event_kind(self) -> Option<EventKind> {
        match self {
            Outcome::Pending => None,
            Outcome::Loaded => Some(EventKind::Load),
            Outcome::Errored => Some(EventKind::Error),
            Outcome::Aborted => Some(EventKind::Abort),
            Outcome::TimedOut => Some(EventKind::Timeout),
        }
    }
}

/// Misuse of the transport API, returned synchronously.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Operation not allowed in the current ready state
    #[error("Cannot {operation} while transport is {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State the transport was in
        state: ReadyState,
    },

    /// Operation not allowed once the request has been sent
    #[error("Cannot {operation} after send")]
    AlreadySent {
        /// Rejected operation
        operation: &'static str,
    },

    /// The owning session was torn down
    #[error("Session is not installed")]
    SessionClosed,
}

impl From<StateError> for TidelineError {
    fn from(error: StateError) -> Self {
        TidelineError::from_usage_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::Unsent < ReadyState::Opened);
        assert!(ReadyState::HeadersReceived < ReadyState::Loading);
        assert!(ReadyState::Loading < ReadyState::Done);
        assert_eq!(ReadyState::Done.code(), 4);
        assert_eq!(ReadyState::HeadersReceived.to_string(), "HEADERS_RECEIVED");
        assert!(!ReadyState::Unsent.is_active());
        assert!(!ReadyState::Done.is_active());
    }

    #[test]
    fn test_outcome_classification() {
        assert!(!Outcome::Pending.is_terminal());
        assert!(!Outcome::Loaded.is_failure());
        assert!(Outcome::TimedOut.is_failure());
        assert_eq!(Outcome::Errored.event_kind(), Some(EventKind::Error));
        assert_eq!(Outcome::Pending.event_kind(), None);
    }

    #[test]
    fn test_state_error_folds_into_usage_error() {
        let error = TidelineError::from(StateError::InvalidState {
            operation: "send",
            state: ReadyState::Unsent,
        });

        assert!(error.is_user_error());
        assert_eq!(
            error.user_message(),
            "Invalid use: Cannot send while transport is UNSENT"
        );
    }
}
