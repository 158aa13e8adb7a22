//! Events dispatched by a transport and its upload channel.

use std::fmt;
use std::str::FromStr;

use super::ReadyState;

/// Event names understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Request started
    LoadStart,
    /// Body bytes delivered
    Progress,
    /// Request aborted
    Abort,
    /// Network error
    Error,
    /// Request timed out
    Timeout,
    /// Request completed successfully
    Load,
    /// Request finished, whatever the outcome
    LoadEnd,
    /// Ready state changed
    ReadyStateChange,
}

impl EventKind {
    /// All event kinds in declaration order.
    pub const ALL: [EventKind; 8] = [
        EventKind::LoadStart,
        EventKind::Progress,
        EventKind::Abort,
        EventKind::Error,
        EventKind::Timeout,
        EventKind::Load,
        EventKind::LoadEnd,
        EventKind::ReadyStateChange,
    ];

    /// Returns the wire name, e.g. `loadstart`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LoadStart => "loadstart",
            EventKind::Progress => "progress",
            EventKind::Abort => "abort",
            EventKind::Error => "error",
            EventKind::Timeout => "timeout",
            EventKind::Load => "load",
            EventKind::LoadEnd => "loadend",
            EventKind::ReadyStateChange => "readystatechange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognized event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| UnknownEvent(name.to_string()))
    }
}

/// Which event target an event was dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The transport itself
    Request,
    /// The transport's upload object
    Upload,
}

/// Snapshot handed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Event name
    pub kind: EventKind,
    /// Target the event was dispatched on
    pub channel: Channel,
    /// Ready state of the transport at dispatch time
    pub ready_state: ReadyState,
    /// Bytes delivered so far
    pub loaded: u64,
    /// Total bytes, when known
    pub total: u64,
    /// Whether `total` is meaningful
    pub length_computable: bool,
}

impl TransportEvent {
    /// Creates an event without progress counters.
    pub fn new(kind: EventKind, channel: Channel, ready_state: ReadyState) -> Self {
        Self {
            kind,
            channel,
            ready_state,
            loaded: 0,
            total: 0,
            length_computable: false,
        }
    }

    /// Attaches progress counters.
    pub fn with_progress(mut self, loaded: u64, total: u64) -> Self {
        self.loaded = loaded;
        self.total = total;
        self.length_computable = true;
        self
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Channel::Request => write!(f, "{}", self.kind),
            Channel::Upload => write!(f, "upload.{}", self.kind),
        }
    }
}
