//! Ordered listener registry shared by the request and upload channels.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::events::{EventKind, TransportEvent};

/// Callback invoked for each dispatched event.
pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned on registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// Event target holding listeners in registration order.
///
/// Dispatch iterates over a snapshot taken when the event starts. A listener
/// removed by an earlier listener of the same dispatch is skipped; one added
/// during dispatch only sees later events. No lock is held while listeners
/// run, so they may call back into the transport.
#[derive(Default)]
pub struct EventTarget {
    registrations: Mutex<Vec<Registration>>,
}

impl EventTarget {
    /// Creates target without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events of `kind`.
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.registrations.lock().push(Registration {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Removes a listener. Returns `false` if it was not registered here.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        registrations.len() != before
    }

    /// Returns number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registrations
            .lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    /// Invokes every listener registered for the event's kind.
    ///
    /// A panicking listener is logged and does not stop the others.
    /// Returns number of listeners invoked.
    pub(crate) fn dispatch(&self, event: &TransportEvent) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = self
            .registrations
            .lock()
            .iter()
            .filter(|registration| registration.kind == event.kind)
            .map(|registration| (registration.id, registration.listener.clone()))
            .collect();

        let mut invoked = 0;
        for (id, listener) in snapshot {
            if !self.is_registered(id) {
                continue;
            }
            invoked += 1;
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(event = %event, "Listener panicked during dispatch");
            }
        }
        invoked
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.registrations
            .lock()
            .iter()
            .any(|registration| registration.id == id)
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.registrations.lock().len())
            .finish()
    }
}
