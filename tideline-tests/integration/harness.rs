//! Fetch-style wrapper over the simulated transport.
//!
//! Mirrors how application code typically consumes the transport: listeners
//! for every lifecycle event, a result captured on `load` or on one of the
//! failure events, settled on `loadend`, then all listeners removed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tideline_core::RequestBody;
use tideline_sim::{EventKind, ListenerId, MockTransport, Session, TransportEvent};

pub const URL_API: &str = "http://localhost/api";

/// What the wrapper reports to its observer, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Start,
    Progress { loaded: u64, total: u64 },
    Fulfilled(String),
    Rejected(FetchError),
    End,
}

/// Why the wrapper rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("ABORTED")]
    Aborted,
    #[error("ERROR")]
    Network,
    #[error("TIMEOUT")]
    Timeout,
}

/// Request options accepted by [`fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub include_credentials: bool,
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn include_credentials(mut self) -> Self {
        self.include_credentials = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Default)]
struct FetchState {
    observations: Vec<Observation>,
    response: Option<String>,
    error: Option<FetchError>,
    settled: Option<Result<String, FetchError>>,
    listeners: Vec<(bool, ListenerId)>,
}

type Reaction = fn(&MockTransport, &TransportEvent, &mut FetchState);

/// A sent request whose result settles once the session is driven.
pub struct PendingFetch {
    transport: MockTransport,
    state: Arc<Mutex<FetchState>>,
}

impl PendingFetch {
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.state.lock().observations.clone()
    }

    pub fn settled(&self) -> Option<Result<String, FetchError>> {
        self.state.lock().settled.clone()
    }

    /// Drives the session until idle and returns the settled result.
    pub async fn finish(&self, session: &Session) -> anyhow::Result<Result<String, FetchError>> {
        session.run_until_idle().await?;
        self.settled()
            .ok_or_else(|| anyhow::anyhow!("request never settled"))
    }
}

/// Opens, configures and sends a request the way a fetch wrapper would.
pub fn fetch(session: &Session, url: &str, options: FetchOptions) -> anyhow::Result<PendingFetch> {
    let transport = session.create_transport()?;
    let state = Arc::new(Mutex::new(FetchState::default()));

    let observe = |kind: EventKind, upload: bool, react: Reaction| {
        let handle = transport.downgrade();
        let shared = state.clone();
        let target = if upload {
            transport.upload()
        } else {
            transport.events()
        };
        let id = target.add_event_listener(kind, move |event| {
            if let Some(transport) = handle.upgrade() {
                react(&transport, event, &mut shared.lock());
            }
        });
        state.lock().listeners.push((upload, id));
    };

    observe(EventKind::Progress, true, |_, event, state| {
        state.observations.push(Observation::Progress {
            loaded: event.loaded,
            total: event.total,
        });
    });
    observe(EventKind::LoadStart, false, |_, _, state| {
        state.observations.push(Observation::Start);
    });
    observe(EventKind::Abort, false, |_, _, state| reject(state, FetchError::Aborted));
    observe(EventKind::Error, false, |_, _, state| reject(state, FetchError::Network));
    observe(EventKind::Timeout, false, |_, _, state| reject(state, FetchError::Timeout));
    observe(EventKind::Load, false, |transport, _, state| {
        let text = transport.response_text();
        state.observations.push(Observation::Fulfilled(text.clone()));
        state.response = Some(text);
    });
    observe(EventKind::LoadEnd, false, |transport, _, state| {
        state.observations.push(Observation::End);
        state.settled = Some(match state.error.clone() {
            Some(error) => Err(error),
            None => Ok(state.response.clone().unwrap_or_default()),
        });
        for (upload, id) in state.listeners.drain(..) {
            let target = if upload {
                transport.upload()
            } else {
                transport.events()
            };
            target.remove_event_listener(id);
        }
    });

    transport.open(options.method.as_deref().unwrap_or("GET"), url)?;
    for (name, value) in &options.headers {
        transport.set_request_header(name, value)?;
    }
    transport.set_with_credentials(options.include_credentials)?;
    if options.timeout.is_some() {
        transport.set_timeout(options.timeout);
    }
    transport.send(options.body)?;

    Ok(PendingFetch { transport, state })
}

fn reject(state: &mut FetchState, error: FetchError) {
    state.observations.push(Observation::Rejected(error.clone()));
    state.error = Some(error);
}

/// Creates an installed session with the deterministic test preset.
pub fn installed_session() -> Session {
    tideline_core::tracing_setup::init_test_tracing();
    let session = Session::new(tideline_core::TidelineConfig::deterministic_testing());
    session
        .setup()
        .expect("fresh session should install");
    session
}

/// Returns the observations with progress collapsed out.
pub fn phases(observations: &[Observation]) -> Vec<Observation> {
    observations
        .iter()
        .filter(|observation| !matches!(observation, Observation::Progress { .. }))
        .cloned()
        .collect()
}
