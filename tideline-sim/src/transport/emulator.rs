//! In-process stand-in for an event-driven HTTP transport.
//!
//! Calls made by code under test only change state; every event after the
//! synchronous `readystatechange(OPENED)` is dispatched from a scheduler turn.
//! Each transport carries a generation counter that `abort` bumps, so turns
//! and resolutions belonging to a cancelled attempt fall through silently.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tideline_core::http::normalize_method;
use tideline_core::routing::resolve;
use tideline_core::{
    CredentialsMode, HeaderMap, RequestBody, RequestDescriptor, ResponseDescriptor,
    TransportError,
};

use super::events::{Channel, EventKind, TransportEvent};
use super::listeners::{EventTarget, ListenerId};
use super::{Outcome, ReadyState, StateError};
use crate::deterministic::TurnFn;
use crate::session::SessionContext;

/// One scheduled delivery step after headers were received.
#[derive(Debug, Clone, Copy)]
enum Step {
    UploadProgress { loaded: u64, total: u64 },
    UploadComplete { total: u64 },
    Loading,
    Progress { loaded: u64, total: u64 },
    Complete { total: u64 },
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Step::UploadProgress { .. } => "upload-progress",
            Step::UploadComplete { .. } => "upload-complete",
            Step::Loading => "loading",
            Step::Progress { .. } => "progress",
            Step::Complete { .. } => "complete",
        }
    }
}

#[derive(Default)]
struct TransportState {
    ready_state: ReadyState,
    outcome: Outcome,
    generation: u64,
    method: String,
    url: String,
    headers: HeaderMap,
    with_credentials: bool,
    timeout: Option<Duration>,
    send_flag: bool,
    upload_complete: bool,
    /// Set once the final `loadend` has been dispatched
    settled: bool,
    request: Option<Arc<RequestDescriptor>>,
    response: Option<ResponseDescriptor>,
    error: Option<TransportError>,
}

impl TransportState {
    /// Response visible to readers: headers received and not failed.
    fn visible_response(&self) -> Option<&ResponseDescriptor> {
        if self.ready_state < ReadyState::HeadersReceived || self.outcome.is_failure() {
            return None;
        }
        self.response.as_ref()
    }
}

struct TransportShared {
    id: u64,
    session: Arc<SessionContext>,
    state: Mutex<TransportState>,
    events: EventTarget,
    upload: EventTarget,
}

/// Emulated transport. Clones share the same instance.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<TransportShared>,
}

/// Non-owning handle, for listeners that need to reach back into their transport.
#[derive(Clone)]
pub struct WeakTransport {
    shared: Weak<TransportShared>,
}

impl WeakTransport {
    /// Returns the transport if it is still alive.
    pub fn upgrade(&self) -> Option<MockTransport> {
        self.shared.upgrade().map(|shared| MockTransport { shared })
    }
}

impl MockTransport {
    pub(crate) fn new(session: Arc<SessionContext>) -> Self {
        let state = TransportState {
            timeout: session.config().transport.default_timeout,
            ..TransportState::default()
        };
        Self {
            shared: Arc::new(TransportShared {
                id: session.next_transport_id(),
                session,
                state: Mutex::new(state),
                events: EventTarget::new(),
                upload: EventTarget::new(),
            }),
        }
    }

    /// Returns the session-unique id of this transport.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Returns a handle that does not keep the transport alive.
    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Initializes a request.
    ///
    /// Allowed while unsent, or opened but not yet sent; re-opening discards
    /// headers set so far. Dispatches `readystatechange` synchronously when
    /// leaving the unsent state.
    ///
    /// # Errors
    ///
    /// - `StateError::AlreadySent` - Request was already sent
    /// - `StateError::InvalidState` - Transport is past the opened state
    pub fn open(&self, method: &str, url: &str) -> Result<(), StateError> {
        let announce = {
            let mut state = self.shared.state.lock();
            match state.ready_state {
                ReadyState::Unsent => {}
                ReadyState::Opened if !state.send_flag => {}
                ReadyState::Opened => return Err(StateError::AlreadySent { operation: "open" }),
                other => {
                    return Err(StateError::InvalidState {
                        operation: "open",
                        state: other,
                    });
                }
            }

            let announce = state.ready_state == ReadyState::Unsent;
            state.ready_state = ReadyState::Opened;
            state.method = normalize_method(method);
            state.url = url.to_string();
            state.headers = HeaderMap::new();
            announce
        };

        if announce {
            self.fire(TransportEvent::new(
                EventKind::ReadyStateChange,
                Channel::Request,
                ReadyState::Opened,
            ));
        }
        Ok(())
    }

    /// Adds a request header. Repeated names are merged as `"a, b"`.
    ///
    /// # Errors
    ///
    /// - `StateError::InvalidState` - Transport is not opened
    /// - `StateError::AlreadySent` - Request was already sent
    pub fn set_request_header(&self, name: &str, value: &str) -> Result<(), StateError> {
        let mut state = self.shared.state.lock();
        Self::ensure_configurable(&state, "set request header")?;
        state.headers.append(name, value);
        Ok(())
    }

    /// Sets whether credentials are included.
    ///
    /// # Errors
    ///
    /// - `StateError::InvalidState` - Transport is past the opened state
    /// - `StateError::AlreadySent` - Request was already sent
    pub fn set_with_credentials(&self, with_credentials: bool) -> Result<(), StateError> {
        let mut state = self.shared.state.lock();
        if state.ready_state > ReadyState::Opened {
            return Err(StateError::InvalidState {
                operation: "set credentials",
                state: state.ready_state,
            });
        }
        if state.send_flag {
            return Err(StateError::AlreadySent {
                operation: "set credentials",
            });
        }
        state.with_credentials = with_credentials;
        Ok(())
    }

    /// Returns the credentials flag.
    pub fn with_credentials(&self) -> bool {
        self.shared.state.lock().with_credentials
    }

    /// Sets the resolution timeout. `None` or a zero duration disables it.
    ///
    /// Takes effect for requests whose resolution has not started yet.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.state.lock().timeout = timeout.filter(|limit| !limit.is_zero());
    }

    /// Returns the resolution timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.state.lock().timeout
    }

    /// Sends the request.
    ///
    /// Captures the request, records it in the session log and schedules the
    /// start turn. Bodies of `GET` and `HEAD` requests are dropped. Simulated
    /// failures are never returned here; they arrive as events and through
    /// [`MockTransport::completion`].
    ///
    /// # Errors
    ///
    /// - `StateError::InvalidState` - Transport is not opened
    /// - `StateError::AlreadySent` - Request was already sent
    /// - `StateError::SessionClosed` - Session was torn down
    pub fn send(&self, body: impl Into<RequestBody>) -> Result<(), StateError> {
        let body: RequestBody = body.into();
        let (request, generation) = {
            let mut state = self.shared.state.lock();
            Self::ensure_configurable(&state, "send")?;
            if !self.shared.session.is_installed() {
                return Err(StateError::SessionClosed);
            }

            let body = match state.method.as_str() {
                "GET" | "HEAD" => None,
                _ => body.into_bytes(),
            };
            let request = Arc::new(RequestDescriptor {
                method: state.method.clone(),
                url: state.url.clone(),
                headers: state.headers.clone(),
                credentials: CredentialsMode::from_flag(state.with_credentials),
                body,
            });

            state.send_flag = true;
            state.upload_complete = request.body.is_none();
            state.request = Some(request.clone());
            (request, state.generation)
        };

        tracing::debug!(
            transport = self.shared.id,
            method = %request.method,
            url = %request.url,
            "Captured request"
        );
        self.shared.session.record_request(request);

        let transport = self.clone();
        self.shared
            .session
            .scheduler()
            .schedule("start", move || transport.start(generation));
        Ok(())
    }

    /// Cancels the request.
    ///
    /// From an active state the outcome becomes aborted and the state DONE
    /// immediately; `readystatechange`, `abort` and `loadend` follow on a
    /// later turn. Anything still in flight is discarded. No-op when unsent
    /// or done.
    pub fn abort(&self) {
        let (generation, upload_pending) = {
            let mut state = self.shared.state.lock();
            if !state.ready_state.is_active() {
                return;
            }
            state.generation += 1;
            state.ready_state = ReadyState::Done;
            state.outcome = Outcome::Aborted;
            state.error = Some(TransportError::Aborted);
            state.response = None;
            let upload_pending = state.send_flag && !state.upload_complete;
            state.upload_complete = true;
            (state.generation, upload_pending)
        };

        tracing::debug!(transport = self.shared.id, "Request aborted");
        self.schedule_turn(generation, "abort", move |transport| {
            transport.emit_abort(upload_pending);
        });
    }

    /// Returns the current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.lock().ready_state
    }

    /// Returns the terminal outcome, or `Outcome::Pending`.
    pub fn outcome(&self) -> Outcome {
        self.shared.state.lock().outcome
    }

    /// Returns the failure cause once the request failed.
    pub fn error(&self) -> Option<TransportError> {
        self.shared.state.lock().error.clone()
    }

    /// Returns the request captured by `send`.
    pub fn request(&self) -> Option<Arc<RequestDescriptor>> {
        self.shared.state.lock().request.clone()
    }

    /// Returns the response status, or `0` before headers or after a failure.
    pub fn status(&self) -> u16 {
        self.shared
            .state
            .lock()
            .visible_response()
            .map_or(0, |response| response.status)
    }

    /// Returns the status text, falling back to the canonical reason phrase.
    pub fn status_text(&self) -> String {
        self.shared
            .state
            .lock()
            .visible_response()
            .map(ResponseDescriptor::reason_phrase)
            .unwrap_or_default()
    }

    /// Returns the response body once the request loaded successfully.
    pub fn response_text(&self) -> String {
        let state = self.shared.state.lock();
        if state.ready_state != ReadyState::Done || state.outcome != Outcome::Loaded {
            return String::new();
        }
        state
            .response
            .as_ref()
            .map(ResponseDescriptor::body_text)
            .unwrap_or_default()
    }

    /// Returns a response header, ignoring name case.
    pub fn response_header(&self, name: &str) -> Option<String> {
        self.shared
            .state
            .lock()
            .visible_response()
            .and_then(|response| response.headers.get(name))
            .map(str::to_string)
    }

    /// Returns all response headers as `name: value\r\n` lines with lower-cased names.
    pub fn all_response_headers(&self) -> String {
        self.shared
            .state
            .lock()
            .visible_response()
            .map(|response| response.headers.to_string())
            .unwrap_or_default()
    }

    /// Registers a listener on the request channel.
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.shared.events.add_event_listener(kind, listener)
    }

    /// Removes a request channel listener.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_event_listener(id)
    }

    /// Returns the request channel event target.
    pub fn events(&self) -> &EventTarget {
        &self.shared.events
    }

    /// Returns the upload channel event target.
    pub fn upload(&self) -> &EventTarget {
        &self.shared.upload
    }

    /// Drives the session scheduler until this request has finished.
    ///
    /// Resolves with the response body, or with the failure cause once every
    /// final event has been dispatched.
    ///
    /// # Errors
    ///
    /// - `TransportError::NoHandler` - No route handled the request
    /// - `TransportError::Handler` - Handler failed
    /// - `TransportError::InvalidResponse` - Handler produced an invalid status
    /// - `TransportError::Aborted` - Request was aborted
    /// - `TransportError::TimedOut` - Request timed out
    /// - `TransportError::Stalled` - Scheduler went idle first, e.g. never sent
    pub async fn completion(&self) -> Result<String, TransportError> {
        let budget = self.shared.session.config().scheduler.max_turns;
        let scheduler = self.shared.session.scheduler();

        for _ in 0..budget {
            if self.shared.state.lock().settled {
                return self.final_result();
            }
            if !scheduler.advance().await {
                break;
            }
        }

        if self.outcome().is_terminal() {
            return self.final_result();
        }
        tracing::warn!(transport = self.shared.id, "Request stalled");
        Err(TransportError::Stalled)
    }

    fn final_result(&self) -> Result<String, TransportError> {
        let state = self.shared.state.lock();
        match state.outcome {
            Outcome::Loaded => Ok(state
                .response
                .as_ref()
                .map(ResponseDescriptor::body_text)
                .unwrap_or_default()),
            Outcome::Pending => Err(TransportError::Stalled),
            _ => Err(state.error.clone().unwrap_or(TransportError::Aborted)),
        }
    }

    fn ensure_configurable(
        state: &TransportState,
        operation: &'static str,
    ) -> Result<(), StateError> {
        if state.ready_state != ReadyState::Opened {
            return Err(StateError::InvalidState {
                operation,
                state: state.ready_state,
            });
        }
        if state.send_flag {
            return Err(StateError::AlreadySent { operation });
        }
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Schedules a turn that only runs if the generation is still current.
    fn schedule_turn<F>(&self, generation: u64, label: &'static str, turn: F)
    where
        F: FnOnce(&MockTransport) + Send + 'static,
    {
        if !self.shared.session.is_installed() {
            return;
        }
        let transport = self.clone();
        self.shared.session.scheduler().schedule(label, move || {
            if transport.generation() != generation {
                tracing::trace!(transport = transport.shared.id, label, "Skipping stale turn");
                return;
            }
            turn(&transport);
        });
    }

    fn start(&self, generation: u64) {
        let (upload_total, request, timeout) = {
            let state = self.shared.state.lock();
            let Some(request) = state.request.clone() else {
                return;
            };
            let upload_total = request.body.as_ref().map(Bytes::len);
            (upload_total, request, state.timeout)
        };

        self.fire(self.event(EventKind::LoadStart, Channel::Request));
        if let Some(total) = upload_total {
            self.fire(
                self.event(EventKind::LoadStart, Channel::Upload)
                    .with_progress(0, total as u64),
            );
        }

        if self.generation() != generation {
            tracing::debug!(transport = self.shared.id, "Aborted before resolution");
            return;
        }

        let routes = self.shared.session.snapshot_routes(&request);
        let transport = self.clone();
        let resolution = async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, resolve(routes, request))
                    .await
                    .unwrap_or(Err(TransportError::TimedOut)),
                None => resolve(routes, request).await,
            };
            Box::new(move || transport.settle(generation, result)) as TurnFn
        };
        self.shared
            .session
            .scheduler()
            .schedule_after("resolve", resolution);
    }

    fn settle(&self, generation: u64, result: Result<ResponseDescriptor, TransportError>) {
        if self.generation() != generation {
            tracing::warn!(
                transport = self.shared.id,
                ok = result.is_ok(),
                "Discarding resolution of aborted request"
            );
            return;
        }

        match result {
            Ok(response) => {
                tracing::debug!(
                    transport = self.shared.id,
                    status = response.status,
                    "Request resolved"
                );
                self.receive_headers(generation, response);
            }
            Err(error) => {
                tracing::debug!(transport = self.shared.id, %error, "Request failed");
                self.fail(error);
            }
        }
    }

    fn receive_headers(&self, generation: u64, response: ResponseDescriptor) {
        let download_total = response.body_len();
        let upload_total = {
            let mut state = self.shared.state.lock();
            state.ready_state = ReadyState::HeadersReceived;
            state.response = Some(response);
            if state.upload_complete {
                None
            } else {
                state
                    .request
                    .as_ref()
                    .and_then(|request| request.body.as_ref())
                    .map(|body| body.len() as u64)
            }
        };

        let mut steps = Vec::new();
        if let Some(total) = upload_total {
            for loaded in self.shared.session.progress_marks(total) {
                steps.push(Step::UploadProgress { loaded, total });
            }
            steps.push(Step::UploadComplete { total });
        }
        steps.push(Step::Loading);
        for loaded in self.shared.session.progress_marks(download_total) {
            steps.push(Step::Progress {
                loaded,
                total: download_total,
            });
        }
        steps.push(Step::Complete {
            total: download_total,
        });

        for step in steps {
            self.schedule_turn(generation, step.label(), move |transport| {
                transport.run_step(step);
            });
        }

        self.fire(self.event(EventKind::ReadyStateChange, Channel::Request));
    }

    fn run_step(&self, step: Step) {
        match step {
            Step::UploadProgress { loaded, total } => {
                self.fire(
                    self.event(EventKind::Progress, Channel::Upload)
                        .with_progress(loaded, total),
                );
            }
            Step::UploadComplete { total } => {
                self.shared.state.lock().upload_complete = true;
                for kind in [EventKind::Load, EventKind::LoadEnd] {
                    self.fire(self.event(kind, Channel::Upload).with_progress(total, total));
                }
            }
            Step::Loading => {
                self.shared.state.lock().ready_state = ReadyState::Loading;
                self.fire(self.event(EventKind::ReadyStateChange, Channel::Request));
            }
            Step::Progress { loaded, total } => {
                self.fire(
                    self.event(EventKind::Progress, Channel::Request)
                        .with_progress(loaded, total),
                );
            }
            Step::Complete { total } => {
                {
                    let mut state = self.shared.state.lock();
                    state.ready_state = ReadyState::Done;
                    state.outcome = Outcome::Loaded;
                }
                self.fire(self.event(EventKind::ReadyStateChange, Channel::Request));
                for kind in [EventKind::Load, EventKind::LoadEnd] {
                    self.fire(self.event(kind, Channel::Request).with_progress(total, total));
                }
                self.shared.state.lock().settled = true;
            }
        }
    }

    fn fail(&self, error: TransportError) {
        let outcome = match error {
            TransportError::TimedOut => Outcome::TimedOut,
            _ => Outcome::Errored,
        };
        let upload_pending = {
            let mut state = self.shared.state.lock();
            state.ready_state = ReadyState::Done;
            state.outcome = outcome;
            state.error = Some(error);
            state.response = None;
            let upload_pending = !state.upload_complete;
            state.upload_complete = true;
            upload_pending
        };

        let kind = outcome.event_kind().unwrap_or(EventKind::Error);
        self.emit_terminal(kind, upload_pending);
    }

    fn emit_abort(&self, upload_pending: bool) {
        self.emit_terminal(EventKind::Abort, upload_pending);
    }

    /// Dispatches the failure tail: `readystatechange`, then the outcome event
    /// and `loadend` on the upload channel (if still uploading) and the request.
    fn emit_terminal(&self, kind: EventKind, upload_pending: bool) {
        self.fire(self.event(EventKind::ReadyStateChange, Channel::Request));
        if upload_pending {
            self.fire(self.event(kind, Channel::Upload));
            self.fire(self.event(EventKind::LoadEnd, Channel::Upload));
        }
        self.fire(self.event(kind, Channel::Request));
        self.fire(self.event(EventKind::LoadEnd, Channel::Request));
        self.shared.state.lock().settled = true;
    }

    fn event(&self, kind: EventKind, channel: Channel) -> TransportEvent {
        TransportEvent::new(kind, channel, self.ready_state())
    }

    fn fire(&self, event: TransportEvent) {
        tracing::trace!(
            transport = self.shared.id,
            event = %event,
            ready_state = %event.ready_state,
            loaded = event.loaded,
            total = event.total,
            "Dispatching event"
        );
        let target = match event.channel {
            Channel::Request => &self.shared.events,
            Channel::Upload => &self.shared.upload,
        };
        target.dispatch(&event);
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MockTransport")
            .field("id", &self.shared.id)
            .field("ready_state", &state.ready_state)
            .field("outcome", &state.outcome)
            .field("method", &state.method)
            .field("url", &state.url)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for WeakTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTransport")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tideline_core::{HandlerReply, ResponseBuilder, TidelineConfig};

    use super::*;
    use crate::session::Session;

    const URL_API: &str = "http://localhost/api";

    fn installed() -> Session {
        let session = Session::new(TidelineConfig::deterministic_testing());
        session.setup().unwrap();
        session
    }

    fn describe(event: &TransportEvent) -> String {
        match event.kind {
            EventKind::ReadyStateChange => format!("{event}:{}", event.ready_state),
            EventKind::Progress => format!("{event}({}/{})", event.loaded, event.total),
            _ => event.to_string(),
        }
    }

    fn record(transport: &MockTransport) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            for target in [transport.events(), transport.upload()] {
                let log = log.clone();
                target.add_event_listener(kind, move |event| log.lock().push(describe(event)));
            }
        }
        log
    }

    fn without_progress(log: &Mutex<Vec<String>>) -> Vec<String> {
        log.lock()
            .iter()
            .filter(|entry| !entry.contains("progress("))
            .cloned()
            .collect()
    }

    fn progress_of(log: &Mutex<Vec<String>>, prefix: &str) -> Vec<String> {
        log.lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_success_sequence_with_upload() {
        let session = installed();
        session.post(URL_API, |req: &RequestDescriptor, res: ResponseBuilder| {
            assert_eq!(req.body_text().as_deref(), Some("ping"));
            res.status(201)
                .header("Content-type", "image/jpeg")
                .body("Hello World!")
        });

        let transport = session.create_transport().unwrap();
        transport.open("post", URL_API).unwrap();
        let log = record(&transport);
        transport.send("ping").unwrap();

        let body = transport.completion().await.unwrap();
        assert_eq!(body, "Hello World!");
        assert_eq!(
            without_progress(&log),
            vec![
                "loadstart",
                "upload.loadstart",
                "readystatechange:HEADERS_RECEIVED",
                "upload.load",
                "upload.loadend",
                "readystatechange:LOADING",
                "readystatechange:DONE",
                "load",
                "loadend",
            ]
        );

        let downloads = progress_of(&log, "progress(");
        assert_eq!(downloads.last().map(String::as_str), Some("progress(12/12)"));
        let uploads = progress_of(&log, "upload.progress(");
        assert_eq!(uploads.last().map(String::as_str), Some("upload.progress(4/4)"));

        assert_eq!(transport.status(), 201);
        assert_eq!(transport.status_text(), "Created");
        assert_eq!(transport.response_header("content-type").as_deref(), Some("image/jpeg"));
        assert_eq!(transport.all_response_headers(), "content-type: image/jpeg\r\n");
        assert_eq!(transport.outcome(), Outcome::Loaded);
    }

    #[tokio::test]
    async fn test_first_event_is_deferred() {
        let session = installed();
        session.get(URL_API, |_req, res| res.body("sync"));
        session.get("http://localhost/async", |_req, res: ResponseBuilder| {
            HandlerReply::defer(async move { res.body("async") })
        });

        for url in [URL_API, "http://localhost/async"] {
            let transport = session.create_transport().unwrap();
            transport.open("GET", url).unwrap();
            transport.send(()).unwrap();

            // Listener attached after send still sees everything
            let log = record(&transport);
            assert!(log.lock().is_empty());

            session.run_until_idle().await.unwrap();
            let events = without_progress(&log);
            assert_eq!(events.first().map(String::as_str), Some("loadstart"));
            assert_eq!(events.last().map(String::as_str), Some("loadend"));
        }
    }

    #[tokio::test]
    async fn test_empty_body_reports_single_progress() {
        let session = installed();
        session.head(URL_API, |_req, res| res.status(204));

        let transport = session.create_transport().unwrap();
        transport.open("HEAD", URL_API).unwrap();
        let log = record(&transport);
        transport.send(()).unwrap();

        assert_eq!(transport.completion().await.unwrap(), "");
        assert_eq!(progress_of(&log, "progress("), vec!["progress(0/0)"]);
        assert!(progress_of(&log, "upload.").is_empty());
    }

    #[tokio::test]
    async fn test_rejecting_handler() {
        let session = installed();
        session.post(URL_API, |_req, _res| HandlerReply::reject("backend down"));

        let transport = session.create_transport().unwrap();
        transport.open("POST", URL_API).unwrap();
        let log = record(&transport);
        transport.send(()).unwrap();

        let error = transport.completion().await.unwrap_err();
        assert_eq!(
            error,
            TransportError::Handler {
                reason: "backend down".to_string()
            }
        );
        assert_eq!(
            without_progress(&log),
            vec!["loadstart", "readystatechange:DONE", "error", "loadend"]
        );
        assert_eq!(transport.outcome(), Outcome::Errored);
        assert_eq!(transport.status(), 0);
        assert_eq!(transport.response_text(), "");
    }

    #[tokio::test]
    async fn test_failure_with_body_notifies_upload() {
        let session = installed();

        let transport = session.create_transport().unwrap();
        transport.open("PUT", URL_API).unwrap();
        let log = record(&transport);
        transport.send("payload").unwrap();

        let error = transport.completion().await.unwrap_err();
        assert!(matches!(error, TransportError::NoHandler { .. }));
        assert_eq!(
            without_progress(&log),
            vec![
                "loadstart",
                "upload.loadstart",
                "readystatechange:DONE",
                "upload.error",
                "upload.loadend",
                "error",
                "loadend",
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_before_start() {
        let session = installed();
        session.post(URL_API, |_req, res| res.body("never"));

        let transport = session.create_transport().unwrap();
        transport.open("POST", URL_API).unwrap();
        let log = record(&transport);
        transport.send("ping").unwrap();
        transport.abort();

        assert_eq!(transport.ready_state(), ReadyState::Done);
        assert_eq!(transport.outcome(), Outcome::Aborted);
        assert!(log.lock().is_empty());

        assert_eq!(transport.completion().await, Err(TransportError::Aborted));
        assert_eq!(
            without_progress(&log),
            vec![
                "loadstart",
                "upload.loadstart",
                "readystatechange:DONE",
                "upload.abort",
                "upload.loadend",
                "abort",
                "loadend",
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_while_opened_skips_loadstart() {
        let session = installed();
        session.get(URL_API, |_req, res| res.body("never"));

        let transport = session.create_transport().unwrap();
        transport.open("GET", URL_API).unwrap();
        let log = record(&transport);
        transport.abort();

        assert_eq!(transport.ready_state(), ReadyState::Done);
        assert_eq!(transport.outcome(), Outcome::Aborted);
        assert!(log.lock().is_empty());

        session.run_until_idle().await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["readystatechange:DONE", "abort", "loadend"]
        );
        assert_eq!(transport.completion().await, Err(TransportError::Aborted));
        assert!(transport.request().is_none());
        assert!(session.captured_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_completions_both_resolve() {
        let session = installed();
        for (url, body) in [("http://localhost/a", "a"), ("http://localhost/b", "b")] {
            session.get(url, move |_req, res: ResponseBuilder| {
                HandlerReply::defer(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    res.body(body)
                })
            });
        }

        let first = session.create_transport().unwrap();
        first.open("GET", "http://localhost/a").unwrap();
        first.send(()).unwrap();
        let second = session.create_transport().unwrap();
        second.open("GET", "http://localhost/b").unwrap();
        second.send(()).unwrap();

        let (a, b) = tokio::join!(first.completion(), second.completion());
        assert_eq!(a.as_deref(), Ok("a"));
        assert_eq!(b.as_deref(), Ok("b"));
    }

    #[tokio::test]
    async fn test_late_settlement_after_abort_is_discarded() {
        let session = installed();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gate = Arc::new(Mutex::new(Some(gate)));
        session.post(URL_API, move |_req, res: ResponseBuilder| {
            let gate = gate.lock().take();
            HandlerReply::defer(async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                res.body("too late")
            })
        });

        let transport = session.create_transport().unwrap();
        transport.open("POST", URL_API).unwrap();
        let log = record(&transport);
        transport.send(()).unwrap();

        session.run_pending().unwrap();
        assert_eq!(*log.lock(), vec!["loadstart"]);

        transport.abort();
        release.send(()).unwrap();
        session.run_until_idle().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["loadstart", "readystatechange:DONE", "abort", "loadend"]
        );
        assert_eq!(transport.response_text(), "");
        assert_eq!(transport.outcome(), Outcome::Aborted);
    }

    #[tokio::test]
    async fn test_listener_can_abort_mid_download() {
        let session = installed();
        session.get(URL_API, |_req, res| res.body("a body long enough for chunks"));

        let transport = session.create_transport().unwrap();
        transport.open("GET", URL_API).unwrap();
        let log = record(&transport);
        let handle = transport.downgrade();
        transport.add_event_listener(EventKind::ReadyStateChange, move |event| {
            if event.ready_state == ReadyState::Loading {
                if let Some(transport) = handle.upgrade() {
                    transport.abort();
                }
            }
        });
        transport.send(()).unwrap();

        assert_eq!(transport.completion().await, Err(TransportError::Aborted));
        assert_eq!(
            without_progress(&log),
            vec![
                "loadstart",
                "readystatechange:HEADERS_RECEIVED",
                "readystatechange:LOADING",
                "readystatechange:DONE",
                "abort",
                "loadend",
            ]
        );
        assert!(progress_of(&log, "progress(").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_timeout() {
        let session = installed();
        session.get(URL_API, |_req, res: ResponseBuilder| {
            HandlerReply::defer(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                res
            })
        });

        let transport = session.create_transport().unwrap();
        transport.open("GET", URL_API).unwrap();
        transport.set_timeout(Some(Duration::from_secs(1)));
        let log = record(&transport);
        transport.send(()).unwrap();

        assert_eq!(transport.completion().await, Err(TransportError::TimedOut));
        assert_eq!(transport.outcome(), Outcome::TimedOut);
        assert_eq!(
            without_progress(&log),
            vec!["loadstart", "readystatechange:DONE", "timeout", "loadend"]
        );
    }

    #[tokio::test]
    async fn test_state_errors() {
        let session = installed();
        session.any(URL_API, |_req, res| res);
        let transport = session.create_transport().unwrap();

        assert_eq!(
            transport.send(()),
            Err(StateError::InvalidState {
                operation: "send",
                state: ReadyState::Unsent
            })
        );
        assert!(transport.set_request_header("X-Early", "1").is_err());

        transport.open("GET", URL_API).unwrap();
        transport.send(()).unwrap();
        assert_eq!(
            transport.send(()),
            Err(StateError::AlreadySent { operation: "send" })
        );
        assert_eq!(
            transport.open("GET", URL_API),
            Err(StateError::AlreadySent { operation: "open" })
        );
        assert!(transport.set_request_header("X-Late", "1").is_err());
        assert!(transport.set_with_credentials(true).is_err());

        transport.completion().await.unwrap();
        assert_eq!(
            transport.open("GET", URL_API),
            Err(StateError::InvalidState {
                operation: "open",
                state: ReadyState::Done
            })
        );

        // Abort once done changes nothing
        transport.abort();
        assert_eq!(transport.outcome(), Outcome::Loaded);
    }

    #[tokio::test]
    async fn test_request_capture() {
        let session = installed();
        session.any(URL_API, |_req, res| res);
        let transport = session.create_transport().unwrap();

        let opened = Arc::new(Mutex::new(0));
        let counter = opened.clone();
        transport.add_event_listener(EventKind::ReadyStateChange, move |event| {
            if event.ready_state == ReadyState::Opened {
                *counter.lock() += 1;
            }
        });

        transport.open("POST", "http://localhost/other").unwrap();
        transport.set_request_header("X-Dropped", "1").unwrap();
        transport.open("get", URL_API).unwrap();
        transport.set_request_header("Accept", "text/plain").unwrap();
        transport.set_request_header("accept", "image/jpeg").unwrap();
        transport.set_with_credentials(true).unwrap();
        transport.send("ignored for GET").unwrap();

        // Re-opening does not announce OPENED again
        assert_eq!(*opened.lock(), 1);

        let request = transport.request().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, URL_API);
        assert_eq!(request.header("ACCEPT"), Some("text/plain, image/jpeg"));
        assert_eq!(request.header("X-Dropped"), None);
        assert_eq!(request.body, None);
        assert_eq!(request.credentials, CredentialsMode::Include);

        transport.completion().await.unwrap();
        assert_eq!(session.captured_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_gated_by_state() {
        let session = installed();
        session.get(URL_API, |_req, res| res.status(202).header("X-Id", "7").body("done"));

        let transport = session.create_transport().unwrap();
        transport.open("GET", URL_API).unwrap();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let handle = transport.downgrade();
        let sink = observed.clone();
        transport.add_event_listener(EventKind::ReadyStateChange, move |event| {
            if let Some(transport) = handle.upgrade() {
                sink.lock().push((
                    event.ready_state,
                    transport.status(),
                    transport.response_header("x-id"),
                    transport.response_text(),
                ));
            }
        });
        transport.send(()).unwrap();
        assert_eq!(transport.status(), 0);
        assert_eq!(transport.status_text(), "");

        transport.completion().await.unwrap();
        assert_eq!(
            *observed.lock(),
            vec![
                (ReadyState::HeadersReceived, 202, Some("7".to_string()), String::new()),
                (ReadyState::Loading, 202, Some("7".to_string()), String::new()),
                (ReadyState::Done, 202, Some("7".to_string()), "done".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsent_transport_stalls() {
        let session = installed();
        let transport = session.create_transport().unwrap();

        assert_eq!(transport.completion().await, Err(TransportError::Stalled));
    }

    #[tokio::test]
    async fn test_same_seed_same_progress() {
        async fn trace(seed: u64) -> Vec<String> {
            let mut config = TidelineConfig::deterministic_testing();
            config.scheduler.seed = seed;
            let session = Session::new(config);
            session.setup().unwrap();
            session.post(URL_API, |_req, res| res.body(vec![7u8; 300]));

            let transport = session.create_transport().unwrap();
            transport.open("POST", URL_API).unwrap();
            let log = record(&transport);
            transport.send(vec![1u8; 200]).unwrap();
            transport.completion().await.unwrap();

            let log = log.lock().clone();
            log
        }

        assert_eq!(trace(5).await, trace(5).await);
    }
}
