//! Session controller: install state, route registration and the scheduler.
//!
//! A [`Session`] replaces the global transport constructor of a browser test
//! environment. Code under test asks it for transports; tests register routes
//! on it and drive its scheduler to let requests make progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tideline_core::routing::{MethodMatcher, Route, RouteTable, UrlMatcher};
use tideline_core::{HandlerReply, RequestDescriptor, ResponseBuilder, TidelineConfig, TidelineError};

use crate::deterministic::{DeterministicRng, Scheduler, SchedulerError};
use crate::transport::{MockTransport, progress_marks};

/// Errors from lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `setup` called while already installed
    #[error("Session is already installed")]
    AlreadyInstalled,
    /// Operation needs an installed session
    #[error("Session is not installed")]
    NotInstalled,
}

impl From<SessionError> for TidelineError {
    fn from(error: SessionError) -> Self {
        TidelineError::from_usage_error(error)
    }
}

impl From<SchedulerError> for TidelineError {
    fn from(error: SchedulerError) -> Self {
        TidelineError::from_usage_error(error)
    }
}

#[derive(Default)]
struct SessionState {
    installed: bool,
    routes: RouteTable,
    requests: Vec<Arc<RequestDescriptor>>,
}

/// State shared between a session and the transports it created.
pub(crate) struct SessionContext {
    config: TidelineConfig,
    scheduler: Scheduler,
    state: Mutex<SessionState>,
    rng: Mutex<DeterministicRng>,
    next_transport_id: AtomicU64,
}

impl SessionContext {
    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn config(&self) -> &TidelineConfig {
        &self.config
    }

    pub(crate) fn is_installed(&self) -> bool {
        self.state.lock().installed
    }

    pub(crate) fn next_transport_id(&self) -> u64 {
        self.next_transport_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Routes accepting `request` at this moment; later registrations do not apply.
    pub(crate) fn snapshot_routes(&self, request: &RequestDescriptor) -> Vec<Arc<Route>> {
        self.state.lock().routes.candidates(request)
    }

    pub(crate) fn record_request(&self, request: Arc<RequestDescriptor>) {
        self.state.lock().requests.push(request);
    }

    pub(crate) fn progress_marks(&self, total: u64) -> Vec<u64> {
        let mut rng = self.rng.lock();
        progress_marks(&mut rng, total, self.config.transport.max_progress_chunk)
    }
}

/// Explicit simulator context. Cloning shares the same session.
#[derive(Clone)]
pub struct Session {
    context: Arc<SessionContext>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(TidelineConfig::default())
    }
}

impl Session {
    /// Creates an uninstalled session.
    pub fn new(config: TidelineConfig) -> Self {
        let context = SessionContext {
            scheduler: Scheduler::new(config.scheduler.max_turns),
            rng: Mutex::new(DeterministicRng::from_seed(config.scheduler.seed)),
            state: Mutex::new(SessionState::default()),
            next_transport_id: AtomicU64::new(1),
            config,
        };
        Self {
            context: Arc::new(context),
        }
    }

    /// Returns the configuration the session was created with.
    pub fn config(&self) -> &TidelineConfig {
        &self.context.config
    }

    /// Installs the session so transports can be created.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyInstalled` - Session is already installed
    pub fn setup(&self) -> Result<(), SessionError> {
        let mut state = self.context.state.lock();
        if state.installed {
            return Err(SessionError::AlreadyInstalled);
        }
        state.installed = true;
        tracing::debug!(seed = self.context.config.scheduler.seed, "Session installed");
        Ok(())
    }

    /// Removes every route and clears the request log. Install state is kept.
    pub fn reset(&self) {
        let mut state = self.context.state.lock();
        state.routes.reset();
        state.requests.clear();
    }

    /// Uninstalls the session.
    ///
    /// Routes are removed and every scheduled turn and in-flight resolution is
    /// dropped, so no transport dispatches another event.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotInstalled` - Session is not installed
    pub fn teardown(&self) -> Result<(), SessionError> {
        {
            let mut state = self.context.state.lock();
            if !state.installed {
                return Err(SessionError::NotInstalled);
            }
            state.installed = false;
            state.routes.reset();
            state.requests.clear();
        }
        self.context.scheduler.clear();
        tracing::debug!("Session torn down");
        Ok(())
    }

    /// Checks whether the session is installed.
    pub fn is_installed(&self) -> bool {
        self.context.is_installed()
    }

    /// Appends a route. The first registered route accepting a request wins.
    pub fn register<H, R>(
        &self,
        method: impl Into<MethodMatcher>,
        matcher: impl Into<UrlMatcher>,
        handler: H,
    ) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        let route = Route::new(method, matcher, handler);
        self.context.state.lock().routes.register(route);
        self
    }

    /// Registers a `GET` route.
    pub fn get<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("GET", matcher, handler)
    }

    /// Registers a `POST` route.
    pub fn post<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("POST", matcher, handler)
    }

    /// Registers a `PUT` route.
    pub fn put<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("PUT", matcher, handler)
    }

    /// Registers a `PATCH` route.
    pub fn patch<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("PATCH", matcher, handler)
    }

    /// Registers a `DELETE` route.
    pub fn delete<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("DELETE", matcher, handler)
    }

    /// Registers a `HEAD` route.
    pub fn head<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("HEAD", matcher, handler)
    }

    /// Registers an `OPTIONS` route.
    pub fn options<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register("OPTIONS", matcher, handler)
    }

    /// Registers a route accepting any method.
    pub fn any<H, R>(&self, matcher: impl Into<UrlMatcher>, handler: H) -> &Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        self.register(MethodMatcher::Any, matcher, handler)
    }

    /// Returns number of registered routes.
    pub fn route_count(&self) -> usize {
        self.context.state.lock().routes.len()
    }

    /// Creates a transport bound to this session.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotInstalled` - Called before `setup` or after `teardown`
    pub fn create_transport(&self) -> Result<MockTransport, SessionError> {
        if !self.is_installed() {
            return Err(SessionError::NotInstalled);
        }
        Ok(MockTransport::new(self.context.clone()))
    }

    /// Drives the scheduler until nothing is left to run or await.
    ///
    /// Returns number of steps taken.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TurnBudgetExhausted` - Work kept rescheduling itself
    pub async fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        self.context.scheduler.run_until_idle().await
    }

    /// Runs every turn that is ready without awaiting anything.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TurnBudgetExhausted` - Work kept rescheduling itself
    pub fn run_pending(&self) -> Result<usize, SchedulerError> {
        self.context.scheduler.run_pending()
    }

    /// Returns every request sent since setup or the last reset, in send order.
    pub fn captured_requests(&self) -> Vec<Arc<RequestDescriptor>> {
        self.context.state.lock().requests.clone()
    }

    /// Returns captured requests matching `method` and `url`.
    pub fn requests_matching(
        &self,
        method: impl Into<MethodMatcher>,
        url: impl Into<UrlMatcher>,
    ) -> Vec<Arc<RequestDescriptor>> {
        let method = method.into();
        let url = url.into();
        self.context
            .state
            .lock()
            .requests
            .iter()
            .filter(|request| method.matches(&request.method) && url.matches(request))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.context.state.lock();
        f.debug_struct("Session")
            .field("installed", &state.installed)
            .field("routes", &state.routes.len())
            .field("requests", &state.requests.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{EventKind, Outcome};

    const URL_API: &str = "http://localhost/api";

    fn installed() -> Session {
        let session = Session::new(TidelineConfig::deterministic_testing());
        session.setup().unwrap();
        session
    }

    #[test]
    fn test_lifecycle_errors() {
        let session = Session::default();
        assert_eq!(
            session.create_transport().unwrap_err(),
            SessionError::NotInstalled
        );
        assert_eq!(session.teardown(), Err(SessionError::NotInstalled));

        session.setup().unwrap();
        assert_eq!(session.setup(), Err(SessionError::AlreadyInstalled));
        assert!(session.create_transport().is_ok());

        session.teardown().unwrap();
        assert!(!session.is_installed());
        assert_eq!(
            session.create_transport().unwrap_err(),
            SessionError::NotInstalled
        );
    }

    #[test]
    fn test_reset_keeps_install_state() {
        let session = installed();
        session
            .get(URL_API, |_req, res| res)
            .post(URL_API, |_req, res| res.status(201));
        assert_eq!(session.route_count(), 2);

        session.reset();
        assert_eq!(session.route_count(), 0);
        assert!(session.is_installed());
        assert!(session.create_transport().is_ok());
    }

    #[tokio::test]
    async fn test_request_log() {
        let session = installed();
        session.any(URL_API, |_req, res| res);

        for method in ["get", "POST", "delete"] {
            let transport = session.create_transport().unwrap();
            transport.open(method, URL_API).unwrap();
            transport.send(()).unwrap();
        }
        session.run_until_idle().await.unwrap();

        let methods: Vec<String> = session
            .captured_requests()
            .iter()
            .map(|request| request.method.clone())
            .collect();
        assert_eq!(methods, vec!["GET", "POST", "DELETE"]);
        assert_eq!(session.requests_matching("POST", URL_API).len(), 1);
        let local = UrlMatcher::Prefix("http://localhost/".to_string());
        assert_eq!(session.requests_matching("*", local).len(), 3);

        session.reset();
        assert!(session.captured_requests().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_drops_scheduled_work() {
        let session = installed();
        session.get(URL_API, |_req, res| res.body("late"));

        let transport = session.create_transport().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let seen = seen.clone();
            transport.add_event_listener(kind, move |event| seen.lock().push(event.kind));
        }
        transport.open("GET", URL_API).unwrap();
        seen.lock().clear();
        transport.send(()).unwrap();

        session.teardown().unwrap();
        assert_eq!(session.run_until_idle().await.unwrap(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(transport.outcome(), Outcome::Pending);
    }

    #[test]
    fn test_session_error_folds_into_usage_error() {
        let error = TidelineError::from(SessionError::AlreadyInstalled);
        assert!(error.is_user_error());
        assert_eq!(
            error.user_message(),
            "Invalid use: Session is already installed"
        );
    }
}
