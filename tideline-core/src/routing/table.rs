//! Ordered route table.

use std::fmt;
use std::sync::Arc;

use super::handler::{Handler, HandlerReply, into_handler};
use super::matcher::{MethodMatcher, UrlMatcher};
use crate::http::{RequestDescriptor, ResponseBuilder};

/// A registered pairing of method and URL matcher with a handler.
#[derive(Clone)]
pub struct Route {
    method: MethodMatcher,
    matcher: UrlMatcher,
    handler: Handler,
}

impl Route {
    /// Creates route from matchers and a handler closure.
    pub fn new<H, R>(
        method: impl Into<MethodMatcher>,
        matcher: impl Into<UrlMatcher>,
        handler: H,
    ) -> Self
    where
        H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
        R: Into<HandlerReply>,
    {
        Self {
            method: method.into(),
            matcher: matcher.into(),
            handler: into_handler(handler),
        }
    }

    /// Checks whether both the method and the URL matcher accept the request.
    pub fn accepts(&self, request: &RequestDescriptor) -> bool {
        self.method.matches(&request.method) && self.matcher.matches(request)
    }

    /// Invokes the handler with a fresh response builder.
    pub fn invoke(&self, request: &RequestDescriptor) -> HandlerReply {
        (self.handler)(request, ResponseBuilder::new())
    }

    /// Returns the method matcher.
    pub fn method(&self) -> &MethodMatcher {
        &self.method
    }

    /// Returns the URL matcher.
    pub fn matcher(&self) -> &UrlMatcher {
        &self.matcher
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Routes in registration order; the first structural match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route.
    pub fn register(&mut self, route: Route) {
        tracing::debug!(
            method = %route.method,
            matcher = ?route.matcher,
            position = self.routes.len(),
            "Registered route"
        );
        self.routes.push(Arc::new(route));
    }

    /// Removes every route.
    pub fn reset(&mut self) {
        tracing::debug!(cleared = self.routes.len(), "Route table reset");
        self.routes.clear();
    }

    /// Returns the first route accepting the request.
    pub fn match_request(&self, request: &RequestDescriptor) -> Option<Arc<Route>> {
        self.routes
            .iter()
            .find(|route| route.accepts(request))
            .cloned()
    }

    /// Returns every route accepting the request, in registration order.
    ///
    /// This is the chain a pass-through reply walks along.
    pub fn candidates(&self, request: &RequestDescriptor) -> Vec<Arc<Route>> {
        self.routes
            .iter()
            .filter(|route| route.accepts(request))
            .cloned()
            .collect()
    }

    /// Returns number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Checks whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(url: &str) -> RequestDescriptor {
        RequestDescriptor::new("POST", url)
    }

    #[test]
    fn test_first_registered_match_wins() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", "http://localhost/api", |_req, res| {
            res.status(201)
        }));
        table.register(Route::new("POST", "http://localhost/api", |_req, res| {
            res.status(500)
        }));

        let route = table.match_request(&post("http://localhost/api")).unwrap();
        let HandlerReply::Respond(response) = route.invoke(&post("http://localhost/api")) else {
            panic!("expected response");
        };
        assert_eq!(response.status, 201);
    }

    #[test]
    fn test_method_must_match() {
        let mut table = RouteTable::new();
        table.register(Route::new("GET", "http://localhost/api", |_req, res| res));

        assert!(table.match_request(&post("http://localhost/api")).is_none());
    }

    #[test]
    fn test_wildcard_method() {
        let mut table = RouteTable::new();
        table.register(Route::new("*", "http://localhost/api", |_req, res| res));

        assert!(table.match_request(&post("http://localhost/api")).is_some());
        assert!(
            table
                .match_request(&RequestDescriptor::new("PURGE", "http://localhost/api"))
                .is_some()
        );
    }

    #[test]
    fn test_candidates_keep_registration_order() {
        let mut table = RouteTable::new();
        table.register(Route::new("*", "http://localhost/a", |_req, res| res.status(1)));
        table.register(Route::new("POST", "http://localhost/b", |_req, res| res));
        table.register(Route::new("POST", "http://localhost/a", |_req, res| res.status(2)));

        let candidates = table.candidates(&post("http://localhost/a"));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].method(), &MethodMatcher::Any);
    }

    #[test]
    fn test_reset_clears_routes() {
        let mut table = RouteTable::new();
        table.register(Route::new("GET", "http://localhost/", |_req, res| res));
        assert_eq!(table.len(), 1);

        table.reset();
        assert!(table.is_empty());
        assert!(
            table
                .match_request(&RequestDescriptor::new("GET", "http://localhost/"))
                .is_none()
        );
    }
}
