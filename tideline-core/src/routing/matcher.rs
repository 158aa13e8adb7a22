//! Method and URL matchers for registered routes.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use url::Url;

use crate::http::{RequestDescriptor, normalize_method};

/// Method accepted by a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatcher {
    /// Any method
    Any,
    /// Exactly this method, compared case-sensitively
    Exact(String),
}

impl MethodMatcher {
    /// Checks whether `method` is accepted.
    pub fn matches(&self, method: &str) -> bool {
        match self {
            MethodMatcher::Any => true,
            MethodMatcher::Exact(expected) => expected == method,
        }
    }
}

/// `"*"` is the wildcard; standard method names are upper-cased like `open` does.
impl From<&str> for MethodMatcher {
    fn from(method: &str) -> Self {
        if method == "*" {
            MethodMatcher::Any
        } else {
            MethodMatcher::Exact(normalize_method(method))
        }
    }
}

impl From<String> for MethodMatcher {
    fn from(method: String) -> Self {
        MethodMatcher::from(method.as_str())
    }
}

impl fmt::Display for MethodMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodMatcher::Any => write!(f, "*"),
            MethodMatcher::Exact(method) => write!(f, "{method}"),
        }
    }
}

/// Predicate deciding whether a request is accepted.
pub type RequestPredicate = Arc<dyn Fn(&RequestDescriptor) -> bool + Send + Sync>;

/// URL accepted by a route.
#[derive(Clone)]
pub enum UrlMatcher {
    /// Exact URL; URLs that parse are compared in normalized form
    Exact(String),
    /// URL starting with the prefix
    Prefix(String),
    /// URL matching the regular expression
    Regex(Regex),
    /// Arbitrary predicate over the whole request
    Predicate(RequestPredicate),
}

impl UrlMatcher {
    /// Creates a predicate matcher.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> bool + Send + Sync + 'static,
    {
        UrlMatcher::Predicate(Arc::new(predicate))
    }

    /// Checks whether the request is accepted.
    pub fn matches(&self, request: &RequestDescriptor) -> bool {
        match self {
            UrlMatcher::Exact(expected) => urls_equal(expected, &request.url),
            UrlMatcher::Prefix(prefix) => request.url.starts_with(prefix.as_str()),
            UrlMatcher::Regex(pattern) => pattern.is_match(&request.url),
            UrlMatcher::Predicate(predicate) => predicate(request),
        }
    }
}

fn urls_equal(expected: &str, actual: &str) -> bool {
    if expected == actual {
        return true;
    }
    match (Url::parse(expected), Url::parse(actual)) {
        (Ok(expected), Ok(actual)) => expected == actual,
        _ => false,
    }
}

impl From<&str> for UrlMatcher {
    fn from(url: &str) -> Self {
        UrlMatcher::Exact(url.to_string())
    }
}

impl From<String> for UrlMatcher {
    fn from(url: String) -> Self {
        UrlMatcher::Exact(url)
    }
}

impl From<Regex> for UrlMatcher {
    fn from(pattern: Regex) -> Self {
        UrlMatcher::Regex(pattern)
    }
}

impl fmt::Debug for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlMatcher::Exact(url) => f.debug_tuple("Exact").field(url).finish(),
            UrlMatcher::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            UrlMatcher::Regex(pattern) => f.debug_tuple("Regex").field(&pattern.as_str()).finish(),
            UrlMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
