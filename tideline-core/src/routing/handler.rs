//! Handler contract: what user code returns for a matched request.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::http::{RequestDescriptor, ResponseBuilder, ResponseDescriptor};

/// Response-producing function registered for a route.
///
/// Receives the captured request and a fresh [`ResponseBuilder`].
pub type Handler = Arc<dyn Fn(&RequestDescriptor, ResponseBuilder) -> HandlerReply + Send + Sync>;

/// Everything a handler can answer with.
pub enum HandlerReply {
    /// Finished response
    Respond(ResponseDescriptor),
    /// Handler failure; surfaces as a network error
    Fail(String),
    /// Let the next matching route handle the request
    PassThrough,
    /// Simulate the request timing out
    Timeout,
    /// Reply that becomes available later
    Deferred(BoxFuture<'static, HandlerReply>),
}

impl HandlerReply {
    /// Defers the reply to a future.
    pub fn defer<F, R>(future: F) -> Self
    where
        F: Future<Output = R> + Send + 'static,
        R: Into<HandlerReply> + 'static,
    {
        HandlerReply::Deferred(future.map(Into::into).boxed())
    }

    /// Fails the request with `error` as the cause.
    pub fn fail(error: impl fmt::Display) -> Self {
        HandlerReply::Fail(error.to_string())
    }

    /// Defers a failure, like a promise that rejects.
    pub fn reject(error: impl fmt::Display) -> Self {
        let reason = error.to_string();
        HandlerReply::defer(async move { HandlerReply::Fail(reason) })
    }

    /// Passes the request on to the next matching route.
    pub fn pass_through() -> Self {
        HandlerReply::PassThrough
    }

    /// Simulates a timeout.
    pub fn timeout() -> Self {
        HandlerReply::Timeout
    }

    /// Returns the reply kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerReply::Respond(_) => "respond",
            HandlerReply::Fail(_) => "fail",
            HandlerReply::PassThrough => "pass-through",
            HandlerReply::Timeout => "timeout",
            HandlerReply::Deferred(_) => "deferred",
        }
    }
}

impl fmt::Debug for HandlerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerReply::Respond(response) => f.debug_tuple("Respond").field(response).finish(),
            HandlerReply::Fail(reason) => f.debug_tuple("Fail").field(reason).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<ResponseDescriptor> for HandlerReply {
    fn from(response: ResponseDescriptor) -> Self {
        HandlerReply::Respond(response)
    }
}

impl From<ResponseBuilder> for HandlerReply {
    fn from(builder: ResponseBuilder) -> Self {
        HandlerReply::Respond(builder.build())
    }
}

impl<T, E> From<Result<T, E>> for HandlerReply
where
    T: Into<HandlerReply>,
    E: fmt::Display,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(reply) => reply.into(),
            Err(error) => HandlerReply::fail(error),
        }
    }
}

/// Wraps a closure returning anything convertible into a reply.
pub(crate) fn into_handler<H, R>(handler: H) -> Handler
where
    H: Fn(&RequestDescriptor, ResponseBuilder) -> R + Send + Sync + 'static,
    R: Into<HandlerReply>,
{
    Arc::new(
        move |request: &RequestDescriptor, response: ResponseBuilder| -> HandlerReply {
            handler(request, response).into()
        },
    )
}
