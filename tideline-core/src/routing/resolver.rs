//! Handler resolution: turns whatever a handler replies into one outcome.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use hyper::StatusCode;

use super::TransportError;
use super::handler::HandlerReply;
use super::table::Route;
use crate::http::{RequestDescriptor, ResponseDescriptor};

/// Reply with every deferred layer awaited.
enum Settled {
    Respond(ResponseDescriptor),
    Fail(String),
    PassThrough,
    Timeout,
}

/// Resolves a request against `routes` in order.
///
/// Routes that do not accept the request are skipped; a pass-through reply
/// moves on to the next accepting route. Handler panics, synchronous or
/// inside a deferred reply, become [`TransportError::Handler`].
///
/// # Errors
///
/// - `TransportError::NoHandler` - No route accepted the request or all passed through
/// - `TransportError::Handler` - Handler failed or panicked
/// - `TransportError::InvalidResponse` - Handler responded with an invalid status code
/// - `TransportError::TimedOut` - Handler simulated a timeout
pub async fn resolve(
    routes: Vec<Arc<Route>>,
    request: Arc<RequestDescriptor>,
) -> Result<ResponseDescriptor, TransportError> {
    for (position, route) in routes.iter().enumerate() {
        if !route.accepts(&request) {
            continue;
        }

        let reply = match catch_unwind(AssertUnwindSafe(|| route.invoke(&request))) {
            Ok(reply) => reply,
            Err(panic) => HandlerReply::Fail(panic_reason(panic.as_ref())),
        };

        match settle(reply).await {
            Settled::Respond(response) => return validate(response),
            Settled::Fail(reason) => {
                tracing::debug!(position, %reason, "Handler failed");
                return Err(TransportError::Handler { reason });
            }
            Settled::Timeout => return Err(TransportError::TimedOut),
            Settled::PassThrough => {
                tracing::trace!(position, url = %request.url, "Handler passed request through");
            }
        }
    }

    Err(TransportError::NoHandler {
        method: request.method.clone(),
        url: request.url.clone(),
    })
}

async fn settle(mut reply: HandlerReply) -> Settled {
    loop {
        reply = match reply {
            HandlerReply::Respond(response) => return Settled::Respond(response),
            HandlerReply::Fail(reason) => return Settled::Fail(reason),
            HandlerReply::PassThrough => return Settled::PassThrough,
            HandlerReply::Timeout => return Settled::Timeout,
            HandlerReply::Deferred(future) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(next) => next,
                Err(panic) => HandlerReply::Fail(panic_reason(panic.as_ref())),
            },
        };
    }
}

fn validate(response: ResponseDescriptor) -> Result<ResponseDescriptor, TransportError> {
    match StatusCode::from_u16(response.status) {
        Ok(_) => Ok(response),
        Err(_) => Err(TransportError::InvalidResponse {
            status: response.status,
        }),
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::http::ResponseBuilder;
    use crate::routing::RouteTable;

    const URL_API: &str = "http://localhost/api";

    fn request() -> Arc<RequestDescriptor> {
        Arc::new(RequestDescriptor::new("POST", URL_API))
    }

    fn routes(table: &RouteTable) -> Vec<Arc<Route>> {
        table.candidates(&request())
    }

    #[tokio::test]
    async fn test_synchronous_response() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, res| {
            res.status(201).body("Hello World!")
        }));

        let response = resolve(routes(&table), request()).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body_text(), "Hello World!");
    }

    #[tokio::test]
    async fn test_deferred_response() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, res: ResponseBuilder| {
            HandlerReply::defer(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                res.status(202)
            })
        }));

        let response = resolve(routes(&table), request()).await.unwrap();
        assert_eq!(response.status, 202);
    }

    #[tokio::test]
    async fn test_rejected_deferred_reply() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, _res| {
            HandlerReply::reject("nope")
        }));

        let error = resolve(routes(&table), request()).await.unwrap_err();
        assert_eq!(
            error,
            TransportError::Handler {
                reason: "nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_is_captured() {
        let mut table = RouteTable::new();
        table.register(Route::new(
            "POST",
            URL_API,
            |_req, _res| -> ResponseBuilder { panic!("handler exploded") },
        ));

        let error = resolve(routes(&table), request()).await.unwrap_err();
        assert_eq!(
            error,
            TransportError::Handler {
                reason: "handler exploded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_panicking_deferred_reply_is_captured() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, _res| {
            HandlerReply::defer(async {
                if URL_API.is_empty() {
                    return HandlerReply::pass_through();
                }
                panic!("async explosion")
            })
        }));

        let error = resolve(routes(&table), request()).await.unwrap_err();
        assert!(matches!(error, TransportError::Handler { reason } if reason == "async explosion"));
    }

    #[tokio::test]
    async fn test_invalid_status_is_rejected() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, res| res.status(0)));

        let error = resolve(routes(&table), request()).await.unwrap_err();
        assert_eq!(error, TransportError::InvalidResponse { status: 0 });
    }

    #[tokio::test]
    async fn test_pass_through_continues_to_next_route() {
        let mut table = RouteTable::new();
        table.register(Route::new("*", URL_API, |_req, _res| {
            HandlerReply::pass_through()
        }));
        table.register(Route::new("POST", URL_API, |_req, _res| {
            HandlerReply::defer(async { HandlerReply::pass_through() })
        }));
        table.register(Route::new("POST", URL_API, |_req, res| res.status(204)));

        let response = resolve(routes(&table), request()).await.unwrap();
        assert_eq!(response.status, 204);
    }

    #[tokio::test]
    async fn test_exhausted_table_is_no_handler() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, _res| {
            HandlerReply::pass_through()
        }));

        let error = resolve(routes(&table), request()).await.unwrap_err();
        assert_eq!(
            error,
            TransportError::NoHandler {
                method: "POST".to_string(),
                url: URL_API.to_string()
            }
        );

        let error = resolve(Vec::new(), request()).await.unwrap_err();
        assert!(error.is_network_error());
    }

    #[tokio::test]
    async fn test_simulated_timeout() {
        let mut table = RouteTable::new();
        table.register(Route::new("POST", URL_API, |_req, _res| {
            HandlerReply::timeout()
        }));

        let error = resolve(routes(&table), request()).await.unwrap_err();
        assert_eq!(error, TransportError::TimedOut);
        assert!(!error.is_network_error());
    }
}
