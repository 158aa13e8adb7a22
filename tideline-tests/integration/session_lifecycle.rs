//! Setup, reset and teardown of a session.

use std::time::Duration;

use regex::Regex;
use tideline_core::{HandlerReply, ResponseBuilder, TidelineError, UrlMatcher};
use tideline_sim::{Session, SessionError, StateError};

use crate::harness::{FetchError, FetchOptions, Observation, URL_API, fetch, installed_session};

#[tokio::test]
async fn test_reset_removes_routes_but_keeps_install() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res| res.body("before reset"));

    let first = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(first.finish(&session).await?, Ok("before reset".to_string()));

    session.reset();
    assert_eq!(session.route_count(), 0);
    assert!(session.is_installed());
    assert!(session.captured_requests().is_empty());

    let second = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(second.finish(&session).await?, Err(FetchError::Network));
    Ok(())
}

#[test]
fn test_lifecycle_misuse_is_reported() {
    let session = Session::default();
    assert!(matches!(
        session.create_transport(),
        Err(SessionError::NotInstalled)
    ));
    assert_eq!(session.teardown(), Err(SessionError::NotInstalled));

    session.setup().unwrap();
    assert_eq!(session.setup(), Err(SessionError::AlreadyInstalled));

    session.teardown().unwrap();
    assert_eq!(session.teardown(), Err(SessionError::NotInstalled));

    // Installing again after teardown starts clean
    session.setup().unwrap();
    assert_eq!(session.route_count(), 0);
}

#[tokio::test]
async fn test_teardown_silences_in_flight_requests() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res: ResponseBuilder| {
        HandlerReply::defer(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            res.body("after teardown")
        })
    });

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    session.run_pending()?;
    assert_eq!(pending.observations(), vec![Observation::Start]);

    session.teardown()?;
    assert_eq!(session.run_until_idle().await?, 0);
    assert_eq!(pending.observations(), vec![Observation::Start]);
    assert_eq!(pending.settled(), None);

    // The orphaned transport refuses to send again
    let error = pending.transport().send(()).unwrap_err();
    assert_eq!(error, StateError::AlreadySent { operation: "send" });
    Ok(())
}

#[tokio::test]
async fn test_send_after_teardown_is_rejected() -> anyhow::Result<()> {
    let session = installed_session();
    let transport = session.create_transport()?;
    transport.open("GET", URL_API)?;

    session.teardown()?;
    assert_eq!(transport.send(()), Err(StateError::SessionClosed));
    Ok(())
}

#[tokio::test]
async fn test_request_log_queries() -> anyhow::Result<()> {
    let session = installed_session();
    session.any(UrlMatcher::Prefix("http://localhost/".to_string()), |_req, res| res);

    for (method, url) in [
        ("GET", "http://localhost/users/1"),
        ("POST", "http://localhost/users"),
        ("GET", "http://localhost/health"),
    ] {
        fetch(&session, url, FetchOptions::default().method(method))?;
    }
    session.run_until_idle().await?;

    assert_eq!(session.captured_requests().len(), 3);
    let users = Regex::new(r"/users(/\d+)?$")?;
    assert_eq!(session.requests_matching("*", users.clone()).len(), 2);
    assert_eq!(session.requests_matching("GET", users).len(), 1);
    assert_eq!(
        session
            .requests_matching("get", "http://localhost/health")
            .len(),
        1
    );
    Ok(())
}

#[test]
fn test_misuse_folds_into_crate_error() {
    let error = TidelineError::from(SessionError::NotInstalled);
    assert!(error.is_user_error());

    let error = TidelineError::from(StateError::SessionClosed);
    assert_eq!(error.user_message(), "Invalid use: Session is not installed");
}
