//! Rejection, abort, timeout and no-match branches.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tideline_core::{HandlerReply, ResponseBuilder, TidelineConfig, TransportError};
use tideline_sim::{Outcome, ReadyState, Session};

use crate::harness::{
    FetchError, FetchOptions, Observation, URL_API, fetch, installed_session, phases,
};

fn rejected(error: FetchError) -> Vec<Observation> {
    vec![
        Observation::Start,
        Observation::Rejected(error),
        Observation::End,
    ]
}

#[tokio::test]
async fn test_rejecting_handler_ends_with_loadend() -> anyhow::Result<()> {
    let session = installed_session();
    session.post(URL_API, |_req, _res| HandlerReply::reject("nope"));

    let pending = fetch(
        &session,
        URL_API,
        FetchOptions::default().method("POST").body(""),
    )?;
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Network));
    assert_eq!(phases(&pending.observations()), rejected(FetchError::Network));

    // The cause travels with the completion
    let transport = pending.transport();
    assert_eq!(
        transport.completion().await,
        Err(TransportError::Handler {
            reason: "nope".to_string()
        })
    );
    assert_eq!(transport.outcome(), Outcome::Errored);
    assert_eq!(transport.status(), 0);
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_is_a_network_error() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, _res| -> ResponseBuilder {
        panic!("handler bug")
    });

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Network));
    assert_eq!(
        pending.transport().error(),
        Some(TransportError::Handler {
            reason: "handler bug".to_string()
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_unmatched_request_errors_instead_of_hanging() -> anyhow::Result<()> {
    let session = installed_session();
    session.get("http://localhost/other", |_req, res| res);

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Network));

    let error = pending.transport().error().expect("request failed");
    assert_eq!(
        error,
        TransportError::NoHandler {
            method: "GET".to_string(),
            url: URL_API.to_string()
        }
    );
    assert!(error.is_network_error());
    Ok(())
}

#[tokio::test]
async fn test_invalid_status_is_a_network_error() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res| res.status(42));

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Network));
    assert_eq!(
        pending.transport().error(),
        Some(TransportError::InvalidResponse { status: 42 })
    );
    Ok(())
}

#[tokio::test]
async fn test_abort_before_resolution_skips_handler() -> anyhow::Result<()> {
    let session = installed_session();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    session.post(URL_API, move |_req, res| {
        counter.fetch_add(1, Ordering::SeqCst);
        res.body("unreachable")
    });

    let pending = fetch(
        &session,
        URL_API,
        FetchOptions::default().method("POST").body("payload"),
    )?;
    pending.transport().abort();
    assert_eq!(pending.transport().ready_state(), ReadyState::Done);

    assert_eq!(pending.finish(&session).await?, Err(FetchError::Aborted));
    assert_eq!(phases(&pending.observations()), rejected(FetchError::Aborted));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_abort_during_resolution_discards_late_response() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res: ResponseBuilder| {
        HandlerReply::defer(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            res.body("late")
        })
    });

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    session.run_pending()?;
    assert_eq!(pending.observations(), vec![Observation::Start]);

    pending.transport().abort();
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Aborted));
    assert_eq!(phases(&pending.observations()), rejected(FetchError::Aborted));
    assert_eq!(pending.transport().response_text(), "");
    assert_eq!(pending.transport().outcome(), Outcome::Aborted);
    Ok(())
}

#[tokio::test]
async fn test_abort_is_idempotent() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res| res);

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    pending.transport().abort();
    pending.transport().abort();

    pending.finish(&session).await?;
    let aborts = pending
        .observations()
        .into_iter()
        .filter(|observation| *observation == Observation::Rejected(FetchError::Aborted))
        .count();
    assert_eq!(aborts, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res: ResponseBuilder| {
        HandlerReply::defer(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            res.body("too slow")
        })
    });

    let pending = fetch(
        &session,
        URL_API,
        FetchOptions::default().timeout(Duration::from_secs(1)),
    )?;
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Timeout));
    assert_eq!(phases(&pending.observations()), rejected(FetchError::Timeout));
    assert_eq!(pending.transport().outcome(), Outcome::TimedOut);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_from_config() -> anyhow::Result<()> {
    let mut config = TidelineConfig::deterministic_testing();
    config.transport.default_timeout = Some(Duration::from_millis(50));
    let session = Session::new(config);
    session.setup()?;
    session.get(URL_API, |_req, res: ResponseBuilder| {
        HandlerReply::defer(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            res
        })
    });

    let transport = session.create_transport()?;
    assert_eq!(transport.timeout(), Some(Duration::from_millis(50)));
    transport.open("GET", URL_API)?;
    transport.send(())?;

    assert_eq!(transport.completion().await, Err(TransportError::TimedOut));
    Ok(())
}

#[tokio::test]
async fn test_handler_can_simulate_timeout() -> anyhow::Result<()> {
    let session = installed_session();
    session.delete(URL_API, |_req, _res| HandlerReply::timeout());

    let pending = fetch(&session, URL_API, FetchOptions::default().method("DELETE"))?;
    assert_eq!(pending.finish(&session).await?, Err(FetchError::Timeout));
    assert_eq!(pending.transport().error(), Some(TransportError::TimedOut));
    Ok(())
}
