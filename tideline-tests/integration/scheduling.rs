//! Deferred dispatch, interleaving and reproducibility.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use tideline_core::{HandlerReply, ResponseBuilder, TidelineConfig};
use tideline_sim::{EventKind, Session};

use crate::harness::{FetchOptions, Observation, URL_API, fetch, installed_session};

#[tokio::test]
async fn test_sync_handler_first_event_is_deferred() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res| res.body("immediate"));

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert!(pending.observations().is_empty());
    assert_eq!(pending.settled(), None);

    // A synchronous handler completes without awaiting anything
    session.run_pending()?;
    assert_eq!(pending.settled(), Some(Ok("immediate".to_string())));
    assert_eq!(pending.observations().first(), Some(&Observation::Start));
    Ok(())
}

#[tokio::test]
async fn test_async_handler_first_event_is_deferred() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res: ResponseBuilder| {
        HandlerReply::defer(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            res.body("eventually")
        })
    });

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert!(pending.observations().is_empty());

    session.run_pending()?;
    assert_eq!(pending.observations(), vec![Observation::Start]);
    assert_eq!(pending.settled(), None);

    assert_eq!(pending.finish(&session).await?, Ok("eventually".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_requests_start_in_send_order() -> anyhow::Result<()> {
    let session = installed_session();
    session.any(URL_API, |req, res| res.body(req.method.clone()));

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut transports = Vec::new();
    for method in ["GET", "POST", "PUT"] {
        let transport = session.create_transport()?;
        let log = order.clone();
        transport.add_event_listener(EventKind::LoadStart, move |_| log.lock().push(method));
        transport.open(method, URL_API)?;
        transport.send(())?;
        transports.push(transport);
    }

    session.run_until_idle().await?;
    assert_eq!(*order.lock(), vec!["GET", "POST", "PUT"]);
    for (transport, method) in transports.iter().zip(["GET", "POST", "PUT"]) {
        assert_eq!(transport.response_text(), method);
    }
    Ok(())
}

async fn observe_workload(seed: u64) -> anyhow::Result<Vec<Vec<Observation>>> {
    let mut config = TidelineConfig::deterministic_testing();
    config.scheduler.seed = seed;
    config.transport.max_progress_chunk = 64;
    let session = Session::new(config);
    session.setup()?;
    session.post(URL_API, |req, res| res.body(req.body.clone().unwrap_or_default()));

    let mut pending = Vec::new();
    for size in [10usize, 700, 3_000] {
        pending.push(fetch(
            &session,
            URL_API,
            FetchOptions::default().method("POST").body(vec![1u8; size]),
        )?);
    }
    session.run_until_idle().await?;

    Ok(pending.iter().map(|fetch| fetch.observations()).collect())
}

#[tokio::test]
async fn test_same_seed_same_observations() -> anyhow::Result<()> {
    let first = observe_workload(11).await?;
    let second = observe_workload(11).await?;
    assert_eq!(first, second);

    let other = observe_workload(12).await?;
    assert_ne!(first, other);
    Ok(())
}

proptest! {
    #[test]
    fn test_any_body_size_loads_completely(size in 0usize..20_000, seed in any::<u64>()) {
        let mut config = TidelineConfig::deterministic_testing();
        config.scheduler.seed = seed;
        let session = Session::new(config);
        session.setup().unwrap();
        session.get(URL_API, move |_req, res| res.body(vec![b'x'; size]));

        let transport = session.create_transport().unwrap();
        let marks = Arc::new(Mutex::new(Vec::new()));
        let sink = marks.clone();
        transport.add_event_listener(EventKind::Progress, move |event| {
            sink.lock().push((event.loaded, event.total));
        });
        transport.open("GET", URL_API).unwrap();
        transport.send(()).unwrap();

        let body = tokio_test::block_on(transport.completion()).unwrap();
        prop_assert_eq!(body.len(), size);

        let marks = marks.lock().clone();
        let total = size as u64;
        prop_assert!(!marks.is_empty());
        prop_assert!(marks.windows(2).all(|pair| pair[0].0 < pair[1].0));
        prop_assert_eq!(marks.last().copied(), Some((total, total)));
    }
}
