//! Successful request lifecycles observed through the fetch wrapper.

use serde::{Deserialize, Serialize};
use tideline_core::{CredentialsMode, ResponseBuilder};
use tideline_sim::{EventKind, Outcome};

use crate::harness::{FetchOptions, Observation, URL_API, fetch, installed_session, phases};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    item: String,
}

#[tokio::test]
async fn test_post_round_trip() -> anyhow::Result<()> {
    let session = installed_session();
    session.post(URL_API, |_req, res| {
        res.status(201)
            .header("Content-type", "image/jpeg")
            .body("Hello World!")
    });

    let pending = fetch(
        &session,
        URL_API,
        FetchOptions::default()
            .method("POST")
            .header("Content-type", "12")
            .body(""),
    )?;
    let result = pending.finish(&session).await?;
    assert_eq!(result, Ok("Hello World!".to_string()));

    let observations = pending.observations();
    assert_eq!(
        phases(&observations),
        vec![
            Observation::Start,
            Observation::Fulfilled("Hello World!".to_string()),
            Observation::End,
        ]
    );
    // An empty upload still reports progress once
    assert!(observations.contains(&Observation::Progress { loaded: 0, total: 0 }));

    let transport = pending.transport();
    assert_eq!(transport.outcome(), Outcome::Loaded);
    assert_eq!(transport.status(), 201);
    assert_eq!(
        transport.response_header("content-type").as_deref(),
        Some("image/jpeg")
    );
    assert_eq!(transport.completion().await?, "Hello World!");

    let captured = session.captured_requests();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].header("content-type"), Some("12"));
    assert_eq!(captured[0].body.as_deref(), Some(&b""[..]));
    Ok(())
}

#[tokio::test]
async fn test_wrapper_listeners_are_removed_on_loadend() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res| res.body("ok"));

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    pending.finish(&session).await?;

    let transport = pending.transport();
    for kind in EventKind::ALL {
        assert_eq!(transport.events().listener_count(kind), 0, "{kind}");
        assert_eq!(transport.upload().listener_count(kind), 0, "upload.{kind}");
    }
    Ok(())
}

#[tokio::test]
async fn test_json_round_trip() -> anyhow::Result<()> {
    let session = installed_session();
    session.put(
        "http://localhost/orders/7",
        |req, res: ResponseBuilder| -> Result<ResponseBuilder, serde_json::Error> {
            let order: Order = req.json()?;
            res.json(&Order {
                id: order.id,
                item: order.item.to_uppercase(),
            })
        },
    );

    let body = serde_json::to_string(&Order {
        id: 7,
        item: "kettle".to_string(),
    })?;
    let pending = fetch(
        &session,
        "http://localhost/orders/7",
        FetchOptions::default()
            .method("put")
            .header("Content-Type", "application/json")
            .body(body)
            .include_credentials(),
    )?;

    let text = pending.finish(&session).await?.map_err(anyhow::Error::new)?;
    let order: Order = serde_json::from_str(&text)?;
    assert_eq!(
        order,
        Order {
            id: 7,
            item: "KETTLE".to_string()
        }
    );
    assert_eq!(
        pending.transport().response_header("Content-Type").as_deref(),
        Some("application/json")
    );

    let request = pending.transport().request().expect("request was sent");
    assert_eq!(request.method, "PUT");
    assert_eq!(request.credentials, CredentialsMode::Include);
    Ok(())
}

#[tokio::test]
async fn test_invalid_json_body_fails_the_request() -> anyhow::Result<()> {
    let session = installed_session();
    session.post(
        URL_API,
        |req, res: ResponseBuilder| -> Result<ResponseBuilder, serde_json::Error> {
            let order: Order = req.json()?;
            Ok(res.body(order.item))
        },
    );

    let pending = fetch(
        &session,
        URL_API,
        FetchOptions::default().method("POST").body("not json"),
    )?;
    assert!(pending.finish(&session).await?.is_err());
    assert_eq!(pending.transport().outcome(), Outcome::Errored);
    Ok(())
}

#[tokio::test]
async fn test_large_upload_progress_is_monotonic() -> anyhow::Result<()> {
    let session = installed_session();
    session.post(URL_API, |_req, res| res.status(204));

    let pending = fetch(
        &session,
        URL_API,
        FetchOptions::default().method("POST").body(vec![0u8; 5_000]),
    )?;
    assert_eq!(pending.finish(&session).await?, Ok(String::new()));

    let progress: Vec<(u64, u64)> = pending
        .observations()
        .into_iter()
        .filter_map(|observation| match observation {
            Observation::Progress { loaded, total } => Some((loaded, total)),
            _ => None,
        })
        .collect();

    assert!(!progress.is_empty());
    assert!(progress.len() <= 64);
    assert!(progress.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert!(progress.iter().all(|(_, total)| *total == 5_000));
    assert_eq!(progress.last(), Some(&(5_000, 5_000)));
    Ok(())
}

#[tokio::test]
async fn test_status_text_defaults_to_reason_phrase() -> anyhow::Result<()> {
    let session = installed_session();
    session.get(URL_API, |_req, res| res.status(404).body("missing"));
    session.get("http://localhost/teapot", |_req, res| {
        res.status(418).status_text("Short and stout")
    });

    let missing = fetch(&session, URL_API, FetchOptions::default())?;
    let teapot = fetch(&session, "http://localhost/teapot", FetchOptions::default())?;
    session.run_until_idle().await?;

    // Error statuses are still successful loads
    assert_eq!(missing.settled(), Some(Ok("missing".to_string())));
    assert_eq!(missing.transport().status_text(), "Not Found");
    assert_eq!(teapot.transport().status_text(), "Short and stout");
    Ok(())
}
