//! Route matching policy as seen from a request.

use regex::Regex;
use tideline_core::{HandlerReply, RequestDescriptor, UrlMatcher};

use crate::harness::{FetchOptions, URL_API, fetch, installed_session};

#[tokio::test]
async fn test_first_registered_match_wins() -> anyhow::Result<()> {
    let session = installed_session();
    session
        .get(UrlMatcher::Prefix("http://localhost/".to_string()), |_req, res| {
            res.body("prefix")
        })
        .get(URL_API, |_req, res| res.body("exact"));

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(pending.finish(&session).await?, Ok("prefix".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_pass_through_falls_back_to_next_route() -> anyhow::Result<()> {
    let session = installed_session();
    session
        .any(URL_API, |req: &RequestDescriptor, res| {
            if req.header("Authorization").is_some() {
                HandlerReply::from(res.body("authorized"))
            } else {
                HandlerReply::pass_through()
            }
        })
        .get(URL_API, |_req, res| res.status(401).body("anonymous"));

    let anonymous = fetch(&session, URL_API, FetchOptions::default())?;
    let authorized = fetch(
        &session,
        URL_API,
        FetchOptions::default().header("Authorization", "Bearer token"),
    )?;
    session.run_until_idle().await?;

    assert_eq!(anonymous.settled(), Some(Ok("anonymous".to_string())));
    assert_eq!(anonymous.transport().status(), 401);
    assert_eq!(authorized.settled(), Some(Ok("authorized".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_method_must_match() -> anyhow::Result<()> {
    let session = installed_session();
    session.post(URL_API, |_req, res| res.body("posted"));

    let get = fetch(&session, URL_API, FetchOptions::default())?;
    let post = fetch(&session, URL_API, FetchOptions::default().method("post"))?;
    session.run_until_idle().await?;

    assert!(matches!(get.settled(), Some(Err(_))));
    assert_eq!(post.settled(), Some(Ok("posted".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_regex_and_predicate_matchers() -> anyhow::Result<()> {
    let session = installed_session();
    session
        .get(Regex::new(r"^http://localhost/items/\d+$")?, |req, res| {
            let id = req.url.rsplit('/').next().unwrap_or_default().to_string();
            res.body(format!("item {id}"))
        })
        .register(
            "*",
            UrlMatcher::predicate(|req| req.header("X-Feature") == Some("beta")),
            |_req, res| res.body("beta"),
        );

    let item = fetch(&session, "http://localhost/items/42", FetchOptions::default())?;
    let beta = fetch(
        &session,
        "http://localhost/anything",
        FetchOptions::default().method("PATCH").header("X-Feature", "beta"),
    )?;
    let neither = fetch(&session, "http://localhost/items/abc", FetchOptions::default())?;
    session.run_until_idle().await?;

    assert_eq!(item.settled(), Some(Ok("item 42".to_string())));
    assert_eq!(beta.settled(), Some(Ok("beta".to_string())));
    assert!(matches!(neither.settled(), Some(Err(_))));
    Ok(())
}

#[tokio::test]
async fn test_exact_urls_compare_normalized() -> anyhow::Result<()> {
    let session = installed_session();
    session.get("HTTP://LOCALHOST:80/api", |_req, res| res.body("normalized"));

    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    assert_eq!(pending.finish(&session).await?, Ok("normalized".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_routes_registered_before_start_apply() -> anyhow::Result<()> {
    let session = installed_session();

    // Matching happens on the start turn, not inside send
    let pending = fetch(&session, URL_API, FetchOptions::default())?;
    session.get(URL_API, |_req, res| res.body("just in time"));

    assert_eq!(pending.finish(&session).await?, Ok("just in time".to_string()));
    Ok(())
}
