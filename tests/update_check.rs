//! Update check tests
//!
//! GitLab is served by an httpmock server; fixed fetchers stand in for it
//! where only the comparison matters.

use anyhow::Result;
use async_trait::async_trait;
use bbctl::update::{
    self, CheckOptions, GitLabLatestVersion, GitLabSpecificVersion, UpdateError, Version,
    VersionFetcher,
};
use chrono::{DateTime, TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;

const TAGS_PATH: &str = "/api/v4/projects/1234/repository/tags";

fn released_at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

fn tag(name: &str, day: u32, released: bool) -> serde_json::Value {
    let release = if released {
        json!({"tag_name": name})
    } else {
        serde_json::Value::Null
    };
    json!({
        "name": name,
        "commit": {"created_at": released_at(day).to_rfc3339()},
        "release": release,
    })
}

/// Serve `pages` in order, linking them with `X-Next-Page`
async fn serve_tags(server: &MockServer, pages: Vec<Vec<serde_json::Value>>) {
    let count = pages.len();
    for (i, page) in pages.into_iter().enumerate() {
        let number = (i + 1).to_string();
        let next = if i + 1 < count { (i + 2).to_string() } else { String::new() };
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(TAGS_PATH)
                    .query_param("per_page", "100")
                    .query_param("page", number);
                then.status(200)
                    .header("X-Next-Page", next)
                    .json_body(serde_json::Value::Array(page));
            })
            .await;
    }
}

struct FixedVersion(Version);

#[async_trait]
impl VersionFetcher for FixedVersion {
    async fn fetch(&self, _http: &reqwest::Client) -> Result<Version> {
        Ok(self.0.clone())
    }
}

fn fixed(version: &str, day: u32) -> FixedVersion {
    FixedVersion(Version::parse(version, released_at(day)).unwrap())
}

#[tokio::test]
async fn test_latest_version_follows_pages() {
    let server = MockServer::start_async().await;
    serve_tags(
        &server,
        vec![
            vec![
                tag("v2.0.0-rc.1", 20, true),
                tag("v1.9.0", 18, false),
                tag("nightly", 17, true),
            ],
            vec![tag("v1.8.0-bb.2", 10, true), tag("v1.7.0", 1, true)],
        ],
    )
    .await;

    let fetcher = GitLabLatestVersion::new(server.url(TAGS_PATH));
    let latest = fetcher.fetch(&reqwest::Client::new()).await.unwrap();
    assert_eq!(latest.to_string(), "1.8.0-bb.2");
    assert_eq!(latest.released_at, released_at(10));
}

#[tokio::test]
async fn test_latest_version_without_tags() {
    let server = MockServer::start_async().await;
    serve_tags(&server, vec![vec![]]).await;

    let url = server.url(TAGS_PATH);
    let err = GitLabLatestVersion::new(url.clone())
        .fetch(&reqwest::Client::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<UpdateError>(),
        Some(&UpdateError::NoTags(format!("no tags found in {}", url)))
    );
}

#[tokio::test]
async fn test_specific_version_lookup() {
    let server = MockServer::start_async().await;
    serve_tags(
        &server,
        vec![vec![tag("v1.3.0", 15, true), tag("v1.2.3", 3, true)]],
    )
    .await;
    let url = server.url(TAGS_PATH);
    let http = reqwest::Client::new();

    let found = GitLabSpecificVersion::new(url.clone(), "1.2.3")
        .fetch(&http)
        .await
        .unwrap();
    assert_eq!(found.released_at, released_at(3));

    let err = GitLabSpecificVersion::new(url.clone(), "9.9.9")
        .fetch(&http)
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<UpdateError>(),
        Some(&UpdateError::NoValidTags(format!(
            "tag 9.9.9 not found in {}",
            url
        )))
    );
}

#[tokio::test]
async fn test_check_against_gitlab() {
    let server = MockServer::start_async().await;
    serve_tags(
        &server,
        vec![vec![tag("v1.3.0", 15, true), tag("v1.2.3", 3, true)]],
    )
    .await;
    let url = server.url(TAGS_PATH);

    let skew = update::check(
        CheckOptions::default()
            .with_current_version_fetcher(GitLabSpecificVersion::new(url.clone(), "v1.2.3"))
            .with_latest_version_fetcher(GitLabLatestVersion::new(url))
            .with_http_client(reqwest::Client::new()),
    )
    .await
    .unwrap();

    assert!(!skew.is_up_to_date());
    assert!(skew.has_minor_update());
    assert_eq!(skew.time, chrono::TimeDelta::days(12));
    assert_eq!(
        update::upgrade_notice(&skew).as_deref(),
        Some("UPGRADE AVAILABLE: Version 1.3.0 is available. Consider upgrading.")
    );
}

#[tokio::test]
async fn test_same_version_is_up_to_date() {
    let skew = update::check(
        CheckOptions::default()
            .with_current_version_fetcher(fixed("1.2.3", 1))
            .with_latest_version_fetcher(fixed("1.2.3", 1)),
    )
    .await
    .unwrap();

    assert!(skew.is_up_to_date());
    assert_eq!(skew.current_version().to_string(), "1.2.3");
    assert_eq!(skew.latest_version().to_string(), "1.2.3");
    assert_eq!(update::upgrade_notice(&skew), None);
}

#[tokio::test]
async fn test_major_update_notice() {
    let skew = update::check(
        CheckOptions::default()
            .with_current_version_fetcher(fixed("1.2.3", 1))
            .with_latest_version_fetcher(fixed("v2.0.0", 20)),
    )
    .await
    .unwrap();

    assert!(skew.has_major_update());
    assert_eq!(
        update::upgrade_notice(&skew).as_deref(),
        Some("UPGRADE AVAILABLE: Version 2.0.0 is available. You are strongly encouraged to upgrade.")
    );
}

#[tokio::test]
async fn test_server_error_fails_check() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(TAGS_PATH);
            then.status(500);
        })
        .await;

    let err = update::check(
        CheckOptions::default()
            .with_current_version_fetcher(fixed("1.2.3", 1))
            .with_latest_version_fetcher(GitLabLatestVersion::new(server.url(TAGS_PATH))),
    )
    .await
    .unwrap_err();
    assert!(format!("{:#}", err).starts_with("fetching latest version"));
}
