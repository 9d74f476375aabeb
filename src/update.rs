//! Release version checks
//!
//! Versions come from the GitLab tags of the bbctl project. A tag counts as a
//! release when its name is a semantic version (optionally `v`-prefixed), any
//! prerelease starts with `bb.`, and GitLab has a release attached to it. The
//! commit date of the tag is the release time.
//!
//! [`check`] fetches the running version and the latest release concurrently
//! and reports the difference as a [`Skew`].

use crate::constants::{BBCTL_TAGS_URL, BIG_BANG_CLI_VERSION};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Largest page GitLab serves
const TAGS_PAGE_SIZE: u32 = 100;

const PRERELEASE_PREFIX: &str = "bb.";

const STALE_AFTER_DAYS: i64 = 90;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("invalid semver: {0}")]
    InvalidSemver(String),

    #[error("{0}")]
    NoTags(String),

    #[error("{0}")]
    NoValidTags(String),
}

static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^v?(?P<major>0|[1-9][0-9]*)\.(?P<minor>0|[1-9][0-9]*)\.(?P<patch>0|[1-9][0-9]*)",
        r"(?:-(?P<prerelease>(?:0|[1-9][0-9]*|[0-9]*[a-zA-Z-][0-9a-zA-Z-]*)",
        r"(?:\.(?:0|[1-9][0-9]*|[0-9]*[a-zA-Z-][0-9a-zA-Z-]*))*))?",
        r"(?:\+(?P<buildmetadata>[0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$",
    ))
    .unwrap_or_else(|e| panic!("semver pattern does not compile: {}", e))
});

/// A released version of bbctl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: i64,
    pub minor: i64,
    pub patch: i64,
    pub prerelease: String,
    pub build_metadata: String,
    pub released_at: DateTime<Utc>,
}

impl Version {
    /// Parse `semver`, accepting and dropping a leading `v`
    pub fn parse(semver: &str, released_at: DateTime<Utc>) -> Result<Self, UpdateError> {
        let invalid = || UpdateError::InvalidSemver(semver.to_string());
        let caps = SEMVER.captures(semver).ok_or_else(invalid)?;
        let number = |name: &str| -> Result<i64, UpdateError> {
            caps.name(name)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .parse()
                .map_err(|_| invalid())
        };
        let text = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        Ok(Self {
            major: number("major")?,
            minor: number("minor")?,
            patch: number("patch")?,
            prerelease: text("prerelease"),
            build_metadata: text("buildmetadata"),
            released_at,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            write!(f, "-{}", self.prerelease)?;
        }
        if !self.build_metadata.is_empty() {
            write!(f, "+{}", self.build_metadata)?;
        }
        Ok(())
    }
}

/// How far `latest` is ahead of `current`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skew {
    current: Version,
    latest: Version,
    pub major: i64,
    pub minor: i64,
    pub patch: i64,
    pub time: TimeDelta,
}

impl Skew {
    pub fn new(current: Version, latest: Version) -> Self {
        Self {
            major: latest.major - current.major,
            minor: latest.minor - current.minor,
            patch: latest.patch - current.patch,
            time: latest.released_at - current.released_at,
            current,
            latest,
        }
    }

    /// Major, minor and patch all match; prerelease and build are ignored
    pub fn is_up_to_date(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0
    }

    pub fn has_major_update(&self) -> bool {
        self.major > 0
    }

    pub fn has_minor_update(&self) -> bool {
        self.minor > 0
    }

    pub fn has_patch_update(&self) -> bool {
        self.patch > 0
    }

    pub fn more_than(&self, duration: TimeDelta) -> bool {
        self.time > duration
    }

    pub fn current_version(&self) -> &Version {
        &self.current
    }

    pub fn latest_version(&self) -> &Version {
        &self.latest
    }
}

/// Source of one side of a [`Skew`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VersionFetcher: Send + Sync {
    async fn fetch(&self, http: &reqwest::Client) -> Result<Version>;
}

#[derive(Debug, Deserialize)]
struct TagCommit {
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
    commit: Option<TagCommit>,
    #[serde(default)]
    release: Option<Value>,
}

impl Tag {
    /// The version this tag releases, if it is a release tag
    fn release_version(&self) -> Option<Version> {
        let created_at = self.commit.as_ref()?.created_at?;
        let version = Version::parse(&self.name, created_at).ok()?;
        if !version.prerelease.is_empty() && !version.prerelease.starts_with(PRERELEASE_PREFIX) {
            return None;
        }
        self.release.as_ref().filter(|r| !r.is_null())?;
        Some(version)
    }
}

/// Every tag at `tag_url`, following `X-Next-Page` until it is empty
async fn fetch_tags(http: &reqwest::Client, tag_url: &str) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    let mut next_page = "1".to_string();
    while !next_page.is_empty() {
        let response = http
            .get(tag_url)
            .query(&[
                ("per_page", TAGS_PAGE_SIZE.to_string()),
                ("page", next_page.clone()),
            ])
            .send()
            .await
            .with_context(|| format!("fetching tags from {}", tag_url))?
            .error_for_status()
            .with_context(|| format!("fetching tags from {}", tag_url))?;
        next_page = response
            .headers()
            .get("X-Next-Page")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim()
            .to_string();
        let page: Vec<Tag> = response
            .json()
            .await
            .with_context(|| format!("decoding tags from {}", tag_url))?;
        tags.extend(page);
    }
    Ok(tags)
}

/// The first release tag in server order
pub struct GitLabLatestVersion {
    tag_url: String,
}

impl GitLabLatestVersion {
    pub fn new(tag_url: impl Into<String>) -> Self {
        Self {
            tag_url: tag_url.into(),
        }
    }
}

#[async_trait]
impl VersionFetcher for GitLabLatestVersion {
    async fn fetch(&self, http: &reqwest::Client) -> Result<Version> {
        let tags = fetch_tags(http, &self.tag_url)
            .await
            .with_context(|| format!("fetching latest release from {}", self.tag_url))?;
        if tags.is_empty() {
            return Err(UpdateError::NoTags(format!("no tags found in {}", self.tag_url)).into());
        }
        tags.iter()
            .find_map(Tag::release_version)
            .ok_or_else(|| {
                UpdateError::NoValidTags(format!("no valid tags found in {}", self.tag_url)).into()
            })
    }
}

/// The release tag matching a given version, carrying its release time
pub struct GitLabSpecificVersion {
    tag_url: String,
    version: String,
}

impl GitLabSpecificVersion {
    pub fn new(tag_url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            tag_url: tag_url.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl VersionFetcher for GitLabSpecificVersion {
    async fn fetch(&self, http: &reqwest::Client) -> Result<Version> {
        let wanted = Version::parse(&self.version, Utc::now())
            .with_context(|| format!("parsing current release from {}", self.version))?;
        let tags = fetch_tags(http, &self.tag_url)
            .await
            .with_context(|| format!("fetching specific release from {}", self.tag_url))?;
        if tags.is_empty() {
            return Err(UpdateError::NoTags(format!("no tags found in {}", self.tag_url)).into());
        }
        tags.iter()
            .filter_map(Tag::release_version)
            .find(|v| Skew::new(wanted.clone(), v.clone()).is_up_to_date())
            .ok_or_else(|| {
                UpdateError::NoValidTags(format!(
                    "tag {} not found in {}",
                    self.version, self.tag_url
                ))
                .into()
            })
    }
}

/// What [`check`] compares and how it reaches GitLab
pub struct CheckOptions {
    current: Box<dyn VersionFetcher>,
    latest: Box<dyn VersionFetcher>,
    http: reqwest::Client,
}

impl Default for CheckOptions {
    fn default() -> Self {
        let current = if BIG_BANG_CLI_VERSION.is_empty() {
            "0.0.0"
        } else {
            BIG_BANG_CLI_VERSION
        };
        Self {
            current: Box::new(GitLabSpecificVersion::new(BBCTL_TAGS_URL, current)),
            latest: Box::new(GitLabLatestVersion::new(BBCTL_TAGS_URL)),
            http: reqwest::Client::new(),
        }
    }
}

impl CheckOptions {
    pub fn with_current_version_fetcher(mut self, fetcher: impl VersionFetcher + 'static) -> Self {
        self.current = Box::new(fetcher);
        self
    }

    pub fn with_latest_version_fetcher(mut self, fetcher: impl VersionFetcher + 'static) -> Self {
        self.latest = Box::new(fetcher);
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

/// Fetch both versions concurrently; the first failure wins and the other fetch is dropped
pub async fn check(options: CheckOptions) -> Result<Skew> {
    let current = async {
        options
            .current
            .fetch(&options.http)
            .await
            .context("fetching current version")
    };
    let latest = async {
        options
            .latest
            .fetch(&options.http)
            .await
            .context("fetching latest version")
    };
    let (current, latest) = tokio::try_join!(current, latest)?;
    Ok(Skew::new(current, latest))
}

/// The upgrade notice to print before running a command, if any
pub fn upgrade_notice(skew: &Skew) -> Option<String> {
    if skew.is_up_to_date() {
        return None;
    }
    let latest = skew.latest_version();
    if skew.more_than(TimeDelta::days(STALE_AFTER_DAYS)) {
        Some(format!(
            "UPGRADE AVAILABLE: Your version of bbctl is more than {} days old. Version {} is available. You are strongly encouraged to upgrade.",
            STALE_AFTER_DAYS, latest
        ))
    } else if skew.has_major_update() {
        Some(format!(
            "UPGRADE AVAILABLE: Version {} is available. You are strongly encouraged to upgrade.",
            latest
        ))
    } else if skew.has_minor_update() || skew.has_patch_update() {
        Some(format!(
            "UPGRADE AVAILABLE: Version {} is available. Consider upgrading.",
            latest
        ))
    } else {
        None
    }
}
