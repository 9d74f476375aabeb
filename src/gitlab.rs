//! GitLab repository file access
//!
//! Used by `version --check-for-updates` to read the latest `Chart.yaml` of the
//! Big Bang umbrella chart and of each package.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use url::form_urlencoded::byte_serialize;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitLabClient: Send + Sync {
    /// Contents of `path` in `repository` (a `group/project` path) at `branch`
    async fn get_file(&self, repository: &str, path: &str, branch: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct RepositoryFile {
    content: String,
    #[serde(default)]
    encoding: String,
}

/// [`GitLabClient`] over the GitLab REST API
pub struct RestGitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestGitLabClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    pub(crate) fn file_url(&self, repository: &str, path: &str, branch: &str) -> String {
        let project: String = byte_serialize(repository.as_bytes()).collect();
        let file: String = byte_serialize(path.as_bytes()).collect();
        let branch: String = byte_serialize(branch.as_bytes()).collect();
        format!(
            "{}/projects/{}/repository/files/{}?ref={}",
            self.base_url.trim_end_matches('/'),
            project,
            file,
            branch
        )
    }
}

#[async_trait]
impl GitLabClient for RestGitLabClient {
    async fn get_file(&self, repository: &str, path: &str, branch: &str) -> Result<Vec<u8>> {
        let mut request = self.http.get(self.file_url(repository, path, branch));
        if !self.token.is_empty() {
            request = request.header("PRIVATE-TOKEN", &self.token);
        }
        let response = request
            .send()
            .await
            .context("error downloading file from gitlab")?;
        let status = response.status();
        if !status.is_success() {
            bail!("error downloading file from gitlab: {}", status);
        }
        let file: RepositoryFile = response
            .json()
            .await
            .context("error downloading file from gitlab")?;
        if !file.encoding.is_empty() && file.encoding != "base64" {
            return Ok(file.content.into_bytes());
        }
        STANDARD
            .decode(file.content.replace('\n', ""))
            .context("error decoding file from gitlab")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_file_url_encoding() {
        let client = RestGitLabClient::new("https://repo1.dso.mil/api/v4/", "");
        assert_eq!(
            client.file_url("big-bang/bigbang", "chart/Chart.yaml", "master"),
            "https://repo1.dso.mil/api/v4/projects/big-bang%2Fbigbang/repository/files/chart%2FChart.yaml?ref=master"
        );
    }

    #[tokio::test]
    async fn test_get_file_decodes_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .query_param("ref", "master")
                    .header("PRIVATE-TOKEN", "secret");
                then.status(200).json_body(serde_json::json!({
                    "file_name": "Chart.yaml",
                    "encoding": "base64",
                    "content": STANDARD.encode("version: 2.41.0\n"),
                }));
            })
            .await;

        let client = RestGitLabClient::new(server.base_url(), "secret");
        let data = client
            .get_file("big-bang/bigbang", "chart/Chart.yaml", "master")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(data, b"version: 2.41.0\n");
    }

    #[tokio::test]
    async fn test_get_file_reports_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(404);
            })
            .await;

        let client = RestGitLabClient::new(server.base_url(), "");
        let err = client.get_file("a/b", "c", "main").await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
