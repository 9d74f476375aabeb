//! Ironbank registry access
//!
//! Resolves an image reference to its manifest digest using the registry1
//! credentials from the credential helper. Registries that answer with a
//! bearer challenge are handled by fetching a token from the advertised realm.

use crate::constants::REGISTRY1_HOST;
use crate::credential_helper::{PASSWORD, SharedCredentialHelper, USERNAME};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;
use std::collections::HashMap;

const MANIFEST_TYPES: &str = "application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.list.v2+json, application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

#[async_trait]
pub trait IronbankClient: Send + Sync {
    /// Manifest digest of `image`, without the `sha256:` prefix
    async fn get_image_sha(&self, image: &str) -> Result<String>;
}

/// A parsed `host/repository:tag` or `host/repository@digest` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self> {
        if image.is_empty() || image.contains(char::is_whitespace) {
            bail!("failed to parse image reference: {:?}", image);
        }
        let (registry, rest) = match image.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest)
            }
            _ => (REGISTRY1_HOST.to_string(), image),
        };
        let (repository, reference) = if let Some((repo, digest)) = rest.split_once('@') {
            (repo, digest)
        } else {
            match rest.rsplit_once(':') {
                Some((repo, tag)) if !tag.contains('/') => (repo, tag),
                _ => (rest, "latest"),
            }
        };
        if repository.is_empty() || reference.is_empty() {
            bail!("failed to parse image reference: {:?}", image);
        }
        Ok(Self {
            registry,
            repository: repository.to_string(),
            reference: reference.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

/// Parse `Bearer realm="..",service="..",scope=".."`
fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    let params = header.strip_prefix("Bearer ")?;
    let mut out = HashMap::new();
    for part in params.split("\",") {
        let (key, value) = part.split_once('=')?;
        out.insert(
            key.trim().to_string(),
            value.trim().trim_matches('"').to_string(),
        );
    }
    out.contains_key("realm").then_some(out)
}

/// [`IronbankClient`] over the OCI distribution API
pub struct RegistryIronbankClient {
    http: reqwest::Client,
    credentials: SharedCredentialHelper,
    scheme: String,
}

impl RegistryIronbankClient {
    pub fn new(credentials: SharedCredentialHelper) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            scheme: "https".to_string(),
        }
    }

    /// Talk plain http, for local registries
    pub fn insecure(mut self) -> Self {
        self.scheme = "http".to_string();
        self
    }

    async fn bearer_token(
        &self,
        challenge: &HashMap<String, String>,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = challenge.get("service") {
            query.push(("service", service));
        }
        if let Some(scope) = challenge.get("scope") {
            query.push(("scope", scope));
        }
        let realm = challenge
            .get("realm")
            .ok_or_else(|| anyhow!("registry challenge has no realm"))?;
        let response = self
            .http
            .get(realm)
            .query(&query)
            .basic_auth(username, Some(password))
            .send()
            .await
            .context("failed to get registry token")?
            .error_for_status()
            .context("failed to get registry token")?;
        let token: TokenResponse = response.json().await.context("failed to read registry token")?;
        Ok(if token.token.is_empty() {
            token.access_token
        } else {
            token.token
        })
    }
}

#[async_trait]
impl IronbankClient for RegistryIronbankClient {
    async fn get_image_sha(&self, image: &str) -> Result<String> {
        let username = self
            .credentials
            .get(USERNAME, REGISTRY1_HOST)
            .await
            .context("failed to get username")?;
        let password = self
            .credentials
            .get(PASSWORD, REGISTRY1_HOST)
            .await
            .context("failed to get password")?;

        let reference = ImageReference::parse(image)?;
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme, reference.registry, reference.repository, reference.reference
        );

        let mut response = self
            .http
            .head(&url)
            .header(ACCEPT, MANIFEST_TYPES)
            .basic_auth(&username, Some(&password))
            .send()
            .await
            .context("failed to get image description")?;

        if response.status() == StatusCode::UNAUTHORIZED
            && let Some(challenge) = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_bearer_challenge)
        {
            let token = self.bearer_token(&challenge, &username, &password).await?;
            response = self
                .http
                .head(&url)
                .header(ACCEPT, MANIFEST_TYPES)
                .bearer_auth(token)
                .send()
                .await
                .context("failed to get image description")?;
        }

        let response = response
            .error_for_status()
            .context("failed to get image description")?;
        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow!("registry returned no digest for {}", image))?;
        Ok(digest.trim_start_matches("sha256:").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential_helper::CredentialHelper;
    use httpmock::prelude::*;
    use std::sync::Arc;

    struct StaticCredentials;

    #[async_trait]
    impl CredentialHelper for StaticCredentials {
        async fn get(&self, component: &str, _uri: &str) -> Result<String> {
            Ok(format!("{}-value", component))
        }
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            ImageReference::parse("registry1.dso.mil/ironbank/opensource/nginx:1.25").unwrap(),
            ImageReference {
                registry: "registry1.dso.mil".into(),
                repository: "ironbank/opensource/nginx".into(),
                reference: "1.25".into(),
            }
        );
        let local = ImageReference::parse("localhost:5000/app@sha256:abc").unwrap();
        assert_eq!(local.registry, "localhost:5000");
        assert_eq!(local.reference, "sha256:abc");
        let bare = ImageReference::parse("ironbank/redhat/ubi/ubi8-minimal").unwrap();
        assert_eq!(bare.registry, REGISTRY1_HOST);
        assert_eq!(bare.reference, "latest");
        assert!(ImageReference::parse("").is_err());
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://registry1.dso.mil/service/token",service="harbor-registry",scope="repository:a/b:pull""#,
        )
        .unwrap();
        assert_eq!(challenge["realm"], "https://registry1.dso.mil/service/token");
        assert_eq!(challenge["service"], "harbor-registry");
        assert_eq!(challenge["scope"], "repository:a/b:pull");
        assert!(parse_bearer_challenge("Basic realm=\"x\"").is_none());
    }

    #[tokio::test]
    async fn test_digest_from_registry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::HEAD).path("/v2/ironbank/app/manifests/1.0.0");
                then.status(200)
                    .header("Docker-Content-Digest", "sha256:0123abcd");
            })
            .await;

        let client = RegistryIronbankClient::new(Arc::new(StaticCredentials)).insecure();
        let image = format!("{}/ironbank/app:1.0.0", server.address());
        assert_eq!(client.get_image_sha(&image).await.unwrap(), "0123abcd");
        mock.assert_async().await;
    }
}
