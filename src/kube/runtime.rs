//! Flux custom resources
//!
//! The runtime client only serves kinds registered in its [`Scheme`]. Objects
//! are read unstructured; readiness comes from `status.conditions` which is
//! stable across Flux API versions.
//!
//! If the preferred API version is not served (404), older versions derived
//! from it are tried in turn: `v2` falls back to `v2beta2`, `v2beta1`, `v1`.

use super::dynamic::{GroupVersionResource, nested_value};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Flux kinds bbctl reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FluxKind {
    HelmRelease,
    GitRepository,
    Kustomization,
}

impl FluxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FluxKind::HelmRelease => "HelmRelease",
            FluxKind::GitRepository => "GitRepository",
            FluxKind::Kustomization => "Kustomization",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            FluxKind::HelmRelease,
            FluxKind::GitRepository,
            FluxKind::Kustomization,
        ]
    }

    pub fn group(&self) -> &'static str {
        match self {
            FluxKind::HelmRelease => "helm.toolkit.fluxcd.io",
            FluxKind::GitRepository => "source.toolkit.fluxcd.io",
            FluxKind::Kustomization => "kustomize.toolkit.fluxcd.io",
        }
    }

    /// Preferred API version
    pub fn version(&self) -> &'static str {
        match self {
            FluxKind::HelmRelease => "v2",
            FluxKind::GitRepository | FluxKind::Kustomization => "v1",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            FluxKind::HelmRelease => "helmreleases",
            FluxKind::GitRepository => "gitrepositories",
            FluxKind::Kustomization => "kustomizations",
        }
    }

    pub fn gvr(&self) -> GroupVersionResource {
        GroupVersionResource::new(self.group(), self.version(), self.plural())
    }

    /// `flux` CLI noun used in remediation hints
    pub fn flux_noun(&self) -> &'static str {
        match self {
            FluxKind::HelmRelease => "helmrelease",
            FluxKind::GitRepository => "source git",
            FluxKind::Kustomization => "kustomization",
        }
    }
}

impl fmt::Display for FluxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FluxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "helmrelease" | "helmreleases" | "hr" => Ok(FluxKind::HelmRelease),
            "gitrepository" | "gitrepositories" | "gitrepo" => Ok(FluxKind::GitRepository),
            "kustomization" | "kustomizations" | "ks" => Ok(FluxKind::Kustomization),
            _ => Err(format!("Unknown Flux resource kind: {}", s)),
        }
    }
}

/// The kinds a runtime client is allowed to serve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scheme {
    kinds: Vec<FluxKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheme with every [`FluxKind`] registered
    pub fn flux() -> Self {
        FluxKind::all()
            .iter()
            .fold(Self::new(), |scheme, kind| scheme.with(*kind))
    }

    pub fn with(mut self, kind: FluxKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn recognizes(&self, kind: FluxKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    fn scheme(&self) -> &Arc<Scheme>;

    /// List `kind`; `namespace: None` lists across all namespaces
    async fn list(&self, kind: FluxKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>>;
}

/// [`RuntimeClient`] backed by a kube-rs client
pub struct KubeRuntimeClient {
    client: Client,
    scheme: Arc<Scheme>,
}

impl KubeRuntimeClient {
    pub fn new(client: Client, scheme: Arc<Scheme>) -> Self {
        Self { client, scheme }
    }

    async fn list_version(
        &self,
        kind: FluxKind,
        version: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, kube::Error> {
        let gvr = GroupVersionResource::new(kind.group(), version, kind.plural());
        let resource = gvr.api_resource(kind.as_str());
        let api: Api<DynamicObject> = match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl RuntimeClient for KubeRuntimeClient {
    fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    async fn list(&self, kind: FluxKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        if !self.scheme.recognizes(kind) {
            bail!("kind {} is not registered in the scheme", kind);
        }

        let preferred = kind.version();
        let mut last_err = match self.list_version(kind, preferred, namespace).await {
            Ok(items) => return Ok(items),
            Err(e) if is_not_found(&e) => e,
            Err(e) => return Err(e).with_context(|| format!("error listing {}", kind)),
        };

        for version in fallback_versions(preferred) {
            match self.list_version(kind, &version, namespace).await {
                Ok(items) => {
                    tracing::debug!(
                        "using fallback version {} for {} (preferred {})",
                        version,
                        kind,
                        preferred
                    );
                    return Ok(items);
                }
                Err(e) if is_not_found(&e) => last_err = e,
                Err(e) => return Err(e).with_context(|| format!("error listing {}", kind)),
            }
        }
        Err(last_err).with_context(|| format!("error listing {}", kind))
    }
}

/// Older API versions to try after `preferred`, newest first
///
/// Stable versions fall back to their betas and alpha, then the previous
/// major's stable and betas. Betas fall back to lower betas and alpha.
pub(crate) fn fallback_versions(preferred: &str) -> Vec<String> {
    let Some(rest) = preferred.strip_prefix('v') else {
        return Vec::new();
    };
    let split = rest.find(|c: char| c.is_alphabetic()).unwrap_or(rest.len());
    let Ok(major) = rest[..split].parse::<u32>() else {
        return Vec::new();
    };
    let suffix = &rest[split..];

    let mut versions = Vec::new();
    if suffix.is_empty() {
        versions.push(format!("v{}beta2", major));
        versions.push(format!("v{}beta1", major));
        versions.push(format!("v{}alpha1", major));
        if major > 1 {
            versions.push(format!("v{}", major - 1));
            versions.push(format!("v{}beta2", major - 1));
            versions.push(format!("v{}beta1", major - 1));
        }
    } else if let Some(n) = suffix.strip_prefix("beta") {
        let n = n.parse::<u32>().unwrap_or(1);
        for lower in (1..n).rev() {
            versions.push(format!("v{}beta{}", major, lower));
        }
        versions.push(format!("v{}alpha1", major));
    }
    versions
}

/// A Flux object is ready when it carries condition `Ready=True`
pub fn is_ready(obj: &DynamicObject) -> bool {
    nested_value(&obj.data, &["status", "conditions"])
        .and_then(|conditions| conditions.as_array())
        .is_some_and(|conditions| {
            conditions.iter().any(|condition| {
                condition.get("type").and_then(|t| t.as_str()) == Some("Ready")
                    && condition.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_str() {
        assert_eq!("hr".parse::<FluxKind>(), Ok(FluxKind::HelmRelease));
        assert_eq!("GitRepository".parse::<FluxKind>(), Ok(FluxKind::GitRepository));
        assert_eq!("ks".parse::<FluxKind>(), Ok(FluxKind::Kustomization));
        assert!("OCIRepository".parse::<FluxKind>().is_err());
    }

    #[test]
    fn test_scheme() {
        let scheme = Scheme::new().with(FluxKind::HelmRelease).with(FluxKind::HelmRelease);
        assert!(scheme.recognizes(FluxKind::HelmRelease));
        assert!(!scheme.recognizes(FluxKind::Kustomization));
        assert!(Scheme::flux().recognizes(FluxKind::Kustomization));
    }

    #[test]
    fn test_fallback_versions() {
        assert_eq!(
            fallback_versions("v2"),
            vec!["v2beta2", "v2beta1", "v2alpha1", "v1", "v1beta2", "v1beta1"]
        );
        assert_eq!(fallback_versions("v1"), vec!["v1beta2", "v1beta1", "v1alpha1"]);
        assert_eq!(fallback_versions("v1beta2"), vec!["v1beta1", "v1alpha1"]);
        assert!(fallback_versions("latest").is_empty());
    }

    #[test]
    fn test_is_ready() {
        let mut obj = DynamicObject::new("podinfo", &FluxKind::HelmRelease.gvr().api_resource("HelmRelease"));
        assert!(!is_ready(&obj));

        obj.data = json!({"status": {"conditions": [
            {"type": "Released", "status": "True"},
            {"type": "Ready", "status": "False"}
        ]}});
        assert!(!is_ready(&obj));

        obj.data = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        assert!(is_ready(&obj));
    }
}
