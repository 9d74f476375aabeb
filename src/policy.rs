//! Admission policy discovery
//!
//! Gatekeeper and Kyverno register their policy kinds at runtime, so both are
//! discovered the same way: list the engine's CRDs by label, then list the
//! instances of every kind those CRDs define through the dynamic client. The
//! instances are reduced to engine-agnostic [`PolicyOutput`] records.

use crate::config::schema::PolicyConfiguration;
use crate::error::BbctlError;
use crate::factory::{self, Factory};
use crate::kube::{DynamicClient, GroupVersionResource, nested_str};
use crate::output::schemas::{CrdPolicyOutput, PolicyListOutput, PolicyOutput};
use anyhow::Result;
use kube::core::DynamicObject;
use std::fmt;

pub const GATEKEEPER_CONSTRAINTS_GROUP: &str = "constraints.gatekeeper.sh";
pub const GATEKEEPER_CONSTRAINTS_VERSION: &str = "v1beta1";
pub const KYVERNO_GROUP: &str = "kyverno.io";
pub const KYVERNO_VERSION: &str = "v1";

const KYVERNO_POLICY_CRD_SUFFIX: &str = "policies.kyverno.io";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyEngine {
    Gatekeeper,
    Kyverno,
}

impl PolicyEngine {
    /// The engine selected by `--gatekeeper` / `--kyverno`; exactly one must be set
    pub fn from_config(config: &PolicyConfiguration) -> Result<Self, BbctlError> {
        match (config.gatekeeper, config.kyverno) {
            (true, false) => Ok(PolicyEngine::Gatekeeper),
            (false, true) => Ok(PolicyEngine::Kyverno),
            _ => Err(BbctlError::AmbiguousPolicyEngine),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEngine::Gatekeeper => "Gatekeeper",
            PolicyEngine::Kyverno => "Kyverno",
        }
    }

    fn crd_label_selector(&self) -> &'static str {
        match self {
            PolicyEngine::Gatekeeper => "app.kubernetes.io/name=gatekeeper",
            PolicyEngine::Kyverno => "app.kubernetes.io/name=kyverno",
        }
    }

    fn description_annotation(&self) -> &'static str {
        match self {
            PolicyEngine::Gatekeeper => "constraints.gatekeeper/description",
            PolicyEngine::Kyverno => "policies.kyverno.io/description",
        }
    }

    fn action_field(&self) -> &'static str {
        match self {
            PolicyEngine::Gatekeeper => "enforcementAction",
            PolicyEngine::Kyverno => "validationFailureAction",
        }
    }

    fn empty_crd_message(&self) -> &'static str {
        match self {
            PolicyEngine::Gatekeeper => "No constraints found",
            PolicyEngine::Kyverno => "No policies found",
        }
    }

    /// Collection of the instances defined by `crd_name`
    pub fn policies_gvr(&self, crd_name: &str) -> GroupVersionResource {
        let (group, version) = match self {
            PolicyEngine::Gatekeeper => (GATEKEEPER_CONSTRAINTS_GROUP, GATEKEEPER_CONSTRAINTS_VERSION),
            PolicyEngine::Kyverno => (KYVERNO_GROUP, KYVERNO_VERSION),
        };
        GroupVersionResource::new(group, version, crd_short_name(crd_name))
    }

    /// The engine's policy CRDs
    pub async fn fetch_crds(&self, client: &dyn DynamicClient) -> Result<Vec<DynamicObject>> {
        let crds = client
            .list(&GroupVersionResource::crds(), None, Some(self.crd_label_selector()))
            .await?;
        Ok(match self {
            PolicyEngine::Gatekeeper => crds,
            PolicyEngine::Kyverno => crds
                .into_iter()
                .filter(|crd| object_name(crd).ends_with(KYVERNO_POLICY_CRD_SUFFIX))
                .collect(),
        })
    }

    /// Every instance of the kind defined by `crd_name`, in all namespaces
    pub async fn fetch_policies(
        &self,
        client: &dyn DynamicClient,
        crd_name: &str,
    ) -> Result<Vec<DynamicObject>> {
        client.list(&self.policies_gvr(crd_name), None, None).await
    }

    /// Reduce a policy or constraint to its descriptor
    ///
    /// Gatekeeper constraints are cluster scoped, so only Kyverno policies
    /// carry a namespace.
    pub fn descriptor(&self, obj: &DynamicObject) -> PolicyOutput {
        let namespace = match self {
            PolicyEngine::Gatekeeper => String::new(),
            PolicyEngine::Kyverno => obj.metadata.namespace.clone().unwrap_or_default(),
        };
        let description = obj
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(self.description_annotation()))
            .cloned()
            .unwrap_or_default();
        PolicyOutput {
            name: object_name(obj).to_string(),
            namespace,
            kind: obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            description,
            action: nested_str(&obj.data, &["spec", self.action_field()])
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl fmt::Display for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub(crate) fn object_name(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

/// `foos` for `foos.constraints.gatekeeper.sh`
pub fn crd_short_name(crd_name: &str) -> &str {
    crd_name.split('.').next().unwrap_or(crd_name)
}

/// Resolve the engine from configuration and list its policies
///
/// With `name`, only the matching constraint kind (Gatekeeper) or the policy
/// with that exact name (Kyverno) is reported.
pub async fn list_policies(factory: &dyn Factory, name: Option<&str>) -> Result<PolicyListOutput> {
    let config = factory::config_client(factory)?.get_config()?;
    let engine = PolicyEngine::from_config(&config.policy)?;
    match name {
        Some(name) => list_policies_by_name(factory, engine, name).await,
        None => list_all_policies(factory, engine).await,
    }
}

fn warn_kyverno_fetch(factory: &dyn Factory, err: &anyhow::Error) {
    if let Ok(logging) = factory.get_logging_client() {
        logging.warn(format!("Error getting kyverno policies: {:#}", err));
    }
}

pub async fn list_all_policies(
    factory: &dyn Factory,
    engine: PolicyEngine,
) -> Result<PolicyListOutput> {
    let client = factory.get_dynamic_client().await?;
    let crds = engine.fetch_crds(client.as_ref()).await?;

    let mut output = PolicyListOutput::default();
    if crds.is_empty() {
        output.messages.push(format!("No {} Policies Found", engine));
        return Ok(output);
    }
    output.messages.push(format!("{} Policies", engine));

    for crd in &crds {
        let crd_name = object_name(crd);
        let policies = match engine.fetch_policies(client.as_ref(), crd_name).await {
            Ok(policies) => policies,
            Err(err) => {
                if engine == PolicyEngine::Kyverno {
                    warn_kyverno_fetch(factory, &err);
                }
                return Err(err);
            }
        };
        output.crd_policies.push(CrdPolicyOutput {
            crd_name: crd_name.to_string(),
            message: if policies.is_empty() {
                engine.empty_crd_message().to_string()
            } else {
                String::new()
            },
            policies: policies.iter().map(|p| engine.descriptor(p)).collect(),
        });
    }
    Ok(output)
}

pub async fn list_policies_by_name(
    factory: &dyn Factory,
    engine: PolicyEngine,
    name: &str,
) -> Result<PolicyListOutput> {
    let client = factory.get_dynamic_client().await?;
    let mut output = PolicyListOutput::default();

    match engine {
        PolicyEngine::Gatekeeper => {
            let crd_name = format!("{}.{}", name, GATEKEEPER_CONSTRAINTS_GROUP);
            let constraints = engine.fetch_policies(client.as_ref(), &crd_name).await?;
            if constraints.is_empty() {
                output.messages.push(engine.empty_crd_message().to_string());
            }
            output.crd_policies.push(CrdPolicyOutput {
                crd_name,
                policies: constraints.iter().map(|c| engine.descriptor(c)).collect(),
                message: String::new(),
            });
        }
        PolicyEngine::Kyverno => {
            for crd in engine.fetch_crds(client.as_ref()).await? {
                let crd_name = object_name(&crd);
                let policies = match engine.fetch_policies(client.as_ref(), crd_name).await {
                    Ok(policies) => policies,
                    Err(err) => {
                        warn_kyverno_fetch(factory, &err);
                        return Err(err);
                    }
                };
                if let Some(policy) = policies.iter().find(|p| object_name(p) == name) {
                    output.crd_policies.push(CrdPolicyOutput {
                        crd_name: crd_name.to_string(),
                        policies: vec![engine.descriptor(policy)],
                        message: String::new(),
                    });
                    return Ok(output);
                }
            }
            output.messages.push("No Matching Policy Found".to_string());
        }
    }
    Ok(output)
}

/// Completion candidates for the policy name argument
///
/// Gatekeeper completes constraint kinds (CRD short names), Kyverno completes
/// policy names. Lookup failures yield no candidates.
pub async fn matching_policy_names(factory: &dyn Factory, hint: &str) -> Vec<String> {
    let engine = match factory::config_client(factory)
        .and_then(|c| c.get_config())
        .and_then(|config| Ok(PolicyEngine::from_config(&config.policy)?))
    {
        Ok(engine) => engine,
        Err(_) => return Vec::new(),
    };
    let Ok(client) = factory.get_dynamic_client().await else {
        return Vec::new();
    };
    let Ok(crds) = engine.fetch_crds(client.as_ref()).await else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    for crd in &crds {
        let crd_name = object_name(crd);
        match engine {
            PolicyEngine::Gatekeeper => {
                let short = crd_short_name(crd_name);
                if short.starts_with(hint) {
                    matches.push(short.to_string());
                }
            }
            PolicyEngine::Kyverno => match engine.fetch_policies(client.as_ref(), crd_name).await {
                Ok(policies) => matches.extend(
                    policies
                        .iter()
                        .map(object_name)
                        .filter(|n| n.starts_with(hint))
                        .map(str::to_string),
                ),
                Err(err) => {
                    warn_kyverno_fetch(factory, &err);
                    return Vec::new();
                }
            },
        }
    }
    matches
}
