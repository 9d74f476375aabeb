//! Policy violation discovery
//!
//! An engine is considered installed when its policy CRDs exist. Gatekeeper
//! reports deny violations as `FailedAdmission` events and audit violations in
//! the status of each constraint. Kyverno reports both as `PolicyViolation`
//! events, told apart by the component that emitted them.

use crate::factory::{self, Factory};
use crate::kube::{DynamicClient, K8sClient, nested_str, nested_value};
use crate::log::LoggingClient;
use crate::output::schemas::{Violation, ViolationsOutput};
use crate::policy::{PolicyEngine, object_name};
use anyhow::{Result, bail};
use chrono::SecondsFormat;
use k8s_openapi::api::core::v1::Event;
use kube::core::DynamicObject;
use serde_json::Value;

pub const KYVERNO_ADMISSION_SOURCE: &str = "admission-controller";
pub const KYVERNO_AUDIT_SOURCE: &str = "policy-controller";

/// Resource name reported for Kyverno admission events
const NOT_APPLICABLE: &str = "NA";

const GATEKEEPER_DENY_HINT: &str = "No deny violations events found in cluster.\n\
Do you have the following values defined for the gatekeeper chart?\n\
gatekeeper:\n\
\temitAdmissionEvents: true\n\
\tlogDenies: true\n\
Note that violations in dryrun and warn mode are not effected by these settings.\n\
To list dryrun violations, use --audit flag.";

/// Where to look and what to keep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationQuery {
    /// Empty keeps every namespace
    pub namespace: String,
    pub audit: bool,
}

impl ViolationQuery {
    fn keeps(&self, namespace: &str) -> bool {
        self.namespace.is_empty() || self.namespace == namespace
    }
}

/// Collect violations from every installed engine
///
/// Failures are gathered per engine so one engine's error does not hide the
/// other's; any failure fails the whole call.
pub async fn list_violations(factory: &dyn Factory) -> Result<ViolationsOutput> {
    let config = factory::config_client(factory)?.get_config()?;
    let query = ViolationQuery {
        namespace: config.k8s.namespace.clone(),
        audit: config.violations.audit,
    };
    let dynamic = factory.get_dynamic_client().await?;
    let k8s = factory.get_k8s_client().await?;
    let logger = factory.get_logging_client()?;

    let mut errors = Vec::new();
    let mut violations = Vec::new();

    let gatekeeper_found = engine_installed(dynamic.as_ref(), PolicyEngine::Gatekeeper)
        .await
        .unwrap_or_else(|e| {
            errors.push(e);
            false
        });
    let kyverno_found = engine_installed(dynamic.as_ref(), PolicyEngine::Kyverno)
        .await
        .unwrap_or_else(|e| {
            errors.push(e);
            false
        });

    if gatekeeper_found {
        logger.debug("Gatekeeper exists in cluster. Checking for Gatekeeper violations.");
        let found = if query.audit {
            gatekeeper_audit_violations(dynamic.as_ref(), &query, &logger).await
        } else {
            gatekeeper_deny_violations(k8s.as_ref(), &query, &logger).await
        };
        match found {
            Ok(found) => violations.extend(found),
            Err(e) => errors.push(e.context("error listing gatekeeper violations")),
        }
    }

    if kyverno_found {
        logger.debug("Kyverno exists in cluster. Checking for Kyverno violations.");
        match kyverno_violations(k8s.as_ref(), &query, &logger).await {
            Ok(found) => violations.extend(found),
            Err(e) => errors.push(e.context("error listing kyverno violations")),
        }
    }

    if !errors.is_empty() {
        let joined: Vec<String> = errors.iter().map(|e| format!("{:#}", e)).collect();
        bail!(
            "errors occurred while listing violations: [{}]",
            joined.join(", ")
        );
    }

    Ok(violations_output(violations, &query, &logger))
}

fn violations_output(
    violations: Vec<Violation>,
    query: &ViolationQuery,
    logger: &LoggingClient,
) -> ViolationsOutput {
    if violations.is_empty() {
        logger.debug("No violations found in cluster.");
        let name = if query.audit {
            "No violations found in audit"
        } else {
            "No violations found"
        };
        return ViolationsOutput {
            name: name.to_string(),
            violations,
        };
    }
    logger.debug("Violations found in cluster.");
    ViolationsOutput {
        name: "Violations".to_string(),
        violations,
    }
}

async fn engine_installed(client: &dyn DynamicClient, engine: PolicyEngine) -> Result<bool> {
    Ok(!engine.fetch_crds(client).await?.is_empty())
}

fn annotation<'a>(event: &'a Event, key: &str) -> &'a str {
    event
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

fn event_timestamp(event: &Event) -> String {
    event
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

pub async fn gatekeeper_deny_violations(
    k8s: &dyn K8sClient,
    query: &ViolationQuery,
    logger: &LoggingClient,
) -> Result<Vec<Violation>> {
    let events = k8s.list_events("reason=FailedAdmission").await?;
    let violations: Vec<Violation> = events
        .iter()
        .filter(|event| query.keeps(annotation(event, "resource_namespace")))
        .map(|event| Violation {
            name: annotation(event, "resource_name").to_string(),
            kind: annotation(event, "resource_kind").to_string(),
            namespace: annotation(event, "resource_namespace").to_string(),
            constraint: format!(
                "{}:{}",
                annotation(event, "constraint_kind").to_lowercase(),
                annotation(event, "constraint_name")
            ),
            message: event.message.clone().unwrap_or_default(),
            timestamp: event_timestamp(event),
            ..Default::default()
        })
        .collect();

    if violations.is_empty() {
        logger.info(GATEKEEPER_DENY_HINT);
    }
    Ok(violations)
}

pub async fn gatekeeper_audit_violations(
    client: &dyn DynamicClient,
    query: &ViolationQuery,
    logger: &LoggingClient,
) -> Result<Vec<Violation>> {
    let engine = PolicyEngine::Gatekeeper;
    let crds = engine.fetch_crds(client).await?;
    if crds.is_empty() {
        logger.debug("No gatekeeper audit violations found in cluster.");
        return Ok(Vec::new());
    }

    let mut violations = Vec::new();
    for crd in &crds {
        let crd_name = object_name(crd);
        for constraint in engine.fetch_policies(client, crd_name).await? {
            let found = constraint_violations(&constraint);
            if found.is_empty() {
                continue;
            }
            logger.debug(format!("Custom resource definitions: {}", crd_name));
            let before = violations.len();
            violations.extend(found.into_iter().filter(|v| query.keeps(&v.namespace)));
            if violations.len() == before {
                logger.debug("No violations found while processing gatekeeper violation audit.");
            }
        }
    }
    Ok(violations)
}

/// Audit results recorded in a constraint's status
///
/// Entries without a `constraint` field are attributed to the constraint they
/// were read from.
pub fn constraint_violations(constraint: &DynamicObject) -> Vec<Violation> {
    let timestamp = nested_str(&constraint.data, &["status", "auditTimestamp"])
        .unwrap_or_default()
        .to_string();
    let kind = constraint
        .types
        .as_ref()
        .map(|t| t.kind.to_lowercase())
        .unwrap_or_default();
    let own_name = format!("{}:{}", kind, object_name(constraint));

    let field = |details: &Value, key: &str| {
        details
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    nested_value(&constraint.data, &["status", "violations"])
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|details| {
                    let constraint = field(details, "constraint");
                    Violation {
                        name: field(details, "name"),
                        kind: field(details, "kind"),
                        namespace: field(details, "namespace"),
                        constraint: if constraint.is_empty() {
                            own_name.clone()
                        } else {
                            constraint
                        },
                        message: field(details, "message"),
                        action: field(details, "enforcementAction"),
                        timestamp: timestamp.clone(),
                        ..Default::default()
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

pub async fn kyverno_violations(
    k8s: &dyn K8sClient,
    query: &ViolationQuery,
    logger: &LoggingClient,
) -> Result<Vec<Violation>> {
    let events = k8s.list_events("reason=PolicyViolation").await?;
    let mut violations = Vec::new();
    for event in &events {
        let namespace = event.metadata.namespace.as_deref().unwrap_or_default();
        if !query.keeps(namespace) {
            continue;
        }

        let component = event
            .source
            .as_ref()
            .and_then(|s| s.component.as_deref())
            .unwrap_or_default();
        let admission = component == KYVERNO_ADMISSION_SOURCE;
        let audit = component == KYVERNO_AUDIT_SOURCE;
        if (query.audit && admission) || (!query.audit && audit) {
            continue;
        }

        // admission events point at the policy, not the resource
        let involved = event.involved_object.name.clone().unwrap_or_default();
        let (name, policy) = if admission {
            (NOT_APPLICABLE.to_string(), involved)
        } else {
            (involved, String::new())
        };

        violations.push(Violation {
            name,
            kind: event.involved_object.kind.clone().unwrap_or_default(),
            namespace: namespace.to_string(),
            policy,
            message: event.message.clone().unwrap_or_default(),
            timestamp: event_timestamp(event),
            ..Default::default()
        });
    }

    if violations.is_empty() {
        logger.debug("No kyverno violations found in cluster.");
    }
    Ok(violations)
}
