//! Dotted-key lookup over the resolved configuration
//!
//! `config view policy.gatekeeper` walks the serialized configuration one YAML
//! tag at a time. Tags match exactly (case-sensitive).

use super::schema::GlobalConfiguration;
use crate::error::BbctlError;
use serde_yaml::Value;

/// Render the value at `key` as a string
pub fn find_config(config: &GlobalConfiguration, key: &str) -> Result<String, BbctlError> {
    let tree = serde_yaml::to_value(config).map_err(|e| BbctlError::Fatal(e.to_string()))?;
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(BbctlError::InvalidKey);
    }
    find_recursive(&tree, &parts)
}

fn find_recursive(value: &Value, keys: &[&str]) -> Result<String, BbctlError> {
    let Some((field, rest)) = keys.split_first() else {
        return Err(BbctlError::InvalidKey);
    };
    let child = match value {
        Value::Mapping(map) => map.iter().find_map(|(k, v)| match k {
            Value::String(tag) if tag == field => Some(v),
            _ => None,
        }),
        _ => None,
    };
    match child {
        Some(v) if rest.is_empty() => Ok(render(v)),
        Some(v @ Value::Mapping(_)) => find_recursive(v, rest),
        _ => Err(BbctlError::NoSuchField((*field).to_string())),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        Value::Mapping(_) | Value::Tagged(_) => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PolicyConfiguration;

    fn config() -> GlobalConfiguration {
        GlobalConfiguration {
            big_bang_repo: "/src/bigbang".into(),
            log_level: "testLogLevel".into(),
            policy: PolicyConfiguration {
                gatekeeper: true,
                kyverno: false,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_top_level_and_nested_keys() {
        let config = config();
        assert_eq!(find_config(&config, "bbctl-log-level").unwrap(), "testLogLevel");
        assert_eq!(find_config(&config, "policy.gatekeeper").unwrap(), "true");
        assert_eq!(find_config(&config, "policy.kyverno").unwrap(), "false");
        assert_eq!(find_config(&config, "preflight-check.retrycount").unwrap(), "0");
    }

    #[test]
    fn test_unknown_fields() {
        let config = config();
        assert_eq!(
            find_config(&config, "nope"),
            Err(BbctlError::NoSuchField("nope".into()))
        );
        assert_eq!(
            find_config(&config, "policy.istio"),
            Err(BbctlError::NoSuchField("istio".into()))
        );
        assert_eq!(
            find_config(&config, "big-bang-repo.deeper"),
            Err(BbctlError::NoSuchField("big-bang-repo".into()))
        );
        // tags are case-sensitive
        assert_eq!(
            find_config(&config, "Policy.gatekeeper"),
            Err(BbctlError::NoSuchField("Policy".into()))
        );
    }

    #[test]
    fn test_empty_segments_are_invalid() {
        let config = config();
        assert_eq!(find_config(&config, ""), Err(BbctlError::InvalidKey));
        assert_eq!(find_config(&config, "policy."), Err(BbctlError::InvalidKey));
    }
}
