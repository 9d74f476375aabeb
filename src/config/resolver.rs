//! Layered key/value resolution
//!
//! Precedence order (highest to lowest):
//! 1. Explicit `set` overrides
//! 2. Flags given on the command line
//! 3. Environment variables (`big-bang-repo` reads `BIG_BANG_REPO`)
//! 4. The config file
//! 5. Registered defaults
//! 6. Flag defaults
//!
//! Keys are case-insensitive and dotted keys address nested config file maps.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Environment lookup used for automatic env binding
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Config file names tried in each search directory
const CONFIG_FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];

#[derive(Debug, Default)]
struct Layers {
    overrides: BTreeMap<String, Value>,
    flags: BTreeMap<String, Value>,
    file: Mapping,
    defaults: BTreeMap<String, Value>,
    flag_defaults: BTreeMap<String, Value>,
    config_file: Option<PathBuf>,
}

/// Shared, internally synchronized settings store
pub struct Resolver {
    layers: RwLock<Layers>,
    env: Option<EnvLookup>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("layers", &*self.read())
            .field("automatic_env", &self.env.is_some())
            .finish()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variable name for a key: non-alphanumerics become `_`, uppercased
pub fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn normalize(key: &str) -> String {
    key.to_lowercase()
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_yaml::to_value(value).unwrap_or(Value::Null)
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => items
            .iter()
            .map(scalar_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Mapping(_) | Value::Tagged(_) => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn lookup_path<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let first = parts.next()?;
    let mut current = find_key(map, first)?;
    for part in parts {
        current = match current {
            Value::Mapping(m) => find_key(m, part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn find_key<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::String(s) if s.eq_ignore_ascii_case(key) => Some(v),
        _ => None,
    })
}

fn flatten_into(prefix: &str, map: &Mapping, out: &mut BTreeSet<String>) {
    for (k, v) in map {
        let Some(k) = k.as_str() else { continue };
        let key = if prefix.is_empty() {
            normalize(k)
        } else {
            format!("{}.{}", prefix, normalize(k))
        };
        match v {
            Value::Mapping(inner) if !inner.is_empty() => flatten_into(&key, inner, out),
            _ => {
                out.insert(key);
            }
        }
    }
}

fn insert_path(root: &mut Mapping, key: &str, value: Value) {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = root;
    for part in &parts[..parts.len() - 1] {
        let entry = current
            .entry(Value::String(part.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        current = match entry {
            Value::Mapping(m) => m,
            _ => return,
        };
    }
    if let Some(last) = parts.last() {
        let slot = Value::String(last.to_string());
        if !matches!(current.get(&slot), Some(Value::Mapping(_))) {
            current.insert(slot, value);
        }
    }
}

impl Resolver {
    /// Resolver with automatic environment binding against the process env
    pub fn new() -> Self {
        Self {
            layers: RwLock::new(Layers::default()),
            env: Some(Arc::new(|name: &str| std::env::var(name).ok())),
        }
    }

    /// Resolver with a custom environment
    pub fn with_env(env: EnvLookup) -> Self {
        Self {
            layers: RwLock::new(Layers::default()),
            env: Some(env),
        }
    }

    /// Resolver that ignores the environment entirely
    pub fn isolated() -> Self {
        Self {
            layers: RwLock::new(Layers::default()),
            env: None,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Layers> {
        self.layers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Layers> {
        self.layers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn env_value(&self, key: &str) -> Option<Value> {
        let lookup = self.env.as_ref()?;
        lookup(&env_key(key)).map(Value::String)
    }

    pub fn set_default<T: Serialize>(&self, key: &str, value: T) {
        self.write().defaults.insert(normalize(key), to_value(value));
    }

    /// Register a flag; `given` is `Some` only when the user passed it
    pub fn bind_flag<D: Serialize, V: Serialize>(&self, key: &str, default: D, given: Option<V>) {
        let key = normalize(key);
        let mut layers = self.write();
        layers.flag_defaults.insert(key.clone(), to_value(default));
        if let Some(value) = given {
            layers.flags.insert(key, to_value(value));
        }
    }

    /// Explicit override, highest precedence
    pub fn set<T: Serialize>(&self, key: &str, value: T) {
        self.write().overrides.insert(normalize(key), to_value(value));
    }

    /// Load config file contents, replacing any previously read file
    pub fn read_config(&self, contents: &str, source: Option<&Path>) -> Result<()> {
        let parsed: Value = serde_yaml::from_str(contents).with_context(|| match source {
            Some(path) => format!("error reading config file: {}", path.display()),
            None => "error reading config".to_string(),
        })?;
        let file = match parsed {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => anyhow::bail!("config file must contain a mapping"),
        };
        let mut layers = self.write();
        layers.file = file;
        layers.config_file = source.map(Path::to_path_buf);
        Ok(())
    }

    /// Read the first config file found in `dirs`; `Ok(None)` when there is none
    pub fn read_in_config(&self, dirs: &[PathBuf]) -> Result<Option<PathBuf>> {
        for dir in dirs {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if path.is_file() {
                    let contents = std::fs::read_to_string(&path)
                        .with_context(|| format!("error reading config file: {}", path.display()))?;
                    self.read_config(&contents, Some(&path))?;
                    tracing::debug!("Using config file {}", path.display());
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }

    pub fn config_file_used(&self) -> Option<PathBuf> {
        self.read().config_file.clone()
    }

    /// Resolved value for `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        let key = normalize(key);
        let layers = self.read();
        if let Some(v) = layers.overrides.get(&key) {
            return Some(v.clone());
        }
        if let Some(v) = layers.flags.get(&key) {
            return Some(v.clone());
        }
        if let Some(v) = self.env_value(&key) {
            return Some(v);
        }
        if let Some(v) = lookup_path(&layers.file, &key) {
            return Some(v.clone());
        }
        if let Some(v) = layers.defaults.get(&key) {
            return Some(v.clone());
        }
        layers.flag_defaults.get(&key).cloned()
    }

    /// True when a layer other than the defaults provides `key`
    pub fn is_set(&self, key: &str) -> bool {
        let key = normalize(key);
        let layers = self.read();
        layers.overrides.contains_key(&key)
            || layers.flags.contains_key(&key)
            || self.env_value(&key).is_some()
            || lookup_path(&layers.file, &key).is_some()
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key).map(|v| scalar_string(&v)).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => {
                matches!(s.trim().to_lowercase().as_str(), "1" | "t" | "true")
            }
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    pub fn get_i64(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        }
    }

    /// Sequences as-is; strings split on commas
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Sequence(items)) => items.iter().map(scalar_string).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![scalar_string(&other)],
        }
    }

    /// Every key known to any layer, dotted and lowercased
    pub fn all_keys(&self) -> BTreeSet<String> {
        let layers = self.read();
        let mut keys: BTreeSet<String> = layers
            .overrides
            .keys()
            .chain(layers.flags.keys())
            .chain(layers.defaults.keys())
            .chain(layers.flag_defaults.keys())
            .cloned()
            .collect();
        flatten_into("", &layers.file, &mut keys);
        keys
    }

    /// Nested map of every key resolved through the layers
    pub fn all_settings(&self) -> Value {
        let mut root = Mapping::new();
        for key in self.all_keys() {
            if let Some(value) = self.get(&key) {
                insert_path(&mut root, &key, value);
            }
        }
        Value::Mapping(root)
    }

    /// Settings worth writing back to a config file: the file that was read
    /// plus explicit overrides. Flags, environment and defaults stay out.
    pub fn persisted_settings(&self) -> Value {
        let layers = self.read();
        let mut root = layers.file.clone();
        for (key, value) in &layers.overrides {
            // file keys may differ in case from the normalized override key
            let stale: Vec<Value> = root
                .keys()
                .filter(|k| k.as_str().is_some_and(|k| k != key && k.eq_ignore_ascii_case(key)))
                .cloned()
                .collect();
            for k in stale {
                root.remove(&k);
            }
            insert_path(&mut root, key, value.clone());
        }
        Value::Mapping(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> EnvLookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |name: &str| map.get(name).cloned())
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("big-bang-repo"), "BIG_BANG_REPO");
        assert_eq!(env_key("registryserver"), "REGISTRYSERVER");
        assert_eq!(env_key("output-config.format"), "OUTPUT_CONFIG_FORMAT");
    }

    #[test]
    fn test_precedence() {
        let resolver = Resolver::with_env(env_from(&[("BBCTL_LOG_LEVEL", "info")]));
        resolver
            .read_config("bbctl-log-level: error\nbig-bang-repo: /from/file\n", None)
            .unwrap();
        resolver.set_default("bbctl-log-level", "warn");

        assert_eq!(resolver.get_string("bbctl-log-level"), "info");
        assert_eq!(resolver.get_string("big-bang-repo"), "/from/file");

        resolver.bind_flag("bbctl-log-level", "", Some("debug"));
        assert_eq!(resolver.get_string("bbctl-log-level"), "debug");

        resolver.set("bbctl-log-level", "testLogLevel");
        assert_eq!(resolver.get_string("bbctl-log-level"), "testLogLevel");
    }

    #[test]
    fn test_is_set_ignores_defaults() {
        let resolver = Resolver::isolated();
        resolver.set_default("audit", false);
        resolver.bind_flag("gatekeeper", false, None::<bool>);
        assert!(!resolver.is_set("audit"));
        assert!(!resolver.is_set("gatekeeper"));
        assert!(!resolver.get_bool("gatekeeper"));

        resolver.bind_flag("gatekeeper", false, Some(true));
        assert!(resolver.is_set("gatekeeper"));
        assert!(resolver.get_bool("gatekeeper"));
    }

    #[test]
    fn test_dotted_keys_read_nested_file_values() {
        let resolver = Resolver::isolated();
        resolver
            .read_config("output-config:\n  format: json\npreflight-check:\n  retrycount: 3\n", None)
            .unwrap();
        assert_eq!(resolver.get_string("output-config.format"), "json");
        assert_eq!(resolver.get_i64("Preflight-Check.RetryCount"), 3);
        assert!(resolver.is_set("output-config.format"));
        assert!(!resolver.is_set("format"));
    }

    #[test]
    fn test_type_coercion() {
        let resolver = Resolver::with_env(env_from(&[
            ("K3D", "true"),
            ("ADDON", "argocd, vault"),
            ("RETRYDELAY", "7"),
        ]));
        assert!(resolver.get_bool("k3d"));
        assert_eq!(resolver.get_string_list("addon"), vec!["argocd", "vault"]);
        assert_eq!(resolver.get_i64("retrydelay"), 7);
        assert_eq!(resolver.get_string("missing"), "");
    }

    #[test]
    fn test_all_settings_nests_dotted_keys() {
        let resolver = Resolver::isolated();
        resolver
            .read_config("policy:\n  gatekeeper: true\n", None)
            .unwrap();
        resolver.bind_flag("big-bang-repo", "", Some("/repo"));
        resolver.set("output-config.format", "text");

        let settings = resolver.all_settings();
        assert_eq!(settings["policy"]["gatekeeper"], Value::Bool(true));
        assert_eq!(settings["big-bang-repo"], Value::String("/repo".into()));
        assert_eq!(
            settings["output-config"]["format"],
            Value::String("text".into())
        );
    }

    #[test]
    fn test_persisted_settings_skip_flag_defaults() {
        let resolver = Resolver::with_env(env_from(&[("BIG_BANG_REPO", "/from/env")]));
        resolver
            .read_config("bbctl-log-level: info\npolicy:\n  gatekeeper: true\n", None)
            .unwrap();
        resolver.set_default("retrycount", 10);
        resolver.bind_flag("format", "", None::<String>);
        resolver.bind_flag("kubeconfig", "", Some("/tmp/kube"));
        resolver.set("bbctl-log-level", "debug");
        resolver.set("k3d-ssh.ssh-username", "rocky");

        let persisted = resolver.persisted_settings();
        let Value::Mapping(map) = &persisted else {
            panic!("expected a mapping");
        };
        assert_eq!(persisted["bbctl-log-level"], Value::String("debug".into()));
        assert_eq!(persisted["policy"]["gatekeeper"], Value::Bool(true));
        assert_eq!(persisted["k3d-ssh"]["ssh-username"], Value::String("rocky".into()));
        for absent in ["format", "kubeconfig", "retrycount", "big-bang-repo"] {
            assert!(map.get(absent).is_none(), "{} was persisted", absent);
        }
    }

    #[test]
    fn test_read_in_config_search_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("config.yaml"), "big-bang-repo: /second\n").unwrap();

        let resolver = Resolver::isolated();
        let found = resolver
            .read_in_config(&[first.path().to_path_buf(), second.path().to_path_buf()])
            .unwrap();
        assert_eq!(found, Some(second.path().join("config.yaml")));
        assert_eq!(resolver.get_string("big-bang-repo"), "/second");

        let empty = Resolver::isolated();
        assert_eq!(empty.read_in_config(&[first.path().to_path_buf()]).unwrap(), None);
    }

    #[test]
    fn test_process_env_binding() {
        let resolver = Resolver::new();
        // SAFETY: test-only variable name not read by any other test
        unsafe {
            std::env::set_var("BBCTL_RESOLVER_TEST_KEY", "from-env");
        }
        assert_eq!(resolver.get_string("bbctl-resolver-test-key"), "from-env");
        unsafe {
            std::env::remove_var("BBCTL_RESOLVER_TEST_KEY");
        }
        assert!(!resolver.is_set("bbctl-resolver-test-key"));
    }
}
