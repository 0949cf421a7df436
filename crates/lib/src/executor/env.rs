//! Process environment for spawned commands.
//!
//! A command carries an [`EnvSpec`]: a merge strategy plus explicit values.
//! It is resolved at execution time into a concrete [`EnvMap`], which is
//! what the child process actually sees.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::config::yaml_scalar_to_string;

/// How a command's explicit values combine with the server's own environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvStrategy {
    /// Server environment verbatim; explicit values are ignored.
    Inherit,
    /// Explicit values only; the server environment is invisible.
    #[default]
    Isolate,
    /// Server environment plus explicit values for keys it does not already have.
    Extend,
    /// Server environment with explicit values replacing colliding keys.
    Override,
}

impl EnvStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvStrategy::Inherit => "inherit",
            EnvStrategy::Isolate => "isolate",
            EnvStrategy::Extend => "extend",
            EnvStrategy::Override => "override",
        }
    }
}

/// Variable name -> value. Backed by an ordered map so iteration and
/// [`EnvMap::to_list`] are always sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Option<serde_yaml::Mapping>")]
pub struct EnvMap(BTreeMap<String, String>);

impl EnvMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Snapshot of the current process environment. Variables whose name or
    /// value is not valid UTF-8 are skipped.
    pub fn ambient() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `KEY=VALUE` entries sorted lexicographically by key.
    pub fn to_list(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for EnvMap {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// YAML keys and values may be any scalar (`42`, `true`, `null`); they are
/// stringified. Nested sequences or mappings are rejected.
impl TryFrom<Option<serde_yaml::Mapping>> for EnvMap {
    type Error = String;

    fn try_from(raw: Option<serde_yaml::Mapping>) -> Result<Self, Self::Error> {
        let Some(raw) = raw else {
            return Ok(Self::new());
        };
        let mut out = Self::new();
        for (key, value) in raw {
            let name = yaml_scalar_to_string(&key)
                .ok_or_else(|| "env variable names must be scalars".to_string())?;
            if name.is_empty() {
                return Err("env variable name must not be empty".to_string());
            }
            if name.contains('=') {
                return Err(format!("env variable name {:?} must not contain '='", name));
            }
            let value = yaml_scalar_to_string(&value)
                .ok_or_else(|| format!("env variable {} must have a scalar value", name))?;
            out.insert(name, value);
        }
        Ok(out)
    }
}

/// Environment configuration for one command: strategy plus explicit values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvSpec {
    pub strategy: EnvStrategy,
    pub vals: EnvMap,
}

impl EnvSpec {
    pub fn new(strategy: EnvStrategy, vals: EnvMap) -> Self {
        Self { strategy, vals }
    }

    /// Resolve against the live process environment.
    pub fn resolve(&self) -> EnvMap {
        self.resolve_with(EnvMap::ambient)
    }

    /// Resolve against the environment produced by `ambient`. The closure is
    /// only called for strategies that read the server environment.
    pub fn resolve_with<F>(&self, ambient: F) -> EnvMap
    where
        F: FnOnce() -> EnvMap,
    {
        match self.strategy {
            EnvStrategy::Inherit => ambient(),
            EnvStrategy::Isolate => self.vals.clone(),
            EnvStrategy::Extend => {
                let mut out = ambient();
                for (k, v) in &self.vals.0 {
                    out.0.entry(k.clone()).or_insert_with(|| v.clone());
                }
                out
            }
            EnvStrategy::Override => {
                let mut out = ambient();
                out.0
                    .extend(self.vals.0.iter().map(|(k, v)| (k.clone(), v.clone())));
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ambient() -> EnvMap {
        EnvMap::from([("A", "x"), ("B", "y")])
    }

    fn spec(strategy: EnvStrategy) -> EnvSpec {
        EnvSpec::new(strategy, EnvMap::from([("A", "1")]))
    }

    #[test]
    fn isolate_uses_only_explicit_values() {
        let got = spec(EnvStrategy::Isolate).resolve_with(ambient);
        assert_eq!(got, EnvMap::from([("A", "1")]));
    }

    #[test]
    fn isolate_never_reads_ambient() {
        let got = spec(EnvStrategy::Isolate)
            .resolve_with(|| panic!("isolate must not read the server environment"));
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn extend_keeps_ambient_on_conflict() {
        let got = spec(EnvStrategy::Extend).resolve_with(ambient);
        assert_eq!(got, EnvMap::from([("A", "x"), ("B", "y")]));
    }

    #[test]
    fn extend_adds_new_keys() {
        let spec = EnvSpec::new(EnvStrategy::Extend, EnvMap::from([("C", "3")]));
        let got = spec.resolve_with(ambient);
        assert_eq!(got, EnvMap::from([("A", "x"), ("B", "y"), ("C", "3")]));
    }

    #[test]
    fn override_replaces_ambient_on_conflict() {
        let got = spec(EnvStrategy::Override).resolve_with(ambient);
        assert_eq!(got, EnvMap::from([("A", "1"), ("B", "y")]));
    }

    #[test]
    fn inherit_ignores_explicit_values() {
        let got = spec(EnvStrategy::Inherit).resolve_with(ambient);
        assert_eq!(got, ambient());
    }

    #[test]
    fn inherit_reads_live_environment() {
        // Only this test touches the variable; other tests mutate unrelated ones.
        std::env::set_var("POKE_TEST_INHERIT_MARKER", "live");
        let got = EnvSpec::new(EnvStrategy::Inherit, EnvMap::new()).resolve();
        assert_eq!(got.get("POKE_TEST_INHERIT_MARKER"), Some("live"));
    }

    #[test]
    fn to_list_sorts_by_key() {
        let env = EnvMap::from([("B", "2"), ("A", "1"), ("C", "3")]);
        assert_eq!(env.to_list(), vec!["A=1", "B=2", "C=3"]);
        assert_eq!(env.to_list(), env.to_list());
    }

    #[test]
    fn default_spec_is_isolate_and_empty() {
        let spec = EnvSpec::default();
        assert_eq!(spec.strategy, EnvStrategy::Isolate);
        assert!(spec.vals.is_empty());
    }

    #[test]
    fn yaml_values_are_stringified() {
        let spec: EnvSpec = serde_yaml::from_str(
            "strategy: extend\nvals:\n  FOO: 42\n  BAR: true\n  BAZ: null\n  123: 456\n",
        )
        .unwrap();
        assert_eq!(spec.strategy, EnvStrategy::Extend);
        assert_eq!(
            spec.vals,
            EnvMap::from([("FOO", "42"), ("BAR", "true"), ("BAZ", ""), ("123", "456")])
        );
    }

    #[test]
    fn yaml_rejects_unknown_strategy() {
        assert!(serde_yaml::from_str::<EnvSpec>("strategy: merge\n").is_err());
    }

    #[test]
    fn yaml_rejects_nested_values() {
        assert!(serde_yaml::from_str::<EnvSpec>("vals:\n  FOO: [1, 2]\n").is_err());
    }

    #[test]
    fn yaml_empty_vals_is_empty_map() {
        let spec: EnvSpec = serde_yaml::from_str("strategy: override\nvals:\n").unwrap();
        assert_eq!(spec.strategy, EnvStrategy::Override);
        assert!(spec.vals.is_empty());
    }
}
