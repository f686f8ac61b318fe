//! Named targets a check can run against.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::hostname::HostnameStrategy;

/// A named target environment (e.g. a deployment, region, or cluster).
pub struct Environment {
    pub name: String,
    pub hostname_strategy: Option<Arc<dyn HostnameStrategy>>,
    pub metadata: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), hostname_strategy: None, metadata: BTreeMap::new() }
    }

    pub fn with_hostname(mut self, strategy: Arc<dyn HostnameStrategy>) -> Self {
        self.hostname_strategy = Some(strategy);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A lookup table of environments, keyed by name. Not an enforced foreign
/// key: checks can declare environment names the registry never registered.
#[derive(Default)]
pub struct EnvironmentRegistry {
    environments: BTreeMap<String, Arc<Environment>>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, environment: Environment) -> Arc<Environment> {
        let name = environment.name.clone();
        let arc = Arc::new(environment);
        self.environments.insert(name, arc.clone());
        arc
    }

    pub fn get(&self, name: &str) -> Option<Arc<Environment>> {
        self.environments.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.environments.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Environment>> {
        self.environments.values()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}
