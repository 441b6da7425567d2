//! Provider registry
//!
//! Providers are resolved by name. Names are case-insensitive. The "none"
//! sentinel (and the empty name) always resolves to `DisabledProvider` and
//! cannot be overridden.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{DisabledProvider, LoopbackProvider, ProviderLoadError, ReplicationProvider};
use crate::replication::is_disabled_spec;

/// Constructs a fresh provider instance.
pub type ProviderFactory =
    Arc<dyn Fn() -> Result<Box<dyn ReplicationProvider>, ProviderLoadError> + Send + Sync>;

/// Named provider factories.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry with the built-in providers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("loopback", || {
            Ok(Box::new(LoopbackProvider::new()) as Box<dyn ReplicationProvider>)
        });
        registry
    }

    /// Registry knowing only the "none" sentinel.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn ReplicationProvider>, ProviderLoadError> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.trim().to_ascii_lowercase(), Arc::new(factory));
    }

    /// Whether `spec` resolves to something.
    pub fn contains(&self, spec: &str) -> bool {
        is_disabled_spec(spec) || self.factories.contains_key(&spec.trim().to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct the provider named by `spec`.
    pub fn load(&self, spec: &str) -> Result<Box<dyn ReplicationProvider>, ProviderLoadError> {
        if is_disabled_spec(spec) {
            return Ok(Box::new(DisabledProvider::new()));
        }
        let key = spec.trim().to_ascii_lowercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| ProviderLoadError::new(spec, "no such provider registered"))?;
        factory()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
