//! Datasource registry and lazy, memoizing dependency resolution.
//!
//! A [`Datasource`] is a dependency a check function needs resolved before
//! it can run. Datasources are either registered directly by value, or
//! built on demand from a [`DatasourceFactory`] the first time a given
//! `(factory, args)` pair is requested ([`FromFactory`]).

use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::scheduling::SchedulingStrategy;

#[derive(Debug, Clone, thiserror::Error)]
#[error("datasource unavailable: {0}")]
pub struct DatasourceUnavailable(pub String);

/// A dependency a check function can declare and receive resolved.
#[async_trait]
pub trait Datasource: Any + Send + Sync {
    /// Scheduling strategies this datasource contributes, if any. `None`
    /// means "defer to the check's own declared strategies" (the ground
    /// truth's "unspecified" sentinel).
    fn scheduling_strategies(&self) -> Option<Vec<Arc<dyn SchedulingStrategy>>> {
        None
    }
}

/// Builds instances of `D` on demand, keyed by a caller-defined, `Hash +
/// Eq + Clone` argument type. See DESIGN.md O1 for why this departs from
/// the ground truth's free-form positional/keyword argument hashing.
#[async_trait]
pub trait DatasourceFactory: Send + Sync + 'static {
    type Datasource: Datasource + 'static;
    type Args: std::hash::Hash + Eq + Clone + Send + Sync + 'static;

    async fn build(&self, args: &Self::Args) -> Result<Self::Datasource, DatasourceUnavailable>;
}

/// A descriptor requesting a factory-built datasource with specific args,
/// resolved and memoized lazily the first time it's encountered.
pub struct FromFactory<F: DatasourceFactory> {
    pub args: F::Args,
}

impl<F: DatasourceFactory> FromFactory<F> {
    pub fn new(args: F::Args) -> Self {
        Self { args }
    }

    fn cache_key(&self) -> (TypeId, u64) {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.args.hash(&mut hasher);
        (TypeId::of::<F>(), hasher.finish())
    }
}

/// Registry of directly-registered datasources and factories, plus the
/// memoization cache for factory-built instances.
#[derive(Default)]
pub struct DatasourceRegistry {
    direct: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    factories: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    instances: DashMap<(TypeId, u64), Arc<dyn Any + Send + Sync>>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<D: Datasource + 'static>(&self, instance: D) {
        self.direct.insert(TypeId::of::<D>(), Arc::new(instance));
    }

    pub fn register_factory<F: DatasourceFactory>(&self, factory: F) {
        self.factories.insert(TypeId::of::<F>(), Arc::new(factory));
    }

    pub fn resolve_direct<D: Datasource + 'static>(&self) -> Option<Arc<D>> {
        self.direct
            .get(&TypeId::of::<D>())
            .and_then(|entry| entry.value().clone().downcast::<D>().ok())
    }

    /// Resolves a factory-built datasource, constructing and memoizing it
    /// on first request for a given `(factory, args)` pair.
    pub async fn resolve_from_factory<F: DatasourceFactory>(
        &self,
        descriptor: &FromFactory<F>,
    ) -> Result<Arc<F::Datasource>, DatasourceUnavailable> {
        let cache_key = descriptor.cache_key();
        if let Some(existing) = self.instances.get(&cache_key) {
            if let Ok(instance) = existing.value().clone().downcast::<F::Datasource>() {
                return Ok(instance);
            }
        }

        let factory = self
            .factories
            .get(&TypeId::of::<F>())
            .and_then(|entry| entry.value().clone().downcast::<F>().ok())
            .ok_or_else(|| DatasourceUnavailable("no factory registered for this type".to_string()))?;

        let built = factory.build(&descriptor.args).await?;
        let instance = Arc::new(built);
        self.instances.insert(cache_key, instance.clone());
        Ok(instance)
    }
}
