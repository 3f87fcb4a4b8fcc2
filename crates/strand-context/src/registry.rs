//! Context provider registry
//!
//! The registry is assembled once at process start through
//! [`ProviderRegistryBuilder`] and is immutable afterwards. It is shared by
//! reference (`Arc<ProviderRegistry>`) with every propagator and executor, so
//! reads need no locking. Registration order is significant: it fixes the
//! order in which facets are applied on worker threads, and restoration runs
//! in the exact reverse.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{ContextError, Result};
use crate::facet::FacetKey;
use crate::facets;
use crate::provider::ContextProvider;

/// A provider together with its registration position
#[derive(Debug, Clone)]
pub struct RegisteredProvider {
    position: usize,
    provider: Arc<dyn ContextProvider>,
}

impl RegisteredProvider {
    /// Registration position, starting at zero
    pub fn position(&self) -> usize {
        self.position
    }

    /// Facet key of the provider
    pub fn key(&self) -> &FacetKey {
        self.provider.key()
    }

    /// The provider itself
    pub fn provider(&self) -> &Arc<dyn ContextProvider> {
        &self.provider
    }
}

/// Immutable mapping from facet key to provider
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
    index: HashMap<FacetKey, usize>,
}

impl ProviderRegistry {
    /// Start assembling a registry
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    /// Registry with only the built-in facets
    pub fn with_builtin_facets() -> Self {
        // Built-in keys are distinct, so registration cannot fail.
        let mut builder = ProviderRegistryBuilder::new();
        for provider in facets::builtin_providers() {
            builder.providers.push(provider);
        }
        builder.finish()
    }

    /// Providers for `keys`, in registration order
    ///
    /// Fails with [`ContextError::UnknownFacet`] on the first key that has no
    /// provider. Duplicate keys in the request resolve once.
    pub fn resolve<'a, I>(&self, keys: I) -> Result<Vec<RegisteredProvider>>
    where
        I: IntoIterator<Item = &'a FacetKey>,
    {
        let mut positions = Vec::new();
        for key in keys {
            let position = *self
                .index
                .get(key)
                .ok_or_else(|| ContextError::unknown_facet(key))?;
            positions.push(position);
        }
        positions.sort_unstable();
        positions.dedup();
        Ok(positions
            .into_iter()
            .map(|position| self.providers[position].clone())
            .collect())
    }

    /// Provider registered under `key`
    pub fn get(&self, key: &str) -> Option<&RegisteredProvider> {
        self.index.get(key).map(|&position| &self.providers[position])
    }

    /// Whether `key` is registered
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// All registered keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &FacetKey> + '_ {
        self.providers.iter().map(RegisteredProvider::key)
    }

    /// All registered providers in registration order
    pub fn providers(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    /// Number of registered facets
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no facet is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Write-once builder for [`ProviderRegistry`]
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: Vec<Arc<dyn ContextProvider>>,
}

impl ProviderRegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own key
    pub fn register(mut self, provider: impl ContextProvider) -> Result<Self> {
        self.register_shared(Arc::new(provider))?;
        Ok(self)
    }

    /// Register an already shared provider
    pub fn register_shared(&mut self, provider: Arc<dyn ContextProvider>) -> Result<&mut Self> {
        if provider.key().is_remaining() {
            return Err(ContextError::provider(format!(
                "{} is a reserved policy key",
                FacetKey::REMAINING
            )));
        }
        if self.providers.iter().any(|p| p.key() == provider.key()) {
            return Err(ContextError::duplicate_facet(provider.key()));
        }
        debug!(facet = %provider.key(), position = self.providers.len(), "Registered context provider");
        self.providers.push(provider);
        Ok(self)
    }

    /// Register the built-in application, security, naming and transaction facets
    pub fn with_builtin_facets(mut self) -> Result<Self> {
        for provider in facets::builtin_providers() {
            self.register_shared(provider)?;
        }
        Ok(self)
    }

    /// Freeze the registry
    pub fn build(self) -> Arc<ProviderRegistry> {
        Arc::new(self.finish())
    }

    fn finish(self) -> ProviderRegistry {
        let providers: Vec<RegisteredProvider> = self
            .providers
            .into_iter()
            .enumerate()
            .map(|(position, provider)| RegisteredProvider { position, provider })
            .collect();
        let index = providers
            .iter()
            .map(|p| (p.key().clone(), p.position))
            .collect();
        ProviderRegistry { providers, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FacetSnapshot;

    struct Named(FacetKey);

    impl ContextProvider for Named {
        fn key(&self) -> &FacetKey {
            &self.0
        }

        fn capture(&self) -> Result<Arc<dyn FacetSnapshot>> {
            Err(ContextError::capture(&self.0, "unused"))
        }

        fn cleared(&self) -> Result<Arc<dyn FacetSnapshot>> {
            Err(ContextError::capture(&self.0, "unused"))
        }
    }

    fn registry(keys: &[&'static str]) -> Arc<ProviderRegistry> {
        let mut builder = ProviderRegistry::builder();
        for key in keys {
            builder = builder.register(Named(FacetKey::from(*key))).unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let result = ProviderRegistry::builder()
            .register(Named("a".into()))
            .unwrap()
            .register(Named("a".into()));
        assert_eq!(
            result.err(),
            Some(ContextError::duplicate_facet("a"))
        );
    }

    #[test]
    fn test_remaining_cannot_be_registered() {
        let result = ProviderRegistry::builder().register(Named(FacetKey::REMAINING));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_returns_registration_order() {
        let registry = registry(&["c", "a", "b"]);
        let resolved = registry
            .resolve(&[FacetKey::from("b"), FacetKey::from("c"), FacetKey::from("b")])
            .unwrap();
        let keys: Vec<&str> = resolved.iter().map(|p| p.key().as_str()).collect();
        assert_eq!(keys, vec!["c", "b"]);
    }

    #[test]
    fn test_resolve_unknown_key_fails() {
        let registry = registry(&["a"]);
        let result = registry.resolve(&[FacetKey::from("a"), FacetKey::from("zzz")]);
        assert_eq!(result.err(), Some(ContextError::unknown_facet("zzz")));
    }

    #[test]
    fn test_builtin_registry_contents() {
        let registry = ProviderRegistry::with_builtin_facets();
        let keys: Vec<&FacetKey> = registry.keys().collect();
        assert_eq!(
            keys,
            vec![
                &FacetKey::APPLICATION,
                &FacetKey::SECURITY,
                &FacetKey::NAMING,
                &FacetKey::TRANSACTION
            ]
        );
    }
}
