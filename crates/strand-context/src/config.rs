//! Context configuration and its resolution against a registry
//!
//! A [`ContextConfiguration`] lists facet keys in three sets: `propagated`,
//! `cleared` and `unchanged`. Resolution against a [`ProviderRegistry`]
//! assigns every registered facet exactly one [`Disposition`]:
//!
//! - a facet named explicitly takes the disposition of the set naming it
//! - otherwise it takes the disposition of the set holding
//!   [`FacetKey::REMAINING`], if any
//! - otherwise it is left [`Disposition::Unchanged`]
//!
//! Resolution fails fast; an unknown or doubly listed key is an error, never a
//! silent default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ContextError, Result};
use crate::facet::FacetKey;
use crate::registry::{ProviderRegistry, RegisteredProvider};

/// What happens to a facet on the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Submitter's value is captured and applied
    Propagate,
    /// Worker sees the facet's neutral value
    Clear,
    /// Worker keeps whatever it has; the facet is not touched
    Unchanged,
}

/// Which facets to propagate, clear or leave alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfiguration {
    /// Facets captured from the submitter and applied on the worker
    pub propagated: Vec<FacetKey>,
    /// Facets given their neutral value on the worker
    pub cleared: Vec<FacetKey>,
    /// Facets the worker keeps as they are
    pub unchanged: Vec<FacetKey>,
}

impl Default for ContextConfiguration {
    /// Propagate everything except the transaction, which is cleared
    fn default() -> Self {
        Self {
            propagated: vec![FacetKey::REMAINING],
            cleared: vec![FacetKey::TRANSACTION],
            unchanged: Vec::new(),
        }
    }
}

impl ContextConfiguration {
    /// Configuration listing nothing; every facet resolves to unchanged
    pub fn empty() -> Self {
        Self {
            propagated: Vec::new(),
            cleared: Vec::new(),
            unchanged: Vec::new(),
        }
    }

    /// Configuration propagating every registered facet
    pub fn propagate_all() -> Self {
        Self::empty().propagate(FacetKey::REMAINING)
    }

    /// Configuration clearing every registered facet
    pub fn clear_all() -> Self {
        Self::empty().clear(FacetKey::REMAINING)
    }

    /// Add `key` to the propagated set
    pub fn propagate(mut self, key: impl Into<FacetKey>) -> Self {
        self.propagated.push(key.into());
        self
    }

    /// Add `key` to the cleared set
    pub fn clear(mut self, key: impl Into<FacetKey>) -> Self {
        self.cleared.push(key.into());
        self
    }

    /// Add `key` to the unchanged set
    pub fn leave_unchanged(mut self, key: impl Into<FacetKey>) -> Self {
        self.unchanged.push(key.into());
        self
    }

    /// Resolve against `registry`
    pub fn resolve(&self, registry: &ProviderRegistry) -> Result<ResolvedConfiguration> {
        let mut explicit: HashMap<&FacetKey, Disposition> = HashMap::new();
        let mut remaining = Disposition::Unchanged;

        let sets = [
            (&self.propagated, Disposition::Propagate),
            (&self.cleared, Disposition::Clear),
            (&self.unchanged, Disposition::Unchanged),
        ];

        for (keys, disposition) in sets {
            for key in keys {
                match explicit.get(key) {
                    Some(existing) if *existing != disposition => {
                        return Err(ContextError::overlapping_facet(key));
                    }
                    Some(_) => continue,
                    None => {}
                }
                if key.is_remaining() {
                    remaining = disposition;
                } else if !registry.contains(key.as_str()) {
                    return Err(ContextError::unknown_facet(key));
                }
                explicit.insert(key, disposition);
            }
        }

        let entries = registry
            .providers()
            .iter()
            .map(|provider| {
                let disposition = explicit
                    .get(provider.key())
                    .copied()
                    .unwrap_or(remaining);
                (provider.clone(), disposition)
            })
            .collect();

        Ok(ResolvedConfiguration { entries })
    }
}

/// Every registered facet paired with its disposition, in registration order
#[derive(Debug, Clone)]
pub struct ResolvedConfiguration {
    entries: Vec<(RegisteredProvider, Disposition)>,
}

impl ResolvedConfiguration {
    /// Disposition of `key`, if registered
    pub fn disposition(&self, key: &str) -> Option<Disposition> {
        self.entries
            .iter()
            .find(|(provider, _)| provider.key().as_str() == key)
            .map(|(_, disposition)| *disposition)
    }

    /// Keys with `disposition`, in registration order
    pub fn keys_with(&self, disposition: Disposition) -> Vec<FacetKey> {
        self.entries
            .iter()
            .filter(|(_, d)| *d == disposition)
            .map(|(provider, _)| provider.key().clone())
            .collect()
    }

    /// Propagated keys
    pub fn propagated(&self) -> Vec<FacetKey> {
        self.keys_with(Disposition::Propagate)
    }

    /// Cleared keys
    pub fn cleared(&self) -> Vec<FacetKey> {
        self.keys_with(Disposition::Clear)
    }

    /// Unchanged keys
    pub fn unchanged(&self) -> Vec<FacetKey> {
        self.keys_with(Disposition::Unchanged)
    }

    /// Providers the propagator touches (propagated or cleared), in registration order
    pub fn touched(&self) -> impl Iterator<Item = (&RegisteredProvider, Disposition)> {
        self.entries
            .iter()
            .filter(|(_, d)| *d != Disposition::Unchanged)
            .map(|(provider, d)| (provider, *d))
    }

    /// Whether no facet is propagated or cleared
    pub fn is_noop(&self) -> bool {
        self.touched().next().is_none()
    }

    /// All entries
    pub fn entries(&self) -> &[(RegisteredProvider, Disposition)] {
        &self.entries
    }
}
