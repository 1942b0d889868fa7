//! Business logic provider contract and the per-domain registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use jobrun_core::{ClassifiedInputs, ResultLocation};
use tracing::info;

use crate::context::RunContext;
use crate::error::ProviderError;

/// A domain's transformation, invoked once per run by the worker.
///
/// Implementations report progress and status through `ctx` and must check
/// [`RunContext::is_cancelled`] at safe points, returning early (without an
/// error) once it is true. Any result returned after cancellation is
/// discarded.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn run(
        &self,
        inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError>;
}

/// Providers registered by domain name.
///
/// The worker resolves its domain's entry at the start of every run, so
/// replacing an entry affects the next run and never one in flight.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `domain`, returning the entry it replaced.
    pub fn register(
        &self,
        domain: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Option<Arc<dyn Provider>> {
        let domain = domain.into();
        let replaced = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain.clone(), provider);
        info!(domain = %domain, replaced = replaced.is_some(), "Registered provider");
        replaced
    }

    /// Remove the provider of `domain`.
    pub fn unregister(&self, domain: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(domain)
    }

    /// The provider currently registered for `domain`.
    pub fn resolve(&self, domain: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
            .cloned()
    }

    /// Names of domains with a registered provider, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        domains.sort();
        domains
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}
