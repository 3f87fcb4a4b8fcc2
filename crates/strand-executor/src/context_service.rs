//! Context service
//!
//! Standalone contextualization for code that manages its own threads. A
//! [`ContextualProxy`] binds to the creating thread's context and may be
//! invoked any number of times from any thread. Each invocation takes a fresh
//! snapshot of the creating thread's context as it is at that moment, applies
//! it on the invoking thread, runs the target and restores.
//!
//! A panicking target unwinds through the proxy to the caller after the
//! invoking thread's context has been restored.
//!
//! `call` and `apply` treat the target's value as opaque, so a failed restore
//! replaces it. Targets returning `Result` should go through `call_fallible`
//! or `apply_fallible`, which keep the target's own `Err` and only log a
//! restore failure that follows it.

use std::fmt;
use std::sync::Arc;

use strand_context::{
    ContextConfiguration, ContextPropagator, LiveCapture, ProviderRegistry, Result as ContextResult,
};
use tracing::trace;

use crate::errors::Result;

/// Factory of context-propagating proxies
#[derive(Clone)]
pub struct ContextService {
    name: Arc<str>,
    propagator: ContextPropagator,
}

impl ContextService {
    /// Service named `name` using `config` for its proxies
    pub fn new(
        name: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        config: &ContextConfiguration,
    ) -> Result<Self> {
        Ok(Self {
            name: Arc::from(name.into()),
            propagator: ContextPropagator::new(registry, config)?,
        })
    }

    /// Service using the default context configuration
    pub fn with_defaults(name: impl Into<String>, registry: Arc<ProviderRegistry>) -> Result<Self> {
        Self::new(name, registry, &ContextConfiguration::default())
    }

    /// Contextualize a callable taking no arguments
    pub fn contextual_callable<F, R>(&self, callable: F) -> Result<ContextualProxy<F>>
    where
        F: Fn() -> R,
    {
        self.proxy(&self.propagator, callable)
    }

    /// Contextualize a callable taking one argument
    pub fn contextual_function<F, A, R>(&self, function: F) -> Result<ContextualProxy<F>>
    where
        F: Fn(A) -> R,
    {
        self.proxy(&self.propagator, function)
    }

    /// Contextualize a mutable action; invoke it with [`ContextualProxy::call_mut`]
    pub fn contextual_runnable<F>(&self, runnable: F) -> Result<ContextualProxy<F>>
    where
        F: FnMut(),
    {
        self.proxy(&self.propagator, runnable)
    }

    /// Contextualize `target` under `config` instead of the service's own configuration
    pub fn create_contextual_proxy<F>(
        &self,
        target: F,
        config: &ContextConfiguration,
    ) -> Result<ContextualProxy<F>> {
        let propagator = ContextPropagator::new(Arc::clone(self.propagator.registry()), config)?;
        self.proxy(&propagator, target)
    }

    fn proxy<F>(&self, propagator: &ContextPropagator, target: F) -> Result<ContextualProxy<F>> {
        let live = propagator.capture_live()?;
        trace!(service = %self.name, facets = live.len(), "Contextual proxy created");
        Ok(ContextualProxy { live, target })
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The propagator backing the service's default proxies
    pub fn propagator(&self) -> &ContextPropagator {
        &self.propagator
    }
}

impl fmt::Debug for ContextService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextService")
            .field("name", &self.name)
            .field("propagator", &self.propagator)
            .finish()
    }
}

/// A target that runs under its creator's context wherever it is invoked
pub struct ContextualProxy<F> {
    live: LiveCapture,
    target: F,
}

impl<F> ContextualProxy<F> {
    /// Invoke a no-argument target
    pub fn call<R>(&self) -> ContextResult<R>
    where
        F: Fn() -> R,
    {
        self.live.snapshot()?.run(|| (self.target)())
    }

    /// Invoke a no-argument target returning `Result`
    pub fn call_fallible<T, E>(&self) -> ContextResult<std::result::Result<T, E>>
    where
        F: Fn() -> std::result::Result<T, E>,
    {
        self.live.snapshot()?.run_fallible(|| (self.target)())
    }

    /// Invoke a mutable target
    pub fn call_mut<R>(&mut self) -> ContextResult<R>
    where
        F: FnMut() -> R,
    {
        let snapshot = self.live.snapshot()?;
        let target = &mut self.target;
        snapshot.run(target)
    }

    /// Invoke a one-argument target
    pub fn apply<A, R>(&self, arg: A) -> ContextResult<R>
    where
        F: Fn(A) -> R,
    {
        self.live.snapshot()?.run(|| (self.target)(arg))
    }

    /// Invoke a one-argument target returning `Result`
    pub fn apply_fallible<A, T, E>(&self, arg: A) -> ContextResult<std::result::Result<T, E>>
    where
        F: Fn(A) -> std::result::Result<T, E>,
    {
        self.live.snapshot()?.run_fallible(|| (self.target)(arg))
    }

    /// Facets each invocation touches
    pub fn facet_count(&self) -> usize {
        self.live.len()
    }

    /// Unwrap the target
    pub fn into_inner(self) -> F {
        self.target
    }
}

impl<F> fmt::Debug for ContextualProxy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextualProxy")
            .field("live", &self.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use strand_context::facets::{naming, transaction, TransactionId};
    use strand_context::FacetKey;

    fn service() -> ContextService {
        ContextService::with_defaults("svc", Arc::new(ProviderRegistry::with_builtin_facets()))
            .unwrap()
    }

    #[test]
    fn test_each_invocation_sees_current_creator_context() {
        let service = service();
        naming::bind("env/queue", "orders");
        let proxy = Arc::new(
            service
                .contextual_callable(|| naming::lookup("env/queue"))
                .unwrap(),
        );

        let remote = Arc::clone(&proxy);
        let first = thread::spawn(move || remote.call().unwrap()).join().unwrap();
        naming::bind("env/queue", "invoices");
        let remote = Arc::clone(&proxy);
        let second = thread::spawn(move || remote.call().unwrap()).join().unwrap();

        assert_eq!(first.as_deref(), Some("orders"));
        assert_eq!(second.as_deref(), Some("invoices"));
        naming::unbind("env/queue");
    }

    #[test]
    fn test_default_configuration_clears_transaction() {
        let service = service();
        transaction::begin(TransactionId::new(7));
        let proxy = service.contextual_callable(transaction::current).unwrap();
        assert_eq!(proxy.call().unwrap(), None);
        assert!(transaction::current().is_some());
        transaction::end();
    }

    #[test]
    fn test_function_and_runnable_variants() {
        let service = service();
        let double = service.contextual_function(|x: u32| x * 2).unwrap();
        assert_eq!(double.apply(21).unwrap(), 42);

        let mut count = 0;
        let mut bump = service.contextual_runnable(|| count += 1).unwrap();
        bump.call_mut().unwrap();
        bump.call_mut().unwrap();
        drop(bump);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_fallible_variants_pass_errors_through() {
        let service = service();
        let check = service
            .contextual_function(|x: i32| if x < 0 { Err("negative") } else { Ok(x) })
            .unwrap();
        assert_eq!(check.apply_fallible(-1).unwrap(), Err("negative"));
        assert_eq!(check.apply_fallible(3).unwrap(), Ok(3));

        let declined = service
            .contextual_callable(|| Err::<(), _>("declined"))
            .unwrap();
        assert_eq!(declined.call_fallible().unwrap(), Err("declined"));
    }

    #[test]
    fn test_per_proxy_configuration() {
        let service = service();
        naming::bind("env/db", "primary");
        let proxy = service
            .create_contextual_proxy(
                || naming::bindings().len(),
                &ContextConfiguration::empty().clear(FacetKey::NAMING),
            )
            .unwrap();
        let observed = thread::spawn(move || {
            naming::bind("local", "x");
            proxy.call().unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(observed, 0);
        naming::unbind("env/db");
    }
}
