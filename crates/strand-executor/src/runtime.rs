//! Named runtime assembly
//!
//! [`ManagedRuntime`] builds every component a [`RuntimeConfig`] defines
//! against one provider registry and hands them out by name. Each kind also
//! gets a `default` instance with the default context configuration unless
//! the configuration defines one under that name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_context::ProviderRegistry;
use tracing::{debug, info};

use crate::config::{ExecutorDefinition, RuntimeConfig, ThreadFactoryDefinition};
use crate::context_service::ContextService;
use crate::errors::{ExecutorError, Result};
use crate::executor::{ManagedExecutor, ManagedExecutorBuilder};
use crate::scheduled::ManagedScheduledExecutor;
use crate::thread_factory::ManagedThreadFactory;

/// Name of the instance every kind gets unless configured otherwise
pub const DEFAULT_NAME: &str = "default";

/// Every managed component of a configuration, by name
pub struct ManagedRuntime {
    registry: Arc<ProviderRegistry>,
    executors: BTreeMap<String, ManagedExecutor>,
    scheduled_executors: BTreeMap<String, ManagedScheduledExecutor>,
    thread_factories: BTreeMap<String, ManagedThreadFactory>,
    context_services: BTreeMap<String, ContextService>,
}

impl ManagedRuntime {
    /// Validate `config` and build every component it defines
    pub fn from_config(registry: Arc<ProviderRegistry>, config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let mut executors = BTreeMap::new();
        for (name, def) in with_default(&config.executor) {
            let executor = executor_builder(&registry, config, &name, &def)?.build()?;
            executors.insert(name, executor);
        }

        let mut scheduled_executors = BTreeMap::new();
        for (name, def) in with_default(&config.scheduled_executor) {
            let scheduled = executor_builder(&registry, config, &name, &def)?.build_scheduled()?;
            scheduled_executors.insert(name, scheduled);
        }

        let mut thread_factories = BTreeMap::new();
        for (name, def) in with_default(&config.thread_factory) {
            let factory = thread_factory(&registry, config, &name, &def)?;
            thread_factories.insert(name, factory);
        }

        let mut context_services = BTreeMap::new();
        for (name, def) in with_default(&config.context_service) {
            let context = config.context_for(def.context.as_deref())?;
            let service = ContextService::new(name.clone(), Arc::clone(&registry), &context)?;
            context_services.insert(name, service);
        }

        info!(
            executors = executors.len(),
            scheduled_executors = scheduled_executors.len(),
            thread_factories = thread_factories.len(),
            context_services = context_services.len(),
            "Managed runtime assembled"
        );
        Ok(Self {
            registry,
            executors,
            scheduled_executors,
            thread_factories,
            context_services,
        })
    }

    /// Runtime holding only the `default` instances
    pub fn with_defaults(registry: Arc<ProviderRegistry>) -> Result<Self> {
        Self::from_config(registry, &RuntimeConfig::default())
    }

    /// Executor named `name`
    pub fn executor(&self, name: &str) -> Result<&ManagedExecutor> {
        lookup(&self.executors, "executor", name)
    }

    /// Scheduled executor named `name`
    pub fn scheduled_executor(&self, name: &str) -> Result<&ManagedScheduledExecutor> {
        lookup(&self.scheduled_executors, "scheduled executor", name)
    }

    /// Thread factory named `name`
    pub fn thread_factory(&self, name: &str) -> Result<&ManagedThreadFactory> {
        lookup(&self.thread_factories, "thread factory", name)
    }

    /// Context service named `name`
    pub fn context_service(&self, name: &str) -> Result<&ContextService> {
        lookup(&self.context_services, "context service", name)
    }

    /// Names of all executors
    pub fn executor_names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    /// Names of all scheduled executors
    pub fn scheduled_executor_names(&self) -> impl Iterator<Item = &str> {
        self.scheduled_executors.keys().map(String::as_str)
    }

    /// The registry every component resolved against
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Shut down every executor, scheduled executor and thread factory
    pub fn shutdown_all(&self) {
        debug!("Shutting down managed runtime");
        for scheduled in self.scheduled_executors.values() {
            scheduled.shutdown();
        }
        for executor in self.executors.values() {
            executor.shutdown();
        }
        for factory in self.thread_factories.values() {
            factory.shutdown();
        }
    }

    /// Wait until every executor terminated, up to `timeout` in total
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let remaining = || timeout.saturating_sub(start.elapsed());
        self.executors
            .values()
            .all(|executor| executor.await_termination(remaining()))
            && self
                .scheduled_executors
                .values()
                .all(|scheduled| scheduled.await_termination(remaining()))
    }
}

impl fmt::Debug for ManagedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedRuntime")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field(
                "scheduled_executors",
                &self.scheduled_executors.keys().collect::<Vec<_>>(),
            )
            .field("thread_factories", &self.thread_factories.keys().collect::<Vec<_>>())
            .field("context_services", &self.context_services.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Configured definitions plus a `default` one if none is configured
fn with_default<D: Clone + Default>(definitions: &BTreeMap<String, D>) -> BTreeMap<String, D> {
    let mut all = definitions.clone();
    all.entry(DEFAULT_NAME.to_owned()).or_default();
    all
}

fn lookup<'a, T>(map: &'a BTreeMap<String, T>, kind: &'static str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| ExecutorError::not_found(kind, name))
}

fn executor_builder(
    registry: &Arc<ProviderRegistry>,
    config: &RuntimeConfig,
    name: &str,
    def: &ExecutorDefinition,
) -> Result<ManagedExecutorBuilder> {
    let mut builder = ManagedExecutor::builder(name, Arc::clone(registry))
        .with_context(config.context_for(def.context.as_deref())?)
        .with_max_async(def.max_async)
        .with_queue_capacity(def.queue_capacity);
    if let Some(threshold) = def.hung_task_threshold() {
        builder = builder.with_hung_task_threshold(threshold);
    }
    if let Some(prefix) = &def.thread_name_prefix {
        builder = builder.with_thread_name_prefix(prefix.clone());
    }
    Ok(builder)
}

fn thread_factory(
    registry: &Arc<ProviderRegistry>,
    config: &RuntimeConfig,
    name: &str,
    def: &ThreadFactoryDefinition,
) -> Result<ManagedThreadFactory> {
    let mut builder = ManagedThreadFactory::builder(name, Arc::clone(registry))
        .with_context(config.context_for(def.context.as_deref())?);
    if let Some(prefix) = &def.thread_name_prefix {
        builder = builder.with_thread_name_prefix(prefix.clone());
    }
    if let Some(bytes) = def.stack_size {
        builder = builder.with_stack_size(bytes);
    }
    builder.build()
}
