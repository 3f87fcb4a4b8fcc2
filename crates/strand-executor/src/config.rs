//! Runtime configuration records
//!
//! Named definitions of every managed component, as an external
//! configuration loader would supply them. Records are plain serde types and
//! can be read from TOML:
//!
//! ```toml
//! [context.propagate-security]
//! propagated = ["security"]
//! cleared = ["Remaining"]
//!
//! [executor.orders]
//! context = "propagate-security"
//! max_async = 8
//! queue_capacity = 100
//! hung_task_threshold_ms = 30000
//!
//! [scheduled_executor.reports]
//! max_async = 2
//!
//! [thread_factory.io]
//! thread_name_prefix = "io"
//!
//! [context_service.web]
//! context = "propagate-security"
//! ```
//!
//! A definition without `context` uses [`ContextConfiguration::default`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strand_context::ContextConfiguration;

use crate::errors::{ExecutorError, Result};
use crate::executor::default_max_async;

/// Definition of a managed executor or scheduled executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorDefinition {
    /// Name of a `[context.*]` record
    pub context: Option<String>,
    /// Maximum number of concurrently running tasks
    pub max_async: usize,
    /// Bound on queued tasks; unbounded when absent
    pub queue_capacity: Option<usize>,
    /// Run time after which a task is reported as hung
    pub hung_task_threshold_ms: Option<u64>,
    /// Worker thread name prefix; the definition name when absent
    pub thread_name_prefix: Option<String>,
}

impl Default for ExecutorDefinition {
    fn default() -> Self {
        Self {
            context: None,
            max_async: default_max_async(),
            queue_capacity: None,
            hung_task_threshold_ms: None,
            thread_name_prefix: None,
        }
    }
}

impl ExecutorDefinition {
    /// Hung task threshold as a duration
    pub fn hung_task_threshold(&self) -> Option<Duration> {
        self.hung_task_threshold_ms.map(Duration::from_millis)
    }
}

/// Definition of a managed thread factory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadFactoryDefinition {
    /// Name of a `[context.*]` record
    pub context: Option<String>,
    /// Thread name prefix; the definition name when absent
    pub thread_name_prefix: Option<String>,
    /// Stack size of created threads, in bytes
    pub stack_size: Option<usize>,
}

/// Definition of a context service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextServiceDefinition {
    /// Name of a `[context.*]` record
    pub context: Option<String>,
}

/// Every named definition of a runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Named context configurations
    pub context: BTreeMap<String, ContextConfiguration>,
    /// Managed executors
    pub executor: BTreeMap<String, ExecutorDefinition>,
    /// Managed scheduled executors
    pub scheduled_executor: BTreeMap<String, ExecutorDefinition>,
    /// Managed thread factories
    pub thread_factory: BTreeMap<String, ThreadFactoryDefinition>,
    /// Context services
    pub context_service: BTreeMap<String, ContextServiceDefinition>,
}

impl RuntimeConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ExecutorError::config(format!("failed to parse runtime configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| ExecutorError::config(format!("failed to render runtime configuration: {e}")))
    }

    /// Add a named context configuration
    pub fn with_context(mut self, name: impl Into<String>, context: ContextConfiguration) -> Self {
        self.context.insert(name.into(), context);
        self
    }

    /// Add an executor definition
    pub fn with_executor(mut self, name: impl Into<String>, definition: ExecutorDefinition) -> Self {
        self.executor.insert(name.into(), definition);
        self
    }

    /// Add a scheduled executor definition
    pub fn with_scheduled_executor(
        mut self,
        name: impl Into<String>,
        definition: ExecutorDefinition,
    ) -> Self {
        self.scheduled_executor.insert(name.into(), definition);
        self
    }

    /// Add a thread factory definition
    pub fn with_thread_factory(
        mut self,
        name: impl Into<String>,
        definition: ThreadFactoryDefinition,
    ) -> Self {
        self.thread_factory.insert(name.into(), definition);
        self
    }

    /// Add a context service definition
    pub fn with_context_service(
        mut self,
        name: impl Into<String>,
        definition: ContextServiceDefinition,
    ) -> Self {
        self.context_service.insert(name.into(), definition);
        self
    }

    /// Context configuration named `name`, or the default when `None`
    pub fn context_for(&self, name: Option<&str>) -> Result<ContextConfiguration> {
        match name {
            None => Ok(ContextConfiguration::default()),
            Some(name) => self
                .context
                .get(name)
                .cloned()
                .ok_or_else(|| ExecutorError::not_found("context", name)),
        }
    }

    /// Check every definition
    ///
    /// All problems are collected and reported together. Facet keys are not
    /// checked here; they are resolved against the provider registry when
    /// components are built.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let executors = self
            .executor
            .iter()
            .map(|(name, def)| ("executor", name, def))
            .chain(
                self.scheduled_executor
                    .iter()
                    .map(|(name, def)| ("scheduled_executor", name, def)),
            );
        for (kind, name, def) in executors {
            if def.max_async == 0 {
                problems.push(format!("{kind}.{name}: max_async must be at least 1"));
            }
            if def.queue_capacity == Some(0) {
                problems.push(format!("{kind}.{name}: queue_capacity must be at least 1"));
            }
            self.check_context_ref(kind, name, def.context.as_deref(), &mut problems);
        }
        for (name, def) in &self.thread_factory {
            if def.stack_size == Some(0) {
                problems.push(format!("thread_factory.{name}: stack_size must be positive"));
            }
            self.check_context_ref("thread_factory", name, def.context.as_deref(), &mut problems);
        }
        for (name, def) in &self.context_service {
            self.check_context_ref("context_service", name, def.context.as_deref(), &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::config(problems.join("; ")))
        }
    }

    fn check_context_ref(
        &self,
        kind: &str,
        name: &str,
        context: Option<&str>,
        problems: &mut Vec<String>,
    ) {
        if let Some(context) = context {
            if !self.context.contains_key(context) {
                problems.push(format!("{kind}.{name}: unknown context '{context}'"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_context::FacetKey;

    const SAMPLE: &str = r#"
        [context.secure]
        propagated = ["security"]
        cleared = ["Remaining"]

        [executor.orders]
        context = "secure"
        max_async = 8
        queue_capacity = 100
        hung_task_threshold_ms = 250

        [scheduled_executor.reports]
        max_async = 2

        [thread_factory.io]
        thread_name_prefix = "io"
        stack_size = 262144

        [context_service.web]
        context = "secure"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = RuntimeConfig::from_toml_str(SAMPLE).unwrap();

        let secure = &config.context["secure"];
        assert_eq!(secure.propagated, vec![FacetKey::SECURITY]);
        assert_eq!(secure.cleared, vec![FacetKey::REMAINING]);

        let orders = &config.executor["orders"];
        assert_eq!(orders.max_async, 8);
        assert_eq!(orders.queue_capacity, Some(100));
        assert_eq!(orders.hung_task_threshold(), Some(Duration::from_millis(250)));

        assert_eq!(config.scheduled_executor["reports"].max_async, 2);
        assert_eq!(config.thread_factory["io"].stack_size, Some(262_144));
        assert_eq!(config.context_service["web"].context.as_deref(), Some("secure"));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let config = RuntimeConfig::default()
            .with_executor(
                "bad",
                ExecutorDefinition {
                    max_async: 0,
                    queue_capacity: Some(0),
                    context: Some("missing".into()),
                    ..ExecutorDefinition::default()
                },
            )
            .with_thread_factory(
                "tiny",
                ThreadFactoryDefinition {
                    stack_size: Some(0),
                    ..ThreadFactoryDefinition::default()
                },
            );

        let Err(ExecutorError::Config { message }) = config.validate() else {
            panic!("validation should fail");
        };
        assert!(message.contains("executor.bad: max_async"));
        assert!(message.contains("executor.bad: queue_capacity"));
        assert!(message.contains("unknown context 'missing'"));
        assert!(message.contains("thread_factory.tiny: stack_size"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = RuntimeConfig::from_toml_str("[executor.a]\nmax_threads = 3\n").unwrap_err();
        assert!(matches!(err, ExecutorError::Config { .. }));
    }

    #[test]
    fn test_context_for_defaults_and_lookups() {
        let config = RuntimeConfig::default().with_context("none", ContextConfiguration::empty());
        assert_eq!(config.context_for(None).unwrap(), ContextConfiguration::default());
        assert_eq!(config.context_for(Some("none")).unwrap(), ContextConfiguration::empty());
        assert_eq!(
            config.context_for(Some("other")).unwrap_err(),
            ExecutorError::not_found("context", "other")
        );
    }

    #[test]
    fn test_toml_round_trip_preserves_definitions() {
        let config = RuntimeConfig::from_toml_str(SAMPLE).unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(RuntimeConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
