//! # Strand Executor - Layer 2: Managed Execution
//!
//! Managed components that run work on other threads under propagated thread
//! context.
//!
//! ## Purpose
//!
//! Layer 2 crate providing:
//! - [`ManagedExecutor`]: bounded pool on a private tokio runtime, with
//!   per-submission context capture, admission control and two-phase shutdown
//! - [`ManagedScheduledExecutor`]: delayed and periodic work, with a fresh
//!   context snapshot for every periodic firing
//! - [`ManagedThreadFactory`]: one thread per call, context stamped at creation
//! - [`ContextService`]: contextual proxies for code that owns its threads
//! - Task handles, cancellation and lifecycle listeners
//! - Named runtime configuration records and their assembly
//!
//! All capture, apply and restore logic lives in `strand-context`; the
//! components here only decide when to capture and where to run.
//!
//! ## What Does NOT Belong Here
//!
//! - Facet storage and the provider contract (belong in strand-context)
//! - Resolving component names to injection points
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use strand_context::{facets::application, ProviderRegistry};
//! use strand_executor::ManagedExecutor;
//!
//! let registry = Arc::new(ProviderRegistry::with_builtin_facets());
//! let executor = ManagedExecutor::builder("orders", registry)
//!     .with_max_async(2)
//!     .build()?;
//!
//! application::set("billing");
//! let handle = executor.submit(application::current)?;
//! assert_eq!(handle.join().ok().flatten().as_deref(), Some("billing"));
//! executor.shutdown();
//! # Ok::<(), strand_executor::ExecutorError>(())
//! ```

pub mod cancellation;
pub mod config;
pub mod context_service;
mod driver;
pub mod errors;
pub mod executor;
pub mod listener;
mod pool;
pub mod runtime;
pub mod scheduled;
pub mod task;
pub mod thread_factory;

pub use cancellation::{current_task, CancellationToken};
pub use config::{
    ContextServiceDefinition, ExecutorDefinition, RuntimeConfig, ThreadFactoryDefinition,
};
pub use context_service::{ContextService, ContextualProxy};
pub use errors::{ExecutorError, Result, TaskError};
pub use executor::{HungTask, ManagedExecutor, ManagedExecutorBuilder, PendingTask};
pub use listener::TaskListener;
pub use runtime::{ManagedRuntime, DEFAULT_NAME};
pub use scheduled::{ManagedScheduledExecutor, ScheduledHandle, ScheduledTask};
pub use task::{TaskHandle, TaskId, TaskResult};
pub use thread_factory::{
    ManagedJoinHandle, ManagedThread, ManagedThreadFactory, ManagedThreadFactoryBuilder,
};
