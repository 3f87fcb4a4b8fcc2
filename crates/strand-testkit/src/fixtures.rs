//! Common test fixtures

use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_context::{ContextProvider, ProviderRegistry};

use crate::facets::{IntFacet, LabelFacet};

/// Registry holding [`IntFacet`] then [`LabelFacet`]
pub fn scenario_registry() -> Arc<ProviderRegistry> {
    ProviderRegistry::builder()
        .register(IntFacet::provider())
        .expect("int facet registers")
        .register(LabelFacet::provider())
        .expect("label facet registers")
        .build()
}

/// Registry holding `providers` in order
pub fn registry_with(providers: Vec<Arc<dyn ContextProvider>>) -> Arc<ProviderRegistry> {
    let mut builder = ProviderRegistry::builder();
    for provider in providers {
        builder
            .register_shared(provider)
            .expect("test providers use distinct keys");
    }
    builder.build()
}

/// Install a test-friendly tracing subscriber once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
