//! Loading a runtime from a configuration file

#![allow(clippy::unwrap_used)]

use std::io::Write;
use std::time::Duration;

use assert_matches::assert_matches;
use strand_executor::{ExecutorError, ManagedRuntime, RuntimeConfig};
use strand_testkit::{scenario_registry, IntFacet, LabelFacet};

const RUNTIME_TOML: &str = r#"
[context.counter-only]
propagated = ["int"]
cleared = ["Remaining"]

[executor.orders]
context = "counter-only"
max_async = 2
queue_capacity = 16

[scheduled_executor.reports]
context = "counter-only"
max_async = 1

[thread_factory.io]
context = "counter-only"
thread_name_prefix = "io"

[context_service.web]
context = "counter-only"
"#;

#[test]
fn test_runtime_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(RUNTIME_TOML.as_bytes()).unwrap();

    let config = RuntimeConfig::load_from_file(file.path()).unwrap();
    let runtime = ManagedRuntime::from_config(scenario_registry(), &config).unwrap();

    IntFacet::set(4);
    LabelFacet::set("caller");

    let orders = runtime.executor("orders").unwrap();
    let seen = orders
        .submit(|| (IntFacet::get(), LabelFacet::get()))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(seen, (4, String::new()));

    let io = runtime.thread_factory("io").unwrap();
    let thread = io.new_thread(IntFacet::get).unwrap();
    assert_eq!(thread.name(), "io-1");
    assert_eq!(thread.start().unwrap().join().unwrap(), 4);

    let web = runtime.context_service("web").unwrap();
    let proxy = web.contextual_callable(LabelFacet::get).unwrap();
    assert_eq!(proxy.call().unwrap(), "");

    let reports = runtime.scheduled_executor("reports").unwrap();
    let task = reports
        .schedule(IntFacet::get, Duration::from_millis(5))
        .unwrap();
    assert_eq!(task.join().unwrap(), 4);

    runtime.shutdown_all();
    assert!(runtime.await_termination(Duration::from_secs(5)));
    assert_matches!(orders.submit(|| ()), Err(ExecutorError::Shutdown));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuntimeConfig::load_from_file(dir.path().join("absent.toml")).unwrap_err();
    assert_matches!(err, ExecutorError::Config { .. });
}

#[test]
fn test_dangling_context_reference_is_rejected() {
    let err = RuntimeConfig::from_toml_str("[executor.orders]\ncontext = \"nowhere\"\n").unwrap_err();
    assert_matches!(err, ExecutorError::Config { ref message } if message.contains("nowhere"));
}

proptest::proptest! {
    #[test]
    fn test_validation_accepts_exactly_positive_sizes(
        max_async in 0usize..8,
        queue_capacity in proptest::option::of(0usize..8),
    ) {
        let definition = strand_executor::ExecutorDefinition {
            max_async,
            queue_capacity,
            ..Default::default()
        };
        let config = RuntimeConfig::default().with_executor("sized", definition);
        let expected = max_async > 0 && queue_capacity != Some(0);
        proptest::prop_assert_eq!(config.validate().is_ok(), expected);
    }
}
