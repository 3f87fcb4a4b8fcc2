//! Provider failures during capture, apply and restore

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use assert_matches::assert_matches;
use strand_context::{ContextConfiguration, ContextError, ContextPropagator, FacetKey};
use strand_testkit::{registry_with, CallLog, Phase, RecordingFacet};

fn propagator(facets: Vec<RecordingFacet>) -> ContextPropagator {
    let registry = registry_with(
        facets
            .into_iter()
            .map(|f| Arc::new(f) as Arc<dyn strand_context::ContextProvider>)
            .collect(),
    );
    ContextPropagator::new(registry, &ContextConfiguration::propagate_all()).unwrap()
}

/// Apply runs in registration order and restore in exact reverse.
#[test]
fn test_restore_order_is_reverse_of_apply() {
    let log = CallLog::new();
    let propagator = propagator(vec![
        RecordingFacet::new("a", &log),
        RecordingFacet::new("b", &log),
        RecordingFacet::new("c", &log),
    ]);

    propagator.wrap(|| ()).unwrap().run().unwrap();

    assert_eq!(log.keys_for(Phase::Apply), ["a", "b", "c"]);
    assert_eq!(log.keys_for(Phase::Restore), ["c", "b", "a"]);
}

/// When facet b fails to apply, a is restored, c is never applied and the
/// task does not run.
#[test]
fn test_apply_failure_unwinds_partial_context() {
    let log = CallLog::new();
    let propagator = propagator(vec![
        RecordingFacet::new("a", &log),
        RecordingFacet::new("b", &log).failing_on(Phase::Apply),
        RecordingFacet::new("c", &log),
    ]);

    let mut ran = false;
    let outcome = propagator.wrap(|| ran = true).unwrap().run();

    assert_matches!(outcome, Err(ContextError::Apply { ref key, .. }) if key.as_str() == "b");
    assert!(!ran);
    assert_eq!(log.keys_for(Phase::Apply), ["a", "b"]);
    assert_eq!(log.keys_for(Phase::Restore), ["a"]);
}

/// A restore failure after a successful task is reported, and every other
/// facet is still restored.
#[test]
fn test_restore_failure_after_success_is_reported() {
    let log = CallLog::new();
    let propagator = propagator(vec![
        RecordingFacet::new("a", &log),
        RecordingFacet::new("b", &log).failing_on(Phase::Restore),
    ]);

    let outcome = propagator.wrap(|| 1).unwrap().run();

    assert_eq!(outcome, Err(ContextError::restore("b", "injected Restore failure")));
    assert_eq!(log.keys_for(Phase::Restore), ["b", "a"]);
}

/// A task's own failure wins over a restore failure.
#[test]
fn test_task_error_wins_over_restore_failure() {
    let log = CallLog::new();
    let propagator = propagator(vec![RecordingFacet::new("a", &log).failing_on(Phase::Restore)]);

    let outcome = propagator
        .capture()
        .unwrap()
        .run_fallible(|| Err::<(), _>("task failed"));

    assert_eq!(outcome, Ok(Err("task failed")));
}

#[test]
fn test_capture_failure_surfaces_at_wrap() {
    let log = CallLog::new();
    let propagator = propagator(vec![RecordingFacet::new("a", &log).failing_on(Phase::Capture)]);

    let err = propagator.wrap(|| ()).unwrap_err();
    assert_eq!(err.facet(), Some(&FacetKey::new("a")));
    assert_eq!(log.count(Phase::Apply), 0);
}

/// With nothing propagated or cleared, providers are never called.
#[test]
fn test_noop_configuration_never_calls_providers() {
    let log = CallLog::new();
    let registry = registry_with(vec![Arc::new(RecordingFacet::new("a", &log))]);
    let propagator = ContextPropagator::new(registry, &ContextConfiguration::empty()).unwrap();

    assert!(propagator.configuration().is_noop());
    propagator.wrap(|| ()).unwrap().run().unwrap();
    assert!(log.is_empty());
}
