//! End-to-end propagation between a submitting and a worker thread

#![allow(clippy::unwrap_used)]

use std::sync::mpsc;
use std::thread;

use assert_matches::assert_matches;
use strand_context::{ContextConfiguration, ContextError, ContextPropagator, ContextSnapshot};
use strand_testkit::{init_tracing, scenario_registry, IntFacet, LabelFacet};

/// Run `f` on a fresh thread after seeding it with the worker's own context
fn on_worker<R: Send + 'static>(f: impl FnOnce() -> R + Send + 'static) -> R {
    thread::spawn(move || {
        IntFacet::set(0);
        LabelFacet::set("y");
        f()
    })
    .join()
    .unwrap()
}

/// The propagated facet carries the submitter's value, the cleared one is
/// neutral, and the worker gets its own values back afterwards.
#[test]
fn test_propagated_and_cleared_facets_on_worker() {
    init_tracing();
    let config = ContextConfiguration::empty()
        .propagate(IntFacet::KEY)
        .clear(LabelFacet::KEY);
    let propagator = ContextPropagator::new(scenario_registry(), &config).unwrap();

    IntFacet::set(7);
    LabelFacet::set("x");
    let task = propagator
        .wrap(|| (IntFacet::get(), LabelFacet::get()))
        .unwrap();

    let (during, after) = on_worker(move || {
        let during = task.run().unwrap();
        (during, (IntFacet::get(), LabelFacet::get()))
    });

    assert_eq!(during, (7, String::new()));
    assert_eq!(after, (0, "y".to_owned()));
    // The submitter is untouched.
    assert_eq!((IntFacet::get(), LabelFacet::get()), (7, "x".to_owned()));
}

/// An unchanged facet keeps whatever the worker already had.
#[test]
fn test_unchanged_facet_keeps_worker_value() {
    let config = ContextConfiguration::empty().propagate(IntFacet::KEY);
    let propagator = ContextPropagator::new(scenario_registry(), &config).unwrap();

    IntFacet::set(3);
    LabelFacet::set("submitter");
    let task = propagator.wrap(LabelFacet::get).unwrap();

    assert_eq!(on_worker(move || task.run().unwrap()), "y");
}

/// Changes the submitter makes after capture are not seen by the task.
#[test]
fn test_snapshot_is_taken_at_submission() {
    let propagator = ContextPropagator::new(
        scenario_registry(),
        &ContextConfiguration::propagate_all(),
    )
    .unwrap();

    IntFacet::set(1);
    let task = propagator.wrap(IntFacet::get).unwrap();
    IntFacet::set(2);

    assert_eq!(on_worker(move || task.run().unwrap()), 1);
}

/// Changes the task makes to propagated facets do not leak to the worker.
#[test]
fn test_task_mutations_do_not_leak() {
    let propagator = ContextPropagator::new(
        scenario_registry(),
        &ContextConfiguration::propagate_all(),
    )
    .unwrap();

    IntFacet::set(5);
    let task = propagator
        .wrap(|| {
            IntFacet::set(99);
            LabelFacet::set("task");
        })
        .unwrap();

    let after = on_worker(move || {
        task.run().unwrap();
        (IntFacet::get(), LabelFacet::get())
    });
    assert_eq!(after, (0, "y".to_owned()));
    assert_eq!(IntFacet::get(), 5);
}

/// A panicking task still restores the worker's context.
#[test]
fn test_restore_runs_when_task_panics() {
    let propagator = ContextPropagator::new(
        scenario_registry(),
        &ContextConfiguration::propagate_all(),
    )
    .unwrap();
    IntFacet::set(8);
    let task = propagator.wrap(|| panic!("task failure")).unwrap();

    let after = on_worker(move || {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run()));
        assert!(outcome.is_err());
        (IntFacet::get(), LabelFacet::get())
    });
    assert_eq!(after, (0, "y".to_owned()));
}

/// A task running under a snapshot can itself capture and hand work on.
#[test]
fn test_nested_propagation() {
    let propagator = ContextPropagator::new(
        scenario_registry(),
        &ContextConfiguration::propagate_all(),
    )
    .unwrap();
    IntFacet::set(11);
    LabelFacet::set("outer");

    let inner_propagator = propagator.clone();
    let task = propagator
        .wrap(move || {
            let (tx, rx) = mpsc::channel();
            let inner = inner_propagator
                .wrap(move || tx.send((IntFacet::get(), LabelFacet::get())).unwrap())
                .unwrap();
            thread::spawn(move || inner.run().unwrap()).join().unwrap();
            rx.recv().unwrap()
        })
        .unwrap();

    assert_eq!(
        on_worker(move || task.run().unwrap()),
        (11, "outer".to_owned())
    );
}

/// An empty snapshot runs the task and touches nothing.
#[test]
fn test_empty_snapshot_runs_task() {
    IntFacet::set(4);
    let value = ContextSnapshot::empty().run(IntFacet::get).unwrap();
    assert_eq!(value, 4);
}

#[test]
fn test_fallible_task_error_is_surfaced() {
    let propagator = ContextPropagator::new(
        scenario_registry(),
        &ContextConfiguration::propagate_all(),
    )
    .unwrap();
    let snapshot = propagator.capture().unwrap();
    let outcome: Result<Result<(), &str>, ContextError> = snapshot.run_fallible(|| Err("boom"));
    assert_matches!(outcome, Ok(Err("boom")));
}
