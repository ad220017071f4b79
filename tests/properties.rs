//! Cross-cutting invariants from §8 not already exercised by a module's
//! own `#[cfg(test)]` block: trace-replay determinism, DPOR soundness
//! and completeness, and the fairness bound's actual (approximated)
//! behaviour.

use sctest::action::{Decision, Lookahead, ThreadAction};
use sctest::comp::*;
use sctest::dpor::bounds::Bounds;
use sctest::id::{CRefId, IdSource, MVarId};
use sctest::memory::MemoryType;
use sctest::runner::{results_set, Way};
use sctest::runtime::Runtime;
use sctest::scheduler::RoundRobinSched;
use sctest::trace::{render_trace, Step};
use std::any::Any;
use std::rc::Rc;

fn cell_race_program() -> Comp<i64> {
    new_cref_named(Some("r"), 0i64).and_then(|r: CRefId| {
        fork(move || write_cref(r, 1i64)).and_then(move |_| read_cref_as::<i64>(r))
    })
}

fn render_once() -> String {
    let mut rt = Runtime::new(MemoryType::SequentialConsistency, || {
        cell_race_program().map(|t| Rc::new(t) as Rc<dyn Any>)
    });
    let (_, trace) = rt.run(&RoundRobinSched);
    render_trace(&trace, None)
}

#[test]
fn same_scheduler_on_the_same_program_replays_an_identical_trace() {
    // `RoundRobinSched` is stateless and deterministic, so driving the
    // same program through it twice, from two fresh runtimes, must
    // produce bit-identical traces.
    assert_eq!(render_once(), render_once());
}

fn racy_mvar_program() -> impl Fn() -> Comp<i64> {
    || {
        new_empty_mvar().and_then(|x: MVarId| {
            fork(move || put_mvar(x, 1i64))
                .and_then(move |_| fork(move || put_mvar(x, 2i64)))
                .and_then(move |_| take_mvar_as::<i64>(x))
        })
    }
}

#[test]
fn dpor_never_reports_a_result_no_real_schedule_can_produce() {
    let results = results_set(
        Way::Systematically(Bounds::default_preemption_and_fair()),
        MemoryType::SequentialConsistency,
        racy_mvar_program(),
    );
    for r in &results {
        assert!(
            matches!(r, Ok(1) | Ok(2)),
            "explorer reported {:?}, which no interleaving of this program can produce",
            r
        );
    }
}

#[test]
fn unbounded_dpor_is_at_least_as_complete_as_random_sampling() {
    // Completeness under SC with no bounds: every outcome a generous
    // random sample turns up must already be in the unbounded
    // systematic exploration's result set.
    let dpor_results = results_set(
        Way::Systematically(Bounds::none()),
        MemoryType::SequentialConsistency,
        racy_mvar_program(),
    );
    let random_results = results_set(
        Way::Randomly(0xC0FFEE, 500),
        MemoryType::SequentialConsistency,
        racy_mvar_program(),
    );
    for r in &random_results {
        assert!(
            dpor_results.contains(r),
            "unbounded systematic exploration missed {:?}, which random sampling found",
            r
        );
    }
    // And both ultimately agree on the full set for a program this small.
    assert_eq!(dpor_results, random_results);
}

#[test]
fn fair_bound_rejects_traces_with_too_many_yields() {
    let mut ids = IdSource::new();
    let main = ids.initial_thread();
    let trace = vec![
        Step {
            decision: Decision::Start(main),
            runnable: vec![(main, Lookahead::WillYield)],
            action: ThreadAction::Yield,
        },
        Step {
            decision: Decision::Continue,
            runnable: vec![(main, Lookahead::WillYield)],
            action: ThreadAction::Yield,
        },
        Step {
            decision: Decision::Continue,
            runnable: vec![(main, Lookahead::WillStop)],
            action: ThreadAction::Stop,
        },
    ];
    assert!(!Bounds::fair_bound(1).within(&trace));
    assert!(Bounds::fair_bound(2).within(&trace));
}
