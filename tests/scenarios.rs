//! The six end-to-end scenarios, run systematically under the default
//! bounds over SC (or TSO where the scenario calls for it) and checked
//! against their literal expected result sets.

use sctest::comp::*;
use sctest::dpor::bounds::Bounds;
use sctest::failure::Failure;
use sctest::id::{CRefId, MVarId, TVarId};
use sctest::memory::MemoryType;
use sctest::runner::{results_set, Way};
use sctest::stm::{new_tvar, or_else, read_tvar, retry, write_tvar, Stm};
use std::collections::HashSet;

fn systematically() -> Way {
    Way::Systematically(Bounds::default_preemption_and_fair())
}

#[test]
fn race_on_blocking_variable() {
    let results = results_set(systematically(), MemoryType::SequentialConsistency, || {
        new_empty_mvar().and_then(|x: MVarId| {
            fork(move || put_mvar(x, 1i64).map(|_| ()))
                .and_then(move |_| fork(move || put_mvar(x, 2i64).map(|_| ())))
                .and_then(move |_| take_mvar_as::<i64>(x))
        })
    });
    let expected: HashSet<Result<i64, Failure>> = vec![Ok(1), Ok(2)].into_iter().collect();
    assert_eq!(results, expected);
}

#[test]
fn deadlock_by_lock_ordering() {
    let results = results_set(systematically(), MemoryType::SequentialConsistency, || {
        new_mvar(()).and_then(|lock_a: MVarId| {
            new_mvar(()).and_then(move |lock_b: MVarId| {
                new_cref(0i64).and_then(move |counter: CRefId| {
                    new_empty_mvar().and_then(move |done_a: MVarId| {
                        new_empty_mvar().and_then(move |done_b: MVarId| {
                            fork(move || {
                                take_mvar_as::<()>(lock_a)
                                    .and_then(move |_| take_mvar_as::<()>(lock_b))
                                    .and_then(move |_| modify_cref(counter, |c: &i64| c + 1))
                                    .and_then(move |_| put_mvar(lock_b, ()))
                                    .and_then(move |_| put_mvar(lock_a, ()))
                                    .and_then(move |_| put_mvar(done_a, ()))
                            })
                            .and_then(move |_| {
                                fork(move || {
                                    take_mvar_as::<()>(lock_b)
                                        .and_then(move |_| take_mvar_as::<()>(lock_a))
                                        .and_then(move |_| modify_cref(counter, |c: &i64| c - 1))
                                        .and_then(move |_| put_mvar(lock_a, ()))
                                        .and_then(move |_| put_mvar(lock_b, ()))
                                        .and_then(move |_| put_mvar(done_b, ()))
                                })
                            })
                            .and_then(move |_| {
                                take_mvar_as::<()>(done_a).and_then(move |_| {
                                    take_mvar_as::<()>(done_b)
                                        .and_then(move |_| read_cref_as::<i64>(counter))
                                })
                            })
                        })
                    })
                })
            })
        })
    });
    let expected: HashSet<Result<i64, Failure>> =
        vec![Ok(0), Err(Failure::Deadlock)].into_iter().collect();
    assert_eq!(results, expected);
}

#[test]
fn cell_race_under_tso() {
    let results = results_set(systematically(), MemoryType::TotalStoreOrder, || {
        new_cref_named(Some("r"), 0i64).and_then(|r: CRefId| {
            fork(move || write_cref(r, 1i64)).and_then(move |_| read_cref_as::<i64>(r))
        })
    });
    let expected: HashSet<Result<i64, Failure>> = vec![Ok(0), Ok(1)].into_iter().collect();
    assert_eq!(results, expected);
}

#[test]
fn stm_atomicity() {
    let results = results_set(systematically(), MemoryType::SequentialConsistency, || {
        atomically(|| new_tvar(0i64)).and_then(|tv: TVarId| {
            fork(move || {
                atomically(move || write_tvar(tv, 1i64).and_then(move |_| write_tvar(tv, 2i64)))
            })
            .and_then(move |_| atomically(move || read_tvar(tv)).map(|v| *v.downcast_ref::<i64>().unwrap()))
        })
    });
    let expected: HashSet<Result<i64, Failure>> = vec![Ok(0), Ok(2)].into_iter().collect();
    assert_eq!(results, expected);
}

#[test]
fn retry_or_else_identity() {
    let results = results_set(systematically(), MemoryType::SequentialConsistency, || {
        atomically(|| new_tvar(None::<()>)).and_then(|tv: TVarId| {
            fork(move || atomically(move || write_tvar(tv, Some(())))).and_then(move |_| {
                atomically(move || {
                    or_else(
                        || retry::<()>(),
                        move || {
                            read_tvar(tv).and_then(|v| {
                                let got = *v.downcast_ref::<Option<()>>().unwrap();
                                match got {
                                    Some(()) => Stm::Pure(()),
                                    None => retry(),
                                }
                            })
                        },
                    )
                })
            })
        })
    });
    let expected: HashSet<Result<(), Failure>> = vec![Ok(())].into_iter().collect();
    assert_eq!(results, expected);
}

#[test]
fn subconcurrency_nesting_is_rejected() {
    let results = results_set(systematically(), MemoryType::SequentialConsistency, || {
        new_empty_mvar().and_then(|m: MVarId| {
            fork(move || take_mvar_as::<i64>(m).map(|_| ()))
                .and_then(move |_| subconcurrency(|| Comp::Pure(1i64)))
        })
    });
    let expected: HashSet<Result<i64, Failure>> =
        vec![Err(Failure::IllegalSubconcurrency)].into_iter().collect();
    assert_eq!(results, expected);
}
