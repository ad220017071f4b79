//! The dependency relation and backtracking-point computation the
//! explorer's DPOR loop is built on (§4.3): two actions race if they
//! touch the same resource and at least one of them mutates it, plus
//! the three relation-specific rules §4.3 calls out by name
//! (transaction tvar-set intersection, `ThrowTo`/target, `Fork`/first
//! action of the forked thread).

use crate::action::{simplify_action, ActionType, ThreadAction};
use crate::id::ThreadId;
use crate::stm::{tvars_of, writes_any, TTrace};
use crate::trace::Trace;
use std::collections::HashMap;

fn is_write_like(t: &ActionType) -> bool {
    matches!(
        t,
        ActionType::UnsynchronisedWrite(_)
            | ActionType::PartiallySynchronisedCommit(_)
            | ActionType::PartiallySynchronisedWrite(_)
            | ActionType::PartiallySynchronisedModify(_)
            | ActionType::SynchronisedModify(_)
            | ActionType::SynchronisedWrite(_)
    )
}

/// A resource tag distinguishing cells from blocking variables so a
/// `CRef` and an `MVar` allocated with the same underlying integer
/// never collide.
fn resource(t: &ActionType) -> Option<(u8, i64)> {
    use ActionType::*;
    match t {
        UnsynchronisedRead(c)
        | UnsynchronisedWrite(c)
        | PartiallySynchronisedCommit(c)
        | PartiallySynchronisedWrite(c)
        | PartiallySynchronisedModify(c)
        | SynchronisedModify(c) => Some((0, c.num())),
        SynchronisedRead(m) | SynchronisedWrite(m) => Some((1, m.num())),
        UnsynchronisedOther | SynchronisedOther => None,
    }
}

/// The transaction trace carried by an `STM`/`BlockedSTM` action, if
/// any.
fn ttrace_of(a: &ThreadAction) -> Option<&TTrace> {
    match a {
        ThreadAction::STM(t, _) | ThreadAction::BlockedSTM(t) => Some(t),
        _ => None,
    }
}

/// Two actions are dependent if swapping their order could change the
/// outcome (§4.3). `ta_tid`/`tb_tid` are the threads that performed `a`
/// and `b`; `b_is_first_action_of_its_thread` tells the `Fork` rule
/// whether `b` is the very first step thread `tb_tid` ever takes.
pub fn dependent(
    ta_tid: ThreadId,
    a: &ThreadAction,
    tb_tid: ThreadId,
    b: &ThreadAction,
    b_is_first_action_of_its_thread: bool,
) -> bool {
    // `ThrowTo t` is dependent with any action of `t`.
    if let ThreadAction::ThrowTo(target) = a {
        if *target == tb_tid {
            return true;
        }
    }
    if let ThreadAction::ThrowTo(target) = b {
        if *target == ta_tid {
            return true;
        }
    }
    // `Fork t` is dependent with the first action of `t`.
    if let ThreadAction::Fork(forked) = a {
        if *forked == tb_tid && b_is_first_action_of_its_thread {
            return true;
        }
    }

    let ta = simplify_action(a);
    let tb = simplify_action(b);

    // Two transactions are dependent iff their tvar-sets intersect and
    // at least one writes.
    if matches!(ta, ActionType::SynchronisedOther) && matches!(tb, ActionType::SynchronisedOther) {
        return match (ttrace_of(a), ttrace_of(b)) {
            (Some(ta_trace), Some(tb_trace)) => {
                let a_tvs = tvars_of(ta_trace);
                let b_tvs = tvars_of(tb_trace);
                !a_tvs.is_disjoint(&b_tvs) && (writes_any(ta_trace) || writes_any(tb_trace))
            }
            // Neither side is a transaction (e.g. a lone `ThrowTo` not
            // targeting the other thread): conservatively independent.
            _ => false,
        };
    }

    match (resource(&ta), resource(&tb)) {
        (Some(ra), Some(rb)) => ra == rb && (is_write_like(&ta) || is_write_like(&tb)),
        _ => false,
    }
}

/// The thread that actually ran at each step, resolving `Decision`
/// against the running total (§3's `Decision::Continue` means "same as
/// last step").
fn resolve_tids(trace: &Trace) -> Vec<ThreadId> {
    let mut tids = Vec::with_capacity(trace.len());
    let mut prior = None;
    for step in trace {
        let t = step.decision.tid(prior).expect("Continue with no prior thread");
        tids.push(t);
        prior = Some(t);
    }
    tids
}

/// For every racing pair `(i, j)` with `i < j` on different threads,
/// where thread `j` was already runnable back at step `i`, yields the
/// prefix that forces `j` to run at step `i` instead (§4.3's
/// "preserve the race, reverse the order" backtracking rule).
pub fn backtrack_points(trace: &Trace) -> Vec<Vec<ThreadId>> {
    let tids = resolve_tids(trace);
    let mut first_index: HashMap<ThreadId, usize> = HashMap::new();
    for (idx, t) in tids.iter().enumerate() {
        first_index.entry(*t).or_insert(idx);
    }
    let mut out = Vec::new();
    for i in 0..trace.len() {
        for j in (i + 1)..trace.len() {
            if tids[i] == tids[j] {
                continue;
            }
            let b_is_first = first_index.get(&tids[j]) == Some(&j);
            if !dependent(tids[i], &trace[i].action, tids[j], &trace[j].action, b_is_first) {
                continue;
            }
            if !trace[i].runnable.iter().any(|(t, _)| *t == tids[j]) {
                continue;
            }
            let mut prefix = tids[..i].to_vec();
            prefix.push(tids[j]);
            out.push(prefix);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Lookahead;
    use crate::id::IdSource;

    #[test]
    fn two_writes_to_the_same_cref_are_dependent() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        assert!(dependent(t1, &ThreadAction::WriteCRef(c), t2, &ThreadAction::WriteCRef(c), false));
    }

    #[test]
    fn two_reads_of_the_same_cref_are_not_dependent() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        assert!(!dependent(t1, &ThreadAction::ReadCRef(c), t2, &ThreadAction::ReadCRef(c), false));
    }

    #[test]
    fn actions_on_different_resources_never_race() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        let m = ids.fresh_mvar(None);
        assert!(!dependent(
            t1,
            &ThreadAction::WriteCRef(c),
            t2,
            &ThreadAction::PutMVar(m, vec![]),
            false
        ));
    }

    #[test]
    fn throw_to_is_dependent_with_any_action_of_its_target() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        assert!(dependent(t1, &ThreadAction::ThrowTo(t2), t2, &ThreadAction::ReadCRef(c), false));
        // Not dependent with an action of some unrelated third thread.
        let t3 = ids.fresh_thread(None);
        assert!(!dependent(t1, &ThreadAction::ThrowTo(t2), t3, &ThreadAction::ReadCRef(c), false));
    }

    #[test]
    fn fork_is_dependent_with_the_forked_threads_first_action_only() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        assert!(dependent(t1, &ThreadAction::Fork(t2), t2, &ThreadAction::ReadCRef(c), true));
        // A later (non-first) action of the forked thread isn't covered
        // by this rule (it may still race via the usual resource check).
        assert!(!dependent(t1, &ThreadAction::Fork(t2), t2, &ThreadAction::ReadCRef(c), false));
    }

    #[test]
    fn transactions_with_disjoint_tvar_sets_are_independent() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let tv1 = ids.fresh_tvar(None);
        let tv2 = ids.fresh_tvar(None);
        let a = ThreadAction::STM(vec![crate::stm::TAction::TWrite(tv1)], vec![]);
        let b = ThreadAction::STM(vec![crate::stm::TAction::TWrite(tv2)], vec![]);
        assert!(!dependent(t1, &a, t2, &b, false));
    }

    #[test]
    fn transactions_sharing_a_written_tvar_are_dependent() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let tv = ids.fresh_tvar(None);
        let a = ThreadAction::STM(vec![crate::stm::TAction::TRead(tv)], vec![]);
        let b = ThreadAction::STM(vec![crate::stm::TAction::TWrite(tv)], vec![]);
        assert!(dependent(t1, &a, t2, &b, false));
    }

    #[test]
    fn transactions_sharing_only_read_tvars_are_independent() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let tv = ids.fresh_tvar(None);
        let a = ThreadAction::STM(vec![crate::stm::TAction::TRead(tv)], vec![]);
        let b = ThreadAction::STM(vec![crate::stm::TAction::TRead(tv)], vec![]);
        assert!(!dependent(t1, &a, t2, &b, false));
    }

    #[test]
    fn a_race_produces_a_prefix_that_forces_the_later_thread_first() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        let trace = vec![
            crate::trace::Step {
                decision: crate::action::Decision::Start(main),
                runnable: vec![(main, Lookahead::WillWriteCRef(c)), (t1, Lookahead::WillWriteCRef(c))],
                action: ThreadAction::WriteCRef(c),
            },
            crate::trace::Step {
                decision: crate::action::Decision::SwitchTo(t1),
                runnable: vec![(t1, Lookahead::WillWriteCRef(c))],
                action: ThreadAction::WriteCRef(c),
            },
        ];
        let bps = backtrack_points(&trace);
        assert!(bps.contains(&vec![t1]));
    }
}
