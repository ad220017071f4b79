//! The bounded DPOR explorer (§4.3): repeatedly runs the program under
//! a `PrefixSched`, harvests new backtracking points from the races in
//! each resulting trace, and keeps going until the worklist is dry.
//! This is what `crate::runner::run_sct`'s `Way::Systematically` calls.

pub mod bounds;
mod race;
mod tree;

use crate::comp::{downcast_rc, Comp};
use crate::failure::Failure;
use crate::id::ThreadId;
use crate::log::LogLevel;
use crate::memory::MemoryType;
use crate::runtime::Runtime;
use crate::trace::Trace;
use bounds::Bounds;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tree::PrefixSched;

/// Explores every schedule reachable by following backtracking points
/// discovered from races, up to `bounds`. Returns one `(result, trace)`
/// per schedule actually run (including aborted/bounded-out ones,
/// tagged `Failure::Abort`, so a caller can see how much was pruned).
///
/// Each tree node is identified by the prefix of thread choices that
/// reaches it. `node_sleep` tracks, per node, the threads already tried
/// as that node's child (§4.3 "Tree shape"): a freshly discovered
/// backtracking point naming an already-tried sibling thread is dropped
/// rather than queued again, since it would only replay a subtree this
/// exploration has already covered.
pub fn explore<T: 'static>(
    bounds: Bounds,
    mem_type: MemoryType,
    program: impl Fn() -> Comp<T> + 'static,
) -> Vec<(Result<T, Failure>, Trace)> {
    let mut worklist: Vec<Vec<ThreadId>> = vec![Vec::new()];
    let mut seen = HashSet::new();
    let mut node_sleep: HashMap<Vec<ThreadId>, HashSet<ThreadId>> = HashMap::new();
    let mut results = Vec::new();

    while let Some(prefix) = worklist.pop() {
        if !seen.insert(prefix.clone()) {
            continue;
        }
        if let Some(limit) = bounds.length {
            if prefix.len() > limit {
                continue;
            }
        }

        let sched = PrefixSched::new(prefix.clone(), bounds);
        let mut rt = Runtime::new(mem_type, {
            let program = &program;
            let value: Comp<Rc<dyn Any>> = erase_call(program);
            move || value
        });
        let (result, trace) = rt.run(&sched);

        let accepted_result = if bounds.within(&trace) {
            result.map(downcast_rc::<T>)
        } else {
            crate::log!(LogLevel::LogWarn, "trace of length {} rejected by bounds", trace.len());
            Err(Failure::Abort)
        };

        let mut new_points = 0;
        for bp in race::backtrack_points(&trace) {
            let parent = &bp[..bp.len() - 1];
            let j = bp[bp.len() - 1];
            let already_tried = node_sleep.get(parent).map_or(false, |s| s.contains(&j));
            if already_tried {
                continue;
            }
            node_sleep.entry(parent.to_vec()).or_default().insert(j);
            worklist.push(bp);
            new_points += 1;
        }
        crate::log!(
            LogLevel::LogInfo,
            "explored a schedule of length {}, queued {} new backtracking point(s), {} left",
            trace.len(),
            new_points,
            worklist.len()
        );
        results.push((accepted_result, trace));
    }

    results
}

fn erase_call<T: 'static>(program: &impl Fn() -> Comp<T>) -> Comp<Rc<dyn Any>> {
    program().map(|t| Rc::new(t) as Rc<dyn Any>)
}
