//! The public entry points (§6): `run_sct` drives every schedule a
//! chosen `Way` visits and returns one `(result, trace)` per schedule;
//! `results_set` collects the deduplicated set of distinct outcomes.

use crate::comp::Comp;
use crate::dpor::bounds::Bounds;
use crate::dpor::explore;
use crate::failure::Failure;
use crate::log::LogLevel;
use crate::memory::MemoryType;
use crate::runtime::Runtime;
use crate::scheduler::{NonPreemptive, RandomSched};
use crate::settings::Settings;
use crate::trace::Trace;
use std::any::Any;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

/// How to cover the schedule space (§4.3, §4.5).
pub enum Way {
    /// Bounded DPOR: every schedule the backtracking search visits.
    Systematically(Bounds),
    /// A fixed number of schedules chosen by a seeded, non-preemptive
    /// random scheduler.
    Randomly(u64, usize),
}

impl Way {
    /// The default systematic way, using `Settings::get()`'s bounds.
    pub fn systematically() -> Self {
        Way::Systematically(Settings::get().default_bounds)
    }

    /// The default random way, using `Settings::get()`'s iteration
    /// count.
    pub fn randomly(seed: u64) -> Self {
        Way::Randomly(seed, Settings::get().random_iterations)
    }
}

/// Runs `program` under every schedule `way` visits, returning one
/// `(result, trace)` pair per schedule.
pub fn run_sct<T: 'static>(
    way: Way,
    mem_type: MemoryType,
    program: impl Fn() -> Comp<T> + 'static,
) -> Vec<(Result<T, Failure>, Trace)> {
    match way {
        Way::Systematically(bounds) => explore(bounds, mem_type, program),
        Way::Randomly(seed, iterations) => {
            let program = Rc::new(program);
            (0..iterations)
                .map(|i| {
                    let run_seed = seed.wrapping_add(i as u64);
                    let sched = NonPreemptive::new(RandomSched::new(run_seed));
                    let program = program.clone();
                    let mut rt = Runtime::new(mem_type, move || {
                        program().map(|t| Rc::new(t) as Rc<dyn Any>)
                    });
                    let (result, trace) = rt.run(&sched);
                    let result = result.map(crate::comp::downcast_rc::<T>);
                    match &result {
                        Ok(_) => crate::log!(
                            LogLevel::LogInfo,
                            "random iteration {}/{} (seed {}) ran a schedule of length {}",
                            i + 1,
                            iterations,
                            run_seed,
                            trace.len()
                        ),
                        Err(failure) => crate::log!(
                            LogLevel::LogWarn,
                            "random iteration {}/{} (seed {}) hit {:?}",
                            i + 1,
                            iterations,
                            run_seed,
                            failure
                        ),
                    }
                    (result, trace)
                })
                .collect()
        }
    }
}

/// Runs `program` under every schedule `way` visits and returns the
/// deduplicated set of distinct `Result`s observed (§6). Two failing
/// schedules with the same `Failure` collapse to one entry, same as
/// two successful schedules returning equal values.
pub fn results_set<T: 'static + Eq + Hash>(
    way: Way,
    mem_type: MemoryType,
    program: impl Fn() -> Comp<T> + 'static,
) -> HashSet<Result<T, Failure>> {
    run_sct(way, mem_type, program)
        .into_iter()
        .map(|(r, _)| r)
        .collect()
}
