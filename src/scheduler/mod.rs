//! Pluggable schedulers (§4.5): pure functions from
//! `(trace-prefix, prior-thread?, runnable-with-lookahead, state)` to
//! `(chosen thread or abort, new state)`.

mod non_preemptive;
mod random;
mod round_robin;

pub use non_preemptive::NonPreemptive;
pub use random::RandomSched;
pub use round_robin::RoundRobinSched;

use crate::action::Lookahead;
use crate::id::ThreadId;
use crate::trace::Trace;

/// A scheduler: given the trace so far, the previously-running thread
/// (if any), and the set of currently runnable threads with their
/// lookaheads, decides which thread runs next (or signals abort by
/// returning `None`).
pub trait Scheduler {
    type State;

    fn initial_state(&self) -> Self::State;

    fn schedule(
        &self,
        trace: &Trace,
        prior: Option<ThreadId>,
        runnable: &[(ThreadId, Lookahead)],
        state: Self::State,
    ) -> (Option<ThreadId>, Self::State);
}

/// Picks the lowest real-thread id, preferring it over any commit
/// pseudo-thread, per the documented tie-break in §9 ("commit
/// pseudo-threads are preferred last"). Shared by every built-in
/// scheduler's fallback and by the DPOR explorer's free continuation.
pub fn lowest_preferring_real(runnable: &[(ThreadId, Lookahead)]) -> Option<ThreadId> {
    runnable
        .iter()
        .map(|(t, _)| *t)
        .min_by_key(|t| (t.num() < 0, t.num()))
}
