//! `PrefixSched`: replays an explicit prefix of thread choices, then
//! free-continues per the documented tie-break (§9), restricting
//! preemptive choices once the live preemption bound is spent. One
//! instance drives exactly one schedule of the DPOR loop in
//! `crate::dpor::explore`.

use crate::action::Lookahead;
use crate::dpor::bounds::{count_preemptions, Bounds};
use crate::id::ThreadId;
use crate::scheduler::{lowest_preferring_real, Scheduler};
use crate::trace::Trace;

pub struct PrefixSched {
    prefix: Vec<ThreadId>,
    bounds: Bounds,
}

impl PrefixSched {
    pub fn new(prefix: Vec<ThreadId>, bounds: Bounds) -> Self {
        PrefixSched { prefix, bounds }
    }
}

impl Scheduler for PrefixSched {
    /// Index of the next prefix entry to consume.
    type State = usize;

    fn initial_state(&self) -> Self::State {
        0
    }

    fn schedule(
        &self,
        trace: &Trace,
        prior: Option<ThreadId>,
        runnable: &[(ThreadId, Lookahead)],
        state: Self::State,
    ) -> (Option<ThreadId>, Self::State) {
        if runnable.is_empty() {
            return (None, state);
        }
        if state < self.prefix.len() {
            let forced = self.prefix[state];
            return if runnable.iter().any(|(t, _)| *t == forced) {
                (Some(forced), state + 1)
            } else {
                // The prefix no longer applies (an earlier choice this
                // run took a different path than when it was recorded);
                // abort rather than silently diverge from the intended
                // exploration point.
                (None, state)
            };
        }

        if let Some(limit) = self.bounds.preemption {
            if count_preemptions(trace) >= limit {
                if let Some(p) = prior {
                    if runnable.iter().any(|(t, _)| *t == p) {
                        return (Some(p), state);
                    }
                }
                return (None, state);
            }
        }
        (lowest_preferring_real(runnable), state)
    }
}
