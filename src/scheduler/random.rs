use super::Scheduler;
use crate::action::Lookahead;
use crate::id::ThreadId;
use crate::trace::Trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks uniformly from the runnable set using a pluggable PRNG state
/// (§4.5). The teacher's `rand` dependency, carried forward, seeded
/// explicitly so a `(seed, iterations)` run is reproducible.
pub struct RandomSched {
    seed: u64,
}

impl RandomSched {
    pub fn new(seed: u64) -> Self {
        RandomSched { seed }
    }
}

impl Scheduler for RandomSched {
    type State = StdRng;

    fn initial_state(&self) -> Self::State {
        StdRng::seed_from_u64(self.seed)
    }

    fn schedule(
        &self,
        _trace: &Trace,
        _prior: Option<ThreadId>,
        runnable: &[(ThreadId, Lookahead)],
        mut state: Self::State,
    ) -> (Option<ThreadId>, Self::State) {
        if runnable.is_empty() {
            return (None, state);
        }
        let idx = state.gen_range(0, runnable.len());
        (Some(runnable[idx].0), state)
    }
}
