use super::Scheduler;
use crate::action::Lookahead;
use crate::id::ThreadId;
use crate::trace::Trace;

/// Wraps another scheduler: if the prior thread is still runnable,
/// keeps running it; otherwise delegates (§4.5).
pub struct NonPreemptive<S> {
    inner: S,
}

impl<S> NonPreemptive<S> {
    pub fn new(inner: S) -> Self {
        NonPreemptive { inner }
    }
}

impl<S: Scheduler> Scheduler for NonPreemptive<S> {
    type State = S::State;

    fn initial_state(&self) -> Self::State {
        self.inner.initial_state()
    }

    fn schedule(
        &self,
        trace: &Trace,
        prior: Option<ThreadId>,
        runnable: &[(ThreadId, Lookahead)],
        state: Self::State,
    ) -> (Option<ThreadId>, Self::State) {
        if let Some(p) = prior {
            if runnable.iter().any(|(t, _)| *t == p) {
                return (Some(p), state);
            }
        }
        self.inner.schedule(trace, prior, runnable, state)
    }
}
