use super::Scheduler;
use crate::action::Lookahead;
use crate::id::ThreadId;
use crate::trace::Trace;

/// Picks the lowest thread id strictly greater than the prior thread,
/// wrapping to the minimum runnable id (§4.5). Stateless.
pub struct RoundRobinSched;

impl Scheduler for RoundRobinSched {
    type State = ();

    fn initial_state(&self) -> Self::State {}

    fn schedule(
        &self,
        _trace: &Trace,
        prior: Option<ThreadId>,
        runnable: &[(ThreadId, Lookahead)],
        _state: Self::State,
    ) -> (Option<ThreadId>, Self::State) {
        if runnable.is_empty() {
            return (None, ());
        }
        let pick = match prior {
            None => runnable.iter().map(|(t, _)| *t).min(),
            Some(p) => runnable
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| *t > p)
                .min()
                .or_else(|| runnable.iter().map(|(t, _)| *t).min()),
        };
        (pick, ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdSource;

    #[test]
    fn wraps_to_minimum_after_the_highest_id() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        let runnable = vec![
            (main, Lookahead::WillStop),
            (t1, Lookahead::WillStop),
            (t2, Lookahead::WillStop),
        ];
        let sched = RoundRobinSched;
        let (pick, _) = sched.schedule(&vec![], Some(t2), &runnable, ());
        assert_eq!(pick, Some(main));
    }
}
