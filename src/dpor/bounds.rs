//! Bounding functions (§4.3): independently optional limits on how much
//! of the schedule space the explorer covers, composed by conjunction
//! (a schedule must satisfy every configured bound).

use crate::action::{Decision, ThreadAction};
use crate::trace::Trace;

/// `preemption`/`fair`/`length` each default to unbounded (`None`);
/// set one to cap that dimension. The preemption bound is enforced
/// live by the explorer's scheduler (it restricts *choices*, not just
/// post-hoc acceptance); `fair`/`length` are checked post-hoc by
/// `within` against a completed trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bounds {
    pub preemption: Option<usize>,
    pub fair: Option<usize>,
    pub length: Option<usize>,
}

impl Bounds {
    pub fn none() -> Self {
        Bounds::default()
    }

    /// dejafu's usual systematic default: two preemptions, a fairness
    /// bound of five, no length cap.
    pub fn default_preemption_and_fair() -> Self {
        Bounds {
            preemption: Some(2),
            fair: Some(5),
            length: None,
        }
    }

    pub fn preemption_bound(n: usize) -> Self {
        Bounds {
            preemption: Some(n),
            ..Bounds::none()
        }
    }

    pub fn fair_bound(n: usize) -> Self {
        Bounds {
            fair: Some(n),
            ..Bounds::none()
        }
    }

    pub fn length_bound(n: usize) -> Self {
        Bounds {
            length: Some(n),
            ..Bounds::none()
        }
    }

    /// Whether a completed trace respects every configured bound.
    pub fn within(&self, trace: &Trace) -> bool {
        if let Some(limit) = self.length {
            if trace.len() > limit {
                return false;
            }
        }
        if let Some(limit) = self.fair {
            if count_yields(trace) > limit {
                return false;
            }
        }
        if let Some(limit) = self.preemption {
            if count_preemptions(trace) > limit {
                return false;
            }
        }
        true
    }
}

/// A step is a preemption if the scheduler switched away from the
/// prior thread while that thread was still runnable, i.e. the switch
/// wasn't forced by the prior thread blocking or stopping — *excluding*
/// §4.3's two carve-outs: a switch to or from a commit pseudo-thread
/// (negative thread id) never counts, and neither does a switch that
/// immediately follows a `Yield` (the thread gave up its turn
/// voluntarily rather than being preempted).
pub fn count_preemptions(trace: &Trace) -> usize {
    let mut count = 0;
    let mut prior: Option<crate::id::ThreadId> = None;
    let mut prior_action: Option<&ThreadAction> = None;
    for step in trace {
        if let Decision::SwitchTo(tid) = &step.decision {
            let to_commit_thread = tid.num() < 0;
            let from_commit_thread = prior.map_or(false, |p| p.num() < 0);
            let after_yield = matches!(prior_action, Some(ThreadAction::Yield));
            if !to_commit_thread && !from_commit_thread && !after_yield {
                if let Some(p) = prior {
                    if step.runnable.iter().any(|(t, _)| *t == p) {
                        count += 1;
                    }
                }
            }
        }
        prior = step.decision.tid(prior);
        prior_action = Some(&step.action);
    }
    count
}

/// Coarse stand-in for dejafu's fairness bound (the max difference in
/// how many turns distinct threads get before every thread sees one):
/// counts explicit `Yield` actions, which is what a program relies on
/// to force a fairness-bound test to explore an alternative schedule.
fn count_yields(trace: &Trace) -> usize {
    trace
        .iter()
        .filter(|s| matches!(s.action, ThreadAction::Yield))
        .count()
}
