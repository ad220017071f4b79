//! The action algebra (§3): `ThreadAction`, its `Lookahead` counterpart,
//! the coarse `ActionType` classification the DPOR explorer's
//! dependency relation is built on, and the `Decision`/masking
//! vocabulary shared by the runtime and the explorer.

use crate::id::{CRefId, MVarId, ThreadId, TVarId};
use crate::stm::TTrace;

/// Why a thread's masking state changed (matches the handler-stack
/// bookkeeping in §4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MaskingReason {
    MaskGeneral,
    OnException,
    OnHandlerEntry,
}

/// The masking state itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MaskingState {
    Unmasked,
    MaskedInterruptible,
    MaskedUninterruptible,
}

/// One event a thread can emit in a single runtime step (§3).
#[derive(Clone, Debug)]
pub enum ThreadAction {
    Fork(ThreadId),
    MyThreadId,
    GetNumCapabilities(usize),
    SetNumCapabilities(usize),
    Yield,

    NewCRef(CRefId),
    ReadCRef(CRefId),
    ReadCRefCas(CRefId),
    ModCRef(CRefId),
    ModCRefCas(CRefId),
    WriteCRef(CRefId),
    CasCRef(CRefId, bool),
    CommitCRef(ThreadId, CRefId),

    NewMVar(MVarId),
    PutMVar(MVarId, Vec<ThreadId>),
    BlockedPutMVar(MVarId),
    TryPutMVar(MVarId, bool, Vec<ThreadId>),
    ReadMVar(MVarId),
    TryReadMVar(MVarId, bool),
    BlockedReadMVar(MVarId),
    TakeMVar(MVarId, Vec<ThreadId>),
    BlockedTakeMVar(MVarId),
    TryTakeMVar(MVarId, bool, Vec<ThreadId>),

    STM(TTrace, Vec<ThreadId>),
    BlockedSTM(TTrace),

    Catching,
    PopCatching,
    Throw,
    ThrowTo(ThreadId),
    BlockedThrowTo(ThreadId),
    Killed,
    SetMasking(MaskingReason, MaskingState),
    ResetMasking(MaskingReason, MaskingState),

    LiftIO,

    Return,
    Stop,

    Subconcurrency,
    StopSubconcurrency,
}

/// What a thread is *about* to do, without committing to the outcome
/// (§3). Every `ThreadAction` except `Killed` has exactly one
/// `Lookahead` it `rewind`s to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Lookahead {
    WillFork,
    WillMyThreadId,
    WillGetNumCapabilities,
    WillSetNumCapabilities,
    WillYield,

    WillNewCRef,
    WillReadCRef(CRefId),
    WillReadCRefCas(CRefId),
    WillModCRef(CRefId),
    WillModCRefCas(CRefId),
    WillWriteCRef(CRefId),
    WillCasCRef(CRefId),
    WillCommitCRef(ThreadId, CRefId),

    WillNewMVar,
    WillPutMVar(MVarId),
    WillTryPutMVar(MVarId),
    WillReadMVar(MVarId),
    WillTryReadMVar(MVarId),
    WillTakeMVar(MVarId),
    WillTryTakeMVar(MVarId),

    WillSTM,
    WillCatching,
    WillPopCatching,
    WillThrow,
    WillThrowTo(ThreadId),
    WillSetMasking,
    WillResetMasking,

    WillLiftIO,

    WillReturn,
    WillStop,

    WillSubconcurrency,
    WillStopSubconcurrency,
}

/// Total, information-discarding map from an emitted action back to the
/// lookahead it must have come from. `Killed` has no `Lookahead` form
/// (§3): a thread is killed by `throwTo`, never by choosing to be
/// killed, so it never appears as a runnable thread's lookahead.
pub fn rewind(action: &ThreadAction) -> Option<Lookahead> {
    use Lookahead::*;
    use ThreadAction as TA;
    Some(match action {
        TA::Fork(_) => WillFork,
        TA::MyThreadId => WillMyThreadId,
        TA::GetNumCapabilities(_) => WillGetNumCapabilities,
        TA::SetNumCapabilities(_) => WillSetNumCapabilities,
        TA::Yield => WillYield,

        TA::NewCRef(_) => WillNewCRef,
        TA::ReadCRef(c) => WillReadCRef(*c),
        TA::ReadCRefCas(c) => WillReadCRefCas(*c),
        TA::ModCRef(c) => WillModCRef(*c),
        TA::ModCRefCas(c) => WillModCRefCas(*c),
        TA::WriteCRef(c) => WillWriteCRef(*c),
        TA::CasCRef(c, _) => WillCasCRef(*c),
        TA::CommitCRef(t, c) => WillCommitCRef(*t, *c),

        TA::NewMVar(_) => WillNewMVar,
        TA::PutMVar(m, _) => WillPutMVar(*m),
        TA::BlockedPutMVar(m) => WillPutMVar(*m),
        TA::TryPutMVar(m, _, _) => WillTryPutMVar(*m),
        TA::ReadMVar(m) => WillReadMVar(*m),
        TA::TryReadMVar(m, _) => WillTryReadMVar(*m),
        TA::BlockedReadMVar(m) => WillReadMVar(*m),
        TA::TakeMVar(m, _) => WillTakeMVar(*m),
        TA::BlockedTakeMVar(m) => WillTakeMVar(*m),
        TA::TryTakeMVar(m, _, _) => WillTryTakeMVar(*m),

        TA::STM(_, _) => WillSTM,
        TA::BlockedSTM(_) => WillSTM,

        TA::Catching => WillCatching,
        TA::PopCatching => WillPopCatching,
        TA::Throw => WillThrow,
        TA::ThrowTo(t) => WillThrowTo(*t),
        TA::BlockedThrowTo(t) => WillThrowTo(*t),
        TA::Killed => return None,
        TA::SetMasking(_, _) => WillSetMasking,
        TA::ResetMasking(_, _) => WillResetMasking,

        TA::LiftIO => WillLiftIO,

        TA::Return => WillReturn,
        TA::Stop => WillStop,

        TA::Subconcurrency => WillSubconcurrency,
        TA::StopSubconcurrency => WillStopSubconcurrency,
    })
}

/// The coarse classification the explorer's dependency relation is
/// built on (§3, §4.3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionType {
    UnsynchronisedRead(CRefId),
    UnsynchronisedWrite(CRefId),
    UnsynchronisedOther,
    PartiallySynchronisedCommit(CRefId),
    PartiallySynchronisedWrite(CRefId),
    PartiallySynchronisedModify(CRefId),
    SynchronisedModify(CRefId),
    SynchronisedRead(MVarId),
    SynchronisedWrite(MVarId),
    SynchronisedOther,
}

/// Derives the coarse classification from a `Lookahead`, per §3.
pub fn simplify_lookahead(l: &Lookahead) -> ActionType {
    use ActionType::*;
    use Lookahead::*;
    match l {
        WillReadCRef(c) => UnsynchronisedRead(*c),
        WillWriteCRef(c) => UnsynchronisedWrite(*c),
        WillReadCRefCas(c) => PartiallySynchronisedCommit(*c), // ticket read participates like a commit-observing op
        WillCommitCRef(_, c) => PartiallySynchronisedCommit(*c),
        WillCasCRef(c) => PartiallySynchronisedWrite(*c),
        WillModCRef(c) => SynchronisedModify(*c),
        WillModCRefCas(c) => SynchronisedModify(*c),

        WillPutMVar(m) | WillTryPutMVar(m) => SynchronisedWrite(*m),
        WillTakeMVar(m) | WillTryTakeMVar(m) => SynchronisedWrite(*m),
        WillReadMVar(m) | WillTryReadMVar(m) => SynchronisedRead(*m),

        WillSTM => SynchronisedOther,
        WillThrowTo(_) => SynchronisedOther,

        WillFork | WillMyThreadId | WillGetNumCapabilities | WillSetNumCapabilities
        | WillYield | WillNewCRef | WillNewMVar | WillCatching | WillPopCatching | WillThrow
        | WillSetMasking | WillResetMasking | WillLiftIO | WillReturn | WillStop
        | WillSubconcurrency | WillStopSubconcurrency => UnsynchronisedOther,
    }
}

/// Derives the coarse classification directly from a `ThreadAction` via
/// `rewind`; `Killed` classifies as `UnsynchronisedOther` since it
/// never races (the target thread is simply gone).
pub fn simplify_action(a: &ThreadAction) -> ActionType {
    match rewind(a) {
        Some(l) => simplify_lookahead(&l),
        None => ActionType::UnsynchronisedOther,
    }
}

/// The scheduling decision that produced one trace step (§3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    Start(ThreadId),
    Continue,
    SwitchTo(ThreadId),
}

impl Decision {
    pub fn tid(&self, prior: Option<ThreadId>) -> Option<ThreadId> {
        match self {
            Decision::Start(t) | Decision::SwitchTo(t) => Some(*t),
            Decision::Continue => prior,
        }
    }
}

/// Whether an action *releases*, i.e. can make another thread runnable
/// (§4.3): used by the fair-bound backtracking policy.
pub fn is_release(a: &ThreadAction) -> bool {
    matches!(
        a,
        ThreadAction::Fork(_)
            | ThreadAction::Yield
            | ThreadAction::PutMVar(_, _)
            | ThreadAction::BlockedPutMVar(_)
            | ThreadAction::TryPutMVar(_, _, _)
            | ThreadAction::ReadMVar(_)
            | ThreadAction::TryReadMVar(_, _)
            | ThreadAction::BlockedReadMVar(_)
            | ThreadAction::TakeMVar(_, _)
            | ThreadAction::BlockedTakeMVar(_)
            | ThreadAction::TryTakeMVar(_, _, _)
            | ThreadAction::STM(_, _)
            | ThreadAction::BlockedSTM(_)
            | ThreadAction::Throw
            | ThreadAction::ThrowTo(_)
            | ThreadAction::BlockedThrowTo(_)
            | ThreadAction::SetMasking(_, _)
            | ThreadAction::ResetMasking(_, _)
            | ThreadAction::Stop
    )
}

/// True for the `Blocked…` family: such a step makes no state change
/// other than marking the thread blocked (§3 invariant).
pub fn is_blocked_action(a: &ThreadAction) -> bool {
    matches!(
        a,
        ThreadAction::BlockedPutMVar(_)
            | ThreadAction::BlockedReadMVar(_)
            | ThreadAction::BlockedTakeMVar(_)
            | ThreadAction::BlockedSTM(_)
            | ThreadAction::BlockedThrowTo(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdSource;

    fn sample_actions(ids: &mut IdSource) -> Vec<ThreadAction> {
        let t = ids.fresh_thread(None);
        let c = ids.fresh_cref(None);
        let m = ids.fresh_mvar(None);
        vec![
            ThreadAction::Fork(t),
            ThreadAction::MyThreadId,
            ThreadAction::GetNumCapabilities(2),
            ThreadAction::SetNumCapabilities(4),
            ThreadAction::Yield,
            ThreadAction::NewCRef(c),
            ThreadAction::ReadCRef(c),
            ThreadAction::ReadCRefCas(c),
            ThreadAction::ModCRef(c),
            ThreadAction::ModCRefCas(c),
            ThreadAction::WriteCRef(c),
            ThreadAction::CasCRef(c, true),
            ThreadAction::CommitCRef(t, c),
            ThreadAction::NewMVar(m),
            ThreadAction::PutMVar(m, vec![t]),
            ThreadAction::BlockedPutMVar(m),
            ThreadAction::TryPutMVar(m, true, vec![]),
            ThreadAction::ReadMVar(m),
            ThreadAction::TryReadMVar(m, false),
            ThreadAction::BlockedReadMVar(m),
            ThreadAction::TakeMVar(m, vec![]),
            ThreadAction::BlockedTakeMVar(m),
            ThreadAction::TryTakeMVar(m, false, vec![]),
            ThreadAction::STM(vec![], vec![]),
            ThreadAction::BlockedSTM(vec![]),
            ThreadAction::Catching,
            ThreadAction::PopCatching,
            ThreadAction::Throw,
            ThreadAction::ThrowTo(t),
            ThreadAction::BlockedThrowTo(t),
            ThreadAction::SetMasking(MaskingReason::MaskGeneral, MaskingState::Unmasked),
            ThreadAction::ResetMasking(MaskingReason::OnHandlerEntry, MaskingState::Unmasked),
            ThreadAction::LiftIO,
            ThreadAction::Return,
            ThreadAction::Stop,
            ThreadAction::Subconcurrency,
            ThreadAction::StopSubconcurrency,
        ]
    }

    #[test]
    fn every_action_but_killed_rewinds() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        for a in sample_actions(&mut ids) {
            assert!(rewind(&a).is_some(), "{:?} should rewind", a);
        }
        assert!(rewind(&ThreadAction::Killed).is_none());
    }

    #[test]
    fn rewind_round_trip_preserves_classification() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        for a in sample_actions(&mut ids) {
            let l = rewind(&a).unwrap();
            assert_eq!(simplify_action(&a), simplify_lookahead(&l));
        }
    }

    #[test]
    fn blocked_actions_are_flagged() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let m = ids.fresh_mvar(None);
        assert!(is_blocked_action(&ThreadAction::BlockedTakeMVar(m)));
        assert!(!is_blocked_action(&ThreadAction::TakeMVar(m, vec![])));
    }
}
