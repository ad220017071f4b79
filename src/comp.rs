//! The program-facing capability IR (§4.1.1, §6): `Comp<T>`, a minimal
//! free monad over the primitive operations of §4.1/§4.4, plus the
//! combinator functions user programs are written against. The engine
//! *is* the mock of this interface (§1): there is no separate "real IO"
//! backend, only the runtime's interpreter (`crate::runtime`).

use crate::action::{MaskingReason, MaskingState};
use crate::id::{CRefId, MVarId, ThreadId, TVarId};
use crate::memory::CasTicket;
use crate::stm::Stm;
use std::any::Any;
use std::rc::Rc;

/// One primitive request a thread's computation can make of the
/// runtime. Reified rather than called directly so the runtime can
/// interleave many threads one primitive at a time (§4.1.1).
pub enum Prim {
    Fork(Option<String>, Box<dyn FnOnce() -> Comp<Rc<dyn Any>>>),
    MyThreadId,
    GetNumCapabilities,
    SetNumCapabilities(usize),
    Yield,

    NewCRef(Option<String>, Rc<dyn Any>),
    ReadCRef(CRefId),
    ReadCRefCas(CRefId),
    ModCRef(CRefId, Box<dyn FnOnce(Rc<dyn Any>) -> Rc<dyn Any>>),
    ModCRefCas(CRefId, Box<dyn FnOnce(Rc<dyn Any>) -> Rc<dyn Any>>),
    WriteCRef(CRefId, Rc<dyn Any>),
    CasCRef(CasTicket, Rc<dyn Any>),

    NewMVar(Option<String>, Option<Rc<dyn Any>>),
    PutMVar(MVarId, Rc<dyn Any>),
    TryPutMVar(MVarId, Rc<dyn Any>),
    ReadMVar(MVarId),
    TryReadMVar(MVarId),
    TakeMVar(MVarId),
    TryTakeMVar(MVarId),

    /// Re-callable (`Fn`, not `FnOnce`): a `retry` restarts the whole
    /// transaction body from scratch on its next attempt, matching
    /// GHC's actual STM semantics (including re-running any `new_tvar`
    /// calls inside a retried transaction).
    Atomically(Box<dyn Fn() -> Stm<Rc<dyn Any>>>),

    Throw(Rc<dyn Any>),
    /// Enters a catch scope: pushes a handler frame. The matching exit
    /// is the separate `PopCatching` primitive, so both halves are
    /// independently trace-visible (§3 lists `Catching`/`PopCatching`
    /// as distinct actions).
    Catching(HandlerFrame),
    PopCatching,
    ThrowTo(ThreadId, Rc<dyn Any>),
    SetMasking(MaskingReason, MaskingState),
    /// Restores a masking state saved before an automatic mask change
    /// (e.g. entering an exception handler), distinct from an explicit
    /// `SetMasking` so the trace records which one happened (§3).
    ResetMasking(MaskingReason, MaskingState),

    LiftIO(Box<dyn FnOnce() -> Rc<dyn Any>>),

    Subconcurrency(Box<dyn FnOnce() -> Comp<Rc<dyn Any>>>),
}

/// A pushed exception handler: `matches` tests whether a thrown payload
/// is of the handled type; `handler` (consumed at most once, when this
/// frame actually catches something) builds the recovery computation.
pub struct HandlerFrame {
    pub matches: Box<dyn Fn(&Rc<dyn Any>) -> bool>,
    pub handler: Box<dyn FnOnce(Rc<dyn Any>) -> Comp<Rc<dyn Any>>>,
}

/// The reified result of a `Prim`; the continuation closure stored
/// alongside each `Comp::Eff` knows exactly which variant to expect,
/// since it was constructed by the matching combinator below.
pub enum PrimOut {
    Unit,
    Tid(ThreadId),
    Count(usize),
    CRef(CRefId),
    MVarId(MVarId),
    Value(Rc<dyn Any>),
    MaybeValue(Option<Rc<dyn Any>>),
    Bool(bool),
    ReadForCas(Rc<dyn Any>, CasTicket),
}

/// A user computation: either finished (`Pure`), or wanting to perform
/// one `Prim` and continue with whatever it answers (`Eff`).
pub enum Comp<T> {
    Pure(T),
    Eff(Prim, Box<dyn FnOnce(PrimOut) -> Comp<T>>),
}

impl<T: 'static> Comp<T> {
    pub fn and_then<U: 'static>(self, f: impl FnOnce(T) -> Comp<U> + 'static) -> Comp<U> {
        match self {
            Comp::Pure(t) => f(t),
            Comp::Eff(p, k) => Comp::Eff(p, Box::new(move |out| k(out).and_then(f))),
        }
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Comp<U> {
        self.and_then(move |t| Comp::Pure(f(t)))
    }
}

/// Extracts a concrete `T` from an erased `Rc<dyn Any>`, assuming this
/// is the value's only remaining live reference. Internal invariant:
/// the runtime never keeps a second clone of a value past the point it
/// hands ownership back to the program, so this always succeeds.
pub(crate) fn downcast_rc<T: 'static>(v: Rc<dyn Any>) -> T {
    match v.downcast::<T>() {
        Ok(rc) => Rc::try_unwrap(rc)
            .unwrap_or_else(|_| unreachable!("simulated value had more than one live reference")),
        Err(_) => unreachable!("type mismatch extracting a simulated value"),
    }
}

fn erase<T: 'static>(comp: Comp<T>) -> Comp<Rc<dyn Any>> {
    comp.map(|t| Rc::new(t) as Rc<dyn Any>)
}

fn unerase<T: 'static>() -> impl FnOnce(Rc<dyn Any>) -> Comp<T> {
    |v| Comp::Pure(downcast_rc::<T>(v))
}

// ---- thread management --------------------------------------------------

pub fn fork(body: impl FnOnce() -> Comp<()> + 'static) -> Comp<ThreadId> {
    fork_named(None, body)
}

pub fn fork_named(
    name: Option<&str>,
    body: impl FnOnce() -> Comp<()> + 'static,
) -> Comp<ThreadId> {
    let name = name.map(|s| s.to_string());
    Comp::Eff(
        Prim::Fork(name, Box::new(move || erase(body()))),
        Box::new(|out| match out {
            PrimOut::Tid(t) => Comp::Pure(t),
            _ => unreachable!("Fork always answers with PrimOut::Tid"),
        }),
    )
}

pub fn my_thread_id() -> Comp<ThreadId> {
    Comp::Eff(
        Prim::MyThreadId,
        Box::new(|out| match out {
            PrimOut::Tid(t) => Comp::Pure(t),
            _ => unreachable!("MyThreadId always answers with PrimOut::Tid"),
        }),
    )
}

pub fn get_num_capabilities() -> Comp<usize> {
    Comp::Eff(
        Prim::GetNumCapabilities,
        Box::new(|out| match out {
            PrimOut::Count(n) => Comp::Pure(n),
            _ => unreachable!("GetNumCapabilities always answers with PrimOut::Count"),
        }),
    )
}

pub fn set_num_capabilities(n: usize) -> Comp<()> {
    Comp::Eff(
        Prim::SetNumCapabilities(n),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("SetNumCapabilities always answers with PrimOut::Unit"),
        }),
    )
}

pub fn yield_now() -> Comp<()> {
    Comp::Eff(
        Prim::Yield,
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("Yield always answers with PrimOut::Unit"),
        }),
    )
}

// ---- mutable cells -------------------------------------------------------

pub fn new_cref<T: 'static>(initial: T) -> Comp<CRefId> {
    new_cref_named(None, initial)
}

pub fn new_cref_named<T: 'static>(name: Option<&str>, initial: T) -> Comp<CRefId> {
    let name = name.map(|s| s.to_string());
    Comp::Eff(
        Prim::NewCRef(name, Rc::new(initial)),
        Box::new(|out| match out {
            PrimOut::CRef(c) => Comp::Pure(c),
            _ => unreachable!("NewCRef always answers with PrimOut::CRef"),
        }),
    )
}

pub fn read_cref(id: CRefId) -> Comp<Rc<dyn Any>> {
    Comp::Eff(
        Prim::ReadCRef(id),
        Box::new(|out| match out {
            PrimOut::Value(v) => Comp::Pure(v),
            _ => unreachable!("ReadCRef always answers with PrimOut::Value"),
        }),
    )
}

pub fn read_cref_as<T: Clone + 'static>(id: CRefId) -> Comp<T> {
    read_cref(id).map(|v| v.downcast_ref::<T>().expect("read_cref_as type mismatch").clone())
}

pub fn write_cref<T: 'static>(id: CRefId, value: T) -> Comp<()> {
    Comp::Eff(
        Prim::WriteCRef(id, Rc::new(value)),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("WriteCRef always answers with PrimOut::Unit"),
        }),
    )
}

pub fn modify_cref<T: 'static>(id: CRefId, f: impl FnOnce(&T) -> T + 'static) -> Comp<()> {
    Comp::Eff(
        Prim::ModCRef(
            id,
            Box::new(move |old| Rc::new(f(old.downcast_ref::<T>().expect("modify_cref type mismatch")))),
        ),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("ModCRef always answers with PrimOut::Unit"),
        }),
    )
}

pub fn modify_cref_cas<T: 'static>(id: CRefId, f: impl FnOnce(&T) -> T + 'static) -> Comp<()> {
    Comp::Eff(
        Prim::ModCRefCas(
            id,
            Box::new(move |old| {
                Rc::new(f(old.downcast_ref::<T>().expect("modify_cref_cas type mismatch")))
            }),
        ),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("ModCRefCas always answers with PrimOut::Unit"),
        }),
    )
}

/// `readForCAS`: returns the value plus an implicit ticket a subsequent
/// `cas_cref` checks against (§4.2).
pub fn read_cref_cas(id: CRefId) -> Comp<(Rc<dyn Any>, CasTicket)> {
    Comp::Eff(
        Prim::ReadCRefCas(id),
        Box::new(|out| match out {
            PrimOut::ReadForCas(v, t) => Comp::Pure((v, t)),
            _ => unreachable!("ReadCRefCas always answers with PrimOut::ReadForCas"),
        }),
    )
}

pub fn cas_cref<T: 'static>(ticket: CasTicket, new_value: T) -> Comp<bool> {
    Comp::Eff(
        Prim::CasCRef(ticket, Rc::new(new_value)),
        Box::new(|out| match out {
            PrimOut::Bool(b) => Comp::Pure(b),
            _ => unreachable!("CasCRef always answers with PrimOut::Bool"),
        }),
    )
}

// ---- blocking variables ---------------------------------------------------

pub fn new_mvar<T: 'static>(initial: T) -> Comp<MVarId> {
    new_mvar_inner(None, Some(Rc::new(initial)))
}

pub fn new_empty_mvar() -> Comp<MVarId> {
    new_mvar_inner(None, None)
}

fn new_mvar_inner(name: Option<String>, initial: Option<Rc<dyn Any>>) -> Comp<MVarId> {
    Comp::Eff(
        Prim::NewMVar(name, initial),
        Box::new(|out| match out {
            PrimOut::MVarId(m) => Comp::Pure(m),
            _ => unreachable!("NewMVar always answers with PrimOut::MVarId"),
        }),
    )
}

pub fn put_mvar<T: 'static>(id: MVarId, value: T) -> Comp<()> {
    Comp::Eff(
        Prim::PutMVar(id, Rc::new(value)),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("PutMVar always answers with PrimOut::Unit"),
        }),
    )
}

pub fn try_put_mvar<T: 'static>(id: MVarId, value: T) -> Comp<bool> {
    Comp::Eff(
        Prim::TryPutMVar(id, Rc::new(value)),
        Box::new(|out| match out {
            PrimOut::Bool(b) => Comp::Pure(b),
            _ => unreachable!("TryPutMVar always answers with PrimOut::Bool"),
        }),
    )
}

pub fn take_mvar(id: MVarId) -> Comp<Rc<dyn Any>> {
    Comp::Eff(
        Prim::TakeMVar(id),
        Box::new(|out| match out {
            PrimOut::Value(v) => Comp::Pure(v),
            _ => unreachable!("TakeMVar always answers with PrimOut::Value"),
        }),
    )
}

pub fn take_mvar_as<T: Clone + 'static>(id: MVarId) -> Comp<T> {
    take_mvar(id).map(|v| v.downcast_ref::<T>().expect("take_mvar_as type mismatch").clone())
}

pub fn try_take_mvar(id: MVarId) -> Comp<Option<Rc<dyn Any>>> {
    Comp::Eff(
        Prim::TryTakeMVar(id),
        Box::new(|out| match out {
            PrimOut::MaybeValue(v) => Comp::Pure(v),
            _ => unreachable!("TryTakeMVar always answers with PrimOut::MaybeValue"),
        }),
    )
}

pub fn read_mvar(id: MVarId) -> Comp<Rc<dyn Any>> {
    Comp::Eff(
        Prim::ReadMVar(id),
        Box::new(|out| match out {
            PrimOut::Value(v) => Comp::Pure(v),
            _ => unreachable!("ReadMVar always answers with PrimOut::Value"),
        }),
    )
}

pub fn read_mvar_as<T: Clone + 'static>(id: MVarId) -> Comp<T> {
    read_mvar(id).map(|v| v.downcast_ref::<T>().expect("read_mvar_as type mismatch").clone())
}

pub fn try_read_mvar(id: MVarId) -> Comp<Option<Rc<dyn Any>>> {
    Comp::Eff(
        Prim::TryReadMVar(id),
        Box::new(|out| match out {
            PrimOut::MaybeValue(v) => Comp::Pure(v),
            _ => unreachable!("TryReadMVar always answers with PrimOut::MaybeValue"),
        }),
    )
}

// ---- transactions ----------------------------------------------------------

/// `transaction` is called once per attempt: a `retry` restarts it from
/// scratch the next time the thread is scheduled, rather than resuming
/// mid-transaction (the real behaviour `Stm`'s `Retry` variant models).
pub fn atomically<T: 'static>(transaction: impl Fn() -> Stm<T> + 'static) -> Comp<T> {
    Comp::Eff(
        Prim::Atomically(Box::new(move || transaction().map(|t| Rc::new(t) as Rc<dyn Any>))),
        Box::new(|out| match out {
            PrimOut::Value(v) => Comp::Pure(downcast_rc::<T>(v)),
            _ => unreachable!("Atomically always answers with PrimOut::Value"),
        }),
    )
}

// ---- exceptions --------------------------------------------------------------

pub fn throw<E: 'static, T: 'static>(exc: E) -> Comp<T> {
    Comp::Eff(Prim::Throw(Rc::new(exc)), Box::new(|_| unreachable!("Throw never returns")))
}

/// Expands to two independently trace-visible steps bracketing `body`:
/// a `Catching` that pushes the handler frame, and a `PopCatching` once
/// `body` returns normally (mirrors the `Catching`/`PopCatching` pair in
/// §3's action list).
pub fn catch<E: 'static, T: 'static>(
    body: impl FnOnce() -> Comp<T> + 'static,
    handler: impl FnOnce(Rc<E>) -> Comp<T> + 'static,
) -> Comp<T> {
    let matches: Box<dyn Fn(&Rc<dyn Any>) -> bool> = Box::new(|v: &Rc<dyn Any>| v.is::<E>());
    let handler: Box<dyn FnOnce(Rc<dyn Any>) -> Comp<Rc<dyn Any>>> = Box::new(move |payload| {
        let typed = payload
            .downcast::<E>()
            .unwrap_or_else(|_| unreachable!("Catch only invokes handler on a type match"));
        erase(handler(typed))
    });
    Comp::Eff(
        Prim::Catching(HandlerFrame { matches, handler }),
        Box::new(move |out| match out {
            PrimOut::Unit => {
                let after_body = erase(body()).and_then(|v| {
                    Comp::Eff(
                        Prim::PopCatching,
                        Box::new(move |out2| match out2 {
                            PrimOut::Unit => Comp::Pure(v),
                            _ => unreachable!("PopCatching always answers with PrimOut::Unit"),
                        }),
                    )
                });
                after_body.and_then(|v| unerase::<T>()(v))
            }
            _ => unreachable!("Catching always answers with PrimOut::Unit"),
        }),
    )
}

pub fn throw_to<E: 'static>(target: ThreadId, exc: E) -> Comp<()> {
    Comp::Eff(
        Prim::ThrowTo(target, Rc::new(exc)),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("ThrowTo always answers with PrimOut::Unit"),
        }),
    )
}

pub fn set_masking(reason: MaskingReason, state: MaskingState) -> Comp<()> {
    Comp::Eff(
        Prim::SetMasking(reason, state),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("SetMasking always answers with PrimOut::Unit"),
        }),
    )
}

/// Restores a previously-saved masking state. Used internally by the
/// runtime to unwind the automatic mask it applies for the duration of
/// an exception handler (§4.1); not part of the program-facing API
/// since user code only ever asks to *set* a mask, never to reset one.
pub(crate) fn reset_masking(reason: MaskingReason, state: MaskingState) -> Comp<()> {
    Comp::Eff(
        Prim::ResetMasking(reason, state),
        Box::new(|out| match out {
            PrimOut::Unit => Comp::Pure(()),
            _ => unreachable!("ResetMasking always answers with PrimOut::Unit"),
        }),
    )
}

// ---- lifting & nested exploration ---------------------------------------------

pub fn lift_io<T: 'static>(action: impl FnOnce() -> T + 'static) -> Comp<T> {
    Comp::Eff(
        Prim::LiftIO(Box::new(move || Rc::new(action()) as Rc<dyn Any>)),
        Box::new(|out| match out {
            PrimOut::Value(v) => unerase::<T>()(v),
            _ => unreachable!("LiftIO always answers with PrimOut::Value"),
        }),
    )
}

/// Runs `body` as a nested, single-threaded sub-execution with a fresh
/// thread table containing only a local initial thread (§4.1). Fails
/// with `IllegalSubconcurrency` if nested inside another
/// `subconcurrency`, or invoked while more than the calling thread is
/// live.
pub fn subconcurrency<T: 'static>(body: impl FnOnce() -> Comp<T> + 'static) -> Comp<T> {
    Comp::Eff(
        Prim::Subconcurrency(Box::new(move || erase(body()))),
        Box::new(|out| match out {
            PrimOut::Value(v) => unerase::<T>()(v),
            _ => unreachable!("Subconcurrency always answers with PrimOut::Value"),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_then_chains_pure_values_without_touching_the_runtime() {
        let comp: Comp<i64> = Comp::Pure(1).and_then(|x| Comp::Pure(x + 1)).and_then(|x| Comp::Pure(x * 10));
        match comp {
            Comp::Pure(v) => assert_eq!(v, 20),
            Comp::Eff(..) => panic!("pure chain should never touch an effect"),
        }
    }

    #[test]
    fn downcast_rc_round_trips_a_value() {
        let v: Rc<dyn Any> = Rc::new(42i64);
        assert_eq!(downcast_rc::<i64>(v), 42);
    }
}
