//! Transaction engine: a nested STM interpreter with retry/orElse/catch
//! semantics (§4.4), plus the `TAction`/`TTrace` algebra (§3) the DPOR
//! explorer's dependency relation consumes.

use crate::id::TVarId;
use std::any::Any;
use std::collections::HashSet;
use std::rc::Rc;

/// One step of a transaction, as recorded in a `TTrace`. Mirrors
/// `ThreadAction` but for the inner STM interpreter.
#[derive(Clone)]
pub enum TAction {
    TNew,
    TRead(TVarId),
    TWrite(TVarId),
    TRetry,
    /// `orElse left right`; `right` is `None` when the left branch
    /// committed without retrying.
    TOrElse(Box<TTrace>, Option<Box<TTrace>>),
    TThrow,
    /// `catch body handler`; `handler` is `None` when `body` didn't
    /// throw.
    TCatch(Box<TTrace>, Option<Box<TTrace>>),
    TStop,
}

pub type TTrace = Vec<TAction>;

/// The set of tvars touched by a single `TAction`, recursing into the
/// non-taken and taken branches of `orElse`/`catch`.
pub fn tvars_of_action(action: &TAction) -> HashSet<TVarId> {
    let mut out = HashSet::new();
    collect_tvars(action, &mut out);
    out
}

fn collect_tvars(action: &TAction, out: &mut HashSet<TVarId>) {
    match action {
        TAction::TRead(tv) | TAction::TWrite(tv) => {
            out.insert(*tv);
        }
        TAction::TOrElse(left, right) => {
            for a in left.iter() {
                collect_tvars(a, out);
            }
            if let Some(right) = right {
                for a in right.iter() {
                    collect_tvars(a, out);
                }
            }
        }
        TAction::TCatch(body, handler) => {
            for a in body.iter() {
                collect_tvars(a, out);
            }
            if let Some(handler) = handler {
                for a in handler.iter() {
                    collect_tvars(a, out);
                }
            }
        }
        TAction::TNew | TAction::TRetry | TAction::TThrow | TAction::TStop => {}
    }
}

/// The set of tvars touched anywhere in a trace.
pub fn tvars_of(trace: &TTrace) -> HashSet<TVarId> {
    let mut out = HashSet::new();
    for a in trace {
        collect_tvars(a, &mut out);
    }
    out
}

/// Whether a trace contains at least one write, anywhere including
/// nested branches.
pub fn writes_any(trace: &TTrace) -> bool {
    trace.iter().any(|a| match a {
        TAction::TWrite(_) => true,
        TAction::TOrElse(left, right) => {
            writes_any(left) || right.as_ref().map_or(false, |r| writes_any(r))
        }
        TAction::TCatch(body, handler) => {
            writes_any(body) || handler.as_ref().map_or(false, |h| writes_any(h))
        }
        _ => false,
    })
}

/// The per-transaction interpreter state: local read/write sets plus
/// the store of committed tvar values it reads from and, on commit,
/// writes into.
pub struct TVarStore {
    values: std::collections::HashMap<TVarId, Rc<dyn Any>>,
    /// Threads blocked in `retry`, keyed by the tvars in their read-set.
    waiters: std::collections::HashMap<TVarId, Vec<crate::id::ThreadId>>,
}

impl Default for TVarStore {
    fn default() -> Self {
        TVarStore {
            values: std::collections::HashMap::new(),
            waiters: std::collections::HashMap::new(),
        }
    }
}

impl TVarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tv: TVarId, value: Rc<dyn Any>) {
        self.values.insert(tv, value);
    }

    pub fn get(&self, tv: TVarId) -> Option<Rc<dyn Any>> {
        self.values.get(&tv).cloned()
    }

    /// Enqueues `tid` to be woken when any of `read_set` is next
    /// written by a committed transaction.
    pub fn block_on(&mut self, tid: crate::id::ThreadId, read_set: &HashSet<TVarId>) {
        for tv in read_set {
            self.waiters.entry(*tv).or_default().push(tid);
        }
    }

    /// Merges a transaction's write-set into the store and returns the
    /// (deduplicated) set of threads to wake, removing them from the
    /// waiter lists of the written tvars.
    pub fn commit(
        &mut self,
        writes: std::collections::HashMap<TVarId, Rc<dyn Any>>,
    ) -> Vec<crate::id::ThreadId> {
        let mut woken = HashSet::new();
        for (tv, value) in writes {
            self.values.insert(tv, value);
            if let Some(waiting) = self.waiters.remove(&tv) {
                woken.extend(waiting);
            }
        }
        let mut woken: Vec<_> = woken.into_iter().collect();
        woken.sort();
        woken
    }

    /// True iff at least one thread is currently blocked on `tv` and no
    /// other runnable thread can ever write to it. Used as a building
    /// block for STM-deadlock detection at the runtime level, which
    /// also knows which threads are alive.
    pub fn has_waiters(&self, tv: TVarId) -> bool {
        self.waiters
            .get(&tv)
            .map_or(false, |w| !w.is_empty())
    }

    pub fn waiters_on(&self, tv: TVarId) -> &[crate::id::ThreadId] {
        self.waiters.get(&tv).map_or(&[], |v| v.as_slice())
    }
}

/// One transaction's in-flight interpreter state (§4.4): a local
/// read-set/write-set plus the trace recorded so far. `retry` discards
/// the write-set and any reads it performed itself; `orElse`/`catch`
/// roll back to a saved snapshot on their alternate branch.
pub struct TLog {
    pub reads: HashSet<TVarId>,
    pub writes: std::collections::HashMap<TVarId, Rc<dyn Any>>,
    pub trace: TTrace,
}

impl TLog {
    pub fn new() -> Self {
        TLog {
            reads: HashSet::new(),
            writes: std::collections::HashMap::new(),
            trace: Vec::new(),
        }
    }

    /// A snapshot to roll back to on `orElse`'s alternate branch or a
    /// caught exception.
    pub fn snapshot(&self) -> (HashSet<TVarId>, std::collections::HashMap<TVarId, Rc<dyn Any>>) {
        (self.reads.clone(), self.writes.clone())
    }

    pub fn restore(&mut self, snap: (HashSet<TVarId>, std::collections::HashMap<TVarId, Rc<dyn Any>>)) {
        self.reads = snap.0;
        self.writes = snap.1;
    }
}

/// The free-monad IR for a transaction body (§4.1.1's technique applied
/// to §4.4). Unlike the outer `Comp<T>`, a transaction never needs to
/// suspend back to the scheduler mid-flight — it is interpreted
/// eagerly, in one go, by `interpret` below, because a transaction is
/// atomic with respect to every other thread.
pub enum Stm<T> {
    Pure(T),
    Retry,
    Throw(Rc<dyn Any>),
    Prim(StmPrim, Box<dyn FnOnce(StmOut) -> Stm<T>>),
    OrElse(
        Box<dyn FnOnce() -> Stm<Rc<dyn Any>>>,
        Box<dyn FnOnce() -> Stm<Rc<dyn Any>>>,
        Box<dyn FnOnce(Rc<dyn Any>) -> Stm<T>>,
    ),
    Catch(
        Box<dyn Fn(&Rc<dyn Any>) -> bool>,
        Box<dyn FnOnce() -> Stm<Rc<dyn Any>>>,
        Box<dyn FnOnce(Rc<dyn Any>) -> Stm<Rc<dyn Any>>>,
        Box<dyn FnOnce(Rc<dyn Any>) -> Stm<T>>,
    ),
}

pub enum StmPrim {
    NewTVar(Rc<dyn Any>),
    ReadTVar(TVarId),
    WriteTVar(TVarId, Rc<dyn Any>),
}

pub enum StmOut {
    Unit,
    TVar(TVarId),
    Value(Rc<dyn Any>),
}

impl<T: 'static> Stm<T> {
    pub fn and_then<U: 'static>(self, f: impl FnOnce(T) -> Stm<U> + 'static) -> Stm<U> {
        match self {
            Stm::Pure(t) => f(t),
            Stm::Retry => Stm::Retry,
            Stm::Throw(e) => Stm::Throw(e),
            Stm::Prim(p, k) => Stm::Prim(p, Box::new(move |o| k(o).and_then(f))),
            Stm::OrElse(a, b, k) => Stm::OrElse(a, b, Box::new(move |v| k(v).and_then(f))),
            Stm::Catch(m, body, handler, k) => {
                Stm::Catch(m, body, handler, Box::new(move |v| k(v).and_then(f)))
            }
        }
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Stm<U> {
        self.and_then(move |t| Stm::Pure(f(t)))
    }
}

pub fn new_tvar<T: 'static>(initial: T) -> Stm<TVarId> {
    Stm::Prim(
        StmPrim::NewTVar(Rc::new(initial)),
        Box::new(|out| match out {
            StmOut::TVar(tv) => Stm::Pure(tv),
            _ => unreachable!("NewTVar always answers with StmOut::TVar"),
        }),
    )
}

pub fn read_tvar(tv: TVarId) -> Stm<Rc<dyn Any>> {
    Stm::Prim(
        StmPrim::ReadTVar(tv),
        Box::new(|out| match out {
            StmOut::Value(v) => Stm::Pure(v),
            _ => unreachable!("ReadTVar always answers with StmOut::Value"),
        }),
    )
}

pub fn write_tvar<T: 'static>(tv: TVarId, value: T) -> Stm<()> {
    Stm::Prim(
        StmPrim::WriteTVar(tv, Rc::new(value)),
        Box::new(|out| match out {
            StmOut::Unit => Stm::Pure(()),
            _ => unreachable!("WriteTVar always answers with StmOut::Unit"),
        }),
    )
}

pub fn retry<T>() -> Stm<T> {
    Stm::Retry
}

pub fn throw_stm<E: 'static, T>(exc: E) -> Stm<T> {
    // The `T` here is a lie we never have to make good on: `Throw`
    // never produces a `T`, it unwinds. Transmuting the phantom return
    // type through the erased `Rc<dyn Any>` representation would be
    // unsound, so instead `Stm<T>::Throw` simply never constructs a
    // `T`; callers only ever observe it via `interpret`'s `StmResult`.
    let _ = std::marker::PhantomData::<T>;
    Stm::Throw(Rc::new(exc))
}

pub fn or_else<T: 'static>(
    left: impl FnOnce() -> Stm<T> + 'static,
    right: impl FnOnce() -> Stm<T> + 'static,
) -> Stm<T> {
    Stm::OrElse(
        Box::new(move || left().map(|t| Rc::new(t) as Rc<dyn Any>)),
        Box::new(move || right().map(|t| Rc::new(t) as Rc<dyn Any>)),
        Box::new(|v| Stm::Pure(crate::comp::downcast_rc::<T>(v))),
    )
}

pub fn catch_stm<E: 'static, T: 'static>(
    body: impl FnOnce() -> Stm<T> + 'static,
    handler: impl FnOnce(Rc<E>) -> Stm<T> + 'static,
) -> Stm<T> {
    Stm::Catch(
        Box::new(|v: &Rc<dyn Any>| v.is::<E>()),
        Box::new(move || body().map(|t| Rc::new(t) as Rc<dyn Any>)),
        Box::new(move |payload: Rc<dyn Any>| {
            let typed = payload
                .downcast::<E>()
                .unwrap_or_else(|_| unreachable!("Catch only invokes handler on a type match"));
            handler(typed).map(|t| Rc::new(t) as Rc<dyn Any>)
        }),
        Box::new(|v| Stm::Pure(crate::comp::downcast_rc::<T>(v))),
    )
}

/// What running a transaction body to completion produced.
pub enum StmResult {
    Ok(Rc<dyn Any>),
    Retry,
    Throw(Rc<dyn Any>),
}

/// Interprets a transaction body against the committed tvar store plus
/// the in-flight local log, recording every sub-action into `trace`
/// (§4.4). Never suspends: a transaction runs to completion (success,
/// retry, or throw) in a single call, since no other thread can
/// interleave inside it.
pub fn interpret(
    comp: Stm<Rc<dyn Any>>,
    ids: &mut crate::id::IdSource,
    store: &TVarStore,
    log: &mut TLog,
    trace: &mut TTrace,
) -> StmResult {
    match comp {
        Stm::Pure(v) => {
            trace.push(TAction::TStop);
            StmResult::Ok(v)
        }
        Stm::Retry => {
            trace.push(TAction::TRetry);
            StmResult::Retry
        }
        Stm::Throw(e) => {
            trace.push(TAction::TThrow);
            StmResult::Throw(e)
        }
        Stm::Prim(prim, k) => match prim {
            StmPrim::NewTVar(init) => {
                let tv = ids.fresh_tvar(None);
                trace.push(TAction::TNew);
                log.writes.insert(tv, init);
                interpret(k(StmOut::TVar(tv)), ids, store, log, trace)
            }
            StmPrim::ReadTVar(tv) => {
                trace.push(TAction::TRead(tv));
                log.reads.insert(tv);
                let value = log
                    .writes
                    .get(&tv)
                    .cloned()
                    .or_else(|| store.get(tv))
                    .expect("read of a tvar that was never created");
                interpret(k(StmOut::Value(value)), ids, store, log, trace)
            }
            StmPrim::WriteTVar(tv, value) => {
                trace.push(TAction::TWrite(tv));
                log.writes.insert(tv, value);
                interpret(k(StmOut::Unit), ids, store, log, trace)
            }
        },
        Stm::OrElse(left, right, k) => {
            let snapshot = log.snapshot();
            let mut left_trace = TTrace::new();
            match interpret(left(), ids, store, log, &mut left_trace) {
                StmResult::Ok(v) => {
                    trace.push(TAction::TOrElse(Box::new(left_trace), None));
                    interpret(k(v), ids, store, log, trace)
                }
                StmResult::Retry => {
                    log.restore(snapshot);
                    let mut right_trace = TTrace::new();
                    let outcome = interpret(right(), ids, store, log, &mut right_trace);
                    trace.push(TAction::TOrElse(
                        Box::new(left_trace),
                        Some(Box::new(right_trace)),
                    ));
                    match outcome {
                        StmResult::Ok(v) => interpret(k(v), ids, store, log, trace),
                        other => other,
                    }
                }
                StmResult::Throw(e) => {
                    trace.push(TAction::TOrElse(Box::new(left_trace), None));
                    StmResult::Throw(e)
                }
            }
        }
        Stm::Catch(matches, body, handler, k) => {
            let snapshot = log.snapshot();
            let mut body_trace = TTrace::new();
            match interpret(body(), ids, store, log, &mut body_trace) {
                StmResult::Ok(v) => {
                    trace.push(TAction::TCatch(Box::new(body_trace), None));
                    interpret(k(v), ids, store, log, trace)
                }
                StmResult::Retry => {
                    trace.push(TAction::TCatch(Box::new(body_trace), None));
                    StmResult::Retry
                }
                StmResult::Throw(e) => {
                    if matches(&e) {
                        log.restore(snapshot);
                        let mut handler_trace = TTrace::new();
                        let outcome = interpret(handler(e), ids, store, log, &mut handler_trace);
                        trace.push(TAction::TCatch(
                            Box::new(body_trace),
                            Some(Box::new(handler_trace)),
                        ));
                        match outcome {
                            StmResult::Ok(v) => interpret(k(v), ids, store, log, trace),
                            other => other,
                        }
                    } else {
                        trace.push(TAction::TCatch(Box::new(body_trace), None));
                        StmResult::Throw(e)
                    }
                }
            }
        }
    }
}
