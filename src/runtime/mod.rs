//! The central interpreter (§4.1, §4.2, §4.4): drives every forked
//! thread's `Comp<Rc<dyn Any>>` one primitive at a time, dispatching
//! each `Prim` to the cell/blocking-variable/transaction stores and
//! recording every step into a `Trace`. A single call to `run` plays
//! out exactly one schedule; the DPOR explorer in `crate::dpor` is what
//! calls it repeatedly with different schedulers to cover the space.

use crate::action::{Decision, Lookahead, MaskingReason, MaskingState, ThreadAction};
use crate::comp::{reset_masking, set_masking, Comp, HandlerFrame, Prim, PrimOut};
use crate::failure::Failure;
use crate::id::{IdSource, MVarId, ThreadId};
use crate::log::LogLevel;
use crate::memory::{CRefStore, MemoryType};
use crate::mvar::MVarStore;
use crate::scheduler::Scheduler;
use crate::stm::{self, StmResult, TLog, TVarStore};
use crate::trace::{Step, Trace};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

/// Why a thread is currently not runnable.
#[derive(Clone)]
enum BlockReason {
    PutMVar(MVarId),
    TakeMVar(MVarId),
    ReadMVar(MVarId),
    ThrowTo(ThreadId),
    Stm,
}

struct ThreadState {
    /// `None` only for the brief instant a step is being dispatched.
    comp: Option<Comp<Rc<dyn Any>>>,
    blocked: Option<BlockReason>,
    masking: MaskingState,
    /// Each pushed frame carries the masking state in effect when its
    /// `catch` scope was entered, so the handler can be unwound back to
    /// it once it runs (§4.1).
    handlers: Vec<(HandlerFrame, MaskingState)>,
    alive: bool,
}

/// Everything a single schedule needs: the thread table plus every
/// shared store a primitive can touch.
pub struct Runtime {
    ids: IdSource,
    threads: HashMap<ThreadId, ThreadState>,
    crefs: CRefStore,
    mvars: MVarStore,
    tvars: TVarStore,
    num_capabilities: usize,
    subconcurrency_depth: usize,
    main: ThreadId,
    /// Set by `step` when a primitive demands the whole execution end
    /// immediately (an uncaught exception on the initial thread, or an
    /// illegal/failed `subconcurrency`), consumed by `run` right after.
    terminal_failure: Option<Failure>,
}

impl Runtime {
    pub fn new(mem_type: MemoryType, program: impl FnOnce() -> Comp<Rc<dyn Any>> + 'static) -> Self {
        Runtime::new_at_depth(mem_type, program, 0)
    }

    /// `depth` seeds `subconcurrency_depth` so a nested runtime (built
    /// while dispatching its parent's `Subconcurrency` primitive) still
    /// rejects a `subconcurrency` call inside its own body (§4.1).
    fn new_at_depth(
        mem_type: MemoryType,
        program: impl FnOnce() -> Comp<Rc<dyn Any>> + 'static,
        depth: usize,
    ) -> Self {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let mut threads = HashMap::new();
        threads.insert(
            main,
            ThreadState {
                comp: Some(program()),
                blocked: None,
                masking: MaskingState::Unmasked,
                handlers: Vec::new(),
                alive: true,
            },
        );
        Runtime {
            ids,
            threads,
            crefs: CRefStore::new(mem_type),
            mvars: MVarStore::new(),
            tvars: TVarStore::new(),
            num_capabilities: 1,
            subconcurrency_depth: depth,
            main,
            terminal_failure: None,
        }
    }

    fn wake(&mut self, tids: &[ThreadId]) {
        for t in tids {
            if let Some(st) = self.threads.get_mut(t) {
                st.blocked = None;
            }
        }
    }

    fn wake_unmasked_throw_to_senders(&mut self, target: ThreadId) {
        let senders: Vec<ThreadId> = self
            .threads
            .iter()
            .filter_map(|(t, st)| match st.blocked {
                Some(BlockReason::ThrowTo(dest)) if dest == target => Some(*t),
                _ => None,
            })
            .collect();
        self.wake(&senders);
    }

    /// Delivers `payload` to `tid`'s own handler stack. Returns `true`
    /// if a matching frame caught it (the thread's `comp` is now the
    /// handler's continuation); `false` if it emptied the stack (the
    /// thread is now dead).
    fn handle_throw(&mut self, tid: ThreadId, payload: Rc<dyn Any>) -> bool {
        let st = self.threads.get_mut(&tid).unwrap();
        while let Some((frame, prev_mask)) = st.handlers.pop() {
            if (frame.matches)(&payload) {
                st.comp = Some(mask_for_handler((frame.handler)(payload), prev_mask));
                return true;
            }
        }
        st.alive = false;
        st.comp = None;
        false
    }

    fn runnable_real(&self) -> Vec<(ThreadId, Lookahead)> {
        self.threads
            .iter()
            .filter(|(_, st)| st.alive && st.blocked.is_none())
            .map(|(t, st)| (*t, lookahead_of(st.comp.as_ref().unwrap())))
            .collect()
    }

    fn runnable(&mut self) -> Vec<(ThreadId, Lookahead)> {
        let mut runnable = self.runnable_real();
        for (writer, cell) in self.crefs.eligible_commits() {
            let commit_tid = self.ids.fresh_commit_thread();
            runnable.push((commit_tid, Lookahead::WillCommitCRef(writer, cell)));
        }
        runnable
    }

    fn classify_deadlock(&self) -> Failure {
        let all_stm = self
            .threads
            .values()
            .filter(|st| st.alive)
            .all(|st| matches!(st.blocked, Some(BlockReason::Stm)));
        if all_stm {
            Failure::StmDeadlock
        } else {
            Failure::Deadlock
        }
    }

    /// Runs this schedule to completion, returning the final result (or
    /// failure) and the recorded trace.
    pub fn run<S: Scheduler>(
        &mut self,
        scheduler: &S,
    ) -> (Result<Rc<dyn Any>, Failure>, Trace) {
        let mut trace = Trace::new();
        let mut sched_state = scheduler.initial_state();
        let mut prior: Option<ThreadId> = None;

        loop {
            let runnable = self.runnable();
            if runnable.is_empty() {
                let failure = self.classify_deadlock();
                crate::log!(LogLevel::LogError, "no runnable threads left: {:?}", failure);
                return (Err(failure), trace);
            }

            let (choice, new_state) = scheduler.schedule(&trace, prior, &runnable, sched_state);
            sched_state = new_state;
            let tid = match choice {
                Some(t) => t,
                None => {
                    crate::log!(LogLevel::LogWarn, "scheduler aborted with {} runnable thread(s)", runnable.len());
                    return (Err(Failure::Abort), trace);
                }
            };
            if !runnable.iter().any(|(t, _)| *t == tid) {
                crate::log!(
                    LogLevel::LogError,
                    "scheduler chose {:?}, which is not in the runnable set",
                    tid
                );
                return (Err(Failure::InternalError), trace);
            }

            let decision = match prior {
                Some(p) if p == tid => Decision::Continue,
                None => Decision::Start(tid),
                Some(_) => Decision::SwitchTo(tid),
            };

            if tid.num() < 0 {
                let (writer, cell) = runnable
                    .iter()
                    .find_map(|(t, l)| match l {
                        Lookahead::WillCommitCRef(w, c) if *t == tid => Some((*w, *c)),
                        _ => None,
                    })
                    .expect("commit pseudo-thread must carry its (writer, cell) lookahead");
                self.crefs.commit_one(writer, cell);
                trace.push(Step {
                    decision,
                    runnable,
                    action: ThreadAction::CommitCRef(writer, cell),
                });
                prior = Some(tid);
                continue;
            }

            let comp = self.threads.get_mut(&tid).unwrap().comp.take().unwrap();
            match comp {
                Comp::Pure(v) => {
                    self.threads.get_mut(&tid).unwrap().alive = false;
                    trace.push(Step {
                        decision,
                        runnable,
                        action: ThreadAction::Stop,
                    });
                    if tid == self.main {
                        return (Ok(v), trace);
                    }
                    prior = Some(tid);
                }
                Comp::Eff(prim, k) => {
                    let action = self.step(tid, prim, k);
                    if let Some(action) = action {
                        trace.push(Step {
                            decision,
                            runnable,
                            action,
                        });
                        if let Some(failure) = self.take_terminal_failure() {
                            crate::log!(LogLevel::LogError, "run ended with {:?}", failure);
                            return (Err(failure), trace);
                        }
                    }
                    prior = Some(tid);
                }
            }
        }
    }

    /// Set by `step` when a primitive demands the whole execution end
    /// right now (an uncaught exception on the initial thread, or an
    /// illegal/failed `subconcurrency`).
    fn take_terminal_failure(&mut self) -> Option<Failure> {
        self.terminal_failure.take()
    }

    /// Dispatches one primitive for `tid`. Returns the action to record.
    /// Mutates `self.threads[tid].comp`/`blocked` to reflect the result:
    /// proceeding (new comp installed), blocking (original `prim`/`k`
    /// reconstructed so the same attempt replays once unblocked), or
    /// dying (handler stack emptied by an uncaught throw).
    fn step(
        &mut self,
        tid: ThreadId,
        prim: Prim,
        k: Box<dyn FnOnce(PrimOut) -> Comp<Rc<dyn Any>>>,
    ) -> Option<ThreadAction> {
        let action = match prim {
            Prim::Fork(name, body) => {
                let new_id = self.ids.fresh_thread(name.as_deref());
                self.threads.insert(
                    new_id,
                    ThreadState {
                        comp: Some(body()),
                        blocked: None,
                        masking: MaskingState::Unmasked,
                        handlers: Vec::new(),
                        alive: true,
                    },
                );
                self.proceed(tid, k, PrimOut::Tid(new_id));
                Some(ThreadAction::Fork(new_id))
            }
            Prim::MyThreadId => {
                self.proceed(tid, k, PrimOut::Tid(tid));
                Some(ThreadAction::MyThreadId)
            }
            Prim::GetNumCapabilities => {
                let n = self.num_capabilities;
                self.proceed(tid, k, PrimOut::Count(n));
                Some(ThreadAction::GetNumCapabilities(n))
            }
            Prim::SetNumCapabilities(n) => {
                self.num_capabilities = n;
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::SetNumCapabilities(n))
            }
            Prim::Yield => {
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::Yield)
            }

            Prim::NewCRef(name, initial) => {
                let id = self.ids.fresh_cref(name.as_deref());
                self.crefs.new_cref(id, initial);
                self.proceed(tid, k, PrimOut::CRef(id));
                Some(ThreadAction::NewCRef(id))
            }
            Prim::ReadCRef(id) => {
                let v = self.crefs.read(tid, id);
                self.proceed(tid, k, PrimOut::Value(v));
                Some(ThreadAction::ReadCRef(id))
            }
            Prim::ReadCRefCas(id) => {
                let (v, ticket) = self.crefs.read_for_cas(tid, id);
                self.proceed(tid, k, PrimOut::ReadForCas(v, ticket));
                Some(ThreadAction::ReadCRefCas(id))
            }
            Prim::ModCRef(id, f) => {
                self.crefs.modify(tid, id, f);
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::ModCRef(id))
            }
            Prim::ModCRefCas(id, f) => {
                self.crefs.modify(tid, id, f);
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::ModCRefCas(id))
            }
            Prim::WriteCRef(id, value) => {
                self.crefs.write(tid, id, value);
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::WriteCRef(id))
            }
            Prim::CasCRef(ticket, new_value) => {
                let cell = ticket.cell;
                let ok = self.crefs.cas(tid, ticket, new_value);
                self.proceed(tid, k, PrimOut::Bool(ok));
                Some(ThreadAction::CasCRef(cell, ok))
            }

            Prim::NewMVar(name, initial) => {
                let id = self.ids.fresh_mvar(name.as_deref());
                self.mvars.new_mvar(id, initial);
                self.proceed(tid, k, PrimOut::MVarId(id));
                Some(ThreadAction::NewMVar(id))
            }
            Prim::PutMVar(id, value) => {
                let outcome = self.mvars.put(id, value.clone());
                if outcome.completed {
                    self.wake(&outcome.woken);
                    self.proceed(tid, k, PrimOut::Unit);
                    Some(ThreadAction::PutMVar(id, outcome.woken))
                } else {
                    self.mvars.block_put(id, tid);
                    self.block(tid, Prim::PutMVar(id, value), k, BlockReason::PutMVar(id));
                    Some(ThreadAction::BlockedPutMVar(id))
                }
            }
            Prim::TryPutMVar(id, value) => {
                let outcome = self.mvars.try_put(id, value);
                if outcome.completed {
                    self.wake(&outcome.woken);
                }
                self.proceed(tid, k, PrimOut::Bool(outcome.completed));
                Some(ThreadAction::TryPutMVar(id, outcome.completed, outcome.woken))
            }
            Prim::ReadMVar(id) => match self.mvars.read(id) {
                Some(v) => {
                    self.proceed(tid, k, PrimOut::Value(v));
                    Some(ThreadAction::ReadMVar(id))
                }
                None => {
                    self.mvars.block_read(id, tid);
                    self.block(tid, Prim::ReadMVar(id), k, BlockReason::ReadMVar(id));
                    Some(ThreadAction::BlockedReadMVar(id))
                }
            },
            Prim::TryReadMVar(id) => {
                let v = self.mvars.read(id);
                let present = v.is_some();
                self.proceed(tid, k, PrimOut::MaybeValue(v));
                Some(ThreadAction::TryReadMVar(id, present))
            }
            Prim::TakeMVar(id) => {
                let (outcome, value) = self.mvars.take(id);
                if outcome.completed {
                    self.wake(&outcome.woken);
                    self.proceed(tid, k, PrimOut::Value(value.unwrap()));
                    Some(ThreadAction::TakeMVar(id, outcome.woken))
                } else {
                    self.mvars.block_take(id, tid);
                    self.block(tid, Prim::TakeMVar(id), k, BlockReason::TakeMVar(id));
                    Some(ThreadAction::BlockedTakeMVar(id))
                }
            }
            Prim::TryTakeMVar(id) => {
                let (outcome, value) = self.mvars.try_take(id);
                if outcome.completed {
                    self.wake(&outcome.woken);
                }
                self.proceed(tid, k, PrimOut::MaybeValue(value));
                Some(ThreadAction::TryTakeMVar(id, outcome.completed, outcome.woken))
            }

            Prim::Atomically(build) => {
                let mut log = TLog::new();
                let mut ttrace = Vec::new();
                let stm_value = build();
                match stm::interpret(stm_value, &mut self.ids, &self.tvars, &mut log, &mut ttrace) {
                    StmResult::Ok(v) => {
                        let woken = self.tvars.commit(log.writes);
                        self.wake(&woken);
                        self.proceed(tid, k, PrimOut::Value(v));
                        Some(ThreadAction::STM(ttrace, woken))
                    }
                    StmResult::Retry => {
                        self.tvars.block_on(tid, &log.reads);
                        self.block(tid, Prim::Atomically(build), k, BlockReason::Stm);
                        Some(ThreadAction::BlockedSTM(ttrace))
                    }
                    StmResult::Throw(payload) => {
                        self.handle_throw(tid, payload);
                        self.check_uncaught_death(tid);
                        Some(ThreadAction::Throw)
                    }
                }
            }

            Prim::Throw(payload) => {
                self.handle_throw(tid, payload);
                self.check_uncaught_death(tid);
                Some(ThreadAction::Throw)
            }
            Prim::Catching(frame) => {
                let current_mask = self.threads.get(&tid).unwrap().masking;
                self.threads.get_mut(&tid).unwrap().handlers.push((frame, current_mask));
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::Catching)
            }
            Prim::PopCatching => {
                self.threads.get_mut(&tid).unwrap().handlers.pop();
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::PopCatching)
            }
            Prim::ThrowTo(target, payload) => {
                let target_alive = self.threads.get(&target).map_or(false, |st| st.alive);
                if !target_alive {
                    self.proceed(tid, k, PrimOut::Unit);
                    return Some(ThreadAction::ThrowTo(target));
                }
                let unmasked = matches!(
                    self.threads.get(&target).unwrap().masking,
                    MaskingState::Unmasked
                );
                if unmasked {
                    self.handle_throw(target, payload);
                    self.check_uncaught_death(target);
                    self.proceed(tid, k, PrimOut::Unit);
                    Some(ThreadAction::ThrowTo(target))
                } else {
                    self.block(
                        tid,
                        Prim::ThrowTo(target, payload),
                        k,
                        BlockReason::ThrowTo(target),
                    );
                    Some(ThreadAction::BlockedThrowTo(target))
                }
            }
            Prim::SetMasking(reason, state) => {
                self.threads.get_mut(&tid).unwrap().masking = state;
                if state == MaskingState::Unmasked {
                    self.wake_unmasked_throw_to_senders(tid);
                }
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::SetMasking(reason, state))
            }
            Prim::ResetMasking(reason, state) => {
                self.threads.get_mut(&tid).unwrap().masking = state;
                if state == MaskingState::Unmasked {
                    self.wake_unmasked_throw_to_senders(tid);
                }
                self.proceed(tid, k, PrimOut::Unit);
                Some(ThreadAction::ResetMasking(reason, state))
            }

            Prim::LiftIO(f) => {
                let v = f();
                self.proceed(tid, k, PrimOut::Value(v));
                Some(ThreadAction::LiftIO)
            }

            Prim::Subconcurrency(body) => {
                if self.subconcurrency_depth > 0 {
                    self.terminal_failure = Some(Failure::IllegalSubconcurrency);
                    return Some(ThreadAction::Subconcurrency);
                }
                let other_live = self
                    .threads
                    .iter()
                    .any(|(t, st)| *t != tid && st.alive);
                if other_live {
                    self.terminal_failure = Some(Failure::IllegalSubconcurrency);
                    return Some(ThreadAction::Subconcurrency);
                }
                let nested_sched = crate::scheduler::RoundRobinSched;
                let mut nested = Runtime::new_at_depth(self.crefs.mem_type(), body, 1);
                let (result, _nested_trace) = nested.run(&nested_sched);
                match result {
                    Ok(v) => {
                        self.proceed(tid, k, PrimOut::Value(v));
                        Some(ThreadAction::Subconcurrency)
                    }
                    Err(failure) => {
                        self.terminal_failure = Some(failure);
                        Some(ThreadAction::Subconcurrency)
                    }
                }
            }
        };
        if let Some(a) = &action {
            crate::log!(LogLevel::LogDebug, "thread {:?} performed {:?}", tid, a);
        }
        action
    }

    fn proceed(
        &mut self,
        tid: ThreadId,
        k: Box<dyn FnOnce(PrimOut) -> Comp<Rc<dyn Any>>>,
        out: PrimOut,
    ) {
        self.threads.get_mut(&tid).unwrap().comp = Some(k(out));
    }

    fn block(
        &mut self,
        tid: ThreadId,
        prim: Prim,
        k: Box<dyn FnOnce(PrimOut) -> Comp<Rc<dyn Any>>>,
        reason: BlockReason,
    ) {
        let st = self.threads.get_mut(&tid).unwrap();
        st.comp = Some(Comp::Eff(prim, k));
        st.blocked = Some(reason);
    }

    fn check_uncaught_death(&mut self, tid: ThreadId) {
        if tid == self.main && !self.threads.get(&tid).unwrap().alive {
            self.terminal_failure = Some(Failure::UncaughtException(
                "uncaught exception on the initial thread".to_string(),
            ));
        }
    }
}

/// Wraps a caught exception's handler so it runs masked for its
/// duration (GHC's `catch` masks asynchronous exceptions while the
/// handler is running), restoring `prev_mask` — the state in effect
/// when the matching `catch` scope was entered — once it returns.
fn mask_for_handler(body: Comp<Rc<dyn Any>>, prev_mask: MaskingState) -> Comp<Rc<dyn Any>> {
    set_masking(MaskingReason::OnHandlerEntry, MaskingState::MaskedInterruptible)
        .and_then(move |_| body)
        .and_then(move |v| reset_masking(MaskingReason::OnHandlerEntry, prev_mask).map(move |_| v))
}

/// Peeks at the next `Prim` a computation will perform without running
/// it, for the runnable-set lookahead (§3).
fn lookahead_of(comp: &Comp<Rc<dyn Any>>) -> Lookahead {
    match comp {
        Comp::Pure(_) => Lookahead::WillStop,
        Comp::Eff(prim, _) => match prim {
            Prim::Fork(..) => Lookahead::WillFork,
            Prim::MyThreadId => Lookahead::WillMyThreadId,
            Prim::GetNumCapabilities => Lookahead::WillGetNumCapabilities,
            Prim::SetNumCapabilities(_) => Lookahead::WillSetNumCapabilities,
            Prim::Yield => Lookahead::WillYield,
            Prim::NewCRef(..) => Lookahead::WillNewCRef,
            Prim::ReadCRef(c) => Lookahead::WillReadCRef(*c),
            Prim::ReadCRefCas(c) => Lookahead::WillReadCRefCas(*c),
            Prim::ModCRef(c, _) => Lookahead::WillModCRef(*c),
            Prim::ModCRefCas(c, _) => Lookahead::WillModCRefCas(*c),
            Prim::WriteCRef(c, _) => Lookahead::WillWriteCRef(*c),
            Prim::CasCRef(ticket, _) => Lookahead::WillCasCRef(ticket.cell),
            Prim::NewMVar(..) => Lookahead::WillNewMVar,
            Prim::PutMVar(m, _) => Lookahead::WillPutMVar(*m),
            Prim::TryPutMVar(m, _) => Lookahead::WillTryPutMVar(*m),
            Prim::ReadMVar(m) => Lookahead::WillReadMVar(*m),
            Prim::TryReadMVar(m) => Lookahead::WillTryReadMVar(*m),
            Prim::TakeMVar(m) => Lookahead::WillTakeMVar(*m),
            Prim::TryTakeMVar(m) => Lookahead::WillTryTakeMVar(*m),
            Prim::Atomically(_) => Lookahead::WillSTM,
            Prim::Throw(_) => Lookahead::WillThrow,
            Prim::Catching(_) => Lookahead::WillCatching,
            Prim::PopCatching => Lookahead::WillPopCatching,
            Prim::ThrowTo(t, _) => Lookahead::WillThrowTo(*t),
            Prim::SetMasking(_, _) => Lookahead::WillSetMasking,
            Prim::ResetMasking(_, _) => Lookahead::WillResetMasking,
            Prim::LiftIO(_) => Lookahead::WillLiftIO,
            Prim::Subconcurrency(_) => Lookahead::WillSubconcurrency,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comp::*;
    use crate::scheduler::RoundRobinSched;

    fn run_program<T: 'static>(
        mem_type: MemoryType,
        program: impl FnOnce() -> Comp<T> + 'static,
    ) -> (Result<T, Failure>, Trace) {
        let mut rt = Runtime::new(mem_type, move || {
            program().map(|t| Rc::new(t) as Rc<dyn Any>)
        });
        let (result, trace) = rt.run(&RoundRobinSched);
        (result.map(crate::comp::downcast_rc::<T>), trace)
    }

    #[test]
    fn a_lone_thread_returning_a_value_succeeds() {
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || Comp::Pure(42i64));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn forked_thread_can_communicate_through_an_mvar() {
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            new_empty_mvar().and_then(|m| {
                fork(move || put_mvar(m, 7i64))
                    .and_then(move |_| take_mvar_as::<i64>(m))
            })
        });
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn taking_from_an_mvar_nobody_ever_fills_deadlocks() {
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            new_empty_mvar().and_then(|m: MVarId| take_mvar_as::<i64>(m))
        });
        assert_eq!(result.unwrap_err(), Failure::Deadlock);
    }

    #[test]
    fn uncaught_exception_on_the_initial_thread_fails_the_run() {
        #[derive(Debug)]
        struct Boom;
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            throw::<Boom, i64>(Boom)
        });
        assert!(matches!(result, Err(Failure::UncaughtException(_))));
    }

    #[test]
    fn catch_recovers_from_a_matching_exception() {
        #[derive(Debug)]
        struct Boom;
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            catch::<Boom, i64>(|| throw(Boom), |_| Comp::Pure(99))
        });
        assert_eq!(result.unwrap(), 99);
    }

    #[test]
    fn catch_handler_runs_masked_and_restores_the_prior_mask_afterward() {
        #[derive(Debug)]
        struct Boom;
        let (result, trace) = run_program(MemoryType::SequentialConsistency, || {
            set_masking(MaskingReason::MaskGeneral, MaskingState::MaskedUninterruptible)
                .and_then(|_| catch::<Boom, i64>(|| throw(Boom), |_| Comp::Pure(1i64)))
        });
        assert_eq!(result.unwrap(), 1);
        let set = trace.iter().find_map(|s| match &s.action {
            ThreadAction::SetMasking(reason, state) if *reason == MaskingReason::OnHandlerEntry => {
                Some(*state)
            }
            _ => None,
        });
        assert_eq!(set, Some(MaskingState::MaskedInterruptible));
        let reset = trace.iter().find_map(|s| match &s.action {
            ThreadAction::ResetMasking(reason, state) => Some((*reason, *state)),
            _ => None,
        });
        assert_eq!(
            reset,
            Some((MaskingReason::OnHandlerEntry, MaskingState::MaskedUninterruptible))
        );
    }

    #[test]
    fn subconcurrency_nested_inside_itself_is_illegal() {
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            subconcurrency(|| subconcurrency(|| Comp::Pure(1i64)))
        });
        assert_eq!(result.unwrap_err(), Failure::IllegalSubconcurrency);
    }

    #[test]
    fn subconcurrency_with_a_second_live_thread_is_illegal() {
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            new_empty_mvar().and_then(|m: MVarId| {
                fork(move || take_mvar_as::<i64>(m).map(|_| ()))
                    .and_then(move |_| subconcurrency(|| Comp::Pure(1i64)))
            })
        });
        assert_eq!(result.unwrap_err(), Failure::IllegalSubconcurrency);
    }

    #[test]
    fn atomically_commits_tvar_writes() {
        let (result, _trace) = run_program(MemoryType::SequentialConsistency, || {
            use crate::stm::{new_tvar, read_tvar, write_tvar};
            atomically(move || new_tvar(0i64).and_then(|tv| write_tvar(tv, 1i64).map(move |_| tv)))
                .and_then(|tv| atomically(move || read_tvar(tv)).map(|v| *v.downcast_ref::<i64>().unwrap()))
        });
        assert_eq!(result.unwrap(), 1);
    }
}
