//! Blocking-variable (MVar-like) store: a single-slot synchronising
//! cell with blocking put/take and non-blocking read (§3, §4.1).

use crate::id::{MVarId, ThreadId};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

enum Slot {
    Empty,
    Full(Rc<dyn Any>),
}

struct MVarState {
    slot: Slot,
    put_waiters: VecDeque<ThreadId>,
    take_waiters: VecDeque<ThreadId>,
    read_waiters: VecDeque<ThreadId>,
}

#[derive(Default)]
pub struct MVarStore {
    vars: HashMap<MVarId, MVarState>,
}

/// The outcome of a blocking-variable operation: whether it completed
/// and which threads (if any) it woke.
pub struct OpOutcome {
    pub completed: bool,
    pub woken: Vec<ThreadId>,
}

impl MVarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_mvar(&mut self, id: MVarId, initial: Option<Rc<dyn Any>>) {
        self.vars.insert(
            id,
            MVarState {
                slot: match initial {
                    Some(v) => Slot::Full(v),
                    None => Slot::Empty,
                },
                put_waiters: VecDeque::new(),
                take_waiters: VecDeque::new(),
                read_waiters: VecDeque::new(),
            },
        );
    }

    fn state_mut(&mut self, id: MVarId) -> &mut MVarState {
        self.vars.get_mut(&id).expect("operation on unknown mvar")
    }

    /// Enqueues `tid` on the variable's put-waiter list (blocking put).
    pub fn block_put(&mut self, id: MVarId, tid: ThreadId) {
        self.state_mut(id).put_waiters.push_back(tid);
    }
    pub fn block_take(&mut self, id: MVarId, tid: ThreadId) {
        self.state_mut(id).take_waiters.push_back(tid);
    }
    pub fn block_read(&mut self, id: MVarId, tid: ThreadId) {
        self.state_mut(id).read_waiters.push_back(tid);
    }

    /// `put`: succeeds iff the slot is empty. Fills it and wakes the
    /// head of the take- or read-waiter queues (§4.1: "for put: take-
    /// or read-waiters").
    pub fn put(&mut self, id: MVarId, value: Rc<dyn Any>) -> OpOutcome {
        let state = self.state_mut(id);
        match state.slot {
            Slot::Full(_) => OpOutcome {
                completed: false,
                woken: Vec::new(),
            },
            Slot::Empty => {
                state.slot = Slot::Full(value);
                let woken = wake_take_or_read(state);
                OpOutcome {
                    completed: true,
                    woken,
                }
            }
        }
    }

    pub fn try_put(&mut self, id: MVarId, value: Rc<dyn Any>) -> OpOutcome {
        self.put(id, value)
    }

    /// `take`: succeeds iff the slot is full. Empties it and wakes the
    /// head of the put-waiter queue.
    pub fn take(&mut self, id: MVarId) -> (OpOutcome, Option<Rc<dyn Any>>) {
        let state = self.state_mut(id);
        match &state.slot {
            Slot::Empty => (
                OpOutcome {
                    completed: false,
                    woken: Vec::new(),
                },
                None,
            ),
            Slot::Full(v) => {
                let v = v.clone();
                state.slot = Slot::Empty;
                let woken = state.put_waiters.pop_front().into_iter().collect();
                (
                    OpOutcome {
                        completed: true,
                        woken,
                    },
                    Some(v),
                )
            }
        }
    }

    pub fn try_take(&mut self, id: MVarId) -> (OpOutcome, Option<Rc<dyn Any>>) {
        self.take(id)
    }

    /// `read`: succeeds iff the slot is full. Does not consume the
    /// value and wakes nobody (§4.1: "read does not consume").
    pub fn read(&self, id: MVarId) -> Option<Rc<dyn Any>> {
        match &self.vars.get(&id).expect("read of unknown mvar").slot {
            Slot::Empty => None,
            Slot::Full(v) => Some(v.clone()),
        }
    }

    pub fn is_full(&self, id: MVarId) -> bool {
        matches!(self.vars.get(&id).expect("unknown mvar").slot, Slot::Full(_))
    }
}

fn wake_take_or_read(state: &mut MVarState) -> Vec<ThreadId> {
    if let Some(t) = state.take_waiters.pop_front() {
        vec![t]
    } else if let Some(t) = state.read_waiters.pop_front() {
        vec![t]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdSource;

    #[test]
    fn put_on_empty_succeeds_and_wakes_take_waiter() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let waiter = ids.fresh_thread(None);
        let m = ids.fresh_mvar(None);
        let mut store = MVarStore::new();
        store.new_mvar(m, None);
        store.block_take(m, waiter);
        let outcome = store.put(m, Rc::new(1i64));
        assert!(outcome.completed);
        assert_eq!(outcome.woken, vec![waiter]);
        let _ = main;
    }

    #[test]
    fn put_on_full_blocks() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let m = ids.fresh_mvar(None);
        let mut store = MVarStore::new();
        store.new_mvar(m, Some(Rc::new(1i64)));
        let outcome = store.put(m, Rc::new(2i64));
        assert!(!outcome.completed);
    }

    #[test]
    fn read_does_not_consume() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let m = ids.fresh_mvar(None);
        let mut store = MVarStore::new();
        store.new_mvar(m, Some(Rc::new(7i64)));
        assert_eq!(*store.read(m).unwrap().downcast_ref::<i64>().unwrap(), 7);
        assert!(store.is_full(m));
    }
}
