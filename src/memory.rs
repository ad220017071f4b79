//! The relaxed-memory subsystem (§4.2): committed cell values plus
//! per-writer (TSO) or per-cell (PSO) write buffers, and the commit
//! pseudo-thread bookkeeping that makes commit timing part of the
//! explored nondeterminism.

use crate::id::{CRefId, ThreadId};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    SequentialConsistency,
    TotalStoreOrder,
    PartialStoreOrder,
}

/// An implicit ticket returned by `readForCAS`: the commit-count of the
/// cell observed at read time. A subsequent `casCRef` succeeds iff no
/// commit has intervened.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CasTicket {
    pub cell: CRefId,
    pub generation: u64,
}

struct CellState {
    value: Rc<dyn Any>,
    /// Bumped on every commit (or immediate SC write); backs
    /// `CasTicket` comparison.
    generation: u64,
}

/// One buffered, not-yet-committed write.
struct BufferedWrite {
    value: Rc<dyn Any>,
}

/// The cell store for one execution. Buffer keying depends on the
/// active `MemoryType`:
/// - SC: no buffers, `writeCRef` publishes immediately.
/// - TSO: one FIFO per writer thread, entries `(cell, value)`.
/// - PSO: one FIFO per `(cell, writer)` pair.
pub struct CRefStore {
    mem_type: MemoryType,
    cells: HashMap<CRefId, CellState>,
    /// TSO: writer -> FIFO of (cell, write). PSO: (cell, writer) -> FIFO of write.
    tso_buffers: HashMap<ThreadId, std::collections::VecDeque<(CRefId, BufferedWrite)>>,
    pso_buffers: HashMap<(CRefId, ThreadId), std::collections::VecDeque<BufferedWrite>>,
}

impl CRefStore {
    pub fn new(mem_type: MemoryType) -> Self {
        CRefStore {
            mem_type,
            cells: HashMap::new(),
            tso_buffers: HashMap::new(),
            pso_buffers: HashMap::new(),
        }
    }

    pub fn mem_type(&self) -> MemoryType {
        self.mem_type
    }

    pub fn new_cref(&mut self, id: CRefId, initial: Rc<dyn Any>) {
        self.cells.insert(
            id,
            CellState {
                value: initial,
                generation: 0,
            },
        );
    }

    fn committed(&self, id: CRefId) -> Rc<dyn Any> {
        self.cells
            .get(&id)
            .expect("read of a cell that was never created")
            .value
            .clone()
    }

    /// Unsynchronised read (`readCRef`): a thread sees its own buffered
    /// writes first, else the committed value.
    pub fn read(&self, reader: ThreadId, id: CRefId) -> Rc<dyn Any> {
        match self.mem_type {
            MemoryType::SequentialConsistency => self.committed(id),
            MemoryType::TotalStoreOrder => {
                if let Some(buf) = self.tso_buffers.get(&reader) {
                    if let Some((_, w)) = buf.iter().rev().find(|(c, _)| *c == id) {
                        return w.value.clone();
                    }
                }
                self.committed(id)
            }
            MemoryType::PartialStoreOrder => {
                if let Some(buf) = self.pso_buffers.get(&(id, reader)) {
                    if let Some(w) = buf.back() {
                        return w.value.clone();
                    }
                }
                self.committed(id)
            }
        }
    }

    /// Unsynchronised write (`writeCRef`). Under SC, publishes
    /// immediately; otherwise enqueues onto the writer's buffer.
    pub fn write(&mut self, writer: ThreadId, id: CRefId, value: Rc<dyn Any>) {
        match self.mem_type {
            MemoryType::SequentialConsistency => self.publish(id, value),
            MemoryType::TotalStoreOrder => {
                self.tso_buffers
                    .entry(writer)
                    .or_default()
                    .push_back((id, BufferedWrite { value }));
            }
            MemoryType::PartialStoreOrder => {
                self.pso_buffers
                    .entry((id, writer))
                    .or_default()
                    .push_back(BufferedWrite { value });
            }
        }
    }

    fn publish(&mut self, id: CRefId, value: Rc<dyn Any>) {
        let cell = self.cells.get_mut(&id).expect("publish to unknown cell");
        cell.value = value;
        cell.generation += 1;
    }

    /// Drains every buffered write the executing thread has pending,
    /// across all cells, publishing them in FIFO order. Called before
    /// any synchronised operation the thread performs (§4.2).
    pub fn drain_thread_buffers(&mut self, thread: ThreadId) {
        match self.mem_type {
            MemoryType::SequentialConsistency => {}
            MemoryType::TotalStoreOrder => {
                if let Some(mut buf) = self.tso_buffers.remove(&thread) {
                    while let Some((cell, w)) = buf.pop_front() {
                        self.publish(cell, w.value);
                    }
                }
            }
            MemoryType::PartialStoreOrder => {
                let keys: Vec<_> = self
                    .pso_buffers
                    .keys()
                    .filter(|(_, w)| *w == thread)
                    .cloned()
                    .collect();
                for key in keys {
                    if let Some(mut buf) = self.pso_buffers.remove(&key) {
                        while let Some(w) = buf.pop_front() {
                            self.publish(key.0, w.value);
                        }
                    }
                }
            }
        }
    }

    /// The commit pseudo-threads currently eligible to step: one per
    /// writer under TSO whose buffer is non-empty, one per (cell,
    /// writer) under PSO.
    pub fn eligible_commits(&self) -> Vec<(ThreadId, CRefId)> {
        match self.mem_type {
            MemoryType::SequentialConsistency => Vec::new(),
            MemoryType::TotalStoreOrder => self
                .tso_buffers
                .iter()
                .filter(|(_, buf)| !buf.is_empty())
                .map(|(writer, buf)| (*writer, buf.front().unwrap().0))
                .collect(),
            MemoryType::PartialStoreOrder => self
                .pso_buffers
                .iter()
                .filter(|(_, buf)| !buf.is_empty())
                .map(|((cell, writer), _)| (*writer, *cell))
                .collect(),
        }
    }

    /// Performs exactly one commit step for `(writer, cell)`: drains
    /// the head entry of the relevant buffer and publishes it.
    pub fn commit_one(&mut self, writer: ThreadId, cell: CRefId) {
        match self.mem_type {
            MemoryType::SequentialConsistency => {
                unreachable!("no commit pseudo-threads exist under SC")
            }
            MemoryType::TotalStoreOrder => {
                let value = {
                    let buf = self
                        .tso_buffers
                        .get_mut(&writer)
                        .expect("commit of writer with no buffer");
                    let (c, w) = buf.pop_front().expect("commit of empty buffer");
                    debug_assert_eq!(c, cell, "TSO commit must drain the writer's head cell");
                    w.value
                };
                self.publish(cell, value);
            }
            MemoryType::PartialStoreOrder => {
                let value = {
                    let buf = self
                        .pso_buffers
                        .get_mut(&(cell, writer))
                        .expect("commit of (cell, writer) with no buffer");
                    buf.pop_front().expect("commit of empty buffer").value
                };
                self.publish(cell, value);
            }
        }
    }

    /// Synchronised read-modify-write used by `modifyCRef`/`casCRef`:
    /// drains the thread's buffers first, then reads+publishes
    /// atomically (§4.2).
    pub fn read_for_cas(&mut self, reader: ThreadId, id: CRefId) -> (Rc<dyn Any>, CasTicket) {
        self.drain_thread_buffers(reader);
        let cell = self.cells.get(&id).expect("readForCAS of unknown cell");
        (
            cell.value.clone(),
            CasTicket {
                cell: id,
                generation: cell.generation,
            },
        )
    }

    /// Succeeds iff no commit to `ticket.cell` has intervened since the
    /// ticket was taken; publishes `new_value` on success.
    pub fn cas(&mut self, writer: ThreadId, ticket: CasTicket, new_value: Rc<dyn Any>) -> bool {
        self.drain_thread_buffers(writer);
        let cell = self
            .cells
            .get(&ticket.cell)
            .expect("cas of unknown cell");
        if cell.generation == ticket.generation {
            self.publish(ticket.cell, new_value);
            true
        } else {
            false
        }
    }

    pub fn modify(&mut self, thread: ThreadId, id: CRefId, f: impl FnOnce(Rc<dyn Any>) -> Rc<dyn Any>) {
        self.drain_thread_buffers(thread);
        let old = self.committed(id);
        let new = f(old);
        self.publish(id, new);
    }
}

use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdSource;

    fn val(n: i64) -> Rc<dyn Any> {
        Rc::new(n)
    }

    #[test]
    fn sc_writes_are_visible_immediately_to_other_threads() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let other = ids.fresh_thread(None);
        let cell = ids.fresh_cref(None);
        let mut store = CRefStore::new(MemoryType::SequentialConsistency);
        store.new_cref(cell, val(0));
        store.write(main, cell, val(1));
        assert_eq!(*store.read(other, cell).downcast_ref::<i64>().unwrap(), 1);
    }

    #[test]
    fn tso_writer_sees_own_buffered_write_others_do_not() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let other = ids.fresh_thread(None);
        let cell = ids.fresh_cref(None);
        let mut store = CRefStore::new(MemoryType::TotalStoreOrder);
        store.new_cref(cell, val(0));
        store.write(main, cell, val(1));
        assert_eq!(*store.read(main, cell).downcast_ref::<i64>().unwrap(), 1);
        assert_eq!(*store.read(other, cell).downcast_ref::<i64>().unwrap(), 0);
        let commits = store.eligible_commits();
        assert_eq!(commits, vec![(main, cell)]);
        store.commit_one(main, cell);
        assert_eq!(*store.read(other, cell).downcast_ref::<i64>().unwrap(), 1);
    }

    #[test]
    fn pso_buffers_are_keyed_per_cell() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let c1 = ids.fresh_cref(None);
        let c2 = ids.fresh_cref(None);
        let mut store = CRefStore::new(MemoryType::PartialStoreOrder);
        store.new_cref(c1, val(0));
        store.new_cref(c2, val(0));
        store.write(main, c1, val(1));
        store.write(main, c2, val(2));
        let mut commits = store.eligible_commits();
        commits.sort_by_key(|(_, c)| c.num());
        assert_eq!(commits.len(), 2);
        store.commit_one(main, c1);
        assert_eq!(store.eligible_commits(), vec![(main, c2)]);
    }

    #[test]
    fn cas_fails_after_an_intervening_commit() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let cell = ids.fresh_cref(None);
        let mut store = CRefStore::new(MemoryType::SequentialConsistency);
        store.new_cref(cell, val(0));
        let (_, ticket) = store.read_for_cas(main, cell);
        store.modify(main, cell, |_| val(5));
        assert!(!store.cas(main, ticket, val(9)));
    }
}
