//! Identifier families: threads, cells, MVar-like blocking variables, and
//! TVar-like transactional variables.
//!
//! Every identifier is `(optional display name, integer)`, ordered and
//! compared purely by the integer. A single `IdSource` per execution
//! allocates the integers and arbitrates name collisions.

use std::collections::HashMap;
use std::fmt;

/// Marker trait for the four identifier families, so `Id<F>` can't be
/// confused across families at the type level.
pub trait Family: Copy + Clone + fmt::Debug {
    const PREFIX: &'static str;
}

#[derive(Copy, Clone, Debug)]
pub struct ThreadFamily;
impl Family for ThreadFamily {
    const PREFIX: &'static str = "thread";
}

#[derive(Copy, Clone, Debug)]
pub struct CRefFamily;
impl Family for CRefFamily {
    const PREFIX: &'static str = "cref";
}

#[derive(Copy, Clone, Debug)]
pub struct MVarFamily;
impl Family for MVarFamily {
    const PREFIX: &'static str = "mvar";
}

#[derive(Copy, Clone, Debug)]
pub struct TVarFamily;
impl Family for TVarFamily {
    const PREFIX: &'static str = "tvar";
}

/// An identifier: an optional user-supplied display name plus a
/// monotonically increasing integer, unique within its family for one
/// execution. `Ord`/`Eq` are derived from the integer alone.
pub struct Id<F> {
    name: Option<String>,
    num: i64,
    _family: std::marker::PhantomData<F>,
}

impl<F> Id<F> {
    pub fn num(&self) -> i64 {
        self.num
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<F: Family> fmt::Debug for Id<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "{}({}, {})", F::PREFIX, n, self.num),
            None => write!(f, "{}({})", F::PREFIX, self.num),
        }
    }
}

impl<F: Family> fmt::Display for Id<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "{}", n),
            None => write!(f, "{}", self.num),
        }
    }
}

impl<F> Clone for Id<F> {
    fn clone(&self) -> Self {
        Id {
            name: self.name.clone(),
            num: self.num,
            _family: std::marker::PhantomData,
        }
    }
}

impl<F> PartialEq for Id<F> {
    fn eq(&self, other: &Self) -> bool {
        self.num == other.num
    }
}
impl<F> Eq for Id<F> {}

impl<F> PartialOrd for Id<F> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<F> Ord for Id<F> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.num.cmp(&other.num)
    }
}
impl<F> std::hash::Hash for Id<F> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.num.hash(state);
    }
}
impl<F> Copy for Id<F> {}

pub type ThreadId = Id<ThreadFamily>;
pub type CRefId = Id<CRefFamily>;
pub type MVarId = Id<MVarFamily>;
pub type TVarId = Id<TVarFamily>;

/// The initial thread always gets integer 0 and the name "main".
pub const INITIAL_THREAD_NUM: i64 = 0;

/// Allocates identifiers within one execution. Holds, per family, the
/// next integer to hand out and the set of display names already in
/// use, so a colliding user-supplied name gets a numeric suffix (the
/// first occurrence of a name keeps the bare name).
#[derive(Default)]
pub struct IdSource {
    next_thread: i64,
    next_cref: i64,
    next_mvar: i64,
    next_tvar: i64,
    thread_names: HashMap<String, u32>,
    cref_names: HashMap<String, u32>,
    mvar_names: HashMap<String, u32>,
    tvar_names: HashMap<String, u32>,
    /// Negative counter for commit pseudo-thread ids (§4.2); decremented,
    /// never reused within an execution.
    next_commit_thread: i64,
}

fn dedupe_name(table: &mut HashMap<String, u32>, name: Option<&str>) -> Option<String> {
    let name = name?;
    let count = table.entry(name.to_string()).or_insert(0);
    let result = if *count == 0 {
        name.to_string()
    } else {
        format!("{}-{}", name, count)
    };
    *count += 1;
    Some(result)
}

impl IdSource {
    pub fn new() -> Self {
        let mut src = IdSource::default();
        src.next_thread = 1; // 0 is reserved for the initial thread
        src
    }

    /// Allocates the initial thread. Must be called exactly once, before
    /// any other allocation.
    pub fn initial_thread(&mut self) -> ThreadId {
        self.thread_names.insert("main".to_string(), 1);
        Id {
            name: Some("main".to_string()),
            num: INITIAL_THREAD_NUM,
            _family: std::marker::PhantomData,
        }
    }

    pub fn fresh_thread(&mut self, name: Option<&str>) -> ThreadId {
        let num = self.next_thread;
        self.next_thread += 1;
        Id {
            name: dedupe_name(&mut self.thread_names, name),
            num,
            _family: std::marker::PhantomData,
        }
    }

    /// Allocates a commit pseudo-thread id. These are negative and never
    /// collide with real thread ids, so they sort below every real
    /// thread per §3.
    pub fn fresh_commit_thread(&mut self) -> ThreadId {
        self.next_commit_thread -= 1;
        Id {
            name: None,
            num: self.next_commit_thread,
            _family: std::marker::PhantomData,
        }
    }

    pub fn fresh_cref(&mut self, name: Option<&str>) -> CRefId {
        let num = self.next_cref;
        self.next_cref += 1;
        Id {
            name: dedupe_name(&mut self.cref_names, name),
            num,
            _family: std::marker::PhantomData,
        }
    }

    pub fn fresh_mvar(&mut self, name: Option<&str>) -> MVarId {
        let num = self.next_mvar;
        self.next_mvar += 1;
        Id {
            name: dedupe_name(&mut self.mvar_names, name),
            num,
            _family: std::marker::PhantomData,
        }
    }

    pub fn fresh_tvar(&mut self, name: Option<&str>) -> TVarId {
        let num = self.next_tvar;
        self.next_tvar += 1;
        Id {
            name: dedupe_name(&mut self.tvar_names, name),
            num,
            _family: std::marker::PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_thread_is_zero_and_named_main() {
        let mut ids = IdSource::new();
        let t = ids.initial_thread();
        assert_eq!(t.num(), 0);
        assert_eq!(t.name(), Some("main"));
    }

    #[test]
    fn thread_ids_increase_monotonically() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let t1 = ids.fresh_thread(None);
        let t2 = ids.fresh_thread(None);
        assert!(main.num() < t1.num());
        assert!(t1.num() < t2.num());
    }

    #[test]
    fn colliding_names_get_numeric_suffix() {
        let mut ids = IdSource::new();
        let _main = ids.initial_thread();
        let a = ids.fresh_cref(Some("x"));
        let b = ids.fresh_cref(Some("x"));
        let c = ids.fresh_cref(Some("x"));
        assert_eq!(a.name(), Some("x"));
        assert_eq!(b.name(), Some("x-1"));
        assert_eq!(c.name(), Some("x-2"));
    }

    #[test]
    fn commit_thread_ids_are_negative_and_sort_below_real_threads() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let c1 = ids.fresh_commit_thread();
        let c2 = ids.fresh_commit_thread();
        assert!(c1.num() < 0);
        assert!(c2.num() < c1.num());
        assert!(c1 < main);
    }
}
