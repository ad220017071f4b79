//! The `Failure` taxonomy (§7), hand-rolled in the teacher's plain
//! style rather than via an error-derive crate: a closed enum with
//! manual `Display`/`std::error::Error` impls.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Failure {
    /// A user-supplied scheduler violated an invariant, e.g. it chose a
    /// thread that wasn't runnable. Never raised by the built-in
    /// schedulers.
    InternalError,
    /// The current path exceeded the active bound, or the scheduler
    /// returned "no thread".
    Abort,
    /// No progress possible: every live thread is blocked on a
    /// blocking variable (or a mix with no transaction-only blockage).
    Deadlock,
    /// No progress possible and every blocked thread is blocked
    /// exclusively inside a transaction on tvars with no writer.
    StmDeadlock,
    /// The initial thread's handler stack emptied with an in-flight
    /// exception. Carries a rendered description of the payload.
    UncaughtException(String),
    /// `subconcurrency` was nested, or invoked while more than the
    /// initial thread was live.
    IllegalSubconcurrency,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::InternalError => write!(f, "internal error: scheduler violated an invariant"),
            Failure::Abort => write!(f, "aborted: bound exceeded or scheduler declined to continue"),
            Failure::Deadlock => write!(f, "deadlock: no runnable thread remains"),
            Failure::StmDeadlock => write!(f, "stm deadlock: blocked transactions have no writer"),
            Failure::UncaughtException(msg) => write!(f, "uncaught exception: {}", msg),
            Failure::IllegalSubconcurrency => write!(f, "illegal subconcurrency: nested or multi-thread"),
        }
    }
}

impl std::error::Error for Failure {}

/// The short bracketed tag used by `render_trace` (§6) for a failed
/// execution.
pub fn render_tag(failure: &Failure) -> &'static str {
    match failure {
        Failure::InternalError => "[internal-error]",
        Failure::Abort => "[abort]",
        Failure::Deadlock => "[deadlock]",
        Failure::StmDeadlock => "[stm-deadlock]",
        Failure::UncaughtException(_) => "[exception]",
        Failure::IllegalSubconcurrency => "[illegal-subconcurrency]",
    }
}
