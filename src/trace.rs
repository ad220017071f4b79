//! The full execution `Trace` (§3) and its informational rendering
//! (§6).

use crate::action::{Decision, ThreadAction};
use crate::failure::{render_tag, Failure};
use crate::id::ThreadId;
use std::fmt::Write as _;

/// One step: the decision that selected the thread, the lookaheads of
/// every thread that was runnable at that point (used by the explorer,
/// not by rendering), and the action the chosen thread actually
/// performed.
#[derive(Clone)]
pub struct Step {
    pub decision: Decision,
    pub runnable: Vec<(ThreadId, crate::action::Lookahead)>,
    pub action: ThreadAction,
}

pub type Trace = Vec<Step>;

/// Renders a trace the way §6 specifies: one token per step
/// (`Sx-`/`Px-`/`-`/`C-`), followed by a key of named non-initial
/// threads in ascending id, with an optional failure tag appended.
pub fn render_trace(trace: &Trace, failure: Option<&Failure>) -> String {
    let mut out = String::new();
    let mut names: Vec<(ThreadId, String)> = Vec::new();
    for step in trace {
        let tok = match &step.decision {
            Decision::Start(t) => {
                if t.num() < 0 {
                    "C-".to_string()
                } else {
                    format!("S{}-", t.num())
                }
            }
            Decision::SwitchTo(t) => {
                if t.num() < 0 {
                    "C-".to_string()
                } else {
                    format!("P{}-", t.num())
                }
            }
            Decision::Continue => "-".to_string(),
        };
        out.push_str(&tok);

        if let Some(t) = step.decision.tid(None) {
            if t.num() > 0 {
                if let Some(name) = t.name() {
                    if !names.iter().any(|(id, _)| *id == t) {
                        names.push((t, name.to_string()));
                    }
                }
            }
        }
    }

    if !names.is_empty() {
        names.sort_by_key(|(id, _)| id.num());
        let _ = write!(out, "\nkey: ");
        let rendered: Vec<String> = names
            .iter()
            .map(|(id, name)| format!("{} = {}", id.num(), name))
            .collect();
        out.push_str(&rendered.join(", "));
    }

    if let Some(f) = failure {
        let _ = write!(out, "\n{}", render_tag(f));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdSource;

    #[test]
    fn renders_start_continue_and_preempt_tokens() {
        let mut ids = IdSource::new();
        let main = ids.initial_thread();
        let t1 = ids.fresh_thread(Some("worker"));
        let trace = vec![
            Step {
                decision: Decision::Start(main),
                runnable: vec![],
                action: ThreadAction::Fork(t1),
            },
            Step {
                decision: Decision::SwitchTo(t1),
                runnable: vec![],
                action: ThreadAction::Stop,
            },
            Step {
                decision: Decision::Continue,
                runnable: vec![],
                action: ThreadAction::Stop,
            },
        ];
        let rendered = render_trace(&trace, None);
        assert!(rendered.starts_with("S0-"));
        assert!(rendered.contains("P1-"));
        assert!(rendered.contains("key: 1 = worker"));
    }

    #[test]
    fn renders_failure_tag() {
        let trace: Trace = vec![];
        let rendered = render_trace(&trace, Some(&Failure::Deadlock));
        assert!(rendered.contains("[deadlock]"));
    }
}
