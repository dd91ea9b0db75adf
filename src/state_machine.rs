//! Match pass state machine: Idle → Dispatched → Decided → Idle, plus the
//! per-task phases tracked on a `TaskBoard`.
//! The first terminal transition of a task wins, which is what keeps a late
//! result from being published after its pass gave up on it.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::AlgorithmKind;

/// Phase of one match pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PassPhase {
    Idle,
    Dispatched,
    Decided,
}

impl std::fmt::Display for PassPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassPhase::Idle => write!(f, "Idle"),
            PassPhase::Dispatched => write!(f, "Dispatched"),
            PassPhase::Decided => write!(f, "Decided"),
        }
    }
}

impl PassPhase {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: PassPhase) -> bool {
        matches!(
            (self, next),
            (PassPhase::Idle, PassPhase::Dispatched)
                | (PassPhase::Dispatched, PassPhase::Decided)
                | (PassPhase::Dispatched, PassPhase::Idle) // aborted, engine shut down
                | (PassPhase::Decided, PassPhase::Idle)
        )
    }
}

/// Phase of one task inside a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskPhase {
    Queued,
    Running,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Queued => write!(f, "Queued"),
            TaskPhase::Running => write!(f, "Running"),
            TaskPhase::Completed => write!(f, "Completed"),
            TaskPhase::TimedOut => write!(f, "TimedOut"),
            TaskPhase::Cancelled => write!(f, "Cancelled"),
            TaskPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskPhase::Completed | TaskPhase::TimedOut | TaskPhase::Cancelled | TaskPhase::Failed
        )
    }

    pub fn can_transition_to(self, next: TaskPhase) -> bool {
        matches!(
            (self, next),
            (TaskPhase::Queued, TaskPhase::Running)
                | (TaskPhase::Queued, TaskPhase::TimedOut) // never picked up before the deadline
                | (TaskPhase::Queued, TaskPhase::Cancelled)
                | (TaskPhase::Running, TaskPhase::Completed)
                | (TaskPhase::Running, TaskPhase::TimedOut)
                | (TaskPhase::Running, TaskPhase::Cancelled)
                | (TaskPhase::Running, TaskPhase::Failed)
        )
    }
}

/// Pass phase plus the phase of every task it dispatched.
pub struct TaskBoard {
    pass_id: String,
    phase: RwLock<PassPhase>,
    tasks: RwLock<HashMap<AlgorithmKind, TaskPhase>>,
}

impl TaskBoard {
    pub fn new(pass_id: impl Into<String>) -> Self {
        Self {
            pass_id: pass_id.into(),
            phase: RwLock::new(PassPhase::Idle),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn pass_id(&self) -> &str {
        &self.pass_id
    }

    pub fn phase(&self) -> PassPhase {
        *self.phase.read()
    }

    /// Attempt a pass transition. Returns Ok(new_phase) or Err with reason.
    pub fn transition(&self, next: PassPhase) -> Result<PassPhase, String> {
        let mut phase = self.phase.write();
        let current = *phase;
        if !current.can_transition_to(next) {
            let msg = format!("invalid pass transition: {} -> {}", current, next);
            warn!(pass_id = %self.pass_id, "{}", msg);
            return Err(msg);
        }
        *phase = next;
        info!(pass_id = %self.pass_id, from = %current, to = %next, "pass_transition");
        Ok(next)
    }

    /// Register a task as queued.
    pub fn enqueue(&self, kind: AlgorithmKind) {
        self.tasks.write().insert(kind, TaskPhase::Queued);
    }

    pub fn task_phase(&self, kind: AlgorithmKind) -> Option<TaskPhase> {
        self.tasks.read().get(&kind).copied()
    }

    /// Move a task to `next`. Returns false when the transition is not
    /// allowed, which includes every attempt to leave a terminal phase.
    pub fn advance(&self, kind: AlgorithmKind, next: TaskPhase) -> bool {
        let mut tasks = self.tasks.write();
        let Some(current) = tasks.get_mut(&kind) else {
            return false;
        };
        if !current.can_transition_to(next) {
            debug!(
                pass_id = %self.pass_id,
                algorithm = %kind,
                from = %*current,
                to = %next,
                "task transition refused"
            );
            return false;
        }
        *current = next;
        true
    }

    /// Move every unfinished task to `phase`; returns the affected kinds in
    /// declaration order.
    pub fn expire_unfinished(&self, phase: TaskPhase) -> Vec<AlgorithmKind> {
        let mut tasks = self.tasks.write();
        let mut expired: Vec<AlgorithmKind> = tasks
            .iter_mut()
            .filter(|(_, current)| !current.is_terminal() && current.can_transition_to(phase))
            .map(|(kind, current)| {
                *current = phase;
                *kind
            })
            .collect();
        expired.sort();
        expired
    }

    /// Number of tasks that finished with a publishable result.
    pub fn published_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|p| matches!(p, TaskPhase::Completed | TaskPhase::Failed))
            .count()
    }

    /// Kinds currently in `phase`, in declaration order.
    pub fn kinds_in(&self, phase: TaskPhase) -> Vec<AlgorithmKind> {
        let mut kinds: Vec<AlgorithmKind> = self
            .tasks
            .read()
            .iter()
            .filter(|(_, p)| **p == phase)
            .map(|(k, _)| *k)
            .collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_cycle() {
        let board = TaskBoard::new("pass-1");
        assert!(board.transition(PassPhase::Dispatched).is_ok());
        assert!(board.transition(PassPhase::Decided).is_ok());
        assert!(board.transition(PassPhase::Idle).is_ok());
        assert!(board.transition(PassPhase::Decided).is_err());
    }

    #[test]
    fn test_terminal_phase_is_final() {
        let board = TaskBoard::new("pass-2");
        board.enqueue(AlgorithmKind::Levenshtein);
        assert!(board.advance(AlgorithmKind::Levenshtein, TaskPhase::Running));
        assert!(board.advance(AlgorithmKind::Levenshtein, TaskPhase::TimedOut));
        // a late completion loses
        assert!(!board.advance(AlgorithmKind::Levenshtein, TaskPhase::Completed));
        assert_eq!(
            board.task_phase(AlgorithmKind::Levenshtein),
            Some(TaskPhase::TimedOut)
        );
    }

    #[test]
    fn test_expire_unfinished() {
        let board = TaskBoard::new("pass-3");
        for kind in [
            AlgorithmKind::ExactSuffix,
            AlgorithmKind::NeedlemanWunsch,
            AlgorithmKind::JaroWinkler,
        ] {
            board.enqueue(kind);
        }
        board.advance(AlgorithmKind::ExactSuffix, TaskPhase::Running);
        board.advance(AlgorithmKind::ExactSuffix, TaskPhase::Completed);
        board.advance(AlgorithmKind::JaroWinkler, TaskPhase::Running);

        let expired = board.expire_unfinished(TaskPhase::TimedOut);
        assert_eq!(
            expired,
            vec![AlgorithmKind::NeedlemanWunsch, AlgorithmKind::JaroWinkler]
        );
        assert_eq!(board.published_count(), 1);
        assert_eq!(board.kinds_in(TaskPhase::TimedOut).len(), 2);
    }

    #[test]
    fn test_unknown_task_not_advanced() {
        let board = TaskBoard::new("pass-4");
        assert!(!board.advance(AlgorithmKind::TokenJaccard, TaskPhase::Running));
    }
}
