//! In-memory task store.
//!
//! Owns the task state map and the ordered pending-work queue. The store is
//! a plain struct; callers share it as `Arc<RwLock<TaskStore>>` and never
//! hold the lock across an `.await`.
//!
//! Invariant: an id is in the pending queue iff its state is
//! [`TaskState::Pending`], and it appears there at most once. Every public
//! mutation preserves it.

use crate::chain::InputData;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::debug;

/// Lifecycle state of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Detected, waiting to be computed and submitted.
    Pending,
    /// Result sent, waiting for on-chain acceptance.
    Submitted,
    /// Accepted on-chain. Terminal.
    Accepted,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Submitted => write!(f, "submitted"),
            TaskState::Accepted => write!(f, "accepted"),
        }
    }
}

/// A task tracked by the worker.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task ID assigned by the contract.
    pub id: u64,
    /// Input payload from the creation event.
    pub input_data: InputData,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Number of times the task has been claimed for submission.
    pub attempts: u32,
    /// When the creation event was applied.
    pub detected_at: Instant,
    /// When the task was marked Accepted.
    pub accepted_at: Option<Instant>,
}

/// A task handed to the processing loop by [`TaskStore::claim_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    /// Task ID.
    pub id: u64,
    /// Input payload.
    pub input_data: InputData,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

/// Number of tracked tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    /// Tasks in [`TaskState::Pending`].
    pub pending: usize,
    /// Tasks in [`TaskState::Submitted`].
    pub submitted: usize,
    /// Tasks in [`TaskState::Accepted`].
    pub accepted: usize,
}

/// Task state map plus FIFO pending queue.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<u64, Task>,
    queue: VecDeque<u64>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created task as Pending and enqueue it.
    ///
    /// Returns `false` without touching the store if the id is already known,
    /// whatever its state.
    pub fn insert_created(&mut self, id: u64, input_data: InputData) -> bool {
        if self.tasks.contains_key(&id) {
            return false;
        }

        self.tasks.insert(
            id,
            Task {
                id,
                input_data,
                state: TaskState::Pending,
                attempts: 0,
                detected_at: Instant::now(),
                accepted_at: None,
            },
        );
        self.queue.push_back(id);

        debug!(task_id = id, queue_len = self.queue.len(), "Task enqueued");
        true
    }

    /// Mark a task Accepted and drop it from the pending queue.
    ///
    /// Applies to any task not already Accepted. Returns `false` for unknown
    /// ids and for tasks that were already Accepted.
    pub fn mark_accepted(&mut self, id: u64) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };

        match task.state {
            TaskState::Accepted => return false,
            TaskState::Pending => self.queue.retain(|queued| *queued != id),
            TaskState::Submitted => {}
        }
        task.state = TaskState::Accepted;
        task.accepted_at = Some(Instant::now());
        true
    }

    /// Forget tasks accepted before `cutoff`.
    ///
    /// Only Accepted tasks are removed, so the queue is untouched. Returns
    /// the number of tasks dropped.
    pub fn prune_accepted(&mut self, cutoff: Instant) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| match task.accepted_at {
            Some(accepted_at) => accepted_at >= cutoff,
            None => true,
        });
        let pruned = before - self.tasks.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.tasks.len(), "Pruned accepted tasks");
        }
        pruned
    }

    /// Pop the next Pending task and move it to Submitted.
    ///
    /// Queue entries whose task is no longer Pending are discarded. The pop
    /// and the state change happen under the same borrow, so the queue/state
    /// invariant holds for every observer.
    pub fn claim_next(&mut self) -> Option<ClaimedTask> {
        while let Some(id) = self.queue.pop_front() {
            match self.tasks.get_mut(&id) {
                Some(task) if task.state == TaskState::Pending => {
                    task.state = TaskState::Submitted;
                    task.attempts += 1;

                    debug!(
                        task_id = id,
                        attempt = task.attempts,
                        queue_len = self.queue.len(),
                        "Task claimed"
                    );

                    return Some(ClaimedTask {
                        id,
                        input_data: task.input_data,
                        attempt: task.attempts,
                    });
                }
                other => {
                    debug!(
                        task_id = id,
                        state = ?other.map(|t| t.state),
                        "Discarding stale queue entry"
                    );
                }
            }
        }

        None
    }

    /// Return a Submitted task to Pending at the back of the queue.
    ///
    /// No-op (returns `false`) for any other state, in particular when the
    /// task was accepted while its submission was in flight.
    pub fn requeue(&mut self, id: u64) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.state == TaskState::Submitted => {
                task.state = TaskState::Pending;
                self.queue.push_back(id);
                true
            }
            _ => false,
        }
    }

    /// State of a task, if known.
    pub fn state(&self, id: u64) -> Option<TaskState> {
        self.tasks.get(&id).map(|task| task.state)
    }

    /// Full task record, if known.
    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Whether the id is currently in the pending queue.
    pub fn is_queued(&self, id: u64) -> bool {
        self.queue.contains(&id)
    }

    /// Ids in the pending queue, front first.
    pub fn queued_ids(&self) -> Vec<u64> {
        self.queue.iter().copied().collect()
    }

    /// Number of ids in the pending queue.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of tracked tasks in any state.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count tracked tasks per state.
    pub fn count_by_state(&self) -> StateCounts {
        self.tasks
            .values()
            .fold(StateCounts::default(), |mut counts, task| {
                match task.state {
                    TaskState::Pending => counts.pending += 1,
                    TaskState::Submitted => counts.submitted += 1,
                    TaskState::Accepted => counts.accepted += 1,
                }
                counts
            })
    }

    /// Check the queue/state invariant.
    pub fn is_consistent(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.queue.len());
        for id in &self.queue {
            if !seen.insert(*id) || self.state(*id) != Some(TaskState::Pending) {
                return false;
            }
        }

        self.tasks
            .values()
            .filter(|task| task.state == TaskState::Pending)
            .all(|task| seen.contains(&task.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_created() {
        let mut store = TaskStore::new();

        assert!(store.insert_created(7, [0xab; 32]));
        assert_eq!(store.state(7), Some(TaskState::Pending));
        assert!(store.is_queued(7));
        assert_eq!(store.pending_len(), 1);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_duplicate_created_is_noop() {
        let mut store = TaskStore::new();
        store.insert_created(7, [0xab; 32]);

        assert!(!store.insert_created(7, [0xcd; 32]));
        assert_eq!(store.queued_ids(), vec![7]);
        assert_eq!(store.get(7).unwrap().input_data, [0xab; 32]);
    }

    #[test]
    fn test_duplicate_created_after_accept_is_noop() {
        let mut store = TaskStore::new();
        store.insert_created(7, [0xab; 32]);
        store.claim_next().unwrap();
        store.mark_accepted(7);

        assert!(!store.insert_created(7, [0xab; 32]));
        assert_eq!(store.state(7), Some(TaskState::Accepted));
        assert!(!store.is_queued(7));
    }

    #[test]
    fn test_claim_moves_to_submitted() {
        let mut store = TaskStore::new();
        store.insert_created(1, [1; 32]);
        store.insert_created(2, [2; 32]);

        let claimed = store.claim_next().unwrap();
        assert_eq!(claimed.id, 1);
        assert_eq!(claimed.attempt, 1);
        assert_eq!(store.state(1), Some(TaskState::Submitted));
        assert!(!store.is_queued(1));
        assert_eq!(store.queued_ids(), vec![2]);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_claim_empty() {
        let mut store = TaskStore::new();
        assert!(store.claim_next().is_none());
    }

    #[test]
    fn test_accept_submitted() {
        let mut store = TaskStore::new();
        store.insert_created(7, [0; 32]);
        store.claim_next();

        assert!(store.mark_accepted(7));
        assert_eq!(store.state(7), Some(TaskState::Accepted));
        assert!(!store.is_queued(7));
        assert!(store.is_consistent());
    }

    #[test]
    fn test_accept_pending_removes_from_queue() {
        let mut store = TaskStore::new();
        store.insert_created(1, [0; 32]);
        store.insert_created(2, [0; 32]);

        assert!(store.mark_accepted(1));
        assert_eq!(store.queued_ids(), vec![2]);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_accept_unknown_is_noop() {
        let mut store = TaskStore::new();
        assert!(!store.mark_accepted(99));
        assert!(store.is_empty());
    }

    #[test]
    fn test_accept_twice() {
        let mut store = TaskStore::new();
        store.insert_created(3, [0; 32]);
        assert!(store.mark_accepted(3));
        assert!(!store.mark_accepted(3));
    }

    #[test]
    fn test_requeue_submitted() {
        let mut store = TaskStore::new();
        store.insert_created(9, [0; 32]);
        store.insert_created(10, [0; 32]);
        store.claim_next();

        assert!(store.requeue(9));
        assert_eq!(store.state(9), Some(TaskState::Pending));
        assert_eq!(store.queued_ids(), vec![10, 9]);
        assert!(store.is_consistent());

        let again = store.claim_next().unwrap();
        assert_eq!(again.id, 10);
        let again = store.claim_next().unwrap();
        assert_eq!(again.id, 9);
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn test_requeue_accepted_is_noop() {
        let mut store = TaskStore::new();
        store.insert_created(12, [0; 32]);
        store.claim_next();
        store.mark_accepted(12);

        assert!(!store.requeue(12));
        assert_eq!(store.state(12), Some(TaskState::Accepted));
        assert!(!store.is_queued(12));
    }

    #[test]
    fn test_requeue_pending_or_unknown_is_noop() {
        let mut store = TaskStore::new();
        store.insert_created(1, [0; 32]);

        assert!(!store.requeue(1));
        assert!(!store.requeue(2));
        assert_eq!(store.queued_ids(), vec![1]);
    }

    #[test]
    fn test_count_by_state() {
        let mut store = TaskStore::new();
        store.insert_created(1, [0; 32]);
        store.insert_created(2, [0; 32]);
        store.insert_created(3, [0; 32]);
        store.claim_next();
        store.claim_next();
        store.mark_accepted(1);

        assert_eq!(
            store.count_by_state(),
            StateCounts {
                pending: 1,
                submitted: 1,
                accepted: 1,
            }
        );
    }

    #[test]
    fn test_prune_accepted_keeps_live_tasks() {
        let mut store = TaskStore::new();
        store.insert_created(1, [1; 32]);
        store.insert_created(2, [2; 32]);
        store.insert_created(3, [3; 32]);
        store.claim_next();
        store.mark_accepted(1);
        store.claim_next();

        assert!(store.get(1).unwrap().accepted_at.is_some());
        assert!(store.get(2).unwrap().accepted_at.is_none());

        let before_accept = store.get(1).unwrap().detected_at;
        assert_eq!(store.prune_accepted(before_accept), 0);
        assert_eq!(store.len(), 3);

        let later = Instant::now() + std::time::Duration::from_secs(1);
        assert_eq!(store.prune_accepted(later), 1);
        assert_eq!(store.state(1), None);
        assert_eq!(store.state(2), Some(TaskState::Submitted));
        assert_eq!(store.state(3), Some(TaskState::Pending));
        assert!(store.is_consistent());
    }
}
