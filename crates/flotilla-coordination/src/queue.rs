use std::cmp::Reverse;
use std::collections::BTreeMap;

use flotilla_types::TaskAssignment;

/// Ordering key: priority descending, requeued tasks ahead of fresh ones, then arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<i32>,
    fresh: bool,
    sequence: u64,
}

impl PendingKey {
    fn of(task: &TaskAssignment) -> Self {
        Self {
            priority: Reverse(task.priority),
            fresh: task.requeue_count == 0,
            sequence: task.sequence,
        }
    }
}

/// Stable priority queue of tasks waiting for an agent.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<PendingKey, TaskAssignment>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task at the position its priority and history dictate. A task that
    /// has been requeued lands ahead of every fresh task of the same priority.
    pub fn push(&mut self, task: TaskAssignment) {
        self.entries.insert(PendingKey::of(&task), task);
    }

    pub fn pop(&mut self) -> Option<TaskAssignment> {
        self.entries.pop_first().map(|(_, task)| task)
    }

    pub fn peek(&self) -> Option<&TaskAssignment> {
        self.entries.values().next()
    }

    pub fn remove(&mut self, task_id: &str) -> Option<TaskAssignment> {
        let key = self
            .entries
            .iter()
            .find(|(_, task)| task.task_id == task_id)
            .map(|(key, _)| *key)?;
        self.entries.remove(&key)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskAssignment> {
        self.entries.values().find(|task| task.task_id == task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.get(task_id).is_some()
    }

    /// Take every task out, in dispatch order.
    pub fn drain(&mut self) -> Vec<TaskAssignment> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Tasks in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskAssignment> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
