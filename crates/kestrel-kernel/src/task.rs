//! Task table.
//!
//! Every schedulable unit of work is created at kernel build time and lives
//! in a pre-allocated arena, the [`TaskTable`]. The rest of the core refers
//! to tasks exclusively through dense [`TaskId`] handles, so ready queues are
//! plain handle lists and no intrusive linkage is needed. The core never
//! creates or destroys tasks after build; it only observes them and moves
//! them between the ready and blocked states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Dense handle into the kernel's task table.
///
/// Handles are assigned in registration order by the builder and are stable
/// for the lifetime of the kernel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaskId(usize);

impl TaskId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// The handle's index into the task table.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Run state of a task as seen by the dispatch core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Eligible to run; present in its priority level's ready queue.
    Ready,
    /// Waiting on an event or semaphore; absent from the ready queues.
    Blocked,
}

/// Metadata snapshot of a task visible to external callers and monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    /// Priority level. Lower values are scheduled first.
    pub priority: usize,
    pub state: TaskState,
    /// Opaque execution-context handle, consumed only by the port.
    pub context: u64,
    /// When this snapshot was captured.
    pub captured_at: DateTime<Utc>,
}

/// A task record in the arena. Mutated only by the kernel server's own
/// execution context.
#[derive(Debug)]
pub(crate) struct TaskControl {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) priority: usize,
    pub(crate) state: TaskState,
    pub(crate) context: u64,
}

impl TaskControl {
    pub(crate) fn new(id: TaskId, name: String, priority: usize, context: u64) -> Self {
        Self {
            id,
            name,
            priority,
            state: TaskState::Ready,
            context,
        }
    }

    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            state: self.state,
            context: self.context,
            captured_at: Utc::now(),
        }
    }
}

/// Pre-allocated arena of task records, fixed at build time.
#[derive(Debug)]
pub(crate) struct TaskTable {
    records: Vec<TaskControl>,
    idle: TaskId,
}

impl TaskTable {
    pub(crate) fn new(records: Vec<TaskControl>, idle: TaskId) -> Self {
        Self { records, idle }
    }

    pub(crate) fn get(&self, id: TaskId) -> Result<&TaskControl> {
        self.records
            .get(id.index())
            .ok_or(KernelError::UnknownTask { task: id })
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskControl> {
        self.records
            .get_mut(id.index())
            .ok_or(KernelError::UnknownTask { task: id })
    }

    /// Direct access for handles the core itself produced (e.g. the result
    /// of a selection). An out-of-range handle here is a broken invariant
    /// and panics.
    pub(crate) fn record(&self, id: TaskId) -> &TaskControl {
        &self.records[id.index()]
    }

    pub(crate) fn is_idle(&self, id: TaskId) -> bool {
        id == self.idle
    }

    pub(crate) fn idle(&self) -> TaskId {
        self.idle
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &TaskControl> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TaskTable {
        let records = vec![
            TaskControl::new(TaskId::new(0), "net-rx".into(), 3, 0x10),
            TaskControl::new(TaskId::new(1), "idle".into(), 15, 0),
        ];
        TaskTable::new(records, TaskId::new(1))
    }

    #[test]
    fn lookup_by_handle() {
        let table = table();
        let record = table.get(TaskId::new(0)).expect("task should exist");
        assert_eq!(record.name, "net-rx");
        assert_eq!(record.priority, 3);
        assert_eq!(record.state, TaskState::Ready);
    }

    #[test]
    fn unknown_handle_is_typed_error() {
        let table = table();
        let result = table.get(TaskId::new(7));
        assert!(matches!(result, Err(KernelError::UnknownTask { .. })));
    }

    #[test]
    fn idle_designation() {
        let table = table();
        assert!(table.is_idle(TaskId::new(1)));
        assert!(!table.is_idle(TaskId::new(0)));
        assert_eq!(table.idle(), TaskId::new(1));
    }

    #[test]
    fn info_snapshot_serializes() {
        let table = table();
        let info = table.record(TaskId::new(0)).info();

        let json = serde_json::to_string(&info).expect("snapshot should serialize");
        let back: TaskInfo = serde_json::from_str(&json).expect("snapshot should deserialize");

        assert_eq!(back.id, info.id);
        assert_eq!(back.name, "net-rx");
        assert_eq!(back.state, TaskState::Ready);
        assert_eq!(back.context, 0x10);
    }
}
