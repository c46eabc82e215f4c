use serde::{Deserialize, Serialize};

/// Lifecycle status of a task. Transitions are monotonic: `ToDo` → `Running`
/// → `Done`, never backwards.
///
/// The numeric values are part of the on-disk schema (`SMALLINT`) and must
/// not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum TaskStatus {
    /// Queued, not yet assigned to a host.
    ToDo = 0,
    /// Assigned to a host and (as far as the store knows) still executing.
    Running = 1,
    /// Finished; outputs harvested.
    Done = 2,
}

impl TryFrom<i16> for TaskStatus {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TaskStatus::ToDo),
            1 => Ok(TaskStatus::Running),
            2 => Ok(TaskStatus::Done),
            other => Err(other),
        }
    }
}

impl From<TaskStatus> for i16 {
    fn from(status: TaskStatus) -> Self {
        status as i16
    }
}

/// A full task row as stored by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Monotonic identifier assigned by the store on insert.
    pub task_id: i64,
    /// Free-form label chosen by the submitter.
    pub label: String,
    /// Structured metadata document. Holds the engine name, the
    /// `remote_folder` stamp, and (pre-completion) the input file contents;
    /// post-completion it holds only `{remote_folder, local_folder}`.
    pub metadata: serde_json::Value,
    /// Host the task is (or was) assigned to. `None` iff `status == ToDo`.
    pub ip: Option<String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
}

/// A lightweight view of a pending task, as returned by `Store::pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    /// Monotonic identifier assigned by the store on insert.
    pub task_id: i64,
    /// Free-form label chosen by the submitter.
    pub label: String,
    /// Structured metadata document (see [`Task::metadata`]).
    pub metadata: serde_json::Value,
}
