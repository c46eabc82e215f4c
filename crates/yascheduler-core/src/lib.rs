#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared domain types for the yascheduler orchestrator: tasks, nodes, the
//! error taxonomy every other crate converts into, and the `remote_folder`
//! stamping helper used at submission time.

mod error;
mod node;
mod remote_folder;
mod task;

pub use error::SchedulerError;
pub use node::Node;
pub use remote_folder::remote_folder;
pub use task::{PendingTask, Task, TaskStatus};
