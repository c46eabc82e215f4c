#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The tick-driven reconciler: harvests finished tasks, dispatches pending
//! ones onto free nodes (or requests cloud capacity), and reclaims nodes
//! that have sat idle too long.

mod scheduler;

pub use scheduler::{Scheduler, SchedulerConfig};
