/// Error kinds visible at the core boundary.
///
/// Submission-time variants (`UnknownEngine`, `MissingInput`, `BadSelector`)
/// propagate straight to the caller. The remaining variants wrap whatever the
/// originating crate reported and are logged-and-swallowed by the scheduler
/// loop rather than terminating the daemon.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `submit` was called with an engine name not present in the registry.
    #[error("engine {engine:?} requested, but not supported")]
    UnknownEngine {
        /// The unrecognized engine name.
        engine: String,
    },

    /// `submit` was called without a metadata entry for one of the engine's
    /// declared input files.
    #[error("input file {file:?} was not provided for engine {engine:?}")]
    MissingInput {
        /// The engine that declared the missing file.
        engine: String,
        /// The filename that was declared but absent from metadata.
        file: String,
    },

    /// `list_tasks` was called with neither or both of `by_status`/`by_ids`.
    #[error("tasks can be selected only by status or by task ids, not both or neither")]
    BadSelector,

    /// A remote-shell (SSH/SFTP) operation failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A queue store (database) operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// A cloud provider operation failed.
    #[error("cloud provider error: {0}")]
    Provider(String),
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        SchedulerError::Store(err.to_string())
    }
}
