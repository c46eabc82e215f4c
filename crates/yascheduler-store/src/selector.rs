use yascheduler_core::{SchedulerError, TaskStatus};

/// How callers narrow `Store::list_tasks`. Exactly one variant's payload
/// must be populated; `list_tasks` rejects both "neither" and "both" with
/// `SchedulerError::BadSelector`.
#[derive(Debug, Clone, Default)]
pub struct TaskSelector {
    by_status: Option<Vec<TaskStatus>>,
    by_ids: Option<Vec<i64>>,
}

impl TaskSelector {
    /// Select tasks whose status is one of `statuses`.
    pub fn by_status(statuses: Vec<TaskStatus>) -> Self {
        Self {
            by_status: Some(statuses),
            by_ids: None,
        }
    }

    /// Select tasks by explicit id list.
    pub fn by_ids(ids: Vec<i64>) -> Self {
        Self {
            by_status: None,
            by_ids: Some(ids),
        }
    }

    /// Resolve to exactly one selection kind, or `BadSelector` if neither or
    /// both were populated. Public so that alternative `QueueStore`
    /// implementations (e.g. an in-memory fake used in tests) can share the
    /// same exactly-one-of validation `Store` applies.
    pub fn validate(self) -> Result<Validated, SchedulerError> {
        match (self.by_status, self.by_ids) {
            (Some(statuses), None) => Ok(Validated::ByStatus(statuses)),
            (None, Some(ids)) => Ok(Validated::ByIds(ids)),
            _ => Err(SchedulerError::BadSelector),
        }
    }
}

/// The validated outcome of [`TaskSelector::validate`].
pub enum Validated {
    /// Select by task status.
    ByStatus(Vec<TaskStatus>),
    /// Select by explicit task id list.
    ByIds(Vec<i64>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neither_selector_is_rejected() {
        let err = TaskSelector::default().validate().unwrap_err();
        assert!(matches!(err, SchedulerError::BadSelector));
    }

    #[test]
    fn both_selectors_is_rejected() {
        let mut selector = TaskSelector::by_ids(vec![1]);
        selector.by_status = Some(vec![TaskStatus::ToDo]);
        let err = selector.validate().unwrap_err();
        assert!(matches!(err, SchedulerError::BadSelector));
    }

    #[test]
    fn by_status_alone_is_accepted() {
        let selector = TaskSelector::by_status(vec![TaskStatus::Running]);
        assert!(matches!(selector.validate(), Ok(Validated::ByStatus(_))));
    }

    #[test]
    fn by_ids_alone_is_accepted() {
        let selector = TaskSelector::by_ids(vec![1, 2, 3]);
        assert!(matches!(selector.validate(), Ok(Validated::ByIds(_))));
    }
}
