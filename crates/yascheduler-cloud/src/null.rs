use async_trait::async_trait;
use yascheduler_core::{Node, SchedulerError};

use crate::{CloudProvider, ProvisionedInstance};

/// No-op provider used when cloud elasticity is disabled in configuration.
/// Capacity is always zero, so the scheduler never calls `allocate`.
#[derive(Debug, Default)]
pub struct NullCloudProvider;

#[async_trait]
impl CloudProvider for NullCloudProvider {
    fn name(&self) -> &str {
        "none"
    }

    async fn capacity(&self, _current_resources: &[Node]) -> i64 {
        0
    }

    async fn allocate(&self) -> Result<ProvisionedInstance, SchedulerError> {
        Err(SchedulerError::Provider(
            "cloud elasticity is disabled".to_string(),
        ))
    }

    async fn deallocate(&self, _ips: &[String]) -> Result<(), SchedulerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_is_always_zero() {
        let provider = NullCloudProvider;
        assert_eq!(provider.capacity(&[]).await, 0);
    }
}
