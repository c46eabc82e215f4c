#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The cloud elasticity layer: a provider-agnostic façade over zero or one
//! active cloud backend, plus the placeholder-node bookkeeping that lets
//! the scheduler treat "provisioning" as just another node state.

mod ec2;
mod manager;
mod null;

pub use ec2::Ec2CloudProvider;
pub use manager::CloudManager;
pub use null::NullCloudProvider;

use async_trait::async_trait;
use yascheduler_core::{Node, SchedulerError};

/// A freshly provisioned host, ready to be admitted.
#[derive(Debug, Clone)]
pub struct ProvisionedInstance {
    /// Real, dotted/hostname ip the host is reachable on.
    pub ip: String,
    /// CPU count, if the provider can report it upfront.
    pub ncpus: Option<i32>,
}

/// Capability set for an elastic compute backend. Modeled as a trait
/// (rather than an enum) because providers differ in what they need to
/// provision and retire a host, not just in a handful of parameters.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short tag identifying this provider, stored on node rows it creates.
    fn name(&self) -> &str;

    /// Maximum additional nodes that could be allocated right now,
    /// inclusive of nodes already provisioning. `current_resources` is the
    /// full node table as currently known to the store.
    async fn capacity(&self, current_resources: &[Node]) -> i64;

    /// Provision exactly one new host. Blocks (from the caller's task,
    /// not the scheduler's) until the host is reachable on the network or
    /// provisioning definitively fails.
    async fn allocate(&self) -> Result<ProvisionedInstance, SchedulerError>;

    /// Retire the given hosts. Errors are per-provider; the caller removes
    /// the corresponding rows from the store regardless, per the
    /// reclamation failure-semantics table.
    async fn deallocate(&self, ips: &[String]) -> Result<(), SchedulerError>;
}

/// Capability set the scheduler depends on for cloud elasticity, so it can
/// run against an in-memory fake in tests instead of a real provider.
#[async_trait]
pub trait Elasticity: Send + Sync {
    /// See [`CloudManager::capacity`].
    async fn capacity(&self, current_resources: &[Node]) -> i64;
    /// See [`CloudManager::allocate`].
    fn allocate(&self, task_id: i64, aggregate_check_cmd: String);
    /// See [`CloudManager::deallocate`].
    async fn deallocate(&self, ips: &[String]);
}

#[async_trait]
impl Elasticity for CloudManager {
    async fn capacity(&self, current_resources: &[Node]) -> i64 {
        self.capacity(current_resources).await
    }

    fn allocate(&self, task_id: i64, aggregate_check_cmd: String) {
        self.allocate(task_id, aggregate_check_cmd)
    }

    async fn deallocate(&self, ips: &[String]) {
        self.deallocate(ips).await
    }
}
