use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;
use yascheduler_core::Node;
use yascheduler_store::QueueStore;
use yascheduler_transport::Transport;

use crate::CloudProvider;

const ADMIT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ADMIT_MAX_ATTEMPTS: u32 = 24;

/// Coordinates a `CloudProvider` with the store and transport pool: turns
/// "allocate a node" into a placeholder row plus a background task that
/// provisions, admits, and promotes it.
pub struct CloudManager {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
}

impl CloudManager {
    /// Build a manager around an already-constructed provider.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            provider,
            store,
            transport,
        }
    }

    /// Maximum additional nodes that could be allocated right now.
    pub async fn capacity(&self, current_resources: &[Node]) -> i64 {
        self.provider.capacity(current_resources).await
    }

    /// Record an intent to provision a host for `task_id`: inserts a
    /// placeholder node row immediately, then spawns a background task that
    /// provisions, admits, and promotes it once ready. Non-blocking from
    /// the caller's perspective.
    pub fn allocate(&self, task_id: i64, aggregate_check_cmd: String) {
        let placeholder_ip = format!("pending-{}", Uuid::new_v4());
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let placeholder = Node {
            ip: placeholder_ip.clone(),
            ncpus: None,
            enabled: false,
            cloud: Some(provider.name().to_string()),
        };

        tokio::spawn(async move {
            if let Err(err) = store.insert_node(&placeholder).await {
                error!(task_id, error = %err, "failed to record placeholder node");
                return;
            }
            info!(task_id, placeholder_ip, "placeholder node recorded");

            let provisioned = match provider.allocate().await {
                Ok(provisioned) => provisioned,
                Err(err) => {
                    error!(task_id, placeholder_ip, error = %err, "provisioning failed");
                    let _ = store.delete_nodes(&[placeholder_ip.clone()]).await;
                    return;
                }
            };

            let mut admitted = false;
            for attempt in 0..ADMIT_MAX_ATTEMPTS {
                if transport
                    .admit(&provisioned.ip, &aggregate_check_cmd)
                    .await
                {
                    admitted = true;
                    break;
                }
                warn!(
                    ip = provisioned.ip,
                    attempt, "new node not admitted yet, retrying"
                );
                tokio::time::sleep(ADMIT_POLL_INTERVAL).await;
            }

            if !admitted {
                error!(
                    ip = provisioned.ip,
                    "new node never passed admission, leaving placeholder for operator cleanup"
                );
                return;
            }

            if let Err(err) = store
                .promote_node(&placeholder_ip, &provisioned.ip, provisioned.ncpus)
                .await
            {
                error!(ip = provisioned.ip, error = %err, "failed to promote node");
            }
        });
    }

    /// Retire the given hosts through the provider, then drop their rows.
    pub async fn deallocate(&self, ips: &[String]) {
        if ips.is_empty() {
            return;
        }
        if let Err(err) = self.provider.deallocate(ips).await {
            warn!(?ips, error = %err, "provider deallocate failed, dropping rows anyway");
        }
        if let Err(err) = self.store.delete_nodes(ips).await {
            error!(?ips, error = %err, "failed to delete deallocated node rows");
        }
    }
}
