use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::types::{InstanceStateName, ResourceType, Tag, TagSpecification};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use yascheduler_core::{Node, SchedulerError};

use crate::{CloudProvider, ProvisionedInstance};

/// EC2-backed elasticity. One instance per `allocate` call; the instance
/// id is kept in-process so `deallocate` can map a bare ip back to it
/// without re-scanning the account.
pub struct Ec2CloudProvider {
    client: aws_sdk_ec2::Client,
    ami_id: String,
    instance_type: aws_sdk_ec2::types::InstanceType,
    key_name: String,
    security_group_ids: Vec<String>,
    subnet_id: Option<String>,
    max_instances: i64,
    instances: Mutex<HashMap<String, String>>,
}

impl Ec2CloudProvider {
    /// Build a provider from an already-resolved AWS SDK config.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        ami_id: String,
        instance_type: String,
        key_name: String,
        security_group_ids: Vec<String>,
        subnet_id: Option<String>,
        max_instances: i64,
    ) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(sdk_config),
            ami_id,
            instance_type: aws_sdk_ec2::types::InstanceType::from(instance_type.as_str()),
            key_name,
            security_group_ids,
            subnet_id,
            max_instances,
            instances: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CloudProvider for Ec2CloudProvider {
    fn name(&self) -> &str {
        "ec2"
    }

    async fn capacity(&self, current_resources: &[Node]) -> i64 {
        let in_use = current_resources
            .iter()
            .filter(|node| node.cloud.as_deref() == Some(self.name()))
            .count() as i64;
        (self.max_instances - in_use).max(0)
    }

    async fn allocate(&self) -> Result<ProvisionedInstance, SchedulerError> {
        let mut request = self
            .client
            .run_instances()
            .image_id(&self.ami_id)
            .instance_type(self.instance_type.clone())
            .key_name(&self.key_name)
            .min_count(1)
            .max_count(1)
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(Tag::builder().key("ManagedBy").value("yascheduler").build())
                    .build(),
            );
        for group_id in &self.security_group_ids {
            request = request.security_group_ids(group_id);
        }
        if let Some(subnet_id) = &self.subnet_id {
            request = request.subnet_id(subnet_id);
        }

        let output = request
            .send()
            .await
            .map_err(|err| SchedulerError::Provider(format!("run_instances: {err}")))?;
        let instance_id = output
            .instances()
            .first()
            .and_then(|instance| instance.instance_id())
            .ok_or_else(|| {
                SchedulerError::Provider("run_instances returned no instance id".to_string())
            })?
            .to_string();

        info!(instance_id, "ec2 instance requested");
        let ip = self.wait_until_reachable(&instance_id).await?;

        self.instances
            .lock()
            .await
            .insert(ip.clone(), instance_id.clone());
        Ok(ProvisionedInstance { ip, ncpus: None })
    }

    async fn deallocate(&self, ips: &[String]) -> Result<(), SchedulerError> {
        let mut instances = self.instances.lock().await;
        let mut instance_ids = Vec::new();
        for ip in ips {
            match instances.remove(ip) {
                Some(instance_id) => instance_ids.push(instance_id),
                None => warn!(ip, "no tracked ec2 instance id for node, skipping terminate"),
            }
        }
        if instance_ids.is_empty() {
            return Ok(());
        }

        self.client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.clone()))
            .send()
            .await
            .map_err(|err| SchedulerError::Provider(format!("terminate_instances: {err}")))?;
        info!(?instance_ids, "ec2 instances terminated");
        Ok(())
    }
}

impl Ec2CloudProvider {
    async fn wait_until_reachable(&self, instance_id: &str) -> Result<String, SchedulerError> {
        const MAX_ATTEMPTS: u32 = 60;
        const POLL_INTERVAL: Duration = Duration::from_secs(5);

        for attempt in 0..MAX_ATTEMPTS {
            let output = self
                .client
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|err| SchedulerError::Provider(format!("describe_instances: {err}")))?;

            let instance = output
                .reservations()
                .iter()
                .flat_map(|reservation| reservation.instances())
                .next();

            if let Some(instance) = instance {
                let running = instance
                    .state()
                    .and_then(|state| state.name())
                    .map(|name| *name == InstanceStateName::Running)
                    .unwrap_or(false);
                if running {
                    if let Some(ip) = instance.public_ip_address().or(instance.private_ip_address())
                    {
                        return Ok(ip.to_string());
                    }
                }
            }

            debug!(instance_id, attempt, "waiting for instance to come up");
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(SchedulerError::Provider(format!(
            "{instance_id} did not become reachable in time"
        )))
    }
}
