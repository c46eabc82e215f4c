use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IteratorRandom;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use yascheduler_cloud::Elasticity;
use yascheduler_core::{Node, SchedulerError, TaskStatus};
use yascheduler_engines::EngineRegistry;
use yascheduler_store::{QueueStore, TaskSelector};
use yascheduler_transport::Transport;

/// Tunables for the tick loop, sourced from `[scheduler]` configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base directory harvested outputs are written under.
    pub local_data_dir: PathBuf,
    /// Consecutive idle ticks a node must accumulate before reclamation.
    pub n_idle_passes: u32,
    /// Delay between ticks.
    pub sleep_interval: Duration,
}

/// A free node's known CPU count, carried between dispatch decisions.
type FreeNodes = HashMap<String, Option<i32>>;

/// The single-threaded cooperative reconciler described by the harvest /
/// dispatch / reclaim phases. One `tick()` call is one loop iteration;
/// `run()` drives it on a fixed interval until cancelled.
pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    cloud: Arc<dyn Elasticity>,
    engines: Arc<EngineRegistry>,
    config: SchedulerConfig,
    chilling: HashMap<String, u32>,
}

impl Scheduler {
    /// Build a scheduler around its collaborators. Construction does not
    /// touch the network or the database.
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        cloud: Arc<dyn Elasticity>,
        engines: Arc<EngineRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            cloud,
            engines,
            config,
            chilling: HashMap::new(),
        }
    }

    /// Run one harvest/dispatch/reclaim cycle. A store error aborts the
    /// tick (and propagates to the caller); the loop in `run()` logs it and
    /// continues at the next interval rather than terminating.
    pub async fn tick(&mut self) -> Result<(), SchedulerError> {
        let check_cmd = self.engines.aggregate_check_cmd();
        self.admit_new_nodes(&check_cmd).await?;
        let free_nodes = self.harvest(&check_cmd).await?;
        let free_nodes = self.dispatch(free_nodes, &check_cmd).await?;
        self.reclaim(free_nodes).await;
        Ok(())
    }

    /// Probe every disabled, non-placeholder node (operator-added hosts
    /// awaiting acceptance — cloud-provisioned placeholders are admitted by
    /// `CloudManager`'s own background task and never appear here) and flip
    /// it enabled once it passes admission.
    async fn admit_new_nodes(&mut self, check_cmd: &str) -> Result<(), SchedulerError> {
        let resources = self.store.list_resources().await?;
        let candidates = resources
            .into_iter()
            .filter(|node| !node.enabled && !Node::is_placeholder(&node.ip));
        for node in candidates {
            if self.transport.admit(&node.ip, check_cmd).await {
                self.store.enable_node(&node.ip).await?;
                info!(ip = node.ip, "operator-added node admitted");
            }
        }
        Ok(())
    }

    /// Tick forever on `config.sleep_interval`, until `shutdown` resolves.
    pub async fn run(mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.sleep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "tick aborted");
                    }
                }
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    async fn harvest(&mut self, check_cmd: &str) -> Result<FreeNodes, SchedulerError> {
        let resources = self.store.list_resources().await?;
        let real_ips: Vec<String> = resources
            .iter()
            .filter(|node| !Node::is_placeholder(&node.ip))
            .map(|node| node.ip.clone())
            .collect();
        self.transport.reconcile(&real_ips).await;

        let mut free_nodes: FreeNodes = resources
            .iter()
            .filter(|node| node.enabled && !Node::is_placeholder(&node.ip))
            .map(|node| (node.ip.clone(), node.ncpus))
            .collect();
        debug!(count = free_nodes.len(), "enabled nodes at start of harvest");

        let running = self
            .store
            .list_tasks(TaskSelector::by_status(vec![TaskStatus::Running]))
            .await?;

        let still_busy = futures::future::join_all(running.into_iter().map(|summary| {
            let store = Arc::clone(&self.store);
            let transport = Arc::clone(&self.transport);
            let engines = Arc::clone(&self.engines);
            let local_data_dir = self.config.local_data_dir.clone();
            let check_cmd = check_cmd.to_string();
            async move {
                let Some(ip) = summary.ip.clone() else {
                    return None;
                };
                if transport.is_task_live(&ip, &check_cmd).await {
                    return Some(ip);
                }
                if let Err(err) =
                    harvest_one(&store, &transport, &engines, &local_data_dir, summary.task_id)
                        .await
                {
                    error!(task_id = summary.task_id, error = %err, "harvesting task failed");
                }
                None
            }
        }))
        .await;

        for ip in still_busy.into_iter().flatten() {
            free_nodes.remove(&ip);
        }

        Ok(free_nodes)
    }

    async fn dispatch(
        &mut self,
        mut free_nodes: FreeNodes,
        check_cmd: &str,
    ) -> Result<FreeNodes, SchedulerError> {
        let resources = self.store.list_resources().await?;
        let capacity = self.cloud.capacity(&resources).await;
        let budget = capacity + free_nodes.len() as i64;
        if budget <= 0 {
            return Ok(free_nodes);
        }

        let pending = self.store.pending(budget).await?;
        for task in pending {
            if free_nodes.is_empty() {
                self.cloud.allocate(task.task_id, check_cmd.to_string());
                continue;
            }

            let engine_name = task.metadata.get("engine").and_then(Value::as_str);
            let engine = match engine_name.and_then(|name| self.engines.get(name)) {
                Some(engine) => engine,
                None => {
                    error!(
                        task_id = task.task_id,
                        engine_name, "pending task references unknown engine, skipping"
                    );
                    continue;
                }
            };

            let ip = free_nodes
                .keys()
                .choose(&mut rand::thread_rng())
                .cloned()
                .expect("free_nodes checked non-empty above");
            let ncpus = free_nodes.remove(&ip).flatten();

            info!(task_id = task.task_id, label = task.label, ip, "dispatching");
            match self
                .transport
                .stage_and_spawn(&ip, ncpus, engine, &task.metadata)
                .await
            {
                Ok(()) => {
                    self.store.mark_running(task.task_id, &ip).await?;
                }
                Err(err) => {
                    warn!(task_id = task.task_id, ip, error = %err, "stage_and_spawn failed, task stays pending");
                    free_nodes.insert(ip, ncpus);
                }
            }
        }

        Ok(free_nodes)
    }

    async fn reclaim(&mut self, free_nodes: FreeNodes) {
        if free_nodes.is_empty() {
            return;
        }

        let mut deallocatable = Vec::new();
        for ip in free_nodes.keys() {
            let counter = self.chilling.entry(ip.clone()).or_insert(0);
            *counter += 1;
            if *counter >= self.config.n_idle_passes {
                deallocatable.push(ip.clone());
            }
        }

        if deallocatable.is_empty() {
            return;
        }

        info!(?deallocatable, "reclaiming idle nodes");
        self.cloud.deallocate(&deallocatable).await;
        for ip in &deallocatable {
            if let Some(counter) = self.chilling.get_mut(ip) {
                *counter = counter.saturating_sub(1);
            }
        }
    }
}

async fn harvest_one(
    store: &dyn QueueStore,
    transport: &dyn Transport,
    engines: &EngineRegistry,
    local_data_dir: &Path,
    task_id: i64,
) -> Result<(), SchedulerError> {
    let Some(task) = store.get_task(task_id).await? else {
        return Ok(());
    };
    let Some(ip) = task.ip.as_deref() else {
        return Ok(());
    };

    let remote_folder = task
        .metadata
        .get("remote_folder")
        .and_then(Value::as_str)
        .ok_or_else(|| SchedulerError::Store(format!("task {task_id} missing remote_folder")))?
        .to_string();
    let engine_name = task
        .metadata
        .get("engine")
        .and_then(Value::as_str)
        .ok_or_else(|| SchedulerError::Store(format!("task {task_id} missing engine")))?
        .to_string();
    let engine = engines
        .get(&engine_name)
        .ok_or_else(|| SchedulerError::UnknownEngine {
            engine: engine_name.clone(),
        })?;

    let explicit_local_folder = task.metadata.get("local_folder").and_then(Value::as_str);
    let local_folder = local_folder_for(
        &remote_folder,
        explicit_local_folder,
        local_data_dir,
        task_id,
    );

    transport
        .fetch_outputs(ip, engine, &remote_folder, &local_folder, true)
        .await?;

    let metadata = json!({
        "remote_folder": remote_folder,
        "local_folder": local_folder.to_string_lossy(),
    });
    store.mark_done(task_id, metadata).await?;
    info!(task_id, ip, "task harvested");
    Ok(())
}

/// `metadata.local_folder` if explicitly set, else `local_data_dir` joined
/// with `remote_folder`'s basename (falling back to the task id if the
/// remote path has no final component).
fn local_folder_for(
    remote_folder: &str,
    explicit_local_folder: Option<&str>,
    local_data_dir: &Path,
    task_id: i64,
) -> PathBuf {
    if let Some(explicit) = explicit_local_folder {
        return PathBuf::from(explicit);
    }
    let basename = Path::new(remote_folder)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| task_id.to_string());
    local_data_dir.join(basename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_folder_defaults_to_remote_basename() {
        let folder = local_folder_for("/data/20260101_000000_abcd", None, Path::new("/local"), 1);
        assert_eq!(folder, Path::new("/local/20260101_000000_abcd"));
    }

    #[test]
    fn local_folder_honors_explicit_override() {
        let folder = local_folder_for(
            "/data/20260101_000000_abcd",
            Some("/custom/out"),
            Path::new("/local"),
            1,
        );
        assert_eq!(folder, Path::new("/custom/out"));
    }
}
