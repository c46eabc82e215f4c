//! In-memory fakes for `QueueStore`, `Transport`, and `Elasticity`, so the
//! scheduler's tick logic can be exercised without Postgres, SSH, or a cloud
//! backend. Driven by plain `std::sync::Mutex` locking since nothing here
//! actually suspends.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use yascheduler_cloud::Elasticity;
use yascheduler_core::{Node, PendingTask, SchedulerError, Task, TaskStatus, remote_folder};
use yascheduler_engines::EngineDescriptor;
use yascheduler_store::{QueueStore, TaskSelector, TaskSummary, Validated};
use yascheduler_transport::Transport;

/// A single-engine descriptor good enough for most scenario tests.
pub fn sample_engine() -> EngineDescriptor {
    EngineDescriptor {
        input_files: vec!["in.dat".to_string()],
        output_files: vec!["out.dat".to_string()],
        spawn: "cd {path} && run -n {ncpus}".to_string(),
        run_marker: "runX".to_string(),
        check_cmd: "ps aux | grep -v grep | grep runX".to_string(),
    }
}

#[derive(Default)]
struct FakeStoreState {
    next_task_id: i64,
    tasks: HashMap<i64, Task>,
    nodes: HashMap<String, Node>,
}

/// Stand-in for `yascheduler_store::Store`.
pub struct FakeStore {
    state: Mutex<FakeStoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeStoreState {
                next_task_id: 1,
                tasks: HashMap::new(),
                nodes: HashMap::new(),
            }),
        }
    }

    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        let store = Self::new();
        let mut state = store.state.lock().unwrap();
        for node in nodes {
            state.nodes.insert(node.ip.clone(), node);
        }
        drop(state);
        store
    }

    pub fn node(&self, ip: &str) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(ip).cloned()
    }

    pub fn task(&self, task_id: i64) -> Task {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(&task_id)
            .cloned()
            .unwrap_or_else(|| panic!("task {task_id} not found in fake store"))
    }

    pub fn insert_node_sync(&self, node: Node) {
        self.state.lock().unwrap().nodes.insert(node.ip.clone(), node);
    }

    pub fn promote_node_sync(&self, placeholder_ip: &str, real_ip: &str, ncpus: Option<i32>) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut node) = state.nodes.remove(placeholder_ip) {
            node.ip = real_ip.to_string();
            node.ncpus = ncpus;
            node.enabled = true;
            state.nodes.insert(real_ip.to_string(), node);
        }
    }
}

#[async_trait]
impl QueueStore for FakeStore {
    async fn submit(
        &self,
        label: &str,
        mut metadata: Value,
        engine_name: &str,
        engine: &EngineDescriptor,
        remote_data_dir: &str,
    ) -> Result<i64, SchedulerError> {
        for input_file in &engine.input_files {
            if metadata.get(input_file).is_none() {
                return Err(SchedulerError::MissingInput {
                    engine: engine_name.to_string(),
                    file: input_file.clone(),
                });
            }
        }
        let obj = metadata
            .as_object_mut()
            .ok_or_else(|| SchedulerError::Store("metadata must be a JSON object".to_string()))?;
        obj.insert("engine".to_string(), json!(engine_name));
        obj.insert(
            "remote_folder".to_string(),
            json!(remote_folder(remote_data_dir)),
        );

        let mut state = self.state.lock().unwrap();
        let task_id = state.next_task_id;
        state.next_task_id += 1;
        state.tasks.insert(
            task_id,
            Task {
                task_id,
                label: label.to_string(),
                metadata,
                ip: None,
                status: TaskStatus::ToDo,
            },
        );
        Ok(task_id)
    }

    async fn list_resources(&self) -> Result<Vec<Node>, SchedulerError> {
        Ok(self.state.lock().unwrap().nodes.values().cloned().collect())
    }

    async fn list_tasks(&self, selector: TaskSelector) -> Result<Vec<TaskSummary>, SchedulerError> {
        let state = self.state.lock().unwrap();
        let mut summaries: Vec<TaskSummary> = match selector.validate()? {
            Validated::ByStatus(statuses) => state
                .tasks
                .values()
                .filter(|task| statuses.contains(&task.status))
                .map(task_summary)
                .collect(),
            Validated::ByIds(ids) => state
                .tasks
                .values()
                .filter(|task| ids.contains(&task.task_id))
                .map(task_summary)
                .collect(),
        };
        summaries.sort_by_key(|summary| summary.task_id);
        Ok(summaries)
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, SchedulerError> {
        Ok(self.state.lock().unwrap().tasks.get(&task_id).cloned())
    }

    async fn pending(&self, limit: i64) -> Result<Vec<PendingTask>, SchedulerError> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<PendingTask> = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::ToDo)
            .map(|task| PendingTask {
                task_id: task.task_id,
                label: task.label.clone(),
                metadata: task.metadata.clone(),
            })
            .collect();
        pending.sort_by_key(|task| task.task_id);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_running(&self, task_id: i64, ip: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Running;
            task.ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn mark_done(&self, task_id: i64, metadata: Value) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Done;
            task.metadata = metadata;
        }
        Ok(())
    }

    async fn insert_node(&self, node: &Node) -> Result<(), SchedulerError> {
        self.insert_node_sync(node.clone());
        Ok(())
    }

    async fn promote_node(
        &self,
        placeholder_ip: &str,
        real_ip: &str,
        ncpus: Option<i32>,
    ) -> Result<(), SchedulerError> {
        self.promote_node_sync(placeholder_ip, real_ip, ncpus);
        Ok(())
    }

    async fn delete_nodes(&self, ips: &[String]) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        for ip in ips {
            state.nodes.remove(ip);
        }
        Ok(())
    }

    async fn enable_node(&self, ip: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(ip) {
            node.enabled = true;
        }
        Ok(())
    }
}

fn task_summary(task: &Task) -> TaskSummary {
    TaskSummary {
        task_id: task.task_id,
        label: task.label.clone(),
        ip: task.ip.clone(),
        status: task.status,
    }
}

#[derive(Default)]
struct FakeTransportState {
    reconciled: Vec<String>,
    live_scripts: HashMap<String, VecDeque<bool>>,
    admit_results: HashMap<String, bool>,
    spawn_failures: HashMap<String, u32>,
    spawn_calls: Vec<String>,
    timeout_after_files: HashMap<String, usize>,
}

/// Stand-in for `yascheduler_transport::TransportPool`.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeTransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue successive `is_task_live` answers for `ip`; once exhausted,
    /// further calls default to `false`.
    pub fn script_liveness(&self, ip: &str, script: Vec<bool>) {
        self.state
            .lock()
            .unwrap()
            .live_scripts
            .insert(ip.to_string(), script.into());
    }

    pub fn set_admit(&self, ip: &str, admit: bool) {
        self.state
            .lock()
            .unwrap()
            .admit_results
            .insert(ip.to_string(), admit);
    }

    /// `stage_and_spawn` against `ip` fails `times` times before succeeding.
    pub fn fail_spawn_times(&self, ip: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .spawn_failures
            .insert(ip.to_string(), times);
    }

    /// `fetch_outputs` against `ip` stops after `count` files, simulating a
    /// connection timeout partway through the declared output list.
    pub fn timeout_after_files(&self, ip: &str, count: usize) {
        self.state
            .lock()
            .unwrap()
            .timeout_after_files
            .insert(ip.to_string(), count);
    }

    pub fn spawn_call_count(&self) -> usize {
        self.state.lock().unwrap().spawn_calls.len()
    }

    pub fn last_reconciled(&self) -> Vec<String> {
        self.state.lock().unwrap().reconciled.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn reconcile(&self, desired_ips: &[String]) {
        self.state.lock().unwrap().reconciled = desired_ips.to_vec();
    }

    async fn stage_and_spawn(
        &self,
        ip: &str,
        _ncpus: Option<i32>,
        _engine: &EngineDescriptor,
        _metadata: &Value,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        state.spawn_calls.push(ip.to_string());
        if let Some(remaining) = state.spawn_failures.get_mut(ip) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SchedulerError::Transport(format!(
                    "{ip}: simulated spawn failure"
                )));
            }
        }
        Ok(())
    }

    async fn is_task_live(&self, ip: &str, _aggregate_check_cmd: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.live_scripts.get_mut(ip) {
            Some(script) if !script.is_empty() => script.pop_front().unwrap(),
            _ => false,
        }
    }

    async fn admit(&self, ip: &str, _aggregate_check_cmd: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .admit_results
            .get(ip)
            .copied()
            .unwrap_or(false)
    }

    async fn fetch_outputs(
        &self,
        ip: &str,
        engine: &EngineDescriptor,
        _remote_folder: &str,
        local_folder: &Path,
        _remove: bool,
    ) -> Result<(), SchedulerError> {
        tokio::fs::create_dir_all(local_folder)
            .await
            .map_err(|err| SchedulerError::Transport(err.to_string()))?;

        let timeout_after = self
            .state
            .lock()
            .unwrap()
            .timeout_after_files
            .get(ip)
            .copied();

        for (index, output_file) in engine.output_files.iter().enumerate() {
            if let Some(limit) = timeout_after {
                if index >= limit {
                    break;
                }
            }
            tokio::fs::write(local_folder.join(output_file), b"fake output")
                .await
                .map_err(|err| SchedulerError::Transport(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeElasticityState {
    pending_placeholder: Option<String>,
    ticks_remaining: u32,
    allocate_calls: u32,
    deallocated: Vec<String>,
}

/// Stand-in for `yascheduler_cloud::CloudManager`. `allocate` inserts a
/// placeholder node into `store` on its first call, then promotes it to
/// `real_ip` once `ticks_before_ready` further calls have passed —
/// simulating the real background provision-admit-promote task without an
/// actual cloud backend or sleep.
pub struct FakeElasticity {
    store: Arc<FakeStore>,
    capacity: i64,
    ticks_before_ready: u32,
    real_ip: String,
    real_ncpus: Option<i32>,
    state: Mutex<FakeElasticityState>,
}

impl FakeElasticity {
    pub fn new(
        store: Arc<FakeStore>,
        capacity: i64,
        ticks_before_ready: u32,
        real_ip: impl Into<String>,
        real_ncpus: Option<i32>,
    ) -> Self {
        Self {
            store,
            capacity,
            ticks_before_ready,
            real_ip: real_ip.into(),
            real_ncpus,
            state: Mutex::new(FakeElasticityState::default()),
        }
    }

    /// A disabled instance: capacity 0, `allocate` never expected to be
    /// called (used by scenarios with no elasticity in play).
    pub fn disabled(store: Arc<FakeStore>) -> Self {
        Self::new(store, 0, 0, "unused", None)
    }

    pub fn allocate_call_count(&self) -> u32 {
        self.state.lock().unwrap().allocate_calls
    }

    pub fn deallocated(&self) -> Vec<String> {
        self.state.lock().unwrap().deallocated.clone()
    }
}

#[async_trait]
impl Elasticity for FakeElasticity {
    async fn capacity(&self, _current_resources: &[Node]) -> i64 {
        self.capacity
    }

    fn allocate(&self, _task_id: i64, _aggregate_check_cmd: String) {
        let mut state = self.state.lock().unwrap();
        state.allocate_calls += 1;
        match state.pending_placeholder.clone() {
            None => {
                let ip = format!("pending-{}", state.allocate_calls);
                self.store.insert_node_sync(Node {
                    ip: ip.clone(),
                    ncpus: None,
                    enabled: false,
                    cloud: Some("fake".to_string()),
                });
                state.pending_placeholder = Some(ip);
                state.ticks_remaining = self.ticks_before_ready;
            }
            Some(ip) => {
                if state.ticks_remaining == 0 {
                    self.store.promote_node_sync(&ip, &self.real_ip, self.real_ncpus);
                    state.pending_placeholder = None;
                } else {
                    state.ticks_remaining -= 1;
                }
            }
        }
    }

    async fn deallocate(&self, ips: &[String]) {
        self.state.lock().unwrap().deallocated.extend(ips.iter().cloned());
    }
}
