#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! A pool of authenticated SSH/SFTP sessions to worker nodes, reused across
//! scheduler ticks.

mod session;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use yascheduler_core::SchedulerError;
use yascheduler_engines::EngineDescriptor;

use session::Session;

/// SSH credentials and timeouts shared by every managed connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Remote login user.
    pub user: String,
    /// Path to the private key used for public-key authentication.
    pub private_key_path: PathBuf,
    /// Timeout applied to connection attempts and one-shot admission
    /// probes.
    pub connect_timeout: Duration,
}

/// Capability set the scheduler depends on for worker-host communication,
/// so it can run against an in-memory fake in tests instead of real SSH.
#[async_trait]
pub trait Transport: Send + Sync {
    /// See [`TransportPool::reconcile`].
    async fn reconcile(&self, desired_ips: &[String]);
    /// See [`TransportPool::stage_and_spawn`].
    async fn stage_and_spawn(
        &self,
        ip: &str,
        ncpus: Option<i32>,
        engine: &EngineDescriptor,
        metadata: &Value,
    ) -> Result<(), SchedulerError>;
    /// See [`TransportPool::is_task_live`].
    async fn is_task_live(&self, ip: &str, aggregate_check_cmd: &str) -> bool;
    /// See [`TransportPool::admit`].
    async fn admit(&self, ip: &str, aggregate_check_cmd: &str) -> bool;
    /// See [`TransportPool::fetch_outputs`].
    async fn fetch_outputs(
        &self,
        ip: &str,
        engine: &EngineDescriptor,
        remote_folder: &str,
        local_folder: &Path,
        remove: bool,
    ) -> Result<(), SchedulerError>;
}

enum PoolEntry {
    Live(Session),
    Broken(String),
}

/// Pool of SSH sessions, one per worker node ip, reconciled against the
/// scheduler's current view of enabled nodes each tick.
pub struct TransportPool {
    config: TransportConfig,
    sessions: Mutex<HashMap<String, PoolEntry>>,
}

impl TransportPool {
    /// Build an empty pool around `config`.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Close sessions for ips no longer in `desired_ips`, and open sessions
    /// for newly-desired ips. A connect failure is logged once and the ip
    /// kept as a `Broken` entry, so that every op against it fails fast
    /// until the next reconcile drops it or a fresh connect attempt
    /// succeeds. `Broken` entries are therefore retried on every call, not
    /// just ips absent from the pool.
    pub async fn reconcile(&self, desired_ips: &[String]) {
        let mut sessions = self.sessions.lock().await;
        let desired: HashSet<&str> = desired_ips.iter().map(String::as_str).collect();
        sessions.retain(|ip, _| desired.contains(ip.as_str()));

        for ip in desired_ips {
            if matches!(sessions.get(ip.as_str()), Some(PoolEntry::Live(_))) {
                continue;
            }
            match Session::connect(
                ip,
                &self.config.user,
                &self.config.private_key_path,
                self.config.connect_timeout,
            )
            .await
            {
                Ok(session) => {
                    debug!(ip, "session opened");
                    sessions.insert(ip.clone(), PoolEntry::Live(session));
                }
                Err(err) => {
                    warn!(ip, error = %err, "connect failed, node marked broken");
                    sessions.insert(ip.clone(), PoolEntry::Broken(err.to_string()));
                }
            }
        }
    }

    fn live<'a>(
        sessions: &'a mut HashMap<String, PoolEntry>,
        ip: &str,
    ) -> Result<&'a Session, SchedulerError> {
        match sessions.get(ip) {
            Some(PoolEntry::Live(_)) => {}
            Some(PoolEntry::Broken(reason)) => {
                return Err(SchedulerError::Transport(reason.clone()));
            }
            None => return Err(SchedulerError::Transport(format!("no session for {ip}"))),
        }
        match sessions.get(ip) {
            Some(PoolEntry::Live(session)) => Ok(session),
            _ => unreachable!("checked above"),
        }
    }

    /// Stage a task's declared input files onto `ip` and spawn the engine,
    /// detached, against `metadata.remote_folder`.
    ///
    /// Must never be called while [`TransportPool::is_task_live`] reports
    /// `true` for the same ip; that ordering is the scheduler's
    /// responsibility, not this pool's.
    pub async fn stage_and_spawn(
        &self,
        ip: &str,
        ncpus: Option<i32>,
        engine: &EngineDescriptor,
        metadata: &Value,
    ) -> Result<(), SchedulerError> {
        let remote_folder = metadata
            .get("remote_folder")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SchedulerError::Transport("metadata missing remote_folder".to_string())
            })?;

        let mut sessions = self.sessions.lock().await;
        let session = Self::live(&mut sessions, ip)?;

        session.exec(&format!("mkdir -p {remote_folder}")).await?;

        let sftp = session.sftp().await?;
        for input_file in &engine.input_files {
            let contents = metadata
                .get(input_file)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SchedulerError::Transport(format!("metadata missing input file {input_file}"))
                })?;
            let remote_path = format!("{remote_folder}/{input_file}");
            session::write_remote_file(&sftp, &remote_path, contents.as_bytes()).await?;
        }

        let ncpus_expr = ncpus
            .map(|n| n.to_string())
            .unwrap_or_else(|| "$(nproc)".to_string());
        let command = engine
            .spawn
            .replace("{path}", remote_folder)
            .replace("{ncpus}", &ncpus_expr);
        session.exec_detached(&command).await
    }

    /// True iff the aggregate engine probe finds a running instance on
    /// `ip`. Transport failures are treated as "not live", after logging;
    /// this is a known limitation.
    pub async fn is_task_live(&self, ip: &str, aggregate_check_cmd: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let session = match Self::live(&mut sessions, ip) {
            Ok(session) => session,
            Err(err) => {
                debug!(ip, error = %err, "treating unreachable node as not live");
                return false;
            }
        };
        match session.exec(aggregate_check_cmd).await {
            Ok((_, output)) => !output.trim().is_empty(),
            Err(err) => {
                debug!(ip, error = %err, "liveness probe failed, treating as not live");
                false
            }
        }
    }

    /// One-shot admission probe, bypassing the pool: opens a short-timeout
    /// connection, runs the aggregate probe, and returns true iff the host
    /// is reachable and idle. Used to accept both operator-added and
    /// cloud-provisioned nodes.
    pub async fn admit(&self, ip: &str, aggregate_check_cmd: &str) -> bool {
        let session = match Session::connect(
            ip,
            &self.config.user,
            &self.config.private_key_path,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(session) => session,
            Err(err) => {
                debug!(ip, error = %err, "admission probe: connect failed");
                return false;
            }
        };
        match session.exec(aggregate_check_cmd).await {
            Ok((_, output)) => output.trim().is_empty(),
            Err(err) => {
                debug!(ip, error = %err, "admission probe: check failed");
                false
            }
        }
    }

    /// Copy each of the engine's declared output files from `remote_folder`
    /// on `ip` into `local_folder`. Per-file errors are logged and skipped;
    /// a "connection timed out" condition aborts the remaining files. When
    /// `remove` is set, `remote_folder` is deleted afterward regardless of
    /// per-file outcomes.
    pub async fn fetch_outputs(
        &self,
        ip: &str,
        engine: &EngineDescriptor,
        remote_folder: &str,
        local_folder: &Path,
        remove: bool,
    ) -> Result<(), SchedulerError> {
        let mut sessions = self.sessions.lock().await;
        let session = Self::live(&mut sessions, ip)?;
        let sftp = session.sftp().await?;

        tokio::fs::create_dir_all(local_folder)
            .await
            .map_err(|err| {
                SchedulerError::Transport(format!("creating {}: {err}", local_folder.display()))
            })?;

        for output_file in &engine.output_files {
            let remote_path = format!("{remote_folder}/{output_file}");
            match session::read_remote_file(&sftp, &remote_path).await {
                Ok(bytes) => {
                    let local_path = local_folder.join(output_file);
                    if let Err(err) = tokio::fs::write(&local_path, bytes).await {
                        warn!(ip, file = output_file, error = %err, "writing local output failed");
                    }
                }
                Err(err) => {
                    let timed_out = err.to_string().contains("connection timed out");
                    warn!(ip, file = output_file, error = %err, "fetching output failed");
                    if timed_out {
                        break;
                    }
                }
            }
        }

        if remove {
            let _ = session.exec(&format!("rm -rf {remote_folder}")).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TransportPool {
    async fn reconcile(&self, desired_ips: &[String]) {
        self.reconcile(desired_ips).await
    }

    async fn stage_and_spawn(
        &self,
        ip: &str,
        ncpus: Option<i32>,
        engine: &EngineDescriptor,
        metadata: &Value,
    ) -> Result<(), SchedulerError> {
        self.stage_and_spawn(ip, ncpus, engine, metadata).await
    }

    async fn is_task_live(&self, ip: &str, aggregate_check_cmd: &str) -> bool {
        self.is_task_live(ip, aggregate_check_cmd).await
    }

    async fn admit(&self, ip: &str, aggregate_check_cmd: &str) -> bool {
        self.admit(ip, aggregate_check_cmd).await
    }

    async fn fetch_outputs(
        &self,
        ip: &str,
        engine: &EngineDescriptor,
        remote_folder: &str,
        local_folder: &Path,
        remove: bool,
    ) -> Result<(), SchedulerError> {
        self.fetch_outputs(ip, engine, remote_folder, local_folder, remove)
            .await
    }
}
