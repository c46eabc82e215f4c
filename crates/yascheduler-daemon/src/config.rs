use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use yascheduler_engines::EngineDescriptor;

/// Default matching the source's `SLEEP_INTERVAL`.
const DEFAULT_SLEEP_INTERVAL_SECS: u64 = 10;
/// Default matching the source's `N_IDLE_PASSES`.
const DEFAULT_N_IDLE_PASSES: u32 = 9;

/// Top-level daemon configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Worker-host connection settings.
    pub remote: RemoteConfig,
    /// Local submitter-side settings.
    pub local: LocalConfig,
    /// Queue store settings.
    pub database: DatabaseConfig,
    /// Engine catalog, keyed by name.
    pub engines: HashMap<String, EngineDescriptor>,
    /// Cloud elasticity settings.
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Scheduler tick tunables.
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// Worker-host SSH connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// SSH login user.
    pub user: String,
    /// Base directory on workers that `remote_folder` paths are stamped
    /// under.
    pub data_dir: String,
    /// Path to the private key used for public-key authentication.
    pub private_key_path: PathBuf,
}

/// Local submitter-side settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Base directory harvested outputs are written under.
    pub data_dir: PathBuf,
}

/// Queue store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    pub url: String,
}

/// Cloud elasticity settings. `provider = "none"` (the default) disables
/// elasticity entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Provider name: `"none"` or `"ec2"`.
    pub provider: String,
    /// EC2 AMI id to launch.
    pub ami_id: Option<String>,
    /// EC2 instance type, e.g. `"t3.medium"`.
    pub instance_type: Option<String>,
    /// EC2 key pair name for SSH access.
    pub key_name: Option<String>,
    /// EC2 security group ids to attach.
    pub security_group_ids: Vec<String>,
    /// EC2 subnet id to launch into.
    pub subnet_id: Option<String>,
    /// Ceiling on concurrently-allocated instances.
    pub max_instances: i64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            ami_id: None,
            instance_type: None,
            key_name: None,
            security_group_ids: Vec::new(),
            subnet_id: None,
            max_instances: 0,
        }
    }
}

/// Scheduler tick tunables, matching the source's process-wide constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Delay between ticks, in seconds.
    pub sleep_interval_secs: u64,
    /// Consecutive idle ticks before a node is reclaimed.
    pub n_idle_passes: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            sleep_interval_secs: DEFAULT_SLEEP_INTERVAL_SECS,
            n_idle_passes: DEFAULT_N_IDLE_PASSES,
        }
    }
}

impl SchedulerSection {
    /// Tick interval as a `Duration`.
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval_secs)
    }
}

impl DaemonConfig {
    /// Load and deserialize configuration from `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("YASCHEDULER").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
