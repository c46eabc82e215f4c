mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::DaemonConfig;
use yascheduler_cloud::{CloudManager, CloudProvider, Ec2CloudProvider, NullCloudProvider};
use yascheduler_engines::EngineRegistry;
use yascheduler_scheduler::{Scheduler, SchedulerConfig};
use yascheduler_store::Store;
use yascheduler_transport::{TransportConfig, TransportPool};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli.config)?;

    let store = Arc::new(Store::connect(&config.database.url).await?);
    let transport = Arc::new(TransportPool::new(TransportConfig {
        user: config.remote.user.clone(),
        private_key_path: config.remote.private_key_path.clone(),
        connect_timeout: CONNECT_TIMEOUT,
    }));
    let engines = Arc::new(EngineRegistry::new(config.engines.clone()));
    let provider = build_cloud_provider(&config).await?;
    let cloud = Arc::new(CloudManager::new(provider, Arc::clone(&store), Arc::clone(&transport)));

    let scheduler = Scheduler::new(
        store,
        transport,
        cloud,
        engines,
        SchedulerConfig {
            local_data_dir: config.local.data_dir.clone(),
            n_idle_passes: config.scheduler.n_idle_passes,
            sleep_interval: config.scheduler.sleep_interval(),
        },
    );

    if cli.once {
        let mut scheduler = scheduler;
        scheduler.tick().await?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

async fn build_cloud_provider(config: &DaemonConfig) -> anyhow::Result<Arc<dyn CloudProvider>> {
    match config.cloud.provider.as_str() {
        "none" => Ok(Arc::new(NullCloudProvider)),
        "ec2" => {
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let ami_id = config
                .cloud
                .ami_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("cloud.ami_id is required for provider = \"ec2\""))?;
            let instance_type = config.cloud.instance_type.clone().ok_or_else(|| {
                anyhow::anyhow!("cloud.instance_type is required for provider = \"ec2\"")
            })?;
            let key_name = config
                .cloud
                .key_name
                .clone()
                .ok_or_else(|| anyhow::anyhow!("cloud.key_name is required for provider = \"ec2\""))?;
            Ok(Arc::new(Ec2CloudProvider::new(
                &sdk_config,
                ami_id,
                instance_type,
                key_name,
                config.cloud.security_group_ids.clone(),
                config.cloud.subnet_id.clone(),
                config.cloud.max_instances,
            )))
        }
        other => anyhow::bail!("unknown cloud.provider {other:?}, expected \"none\" or \"ec2\""),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
