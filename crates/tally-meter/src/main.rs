//! Tally meter binary

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tally_collect::{KubeClient, PromClient, PromObjectStorage, PromTraffic};
use tally_common::VERSION;
use tally_meter::{
    FanOut, GpuResolver, MeterConfig, RetryPolicy, Scheduler, TenantAggregator, TrafficMeter,
};
use tally_store::{RedisStore, UsageStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tally meter v{}", VERSION);

    let config = MeterConfig::load()?;
    info!(
        concurrent_limit = config.concurrent_limit,
        tick_secs = config.tick_secs,
        object_storage = config.object_storage().is_some(),
        traffic = config.traffic_url.is_some(),
        "Loaded configuration"
    );

    let properties = Arc::new(config.property_table()?);
    let kube = Arc::new(
        KubeClient::new(&config.kube())
            .await
            .context("Failed to set up orchestration API client")?,
    );
    let store: Arc<dyn UsageStore> = Arc::new(
        RedisStore::new(&config.redis_url)
            .await?
            .with_prefix(&config.store_prefix),
    );

    let gpu = Arc::new(
        GpuResolver::preload(kube.clone(), RetryPolicy::default())
            .await
            .context("Failed to load GPU node inventory")?,
    );

    let mut aggregator = TenantAggregator::new(kube.clone(), gpu, properties.clone(), store.clone())
        .with_egress_window(chrono::Duration::seconds(config.tick_secs as i64));
    if let Some((prom_url, instance)) = config.object_storage() {
        info!(instance, "Object storage metering enabled");
        aggregator =
            aggregator.with_object_storage(Arc::new(PromObjectStorage::new(PromClient::new(prom_url)?, instance)));
    } else if config.prom_url.is_some() {
        warn!("PROM_URL set without OBJECT_STORAGE_INSTANCE, object storage metering disabled");
    }

    let fan_out = Arc::new(FanOut::new(kube.clone(), Arc::new(aggregator), config.concurrent_limit));
    let mut scheduler = Scheduler::new(fan_out, store.clone())
        .with_tick(config.tick())
        .with_retention_days(config.retention_days);
    if let Some(traffic_url) = &config.traffic_url {
        let source = PromTraffic::new(PromClient::new(traffic_url)?, config.traffic_metric.clone());
        scheduler = scheduler.with_traffic(Arc::new(TrafficMeter::new(
            kube,
            store,
            Arc::new(source),
            properties,
        )));
    }

    let handle = scheduler.start();
    shutdown_signal().await;
    handle.shutdown().await;

    info!("Tally meter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
