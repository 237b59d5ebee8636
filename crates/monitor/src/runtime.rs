//! Composition root: wires Postgres, Redis and the monitor components, then
//! runs until ctrl-c or the caller's shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sentinel_infra::credentials::CredentialCipher;
use sentinel_infra::directory::PostgresTenantDirectory;
use sentinel_infra::lock::RedisCoordinationStore;
use sentinel_infra::notify::PostgresNotificationSink;
use sentinel_infra::shutdown::{stop_channel, wait_for_stop};
use sentinel_infra::storage::schema::apply_schema;
use sentinel_infra::storage::{PostgresBlacklistStore, PostgresComplaintStore, PostgresOrderStore};
use sentinel_infra::{ClientFactory, CoordinationLock, CredentialCache, MonitorConfig};
use sentinel_observability::{InMemoryMetrics, MonitorMetrics};

use crate::blacklist::BlacklistService;
use crate::manager::WorkerManager;
use crate::worker::{MIN_TICK_INTERVAL, WorkerContext};

/// Run the monitor with `factory` supplying provider clients.
pub async fn run(
    config: MonitorConfig,
    factory: Arc<dyn ClientFactory>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    sentinel_observability::init_with_filter(&config.log_filter);
    config.validate().context("invalid monitor configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("connecting to postgres")?;
    apply_schema(&pool).await.context("applying schema")?;

    let coordination = RedisCoordinationStore::connect(&config.redis.url)
        .await
        .context("connecting to redis")?;
    coordination.ping().await.context("pinging redis")?;

    let metrics: Arc<dyn MonitorMetrics> = Arc::new(InMemoryMetrics::new());
    let complaints = Arc::new(PostgresComplaintStore::new(pool.clone()));
    let credentials = Arc::new(CredentialCache::new(
        config.credentials.cache_ttl,
        CredentialCipher::new(&config.credentials.encryption_key),
        factory,
        Arc::clone(&metrics),
    ));
    let blacklist = Arc::new(BlacklistService::new(
        Arc::new(PostgresBlacklistStore::new(pool.clone())),
        complaints.clone(),
        Arc::new(PostgresNotificationSink::new(pool.clone())),
        Arc::clone(&metrics),
    ));

    let ctx = WorkerContext {
        directory: Arc::new(PostgresTenantDirectory::new(pool.clone())),
        credentials: Arc::clone(&credentials),
        lock: CoordinationLock::new(Arc::new(coordination), &config.lock, Arc::clone(&metrics)),
        complaints,
        orders: Arc::new(PostgresOrderStore::new(pool.clone())),
        blacklist,
        metrics,
        config: config.worker.clone(),
    };
    let manager = Arc::new(WorkerManager::new(ctx));

    let (stop_tx, stop_rx) = stop_channel();
    let manager_loop = tokio::spawn(Arc::clone(&manager).run(stop_rx.clone()));
    let sweeper = tokio::spawn(sweep_credentials(
        credentials,
        config.credentials.sweep_interval,
        stop_rx,
    ));
    info!("complaint monitor running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("ctrl-c received; shutting down"),
            Err(err) => warn!(error = %err, "ctrl-c handler failed; shutting down"),
        },
        _ = wait_for_stop(&mut shutdown) => info!("shutdown requested"),
    }

    // Receivers also stop once every sender is gone, so a failed send is fine.
    let _ = stop_tx.send(true);
    if let Err(err) = manager_loop.await {
        warn!(error = %err, "manager loop ended abnormally");
    }
    if !manager.shutdown(config.shutdown_grace).await {
        warn!("continuing shutdown with workers still running");
    }
    if let Err(err) = sweeper.await {
        warn!(error = %err, "credential sweeper ended abnormally");
    }
    pool.close().await;
    info!("complaint monitor stopped");
    Ok(())
}

/// Evict expired provider clients every `interval` until `stop` fires.
pub async fn sweep_credentials(
    cache: Arc<CredentialCache>,
    interval: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(MIN_TICK_INTERVAL));
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => return,
            _ = ticker.tick() => {
                let removed = cache.sweep();
                debug!(removed, stats = ?cache.stats(), "credential sweep");
            }
        }
    }
}
