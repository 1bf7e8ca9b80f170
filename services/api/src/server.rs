use crate::cli::ServeArgs;
use crate::infra::{demo_tenant_id, seed_store, AppState, LoggingSenders, SAMPLE_DEBTORS};
use crate::routes::with_collections_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use dunning::config::{AppConfig, AppEnvironment};
use dunning::error::AppError;
use dunning::telemetry;
use dunning::workflows::collections::{
    CollectionsRepository, CollectionsService, DebtorImporter, InMemoryCollectionsStore,
    TenantPlan,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryCollectionsStore::new());
    let roster = if config.environment == AppEnvironment::Production {
        Vec::new()
    } else {
        DebtorImporter::new(demo_tenant_id()).from_reader(SAMPLE_DEBTORS.as_bytes())?
    };
    seed_store(&store, TenantPlan::Pro, roster);

    let service = Arc::new(CollectionsService::new(
        store,
        LoggingSenders::channel_senders(),
        &config.engine,
    ));

    if !config.engine.poll_interval.is_zero() {
        spawn_poller(Arc::clone(&service), config.engine.poll_interval);
    }

    let app = with_collections_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "collections engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Timer-driven polling. Manual `/execute-workflows` calls may overlap with a tick.
fn spawn_poller<R>(service: Arc<CollectionsService<R>>, period: Duration)
where
    R: CollectionsRepository + 'static,
{
    info!(period_secs = period.as_secs(), "background poller started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match service.execute_workflows(Utc::now(), None).await {
                Ok(summary) if summary.executed + summary.failed + summary.skipped > 0 => info!(
                    executed = summary.executed,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "scheduled poll processed executions"
                ),
                Ok(_) => {}
                Err(error) => warn!(%error, "scheduled poll failed"),
            }
        }
    });
}
