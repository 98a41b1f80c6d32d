//! Transaction lifecycle and webhook delivery core — worker binary.
//!
//! Boots the database pool, wires the repository/service/admin graph,
//! spawns the background scheduler, and serves the thin HTTP surface
//! this service owns (health, metrics, the acknowledge callback).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use chrono::Duration;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use txncore::admin::AdminFacade;
use txncore::config::AppConfig;
use txncore::db::Database;
use txncore::eventbus::{EventBus, PostgresOutboxEventBus};
use txncore::metrics::Metrics;
use txncore::monitor::{Monitor, MonitorConfig};
use txncore::repositories::{
    PgDeliveryRepository, PgHistoryRepository, PgSubscriptionRepository, PgTransactionRepository,
};
use txncore::routes::{self, AppState};
use txncore::scheduler::{self, SchedulerConfig};
use txncore::services::alert_dispatcher::{AlertDispatcher, PostmarkAlertChannel};
use txncore::services::subscription_registry::SubscriptionRegistry;
use txncore::services::transaction_service::TransactionService;
use txncore::services::webhook_delivery::WebhookDeliveryEngine;
use txncore::workerpool::BoundedPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "txncore=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    tracing::info!("Starting transaction lifecycle and webhook delivery core");
    tracing::info!(environment = %config.environment, "loaded configuration");

    let db = Database::new(&config).await?;
    tracing::info!("database connected");

    let skip_migrations = std::env::var("SKIP_MIGRATIONS").unwrap_or_default() == "true";
    if skip_migrations {
        tracing::info!("skipping migrations (SKIP_MIGRATIONS=true)");
    } else {
        db.migrate().await?;
        tracing::info!("migrations applied");
    }

    let pool = db.pool().clone();
    let transactions = Arc::new(PgTransactionRepository::new(pool.clone()));
    let history = Arc::new(PgHistoryRepository::new(pool.clone()));
    let deliveries = Arc::new(PgDeliveryRepository::new(pool.clone()));
    let subscriptions = Arc::new(PgSubscriptionRepository::new(pool.clone()));
    let event_bus: Arc<dyn EventBus> = Arc::new(PostgresOutboxEventBus::new(pool.clone()));

    let metrics = Arc::new(Metrics::default());

    let transaction_service = Arc::new(TransactionService::new(
        transactions.clone(),
        history.clone(),
        event_bus.clone(),
        config.idempotency_config(),
        config.transaction_retry_max_attempts,
        metrics.clone(),
    ));

    let subscription_registry = Arc::new(SubscriptionRegistry::new(subscriptions.clone()));

    let delivery_engine = Arc::new(WebhookDeliveryEngine::new(
        deliveries.clone(),
        subscriptions.clone(),
        transactions.clone(),
        event_bus.clone(),
        metrics.clone(),
        &config,
    )?);

    let alerts = Arc::new(AlertDispatcher::new(Box::new(PostmarkAlertChannel::new(
        config.alert_postmark_api_key.clone(),
        config.alert_from_email.clone(),
        config.alert_to_email.clone(),
    ))));

    let monitor_config = MonitorConfig {
        pending_timeout: Duration::minutes(config.transaction_timeout_pending_minutes),
        processing_timeout: Duration::minutes(config.transaction_timeout_processing_minutes),
        anomaly_pending_threshold: Duration::minutes(config.anomaly_pending_threshold_minutes),
        anomaly_processing_threshold: Duration::minutes(config.anomaly_processing_threshold_minutes),
        anomaly_retry_threshold: config.anomaly_retry_threshold,
        anomaly_state_change_threshold: config.anomaly_state_change_threshold,
        sweep_batch_size: config.monitor_sweep_batch_size,
    };
    let monitor = Arc::new(Monitor::new(
        transactions.clone(),
        history.clone(),
        transaction_service.clone(),
        alerts.clone(),
        metrics.clone(),
        monitor_config,
    ));

    let default_pool = Arc::new(BoundedPool::new(config.default_pool_max_size, config.default_pool_queue_depth));
    let webhook_pool = Arc::new(BoundedPool::new(config.webhook_pool_max_size, config.webhook_pool_queue_depth));
    let monitor_pool = Arc::new(BoundedPool::new(config.monitor_pool_max_size, config.monitor_pool_queue_depth));

    let scheduler_config = SchedulerConfig {
        monitor_interval: std::time::Duration::from_millis(config.transaction_monitor_interval_ms),
        retry_poll_interval: std::time::Duration::from_millis(config.webhook_retry_poll_interval_ms),
        hang_sweep_interval: std::time::Duration::from_millis(config.webhook_hang_sweep_interval_ms),
        cleanup_sweep_interval: std::time::Duration::from_millis(config.webhook_cleanup_sweep_interval_ms),
        retry_batch_size: config.webhook_retry_batch_size,
        hang_sweep_batch_size: config.webhook_hang_sweep_batch_size,
        cleanup_batch_size: config.webhook_cleanup_batch_size,
        transaction_events_poll_interval: std::time::Duration::from_millis(config.transaction_events_poll_interval_ms),
        transaction_events_batch_size: config.transaction_events_batch_size,
        webhook_events_poll_interval: std::time::Duration::from_millis(config.webhook_events_poll_interval_ms),
        webhook_events_batch_size: config.webhook_events_batch_size,
    };
    scheduler::start_scheduler(
        monitor.clone(),
        delivery_engine.clone(),
        event_bus.clone(),
        transactions.clone(),
        alerts.clone(),
        monitor_pool,
        webhook_pool,
        default_pool.clone(),
        scheduler_config,
    );
    tracing::info!("background scheduler started");

    let admin = Arc::new(AdminFacade::new(
        transactions.clone(),
        history.clone(),
        deliveries.clone(),
        transaction_service.clone(),
        subscription_registry.clone(),
        delivery_engine.clone(),
        monitor.clone(),
        metrics.clone(),
    ));

    let state = AppState { db: db.clone(), config: config.clone(), admin, default_pool };

    // Security headers only; this service has no browser clients, so no
    // CORS layer.
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ));

    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api", routes::webhooks::router())
        .nest("/monitoring", txncore::metrics::router().with_state(metrics.clone()))
        .layer(security_headers)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
