use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::time::{interval, Duration};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coves_appview::{
    auth, config::AppConfig, db, firehose, handlers, health, metrics, middleware, pds_client::PdsClient,
    token_refresh::MutexMap,
};

#[derive(Clone, FromRef)]
struct AppState {
    db_pool: db::DbPool,
    auth_state: auth::AuthState,
    pds_client: PdsClient,
    mutex_map: Arc<MutexMap>,
    config: AppConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Coves AppView");

    let config = AppConfig::from_env();
    tracing::info!(
        instance_did = %config.instance_did,
        instance_domain = %config.instance_domain,
        pds_url = %config.pds_url,
        "instance configuration loaded"
    );

    let metrics_recorder = metrics::MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("Metrics initialized");

    let db_pool = db::init_db_default().await?;
    tracing::info!("Database initialized");

    let auth_state = auth::AuthState::new();
    let pds_client = PdsClient::new();
    let mutex_map = Arc::new(MutexMap::new(config.mutex_map_warn_threshold));

    // Firehose consumer (C7): reconnects forever, routes commits into the indexer (C8).
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let firehose_pool = db_pool.clone();
    let firehose_url = config.firehose_url.clone();
    tokio::spawn(async move {
        firehose::run(firehose_pool, firehose_url, shutdown_rx).await;
    });
    tracing::info!("Firehose consumer started");

    // Rate limiter cleanup: stale DID/IP buckets evicted every 5 minutes.
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(300));
        loop {
            interval_timer.tick().await;
            let max_age = Duration::from_secs(600);
            middleware::rate_limit::DID_RATE_LIMITER.cleanup_old_buckets(max_age).await;
            middleware::rate_limit::IP_LIMITER.cleanup_old_buckets(max_age).await;
            tracing::debug!("Rate limiter cleanup completed");
        }
    });
    tracing::info!("Rate limiter cleanup worker started");

    // Token-refresh mutex map never shrinks; report its size so growth past
    // `mutex_map_warn_threshold` is visible before it needs investigating.
    let gauge_mutex_map = mutex_map.clone();
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(60));
        loop {
            interval_timer.tick().await;
            metrics::record_mutex_map_size(gauge_mutex_map.len());
        }
    });

    let app_state = AppState { db_pool: db_pool.clone(), auth_state, pds_client, mutex_map, config };

    let metrics_router = if matches!(
        std::env::var("ENABLE_METRICS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    ) {
        Router::new().route("/metrics", get(metrics::metrics_handler)).with_state(metrics_handle)
    } else {
        Router::new()
    };

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/xrpc/social.coves.community.create", post(handlers::create_community))
        .route("/xrpc/social.coves.community.update", post(handlers::update_community))
        .route("/xrpc/social.coves.community.get", get(handlers::get_community))
        .route("/xrpc/social.coves.community.list", get(handlers::list_communities))
        .route("/xrpc/social.coves.community.search", get(handlers::search_communities))
        .route("/xrpc/social.coves.community.subscribe", post(handlers::subscribe))
        .route("/xrpc/social.coves.community.unsubscribe", post(handlers::unsubscribe))
        .route("/xrpc/social.coves.community.blockCommunity", post(handlers::block_community))
        .route("/xrpc/social.coves.community.unblockCommunity", post(handlers::unblock_community))
        .route("/xrpc/social.coves.feed.getCommunityFeed", get(handlers::get_community_feed))
        .route("/xrpc/social.coves.feed.getTimeline", get(handlers::get_timeline))
        .route("/xrpc/social.coves.feed.getDiscover", get(handlers::get_discover))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::logging::log_headers_middleware))
        .layer(axum::middleware::from_fn(metrics::track_request_metrics))
        .layer(axum::middleware::from_fn(middleware::rate_limit::rate_limit_middleware))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config_port()));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

fn config_port() -> u16 {
    std::env::var("SERVER_PORT").unwrap_or_else(|_| "8080".to_string()).parse().unwrap_or(8080)
}

async fn shutdown_signal(firehose_shutdown: tokio::sync::watch::Sender<bool>) {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
    let _ = firehose_shutdown.send(true);
}
