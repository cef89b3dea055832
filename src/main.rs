use axum::{
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use duka_backend::api;
use duka_backend::api::payments::PaymentApiState;
use duka_backend::api::webhooks::WebhookState;
use duka_backend::config::AppConfig;
use duka_backend::database::init_pool_from_config;
use duka_backend::database::order_repository::{OrderStore, PgOrderStore};
use duka_backend::database::product_repository::{PgProductCatalog, ProductCatalog};
use duka_backend::database::session_repository::{PgSessionStore, SessionStore};
use duka_backend::health::{HealthChecker, HealthState, HealthStatus};
use duka_backend::logging::init_tracing;
use duka_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use duka_backend::payments::providers::{ZenoConfig, ZenoGateway};
use duka_backend::services::initiation::{InitiationConfig, InitiationService};
use duka_backend::services::notification::{LogNotifier, Notifier};
use duka_backend::services::reconciliation::ReconciliationService;
use duka_backend::workers::orphan_recovery::{OrphanRecoveryConfig, OrphanRecoveryWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Duka payment backend"
    );

    // Initialize database connection pool
    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e)
    })?;
    info!(
        max_connections = config.database.max_connections,
        "✅ Database connection pool initialized"
    );

    // Initialize the mobile money gateway client
    info!("💳 Initializing Zeno gateway client...");
    let zeno_config = ZenoConfig::from_env().map_err(|e| {
        error!("❌ Failed to load gateway configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    let webhook_api_key = zeno_config.api_key.clone();
    let gateway = Arc::new(ZenoGateway::new(zeno_config).map_err(|e| {
        error!("❌ Failed to initialize gateway client: {}", e);
        anyhow::anyhow!(e)
    })?);
    info!("✅ Gateway client initialized");

    // Shared stores behind the service seams
    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(db_pool.clone()));
    let orders: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(db_pool.clone()));
    let catalog: Arc<dyn ProductCatalog> = Arc::new(PgProductCatalog::new(db_pool.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let initiation = Arc::new(InitiationService::new(
        sessions.clone(),
        gateway,
        InitiationConfig {
            webhook_url: config.payments.webhook_url.clone(),
            default_buyer_name: config.payments.default_buyer_name.clone(),
            default_buyer_email: config.payments.default_buyer_email.clone(),
        },
    ));

    let reconciler = Arc::new(ReconciliationService::new(
        sessions.clone(),
        orders,
        catalog,
        notifier,
        chrono::Duration::seconds(config.payments.duplicate_window_seconds as i64),
    ));

    // Initialize health checker
    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(db_pool.clone());
    info!("✅ Health checker initialized");

    // Start the orphan recovery worker
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let recovery_config = OrphanRecoveryConfig::from_env();
    let worker = OrphanRecoveryWorker::new(reconciler.clone(), recovery_config.clone());
    let worker_handle = tokio::spawn(worker.run(worker_shutdown_rx));

    // Create the application router with logging middleware
    info!("🛣️  Setting up application routes...");

    let payment_state = PaymentApiState {
        initiation,
        reconciler: reconciler.clone(),
        sessions: sessions.clone(),
        recovery: recovery_config,
    };
    let payment_routes = Router::new()
        .route(
            "/api/payments/mobile",
            post(api::payments::initiate_payment),
        )
        .route(
            "/api/payments/{reference}",
            get(api::payments::get_payment_status),
        )
        .route(
            "/api/payments/recovery/run",
            post(api::payments::run_recovery),
        )
        .with_state(payment_state);

    let webhook_routes = Router::new()
        .route(
            "/api/webhooks/zeno",
            post(api::webhooks::handle_zeno_webhook),
        )
        .with_state(WebhookState {
            reconciler,
            api_key: webhook_api_key,
        });

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .merge(payment_routes)
        .merge(webhook_routes)
        .with_state(AppState { health_checker })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    // Print a prominent banner with server information
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                                                              ║");
    println!("║           🚀 DUKA PAYMENT BACKEND IS RUNNING 🚀              ║");
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!(
        "║  🌐 Server Address:  http://{}                    ║",
        addr
    );
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║                                                              ║");
    println!("║  GET  /                            - Root endpoint           ║");
    println!("║  GET  /health                      - Health check            ║");
    println!("║  GET  /health/ready                - Readiness probe         ║");
    println!("║  GET  /health/live                 - Liveness probe         ║");
    println!("║  POST /api/payments/mobile         - Start a payment         ║");
    println!("║  GET  /api/payments/{{reference}}    - Payment status          ║");
    println!("║  POST /api/payments/recovery/run   - On-demand recovery      ║");
    println!("║  POST /api/webhooks/zeno           - Gateway callbacks       ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(
        address = %addr,
        "🚀 Server listening on http://{}",
        addr
    );
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), worker_handle).await {
        error!(error = %e, "Timed out waiting for recovery worker shutdown");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state for the handlers that live in this file
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    info!("📍 Root endpoint accessed");
    "Welcome to Duka Payments API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    info!("🏥 Health check requested");
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        info!("✅ Health check passed");
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    info!("🔍 Readiness probe requested");
    // Readiness checks all dependencies
    let result = health(axum::extract::State(state)).await;
    if result.is_ok() {
        info!("✅ Readiness check passed");
    } else {
        error!("❌ Readiness check failed");
    }
    result
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> Result<&'static str, (axum::http::StatusCode, String)> {
    info!("💓 Liveness probe requested");
    Ok("OK")
}
