//! TrustLend Engine Server
//!
//! Wires configuration, the PostgreSQL pool, the engine services, the HTTP
//! entry points (webhook receiver, user-facing handlers), and the
//! cron-driven sweeps, then serves until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use trustlend_server::config::Config;
use trustlend_server::services::{
    EligibilityService, LoanService, MatchingService, NotificationService, PaymentService,
    TrustScoreService, VoucherService,
};
use trustlend_server::state::AppState;
use trustlend_server::{db, jobs, middleware, routes};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        "Starting TrustLend engine"
    );

    // Database pool + migrations (the unique indexes backing idempotency
    // live there, so the engine refuses to start without them)
    let db_pool = match db::create_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = db::run_migrations(&db_pool).await {
        tracing::error!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    // Engine services
    let notification_service = Arc::new(NotificationService::new(
        db_pool.clone(),
        config.notification_delivery_url.clone(),
    ));
    let trust_service = Arc::new(TrustScoreService::new(db_pool.clone()));
    let voucher_service = Arc::new(VoucherService::new(
        db_pool.clone(),
        (*trust_service).clone(),
    ));
    let matching_service = Arc::new(MatchingService::new(
        db_pool.clone(),
        (*voucher_service).clone(),
        (*notification_service).clone(),
        config.engine.clone(),
    ));
    let payment_service = Arc::new(PaymentService::new(
        db_pool.clone(),
        (*trust_service).clone(),
        (*voucher_service).clone(),
        (*notification_service).clone(),
        config.engine.clone(),
    ));
    let eligibility_service = Arc::new(EligibilityService::new(
        db_pool.clone(),
        config.engine.clone(),
    ));
    let loan_service = Arc::new(LoanService::new(
        db_pool.clone(),
        (*eligibility_service).clone(),
        (*matching_service).clone(),
        config.engine.clone(),
    ));

    let app_state = AppState::new(
        loan_service,
        matching_service.clone(),
        payment_service.clone(),
        eligibility_service,
        trust_service,
        voucher_service,
        notification_service,
        config.webhook_secret.clone(),
    );

    // Background sweeps: offer expiry + missed payments
    let _scheduler = match jobs::start_scheduler(matching_service, payment_service, &config).await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start background sweeps: {}", e);
            std::process::exit(1);
        }
    };

    // Clone db_pool for health check
    let health_db_pool = db_pool.clone();

    // Create the app router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(move || health_check(health_db_pool.clone())))
        .merge(routes::loan_routes())
        .merge(routes::match_routes())
        .merge(routes::payment_routes())
        .merge(routes::eligibility_routes())
        .merge(routes::trust_routes())
        .merge(routes::vouch_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(&config));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Serve with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    tracing::info!("Server shutdown complete");
}

async fn root() -> &'static str {
    "TrustLend Engine API"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// Health check endpoint
async fn health_check(pool: sqlx::PgPool) -> axum::Json<HealthResponse> {
    let db_status = match trustlend_server::db::check_health(&pool).await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if db_status == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    axum::Json(HealthResponse {
        status: status.to_string(),
        database: db_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins_str = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
