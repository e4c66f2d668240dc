// CropWatch API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use db::store::PgStore;
use services::climate::OpenMeteoClient;
use services::engine::{Engine, EngineSettings};
use services::scheduler::{SchedulerSettings, SchedulerState, SharedSchedulerState};
use services::sms::{RateLimitedSink, TextLkClient};

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 10;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// CropWatch API: OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "CropWatch API",
        version = "0.1.0",
        description = "Crop growth monitoring for rice farmers. Accumulates growing \
            degree-days from Open-Meteo temperature data, tracks the crop through its \
            growth stages, records daily soil moisture, and sends each farmer SMS alerts \
            on stage changes and dry soil.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Farmers", description = "Farmer registration and crop progress"),
        (name = "Runs", description = "Manual catch-up and moisture refresh runs"),
        (name = "Scheduler", description = "Daily job scheduler status"),
    ),
    paths(
        routes::health::health_check,
        routes::farmers::register_farmer,
        routes::farmers::get_farmer,
        routes::farmers::get_chart_data,
        routes::runs::catch_up_all,
        routes::runs::catch_up_farmer,
        routes::runs::moisture_refresh_all,
        routes::scheduler::get_scheduler_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::farmers::RegisterFarmerRequest,
            routes::farmers::StageInfo,
            routes::farmers::FarmerResponse,
            routes::farmers::MoisturePoint,
            routes::farmers::GddPoint,
            routes::farmers::ChartDataResponse,
            services::engine::RunSummary,
            services::scheduler::JobKind,
            services::scheduler::JobStatus,
            services::scheduler::SchedulerState,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cropwatch_api=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down...");
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();
    init_tracing(&config.log_format);

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Collaborators
    let climate = OpenMeteoClient::new(
        &config.open_meteo_archive_url,
        &config.open_meteo_forecast_url,
        config.http_timeout_secs,
    );
    let sms = RateLimitedSink::new(
        TextLkClient::new(
            &config.sms_api_url,
            &config.sms_api_token,
            &config.sms_sender_id,
            config.http_timeout_secs,
        ),
        config.sms_daily_quota,
    );
    let engine = Engine::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(climate),
        Arc::new(sms),
        EngineSettings {
            call_timeout: Duration::from_secs(config.http_timeout_secs),
            concurrency: config.catch_up_concurrency,
        },
    );

    // Create shared scheduler state and start the daily jobs
    let scheduler_settings = SchedulerSettings::from_config(&config);
    let scheduler_state: SharedSchedulerState =
        Arc::new(RwLock::new(SchedulerState::new(&scheduler_settings)));
    let scheduler = services::scheduler::start(
        engine.clone(),
        scheduler_settings,
        scheduler_state.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Build router
    // Farmer and run routes use the engine; health uses PgPool directly.
    let farmer_routes = Router::new()
        .route("/api/v1/farmers", post(routes::farmers::register_farmer))
        .route("/api/v1/farmers/:id", get(routes::farmers::get_farmer))
        .route(
            "/api/v1/farmers/:id/chart-data",
            get(routes::farmers::get_chart_data),
        )
        .route(
            "/api/v1/farmers/:id/catch-up",
            post(routes::runs::catch_up_farmer),
        )
        .route("/api/v1/catch-up", post(routes::runs::catch_up_all))
        .route(
            "/api/v1/moisture-refresh",
            post(routes::runs::moisture_refresh_all),
        )
        .with_state(engine);

    // Health check uses PgPool to verify DB connectivity
    let health_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(pool);

    let scheduler_routes = Router::new()
        .route(
            "/api/v1/scheduler/status",
            get(routes::scheduler::get_scheduler_status),
        )
        .with_state(scheduler_state);

    let app = Router::new()
        .merge(health_routes)
        .merge(farmer_routes)
        .merge(scheduler_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server terminated unexpectedly");

    scheduler.shutdown().await;
}
