//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiOracle, ReqwestTransport, RetryingOracle, SystemClock},
    config::Config,
    error::ApiError,
    scheduler::run_daily_rollover,
    web::{
        self,
        state::{AppState, StateParts},
        ApiDoc,
    },
};
use async_openai::Client;
use axum::http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let api_key = config
        .openai_api_key
        .as_deref()
        .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?;
    let openai_client = Client::with_config(OpenAiOracle::client_config(api_key, config.llm_base_url.as_deref()));
    let oracle = Arc::new(RetryingOracle::new(
        Arc::new(OpenAiOracle::new(openai_client, config.llm_model.clone())),
        config.llm_timeout,
        config.llm_max_retries,
    ));
    let transport = Arc::new(
        ReqwestTransport::new(config.fetch_max_bytes)
            .map_err(|e| ApiError::Internal(format!("HTTP client setup failed: {}", e)))?,
    );
    let clock = SystemClock::new(config.goal_utc_offset);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::build(StateParts {
        db: db_adapter,
        oracle,
        transport,
        clock: Arc::new(clock),
        user_agent: config.fetch_user_agent.clone(),
        llm_max_concurrency: config.llm_max_concurrency,
    }));

    // --- 5. Start the Daily Rollover Task ---
    let shutdown = CancellationToken::new();
    let rollover = tokio::spawn(run_daily_rollover(app_state.goals.clone(), clock, shutdown.clone()));

    // --- 6. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("CORS_ORIGIN '{}' is not a valid header value: {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-user-id")])
        .expose_headers([HeaderName::from_static("x-request-id")]);

    let app = Router::new()
        .merge(web::router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!("Swagger UI available at http://{}/swagger-ui", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    rollover
        .await
        .map_err(|e| ApiError::Internal(format!("rollover task failed: {}", e)))?;
    Ok(())
}
