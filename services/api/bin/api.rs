//! Main Entrypoint for the Tutor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Choosing the roster backend and running migrations when it is Postgres.
//! 3. Initializing the credential broker and the transcript evaluator.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use openai_realtime::TokenBroker;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tutor_api::{
    config::Config,
    db::{InMemoryRoster, PgRoster, RosterStore},
    router::create_router,
    state::{AppState, UnconfiguredEvaluator},
};
use tutor_core::evaluation::{Evaluator, OpenAIEvaluator};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Roster ---
    let roster: Arc<dyn RosterStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let roster = PgRoster::new(pool);
            roster.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Arc::new(roster)
        }
        None => Arc::new(InMemoryRoster::new()),
    };

    // --- 4. Initialize Shared Services ---
    let broker = TokenBroker::new(config.openai_api_key.clone())
        .with_api_base(config.openai_api_base.clone())
        .with_model(config.realtime_model.clone())
        .with_voice(config.realtime_voice.clone());

    let evaluator: Arc<dyn Evaluator> = match &config.openai_api_key {
        Some(key) => {
            let openai_config = OpenAIConfig::new()
                .with_api_key(key.expose_secret())
                .with_api_base(config.openai_api_base.clone());
            Arc::new(OpenAIEvaluator::new(
                openai_config,
                config.scoring_model.clone(),
            ))
        }
        None => {
            warn!("OPENAI_API_KEY is not set: token and scoring requests will fail.");
            Arc::new(UnconfiguredEvaluator)
        }
    };

    let app_state = Arc::new(AppState {
        credentials: Arc::new(broker),
        evaluator,
        roster,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        realtime_model = %config.realtime_model,
        scoring_model = %config.scoring_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
