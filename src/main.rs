use anyhow::Context;
use std::net::SocketAddr;
use ticketcore::bootstrap;
use ticketcore::config::Config;
use ticketcore::infrastructure::http::router::build_router;
use ticketcore::infrastructure::observability;
use ticketcore::infrastructure::persistence::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Tracing and metrics; flushes spans on drop
    let _guard = observability::init(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize observability: {}", e))?;
    tracing::info!("Configuration loaded");

    // Initialize database connection
    let db = Database::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
    tracing::info!("Database connection established");

    // Run migrations
    db.run_migrations()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    tracing::info!("Database migrations applied");

    // Build application state (and start the job workers)
    let state = bootstrap::build_app_state(db, &config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to build application state: {}", e))?;

    let app = build_router(state);

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
