use std::net::SocketAddr;

use thiserror::Error;
use time::Duration;
use tracing::info;

use kapsel::access::AccessController;
use kapsel::app_state::AppState;
use kapsel::auth::{AdminCredentials, AuthError};
use kapsel::cleanup::spawn_cleanup_job;
use kapsel::config::{self, AppConfig};
use kapsel::database::{self, initialize_database};
use kapsel::files::FileStore;
use kapsel::hotlinks::HotlinkResolver;
use kapsel::logging::init_logging;
use kapsel::server::router::build_router;
use kapsel::sessions::SessionStore;
use kapsel::unlock::{UnlockError, UnlockGate};

#[derive(Debug, Error)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Database initialization error: {0}")]
    DatabaseInit(#[from] database::DatabaseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Logging error: {0}")]
    Logging(String),
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Unlock token configuration error: {0}")]
    Unlock(#[from] UnlockError),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging first
    init_logging().map_err(|e| AppError::Logging(e.to_string()))?;
    info!("Starting kapsel");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded successfully");

    // Initialize database with connection pool and schema
    let db_pool = initialize_database(&config).await?;

    // Resolve the configured administrator credentials
    let admin = AdminCredentials::from_config(&config).await?;

    // Wire the access-control core
    let sessions = SessionStore::new(
        db_pool.clone(),
        Duration::minutes(config.session.ttl_minutes as i64),
        Duration::minutes(config.renew_within_minutes() as i64),
    );
    let files = FileStore::new(db_pool.clone());
    let hotlinks = HotlinkResolver::new(db_pool.clone());
    let gate = UnlockGate::from_config(&config.security.unlock_token_secret)?;
    let access = AccessController::new(
        sessions,
        files,
        hotlinks,
        gate,
        admin,
        config.session.cookie_name.clone(),
    );

    // Create app state
    let app_state = AppState::new(db_pool, config.clone(), access);

    // Start the background reaper for expired files and sessions
    spawn_cleanup_job(app_state.clone());

    // Create router with middleware configured
    let app = build_router(app_state);

    // Start server
    let addr = SocketAddr::new(config.server.bind_addr.parse()?, config.server.port);
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
