/// Back Office Application
///
/// This is the main entry point for the e-commerce back-office service.
/// The application exposes REST API endpoints for managing the product
/// catalog and the orders placed against it, relaying image uploads to the
/// external image host and gating admin mutations behind sessions.
///
/// # Architecture
///
/// The application follows a modular architecture with:
/// - Repository layer for data access
/// - Service layer for business logic (including the transactional
///   order-creation path)
/// - API layer for HTTP endpoints
/// - Metrics for monitoring
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use app_config::AppConfig;
use image_relay::{HttpImageRelay, ImageRelay};
use repository::{
    PgAdminsRepository, PgOrderLinesRepository, PgOrdersRepository, PgProductsRepository,
    PgSessionsRepository,
};
use server::Server;
use service::{
    AuthService, AuthServiceImpl, OrderService, OrderServiceImpl, ProductService,
    ProductServiceImpl,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Back office starting...");

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize database (creates the pool and applies migrations)
    let db_pool = db::init_db_pool(&config)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized successfully");

    // Wire services onto the shared pool
    let product_service: Arc<dyn ProductService> = Arc::new(ProductServiceImpl::new(
        PgProductsRepository::new(db_pool.clone()),
    ));
    let order_service: Arc<dyn OrderService> = Arc::new(OrderServiceImpl::new(
        db_pool.clone(),
        PgOrdersRepository::new(db_pool.clone()),
        PgOrderLinesRepository::new(db_pool.clone()),
        PgProductsRepository::new(db_pool.clone()),
    ));

    let auth_impl = AuthServiceImpl::new(
        PgAdminsRepository::new(db_pool.clone()),
        PgSessionsRepository::new(db_pool.clone()),
        config.session_ttl,
    );
    auth_impl
        .ensure_admin(&config.admin_username, &config.admin_password)
        .await
        .context("Failed to seed admin account")?;
    let auth_service: Arc<dyn AuthService> = Arc::new(auth_impl);

    let relay: Arc<dyn ImageRelay> = Arc::new(
        HttpImageRelay::new(config.image_host_url.clone(), config.upload_timeout)
            .context("Failed to build image relay client")?,
    );

    // Start HTTP server; blocks until shutdown
    let server = Server::new(
        config.http_port,
        product_service,
        order_service,
        auth_service,
        relay,
    );
    server.start().await?;

    info!("Application stopped");
    Ok(())
}
