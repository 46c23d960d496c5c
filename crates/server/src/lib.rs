//! Server crate provides HTTP server functionality.
//!
//! This module implements the back-office HTTP server: the public catalog
//! and order endpoints, the session-gated admin mutations, and the ambient
//! health/metrics endpoints. Handlers live in [`handlers`]; the session
//! middleware and prometheus metrics middleware live here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::Router;
use image_relay::ImageRelay;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use service::{AuthService, OrderService, ProductService, ServiceError};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::error::ApiError;

pub mod error;
pub mod handlers;

/// Application state shared between request handlers.
#[derive(Clone)]
pub struct AppState {
    pub(crate) products: Arc<dyn ProductService>,
    pub(crate) orders: Arc<dyn OrderService>,
    pub(crate) auth: Arc<dyn AuthService>,
    pub(crate) relay: Arc<dyn ImageRelay>,
    pub(crate) metrics: Arc<Metrics>,
}

/// Server represents the back-office HTTP server.
pub struct Server {
    port: u16,
    state: AppState,
}

/// Metrics collects and exposes HTTP server metrics.
pub(crate) struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("Failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("Failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("Failed to register http_request_duration_seconds metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

impl Server {
    /// Creates a new Server instance.
    ///
    /// # Arguments
    ///
    /// * `port` - The port on which the server will listen
    /// * `products`, `orders`, `auth` - The business services
    /// * `relay` - The image upload relay used by product mutations
    pub fn new(
        port: u16,
        products: Arc<dyn ProductService>,
        orders: Arc<dyn OrderService>,
        auth: Arc<dyn AuthService>,
        relay: Arc<dyn ImageRelay>,
    ) -> Self {
        info!("Initializing HTTP server on port {}", port);

        Self {
            port,
            state: AppState {
                products,
                orders,
                auth,
                relay,
                metrics: Arc::new(Metrics::new()),
            },
        }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    /// Builds the router. Admin mutations are gated behind the session
    /// middleware; order creation and all reads stay customer-facing.
    pub fn create_router(&self) -> Router {
        let gated = Router::new()
            .route("/products", post(handlers::create_product))
            .route(
                "/products/{id}",
                put(handlers::update_product).delete(handlers::delete_product),
            )
            .route("/orders/{id}", patch(handlers::update_order_status))
            .route("/logout", post(handlers::logout))
            .route_layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                require_session,
            ));

        let open = Router::new()
            .route("/products", get(handlers::list_products))
            .route("/products/{id}", get(handlers::get_product))
            .route(
                "/orders",
                post(handlers::create_order).get(handlers::list_orders),
            )
            .route("/orders/{id}", get(handlers::get_order))
            .route("/login", post(handlers::login))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics));

        open.merge(gated)
            // Image uploads may carry up to 5 MiB; the axum default is 2 MiB.
            .layer(DefaultBodyLimit::max(5 * 1024 * 1024))
            .layer(axum::middleware::from_fn_with_state(
                self.state.metrics.clone(),
                metrics_middleware,
            ))
            .with_state(self.state.clone())
    }
}

/// Extracts the session token from the `session` cookie or, failing that,
/// from an `Authorization: Bearer` header.
pub(crate) fn session_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some(token) = pair.trim().strip_prefix("session=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Middleware gating admin mutations on a valid, unexpired session.
async fn require_session(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(token) = session_token(req.headers()) else {
        return ApiError::from(ServiceError::Auth).into_response();
    };

    match state.auth.authorize(&token).await {
        Ok(Some(_session)) => next.run(req).await,
        Ok(None) => ApiError::from(ServiceError::Auth).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Middleware for collecting metrics on HTTP requests.
async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    let status = response.status().as_u16();
    metrics.record_request(&method, &path, status, duration);
    if status >= 500 {
        metrics.record_error("http", &path);
    }

    response
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn test_session_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc-123; lang=fr"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_session_token_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc-123"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_session_token_missing() {
        let headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);
    }
}
