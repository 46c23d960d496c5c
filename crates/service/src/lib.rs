//! Business logic layer for the back office.
//!
//! This module defines the [`ProductService`], [`OrderService`] and
//! [`AuthService`] traits and their implementations over the repository
//! layer. The order service coordinates the multi-table order-creation
//! transaction, snapshotting each referenced product's current price into
//! the inserted lines.
//!
//! # Features
//! - Atomic creation of orders and their lines in a single transaction.
//! - Validation of input data before any persistence side effect.
//! - Dependency injection for testability and loose coupling.
//! - Well-typed error handling via [`ServiceError`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::password_hash::rand_core::OsRng;
use argon2::Argon2;
use chrono::Utc;
use deadpool_postgres::Pool;
use model::{NewOrder, NewProduct, Order, OrderLine, Product, ProductPatch, Session};
use repository::{
    AdminsRepository, OrderLinesRepository, OrdersRepository, ProductsRepository,
    RepositoryError, SessionsRepository,
};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// The main error type for all service operations. Each variant maps to one
/// stable error kind in the HTTP layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing input; the caller's fault.
    #[error("Invalid input: {0}")]
    Validation(String),
    /// The addressed entity does not exist.
    #[error("Not found")]
    NotFound,
    /// An order line referenced a product that does not exist; the whole
    /// order-creation transaction has been rolled back.
    #[error("Product {0} not found")]
    MissingProduct(i32),
    /// Bad credentials or missing/expired session. Deliberately generic:
    /// unknown user and wrong password are indistinguishable.
    #[error("Invalid credentials")]
    Auth,
    /// The image host failed or timed out.
    #[error("Image upload failed: {0}")]
    Upload(#[from] image_relay::UploadError),
    /// The store itself failed (connectivity, pool, transaction infrastructure).
    #[error("Storage unavailable: {0}")]
    Store(#[source] RepositoryError),
    /// Some unexpected or unhandled error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ServiceError::NotFound,
            other => ServiceError::Store(other),
        }
    }
}

fn validate_new_product(product: &NewProduct) -> Result<(), ServiceError> {
    if product.name.trim().is_empty() {
        return Err(ServiceError::Validation("name must not be empty".into()));
    }
    if product.price.is_sign_negative() {
        return Err(ServiceError::Validation("price must not be negative".into()));
    }
    if product.image_url.as_deref() == Some("") {
        return Err(ServiceError::Validation("image_url must not be empty".into()));
    }
    Ok(())
}

fn validate_patch(patch: &ProductPatch) -> Result<(), ServiceError> {
    if patch.is_empty() {
        return Err(ServiceError::Validation("update contains no fields".into()));
    }
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("name must not be empty".into()));
        }
    }
    if let Some(price) = &patch.price {
        if price.is_sign_negative() {
            return Err(ServiceError::Validation("price must not be negative".into()));
        }
    }
    if patch.image_url.as_deref() == Some("") {
        return Err(ServiceError::Validation("image_url must not be empty".into()));
    }
    Ok(())
}

fn validate_new_order(order: &NewOrder) -> Result<(), ServiceError> {
    if order.customer_name.trim().is_empty() {
        return Err(ServiceError::Validation(
            "customer_name must not be empty".into(),
        ));
    }
    if order.lines.is_empty() {
        return Err(ServiceError::Validation("order has no lines".into()));
    }
    for line in &order.lines {
        if line.quantity <= 0 {
            return Err(ServiceError::Validation(format!(
                "quantity for product {} must be positive",
                line.product_id
            )));
        }
    }
    Ok(())
}

fn validate_status(status: &str) -> Result<(), ServiceError> {
    // The status enumeration is open-ended; only emptiness is rejected here.
    if status.trim().is_empty() {
        return Err(ServiceError::Validation("status must not be empty".into()));
    }
    Ok(())
}

/// Trait describing business operations on the product catalog.
#[async_trait]
pub trait ProductService: Send + Sync {
    /// Validates and stores a new product, returning it with its assigned id.
    async fn create(&self, product: NewProduct) -> Result<Product, ServiceError>;

    /// Retrieves a product by id.
    async fn get(&self, id: i32) -> Result<Product, ServiceError>;

    /// Lists all products ordered by id ascending.
    async fn list(&self) -> Result<Vec<Product>, ServiceError>;

    /// Applies a partial update. An empty patch is rejected, not silently
    /// accepted.
    async fn update(&self, id: i32, patch: ProductPatch) -> Result<Product, ServiceError>;

    /// Permanently deletes a product. Historical order lines keep their
    /// product id and price snapshot.
    async fn delete(&self, id: i32) -> Result<(), ServiceError>;
}

/// Implementation of [`ProductService`] over the products repository.
pub struct ProductServiceImpl<R> {
    products_repo: R,
}

impl<R> ProductServiceImpl<R>
where
    R: ProductsRepository,
{
    pub fn new(products_repo: R) -> Self {
        Self { products_repo }
    }
}

#[async_trait]
impl<R> ProductService for ProductServiceImpl<R>
where
    R: ProductsRepository,
{
    #[instrument(skip(self, product))]
    async fn create(&self, product: NewProduct) -> Result<Product, ServiceError> {
        validate_new_product(&product)?;
        Ok(self.products_repo.insert(&product).await?)
    }

    async fn get(&self, id: i32) -> Result<Product, ServiceError> {
        Ok(self.products_repo.get(id).await?)
    }

    async fn list(&self) -> Result<Vec<Product>, ServiceError> {
        Ok(self.products_repo.list().await?)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: i32, patch: ProductPatch) -> Result<Product, ServiceError> {
        validate_patch(&patch)?;
        Ok(self.products_repo.update(id, &patch).await?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i32) -> Result<(), ServiceError> {
        Ok(self.products_repo.delete(id).await?)
    }
}

/// Trait describing order creation and the aggregate order views.
///
/// Implementations are expected to guarantee atomicity: a failed creation
/// leaves no order header and no line rows behind.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Atomically creates an order with one line per input entry, reading
    /// each referenced product's current price within the same transaction
    /// and freezing it into the line.
    ///
    /// # Errors
    /// Returns [`ServiceError::Validation`] before any persistence when the
    /// input is malformed, [`ServiceError::MissingProduct`] (after a full
    /// rollback) when a referenced product does not exist, or
    /// [`ServiceError::Store`] for infrastructure failures.
    async fn create_order(&self, order: NewOrder) -> Result<Order, ServiceError>;

    /// Lists all orders, most recent first, each with its lines in insertion
    /// order. An order without lines carries an empty vec.
    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError>;

    /// Retrieves one order with its lines.
    async fn get_order(&self, id: i32) -> Result<Order, ServiceError>;

    /// Updates the status of an order. Any non-empty status string is
    /// accepted at this layer.
    async fn update_status(&self, id: i32, status: &str) -> Result<Order, ServiceError>;
}

/// Implementation of [`OrderService`] using the repository pattern.
///
/// Wires the order, line and product repositories together with a Postgres
/// connection pool to run the order-creation transaction.
pub struct OrderServiceImpl<R1, R2, R3> {
    db_pool: Pool,
    orders_repo: R1,
    lines_repo: R2,
    products_repo: R3,
}

impl<R1, R2, R3> OrderServiceImpl<R1, R2, R3>
where
    R1: OrdersRepository,
    R2: OrderLinesRepository,
    R3: ProductsRepository,
{
    /// Constructs a new [`OrderServiceImpl`] from the provided dependencies.
    pub fn new(db_pool: Pool, orders_repo: R1, lines_repo: R2, products_repo: R3) -> Self {
        Self {
            db_pool,
            orders_repo,
            lines_repo,
            products_repo,
        }
    }
}

#[async_trait]
impl<R1, R2, R3> OrderService for OrderServiceImpl<R1, R2, R3>
where
    R1: OrdersRepository,
    R2: OrderLinesRepository,
    R3: ProductsRepository,
{
    #[instrument(skip(self, order))]
    async fn create_order(&self, order: NewOrder) -> Result<Order, ServiceError> {
        validate_new_order(&order)?;

        let mut client = self
            .db_pool
            .get()
            .await
            .map_err(|e| ServiceError::Store(RepositoryError::Pool(e)))?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Store(RepositoryError::Db(e)))?;

        let mut header = self.orders_repo.insert_tx(&tx, &order).await?;

        // Any early return below drops the transaction and rolls everything
        // back, including the header inserted above.
        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let price = match self.products_repo.price_tx(&tx, line.product_id).await {
                Ok(price) => price,
                Err(RepositoryError::NotFound) => {
                    return Err(ServiceError::MissingProduct(line.product_id));
                }
                Err(e) => return Err(e.into()),
            };
            lines.push(OrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
                price_at_time: price,
            });
        }

        self.lines_repo.insert_tx(&tx, header.id, &lines).await?;

        tx.commit()
            .await
            .map_err(|e| ServiceError::Store(RepositoryError::Db(e)))?;

        header.lines = lines;
        Ok(header)
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError> {
        let headers = self.orders_repo.list_headers().await?;
        let all_lines = self.lines_repo.list_all().await?;

        let mut by_order: HashMap<i32, Vec<OrderLine>> = HashMap::new();
        for (order_id, line) in all_lines {
            by_order.entry(order_id).or_default().push(line);
        }

        Ok(headers
            .into_iter()
            .map(|mut order| {
                order.lines = by_order.remove(&order.id).unwrap_or_default();
                order
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: i32) -> Result<Order, ServiceError> {
        let mut order = self.orders_repo.get_header(id).await?;
        order.lines = self.lines_repo.get_by_order_id(id).await?;
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: i32, status: &str) -> Result<Order, ServiceError> {
        validate_status(status)?;
        let mut order = self.orders_repo.update_status(id, status.trim()).await?;
        order.lines = self.lines_repo.get_by_order_id(id).await?;
        Ok(order)
    }
}

/// Trait describing admin authentication and session management.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Verifies the credentials and issues a server-side session.
    ///
    /// Both an unknown username and a wrong password yield the same
    /// [`ServiceError::Auth`].
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<Session, ServiceError>;

    /// Returns the session behind the token if it exists and has not
    /// expired.
    async fn authorize(&self, token: &str) -> Result<Option<Session>, ServiceError>;

    /// Destroys a session. Unknown tokens are ignored.
    async fn logout(&self, token: &str) -> Result<(), ServiceError>;

    /// Seeds the bootstrap admin account if it does not exist yet.
    async fn ensure_admin(&self, username: &str, password: &str) -> Result<(), ServiceError>;
}

/// Implementation of [`AuthService`] over the admins and sessions
/// repositories, using salted argon2 hashes with constant-time verification.
pub struct AuthServiceImpl<R1, R2> {
    admins_repo: R1,
    sessions_repo: R2,
    session_ttl: Duration,
}

impl<R1, R2> AuthServiceImpl<R1, R2>
where
    R1: AdminsRepository,
    R2: SessionsRepository,
{
    pub fn new(admins_repo: R1, sessions_repo: R2, session_ttl: Duration) -> Self {
        Self {
            admins_repo,
            sessions_repo,
            session_ttl,
        }
    }
}

/// Hashes a password into a salted argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::Unexpected(format!("Password hashing failed: {e}")))
}

/// Verifies a password against a stored argon2 PHC string.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[async_trait]
impl<R1, R2> AuthService for AuthServiceImpl<R1, R2>
where
    R1: AdminsRepository,
    R2: SessionsRepository,
{
    #[instrument(skip(self, password))]
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Session, ServiceError> {
        let admin = match self.admins_repo.get_by_username(username).await {
            Ok(admin) => admin,
            Err(RepositoryError::NotFound) => return Err(ServiceError::Auth),
            Err(e) => return Err(e.into()),
        };

        if !verify_password(password, &admin.password_hash) {
            return Err(ServiceError::Auth);
        }

        let session = Session {
            token: Uuid::new_v4().to_string(),
            admin_id: admin.id,
            expires_at: Utc::now() + self.session_ttl,
        };
        self.sessions_repo.insert(&session).await?;
        Ok(session)
    }

    async fn authorize(&self, token: &str) -> Result<Option<Session>, ServiceError> {
        Ok(self.sessions_repo.find_valid(token).await?)
    }

    #[instrument(skip(self, token))]
    async fn logout(&self, token: &str) -> Result<(), ServiceError> {
        Ok(self.sessions_repo.delete(token).await?)
    }

    async fn ensure_admin(&self, username: &str, password: &str) -> Result<(), ServiceError> {
        let hash = hash_password(password)?;
        Ok(self.admins_repo.ensure(username, &hash).await?)
    }
}
