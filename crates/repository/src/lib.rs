//! # Data Repository Layer
//!
//! This module provides repository traits and PostgreSQL implementations
//! for all entities: products, orders, order lines, admins, sessions.
//! Each repository that participates in order creation supports both regular
//! and transactional operations for integration with service/business logic.

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use model::{Admin, NewOrder, NewProduct, Order, OrderLine, Product, ProductPatch, Session};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Row, Transaction};

/// # RepositoryError
///
/// Error types that can occur during repository operations.
///
/// This enum represents the various error conditions that might arise
/// when interacting with the data storage layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    /// No result found.
    #[error("Not found")]
    NotFound,
}

fn product_from_row(row: &Row) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        price: row.get("price"),
        image_url: row.get("image_url"),
    }
}

fn order_header_from_row(row: &Row) -> Order {
    Order {
        id: row.get("id"),
        customer_name: row.get("customer_name"),
        customer_phone: row.get("customer_phone"),
        status: row.get("status"),
        created_at: row.get("created_at"),
        lines: Vec::new(), // To be filled by service
    }
}

/// # ProductsRepository
///
/// Repository interface for the product catalog.
///
/// `price_tx` exists so that order creation can read the current price of a
/// referenced product inside the same transaction that inserts the order
/// lines; whatever price it reads becomes the line's permanent snapshot.
#[async_trait]
pub trait ProductsRepository: Send + Sync {
    /// Insert a product and return the stored row with its assigned id.
    async fn insert(&self, product: &NewProduct) -> Result<Product, RepositoryError>;

    /// Get a product by id.
    async fn get(&self, id: i32) -> Result<Product, RepositoryError>;

    /// List all products ordered by id ascending. An empty table yields an
    /// empty vec, not an error.
    async fn list(&self) -> Result<Vec<Product>, RepositoryError>;

    /// Apply a partial update; only fields present in the patch are written.
    /// The caller guarantees the patch is non-empty.
    async fn update(&self, id: i32, patch: &ProductPatch) -> Result<Product, RepositoryError>;

    /// Permanently delete a product. Historical order lines keep their
    /// product id and price snapshot.
    async fn delete(&self, id: i32) -> Result<(), RepositoryError>;

    /// Read the current price of a product within a transaction.
    async fn price_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: i32,
    ) -> Result<Decimal, RepositoryError>;
}

/// PostgreSQL implementation of the ProductsRepository trait.
pub struct PgProductsRepository {
    /// Connection pool for database operations
    pool: Pool,
}

impl PgProductsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductsRepository for PgProductsRepository {
    async fn insert(&self, product: &NewProduct) -> Result<Product, RepositoryError> {
        let query = r#"
            INSERT INTO products (name, description, price, image_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, price, image_url
        "#;
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                query,
                &[
                    &product.name,
                    &product.description,
                    &product.price,
                    &product.image_url,
                ],
            )
            .await?;
        Ok(product_from_row(&row))
    }

    async fn get(&self, id: i32) -> Result<Product, RepositoryError> {
        let query = r#"
            SELECT id, name, description, price, image_url
            FROM products WHERE id = $1
        "#;
        let conn = self.pool.get().await?;
        let row = conn.query_opt(query, &[&id]).await?;
        match row {
            Some(row) => Ok(product_from_row(&row)),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let query = r#"
            SELECT id, name, description, price, image_url
            FROM products ORDER BY id
        "#;
        let conn = self.pool.get().await?;
        let rows = conn.query(query, &[]).await?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    async fn update(&self, id: i32, patch: &ProductPatch) -> Result<Product, RepositoryError> {
        // The SET clause is built from the fields actually present in the
        // patch; absent fields keep their stored values.
        let mut sets: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(name) = &patch.name {
            params.push(name);
            sets.push(format!("name = ${}", params.len()));
        }
        if let Some(description) = &patch.description {
            params.push(description);
            sets.push(format!("description = ${}", params.len()));
        }
        if let Some(price) = &patch.price {
            params.push(price);
            sets.push(format!("price = ${}", params.len()));
        }
        if let Some(image_url) = &patch.image_url {
            params.push(image_url);
            sets.push(format!("image_url = ${}", params.len()));
        }

        params.push(&id);
        let query = format!(
            "UPDATE products SET {} WHERE id = ${} RETURNING id, name, description, price, image_url",
            sets.join(", "),
            params.len()
        );

        let conn = self.pool.get().await?;
        let row = conn.query_opt(query.as_str(), &params).await?;
        match row {
            Some(row) => Ok(product_from_row(&row)),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        let query = "DELETE FROM products WHERE id = $1";
        let conn = self.pool.get().await?;
        let deleted = conn.execute(query, &[&id]).await?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn price_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: i32,
    ) -> Result<Decimal, RepositoryError> {
        let query = "SELECT price FROM products WHERE id = $1";
        let row = tx.query_opt(query, &[&product_id]).await?;
        match row {
            Some(row) => Ok(row.get("price")),
            None => Err(RepositoryError::NotFound),
        }
    }
}

/// # OrdersRepository
///
/// Repository interface for order headers.
///
/// `insert_tx` runs inside the order-creation transaction; the other
/// operations read or mutate committed headers.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Insert an order header in a transaction and return it with its
    /// assigned id, default status and DB timestamp. Lines are empty.
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        order: &NewOrder,
    ) -> Result<Order, RepositoryError>;

    /// Get an order header by id (lines left empty).
    async fn get_header(&self, id: i32) -> Result<Order, RepositoryError>;

    /// List all order headers, most recent first (lines left empty).
    async fn list_headers(&self) -> Result<Vec<Order>, RepositoryError>;

    /// Update the status of an order and return the updated header.
    async fn update_status(&self, id: i32, status: &str) -> Result<Order, RepositoryError>;
}

/// PostgreSQL implementation of the OrdersRepository trait.
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        order: &NewOrder,
    ) -> Result<Order, RepositoryError> {
        let query = r#"
            INSERT INTO orders (customer_name, customer_phone)
            VALUES ($1, $2)
            RETURNING id, customer_name, customer_phone, status, created_at
        "#;
        let row = tx
            .query_one(query, &[&order.customer_name, &order.customer_phone])
            .await?;
        Ok(order_header_from_row(&row))
    }

    async fn get_header(&self, id: i32) -> Result<Order, RepositoryError> {
        let query = r#"
            SELECT id, customer_name, customer_phone, status, created_at
            FROM orders WHERE id = $1
        "#;
        let conn = self.pool.get().await?;
        let row = conn.query_opt(query, &[&id]).await?;
        match row {
            Some(row) => Ok(order_header_from_row(&row)),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_headers(&self) -> Result<Vec<Order>, RepositoryError> {
        let query = r#"
            SELECT id, customer_name, customer_phone, status, created_at
            FROM orders ORDER BY created_at DESC, id DESC
        "#;
        let conn = self.pool.get().await?;
        let rows = conn.query(query, &[]).await?;
        Ok(rows.iter().map(order_header_from_row).collect())
    }

    async fn update_status(&self, id: i32, status: &str) -> Result<Order, RepositoryError> {
        let query = r#"
            UPDATE orders SET status = $1 WHERE id = $2
            RETURNING id, customer_name, customer_phone, status, created_at
        "#;
        let conn = self.pool.get().await?;
        let row = conn.query_opt(query, &[&status, &id]).await?;
        match row {
            Some(row) => Ok(order_header_from_row(&row)),
            None => Err(RepositoryError::NotFound),
        }
    }
}

/// # OrderLinesRepository
///
/// Repository interface for order line items. Lines are only ever written
/// inside the order-creation transaction; afterwards they are immutable.
#[async_trait]
pub trait OrderLinesRepository: Send + Sync {
    /// Insert the lines of an order in a transaction. `price_at_time` has
    /// already been snapshotted by the caller.
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: i32,
        lines: &[OrderLine],
    ) -> Result<(), RepositoryError>;

    /// Get the lines of one order in insertion order.
    async fn get_by_order_id(&self, order_id: i32) -> Result<Vec<OrderLine>, RepositoryError>;

    /// Get all lines paired with their owning order id, in insertion order.
    async fn list_all(&self) -> Result<Vec<(i32, OrderLine)>, RepositoryError>;
}

/// PostgreSQL implementation of the OrderLinesRepository trait.
pub struct PgOrderLinesRepository {
    pool: Pool,
}

impl PgOrderLinesRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn line_from_row(row: &Row) -> OrderLine {
    OrderLine {
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        price_at_time: row.get("price_at_time"),
    }
}

#[async_trait]
impl OrderLinesRepository for PgOrderLinesRepository {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: i32,
        lines: &[OrderLine],
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO order_items (order_id, product_id, quantity, price_at_time)
            VALUES ($1, $2, $3, $4)
        "#;
        for line in lines {
            tx.execute(
                query,
                &[
                    &order_id,
                    &line.product_id,
                    &line.quantity,
                    &line.price_at_time,
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn get_by_order_id(&self, order_id: i32) -> Result<Vec<OrderLine>, RepositoryError> {
        let query = r#"
            SELECT product_id, quantity, price_at_time
            FROM order_items WHERE order_id = $1 ORDER BY id
        "#;
        let conn = self.pool.get().await?;
        let rows = conn.query(query, &[&order_id]).await?;
        Ok(rows.iter().map(line_from_row).collect())
    }

    async fn list_all(&self) -> Result<Vec<(i32, OrderLine)>, RepositoryError> {
        let query = r#"
            SELECT order_id, product_id, quantity, price_at_time
            FROM order_items ORDER BY id
        "#;
        let conn = self.pool.get().await?;
        let rows = conn.query(query, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("order_id"), line_from_row(row)))
            .collect())
    }
}

/// # AdminsRepository
///
/// Repository interface for back-office admin accounts.
#[async_trait]
pub trait AdminsRepository: Send + Sync {
    /// Look up an admin by username.
    async fn get_by_username(&self, username: &str) -> Result<Admin, RepositoryError>;

    /// Create the admin account if it does not exist yet. An existing
    /// account (and its possibly rotated password) is left untouched.
    async fn ensure(&self, username: &str, password_hash: &str) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of the AdminsRepository trait.
pub struct PgAdminsRepository {
    pool: Pool,
}

impl PgAdminsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdminsRepository for PgAdminsRepository {
    async fn get_by_username(&self, username: &str) -> Result<Admin, RepositoryError> {
        let query = r#"
            SELECT id, username, password_hash
            FROM admins WHERE username = $1
        "#;
        let conn = self.pool.get().await?;
        let row = conn.query_opt(query, &[&username]).await?;
        match row {
            Some(row) => Ok(Admin {
                id: row.get("id"),
                username: row.get("username"),
                password_hash: row.get("password_hash"),
            }),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn ensure(&self, username: &str, password_hash: &str) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO admins (username, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (username) DO NOTHING
        "#;
        let conn = self.pool.get().await?;
        conn.execute(query, &[&username, &password_hash]).await?;
        Ok(())
    }
}

/// # SessionsRepository
///
/// Repository interface for server-side admin sessions, keyed by the opaque
/// token handed to the client.
#[async_trait]
pub trait SessionsRepository: Send + Sync {
    /// Persist a freshly issued session.
    async fn insert(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Find a session by token if it has not expired yet. Expiry is checked
    /// against the database clock.
    async fn find_valid(&self, token: &str) -> Result<Option<Session>, RepositoryError>;

    /// Destroy a session. Deleting an unknown token is not an error.
    async fn delete(&self, token: &str) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of the SessionsRepository trait.
pub struct PgSessionsRepository {
    pool: Pool,
}

impl PgSessionsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionsRepository for PgSessionsRepository {
    async fn insert(&self, session: &Session) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO sessions (token, admin_id, expires_at)
            VALUES ($1, $2, $3)
        "#;
        let conn = self.pool.get().await?;
        conn.execute(
            query,
            &[&session.token, &session.admin_id, &session.expires_at],
        )
        .await?;
        Ok(())
    }

    async fn find_valid(&self, token: &str) -> Result<Option<Session>, RepositoryError> {
        let query = r#"
            SELECT token, admin_id, expires_at
            FROM sessions WHERE token = $1 AND expires_at > now()
        "#;
        let conn = self.pool.get().await?;
        let row = conn.query_opt(query, &[&token]).await?;
        Ok(row.map(|row| Session {
            token: row.get("token"),
            admin_id: row.get("admin_id"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn delete(&self, token: &str) -> Result<(), RepositoryError> {
        let query = "DELETE FROM sessions WHERE token = $1";
        let conn = self.pool.get().await?;
        conn.execute(query, &[&token]).await?;
        Ok(())
    }
}
