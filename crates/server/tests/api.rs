//! Router-level tests for the REST surface, run against in-memory service
//! doubles so they need no database and no network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use image_relay::{ImageRelay, UploadError};
use model::{Admin, NewOrder, NewProduct, Order, OrderLine, Product, ProductPatch, Session};
use repository::{
    AdminsRepository, ProductsRepository, RepositoryError, SessionsRepository,
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use server::Server;
use service::{
    AuthService, AuthServiceImpl, OrderService, ProductService, ProductServiceImpl, ServiceError,
};
use tempfile::NamedTempFile;
use tokio_postgres::Transaction;
use tower::util::ServiceExt;

#[derive(Default)]
struct ProductStore {
    next_id: i32,
    rows: HashMap<i32, Product>,
}

/// In-memory stand-in for the Postgres products repository.
#[derive(Clone, Default)]
struct InMemoryProductsRepo {
    inner: Arc<Mutex<ProductStore>>,
}

impl InMemoryProductsRepo {
    fn price_of(&self, id: i32) -> Option<Decimal> {
        self.inner.lock().unwrap().rows.get(&id).map(|p| p.price)
    }
}

#[async_trait]
impl ProductsRepository for InMemoryProductsRepo {
    async fn insert(&self, product: &NewProduct) -> Result<Product, RepositoryError> {
        let mut store = self.inner.lock().unwrap();
        store.next_id += 1;
        let row = Product {
            id: store.next_id,
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            image_url: product.image_url.clone(),
        };
        store.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: i32) -> Result<Product, RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .rows
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let mut rows: Vec<Product> = self.inner.lock().unwrap().rows.values().cloned().collect();
        rows.sort_by_key(|p| p.id);
        Ok(rows)
    }

    async fn update(&self, id: i32, patch: &ProductPatch) -> Result<Product, RepositoryError> {
        let mut store = self.inner.lock().unwrap();
        let row = store.rows.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(name) = &patch.name {
            row.name = name.clone();
        }
        if let Some(description) = &patch.description {
            row.description = description.clone();
        }
        if let Some(price) = &patch.price {
            row.price = *price;
        }
        if let Some(image_url) = &patch.image_url {
            row.image_url = Some(image_url.clone());
        }
        Ok(row.clone())
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn price_tx(
        &self,
        _tx: &Transaction<'_>,
        product_id: i32,
    ) -> Result<Decimal, RepositoryError> {
        self.price_of(product_id).ok_or(RepositoryError::NotFound)
    }
}

#[derive(Default)]
struct InMemoryAdminsRepo {
    admins: Mutex<HashMap<String, Admin>>,
}

#[async_trait]
impl AdminsRepository for InMemoryAdminsRepo {
    async fn get_by_username(&self, username: &str) -> Result<Admin, RepositoryError> {
        self.admins
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn ensure(&self, username: &str, password_hash: &str) -> Result<(), RepositoryError> {
        let mut admins = self.admins.lock().unwrap();
        if !admins.contains_key(username) {
            let id = admins.len() as i32 + 1;
            admins.insert(
                username.to_string(),
                Admin {
                    id,
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                },
            );
        }
        Ok(())
    }
}

#[derive(Default)]
struct InMemorySessionsRepo {
    sessions: Mutex<HashMap<String, Session>>,
}

#[async_trait]
impl SessionsRepository for InMemorySessionsRepo {
    async fn insert(&self, session: &Session) -> Result<(), RepositoryError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_valid(&self, token: &str) -> Result<Option<Session>, RepositoryError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .cloned())
    }

    async fn delete(&self, token: &str) -> Result<(), RepositoryError> {
        self.sessions.lock().unwrap().remove(token);
        Ok(())
    }
}

/// Order service double sharing the product map, so snapshots and missing
/// products behave like the real transaction without a database.
struct MockOrderService {
    products: InMemoryProductsRepo,
    orders: Mutex<Vec<Order>>,
}

impl MockOrderService {
    fn new(products: InMemoryProductsRepo) -> Self {
        Self {
            products,
            orders: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OrderService for MockOrderService {
    async fn create_order(&self, order: NewOrder) -> Result<Order, ServiceError> {
        if order.lines.is_empty() {
            return Err(ServiceError::Validation("order has no lines".into()));
        }
        let mut lines = Vec::new();
        for line in &order.lines {
            if line.quantity <= 0 {
                return Err(ServiceError::Validation("quantity must be positive".into()));
            }
            let price = self
                .products
                .price_of(line.product_id)
                .ok_or(ServiceError::MissingProduct(line.product_id))?;
            lines.push(OrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
                price_at_time: price,
            });
        }
        let mut orders = self.orders.lock().unwrap();
        let created = Order {
            id: orders.len() as i32 + 1,
            customer_name: order.customer_name,
            customer_phone: order.customer_phone,
            status: "pending".into(),
            created_at: Utc::now(),
            lines,
        };
        orders.push(created.clone());
        Ok(created)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError> {
        let mut orders = self.orders.lock().unwrap().clone();
        orders.reverse();
        Ok(orders)
    }

    async fn get_order(&self, id: i32) -> Result<Order, ServiceError> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    async fn update_status(&self, id: i32, status: &str) -> Result<Order, ServiceError> {
        if status.trim().is_empty() {
            return Err(ServiceError::Validation("status must not be empty".into()));
        }
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(ServiceError::NotFound)?;
        order.status = status.to_string();
        Ok(order.clone())
    }
}

struct MockRelay;

#[async_trait]
impl ImageRelay for MockRelay {
    async fn upload(&self, _file: NamedTempFile) -> Result<String, UploadError> {
        Ok("https://files.example/mock.png".to_string())
    }
}

struct FailingRelay;

#[async_trait]
impl ImageRelay for FailingRelay {
    async fn upload(&self, _file: NamedTempFile) -> Result<String, UploadError> {
        Err(UploadError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "image host down",
        )))
    }
}

async fn test_router(relay: Arc<dyn ImageRelay>) -> Router {
    let products_repo = InMemoryProductsRepo::default();
    let products: Arc<dyn ProductService> =
        Arc::new(ProductServiceImpl::new(products_repo.clone()));
    let orders: Arc<dyn OrderService> = Arc::new(MockOrderService::new(products_repo));

    let auth_impl = AuthServiceImpl::new(
        InMemoryAdminsRepo::default(),
        InMemorySessionsRepo::default(),
        std::time::Duration::from_secs(3600),
    );
    auth_impl.ensure_admin("admin", "s3cret").await.unwrap();
    let auth: Arc<dyn AuthService> = Arc::new(auth_impl);

    Server::new(0, products, orders, auth, relay).create_router()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_request_with_session(method: &str, uri: &str, body: Value, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, cookie)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Logs in with the seeded credentials and returns the `session=...` cookie
/// pair.
async fn login(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            json!({"username": "admin", "password": "s3cret"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login must set a session cookie")
        .to_str()
        .unwrap();
    cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn test_gated_routes_require_session() {
    let app = test_router(Arc::new(MockRelay)).await;

    let body = json!({"name": "Widget", "description": "A widget", "price": 19.99});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/products", body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "POST",
            "/products",
            body,
            "session=not-a-real-token",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/products/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            "/orders/1",
            json!({"status": "completed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_with_wrong_password_is_rejected() {
    let app = test_router(Arc::new(MockRelay)).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            json!({"username": "admin", "password": "wrong"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "auth");

    // Unknown users fail exactly the same way.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            json!({"username": "nobody", "password": "s3cret"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "auth");
}

#[tokio::test]
async fn test_product_crud_flow() {
    let app = test_router(Arc::new(MockRelay)).await;
    let cookie = login(&app).await;

    // Create.
    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "POST",
            "/products",
            json!({"name": "Widget", "description": "A widget", "price": 19.99}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["price"].as_f64().unwrap(), 19.99);
    assert!(created["image_url"].is_null());
    let id = created["id"].as_i64().unwrap();

    // Round-trip.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/products/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["name"], "Widget");
    assert_eq!(fetched["description"], "A widget");
    assert_eq!(fetched["price"].as_f64().unwrap(), 19.99);

    // Partial update: price changes, everything else stays.
    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "PUT",
            &format!("/products/{id}"),
            json!({"price": 24.50}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["price"].as_f64().unwrap(), 24.50);
    assert_eq!(updated["name"], "Widget");
    assert_eq!(updated["description"], "A widget");

    // Empty patch is a validation error.
    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "PUT",
            &format!("/products/{id}"),
            json!({}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "validation");

    // Negative price is rejected on create.
    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "POST",
            "/products",
            json!({"name": "Bad", "description": "", "price": -1}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Listing.
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Delete, then the id is gone.
    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "DELETE",
            &format!("/products/{id}"),
            json!({}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Product deleted successfully");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/products/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "DELETE",
            &format!("/products/{id}"),
            json!({}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_product_with_bad_id_is_400() {
    let app = test_router(Arc::new(MockRelay)).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/products/not-a-number")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_order_flow() {
    let app = test_router(Arc::new(MockRelay)).await;
    let cookie = login(&app).await;

    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "POST",
            "/products",
            json!({"name": "Widget", "description": "A widget", "price": 10.00}),
            &cookie,
        ))
        .await
        .unwrap();
    let product = body_json(response).await;
    let product_id = product["id"].as_i64().unwrap();

    // Customer-facing creation needs no session.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "customer_name": "Marie Joseph",
                "lines": [{"product_id": product_id, "quantity": 2}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = body_json(response).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["lines"][0]["price_at_time"].as_f64().unwrap(), 10.0);
    assert_eq!(order["lines"][0]["quantity"], 2);
    let order_id = order["id"].as_i64().unwrap();

    // Validation failures are 400.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({"customer_name": "Jean", "lines": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "customer_name": "Jean",
                "lines": [{"product_id": product_id, "quantity": 0}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A missing product is a conflict, and no order appears afterwards.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "customer_name": "Jean",
                "lines": [{"product_id": 9999, "quantity": 1}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "missing_product");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Status update is gated and accepts any non-empty string.
    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "PATCH",
            &format!("/orders/{order_id}"),
            json!({"status": "completed"}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["status"], "completed");

    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "PATCH",
            &format!("/orders/{order_id}"),
            json!({"status": ""}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "PATCH",
            "/orders/424242",
            json!({"status": "completed"}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn multipart_product_request(uri: &str, cookie: &str) -> Request<Body> {
    let boundary = "XBOUNDARY";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"name\"\r\n\r\n\
         Widget\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"description\"\r\n\r\n\
         A widget\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"price\"\r\n\r\n\
         19.99\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"image\"; filename=\"widget.png\"\r\n\
         Content-Type: image/png\r\n\r\n\
         not-really-a-png\r\n\
         --{boundary}--\r\n"
    );
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_multipart_create_relays_image() {
    let app = test_router(Arc::new(MockRelay)).await;
    let cookie = login(&app).await;

    let response = app
        .clone()
        .oneshot(multipart_product_request("/products", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["image_url"], "https://files.example/mock.png");
    assert_eq!(created["price"].as_f64().unwrap(), 19.99);
}

#[tokio::test]
async fn test_upload_failure_maps_to_bad_gateway() {
    let app = test_router(Arc::new(FailingRelay)).await;
    let cookie = login(&app).await;

    let response = app
        .clone()
        .oneshot(multipart_product_request("/products", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "upload");

    // The failed upload aborted the mutation: nothing was stored.
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_logout_invalidates_session() {
    let app = test_router(Arc::new(MockRelay)).await;
    let cookie = login(&app).await;

    let response = app
        .clone()
        .oneshot(json_request_with_session("POST", "/logout", json!({}), &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request_with_session(
            "POST",
            "/products",
            json!({"name": "Widget", "description": "A widget", "price": 19.99}),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health() {
    let app = test_router(Arc::new(MockRelay)).await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
