//! Request handlers for the back-office REST surface.
//!
//! Product mutations accept either a JSON body or a multipart form; in the
//! multipart case an `image` file part is buffered to a temp file and relayed
//! to the external image host before the product is written, so the stored
//! row only ever carries a resolved public URL.

use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use model::{NewOrder, NewProduct, ProductPatch};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use service::ServiceError;
use tracing::{error, info};

use crate::error::ApiError;
use crate::{session_token, AppState};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

fn require_field(fields: &HashMap<String, String>, name: &str) -> Result<String, ApiError> {
    fields
        .get(name)
        .cloned()
        .ok_or_else(|| ApiError::bad_request(format!("{name} is required")))
}

fn parse_price(raw: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw).map_err(|_| ApiError::bad_request("price must be a number"))
}

/// Drains a product multipart form into its text fields, relaying an `image`
/// file part to the image host along the way.
async fn read_product_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(HashMap<String, String>, Option<String>), ApiError> {
    let mut fields = HashMap::new();
    let mut image_url = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == "image" {
            let file_name = field.file_name().map(str::to_owned);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("malformed image part: {e}")))?;

            // Keep the original extension so the image host serves the right
            // content type.
            let suffix = file_name
                .as_deref()
                .and_then(|n| n.rsplit_once('.'))
                .map(|(_, ext)| format!(".{ext}"))
                .unwrap_or_default();
            let mut tmp = tempfile::Builder::new()
                .suffix(&suffix)
                .tempfile()
                .map_err(|e| {
                    error!("Failed to create upload temp file: {}", e);
                    ApiError::internal("failed to buffer upload")
                })?;
            tmp.write_all(&data).map_err(|e| {
                error!("Failed to write upload temp file: {}", e);
                ApiError::internal("failed to buffer upload")
            })?;

            let url = state.relay.upload(tmp).await.map_err(ServiceError::from)?;
            image_url = Some(url);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("malformed field {name}: {e}")))?;
            fields.insert(name, value);
        }
    }

    Ok((fields, image_url))
}

pub async fn create_product(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ApiError> {
    let new = if is_multipart(req.headers()) {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        let (fields, image_url) = read_product_form(&state, multipart).await?;
        NewProduct {
            name: require_field(&fields, "name")?,
            description: require_field(&fields, "description")?,
            price: parse_price(&require_field(&fields, "price")?)?,
            image_url,
        }
    } else {
        let Json(new): Json<NewProduct> = Json::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        new
    };

    let created = state.products.create(new).await?;
    info!(product_id = created.id, "Product created");
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn list_products(State(state): State<AppState>) -> Result<Response, ApiError> {
    let products = state.products.list().await?;
    Ok(Json(products).into_response())
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let product = state.products.get(id).await?;
    Ok(Json(product).into_response())
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    req: Request,
) -> Result<Response, ApiError> {
    let patch = if is_multipart(req.headers()) {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        let (fields, image_url) = read_product_form(&state, multipart).await?;
        ProductPatch {
            name: fields.get("name").cloned(),
            description: fields.get("description").cloned(),
            price: fields.get("price").map(|p| parse_price(p)).transpose()?,
            image_url,
        }
    } else {
        let Json(patch): Json<ProductPatch> = Json::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        patch
    };

    let updated = state.products.update(id, patch).await?;
    Ok(Json(updated).into_response())
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    state.products.delete(id).await?;
    info!(product_id = id, "Product deleted");
    Ok(Json(json!({ "message": "Product deleted successfully" })).into_response())
}

pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(new) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let order = state.orders.create_order(new).await?;
    info!(order_id = order.id, lines = order.lines.len(), "Order created");
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

pub async fn list_orders(State(state): State<AppState>) -> Result<Response, ApiError> {
    let orders = state.orders.list_orders().await?;
    Ok(Json(orders).into_response())
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let order = state.orders.get_order(id).await?;
    Ok(Json(order).into_response())
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let order = state.orders.update_status(id, &body.status).await?;
    Ok(Json(order).into_response())
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(creds) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let session = state
        .auth
        .authenticate(&creds.username, &creds.password)
        .await?;

    let cookie = format!(
        "session={}; HttpOnly; SameSite=Lax; Path=/",
        session.token
    );
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Logged in" })),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers) {
        state.auth.logout(&token).await?;
    }
    let cookie = "session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0";
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie.to_string())],
        Json(json!({ "message": "Logged out" })),
    )
        .into_response())
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.metrics.registry().gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to convert metrics to UTF-8: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
        }
    }
}
