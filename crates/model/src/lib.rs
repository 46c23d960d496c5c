use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A catalog entry managed from the admin dashboard.
///
/// `image_url` stays `None` until an image has been uploaded through the
/// relay; it is never an empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    #[serde(rename = "image_url")]
    pub image_url: Option<String>,
}

/// Input for product creation. The image URL, if any, has already been
/// resolved by the image relay at this point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    #[serde(default, rename = "image_url")]
    pub image_url: Option<String>,
}

/// Partial update for a product. Each field is independently present or
/// absent, so "set price to 0" is distinguishable from "don't touch price".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, rename = "image_url")]
    pub image_url: Option<String>,
}

impl ProductPatch {
    /// True when no field is present. Empty patches are rejected upstream.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.image_url.is_none()
    }
}

/// One product-quantity-price entry belonging to an order.
///
/// `price_at_time` is the price snapshot taken when the order was placed and
/// never tracks later changes to the product's current price. The product
/// reference is weak: the product may have been deleted since.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    #[serde(rename = "product_id")]
    pub product_id: i32,
    pub quantity: i32,
    #[serde(rename = "price_at_time")]
    pub price_at_time: Decimal,
}

/// The order aggregate view: header plus its lines in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i32,
    #[serde(rename = "customer_name")]
    pub customer_name: String,
    #[serde(rename = "customer_phone")]
    pub customer_phone: Option<String>,
    pub status: String,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// The authoritative order total: sum of price_at_time × quantity over
    /// the lines. Never recomputed from current product prices.
    pub fn total(&self) -> Decimal {
        self.lines
            .iter()
            .map(|l| l.price_at_time * Decimal::from(l.quantity))
            .sum()
    }
}

/// One line of an incoming order-creation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewOrderLine {
    #[serde(rename = "product_id")]
    pub product_id: i32,
    pub quantity: i32,
}

/// Incoming order-creation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewOrder {
    #[serde(rename = "customer_name")]
    pub customer_name: String,
    #[serde(default, rename = "customer_phone")]
    pub customer_phone: Option<String>,
    pub lines: Vec<NewOrderLine>,
}

/// A back-office user. Not serializable; the hash never leaves the
/// process.
#[derive(Debug, Clone, PartialEq)]
pub struct Admin {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
}

/// An opaque server-side session issued on login.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub admin_id: i32,
    pub expires_at: DateTime<Utc>,
}
