//! Product and serialized variant models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Product row. `quantity` is the aggregate stock level and is only meaningful
/// for non-serialized products; once a product has variants its stock is
/// tracked exclusively through their sold state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub name: String,
    pub price: i64,
    pub quantity: i64,
    pub created_utc: DateTime<Utc>,
}

/// A serialized physical unit of a product. `imei_serial` is immutable and
/// unique within the product; `is_sold` flips as invoices sell and revert it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductVariant {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub imei_serial: String,
    pub is_sold: bool,
    pub created_utc: DateTime<Utc>,
}

/// Minimal referenced client entity; invoice creation validates it exists.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}
