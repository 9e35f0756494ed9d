//! Stock movement audit log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    In,
    Out,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "OUT" => MovementType::Out,
            _ => MovementType::In,
        }
    }
}

/// Append-only record of a quantity change. Never rewritten; a reversal is a
/// new movement in the opposite direction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockMovement {
    pub movement_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: String,
    pub quantity: i64,
    pub reference_type: String,
    pub reference_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}
