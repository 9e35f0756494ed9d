//! Inventory ledger: aggregate quantities plus the append-only movement log.

use crate::error::AppError;
use crate::models::{MovementType, StockMovement};
use crate::services::database;
use crate::services::metrics::STOCK_MOVEMENTS_TOTAL;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, instrument};
use uuid::Uuid;

/// What a movement traces back to.
#[derive(Debug, Clone, Copy)]
pub struct MovementRef<'a> {
    pub kind: &'a str,
    pub id: Option<Uuid>,
}

impl<'a> MovementRef<'a> {
    pub fn invoice(invoice_id: Uuid) -> Self {
        Self {
            kind: "invoice",
            id: Some(invoice_id),
        }
    }

    pub fn adjustment() -> Self {
        Self {
            kind: "adjustment",
            id: None,
        }
    }
}

/// Apply a quantity change to a non-serialized product's aggregate and append
/// the movement. `OUT` fails with `InsufficientStock` when the aggregate does
/// not cover the request; `IN` always succeeds. Serialized products are
/// rejected — their stock lives in variant sold state, and movements for them
/// are appended via [`record_movement`] without touching the aggregate.
#[instrument(skip(conn, reference), fields(product_id = %product_id))]
pub async fn apply(
    conn: &mut SqliteConnection,
    product_id: Uuid,
    quantity: i64,
    direction: MovementType,
    reference: MovementRef<'_>,
) -> Result<StockMovement, AppError> {
    if quantity <= 0 {
        return Err(AppError::BadField {
            field: "quantity",
            message: format!("movement quantity must be positive, got {}", quantity),
        });
    }

    let product = database::get_product(&mut *conn, product_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {}", product_id)))?;

    if database::count_variants(&mut *conn, product_id).await? > 0 {
        return Err(AppError::BadField {
            field: "product_id",
            message: format!(
                "product '{}' is serialized; its aggregate quantity is not tracked",
                product.name
            ),
        });
    }

    let delta = match direction {
        MovementType::In => quantity,
        MovementType::Out => {
            if product.quantity < quantity {
                return Err(AppError::InsufficientStock {
                    product: product.name,
                    available: product.quantity,
                    requested: quantity,
                });
            }
            -quantity
        }
    };

    sqlx::query("UPDATE products SET quantity = quantity + $2 WHERE product_id = $1")
        .bind(product_id)
        .bind(delta)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update product stock: {}", e))
        })?;

    let movement = record_movement(conn, product_id, quantity, direction, reference).await?;

    info!(
        movement_id = %movement.movement_id,
        direction = direction.as_str(),
        quantity,
        "Stock movement applied"
    );

    Ok(movement)
}

/// Append a movement without touching the aggregate. Used for serialized
/// units, whose stock is the variant sold state.
pub async fn record_movement(
    conn: &mut SqliteConnection,
    product_id: Uuid,
    quantity: i64,
    direction: MovementType,
    reference: MovementRef<'_>,
) -> Result<StockMovement, AppError> {
    let movement = StockMovement {
        movement_id: Uuid::new_v4(),
        product_id,
        movement_type: direction.as_str().to_string(),
        quantity,
        reference_type: reference.kind.to_string(),
        reference_id: reference.id,
        created_utc: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            movement_id, product_id, movement_type, quantity,
            reference_type, reference_id, created_utc
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(movement.movement_id)
    .bind(movement.product_id)
    .bind(&movement.movement_type)
    .bind(movement.quantity)
    .bind(&movement.reference_type)
    .bind(movement.reference_id)
    .bind(movement.created_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record movement: {}", e)))?;

    STOCK_MOVEMENTS_TOTAL
        .with_label_values(&[direction.as_str()])
        .inc();

    Ok(movement)
}

/// Rebuild a product's aggregate quantity from the movement log,
/// `sum(IN) - sum(OUT)`. Drift correction only; normal writes never call this.
#[instrument(skip(conn), fields(product_id = %product_id))]
pub async fn recompute_quantity(
    conn: &mut SqliteConnection,
    product_id: Uuid,
) -> Result<i64, AppError> {
    let recomputed: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(CASE movement_type WHEN 'IN' THEN quantity ELSE -quantity END), 0)
        FROM stock_movements
        WHERE product_id = $1
        "#,
    )
    .bind(product_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to recompute quantity: {}", e))
    })?;

    sqlx::query("UPDATE products SET quantity = $2 WHERE product_id = $1")
        .bind(product_id)
        .bind(recomputed)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to store recomputed quantity: {}", e))
        })?;

    info!(recomputed, "Aggregate quantity rebuilt from movement log");

    Ok(recomputed)
}

/// Movements for a product, newest first. Exposed for the inventory views.
pub async fn movements_for_product(
    conn: &mut SqliteConnection,
    product_id: Uuid,
) -> Result<Vec<StockMovement>, AppError> {
    sqlx::query_as::<_, StockMovement>(
        r#"
        SELECT movement_id, product_id, movement_type, quantity,
            reference_type, reference_id, created_utc
        FROM stock_movements
        WHERE product_id = $1
        ORDER BY created_utc DESC, movement_id
        "#,
    )
    .bind(product_id)
    .fetch_all(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list movements: {}", e)))
}
