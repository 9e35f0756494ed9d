//! Line-item reconciler.
//!
//! Transactionally replaces the item set of an invoice: revert the committed
//! set's stock/variant effects, then apply the desired set. Create is the same
//! operation with an empty old set. The caller owns the transaction, so any
//! error here rolls back both phases together.

use crate::error::AppError;
use crate::models::{InvoiceItem, ItemSpec, MovementType, Product, ProductVariant};
use crate::services::database;
use crate::services::inventory::{self, MovementRef};
use crate::services::manifest::{self, SerialManifest};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Serialized-line handling for the apply phase. Create is strict (a variant
/// must be selected); update is permissive because the old lines' variants
/// were just reverted to available, and forcing a re-pick of serials on every
/// edit is not worth it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Strict,
    Permissive,
}

/// What to do with the old item rows after their stock effects are reverted.
/// Delete for update/delete flows; keep for cancellation, where the lines stay
/// as historical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemDisposition {
    Delete,
    Keep,
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    pub items: Vec<InvoiceItem>,
    pub subtotal: i64,
}

/// Full reconciliation: revert the old set, apply the new one.
pub async fn replace_items(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    specs: &[ItemSpec],
    mode: ApplyMode,
) -> Result<ReconcileOutcome, AppError> {
    revert_items(conn, invoice_id, ItemDisposition::Delete).await?;
    apply_items(conn, invoice_id, specs, mode).await
}

/// Revert phase: undo every old item's stock/variant effect.
///
/// Variant identification for serialized lines is tiered: the recorded serial
/// manifest is authoritative; a serial recorded on (or parsed out of) the line
/// itself comes second; last resort is un-selling any currently-sold variants
/// of the product, which may pick the wrong physical unit when several
/// identical unmanifested lines existed. The tier used is surfaced in logs.
#[instrument(skip(conn), fields(invoice_id = %invoice_id))]
pub async fn revert_items(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    disposition: ItemDisposition,
) -> Result<(), AppError> {
    let items = database::get_invoice_items(&mut *conn, invoice_id).await?;

    let mut recorded = manifest::load(&mut *conn, invoice_id).await?;
    if recorded.is_empty() {
        // Historic records embedded the manifest in the invoice notes.
        if let Some(invoice) = database::get_invoice(&mut *conn, invoice_id).await? {
            if let Some(found) = invoice.notes.as_deref().and_then(manifest::decode_from_notes) {
                recorded = found;
            }
        }
    }

    for item in &items {
        let Some(product_id) = item.product_id else {
            continue;
        };

        if database::count_variants(&mut *conn, product_id).await? == 0 {
            inventory::apply(
                conn,
                product_id,
                item.quantity,
                MovementType::In,
                MovementRef::invoice(invoice_id),
            )
            .await?;
            continue;
        }

        let (imeis, tier) = resolve_revert_serials(conn, &mut recorded, item, product_id).await?;
        if imeis.is_empty() {
            warn!(
                product_id = %product_id,
                "No sold variant could be matched to a serialized line; nothing reverted"
            );
            continue;
        }

        info!(tier, product_id = %product_id, count = imeis.len(), "Reverting serialized line");

        for imei in &imeis {
            let flipped = sqlx::query(
                r#"
                UPDATE product_variants SET is_sold = 0
                WHERE product_id = $1 AND imei_serial = $2 AND is_sold = 1
                "#,
            )
            .bind(product_id)
            .bind(imei)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to revert variant: {}", e))
            })?;

            if flipped.rows_affected() > 0 {
                inventory::record_movement(
                    conn,
                    product_id,
                    1,
                    MovementType::In,
                    MovementRef::invoice(invoice_id),
                )
                .await?;
            }
        }
    }

    if disposition == ItemDisposition::Delete {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice items: {}", e))
            })?;
    }
    manifest::clear(&mut *conn, invoice_id).await?;

    Ok(())
}

/// Pick the IMEIs to un-sell for one serialized line, returning them with the
/// tier that produced them.
async fn resolve_revert_serials(
    conn: &mut SqliteConnection,
    recorded: &mut SerialManifest,
    item: &InvoiceItem,
    product_id: Uuid,
) -> Result<(Vec<String>, &'static str), AppError> {
    let needed = item.quantity.max(1) as usize;

    let from_manifest = recorded.take(product_id, needed);
    if !from_manifest.is_empty() {
        return Ok((from_manifest, "manifest"));
    }

    let from_label = item
        .variant_imei
        .clone()
        .or_else(|| manifest::parse_imei_from_label(&item.product_name));
    if let Some(imei) = from_label {
        return Ok((vec![imei], "label"));
    }

    // Lossy: any currently-sold units of the product. Which physical unit the
    // line actually sold is undecidable from quantity alone at this point.
    let sold: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT imei_serial FROM product_variants
        WHERE product_id = $1 AND is_sold = 1
        ORDER BY imei_serial
        LIMIT $2
        "#,
    )
    .bind(product_id)
    .bind(needed as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to list sold variants: {}", e))
    })?;

    Ok((sold, "best_effort"))
}

/// Apply phase: create the desired lines and their stock effects.
#[instrument(skip(conn, specs), fields(invoice_id = %invoice_id, lines = specs.len()))]
pub async fn apply_items(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    specs: &[ItemSpec],
    mode: ApplyMode,
) -> Result<ReconcileOutcome, AppError> {
    let mut items = Vec::with_capacity(specs.len());
    let mut recorded = SerialManifest::default();

    for spec in specs {
        if spec.quantity < 1 {
            return Err(AppError::BadField {
                field: "quantity",
                message: format!("quantity must be at least 1, got {}", spec.quantity),
            });
        }

        let item = match spec.product_id {
            None => build_free_text_item(invoice_id, spec)?,
            Some(product_id) => {
                let product = database::get_product(&mut *conn, product_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("product {}", product_id)))?;

                if database::count_variants(&mut *conn, product_id).await? == 0 {
                    inventory::apply(
                        conn,
                        product_id,
                        spec.quantity,
                        MovementType::Out,
                        MovementRef::invoice(invoice_id),
                    )
                    .await?;
                    build_product_item(invoice_id, spec, &product, None)
                } else {
                    apply_serialized_line(conn, invoice_id, spec, &product, mode, &mut recorded)
                        .await?
                }
            }
        };

        sqlx::query(
            r#"
            INSERT INTO invoice_items (
                item_id, invoice_id, product_id, product_name, quantity, price, total,
                variant_id, variant_imei, external_price, external_profit, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(item.item_id)
        .bind(item.invoice_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.price)
        .bind(item.total)
        .bind(item.variant_id)
        .bind(&item.variant_imei)
        .bind(item.external_price)
        .bind(item.external_profit)
        .bind(item.created_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert item: {}", e)))?;

        items.push(item);
    }

    if !recorded.is_empty() {
        manifest::store(&mut *conn, invoice_id, &recorded).await?;
    }

    let subtotal = items.iter().map(|i| i.total).sum();
    Ok(ReconcileOutcome { items, subtotal })
}

/// Sell one serialized unit: resolve the selected variant, flip it to sold and
/// record the movement. In permissive mode a line without a selector is
/// created unpinned, with no stock effect.
async fn apply_serialized_line(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    spec: &ItemSpec,
    product: &Product,
    mode: ApplyMode,
    recorded: &mut SerialManifest,
) -> Result<InvoiceItem, AppError> {
    if spec.quantity != 1 {
        return Err(AppError::InvalidQuantity {
            product: product.name.clone(),
            quantity: spec.quantity,
        });
    }

    let variant = match resolve_variant(conn, product.product_id, spec).await? {
        Some(variant) => variant,
        None if spec.variant_id.is_none() && spec.variant_imei.is_none() => {
            return match mode {
                ApplyMode::Strict => Err(AppError::VariantNotFound(format!(
                    "no variant selected for serialized product '{}'",
                    product.name
                ))),
                ApplyMode::Permissive => Ok(build_product_item(invoice_id, spec, product, None)),
            };
        }
        None => {
            let selector = spec
                .variant_imei
                .clone()
                .or_else(|| spec.variant_id.map(|id| id.to_string()))
                .unwrap_or_default();
            return Err(AppError::VariantNotFound(format!(
                "'{}' for product '{}'",
                selector, product.name
            )));
        }
    };

    if variant.is_sold {
        return Err(AppError::VariantAlreadySold(variant.imei_serial));
    }

    let flipped = sqlx::query(
        "UPDATE product_variants SET is_sold = 1 WHERE variant_id = $1 AND is_sold = 0",
    )
    .bind(variant.variant_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sell variant: {}", e)))?;

    if flipped.rows_affected() == 0 {
        return Err(AppError::VariantAlreadySold(variant.imei_serial));
    }

    inventory::record_movement(
        conn,
        product.product_id,
        1,
        MovementType::Out,
        MovementRef::invoice(invoice_id),
    )
    .await?;

    recorded.push(product.product_id, &variant.imei_serial);

    Ok(build_product_item(invoice_id, spec, product, Some(&variant)))
}

async fn resolve_variant(
    conn: &mut SqliteConnection,
    product_id: Uuid,
    spec: &ItemSpec,
) -> Result<Option<ProductVariant>, AppError> {
    let query = if spec.variant_id.is_some() {
        sqlx::query_as::<_, ProductVariant>(
            r#"
            SELECT variant_id, product_id, imei_serial, is_sold, created_utc
            FROM product_variants
            WHERE product_id = $1 AND variant_id = $2
            "#,
        )
        .bind(product_id)
        .bind(spec.variant_id)
    } else if spec.variant_imei.is_some() {
        sqlx::query_as::<_, ProductVariant>(
            r#"
            SELECT variant_id, product_id, imei_serial, is_sold, created_utc
            FROM product_variants
            WHERE product_id = $1 AND imei_serial = $2
            "#,
        )
        .bind(product_id)
        .bind(spec.variant_imei.as_deref())
    } else {
        return Ok(None);
    };

    query
        .fetch_optional(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to resolve variant: {}", e)))
}

/// Stock-free line with no product reference.
fn build_free_text_item(invoice_id: Uuid, spec: &ItemSpec) -> Result<InvoiceItem, AppError> {
    let name = spec
        .product_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(AppError::BadField {
            field: "product_name",
            message: "free-text lines need a product_name".to_string(),
        })?;

    let price = spec.price.unwrap_or(0);
    Ok(finish_item(
        invoice_id,
        None,
        name.to_string(),
        spec,
        price,
        None,
    ))
}

/// Line for a real product, snapshotting its current name and price.
fn build_product_item(
    invoice_id: Uuid,
    spec: &ItemSpec,
    product: &Product,
    variant: Option<&ProductVariant>,
) -> InvoiceItem {
    let price = spec.price.unwrap_or(product.price);
    finish_item(
        invoice_id,
        Some(product.product_id),
        product.name.clone(),
        spec,
        price,
        variant,
    )
}

fn finish_item(
    invoice_id: Uuid,
    product_id: Option<Uuid>,
    product_name: String,
    spec: &ItemSpec,
    price: i64,
    variant: Option<&ProductVariant>,
) -> InvoiceItem {
    let total = price * spec.quantity;
    // Computed once at line creation, never implicitly recomputed.
    let external_profit = spec.external_price.map(|ep| total - ep * spec.quantity);

    InvoiceItem {
        item_id: Uuid::new_v4(),
        invoice_id,
        product_id,
        product_name,
        quantity: spec.quantity,
        price,
        total,
        variant_id: variant.map(|v| v.variant_id),
        variant_imei: variant
            .map(|v| v.imei_serial.clone())
            .or_else(|| spec.variant_imei.clone()),
        external_price: spec.external_price,
        external_profit,
        created_utc: Utc::now(),
    }
}
