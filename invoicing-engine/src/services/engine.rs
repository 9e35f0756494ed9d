//! Invoice lifecycle orchestrator.
//!
//! Every mutation runs inside a single transaction: number allocation, the
//! item reconciliation with its stock effects and the totals commit together
//! or not at all. Cache invalidation, the stats refresh and the first
//! daily-sale derivation happen after commit and are best-effort; updates
//! replace the daily-sale rows inside the transaction, alongside the item
//! replacement they mirror.

use crate::config::EngineConfig;
use crate::error::{self, AppError};
use crate::models::{
    DeliveryNote, Invoice, InvoiceDraft, InvoiceItem, InvoicePayment, InvoiceProjection,
    InvoiceStatus, PaymentInput, Principal,
};
use crate::services::cache::ProjectionCache;
use crate::services::database::{self, Database};
use crate::services::metrics::{ENGINE_OPS_TOTAL, ENGINE_OP_DURATION, ERRORS_TOTAL};
use crate::services::payments::{self, derive_status};
use crate::services::reconcile::{self, ApplyMode, ItemDisposition};
use crate::services::sequence;
use crate::services::{inventory, manifest};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use prometheus::HistogramTimer;
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Bound on number-allocation retries when concurrent creates race on the
/// unique invoice_number constraint.
const MAX_NUMBER_ATTEMPTS: u32 = 5;

/// Prefix for delivery-note numbers.
const DELIVERY_NOTE_PREFIX: &str = "ALB";

pub struct InvoiceEngine {
    db: Database,
    cache: Arc<dyn ProjectionCache>,
    config: EngineConfig,
}

impl InvoiceEngine {
    pub fn new(db: Database, cache: Arc<dyn ProjectionCache>, config: EngineConfig) -> Self {
        Self { db, cache, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create an invoice from a draft. The number hint is honoured when free;
    /// otherwise a fresh number is allocated. Missing dates default to today
    /// and today plus the configured due window.
    #[instrument(skip(self, draft))]
    pub async fn create(&self, draft: &InvoiceDraft) -> Result<InvoiceProjection, AppError> {
        let timer = start_timer("create");
        let result = self.create_inner(draft).await;
        self.observe("create", timer, result)
    }

    async fn create_inner(&self, draft: &InvoiceDraft) -> Result<InvoiceProjection, AppError> {
        draft.validate()?;

        database::get_client(self.db.pool(), draft.client_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("client {}", draft.client_id)))?;

        let issue_date = draft.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        let due_date = draft
            .due_date
            .unwrap_or(issue_date + ChronoDuration::days(self.config.due_days));

        let mut attempt = 0;
        let (invoice_id, items) = loop {
            attempt += 1;
            let mut tx = self.db.pool().begin().await?;

            let mut number = None;
            if let Some(hint) = normalized_hint(draft.number.as_deref()) {
                if !sequence::number_taken(&mut tx, hint).await? {
                    number = Some(hint.to_string());
                }
            }
            let number = match number {
                Some(number) => number,
                None => sequence::next_number(&mut tx, &self.config.invoice_prefix).await?,
            };

            let invoice_id = Uuid::new_v4();
            let inserted = sqlx::query(
                r#"
                INSERT INTO invoices (
                    invoice_id, invoice_number, client_id, status, subtotal, tax_rate,
                    tax_amount, total, paid_amount, remaining_amount, issue_date, due_date,
                    warranty_months, notes, created_utc
                )
                VALUES ($1, $2, $3, $4, 0, $5, 0, 0, 0, 0, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(invoice_id)
            .bind(&number)
            .bind(draft.client_id)
            .bind(InvoiceStatus::Pending.as_str())
            .bind(draft.tax_rate)
            .bind(issue_date)
            .bind(due_date)
            .bind(draft.warranty_months)
            .bind(&draft.notes)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                // A concurrent create took the same number; the constraint is
                // the arbiter. Retry with a fresh allocation.
                if error::is_unique_violation(&err) && attempt < MAX_NUMBER_ATTEMPTS {
                    warn!(number = %number, attempt, "Invoice number race, retrying");
                    continue;
                }
                return Err(error::number_collision(err, &number));
            }

            let outcome =
                reconcile::apply_items(&mut tx, invoice_id, &draft.items, ApplyMode::Strict)
                    .await?;
            store_totals(&mut tx, invoice_id, outcome.subtotal, draft.tax_rate).await?;

            tx.commit().await?;
            info!(invoice_id = %invoice_id, number = %number, "Invoice created");
            break (invoice_id, outcome.items);
        };

        // Reporting rows are derived after the commit; losing them costs a
        // report entry, never the invoice.
        if let Err(err) = self.refresh_daily_sales(invoice_id, issue_date, &items).await {
            warn!(invoice_id = %invoice_id, error = %err, "Daily sale derivation failed");
        }
        self.after_write(invoice_id).await;
        self.load_projection(invoice_id).await
    }

    /// Replace an invoice's desired state: items are reconciled permissively,
    /// scalars are overwritten, totals and status are recomputed from the
    /// surviving payments.
    #[instrument(skip(self, draft), fields(invoice_id = %invoice_id))]
    pub async fn update(
        &self,
        invoice_id: Uuid,
        draft: &InvoiceDraft,
    ) -> Result<InvoiceProjection, AppError> {
        let timer = start_timer("update");
        let result = self.update_inner(invoice_id, draft).await;
        self.observe("update", timer, result)
    }

    async fn update_inner(
        &self,
        invoice_id: Uuid,
        draft: &InvoiceDraft,
    ) -> Result<InvoiceProjection, AppError> {
        draft.validate()?;

        let existing = database::get_invoice(self.db.pool(), invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;
        database::get_client(self.db.pool(), draft.client_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("client {}", draft.client_id)))?;

        let issue_date = draft.issue_date.unwrap_or(existing.issue_date);
        let due_date = draft.due_date.unwrap_or(existing.due_date);

        let mut tx = self.db.pool().begin().await?;

        let mut number = existing.invoice_number.clone();
        if let Some(hint) = normalized_hint(draft.number.as_deref()) {
            if !hint.eq_ignore_ascii_case(&existing.invoice_number)
                && !sequence::number_taken(&mut tx, hint).await?
            {
                number = hint.to_string();
            }
        }

        let outcome =
            reconcile::replace_items(&mut tx, invoice_id, &draft.items, ApplyMode::Permissive)
                .await?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET invoice_number = $2, client_id = $3, tax_rate = $4, issue_date = $5,
                due_date = $6, warranty_months = $7, notes = $8
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(&number)
        .bind(draft.client_id)
        .bind(draft.tax_rate)
        .bind(issue_date)
        .bind(due_date)
        .bind(draft.warranty_months)
        .bind(&draft.notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        store_totals(&mut tx, invoice_id, outcome.subtotal, draft.tax_rate).await?;
        payments::recompute_totals(&mut tx, invoice_id).await?;
        derive_daily_sales(&mut tx, invoice_id, issue_date, &outcome.items).await?;

        tx.commit().await?;
        info!(invoice_id = %invoice_id, "Invoice updated");

        self.after_write(invoice_id).await;
        self.load_projection(invoice_id).await
    }

    /// Delete an invoice and everything it owns, restoring stock. Admin only.
    /// A cancelled invoice's stock was already restored at cancellation, so
    /// only its rows are removed.
    #[instrument(skip(self, principal), fields(invoice_id = %invoice_id))]
    pub async fn delete(&self, principal: &Principal, invoice_id: Uuid) -> Result<(), AppError> {
        let timer = start_timer("delete");
        let result = self.delete_inner(principal, invoice_id).await;
        self.observe("delete", timer, result)
    }

    async fn delete_inner(&self, principal: &Principal, invoice_id: Uuid) -> Result<(), AppError> {
        if !principal.is_admin() {
            return Err(AppError::Forbidden(
                "only admins can delete invoices".to_string(),
            ));
        }

        let invoice = database::get_invoice(self.db.pool(), invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;

        let mut tx = self.db.pool().begin().await?;

        if invoice.status == InvoiceStatus::Cancelled.as_str() {
            sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
                .bind(invoice_id)
                .execute(&mut *tx)
                .await?;
            manifest::clear(&mut tx, invoice_id).await?;
        } else {
            reconcile::revert_items(&mut tx, invoice_id, ItemDisposition::Delete).await?;
        }

        for table in ["delivery_notes", "daily_sales", "invoice_payments"] {
            sqlx::query(&format!("DELETE FROM {} WHERE invoice_id = $1", table))
                .bind(invoice_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(invoice_id = %invoice_id, number = %invoice.invoice_number, "Invoice deleted");

        self.after_write(invoice_id).await;
        Ok(())
    }

    /// Cancel an invoice: stock and variants are restored but the lines and
    /// payments stay as historical record. The status pins to cancelled and no
    /// longer follows payments.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn cancel(&self, invoice_id: Uuid) -> Result<InvoiceProjection, AppError> {
        let timer = start_timer("cancel");
        let result = self.cancel_inner(invoice_id).await;
        self.observe("cancel", timer, result)
    }

    async fn cancel_inner(&self, invoice_id: Uuid) -> Result<InvoiceProjection, AppError> {
        let invoice = database::get_invoice(self.db.pool(), invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;
        if invoice.status == InvoiceStatus::Cancelled.as_str() {
            return Err(AppError::Conflict(format!(
                "invoice {} is already cancelled",
                invoice.invoice_number
            )));
        }

        let mut tx = self.db.pool().begin().await?;
        reconcile::revert_items(&mut tx, invoice_id, ItemDisposition::Keep).await?;
        sqlx::query("UPDATE invoices SET status = $2 WHERE invoice_id = $1")
            .bind(invoice_id)
            .bind(InvoiceStatus::Cancelled.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(invoice_id = %invoice_id, "Invoice cancelled");

        self.after_write(invoice_id).await;
        self.load_projection(invoice_id).await
    }

    /// Duplicate an invoice: fresh number and dates, amounts copied verbatim,
    /// no payments. Lines are copied without pinning variants and without any
    /// stock effect; the duplicate is a quote-like document until edited.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn duplicate(&self, invoice_id: Uuid) -> Result<InvoiceProjection, AppError> {
        let timer = start_timer("duplicate");
        let result = self.duplicate_inner(invoice_id).await;
        self.observe("duplicate", timer, result)
    }

    async fn duplicate_inner(&self, invoice_id: Uuid) -> Result<InvoiceProjection, AppError> {
        let source = database::get_invoice(self.db.pool(), invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;
        let source_items = database::get_invoice_items(self.db.pool(), invoice_id).await?;

        let issue_date = Utc::now().date_naive();
        let due_date = issue_date + ChronoDuration::days(self.config.due_days);

        let mut attempt = 0;
        let copy_id = loop {
            attempt += 1;
            let mut tx = self.db.pool().begin().await?;

            let number = sequence::next_number(&mut tx, &self.config.invoice_prefix).await?;
            let copy_id = Uuid::new_v4();

            let inserted = sqlx::query(
                r#"
                INSERT INTO invoices (
                    invoice_id, invoice_number, client_id, status, subtotal, tax_rate,
                    tax_amount, total, paid_amount, remaining_amount, issue_date, due_date,
                    warranty_months, notes, created_utc
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(copy_id)
            .bind(&number)
            .bind(source.client_id)
            .bind(InvoiceStatus::Pending.as_str())
            .bind(source.subtotal)
            .bind(source.tax_rate)
            .bind(source.tax_amount)
            .bind(source.total)
            .bind(issue_date)
            .bind(due_date)
            .bind(source.warranty_months)
            .bind(&source.notes)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                if error::is_unique_violation(&err) && attempt < MAX_NUMBER_ATTEMPTS {
                    warn!(number = %number, attempt, "Invoice number race, retrying");
                    continue;
                }
                return Err(error::number_collision(err, &number));
            }

            for item in &source_items {
                sqlx::query(
                    r#"
                    INSERT INTO invoice_items (
                        item_id, invoice_id, product_id, product_name, quantity, price, total,
                        variant_id, variant_imei, external_price, external_profit, created_utc
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $9, $10, $11)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(copy_id)
                .bind(item.product_id)
                .bind(&item.product_name)
                .bind(item.quantity)
                .bind(item.price)
                .bind(item.total)
                .bind(&item.variant_imei)
                .bind(item.external_price)
                .bind(item.external_profit)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            info!(copy_id = %copy_id, number = %number, "Invoice duplicated");
            break copy_id;
        };

        self.after_write(copy_id).await;
        self.load_projection(copy_id).await
    }

    /// Record a payment against an invoice.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn add_payment(
        &self,
        invoice_id: Uuid,
        input: &PaymentInput,
    ) -> Result<InvoicePayment, AppError> {
        let timer = start_timer("add_payment");
        let result = async {
            let mut tx = self.db.pool().begin().await?;
            let payment = payments::add_payment(&mut tx, invoice_id, input).await?;
            tx.commit().await?;
            Ok(payment)
        }
        .await;
        if result.is_ok() {
            self.after_write(invoice_id).await;
        }
        self.observe("add_payment", timer, result)
    }

    /// Remove one payment from an invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, payment_id = %payment_id))]
    pub async fn delete_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = start_timer("delete_payment");
        let result = async {
            let mut tx = self.db.pool().begin().await?;
            payments::delete_payment(&mut tx, invoice_id, payment_id).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;
        if result.is_ok() {
            self.after_write(invoice_id).await;
        }
        self.observe("delete_payment", timer, result)
    }

    /// Remove all payments from an invoice, returning how many were removed.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn reset_payments(&self, invoice_id: Uuid) -> Result<u64, AppError> {
        let timer = start_timer("reset_payments");
        let result = async {
            let mut tx = self.db.pool().begin().await?;
            let removed = payments::reset_payments(&mut tx, invoice_id).await?;
            tx.commit().await?;
            Ok(removed)
        }
        .await;
        if result.is_ok() {
            self.after_write(invoice_id).await;
        }
        self.observe("reset_payments", timer, result)
    }

    /// Issue a delivery note for an invoice. Numbered from its own sequence,
    /// owned by the invoice and removed with it.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn add_delivery_note(&self, invoice_id: Uuid) -> Result<DeliveryNote, AppError> {
        let timer = start_timer("add_delivery_note");
        let result = self.add_delivery_note_inner(invoice_id).await;
        self.observe("add_delivery_note", timer, result)
    }

    async fn add_delivery_note_inner(&self, invoice_id: Uuid) -> Result<DeliveryNote, AppError> {
        database::get_invoice(self.db.pool(), invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;

        let mut tx = self.db.pool().begin().await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_notes")
            .fetch_one(&mut *tx)
            .await?;
        let mut seq = existing as u64 + 1;
        let number = loop {
            let candidate = sequence::format_number(DELIVERY_NOTE_PREFIX, seq);
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM delivery_notes WHERE number = $1)",
            )
            .bind(&candidate)
            .fetch_one(&mut *tx)
            .await?;
            if !taken {
                break candidate;
            }
            seq += 1;
        };

        let note = DeliveryNote {
            delivery_note_id: Uuid::new_v4(),
            invoice_id,
            number,
            created_utc: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO delivery_notes (delivery_note_id, invoice_id, number, created_utc) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(note.delivery_note_id)
        .bind(note.invoice_id)
        .bind(&note.number)
        .bind(note.created_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(number = %note.number, "Delivery note issued");
        Ok(note)
    }

    /// Delivery notes issued for an invoice, oldest first.
    pub async fn delivery_notes(&self, invoice_id: Uuid) -> Result<Vec<DeliveryNote>, AppError> {
        sqlx::query_as::<_, DeliveryNote>(
            r#"
            SELECT delivery_note_id, invoice_id, number, created_utc
            FROM delivery_notes
            WHERE invoice_id = $1
            ORDER BY created_utc, delivery_note_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list delivery notes: {}", e))
        })
    }

    /// Full invoice projection, served from cache when fresh.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceProjection, AppError> {
        let key = format!("invoice:{}", invoice_id);
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(projection) = serde_json::from_str::<InvoiceProjection>(&cached) {
                return Ok(projection);
            }
        }

        let projection = self.load_projection(invoice_id).await?;
        if let Ok(raw) = serde_json::to_string(&projection) {
            self.cache
                .set(&key, raw, Duration::from_secs(self.config.cache_ttl_secs));
        }
        Ok(projection)
    }

    /// Rebuild a product's aggregate quantity from its movement log.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn recompute_stock(&self, product_id: Uuid) -> Result<i64, AppError> {
        let mut tx = self.db.pool().begin().await?;
        let quantity = inventory::recompute_quantity(&mut tx, product_id).await?;
        tx.commit().await?;
        Ok(quantity)
    }

    async fn refresh_daily_sales(
        &self,
        invoice_id: Uuid,
        sale_date: NaiveDate,
        items: &[InvoiceItem],
    ) -> Result<(), AppError> {
        let mut conn = self.db.pool().acquire().await?;
        derive_daily_sales(&mut conn, invoice_id, sale_date, items).await
    }

    async fn load_projection(&self, invoice_id: Uuid) -> Result<InvoiceProjection, AppError> {
        let invoice = database::get_invoice(self.db.pool(), invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;
        let items = database::get_invoice_items(self.db.pool(), invoice_id).await?;
        let payments = database::get_invoice_payments(self.db.pool(), invoice_id).await?;
        let status = effective_status(&invoice, Utc::now().date_naive());

        Ok(InvoiceProjection {
            invoice,
            items,
            payments,
            status,
        })
    }

    /// Post-commit bookkeeping: drop stale projections and refresh the stats
    /// snapshot. Failures are logged, never surfaced; the write already
    /// committed.
    async fn after_write(&self, invoice_id: Uuid) {
        self.cache.invalidate(&format!("invoice:{}", invoice_id));
        if let Err(err) = self.refresh_stats().await {
            warn!(error = %err, "Stats refresh failed");
        }
    }

    /// Recompute the cached stats snapshot. Cancelled invoices are excluded.
    async fn refresh_stats(&self) -> Result<(), AppError> {
        let (count, billed, paid, outstanding): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(total), 0), COALESCE(SUM(paid_amount), 0),
                COALESCE(SUM(remaining_amount), 0)
            FROM invoices
            WHERE status != 'cancelled'
            "#,
        )
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to compute stats: {}", e)))?;

        let snapshot = serde_json::json!({
            "invoices": count,
            "billed": billed,
            "paid": paid,
            "outstanding": outstanding,
        });
        self.cache.set(
            "stats:summary",
            snapshot.to_string(),
            Duration::from_secs(self.config.cache_ttl_secs),
        );
        Ok(())
    }

    fn observe<T>(
        &self,
        operation: &str,
        timer: HistogramTimer,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        timer.observe_duration();
        match &result {
            Ok(_) => ENGINE_OPS_TOTAL
                .with_label_values(&[operation, "ok"])
                .inc(),
            Err(err) => {
                ENGINE_OPS_TOTAL
                    .with_label_values(&[operation, "error"])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
            }
        }
        result
    }
}

/// Effective status for a projection: cancelled is pinned, otherwise the
/// payment-derived status with the overdue overlay when past due and unpaid.
pub fn effective_status(invoice: &Invoice, today: NaiveDate) -> InvoiceStatus {
    if invoice.status == InvoiceStatus::Cancelled.as_str() {
        return InvoiceStatus::Cancelled;
    }
    let derived = derive_status(invoice.total, invoice.paid_amount);
    if derived != InvoiceStatus::Paid && invoice.remaining_amount > 0 && invoice.due_date < today {
        InvoiceStatus::Overdue
    } else {
        derived
    }
}

fn normalized_hint(hint: Option<&str>) -> Option<&str> {
    hint.map(str::trim).filter(|h| !h.is_empty())
}

fn start_timer(operation: &str) -> HistogramTimer {
    ENGINE_OP_DURATION
        .with_label_values(&[operation])
        .start_timer()
}

/// Store subtotal/tax/total derived from a reconciled item set. Tax is integer
/// floor of `subtotal * rate / 100`; remaining is corrected afterwards by the
/// payment recompute where payments exist.
async fn store_totals(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    subtotal: i64,
    tax_rate: i64,
) -> Result<(), AppError> {
    let tax_amount = subtotal * tax_rate / 100;
    let total = subtotal + tax_amount;

    sqlx::query(
        r#"
        UPDATE invoices
        SET subtotal = $2, tax_amount = $3, total = $4,
            remaining_amount = $4 - paid_amount
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(subtotal)
    .bind(tax_amount)
    .bind(total)
    .execute(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to store totals: {}", e)))?;
    Ok(())
}

/// Replace the derived daily-sale rows for an invoice, one row per line.
async fn derive_daily_sales(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    sale_date: NaiveDate,
    items: &[InvoiceItem],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM daily_sales WHERE invoice_id = $1")
        .bind(invoice_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to clear daily sales: {}", e))
        })?;

    for item in items {
        sqlx::query(
            r#"
            INSERT INTO daily_sales (
                sale_id, invoice_id, product_id, product_name, quantity,
                unit_price, total, sale_date, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.price)
        .bind(item.total)
        .bind(sale_date)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to derive daily sale: {}", e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(status: &str, total: i64, paid: i64, due: NaiveDate) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "FAC-0001".to_string(),
            client_id: Uuid::new_v4(),
            status: status.to_string(),
            subtotal: total,
            tax_rate: 0,
            tax_amount: 0,
            total,
            paid_amount: paid,
            remaining_amount: total - paid,
            issue_date: due,
            due_date: due,
            warranty_months: None,
            notes: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn overdue_is_an_overlay() {
        let due = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let unpaid = invoice("pending", 1000, 0, due);
        assert_eq!(effective_status(&unpaid, due), InvoiceStatus::Pending);
        assert_eq!(effective_status(&unpaid, after), InvoiceStatus::Overdue);

        let partial = invoice("partially_paid", 1000, 400, due);
        assert_eq!(effective_status(&partial, after), InvoiceStatus::Overdue);

        let paid = invoice("paid", 1000, 1000, due);
        assert_eq!(effective_status(&paid, after), InvoiceStatus::Paid);

        let cancelled = invoice("cancelled", 1000, 0, due);
        assert_eq!(effective_status(&cancelled, after), InvoiceStatus::Cancelled);
    }
}
