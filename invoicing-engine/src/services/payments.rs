//! Payment ledger: record payments, derive paid/remaining amounts and status.

use crate::error::AppError;
use crate::models::{Invoice, InvoicePayment, InvoiceStatus, PaymentInput};
use crate::services::database;
use crate::services::metrics::PAYMENT_AMOUNT_TOTAL;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, instrument};
use uuid::Uuid;

/// Status as a pure function of total and paid. Overdue and cancelled are not
/// payment-derived and never come out of here.
pub fn derive_status(total: i64, paid: i64) -> InvoiceStatus {
    if paid == 0 {
        InvoiceStatus::Pending
    } else if paid < total {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Paid
    }
}

/// Record a payment against an invoice. Fails with `InvalidAmount` for
/// non-positive amounts and `OverPayment` when the amount exceeds what is
/// still owed.
#[instrument(skip(conn, input), fields(invoice_id = %invoice_id))]
pub async fn add_payment(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    input: &PaymentInput,
) -> Result<InvoicePayment, AppError> {
    if input.amount <= 0 {
        return Err(AppError::InvalidAmount(input.amount));
    }

    let invoice = database::get_invoice(&mut *conn, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;

    if input.amount > invoice.remaining_amount {
        return Err(AppError::OverPayment {
            amount: input.amount,
            remaining: invoice.remaining_amount,
        });
    }

    let payment = InvoicePayment {
        payment_id: Uuid::new_v4(),
        invoice_id,
        amount: input.amount,
        payment_date: input.payment_date.unwrap_or_else(|| Utc::now().date_naive()),
        method: input.method.clone(),
        reference: input.reference.clone(),
        created_utc: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO invoice_payments (
            payment_id, invoice_id, amount, payment_date, method, reference, created_utc
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(payment.payment_id)
    .bind(payment.invoice_id)
    .bind(payment.amount)
    .bind(payment.payment_date)
    .bind(&payment.method)
    .bind(&payment.reference)
    .bind(payment.created_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;

    recompute_totals(conn, invoice_id).await?;

    PAYMENT_AMOUNT_TOTAL
        .with_label_values(&[payment.method.as_str()])
        .inc_by(payment.amount as f64);

    info!(payment_id = %payment.payment_id, amount = payment.amount, "Payment recorded");

    Ok(payment)
}

/// Remove one payment and recompute derived amounts from what remains.
#[instrument(skip(conn), fields(invoice_id = %invoice_id, payment_id = %payment_id))]
pub async fn delete_payment(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    payment_id: Uuid,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "DELETE FROM invoice_payments WHERE invoice_id = $1 AND payment_id = $2",
    )
    .bind(invoice_id)
    .bind(payment_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete payment: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("payment {}", payment_id)));
    }

    recompute_totals(conn, invoice_id).await?;

    info!("Payment deleted");

    Ok(())
}

/// Remove all payments from an invoice and recompute to zero.
#[instrument(skip(conn), fields(invoice_id = %invoice_id))]
pub async fn reset_payments(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
) -> Result<u64, AppError> {
    database::get_invoice(&mut *conn, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;

    let result = sqlx::query("DELETE FROM invoice_payments WHERE invoice_id = $1")
        .bind(invoice_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reset payments: {}", e)))?;

    recompute_totals(conn, invoice_id).await?;

    info!(removed = result.rows_affected(), "Payments reset");

    Ok(result.rows_affected())
}

/// Recompute paid/remaining/status by resumming the surviving payments.
/// Resumming, not incremental arithmetic, so deletions can never drift.
/// A cancelled invoice keeps its status; only the amounts are refreshed.
pub async fn recompute_totals(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
) -> Result<Invoice, AppError> {
    let invoice = database::get_invoice(&mut *conn, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))?;

    let paid: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM invoice_payments WHERE invoice_id = $1",
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

    let remaining = (invoice.total - paid).max(0);
    let status = if invoice.status == InvoiceStatus::Cancelled.as_str() {
        InvoiceStatus::Cancelled
    } else {
        derive_status(invoice.total, paid)
    };

    sqlx::query(
        r#"
        UPDATE invoices
        SET paid_amount = $2, remaining_amount = $3, status = $4
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(paid)
    .bind(remaining)
    .bind(status.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice totals: {}", e))
    })?;

    database::get_invoice(&mut *conn, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("invoice {}", invoice_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation_rule() {
        assert_eq!(derive_status(1000, 0), InvoiceStatus::Pending);
        assert_eq!(derive_status(1000, 1), InvoiceStatus::PartiallyPaid);
        assert_eq!(derive_status(1000, 999), InvoiceStatus::PartiallyPaid);
        assert_eq!(derive_status(1000, 1000), InvoiceStatus::Paid);
        assert_eq!(derive_status(1000, 1200), InvoiceStatus::Paid);
        // Zero-total invoices with no payments stay pending.
        assert_eq!(derive_status(0, 0), InvoiceStatus::Pending);
    }
}
