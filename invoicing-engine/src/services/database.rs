//! Database connection pool and shared row-fetch helpers.
//!
//! Fetch helpers are generic over the executor so the same query runs against
//! the pool for reads and against an open transaction inside a mutation.

use crate::error::AppError;
use crate::models::{Client, Invoice, InvoiceItem, InvoicePayment, Product, ProductVariant};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new connection pool. `busy_timeout` bounds lock waits so a
    /// contended write surfaces as an error instead of blocking indefinitely.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        info!(max_connections, "Connecting to SQLite");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("SQLite connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Get a client by ID.
pub async fn get_client<'e, E>(executor: E, client_id: Uuid) -> Result<Option<Client>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Client>(
        "SELECT client_id, name, created_utc FROM clients WHERE client_id = $1",
    )
    .bind(client_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))
}

/// Get an invoice by ID.
pub async fn get_invoice<'e, E>(executor: E, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, invoice_number, client_id, status, subtotal, tax_rate, tax_amount,
            total, paid_amount, remaining_amount, issue_date, due_date, warranty_months,
            notes, created_utc
        FROM invoices
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))
}

/// Get the items belonging to an invoice, in creation order.
pub async fn get_invoice_items<'e, E>(
    executor: E,
    invoice_id: Uuid,
) -> Result<Vec<InvoiceItem>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT item_id, invoice_id, product_id, product_name, quantity, price, total,
            variant_id, variant_imei, external_price, external_profit, created_utc
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY created_utc, item_id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice items: {}", e)))
}

/// Get the payments recorded against an invoice, oldest first.
pub async fn get_invoice_payments<'e, E>(
    executor: E,
    invoice_id: Uuid,
) -> Result<Vec<InvoicePayment>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, InvoicePayment>(
        r#"
        SELECT payment_id, invoice_id, amount, payment_date, method, reference, created_utc
        FROM invoice_payments
        WHERE invoice_id = $1
        ORDER BY created_utc, payment_id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payments: {}", e)))
}

/// Get a product by ID.
pub async fn get_product<'e, E>(executor: E, product_id: Uuid) -> Result<Option<Product>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Product>(
        "SELECT product_id, name, price, quantity, created_utc FROM products WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get product: {}", e)))
}

/// Count the variants of a product. A non-zero count marks it as serialized.
pub async fn count_variants<'e, E>(executor: E, product_id: Uuid) -> Result<i64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM product_variants WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_one(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count variants: {}", e)))
}

/// Get the variants of a product.
pub async fn get_variants<'e, E>(
    executor: E,
    product_id: Uuid,
) -> Result<Vec<ProductVariant>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, ProductVariant>(
        r#"
        SELECT variant_id, product_id, imei_serial, is_sold, created_utc
        FROM product_variants
        WHERE product_id = $1
        ORDER BY imei_serial
        "#,
    )
    .bind(product_id)
    .fetch_all(executor)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get variants: {}", e)))
}
