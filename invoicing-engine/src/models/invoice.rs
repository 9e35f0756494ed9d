//! Invoice aggregate: header, items, payments and the inbound desired-state payloads.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Invoice status. `Overdue` is a projection-time overlay; the stored status
/// only ever holds the payment-derived states plus `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Invoice header row. All monetary fields are integer currency units.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub status: String,
    pub subtotal: i64,
    pub tax_rate: i64,
    pub tax_amount: i64,
    pub total: i64,
    pub paid_amount: i64,
    pub remaining_amount: i64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub warranty_months: Option<i64>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Line on an invoice. `product_id = NULL` means a free-text/service line with
/// no stock effect. `product_name` and `price` are snapshots taken when the
/// line was created; later product edits never alter them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i64,
    pub price: i64,
    pub total: i64,
    pub variant_id: Option<Uuid>,
    pub variant_imei: Option<String>,
    pub external_price: Option<i64>,
    pub external_profit: Option<i64>,
    pub created_utc: DateTime<Utc>,
}

/// Payment recorded against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoicePayment {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub payment_date: NaiveDate,
    pub method: String,
    pub reference: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Delivery note owned by an invoice, cascade-deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeliveryNote {
    pub delivery_note_id: Uuid,
    pub invoice_id: Uuid,
    pub number: String,
    pub created_utc: DateTime<Utc>,
}

/// Derived daily-sale reporting row, replaced whenever its invoice changes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailySale {
    pub sale_id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub total: i64,
    pub sale_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// Desired state of a single invoice line, as supplied by the CRUD layer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ItemSpec {
    pub product_id: Option<Uuid>,
    /// Required for free-text lines; ignored in favour of the product
    /// snapshot when `product_id` is set.
    pub product_name: Option<String>,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i64,
    /// Unit price override; defaults to the product's current price.
    pub price: Option<i64>,
    pub variant_id: Option<Uuid>,
    pub variant_imei: Option<String>,
    pub external_price: Option<i64>,
}

/// Desired invoice state consumed by the lifecycle orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvoiceDraft {
    /// Number hint; allocated automatically when blank or already taken.
    pub number: Option<String>,
    pub client_id: Uuid,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    /// Tax rate as a whole percentage.
    #[validate(range(min = 0, max = 100, message = "tax_rate must be between 0 and 100"))]
    #[serde(default)]
    pub tax_rate: i64,
    pub warranty_months: Option<i64>,
    pub notes: Option<String>,
    #[validate(nested)]
    pub items: Vec<ItemSpec>,
}

/// Inbound payment payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentInput {
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
    pub payment_date: Option<NaiveDate>,
    pub method: String,
    pub reference: Option<String>,
}

/// Full invoice projection handed to reporting/UI collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceProjection {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<InvoicePayment>,
    /// Effective status including the overdue overlay.
    pub status: InvoiceStatus,
}
