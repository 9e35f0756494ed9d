//! Domain models for the invoice lifecycle engine.

mod invoice;
mod movement;
mod principal;
mod product;

pub use invoice::{
    DailySale, DeliveryNote, Invoice, InvoiceDraft, InvoiceItem, InvoicePayment,
    InvoiceProjection, InvoiceStatus, ItemSpec, PaymentInput,
};
pub use movement::{MovementType, StockMovement};
pub use principal::{Principal, Role};
pub use product::{Client, Product, ProductVariant};
