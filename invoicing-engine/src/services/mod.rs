pub mod cache;
pub mod database;
pub mod engine;
pub mod inventory;
pub mod manifest;
pub mod metrics;
pub mod payments;
pub mod reconcile;
pub mod sequence;

pub use cache::{MemoryCache, ProjectionCache};
pub use database::Database;
pub use engine::InvoiceEngine;
