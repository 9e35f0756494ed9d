//! Invoice lifecycle engine for a small-business back office.
//!
//! The engine owns invoice numbering, stock-affecting line reconciliation,
//! the payment ledger and the lifecycle operations (create, update, cancel,
//! duplicate, delete) that tie them together transactionally.

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;

pub use config::EngineConfig;
pub use error::AppError;
pub use services::{Database, InvoiceEngine, MemoryCache, ProjectionCache};
