#![allow(dead_code)]

use chrono::Utc;
use invoicing_engine::models::{
    InvoiceDraft, ItemSpec, PaymentInput, Principal, Role,
};
use invoicing_engine::services::inventory::{self, MovementRef};
use invoicing_engine::{Database, EngineConfig, InvoiceEngine, MemoryCache};
use invoicing_engine::models::MovementType;
use std::sync::Arc;
use uuid::Uuid;

/// Engine over a fresh in-memory database. A single pool connection keeps all
/// handles on the same in-memory instance.
pub struct TestEngine {
    pub engine: InvoiceEngine,
    pub db: Database,
}

impl TestEngine {
    pub async fn spawn() -> Self {
        let db = Database::connect("sqlite::memory:", 1)
            .await
            .expect("connect to in-memory sqlite");
        db.run_migrations().await.expect("run migrations");

        let engine = InvoiceEngine::new(
            db.clone(),
            Arc::new(MemoryCache::new()),
            EngineConfig::default(),
        );
        Self { engine, db }
    }

    pub async fn seed_client(&self, name: &str) -> Uuid {
        let client_id = Uuid::new_v4();
        sqlx::query("INSERT INTO clients (client_id, name, created_utc) VALUES ($1, $2, $3)")
            .bind(client_id)
            .bind(name)
            .bind(Utc::now())
            .execute(self.db.pool())
            .await
            .expect("seed client");
        client_id
    }

    /// Seed a non-serialized product. Initial stock arrives as an IN movement
    /// so the aggregate matches a log replay.
    pub async fn seed_product(&self, name: &str, price: i64, quantity: i64) -> Uuid {
        let product_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO products (product_id, name, price, quantity, created_utc) \
             VALUES ($1, $2, $3, 0, $4)",
        )
        .bind(product_id)
        .bind(name)
        .bind(price)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .expect("seed product");

        if quantity > 0 {
            let mut conn = self.db.pool().acquire().await.expect("acquire");
            inventory::apply(
                &mut conn,
                product_id,
                quantity,
                MovementType::In,
                MovementRef::adjustment(),
            )
            .await
            .expect("seed initial stock");
        }
        product_id
    }

    /// Seed a serialized product with one variant per IMEI. The aggregate
    /// quantity stays zero; stock is the variant sold state.
    pub async fn seed_serialized(&self, name: &str, price: i64, imeis: &[&str]) -> Uuid {
        let product_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO products (product_id, name, price, quantity, created_utc) \
             VALUES ($1, $2, $3, 0, $4)",
        )
        .bind(product_id)
        .bind(name)
        .bind(price)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .expect("seed serialized product");

        for imei in imeis {
            sqlx::query(
                "INSERT INTO product_variants (variant_id, product_id, imei_serial, is_sold, created_utc) \
                 VALUES ($1, $2, $3, 0, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(product_id)
            .bind(imei)
            .bind(Utc::now())
            .execute(self.db.pool())
            .await
            .expect("seed variant");
        }
        product_id
    }

    pub async fn product_quantity(&self, product_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT quantity FROM products WHERE product_id = $1")
            .bind(product_id)
            .fetch_one(self.db.pool())
            .await
            .expect("product quantity")
    }

    pub async fn variant_sold(&self, product_id: Uuid, imei: &str) -> bool {
        sqlx::query_scalar(
            "SELECT is_sold FROM product_variants WHERE product_id = $1 AND imei_serial = $2",
        )
        .bind(product_id)
        .bind(imei)
        .fetch_one(self.db.pool())
        .await
        .expect("variant sold state")
    }

    pub async fn movement_count(&self, product_id: Uuid, direction: &str) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_movements WHERE product_id = $1 AND movement_type = $2",
        )
        .bind(product_id)
        .bind(direction)
        .fetch_one(self.db.pool())
        .await
        .expect("movement count")
    }

    pub async fn daily_sale_count(&self, invoice_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM daily_sales WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_one(self.db.pool())
            .await
            .expect("daily sale count")
    }

    pub async fn invoice_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
            .fetch_one(self.db.pool())
            .await
            .expect("invoice count")
    }
}

pub fn admin() -> Principal {
    Principal {
        id: Uuid::new_v4(),
        role: Role::Admin,
    }
}

pub fn clerk() -> Principal {
    Principal {
        id: Uuid::new_v4(),
        role: Role::Clerk,
    }
}

pub fn draft(client_id: Uuid, items: Vec<ItemSpec>) -> InvoiceDraft {
    InvoiceDraft {
        number: None,
        client_id,
        issue_date: None,
        due_date: None,
        tax_rate: 0,
        warranty_months: None,
        notes: None,
        items,
    }
}

pub fn item(product_id: Uuid, quantity: i64) -> ItemSpec {
    ItemSpec {
        product_id: Some(product_id),
        product_name: None,
        quantity,
        price: None,
        variant_id: None,
        variant_imei: None,
        external_price: None,
    }
}

pub fn serialized_item(product_id: Uuid, imei: &str) -> ItemSpec {
    ItemSpec {
        variant_imei: Some(imei.to_string()),
        ..item(product_id, 1)
    }
}

pub fn free_text_item(name: &str, quantity: i64, price: i64) -> ItemSpec {
    ItemSpec {
        product_id: None,
        product_name: Some(name.to_string()),
        quantity,
        price: Some(price),
        variant_id: None,
        variant_imei: None,
        external_price: None,
    }
}

pub fn payment(amount: i64) -> PaymentInput {
    PaymentInput {
        amount,
        payment_date: None,
        method: "cash".to_string(),
        reference: None,
    }
}
