mod common;

use chrono::{Duration, Utc};
use common::{admin, clerk, draft, free_text_item, item, payment, serialized_item, TestEngine};
use futures::future::join_all;
use invoicing_engine::models::InvoiceStatus;
use invoicing_engine::AppError;
use std::collections::HashSet;

#[tokio::test]
async fn create_fills_in_dates_and_status() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let created = ctx.engine.create(&draft(client, vec![])).await.unwrap();
    let today = Utc::now().date_naive();

    assert_eq!(created.invoice.issue_date, today);
    assert_eq!(created.invoice.due_date, today + Duration::days(4));
    assert_eq!(created.status, InvoiceStatus::Pending);
    assert_eq!(created.invoice.paid_amount, 0);
}

#[tokio::test]
async fn create_rejects_unknown_clients() {
    let ctx = TestEngine::spawn().await;
    let err = ctx
        .engine
        .create(&draft(uuid::Uuid::new_v4(), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn tax_is_applied_on_top_of_the_subtotal() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let mut desired = draft(client, vec![free_text_item("Service", 1, 1000)]);
    desired.tax_rate = 21;
    let created = ctx.engine.create(&desired).await.unwrap();

    assert_eq!(created.invoice.subtotal, 1000);
    assert_eq!(created.invoice.tax_amount, 210);
    assert_eq!(created.invoice.total, 1210);
    assert_eq!(created.invoice.remaining_amount, 1210);
}

#[tokio::test]
async fn delete_restores_stock_and_is_admin_only() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let product = ctx.seed_product("Cable", 500, 5).await;

    let created = ctx
        .engine
        .create(&draft(client, vec![item(product, 3)]))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;
    assert_eq!(ctx.product_quantity(product).await, 2);

    let err = ctx.engine.delete(&clerk(), id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert_eq!(ctx.invoice_count().await, 1);

    ctx.engine.delete(&admin(), id).await.unwrap();
    assert_eq!(ctx.invoice_count().await, 0);
    assert_eq!(ctx.product_quantity(product).await, 5);
    // Seeding IN, sale OUT, restore IN.
    assert_eq!(ctx.movement_count(product, "IN").await, 2);
    assert_eq!(ctx.movement_count(product, "OUT").await, 1);

    let err = ctx.engine.get_invoice(id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn cancel_restores_stock_but_keeps_the_record() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let product = ctx.seed_product("Cable", 500, 5).await;

    let created = ctx
        .engine
        .create(&draft(client, vec![item(product, 2)]))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;
    ctx.engine.add_payment(id, &payment(500)).await.unwrap();

    let cancelled = ctx.engine.cancel(id).await.unwrap();
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
    assert_eq!(ctx.product_quantity(product).await, 5);
    // Lines and payments stay as historical record.
    assert_eq!(cancelled.items.len(), 1);
    assert_eq!(cancelled.payments.len(), 1);

    let err = ctx.engine.cancel(id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn deleting_a_cancelled_invoice_does_not_restore_twice() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let product = ctx.seed_product("Cable", 500, 5).await;

    let created = ctx
        .engine
        .create(&draft(client, vec![item(product, 2)]))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;

    ctx.engine.cancel(id).await.unwrap();
    assert_eq!(ctx.product_quantity(product).await, 5);

    ctx.engine.delete(&admin(), id).await.unwrap();
    assert_eq!(ctx.product_quantity(product).await, 5);
    assert_eq!(ctx.invoice_count().await, 0);
}

#[tokio::test]
async fn cancelled_status_ignores_later_payment_activity() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let created = ctx
        .engine
        .create(&draft(client, vec![free_text_item("Service", 1, 1000)]))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;

    ctx.engine.add_payment(id, &payment(400)).await.unwrap();
    ctx.engine.cancel(id).await.unwrap();
    ctx.engine.reset_payments(id).await.unwrap();

    let projection = ctx.engine.get_invoice(id).await.unwrap();
    assert_eq!(projection.status, InvoiceStatus::Cancelled);
}

#[tokio::test]
async fn duplicate_copies_amounts_but_not_stock_or_payments() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let product = ctx.seed_product("Cable", 500, 5).await;
    let phones = ctx.seed_serialized("Phone", 90000, &["IMEI-A"]).await;

    let created = ctx
        .engine
        .create(&draft(
            client,
            vec![item(product, 2), serialized_item(phones, "IMEI-A")],
        ))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;
    ctx.engine.add_payment(id, &payment(500)).await.unwrap();
    let quantity_before = ctx.product_quantity(product).await;

    let copy = ctx.engine.duplicate(id).await.unwrap();

    assert_ne!(copy.invoice.invoice_id, id);
    assert_ne!(copy.invoice.invoice_number, created.invoice.invoice_number);
    assert_eq!(copy.invoice.total, created.invoice.total);
    assert_eq!(copy.invoice.paid_amount, 0);
    assert_eq!(copy.invoice.remaining_amount, copy.invoice.total);
    assert_eq!(copy.status, InvoiceStatus::Pending);
    assert!(copy.payments.is_empty());

    // No stock effect: quantities and variants untouched, no extra movements.
    assert_eq!(ctx.product_quantity(product).await, quantity_before);
    assert_eq!(ctx.movement_count(product, "OUT").await, 1);
    assert_eq!(copy.items.len(), 2);
    assert!(copy.items.iter().all(|i| i.variant_id.is_none()));
}

#[tokio::test]
async fn overdue_is_projected_not_stored() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let mut desired = draft(client, vec![free_text_item("Service", 1, 1000)]);
    desired.due_date = Some(Utc::now().date_naive() - Duration::days(1));
    let created = ctx.engine.create(&desired).await.unwrap();

    assert_eq!(created.status, InvoiceStatus::Overdue);
    // The stored status still tracks payments only.
    assert_eq!(created.invoice.status, "pending");

    ctx.engine
        .add_payment(created.invoice.invoice_id, &payment(1000))
        .await
        .unwrap();
    let paid = ctx
        .engine
        .get_invoice(created.invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
}

#[tokio::test]
async fn cached_projections_are_dropped_after_each_write() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let created = ctx
        .engine
        .create(&draft(client, vec![free_text_item("Service", 1, 1000)]))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;

    // Warm the cache, then write.
    let before = ctx.engine.get_invoice(id).await.unwrap();
    assert_eq!(before.invoice.paid_amount, 0);

    ctx.engine.add_payment(id, &payment(600)).await.unwrap();

    let after = ctx.engine.get_invoice(id).await.unwrap();
    assert_eq!(after.invoice.paid_amount, 600);
    assert_eq!(after.invoice.remaining_amount, 400);
}

#[tokio::test]
async fn daily_sales_mirror_the_invoice_lines() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let product = ctx.seed_product("Cable", 500, 10).await;

    let created = ctx
        .engine
        .create(&draft(
            client,
            vec![item(product, 2), free_text_item("Service", 1, 1000)],
        ))
        .await
        .unwrap();
    let id = created.invoice.invoice_id;
    assert_eq!(ctx.daily_sale_count(id).await, 2);

    ctx.engine
        .update(id, &draft(client, vec![item(product, 1)]))
        .await
        .unwrap();
    assert_eq!(ctx.daily_sale_count(id).await, 1);

    ctx.engine.delete(&admin(), id).await.unwrap();
    assert_eq!(ctx.daily_sale_count(id).await, 0);
}

#[tokio::test]
async fn delivery_notes_follow_their_invoice() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;
    let created = ctx.engine.create(&draft(client, vec![])).await.unwrap();
    let id = created.invoice.invoice_id;

    let first = ctx.engine.add_delivery_note(id).await.unwrap();
    let second = ctx.engine.add_delivery_note(id).await.unwrap();
    assert_eq!(first.number, "ALB-0001");
    assert_eq!(second.number, "ALB-0002");
    assert_eq!(ctx.engine.delivery_notes(id).await.unwrap().len(), 2);

    ctx.engine.delete(&admin(), id).await.unwrap();
    assert!(ctx.engine.delivery_notes(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_creates_get_unique_numbers() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let desired = draft(client, vec![]);
    let creates = (0..50).map(|_| ctx.engine.create(&desired));
    let results = join_all(creates).await;

    let numbers: HashSet<String> = results
        .into_iter()
        .map(|r| r.unwrap().invoice.invoice_number)
        .collect();
    assert_eq!(numbers.len(), 50);
}
