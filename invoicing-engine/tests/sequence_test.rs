mod common;

use chrono::Utc;
use common::{draft, TestEngine};
use invoicing_engine::{error, AppError};
use uuid::Uuid;

#[tokio::test]
async fn numbers_are_sequential_and_padded() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let first = ctx.engine.create(&draft(client, vec![])).await.unwrap();
    let second = ctx.engine.create(&draft(client, vec![])).await.unwrap();
    let third = ctx.engine.create(&draft(client, vec![])).await.unwrap();

    assert_eq!(first.invoice.invoice_number, "FAC-0001");
    assert_eq!(second.invoice.invoice_number, "FAC-0002");
    assert_eq!(third.invoice.invoice_number, "FAC-0003");
}

#[tokio::test]
async fn free_number_hint_is_honoured() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let mut hinted = draft(client, vec![]);
    hinted.number = Some("CUSTOM-9".to_string());
    let created = ctx.engine.create(&hinted).await.unwrap();
    assert_eq!(created.invoice.invoice_number, "CUSTOM-9");
}

#[tokio::test]
async fn taken_hint_falls_back_to_allocation() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let mut hinted = draft(client, vec![]);
    hinted.number = Some("FAC-0001".to_string());
    ctx.engine.create(&hinted).await.unwrap();

    // Same hint again: taken, so a fresh number is allocated past it.
    let second = ctx.engine.create(&hinted).await.unwrap();
    assert_eq!(second.invoice.invoice_number, "FAC-0002");
}

#[tokio::test]
async fn allocation_continues_past_the_highest_existing_number() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let mut hinted = draft(client, vec![]);
    hinted.number = Some("FAC-0041".to_string());
    ctx.engine.create(&hinted).await.unwrap();

    let next = ctx.engine.create(&draft(client, vec![])).await.unwrap();
    assert_eq!(next.invoice.invoice_number, "FAC-0042");
}

#[tokio::test]
async fn losing_a_number_race_is_a_conflict_not_a_database_error() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let created = ctx.engine.create(&draft(client, vec![])).await.unwrap();

    // Re-insert the taken number directly to obtain the constraint error the
    // retry loop sees once every attempt has lost the race.
    let err = sqlx::query(
        r#"
        INSERT INTO invoices (invoice_id, invoice_number, client_id, status,
            issue_date, due_date, created_utc)
        VALUES ($1, $2, $3, 'pending', $4, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&created.invoice.invoice_number)
    .bind(client)
    .bind(Utc::now().date_naive())
    .bind(Utc::now())
    .execute(ctx.db.pool())
    .await
    .unwrap_err();

    let classified = error::number_collision(err, &created.invoice.invoice_number);
    assert!(matches!(classified, AppError::Conflict(_)));
}

#[tokio::test]
async fn blank_hint_is_ignored() {
    let ctx = TestEngine::spawn().await;
    let client = ctx.seed_client("Acme").await;

    let mut hinted = draft(client, vec![]);
    hinted.number = Some("   ".to_string());
    let created = ctx.engine.create(&hinted).await.unwrap();
    assert_eq!(created.invoice.invoice_number, "FAC-0001");
}
