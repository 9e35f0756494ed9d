//! Invoice number allocation.
//!
//! Numbers look like `FAC-0042`. The allocator derives the next free number
//! from what already exists; it never reserves anything, so the caller must
//! re-check uniqueness inside the transaction that creates the invoice and
//! retry on a constraint race.

use crate::error::AppError;
use sqlx::SqliteConnection;
use tracing::instrument;

/// Derive the next invoice number for `prefix`.
///
/// Strict scan first (`PREFIX-<digits>`, case-insensitive); if nothing
/// matches, fall back to the last digit run of any number sharing the prefix;
/// if still nothing, start at 1. The candidate is then checked against the
/// store and bumped until a free number is found.
#[instrument(skip(conn))]
pub async fn next_number(conn: &mut SqliteConnection, prefix: &str) -> Result<String, AppError> {
    let pattern = format!("{}%", prefix);
    let numbers: Vec<String> =
        sqlx::query_scalar("SELECT invoice_number FROM invoices WHERE invoice_number LIKE $1")
            .bind(&pattern)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to scan invoice numbers: {}", e))
            })?;

    let mut seq = highest_suffix(&numbers, prefix).map_or(1, |n| n.saturating_add(1));

    loop {
        let candidate = format_number(prefix, seq);
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM invoices WHERE invoice_number = $1 COLLATE NOCASE)",
        )
        .bind(&candidate)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check invoice number: {}", e))
        })?;

        if !taken {
            return Ok(candidate);
        }
        seq = seq.saturating_add(1);
    }
}

/// Format a sequence number, zero-padded to 4 digits.
pub fn format_number(prefix: &str, seq: u64) -> String {
    format!("{}-{:04}", prefix, seq)
}

/// Check whether a number is already taken (case-insensitive).
pub async fn number_taken(conn: &mut SqliteConnection, number: &str) -> Result<bool, AppError> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM invoices WHERE invoice_number = $1 COLLATE NOCASE)",
    )
    .bind(number)
    .fetch_one(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check invoice number: {}", e)))
}

/// Highest numeric suffix among existing numbers for the prefix.
fn highest_suffix(numbers: &[String], prefix: &str) -> Option<u64> {
    let strict = numbers
        .iter()
        .filter_map(|n| strict_suffix(n, prefix))
        .max();
    if strict.is_some() {
        return strict;
    }
    // Loosest match: any number sharing the prefix, taking its last digit run.
    numbers
        .iter()
        .filter(|n| starts_with_ignore_case(n, prefix))
        .filter_map(|n| last_digit_run(n))
        .max()
}

/// Parse `PREFIX-<digits>` (case-insensitive), returning the numeric suffix.
fn strict_suffix(number: &str, prefix: &str) -> Option<u64> {
    if !starts_with_ignore_case(number, prefix) {
        return None;
    }
    let rest = number.get(prefix.len()..)?;
    let digits = rest.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Last run of consecutive ASCII digits in a string.
fn last_digit_run(s: &str) -> Option<u64> {
    let bytes = s.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    s[start..end].parse().ok()
}
