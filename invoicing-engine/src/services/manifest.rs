//! Serial-number manifest: which IMEIs an invoice sold, per product.
//!
//! The manifest lives in a typed side table keyed by (invoice, product).
//! Historic records embedded it in the invoice notes as a tagged JSON block;
//! that format survives only as a decode shim so old rows stay revertible.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

const NOTES_TAG_OPEN: &str = "[SERIALS]";
const NOTES_TAG_CLOSE: &str = "[/SERIALS]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub product_id: Uuid,
    pub imeis: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialManifest {
    pub entries: Vec<ManifestEntry>,
}

impl SerialManifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an IMEI sold for a product, merging into an existing entry.
    pub fn push(&mut self, product_id: Uuid, imei: &str) {
        match self.entries.iter_mut().find(|e| e.product_id == product_id) {
            Some(entry) => entry.imeis.push(imei.to_string()),
            None => self.entries.push(ManifestEntry {
                product_id,
                imeis: vec![imei.to_string()],
            }),
        }
    }

    /// Remove and return up to `count` IMEIs recorded for a product.
    pub fn take(&mut self, product_id: Uuid, count: usize) -> Vec<String> {
        match self.entries.iter_mut().find(|e| e.product_id == product_id) {
            Some(entry) => {
                let n = count.min(entry.imeis.len());
                entry.imeis.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self).map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to encode manifest: {}", e))
        })
    }

    pub fn decode(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw).map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to decode manifest: {}", e))
        })
    }
}

/// Decode a manifest embedded in free-text notes as a tagged block.
/// Legacy-compatibility shim; new records always use the side table.
pub fn decode_from_notes(notes: &str) -> Option<SerialManifest> {
    let start = notes.find(NOTES_TAG_OPEN)? + NOTES_TAG_OPEN.len();
    let end = notes[start..].find(NOTES_TAG_CLOSE)? + start;
    SerialManifest::decode(notes[start..end].trim()).ok()
}

/// Pull a serial out of an item's display label, e.g. `"Phone X (IMEI: 3567)"`.
/// Second-tier revert fallback for rows that predate the recorded-IMEI column.
pub fn parse_imei_from_label(label: &str) -> Option<String> {
    let lower = label.to_ascii_lowercase();
    let marker = lower.find("imei")? + "imei".len();
    let rest = &label[marker..];
    let start = rest.find(|c: char| c.is_ascii_alphanumeric())?;
    let token: String = rest[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Load an invoice's manifest from the side table; empty when absent.
pub async fn load(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
) -> Result<SerialManifest, AppError> {
    let rows: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT product_id, imeis FROM serial_manifests WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to load manifest: {}", e))
            })?;

    let mut manifest = SerialManifest::default();
    for (product_id, raw) in rows {
        let imeis: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Corrupt manifest row: {}", e))
        })?;
        manifest.entries.push(ManifestEntry { product_id, imeis });
    }
    Ok(manifest)
}

/// Replace an invoice's manifest rows with the given manifest.
pub async fn store(
    conn: &mut SqliteConnection,
    invoice_id: Uuid,
    manifest: &SerialManifest,
) -> Result<(), AppError> {
    clear(&mut *conn, invoice_id).await?;
    for entry in &manifest.entries {
        let raw = serde_json::to_string(&entry.imeis).map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to encode manifest row: {}", e))
        })?;
        sqlx::query(
            "INSERT INTO serial_manifests (invoice_id, product_id, imeis) VALUES ($1, $2, $3)",
        )
        .bind(invoice_id)
        .bind(entry.product_id)
        .bind(raw)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to store manifest: {}", e))
        })?;
    }
    Ok(())
}

/// Delete an invoice's manifest rows.
pub async fn clear(conn: &mut SqliteConnection, invoice_id: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM serial_manifests WHERE invoice_id = $1")
        .bind(invoice_id)
        .execute(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to clear manifest: {}", e)))?;
    Ok(())
}
