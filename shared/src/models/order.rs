//! Pending Order Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A pending purchase, keyed by buyer chat id in the store document.
///
/// Exists only between order start and the terminal transition
/// (completed / cancelled / expired / failed); removed from the table
/// on any of those. At most one per buyer at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub product_id: String,
    pub quantity: u32,
    /// Surcharge code bound to this order for payment disambiguation
    pub surcharge: u32,
    /// unit price * quantity + surcharge, the exact payable amount
    pub total: i64,
    /// Display-only reference id for manual reconciliation
    pub ref_id: String,
    /// Creation time, Unix millis
    pub created_at: i64,
    /// Absolute payment deadline, Unix millis
    pub expires_at: i64,
    /// Chat message carrying the payment target (deleted on exit)
    #[serde(default)]
    pub message_id: Option<i64>,
    /// Rendered payment-target file (removed on exit)
    #[serde(default)]
    pub qr_path: Option<PathBuf>,
}

impl Order {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }
}
