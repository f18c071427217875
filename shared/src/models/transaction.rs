//! Transaction Ledger Model

use serde::{Deserialize, Serialize};

/// One settled sale. Written exactly once, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Reference id shown to buyer and operator
    pub ref_id: String,
    pub product_id: String,
    /// Buyer chat id
    pub buyer: i64,
    /// Unit price at time of sale (smallest currency unit)
    pub unit_price: i64,
    pub quantity: u32,
    /// Profit per unit at time of sale
    pub profit_each: i64,
    /// Surcharge code the payment carried
    pub surcharge: u32,
    /// Settlement status, currently always "settled"
    #[serde(default)]
    pub status: String,
    /// Active window start, `YYYY-MM-DD HH:MM:SS` in store-local time
    pub start: String,
    /// Active window end, same format
    pub expire: String,
    /// Sampled duration in days
    pub remaining_days: u32,
    /// Settlement time, `YYYY-MM-DD HH:MM:SS` in store-local time
    pub created_at: String,
}
