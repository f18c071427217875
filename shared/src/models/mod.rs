//! Store document models

mod order;
mod product;
mod transaction;
mod user;

pub use order::Order;
pub use product::{DurationPolicy, Product};
pub use transaction::LedgerEntry;
pub use user::UserActivity;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Credentials for the external transaction feed.
///
/// All three fields must be present before an order can be started;
/// an empty field counts as missing (the operator fills these
/// into the store file by hand).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub account_id: String,
}

impl FeedCredentials {
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.auth_token.is_empty() && !self.account_id.is_empty()
    }
}

/// The whole store document: one JSON file, read whole at startup,
/// replaced whole on each coordinated save.
///
/// Every section defaults to empty so a partial or brand-new file
/// deserializes cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Product catalog, keyed by product id
    #[serde(default)]
    pub products: HashMap<String, Product>,
    /// Pending orders, keyed by buyer chat id (at most one per buyer)
    #[serde(default)]
    pub orders: HashMap<i64, Order>,
    /// Settlement ledger, append-only
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    /// User activity registry, keyed by buyer chat id
    #[serde(default)]
    pub users: HashMap<i64, UserActivity>,
    /// Transaction feed credentials
    #[serde(default)]
    pub feed: FeedCredentials,
}
