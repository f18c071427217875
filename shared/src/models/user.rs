//! User Activity Model

use serde::{Deserialize, Serialize};

/// Per-buyer activity record, updated whenever the buyer starts an
/// order. Used only for reporting; never read by the payment flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserActivity {
    /// First time this buyer was seen, Unix millis
    #[serde(default)]
    pub first_seen: i64,
    /// Most recent activity, Unix millis
    #[serde(default)]
    pub last_seen: i64,
    /// Orders started (not necessarily settled)
    #[serde(default)]
    pub orders_started: u64,
}

impl UserActivity {
    pub fn touch(&mut self, now_millis: i64) {
        if self.first_seen == 0 {
            self.first_seen = now_millis;
        }
        self.last_seen = now_millis;
    }
}
