//! Product Model

use serde::{Deserialize, Serialize};

/// Active-duration policy for a sold item.
///
/// Either a fixed number of days, or a min/max range sampled once per
/// sale. Products without an explicit policy fall back to 30 days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationPolicy {
    Range { min_days: u32, max_days: u32 },
    Fixed { days: u32 },
}

impl Default for DurationPolicy {
    fn default() -> Self {
        DurationPolicy::Fixed { days: 30 }
    }
}

impl DurationPolicy {
    /// Resolve the policy to a concrete day count for one sale.
    pub fn sample_days<R: rand::Rng>(&self, rng: &mut R) -> u32 {
        match *self {
            DurationPolicy::Fixed { days } => days,
            DurationPolicy::Range { min_days, max_days } => {
                if min_days >= max_days {
                    min_days
                } else {
                    rng.gen_range(min_days..=max_days)
                }
            }
        }
    }
}

/// Product entity
///
/// `stock` is an ordered list of opaque secret records (one per
/// sellable item), consumed front-first at settlement. Stock is never
/// reserved at order creation; see the order manager's settlement
/// re-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Free-text description shown on listings
    #[serde(default)]
    pub desc: String,
    /// Terms and conditions sent to the buyer after delivery
    #[serde(default)]
    pub terms: String,
    /// Unit price in the smallest currency unit, always positive
    pub price: i64,
    /// Profit per unit, recorded into the ledger at settlement
    #[serde(default)]
    pub profit: i64,
    /// Unissued inventory items (FIFO)
    #[serde(default)]
    pub stock: Vec<String>,
    /// Monotonic sold counter
    #[serde(default)]
    pub sold: u64,
    #[serde(default)]
    pub duration: DurationPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_samples_exact_days() {
        let mut rng = rand::thread_rng();
        let policy = DurationPolicy::Fixed { days: 7 };
        assert_eq!(policy.sample_days(&mut rng), 7);
    }

    #[test]
    fn range_policy_samples_within_bounds() {
        let mut rng = rand::thread_rng();
        let policy = DurationPolicy::Range {
            min_days: 25,
            max_days: 30,
        };
        for _ in 0..50 {
            let d = policy.sample_days(&mut rng);
            assert!((25..=30).contains(&d));
        }
    }

    #[test]
    fn duration_policy_json_roundtrip() {
        let fixed: DurationPolicy = serde_json::from_str(r#"{"days": 14}"#).unwrap();
        assert_eq!(fixed, DurationPolicy::Fixed { days: 14 });

        let range: DurationPolicy =
            serde_json::from_str(r#"{"min_days": 25, "max_days": 30}"#).unwrap();
        assert_eq!(
            range,
            DurationPolicy::Range {
                min_days: 25,
                max_days: 30
            }
        );
    }
}
