//! Payment matcher
//!
//! Scans a feed snapshot for an inbound mutation that settles an
//! order. Matching is on amount within a fixed tolerance; the order
//! reference may or may not appear in the mutation description, so a
//! reference hit is logged for audit but never required.

use tracing::debug;

use super::feed::Mutation;

/// Providers occasionally report an amount off by a rounding step.
const AMOUNT_TOLERANCE: i64 = 2;

/// Find the first inbound mutation whose amount is within
/// [`AMOUNT_TOLERANCE`] of the expected total.
pub fn find_match<'a>(
    mutations: &'a [Mutation],
    expected_total: i64,
    ref_id: &str,
) -> Option<&'a Mutation> {
    let ref_lower = ref_id.to_lowercase();
    mutations.iter().find(|m| {
        if !m.is_inbound() {
            return false;
        }
        let delta = (m.amount - expected_total).abs();
        if delta > AMOUNT_TOLERANCE {
            return false;
        }
        let ref_hit = m.description.contains(&ref_lower);
        debug!(
            amount = m.amount,
            expected = expected_total,
            delta,
            ref_hit,
            "Mutation matched on amount"
        );
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(amount: i64, description: &str) -> Mutation {
        Mutation {
            amount,
            direction: "in".to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn exact_amount_matches() {
        let feed = vec![inbound(10_410, "transfer")];
        assert!(find_match(&feed, 10_410, "ABCDE").is_some());
    }

    #[test]
    fn tolerance_allows_small_delta() {
        let feed = vec![inbound(10_412, ""), inbound(10_408, "")];
        assert!(find_match(&feed, 10_410, "X").is_some());
        assert!(find_match(&[inbound(10_413, "")], 10_410, "X").is_none());
    }

    #[test]
    fn outbound_mutations_never_match() {
        let feed = vec![Mutation {
            amount: 10_410,
            direction: "out".to_string(),
            description: String::new(),
        }];
        assert!(find_match(&feed, 10_410, "X").is_none());
    }

    #[test]
    fn reference_miss_still_matches_on_amount() {
        let feed = vec![inbound(25_030, "no reference here")];
        assert!(find_match(&feed, 25_030, "DEADBEEF").is_some());
    }

    #[test]
    fn first_matching_row_wins() {
        let feed = vec![
            inbound(1_000, "first"),
            inbound(25_030, "second"),
            inbound(25_031, "third"),
        ];
        let hit = find_match(&feed, 25_030, "X").unwrap();
        assert_eq!(hit.description, "second");
    }
}
