//! Greedy bucket merge/split selection
//!
//! Pure ranking functions over a side's buckets, kept apart from the
//! chart's mutation code so the heuristics can be tested in isolation.
//! Both are local choices: they pick the next step, not an optimal layout.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use super::ChartBucket;

/// Upper bound on split attempts per refinement pass.
pub const MAX_SPLIT_ATTEMPTS: usize = 5;

/// Combined price span of buckets `i` and `i + 1`.
fn pair_span(buckets: &[ChartBucket], i: usize) -> Decimal {
    (buckets[i].price_start - buckets[i + 1].price_finish).abs()
}

/// Pick the adjacent pair to merge: index `i` means bucket `i + 1` folds
/// into bucket `i`.
///
/// The best bucket (index 0) is never merged. Among the remaining pairs
/// the one with the smallest combined span wins; ties go to the earliest
/// index. Returns `None` with fewer than three buckets.
pub fn merge_candidate(buckets: &[ChartBucket]) -> Option<usize> {
    if buckets.len() < 3 {
        return None;
    }

    let mut best = 1;
    let mut best_span = pair_span(buckets, 1);
    for i in 2..buckets.len() - 1 {
        let span = pair_span(buckets, i);
        if span < best_span {
            best = i;
            best_span = span;
        }
    }
    Some(best)
}

/// Rank buckets for splitting: larger quantity first, then wider span.
///
/// Returns at most `limit` indices. Equal buckets keep their order.
pub fn split_candidates(buckets: &[ChartBucket], limit: usize) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..buckets.len()).collect();
    ranked.sort_by(|&a, &b| {
        let (a, b) = (&buckets[a], &buckets[b]);
        match b.quantity.cmp(&a.quantity) {
            Ordering::Equal => b.span().cmp(&a.span()),
            other => other,
        }
    });
    ranked.truncate(limit);
    ranked
}
