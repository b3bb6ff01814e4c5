//! Child-order quantity distribution
//!
//! Splits an integer order quantity across child orders under one of
//! three deterministic policies. Every policy reconciles the integer
//! remainder explicitly: the generated quantities always sum exactly to
//! the requested total.

use serde::{Deserialize, Serialize};

/// Quantity distribution policy across child orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Equal quantities, remainder spread over the earliest splits
    Even,
    /// Linearly decreasing weights floored at 0.5, remainder on split 0
    FrontLoaded,
    /// Triangular weights peaking at the middle split, remainder there
    Pyramid,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Even => "EVEN",
            Distribution::FrontLoaded => "FRONT_LOADED",
            Distribution::Pyramid => "PYRAMID",
        }
    }
}

/// Split `total` into `splits` integer quantities under the policy.
///
/// The result always has `max(splits, 1)` entries summing exactly to
/// `total`; small totals produce zero-quantity tail splits rather than
/// losing or inventing shares.
pub fn distribute(total: u64, splits: u32, policy: Distribution) -> Vec<u64> {
    let n = splits.max(1) as usize;

    match policy {
        Distribution::Even => {
            let base = total / n as u64;
            let remainder = (total % n as u64) as usize;
            (0..n)
                .map(|i| base + if i < remainder { 1 } else { 0 })
                .collect()
        }
        Distribution::FrontLoaded => {
            // 1.0 down to 0.5 across the splits
            let step = if n > 1 { 0.5 / (n - 1) as f64 } else { 0.0 };
            let weights: Vec<f64> = (0..n).map(|i| (1.0 - step * i as f64).max(0.5)).collect();
            weighted(total, &weights, 0)
        }
        Distribution::Pyramid => {
            let weights: Vec<f64> = (0..n)
                .map(|i| (i.min(n - 1 - i) + 1) as f64)
                .collect();
            weighted(total, &weights, n / 2)
        }
    }
}

/// Floor-allocate by weight, assigning the leftover to `remainder_idx`
fn weighted(total: u64, weights: &[f64], remainder_idx: usize) -> Vec<u64> {
    let sum: f64 = weights.iter().sum();
    let mut quantities: Vec<u64> = weights
        .iter()
        .map(|w| (total as f64 * w / sum).floor() as u64)
        .collect();
    let allocated: u64 = quantities.iter().sum();
    quantities[remainder_idx] += total - allocated;
    quantities
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [Distribution; 3] = [
        Distribution::Even,
        Distribution::FrontLoaded,
        Distribution::Pyramid,
    ];

    #[test]
    fn test_quantity_conservation() {
        // Awkward totals against every split count and policy
        for policy in POLICIES {
            for splits in 1..=10 {
                for total in [1u64, 7, 100, 997, 1000, 123_457] {
                    let quantities = distribute(total, splits, policy);
                    assert_eq!(quantities.len(), splits as usize);
                    assert_eq!(
                        quantities.iter().sum::<u64>(),
                        total,
                        "{:?} x{} lost shares for {}",
                        policy,
                        splits,
                        total
                    );
                }
            }
        }
    }

    #[test]
    fn test_even_spreads_remainder_early() {
        let quantities = distribute(10, 4, Distribution::Even);
        assert_eq!(quantities, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_front_loaded_decreasing() {
        let quantities = distribute(1000, 5, Distribution::FrontLoaded);
        for pair in quantities.windows(2) {
            assert!(pair[0] >= pair[1], "not decreasing: {:?}", quantities);
        }
        assert_eq!(quantities.iter().sum::<u64>(), 1000);
    }

    #[test]
    fn test_pyramid_peaks_in_middle() {
        let quantities = distribute(1000, 5, Distribution::Pyramid);
        let middle = quantities[2];
        assert!(middle >= quantities[0]);
        assert!(middle >= quantities[4]);
    }

    #[test]
    fn test_single_split_takes_everything() {
        for policy in POLICIES {
            assert_eq!(distribute(500, 1, policy), vec![500]);
        }
    }

    #[test]
    fn test_zero_splits_treated_as_one() {
        assert_eq!(distribute(100, 0, Distribution::Even), vec![100]);
    }

    #[test]
    fn test_total_smaller_than_splits() {
        let quantities = distribute(2, 5, Distribution::Even);
        assert_eq!(quantities.iter().sum::<u64>(), 2);
        assert_eq!(quantities.len(), 5);
    }
}
