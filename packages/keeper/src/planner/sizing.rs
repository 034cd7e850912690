//! Trade sizing
//!
//! Finds the largest profitable input size for a qualifying token:
//! exponential doubling from a probe up to the cap, then a binary search
//! between the last profitable and first unprofitable size, bounded by a
//! pair-quote budget and one-whole-token granularity.

use alloy::primitives::U256;
use eyre::Result;
use std::future::Future;
use tracing::debug;

/// Bounds for the sizing search.
#[derive(Debug, Clone)]
pub struct SizingParams {
    pub min_input: U256,
    pub max_input_cap: U256,
    pub min_profit: U256,
    /// Search granularity (one whole source token in minor units)
    pub granularity: U256,
    /// Pair-quote budget
    pub max_quote_calls: u32,
}

/// A sized trade: the largest input found profitable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedTrade {
    pub optimal_input: U256,
    pub expected_l2_out: U256,
    pub expected_ref_out: U256,
}

/// Profitability at a size: the L2 output must beat the reference output
/// by more than the required minimum profit (both in target-token units).
fn is_profitable(l2_out: U256, ref_out: U256, min_profit: U256) -> bool {
    l2_out > ref_out.saturating_add(min_profit)
}

/// Search for the largest profitable input.
///
/// `quote_pair(size)` returns `(l2_out, ref_out)` for an input of `size`
/// source-token minor units. Returns `None` when even the minimum size is
/// not profitable.
pub async fn find_optimal_size<F, Fut>(
    params: &SizingParams,
    mut quote_pair: F,
) -> Result<Option<SizedTrade>>
where
    F: FnMut(U256) -> Fut,
    Fut: Future<Output = Result<(U256, U256)>>,
{
    let mut calls = 0u32;
    let mut quote = |size: U256, calls: &mut u32| {
        *calls += 1;
        quote_pair(size)
    };

    // Probe at the minimum size
    let probe = params.min_input.min(params.max_input_cap);
    let (l2_out, ref_out) = quote(probe, &mut calls).await?;
    if !is_profitable(l2_out, ref_out, params.min_profit) {
        debug!(size = %probe, "Probe size not profitable; no trade");
        return Ok(None);
    }

    let mut good = SizedTrade {
        optimal_input: probe,
        expected_l2_out: l2_out,
        expected_ref_out: ref_out,
    };
    if probe == params.max_input_cap {
        return Ok(Some(good));
    }

    // Exponential doubling toward the cap
    let mut bad: Option<U256> = None;
    let mut size = probe.saturating_mul(U256::from(2u64));
    loop {
        if calls >= params.max_quote_calls {
            return Ok(Some(good));
        }
        let capped = size.min(params.max_input_cap);
        let (l2_out, ref_out) = quote(capped, &mut calls).await?;
        if is_profitable(l2_out, ref_out, params.min_profit) {
            good = SizedTrade {
                optimal_input: capped,
                expected_l2_out: l2_out,
                expected_ref_out: ref_out,
            };
            if capped == params.max_input_cap {
                return Ok(Some(good));
            }
            size = capped.saturating_mul(U256::from(2u64));
        } else {
            bad = Some(capped);
            break;
        }
    }

    // Binary search between the last profitable and first unprofitable size
    let mut bad = match bad {
        Some(b) => b,
        None => return Ok(Some(good)),
    };
    while bad - good.optimal_input > params.granularity && calls < params.max_quote_calls {
        let mid = (good.optimal_input + bad) / U256::from(2u64);
        let (l2_out, ref_out) = quote(mid, &mut calls).await?;
        if is_profitable(l2_out, ref_out, params.min_profit) {
            good = SizedTrade {
                optimal_input: mid,
                expected_l2_out: l2_out,
                expected_ref_out: ref_out,
            };
        } else {
            bad = mid;
        }
    }

    debug!(
        size = %good.optimal_input,
        l2_out = %good.expected_l2_out,
        ref_out = %good.expected_ref_out,
        quote_calls = calls,
        "Sizing search settled"
    );
    Ok(Some(good))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    /// Synthetic market where profit(s) = c - s: the reference output is s
    /// and the L2 output is c, so l2_out - ref_out shrinks linearly.
    fn linear_params(min: u64, max: u64, min_profit: u64) -> SizingParams {
        SizingParams {
            min_input: u(min),
            max_input_cap: u(max),
            min_profit: u(min_profit),
            granularity: u(1),
            max_quote_calls: 50,
        }
    }

    async fn run_linear(c: u64, params: &SizingParams) -> Option<SizedTrade> {
        find_optimal_size(params, |size| async move { Ok((u(c), size)) })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_profit_returns_largest_good() {
        // profit(s) = 100 - s, min=10, max=100, minProfit=0 => 99
        let trade = run_linear(100, &linear_params(10, 100, 0)).await.unwrap();
        assert_eq!(trade.optimal_input, u(99));
    }

    #[tokio::test]
    async fn test_no_profit_at_min_returns_none() {
        // profit(10) = 0 which is not > minProfit=0
        assert!(run_linear(10, &linear_params(10, 100, 0)).await.is_none());
        // Reference better than L2 everywhere
        assert!(run_linear(5, &linear_params(10, 100, 0)).await.is_none());
    }

    #[tokio::test]
    async fn test_min_profit_shifts_the_boundary() {
        // profit(s) = 100 - s, minProfit=20 => largest s with 100-s > 20 is 79
        let trade = run_linear(100, &linear_params(10, 100, 20)).await.unwrap();
        assert_eq!(trade.optimal_input, u(79));
    }

    #[tokio::test]
    async fn test_min_equals_cap_profitable() {
        let params = linear_params(50, 50, 0);
        let trade = run_linear(1_000, &params).await.unwrap();
        assert_eq!(trade.optimal_input, u(50));
    }

    #[tokio::test]
    async fn test_min_equals_cap_unprofitable() {
        let params = linear_params(50, 50, 0);
        assert!(run_linear(50, &params).await.is_none());
    }

    #[tokio::test]
    async fn test_everything_profitable_returns_cap() {
        // profit(s) = 1_000_000 - s stays positive through the cap
        let trade = run_linear(1_000_000, &linear_params(10, 100, 0)).await.unwrap();
        assert_eq!(trade.optimal_input, u(100));
    }

    #[tokio::test]
    async fn test_quote_budget_is_respected() {
        let params = SizingParams {
            min_input: u(10),
            max_input_cap: u(1_000_000),
            min_profit: u(0),
            granularity: u(1),
            max_quote_calls: 4,
        };
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_clone = calls.clone();
        let trade = find_optimal_size(&params, move |size| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok((u(500), size))
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert!(calls.load(std::sync::atomic::Ordering::SeqCst) <= 4);
        // The best size seen within budget, not the true optimum
        assert!(trade.optimal_input >= u(10));
    }

    #[tokio::test]
    async fn test_monotone_region_result_dominates_smaller_sizes() {
        // Every profitable size s' < result implies result >= s'
        let trade = run_linear(100, &linear_params(10, 100, 0)).await.unwrap();
        for smaller in [10u64, 20, 40, 80, 98] {
            assert!(trade.optimal_input >= u(smaller));
        }
    }
}
