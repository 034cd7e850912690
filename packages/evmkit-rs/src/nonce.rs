//! Managed transaction nonces
//!
//! Every wallet transaction the keeper sends consumes a nonce from this
//! manager, so no two submissions race for the same nonce even when two
//! cycles act on the same chain in one tick. The cache is advisory: the
//! on-chain pending count is re-read under the lock on every acquisition
//! and the larger of the two wins.

use std::collections::HashMap;
use std::future::Future;

use eyre::Result;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-chain nonce cache. The mutex is held across the on-chain read so
/// concurrent callers on the same chain serialize and observe a contiguous
/// increasing sequence.
#[derive(Default)]
pub struct NonceManager {
    cache: Mutex<HashMap<u64, u64>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the next nonce for `chain_id`. `fetch_on_chain` reads the
    /// wallet's pending transaction count; it is awaited while the cache
    /// lock is held so in-flight acquisitions on the same chain cannot
    /// interleave.
    pub async fn next_nonce<F, Fut>(&self, chain_id: u64, fetch_on_chain: F) -> Result<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let mut cache = self.cache.lock().await;
        let on_chain = fetch_on_chain().await?;
        let cached = cache.get(&chain_id).copied().unwrap_or(0);
        let next = cached.max(on_chain);
        cache.insert(chain_id, next + 1);
        debug!(chain_id, next, on_chain, cached, "Nonce acquired");
        Ok(next)
    }

    /// Drop the cached counter for a chain. Recovery calls this after a
    /// failed send so the next acquisition re-syncs from the chain.
    pub async fn reset(&self, chain_id: u64) {
        let mut cache = self.cache.lock().await;
        cache.remove(&chain_id);
        debug!(chain_id, "Nonce cache reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_starts_at_on_chain_value() {
        let mgr = NonceManager::new();
        let n = mgr.next_nonce(1, || async { Ok(7) }).await.unwrap();
        assert_eq!(n, 7);
    }

    #[tokio::test]
    async fn test_sequential_acquisitions_are_contiguous() {
        let mgr = NonceManager::new();
        for expected in 5..10u64 {
            // On-chain stays behind the cache once transactions are pending
            let n = mgr.next_nonce(1, || async { Ok(5) }).await.unwrap();
            assert_eq!(n, expected);
        }
    }

    #[tokio::test]
    async fn test_on_chain_jump_wins_over_cache() {
        let mgr = NonceManager::new();
        assert_eq!(mgr.next_nonce(1, || async { Ok(3) }).await.unwrap(), 3);
        // Another wallet user bumped the on-chain count past our cache
        assert_eq!(mgr.next_nonce(1, || async { Ok(20) }).await.unwrap(), 20);
        assert_eq!(mgr.next_nonce(1, || async { Ok(20) }).await.unwrap(), 21);
    }

    #[tokio::test]
    async fn test_chains_are_independent() {
        let mgr = NonceManager::new();
        assert_eq!(mgr.next_nonce(1, || async { Ok(10) }).await.unwrap(), 10);
        assert_eq!(mgr.next_nonce(2, || async { Ok(0) }).await.unwrap(), 0);
        assert_eq!(mgr.next_nonce(1, || async { Ok(10) }).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_reset_resyncs_from_chain() {
        let mgr = NonceManager::new();
        assert_eq!(mgr.next_nonce(1, || async { Ok(4) }).await.unwrap(), 4);
        assert_eq!(mgr.next_nonce(1, || async { Ok(4) }).await.unwrap(), 5);
        mgr.reset(1).await;
        assert_eq!(mgr.next_nonce(1, || async { Ok(4) }).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_form_contiguous_sequence() {
        let mgr = Arc::new(NonceManager::new());
        let on_chain = Arc::new(AtomicU64::new(100));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let mgr = mgr.clone();
            let on_chain = on_chain.clone();
            handles.push(tokio::spawn(async move {
                mgr.next_nonce(1, || async move {
                    // Simulate a slow RPC read
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    Ok(on_chain.load(Ordering::SeqCst))
                })
                .await
                .unwrap()
            }));
        }

        let mut nonces = Vec::new();
        for h in handles {
            nonces.push(h.await.unwrap());
        }
        nonces.sort_unstable();
        let expected: Vec<u64> = (100..132).collect();
        assert_eq!(nonces, expected);
    }
}
