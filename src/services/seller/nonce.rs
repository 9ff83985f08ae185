// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use crate::infrastructure::network::backend::{BlockTag, SharedBackend};
use alloy::primitives::{Address, B256};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct SentTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub tx_hash: B256,
}

#[derive(Debug, Default)]
struct NonceState {
    current: Option<u64>,
    reserved: Option<u64>,
    last_sent: Option<SentTx>,
}

/// Serializes transaction submission for one account. At most one nonce
/// reservation may be outstanding; both the manual and the scheduled sale
/// path funnel through this critical section.
pub struct NonceManager {
    backend: SharedBackend,
    address: Address,
    state: Mutex<NonceState>,
}

impl NonceManager {
    pub fn new(backend: SharedBackend, address: Address) -> Self {
        Self {
            backend,
            address,
            state: Mutex::new(NonceState::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Pending nonce for the account. The cached value only advances
    /// forward so a backend briefly reporting a stale count cannot roll
    /// the sequence backwards.
    pub async fn next_nonce(&self) -> Result<u64, EngineError> {
        let network = self
            .backend
            .transaction_count(self.address, BlockTag::Pending)
            .await?;
        let mut st = self.state.lock().await;
        let next = st.current.map_or(network, |cached| cached.max(network));
        st.current = Some(next);
        Ok(next)
    }

    pub async fn reserve(&self, nonce: u64) -> Result<(), EngineError> {
        let mut st = self.state.lock().await;
        if let Some(held) = st.reserved {
            return Err(EngineError::Nonce(format!(
                "nonce {} already reserved while requesting {}",
                held, nonce
            )));
        }
        st.reserved = Some(nonce);
        Ok(())
    }

    /// Clear the reservation. Success advances the cached nonce past the
    /// reserved value; failure leaves it unchanged so a follow-up attempt
    /// can reuse the same nonce.
    pub async fn release(&self, success: bool) {
        let mut st = self.state.lock().await;
        if let Some(nonce) = st.reserved.take() {
            if success {
                let advanced = nonce + 1;
                st.current = Some(st.current.map_or(advanced, |c| c.max(advanced)));
            }
        } else {
            tracing::warn!(target: "nonce", "release called without an outstanding reservation");
        }
    }

    pub async fn record_sent(&self, nonce: u64, gas_price: u128, tx_hash: B256) {
        let mut st = self.state.lock().await;
        st.last_sent = Some(SentTx {
            nonce,
            gas_price,
            tx_hash,
        });
    }

    pub async fn last_sent(&self) -> Option<SentTx> {
        self.state.lock().await.last_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::mock::MockBackend;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn manager() -> (Arc<MockBackend>, NonceManager) {
        let backend = Arc::new(MockBackend::new());
        let mgr = NonceManager::new(backend.clone(), Address::from([1u8; 20]));
        (backend, mgr)
    }

    #[tokio::test]
    async fn second_reservation_fails_while_first_outstanding() {
        let (_, mgr) = manager();
        mgr.reserve(5).await.unwrap();
        let err = mgr.reserve(6).await.unwrap_err();
        assert!(matches!(err, EngineError::Nonce(_)));

        mgr.release(false).await;
        mgr.reserve(5).await.unwrap();
    }

    #[tokio::test]
    async fn cached_nonce_never_moves_backwards() {
        let (backend, mgr) = manager();
        backend.pending_nonce.store(10, Ordering::Relaxed);
        assert_eq!(mgr.next_nonce().await.unwrap(), 10);

        // Backend briefly reports a stale value.
        backend.pending_nonce.store(7, Ordering::Relaxed);
        assert_eq!(mgr.next_nonce().await.unwrap(), 10);

        backend.pending_nonce.store(12, Ordering::Relaxed);
        assert_eq!(mgr.next_nonce().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn successful_release_advances_failed_release_reuses() {
        let (backend, mgr) = manager();
        backend.pending_nonce.store(3, Ordering::Relaxed);
        let nonce = mgr.next_nonce().await.unwrap();
        assert_eq!(nonce, 3);

        mgr.reserve(nonce).await.unwrap();
        mgr.release(false).await;
        assert_eq!(mgr.next_nonce().await.unwrap(), 3);

        mgr.reserve(nonce).await.unwrap();
        mgr.release(true).await;
        assert_eq!(mgr.next_nonce().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn tracks_last_sent_transaction() {
        let (_, mgr) = manager();
        assert!(mgr.last_sent().await.is_none());
        mgr.record_sent(9, 7_000_000_000, B256::from([4u8; 32])).await;
        let last = mgr.last_sent().await.unwrap();
        assert_eq!(last.nonce, 9);
        assert_eq!(last.gas_price, 7_000_000_000);
    }
}
