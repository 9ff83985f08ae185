// SPDX-License-Identifier: MIT

//! Programmable in-memory backend used by unit tests across the crate.

use crate::domain::error::EngineError;
use crate::infrastructure::network::backend::{Backend, BlockTag, CallRequest, TxReceipt};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct MockBackend {
    responses: Mutex<HashMap<[u8; 4], VecDeque<Bytes>>>,
    pub call_log: Mutex<Vec<(Address, Bytes)>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub send_failures: AtomicU32,
    pub fail_all_sends: AtomicBool,
    pub receipts: Mutex<VecDeque<Option<TxReceipt>>>,
    pub receipt_status: AtomicBool,
    pub pending_nonce: AtomicU64,
    pub gas_price_wei: Mutex<Result<u128, String>>,
    pub native_balance: Mutex<U256>,
    pub gas_estimate: Mutex<Result<u64, String>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            send_failures: AtomicU32::new(0),
            fail_all_sends: AtomicBool::new(false),
            receipts: Mutex::new(VecDeque::new()),
            receipt_status: AtomicBool::new(true),
            pending_nonce: AtomicU64::new(0),
            gas_price_wei: Mutex::new(Ok(5_000_000_000)),
            native_balance: Mutex::new(U256::from(10u64).pow(U256::from(18u64))),
            gas_estimate: Mutex::new(Ok(150_000)),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for a call selector. The last registered value
    /// for a selector is sticky once the queue drains.
    pub fn respond(&self, selector: [u8; 4], encoded: Vec<u8>) {
        let mut map = self.responses.lock().unwrap();
        map.entry(selector).or_default().push_back(Bytes::from(encoded));
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn calls_for(&self, selector: [u8; 4]) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data)| data.len() >= 4 && data[..4] == selector)
            .count()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn call(
        &self,
        to: Address,
        data: Bytes,
        _max_age: Duration,
    ) -> Result<Bytes, EngineError> {
        self.call_log.lock().unwrap().push((to, data.clone()));
        if data.len() < 4 {
            return Err(EngineError::Protocol("call data too short".into()));
        }
        let selector: [u8; 4] = data[..4].try_into().unwrap();
        let mut map = self.responses.lock().unwrap();
        let queue = map
            .get_mut(&selector)
            .ok_or_else(|| EngineError::Protocol(format!("unexpected call {}", hex::encode(selector))))?;
        let value = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| EngineError::Protocol("response queue drained".into()))?
        };
        Ok(value)
    }

    async fn balance(&self, _address: Address) -> Result<U256, EngineError> {
        Ok(*self.native_balance.lock().unwrap())
    }

    async fn transaction_count(
        &self,
        _address: Address,
        _tag: BlockTag,
    ) -> Result<u64, EngineError> {
        Ok(self.pending_nonce.load(Ordering::Relaxed))
    }

    async fn estimate_gas(&self, _req: &CallRequest) -> Result<u64, EngineError> {
        self.gas_estimate
            .lock()
            .unwrap()
            .clone()
            .map_err(EngineError::Gas)
    }

    async fn gas_price(&self) -> Result<u128, EngineError> {
        self.gas_price_wei
            .lock()
            .unwrap()
            .clone()
            .map_err(EngineError::Network)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, EngineError> {
        self.sent.lock().unwrap().push(raw.to_vec());
        if self.fail_all_sends.load(Ordering::Relaxed) {
            return Err(EngineError::Network("broadcast refused".into()));
        }
        let remaining = self.send_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.send_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(EngineError::Network("broadcast refused".into()));
        }
        Ok(keccak256(raw))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, EngineError> {
        if let Some(queued) = self.receipts.lock().unwrap().pop_front() {
            return Ok(queued);
        }
        Ok(Some(TxReceipt {
            tx_hash: hash,
            block_number: Some(1),
            status: self.receipt_status.load(Ordering::Relaxed),
            gas_used: 21_000,
        }))
    }
}
