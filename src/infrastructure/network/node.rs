// SPDX-License-Identifier: MIT

use crate::domain::constants::{
    CALL_COALESCE_WINDOW, GAS_PRICE_TTL, READ_RETRY_ATTEMPTS, READ_RETRY_DELAY,
    READ_RETRY_DELAY_CAP,
};
use crate::domain::error::EngineError;
use crate::infrastructure::network::backend::{
    call_request_json, parse_hex_bytes, parse_quantity_u128, parse_quantity_u256,
    parse_quantity_u64, parse_tx_hash, receipt_from_value, Backend, BlockTag, CallRequest,
    TxReceipt,
};
use crate::infrastructure::network::cache::{CallCache, ScalarCache};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Direct JSON-RPC transport. Writes go to the primary endpoint; reads
/// rotate through an optional pool of lightweight read-only endpoints.
#[derive(Debug)]
pub struct NodeBackend {
    client: reqwest::Client,
    write_endpoint: String,
    read_endpoints: Vec<String>,
    read_cursor: AtomicUsize,
    request_id: AtomicU64,
    offline: AtomicBool,
    calls: CallCache,
    gas: ScalarCache,
}

impl NodeBackend {
    pub fn new(write_endpoint: &str, read_endpoints: Vec<String>) -> Result<Self, EngineError> {
        for endpoint in std::iter::once(write_endpoint).chain(read_endpoints.iter().map(String::as_str)) {
            Url::parse(endpoint)
                .map_err(|e| EngineError::Config(format!("invalid RPC URL '{}': {}", endpoint, e)))?;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            client,
            write_endpoint: write_endpoint.to_string(),
            read_endpoints,
            read_cursor: AtomicUsize::new(0),
            request_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            calls: CallCache::new(),
            gas: ScalarCache::new(),
        })
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    fn read_endpoint(&self) -> String {
        if self.read_endpoints.is_empty() {
            return self.write_endpoint.clone();
        }
        let idx = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read_endpoints.len();
        self.read_endpoints[idx].clone()
    }

    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, EngineError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            if status.is_server_error() {
                return Err(EngineError::Network(format!(
                    "node {} returned {}",
                    endpoint, status
                )));
            }
            return Err(EngineError::Protocol(format!(
                "node {} returned {}",
                endpoint, status
            )));
        }

        let envelope: RpcEnvelope = resp
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("malformed JSON-RPC response: {}", e)))?;

        if let Some(err) = envelope.error {
            return Err(EngineError::Protocol(format!(
                "{} failed: {} (code {})",
                method, err.message, err.code
            )));
        }
        envelope
            .result
            .ok_or_else(|| EngineError::Protocol(format!("{} response missing result", method)))
    }

    /// Reads retry transient failures with bounded backoff, rotating the
    /// endpoint each attempt. Non-transient errors propagate immediately.
    async fn read_request(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let mut delay = READ_RETRY_DELAY;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let endpoint = self.read_endpoint();
            match self.request(&endpoint, method, params.clone()).await {
                Ok(value) => {
                    self.offline.store(false, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < READ_RETRY_ATTEMPTS => {
                    self.offline.store(true, Ordering::Relaxed);
                    tracing::warn!(target: "rpc", method, endpoint = %endpoint, attempt, error = %e, "Read failed, rotating endpoint");
                    sleep(delay).await;
                    delay = delay.saturating_mul(2).min(READ_RETRY_DELAY_CAP);
                }
                Err(e) => {
                    if e.is_transient() {
                        self.offline.store(true, Ordering::Relaxed);
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn write_request(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let result = self.request(&self.write_endpoint, method, params).await;
        if let Err(e) = &result {
            if e.is_transient() {
                self.offline.store(true, Ordering::Relaxed);
            }
        }
        result
    }

    fn result_as_str(value: &Value, method: &str) -> Result<String, EngineError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| EngineError::Protocol(format!("{} result is not a string", method)))
    }
}

fn classify_reqwest(err: reqwest::Error) -> EngineError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        EngineError::Network(err.to_string())
    } else {
        EngineError::Protocol(err.to_string())
    }
}

#[async_trait]
impl Backend for NodeBackend {
    fn describe(&self) -> String {
        format!(
            "node:{} (+{} read endpoints)",
            self.write_endpoint,
            self.read_endpoints.len()
        )
    }

    async fn call(
        &self,
        to: Address,
        data: Bytes,
        max_age: Duration,
    ) -> Result<Bytes, EngineError> {
        let window = max_age.max(CALL_COALESCE_WINDOW);
        if let Some(hit) = self.calls.get(to, &data, window) {
            return Ok(hit);
        }
        let req = call_request_json(&CallRequest {
            to: Some(to),
            data: data.clone(),
            ..Default::default()
        });
        let result = self
            .read_request("eth_call", json!([req, "latest"]))
            .await?;
        let bytes = parse_hex_bytes(&Self::result_as_str(&result, "eth_call")?)?;
        self.calls.put(to, data, bytes.clone());
        Ok(bytes)
    }

    async fn balance(&self, address: Address) -> Result<U256, EngineError> {
        let result = self
            .read_request(
                "eth_getBalance",
                json!([format!("{:#x}", address), "latest"]),
            )
            .await?;
        parse_quantity_u256(&Self::result_as_str(&result, "eth_getBalance")?)
    }

    async fn transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, EngineError> {
        let result = self
            .read_request(
                "eth_getTransactionCount",
                json!([format!("{:#x}", address), tag.as_str()]),
            )
            .await?;
        parse_quantity_u64(&Self::result_as_str(&result, "eth_getTransactionCount")?)
    }

    async fn estimate_gas(&self, req: &CallRequest) -> Result<u64, EngineError> {
        let result = self
            .read_request("eth_estimateGas", json!([call_request_json(req)]))
            .await
            .map_err(|e| match e {
                EngineError::Protocol(msg) => EngineError::Gas(msg),
                other => other,
            })?;
        parse_quantity_u64(&Self::result_as_str(&result, "eth_estimateGas")?)
    }

    async fn gas_price(&self) -> Result<u128, EngineError> {
        if let Some(hit) = self.gas.get(GAS_PRICE_TTL) {
            return Ok(hit);
        }
        let result = self.read_request("eth_gasPrice", json!([])).await?;
        let price = parse_quantity_u128(&Self::result_as_str(&result, "eth_gasPrice")?)?;
        self.gas.put(price);
        Ok(price)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, EngineError> {
        let result = self
            .write_request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        parse_tx_hash(&Self::result_as_str(&result, "eth_sendRawTransaction")?)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, EngineError> {
        let result = self
            .read_request("eth_getTransactionReceipt", json!([format!("{:#x}", hash)]))
            .await?;
        receipt_from_value(&result)
    }
}
