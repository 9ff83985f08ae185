// SPDX-License-Identifier: MIT

use crate::domain::constants::{
    CALL_COALESCE_WINDOW, GAS_PRICE_TTL, PROXY_DECAY_AFTER, PROXY_ERROR_BURST, PROXY_ERROR_WINDOW,
    PROXY_GAP_CAP, PROXY_GAP_FLOOR, READ_RETRY_ATTEMPTS, READ_RETRY_DELAY, READ_RETRY_DELAY_CAP,
};
use crate::domain::error::EngineError;
use crate::infrastructure::network::backend::{
    encode_u256, parse_hex_bytes, parse_quantity_u128, parse_quantity_u64, parse_tx_hash,
    receipt_from_value, Backend, BlockTag, CallRequest, TxReceipt,
};
use crate::infrastructure::network::cache::{CallCache, ScalarCache};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use url::Url;

/// Structured fault kinds for explorer-proxy responses. The well-known
/// error strings are recognized in exactly one place (`classify_notok`);
/// everything downstream matches on this enum, not on message text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProxyFault {
    InvalidKey,
    RateLimited,
    ServerError(u16),
    Transient(String),
    Protocol(String),
}

#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    status: Option<String>,
    message: Option<String>,
    result: Option<Value>,
    error: Option<ProxyErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ProxyErrorBody {
    message: String,
}

fn classify_notok(message: &str, result: &str) -> ProxyFault {
    let lowered = result.to_ascii_lowercase();
    if lowered.contains("invalid api key") {
        ProxyFault::InvalidKey
    } else if lowered.contains("rate limit") {
        ProxyFault::RateLimited
    } else {
        ProxyFault::Protocol(format!("proxy rejected request: {} ({})", result, message))
    }
}

fn classify_envelope(envelope: ProxyEnvelope) -> Result<Value, ProxyFault> {
    if let Some(err) = envelope.error {
        return Err(ProxyFault::Protocol(format!("proxy error: {}", err.message)));
    }
    if envelope.status.as_deref() == Some("0") {
        let message = envelope.message.as_deref().unwrap_or("").to_string();
        let result = envelope
            .result
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(classify_notok(&message, &result));
    }
    envelope
        .result
        .ok_or_else(|| ProxyFault::Protocol("proxy response missing result".into()))
}

#[derive(Debug)]
struct GateState {
    min_gap: Duration,
    last_call: Option<Instant>,
    errors: VecDeque<Instant>,
    successes: u32,
}

/// Adaptive pacing: the minimum inter-call gap doubles (capped) after a
/// burst of throttle/server errors inside the sliding window and decays
/// stepwise after sustained success.
#[derive(Debug)]
struct RateGate {
    state: Mutex<GateState>,
}

impl RateGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                min_gap: PROXY_GAP_FLOOR,
                last_call: None,
                errors: VecDeque::new(),
                successes: 0,
            }),
        }
    }

    fn reserve_slot(&self) -> Duration {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let ready = st
            .last_call
            .map(|t| t + st.min_gap)
            .unwrap_or(now)
            .max(now);
        st.last_call = Some(ready);
        ready.saturating_duration_since(now)
    }

    async fn pace(&self) {
        let wait = self.reserve_slot();
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    fn on_success(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.successes = st.successes.saturating_add(1);
        if st.successes >= PROXY_DECAY_AFTER {
            st.min_gap = (st.min_gap * 3 / 4).max(PROXY_GAP_FLOOR);
            st.successes = 0;
        }
    }

    fn on_throttle(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        st.successes = 0;
        st.errors.push_back(now);
        while let Some(front) = st.errors.front() {
            if now.duration_since(*front) > PROXY_ERROR_WINDOW {
                st.errors.pop_front();
            } else {
                break;
            }
        }
        if st.errors.len() >= PROXY_ERROR_BURST {
            st.min_gap = st.min_gap.saturating_mul(2).min(PROXY_GAP_CAP);
            st.errors.clear();
        }
    }

    fn min_gap(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).min_gap
    }
}

/// Explorer-style proxy transport: the JSON-RPC method set tunneled
/// through `module=proxy&action=<method>` GET requests with API keys.
#[derive(Debug)]
pub struct ProxyBackend {
    client: reqwest::Client,
    endpoint: String,
    keys: Vec<String>,
    key_cursor: AtomicUsize,
    gate: RateGate,
    calls: CallCache,
    gas: ScalarCache,
}

impl ProxyBackend {
    pub fn new(endpoint: &str, keys: Vec<String>) -> Result<Self, EngineError> {
        Url::parse(endpoint)
            .map_err(|e| EngineError::Config(format!("invalid proxy URL '{}': {}", endpoint, e)))?;
        if keys.is_empty() {
            return Err(EngineError::Config("proxy backend requires at least one API key".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            keys,
            key_cursor: AtomicUsize::new(0),
            gate: RateGate::new(),
            calls: CallCache::new(),
            gas: ScalarCache::new(),
        })
    }

    fn current_key(&self) -> &str {
        let idx = self.key_cursor.load(Ordering::Relaxed) % self.keys.len();
        &self.keys[idx]
    }

    fn rotate_key(&self) {
        let idx = self.key_cursor.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "proxy",
            retired = idx % self.keys.len(),
            "Rotating proxy API key"
        );
    }

    async fn execute(&self, url: &str) -> Result<Value, ProxyFault> {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return Err(ProxyFault::Transient(e.to_string()));
                }
                return Err(ProxyFault::Protocol(e.to_string()));
            }
        };

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ProxyFault::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProxyFault::ServerError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ProxyFault::Protocol(format!("proxy returned {}", status)));
        }

        let envelope: ProxyEnvelope = resp
            .json()
            .await
            .map_err(|e| ProxyFault::Protocol(format!("malformed proxy response: {}", e)))?;
        classify_envelope(envelope)
    }

    /// `is_write` suppresses blind retries once a request may have reached
    /// the chain; key problems and throttles never reached it and are
    /// always safe to retry with a rotated key.
    async fn request(
        &self,
        module: &str,
        action: &str,
        params: &[(&str, String)],
        is_write: bool,
    ) -> Result<Value, EngineError> {
        let attempts = READ_RETRY_ATTEMPTS.max(self.keys.len()).min(6);
        let mut delay = READ_RETRY_DELAY;
        let mut last_fault = String::new();

        for attempt in 1..=attempts {
            self.gate.pace().await;
            let mut url = format!("{}?module={}&action={}", self.endpoint, module, action);
            for (k, v) in params {
                url.push('&');
                url.push_str(k);
                url.push('=');
                url.push_str(v);
            }
            url.push_str("&apikey=");
            url.push_str(self.current_key());

            match self.execute(&url).await {
                Ok(value) => {
                    self.gate.on_success();
                    return Ok(value);
                }
                Err(ProxyFault::InvalidKey) => {
                    last_fault = "invalid API key".into();
                    self.rotate_key();
                }
                Err(ProxyFault::RateLimited) => {
                    last_fault = "rate limited".into();
                    self.gate.on_throttle();
                    self.rotate_key();
                    sleep(delay).await;
                    delay = delay.saturating_mul(2).min(READ_RETRY_DELAY_CAP);
                }
                Err(ProxyFault::ServerError(code)) => {
                    last_fault = format!("server error {}", code);
                    self.gate.on_throttle();
                    self.rotate_key();
                    if is_write {
                        return Err(EngineError::Network(format!(
                            "proxy {} failed: server error {}",
                            action, code
                        )));
                    }
                    sleep(delay).await;
                    delay = delay.saturating_mul(2).min(READ_RETRY_DELAY_CAP);
                }
                Err(ProxyFault::Transient(msg)) => {
                    last_fault = msg.clone();
                    if is_write {
                        return Err(EngineError::Network(format!(
                            "proxy {} failed: {}",
                            action, msg
                        )));
                    }
                    sleep(delay).await;
                    delay = delay.saturating_mul(2).min(READ_RETRY_DELAY_CAP);
                }
                Err(ProxyFault::Protocol(msg)) => {
                    return Err(EngineError::Protocol(msg));
                }
            }
            tracing::debug!(target: "proxy", action, attempt, fault = %last_fault, "Proxy attempt failed");
        }

        Err(EngineError::Network(format!(
            "proxy {} exhausted {} attempts: {}",
            action, attempts, last_fault
        )))
    }

    fn result_as_str(value: &Value, action: &str) -> Result<String, EngineError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| EngineError::Protocol(format!("{} result is not a string", action)))
    }
}

#[async_trait]
impl Backend for ProxyBackend {
    fn describe(&self) -> String {
        format!("proxy:{} ({} keys)", self.endpoint, self.keys.len())
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
        let params = [
            ("to", format!("{:#x}", to)),
            ("data", format!("0x{}", hex::encode(&data))),
            ("tag", "latest".to_string()),
        ];
        let result = self.request("proxy", "eth_call", &params, false).await?;
        let bytes = parse_hex_bytes(&Self::result_as_str(&result, "eth_call")?)?;
        self.calls.put(to, data, bytes.clone());
        Ok(bytes)
    }

    async fn balance(&self, address: Address) -> Result<U256, EngineError> {
        let params = [
            ("address", format!("{:#x}", address)),
            ("tag", "latest".to_string()),
        ];
        let result = self.request("account", "balance", &params, false).await?;
        let raw = Self::result_as_str(&result, "balance")?;
        U256::from_str_radix(raw.trim(), 10)
            .map_err(|_| EngineError::Protocol(format!("invalid balance '{}'", raw)))
    }

    async fn transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, EngineError> {
        let params = [
            ("address", format!("{:#x}", address)),
            ("tag", tag.as_str().to_string()),
        ];
        let result = self
            .request("proxy", "eth_getTransactionCount", &params, false)
            .await?;
        parse_quantity_u64(&Self::result_as_str(&result, "eth_getTransactionCount")?)
    }

    async fn estimate_gas(&self, req: &CallRequest) -> Result<u64, EngineError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(to) = req.to {
            params.push(("to", format!("{:#x}", to)));
        }
        if !req.data.is_empty() {
            params.push(("data", format!("0x{}", hex::encode(&req.data))));
        }
        if req.value > U256::ZERO {
            params.push(("value", encode_u256(req.value)));
        }
        let result = self
            .request("proxy", "eth_estimateGas", &params, false)
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
        let result = self.request("proxy", "eth_gasPrice", &[], false).await?;
        let price = parse_quantity_u128(&Self::result_as_str(&result, "eth_gasPrice")?)?;
        self.gas.put(price);
        Ok(price)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, EngineError> {
        let params = [("hex", format!("0x{}", hex::encode(raw)))];
        let result = self
            .request("proxy", "eth_sendRawTransaction", &params, true)
            .await?;
        parse_tx_hash(&Self::result_as_str(&result, "eth_sendRawTransaction")?)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, EngineError> {
        let params = [("txhash", format!("{:#x}", hash))];
        let result = self
            .request("proxy", "eth_getTransactionReceipt", &params, false)
            .await?;
        receipt_from_value(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(body: Value) -> ProxyEnvelope {
        serde_json::from_value(body).expect("envelope")
    }

    #[test]
    fn classifies_invalid_api_key() {
        let fault = classify_envelope(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Invalid API Key"
        })))
        .unwrap_err();
        assert_eq!(fault, ProxyFault::InvalidKey);
    }

    #[test]
    fn classifies_rate_limit() {
        let fault = classify_envelope(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached, please use API Key for higher rate limit"
        })))
        .unwrap_err();
        assert_eq!(fault, ProxyFault::RateLimited);
    }

    #[test]
    fn unknown_notok_is_protocol_fault() {
        let fault = classify_envelope(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Error! Missing parameter"
        })))
        .unwrap_err();
        assert!(matches!(fault, ProxyFault::Protocol(_)));
    }

    #[test]
    fn jsonrpc_shape_passes_result_through() {
        let value = classify_envelope(envelope(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": "0xdeadbeef"
        })))
        .unwrap();
        assert_eq!(value.as_str(), Some("0xdeadbeef"));
    }

    #[test]
    fn status_shape_passes_result_through() {
        let value = classify_envelope(envelope(json!({
            "status": "1",
            "message": "OK",
            "result": "123456"
        })))
        .unwrap();
        assert_eq!(value.as_str(), Some("123456"));
    }

    #[test]
    fn gate_grows_on_error_burst_and_decays_on_success() {
        let gate = RateGate::new();
        let start = gate.min_gap();

        for _ in 0..PROXY_ERROR_BURST {
            gate.on_throttle();
        }
        let grown = gate.min_gap();
        assert_eq!(grown, (start * 2).min(PROXY_GAP_CAP));

        for _ in 0..PROXY_DECAY_AFTER {
            gate.on_success();
        }
        assert!(gate.min_gap() < grown);
        assert!(gate.min_gap() >= PROXY_GAP_FLOOR);
    }

    #[test]
    fn gate_never_exceeds_cap() {
        let gate = RateGate::new();
        for _ in 0..200 {
            gate.on_throttle();
        }
        assert!(gate.min_gap() <= PROXY_GAP_CAP);
    }

    #[test]
    fn key_rotation_wraps_around() {
        let backend = ProxyBackend::new(
            "https://proxy.example/api",
            vec!["k1".into(), "k2".into()],
        )
        .unwrap();
        assert_eq!(backend.current_key(), "k1");
        backend.rotate_key();
        assert_eq!(backend.current_key(), "k2");
        backend.rotate_key();
        assert_eq!(backend.current_key(), "k1");
    }

    #[test]
    fn requires_at_least_one_key() {
        let err = ProxyBackend::new("https://proxy.example/api", Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
