// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

impl BlockTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockTag::Latest => "latest",
            BlockTag::Pending => "pending",
        }
    }
}

/// Read-only call shape shared by eth_call and eth_estimateGas.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub status: bool,
    pub gas_used: u64,
}

/// One call surface over both transports. Identical `call` requests are
/// deduplicated within a short coalescing window; `max_age` can widen that
/// window for callers that tolerate staler data (reserves, gas).
#[async_trait]
pub trait Backend: Send + Sync {
    fn describe(&self) -> String;

    async fn call(&self, to: Address, data: Bytes, max_age: Duration)
        -> Result<Bytes, EngineError>;

    async fn balance(&self, address: Address) -> Result<U256, EngineError>;

    async fn transaction_count(&self, address: Address, tag: BlockTag)
        -> Result<u64, EngineError>;

    async fn estimate_gas(&self, req: &CallRequest) -> Result<u64, EngineError>;

    async fn gas_price(&self) -> Result<u128, EngineError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, EngineError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, EngineError>;
}

pub type SharedBackend = Arc<dyn Backend>;

// Wire-level quantity codecs shared by both transports.

pub fn encode_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

pub fn encode_u256(value: U256) -> String {
    format!("0x{:x}", value)
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

pub fn parse_quantity_u64(raw: &str) -> Result<u64, EngineError> {
    u64::from_str_radix(strip_0x(raw.trim()), 16)
        .map_err(|_| EngineError::Protocol(format!("invalid quantity '{}'", raw)))
}

pub fn parse_quantity_u128(raw: &str) -> Result<u128, EngineError> {
    u128::from_str_radix(strip_0x(raw.trim()), 16)
        .map_err(|_| EngineError::Protocol(format!("invalid quantity '{}'", raw)))
}

pub fn parse_quantity_u256(raw: &str) -> Result<U256, EngineError> {
    let trimmed = strip_0x(raw.trim());
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(trimmed, 16)
        .map_err(|_| EngineError::Protocol(format!("invalid quantity '{}'", raw)))
}

pub fn parse_hex_bytes(raw: &str) -> Result<Bytes, EngineError> {
    let trimmed = strip_0x(raw.trim());
    if trimmed.is_empty() {
        return Ok(Bytes::new());
    }
    hex::decode(trimmed)
        .map(Bytes::from)
        .map_err(|_| EngineError::Protocol(format!("invalid hex payload '{}'", raw)))
}

pub fn parse_tx_hash(raw: &str) -> Result<B256, EngineError> {
    B256::from_str(raw.trim())
        .map_err(|_| EngineError::Protocol(format!("invalid transaction hash '{}'", raw)))
}

/// Build the JSON object shape shared by eth_call and eth_estimateGas.
pub fn call_request_json(req: &CallRequest) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(from) = req.from {
        obj.insert("from".into(), Value::String(format!("{:#x}", from)));
    }
    if let Some(to) = req.to {
        obj.insert("to".into(), Value::String(format!("{:#x}", to)));
    }
    if req.value > U256::ZERO {
        obj.insert("value".into(), Value::String(encode_u256(req.value)));
    }
    if !req.data.is_empty() {
        obj.insert("data".into(), Value::String(format!("0x{}", hex::encode(&req.data))));
    }
    Value::Object(obj)
}

/// Decode an eth_getTransactionReceipt result. `null` means still pending.
pub fn receipt_from_value(value: &Value) -> Result<Option<TxReceipt>, EngineError> {
    if value.is_null() {
        return Ok(None);
    }
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::Protocol("receipt is not an object".into()))?;

    let hash_raw = obj
        .get("transactionHash")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Protocol("receipt missing transactionHash".into()))?;
    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .map(|s| parse_quantity_u64(s))
        .transpose()?
        .map(|v| v == 1)
        // Pre-Byzantium nodes omit status; treat presence of a block as success.
        .unwrap_or(true);
    let block_number = obj
        .get("blockNumber")
        .and_then(Value::as_str)
        .map(parse_quantity_u64)
        .transpose()?;
    let gas_used = obj
        .get("gasUsed")
        .and_then(Value::as_str)
        .map(parse_quantity_u64)
        .transpose()?
        .unwrap_or(0);

    Ok(Some(TxReceipt {
        tx_hash: parse_tx_hash(hash_raw)?,
        block_number,
        status,
        gas_used,
    }))
}
