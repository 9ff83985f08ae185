// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;

/// Signing identity seam. The engine only ever sees an address and a
/// sign-this-transaction call; key material stays behind the trait.
pub trait SaleSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a legacy transaction and return the raw RLP payload ready for
    /// eth_sendRawTransaction.
    fn sign_transaction(&self, tx: TxLegacy) -> Result<Vec<u8>, EngineError>;
}

pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn from_key(key: &str) -> Result<Self, EngineError> {
        let inner = PrivateKeySigner::from_str(key.trim())
            .map_err(|e| EngineError::Config(format!("invalid wallet key: {}", e)))?;
        Ok(Self { inner })
    }
}

impl SaleSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn sign_transaction(&self, mut tx: TxLegacy) -> Result<Vec<u8>, EngineError> {
        let signature = self
            .inner
            .sign_transaction_sync(&mut tx)
            .map_err(|e| EngineError::Config(format!("transaction signing failed: {}", e)))?;
        let signed = tx.into_signed(signature);
        Ok(TxEnvelope::Legacy(signed).encoded_2718())
    }
}
