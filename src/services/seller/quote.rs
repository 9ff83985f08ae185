// SPDX-License-Identifier: MIT

use crate::common::units::to_f64;
use crate::domain::constants::{AMM_FEE_BPS, BPS_DENOMINATOR, RESERVE_TTL};
use crate::domain::error::EngineError;
use crate::infrastructure::data::abi::{AmmPair, AmmRouter, Erc20};
use crate::infrastructure::network::backend::SharedBackend;
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolView {
    pub price: f64,
    pub reserve_token: U256,
    pub reserve_stable: U256,
}

/// Prices the fixed token/stable pool and quotes swap output. The on-chain
/// router quote is authoritative; reserve math is the offline fallback.
pub struct QuoteEngine {
    backend: SharedBackend,
    token: Address,
    stable: Address,
    pair: Address,
    router: Address,
    token_decimals: u8,
    stable_decimals: u8,
    pair_tokens: OnceLock<(Address, Address)>,
}

impl QuoteEngine {
    pub fn new(
        backend: SharedBackend,
        token: Address,
        stable: Address,
        pair: Address,
        router: Address,
        token_decimals: u8,
        stable_decimals: u8,
    ) -> Self {
        Self {
            backend,
            token,
            stable,
            pair,
            router,
            token_decimals,
            stable_decimals,
            pair_tokens: OnceLock::new(),
        }
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn stable(&self) -> Address {
        self.stable
    }

    pub fn router(&self) -> Address {
        self.router
    }

    /// Verify the sold token's on-chain decimal count before trading.
    /// A mismatch means the configuration points at the wrong token, so
    /// the connection is aborted rather than mispricing every quote.
    pub async fn connect_check(&self, expected_token_decimals: u8) -> Result<(), EngineError> {
        let data = Erc20::decimalsCall {}.abi_encode();
        let out = self
            .backend
            .call(self.token, data.into(), Duration::ZERO)
            .await?;
        let on_chain = Erc20::decimalsCall::abi_decode_returns(&out)
            .map_err(|e| EngineError::Protocol(format!("decimals decode failed: {}", e)))?;
        if on_chain != expected_token_decimals {
            return Err(EngineError::Safety(format!(
                "token decimals mismatch: expected {}, chain reports {}",
                expected_token_decimals, on_chain
            )));
        }
        Ok(())
    }

    /// The pool's token pair, resolved once and cached for the session.
    pub async fn pair_tokens(&self) -> Result<(Address, Address), EngineError> {
        if let Some(cached) = self.pair_tokens.get() {
            return Ok(*cached);
        }
        let t0_raw = self
            .backend
            .call(self.pair, AmmPair::token0Call {}.abi_encode().into(), Duration::MAX)
            .await?;
        let t1_raw = self
            .backend
            .call(self.pair, AmmPair::token1Call {}.abi_encode().into(), Duration::MAX)
            .await?;
        let token0 = AmmPair::token0Call::abi_decode_returns(&t0_raw)
            .map_err(|e| EngineError::Protocol(format!("token0 decode failed: {}", e)))?;
        let token1 = AmmPair::token1Call::abi_decode_returns(&t1_raw)
            .map_err(|e| EngineError::Protocol(format!("token1 decode failed: {}", e)))?;
        Ok(*self.pair_tokens.get_or_init(|| (token0, token1)))
    }

    async fn token_is_token0(&self) -> Result<bool, EngineError> {
        let (token0, token1) = self.pair_tokens().await?;
        if token0 == self.token {
            Ok(true)
        } else if token1 == self.token {
            Ok(false)
        } else {
            Err(EngineError::Safety(format!(
                "pool {:#x} does not contain token {:#x}",
                self.pair, self.token
            )))
        }
    }

    /// Current reserves ordered as (token, stable), plus the spot price of
    /// one whole token in stable units.
    pub async fn pool_view(&self) -> Result<PoolView, EngineError> {
        let raw = self
            .backend
            .call(
                self.pair,
                AmmPair::getReservesCall {}.abi_encode().into(),
                RESERVE_TTL,
            )
            .await?;
        let reserves = AmmPair::getReservesCall::abi_decode_returns(&raw)
            .map_err(|e| EngineError::Protocol(format!("getReserves decode failed: {}", e)))?;

        let reserve0: U256 = reserves.reserve0.to::<U256>();
        let reserve1: U256 = reserves.reserve1.to::<U256>();
        let (reserve_token, reserve_stable) = if self.token_is_token0().await? {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };

        let price = if reserve_token.is_zero() {
            0.0
        } else {
            let token_side = to_f64(reserve_token) / 10f64.powi(self.token_decimals as i32);
            let stable_side = to_f64(reserve_stable) / 10f64.powi(self.stable_decimals as i32);
            stable_side / token_side
        };

        Ok(PoolView {
            price,
            reserve_token,
            reserve_stable,
        })
    }

    /// Quote the swap output for `amount_in` tokens. Tries the router's
    /// on-chain quote first and falls back to local reserve math on any
    /// failure. No safety margin is applied here.
    pub async fn amounts_out(&self, amount_in: U256) -> Result<U256, EngineError> {
        let call = AmmRouter::getAmountsOutCall {
            amountIn: amount_in,
            path: vec![self.token, self.stable],
        };
        match self
            .backend
            .call(self.router, call.abi_encode().into(), RESERVE_TTL)
            .await
            .and_then(|raw| {
                AmmRouter::getAmountsOutCall::abi_decode_returns(&raw)
                    .map_err(|e| EngineError::Protocol(format!("getAmountsOut decode failed: {}", e)))
            }) {
            Ok(amounts) => amounts
                .last()
                .copied()
                .ok_or_else(|| EngineError::Protocol("getAmountsOut returned empty path".into())),
            Err(e) => {
                tracing::debug!(target: "quote", error = %e, "Router quote failed, using reserve math");
                let view = self.pool_view().await?;
                Ok(constant_product_out(
                    amount_in,
                    view.reserve_token,
                    view.reserve_stable,
                ))
            }
        }
    }

    /// Theoretical output at the pool's linear spot price, used as the
    /// zero-impact baseline.
    pub async fn linear_out(&self, amount_in: U256) -> Result<U256, EngineError> {
        let view = self.pool_view().await?;
        Ok(linear_out(amount_in, view.reserve_token, view.reserve_stable))
    }
}

/// Constant-product output after the pool fee.
pub fn constant_product_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::ZERO;
    }
    let amount_with_fee = amount_in.saturating_mul(U256::from(BPS_DENOMINATOR - AMM_FEE_BPS));
    let numerator = amount_with_fee.saturating_mul(reserve_out);
    let denominator = reserve_in
        .saturating_mul(U256::from(BPS_DENOMINATOR))
        .saturating_add(amount_with_fee);
    if denominator.is_zero() {
        return U256::ZERO;
    }
    numerator / denominator
}

pub fn linear_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> U256 {
    if reserve_in.is_zero() {
        return U256::ZERO;
    }
    amount_in.saturating_mul(reserve_out) / reserve_in
}
