// SPDX-License-Identifier: MIT

use crate::common::units::format_amount;
use crate::domain::constants::{
    GAS_SAFETY_MULTIPLIER_BPS, GAS_UNITS_APPROVE, GAS_UNITS_SWAP,
};
use crate::domain::error::EngineError;
use crate::infrastructure::data::abi::{AmmRouter, Erc20};
use crate::infrastructure::network::backend::{CallRequest, SharedBackend};
use crate::services::seller::gas::effective_gas_price;
use crate::services::seller::limits::{LimitsManager, SaleCaps};
use crate::services::seller::quote::{linear_out, QuoteEngine};
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use std::sync::Arc;
use std::time::Duration;

/// Everything a single sale needs to be validated and executed. Built
/// fresh from configuration for each invocation so operator changes take
/// effect immediately.
#[derive(Debug, Clone)]
pub struct SaleParams {
    pub amount_in: U256,
    pub slippage_pct: f64,
    pub safety_slippage_pct: f64,
    pub impact_ceiling_pct: f64,
    pub min_reserve_token: U256,
    pub min_reserve_stable: U256,
    pub depth_multiplier: u64,
    pub caps: SaleCaps,
    pub gas_floor_wei: u128,
    pub gas_ceiling_wei: u128,
    pub gas_limit_swap: u64,
    pub deadline_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub ok: bool,
    pub message: String,
}

impl Check {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Network,
    PairIdentity,
    Balance,
    Quote,
    PriceImpact,
    ReserveDepth,
    GasBudget,
    Limits,
}

/// Read-only validation bundle produced before any transaction is sent.
/// Never mutated after creation.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub network: Check,
    pub pair_identity: Check,
    pub balance: Check,
    pub allowance: Check,
    pub quote: Check,
    pub price_impact: Check,
    pub reserve_depth: Check,
    pub gas_budget: Check,
    pub limits: Check,

    pub token_balance: U256,
    pub current_allowance: U256,
    pub expected_out: U256,
    pub min_out: U256,
    pub price_impact_pct: f64,
    pub gas_cost_wei: u128,
    pub reserve_token: U256,
    pub reserve_stable: U256,
}

impl PreflightReport {
    /// Highest-priority hard blocker, if any. The allowance check is
    /// informational: the lifecycle controller converges it itself.
    pub fn first_block(&self) -> Option<(CheckKind, &Check)> {
        let ordered = [
            (CheckKind::Network, &self.network),
            (CheckKind::PairIdentity, &self.pair_identity),
            (CheckKind::Limits, &self.limits),
            (CheckKind::Balance, &self.balance),
            (CheckKind::Quote, &self.quote),
            (CheckKind::PriceImpact, &self.price_impact),
            (CheckKind::ReserveDepth, &self.reserve_depth),
            (CheckKind::GasBudget, &self.gas_budget),
        ];
        ordered.into_iter().find(|(_, check)| !check.ok)
    }

    pub fn ok(&self) -> bool {
        self.first_block().is_none()
    }

    /// Map the top blocker onto the engine error taxonomy.
    pub fn as_error(&self) -> Option<EngineError> {
        self.first_block().map(|(kind, check)| match kind {
            CheckKind::Limits => EngineError::Limit(check.message.clone()),
            CheckKind::GasBudget => EngineError::Gas(check.message.clone()),
            CheckKind::Network => EngineError::Network(check.message.clone()),
            _ => EngineError::Safety(check.message.clone()),
        })
    }
}

pub struct PreflightEngine {
    backend: SharedBackend,
    quote: Arc<QuoteEngine>,
    limits: Arc<LimitsManager>,
    owner: Address,
    token_decimals: u8,
}

impl PreflightEngine {
    pub fn new(
        backend: SharedBackend,
        quote: Arc<QuoteEngine>,
        limits: Arc<LimitsManager>,
        owner: Address,
        token_decimals: u8,
    ) -> Self {
        Self {
            backend,
            quote,
            limits,
            owner,
            token_decimals,
        }
    }

    pub async fn run(&self, params: &SaleParams) -> Result<PreflightReport, EngineError> {
        let amount = params.amount_in;
        let view = self.quote.pool_view().await?;
        let network = Check::pass(self.backend.describe());

        let pair_identity = match self.quote.pair_tokens().await {
            Ok((t0, t1)) => {
                let expected =
                    sorted_pair(self.quote.token(), self.quote.stable()) == sorted_pair(t0, t1);
                if expected {
                    Check::pass("pool tokens match the configured pair")
                } else {
                    Check::fail(format!(
                        "pool tokens {:#x}/{:#x} do not match the configured pair",
                        t0, t1
                    ))
                }
            }
            Err(e) => Check::fail(format!("pair identity unverified: {}", e)),
        };

        let token_balance = self.erc20_balance().await?;
        let balance = if token_balance >= amount {
            Check::pass(format!(
                "balance {} covers the sale",
                format_amount(token_balance, self.token_decimals)
            ))
        } else {
            Check::fail(format!(
                "balance {} is below the requested {}",
                format_amount(token_balance, self.token_decimals),
                format_amount(amount, self.token_decimals)
            ))
        };

        let current_allowance = self.erc20_allowance().await?;
        let allowance = if current_allowance == amount {
            Check::pass("allowance already matches the sale amount")
        } else {
            Check::pass(format!(
                "allowance {} differs from sale amount; controller will converge it",
                format_amount(current_allowance, self.token_decimals)
            ))
        };

        let expected_out = self.quote.amounts_out(amount).await?;
        let min_out = apply_slippage(
            expected_out,
            params.slippage_pct + params.safety_slippage_pct,
        );
        let quote = if expected_out.is_zero() {
            Check::fail("quoted output is zero: no usable liquidity")
        } else {
            Check::pass(format!("expected output {}", expected_out))
        };

        let theoretical = linear_out(amount, view.reserve_token, view.reserve_stable);
        let price_impact_pct = impact_pct(expected_out, theoretical);
        let price_impact = if price_impact_pct > params.impact_ceiling_pct {
            Check::fail(format!(
                "price impact {:.2}% exceeds ceiling {:.2}%",
                price_impact_pct, params.impact_ceiling_pct
            ))
        } else {
            Check::pass(format!("price impact {:.2}%", price_impact_pct))
        };

        let reserve_depth = self.depth_check(params, amount, expected_out, &view);

        let (gas_budget, gas_cost_wei) = self.gas_budget(params, amount, min_out).await;

        let limits = match self.limits.can_sell(amount, &params.caps) {
            Ok(()) => Check::pass("inside rate and volume limits"),
            Err(e) => Check::fail(e.to_string()),
        };

        Ok(PreflightReport {
            network,
            pair_identity,
            balance,
            allowance,
            quote,
            price_impact,
            reserve_depth,
            gas_budget,
            limits,
            token_balance,
            current_allowance,
            expected_out,
            min_out,
            price_impact_pct,
            gas_cost_wei,
            reserve_token: view.reserve_token,
            reserve_stable: view.reserve_stable,
        })
    }

    async fn erc20_balance(&self) -> Result<U256, EngineError> {
        let data = Erc20::balanceOfCall { owner: self.owner }.abi_encode();
        let raw = self
            .backend
            .call(self.quote.token(), data.into(), Duration::ZERO)
            .await?;
        Erc20::balanceOfCall::abi_decode_returns(&raw)
            .map_err(|e| EngineError::Protocol(format!("balanceOf decode failed: {}", e)))
    }

    async fn erc20_allowance(&self) -> Result<U256, EngineError> {
        let data = Erc20::allowanceCall {
            owner: self.owner,
            spender: self.quote.router(),
        }
        .abi_encode();
        let raw = self
            .backend
            .call(self.quote.token(), data.into(), Duration::ZERO)
            .await?;
        Erc20::allowanceCall::abi_decode_returns(&raw)
            .map_err(|e| EngineError::Protocol(format!("allowance decode failed: {}", e)))
    }

    fn depth_check(
        &self,
        params: &SaleParams,
        amount: U256,
        expected_out: U256,
        view: &crate::services::seller::quote::PoolView,
    ) -> Check {
        let token_required = params
            .min_reserve_token
            .max(amount.saturating_mul(U256::from(params.depth_multiplier)));
        let stable_required = params
            .min_reserve_stable
            .max(expected_out.saturating_mul(U256::from(params.depth_multiplier)));

        if view.reserve_token < token_required {
            Check::fail(format!(
                "token reserve {} below required depth {}",
                view.reserve_token, token_required
            ))
        } else if view.reserve_stable < stable_required {
            Check::fail(format!(
                "stable reserve {} below required depth {}",
                view.reserve_stable, stable_required
            ))
        } else {
            Check::pass("pool depth sufficient")
        }
    }

    /// Worst case is revoke + approve + swap; the swap estimate comes from
    /// the backend when it can produce one.
    async fn gas_budget(&self, params: &SaleParams, amount: U256, min_out: U256) -> (Check, u128) {
        let swap_data = AmmRouter::swapExactTokensForTokensCall {
            amountIn: amount,
            amountOutMin: min_out,
            path: vec![self.quote.token(), self.quote.stable()],
            to: self.owner,
            deadline: U256::MAX,
        }
        .abi_encode();
        let swap_units = match self
            .backend
            .estimate_gas(&CallRequest {
                from: Some(self.owner),
                to: Some(self.quote.router()),
                data: swap_data.into(),
                ..Default::default()
            })
            .await
        {
            Ok(units) => units,
            Err(e) => {
                tracing::debug!(target: "preflight", error = %e, "Swap gas estimate failed, using default");
                GAS_UNITS_SWAP
            }
        };

        let total_units = (swap_units + 2 * GAS_UNITS_APPROVE)
            .saturating_mul(GAS_SAFETY_MULTIPLIER_BPS)
            / 10_000;
        let price =
            effective_gas_price(self.backend.as_ref(), params.gas_floor_wei, params.gas_ceiling_wei)
                .await;
        let cost = u128::from(total_units).saturating_mul(price);

        let native = match self.backend.balance(self.owner).await {
            Ok(balance) => balance,
            Err(e) => return (Check::fail(format!("native balance unavailable: {}", e)), cost),
        };

        if native >= U256::from(cost) {
            (Check::pass(format!("gas budget {} wei covered", cost)), cost)
        } else {
            (
                Check::fail(format!(
                    "native balance {} cannot cover worst-case gas {} wei",
                    native, cost
                )),
                cost,
            )
        }
    }
}

fn sorted_pair(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Discount `value` by a percentage, computed in basis points.
pub fn apply_slippage(value: U256, pct: f64) -> U256 {
    let bps = (pct * 100.0).round().clamp(0.0, 9_999.0) as u64;
    value.saturating_mul(U256::from(10_000 - bps)) / U256::from(10_000u64)
}

fn impact_pct(actual: U256, theoretical: U256) -> f64 {
    if theoretical.is_zero() {
        return 100.0;
    }
    let actual = crate::common::units::to_f64(actual);
    let theoretical = crate::common::units::to_f64(theoretical);
    ((1.0 - actual / theoretical) * 100.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::data::abi::AmmPair;
    use crate::infrastructure::network::mock::MockBackend;
    use alloy::sol_types::SolValue;
    use std::sync::Arc;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn caps() -> SaleCaps {
        SaleCaps {
            max_per_tx: U256::from(1_000_000_000_000u64),
            max_daily: U256::from(10_000_000_000_000u64),
            max_hourly_sales: 10,
        }
    }

    fn params(amount: u64) -> SaleParams {
        SaleParams {
            amount_in: U256::from(amount),
            slippage_pct: 1.0,
            safety_slippage_pct: 0.5,
            impact_ceiling_pct: 5.0,
            min_reserve_token: U256::from(10_000u64),
            min_reserve_stable: U256::from(10_000u64),
            depth_multiplier: 30,
            caps: caps(),
            gas_floor_wei: 1_000_000_000,
            gas_ceiling_wei: 20_000_000_000,
            gas_limit_swap: 300_000,
            deadline_secs: 300,
        }
    }

    fn trading_backend(reserve_token: u64, reserve_stable: u64) -> Arc<MockBackend> {
        let backend = Arc::new(MockBackend::new());
        backend.respond(AmmPair::token0Call::SELECTOR, addr(1).abi_encode());
        backend.respond(AmmPair::token1Call::SELECTOR, addr(2).abi_encode());
        backend.respond(
            AmmPair::getReservesCall::SELECTOR,
            (
                U256::from(reserve_token),
                U256::from(reserve_stable),
                U256::ZERO,
            )
                .abi_encode(),
        );
        backend.respond(
            Erc20::balanceOfCall::SELECTOR,
            U256::from(1_000_000_000u64).abi_encode(),
        );
        backend.respond(Erc20::allowanceCall::SELECTOR, U256::ZERO.abi_encode());
        backend
    }

    fn engine(backend: Arc<MockBackend>) -> PreflightEngine {
        let quote = Arc::new(QuoteEngine::new(
            backend.clone(),
            addr(1),
            addr(2),
            addr(3),
            addr(4),
            9,
            18,
        ));
        PreflightEngine::new(backend, quote, Arc::new(LimitsManager::new(9)), addr(9), 9)
    }

    #[tokio::test]
    async fn healthy_pool_passes_all_checks() {
        let backend = trading_backend(100_000_000, 200_000_000);
        let report = engine(backend).run(&params(1_000)).await.unwrap();
        assert!(report.ok(), "unexpected blocker: {:?}", report.first_block());
        assert!(report.expected_out > U256::ZERO);
        assert!(report.min_out < report.expected_out);
    }

    #[tokio::test]
    async fn shallow_reserves_fail_depth_check() {
        // Multiplier 30 x trade 1_000 = 30_000 > token reserve of 25_000.
        let backend = trading_backend(25_000, 60_000_000);
        let report = engine(backend).run(&params(1_000)).await.unwrap();
        assert!(!report.reserve_depth.ok);
        assert!(matches!(
            report.first_block(),
            Some((CheckKind::ReserveDepth, _))
        ));
    }

    #[tokio::test]
    async fn absolute_floor_applies_even_for_tiny_trades() {
        // Trade of 1: multiplier side is negligible, floor of 10_000 binds.
        let backend = trading_backend(9_999, 60_000_000);
        let report = engine(backend).run(&params(1)).await.unwrap();
        assert!(!report.reserve_depth.ok);
    }

    #[tokio::test]
    async fn wrong_pool_tokens_block_nonbypassably() {
        let backend = Arc::new(MockBackend::new());
        backend.respond(AmmPair::token0Call::SELECTOR, addr(7).abi_encode());
        backend.respond(AmmPair::token1Call::SELECTOR, addr(2).abi_encode());
        backend.respond(
            AmmPair::getReservesCall::SELECTOR,
            (U256::from(1u64), U256::from(1u64), U256::ZERO).abi_encode(),
        );
        // pool_view already rejects a pool that does not contain the token.
        let err = engine(backend).run(&params(1_000)).await.unwrap_err();
        assert!(matches!(err, EngineError::Safety(_)));
    }

    #[tokio::test]
    async fn limit_breach_is_reported_as_limit_error() {
        let backend = trading_backend(100_000_000, 200_000_000);
        let mut p = params(1_000);
        p.caps.max_per_tx = U256::from(999u64);
        let report = engine(backend).run(&p).await.unwrap();
        match report.as_error() {
            Some(EngineError::Limit(_)) => {}
            other => panic!("expected limit error, got {:?}", other),
        }
    }

    #[test]
    fn slippage_discount_is_exact_in_bps() {
        assert_eq!(
            apply_slippage(U256::from(10_000u64), 1.5),
            U256::from(9_850u64)
        );
        assert_eq!(apply_slippage(U256::from(10_000u64), 0.0), U256::from(10_000u64));
    }

    #[test]
    fn impact_is_total_when_no_theoretical_output() {
        assert_eq!(impact_pct(U256::ZERO, U256::ZERO), 100.0);
    }
}
