// SPDX-License-Identifier: MIT

use crate::common::time::current_unix;
use crate::common::units::format_amount;
use crate::domain::constants::{
    BROADCAST_RETRY_DELAY, GAS_BUMP_MIN_STEP_WEI, GAS_LIMIT_APPROVE, GAS_LIMIT_TRANSFER,
    RECEIPT_POLL_CAP, RECEIPT_POLL_START, REPLACEMENT_BUMP_BPS, SWAP_ATTEMPTS,
};
use crate::domain::error::EngineError;
use crate::domain::events::{EngineEvent, EventBus};
use crate::infrastructure::data::abi::{AmmRouter, Erc20};
use crate::infrastructure::network::backend::{SharedBackend, TxReceipt};
use crate::services::seller::gas::effective_gas_price;
use crate::services::seller::limits::LimitsManager;
use crate::services::seller::nonce::NonceManager;
use crate::services::seller::preflight::{PreflightEngine, SaleParams};
use crate::services::seller::quote::QuoteEngine;
use crate::services::seller::signer::SaleSigner;
use alloy::consensus::TxLegacy;
use alloy::primitives::{Address, TxKind, B256, U256};
use alloy::sol_types::SolCall;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct SaleOutcome {
    pub tx_hash: B256,
    pub amount_in: U256,
    pub min_out: U256,
}

/// Drives one sale through its full lifecycle: preflight, exact-match
/// allowance convergence, bounded swap submission, receipt wait and the
/// post-trade revoke. Also exposes the same-nonce cancel/replace escape
/// hatch for stuck transactions.
pub struct TradeController {
    backend: SharedBackend,
    quote: Arc<QuoteEngine>,
    nonce: Arc<NonceManager>,
    limits: Arc<LimitsManager>,
    preflight: Arc<PreflightEngine>,
    signer: Arc<dyn SaleSigner>,
    events: EventBus,
    chain_id: u64,
    token_decimals: u8,
    dry_run: bool,
}

impl TradeController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: SharedBackend,
        quote: Arc<QuoteEngine>,
        nonce: Arc<NonceManager>,
        limits: Arc<LimitsManager>,
        preflight: Arc<PreflightEngine>,
        signer: Arc<dyn SaleSigner>,
        events: EventBus,
        chain_id: u64,
        token_decimals: u8,
        dry_run: bool,
    ) -> Self {
        Self {
            backend,
            quote,
            nonce,
            limits,
            preflight,
            signer,
            events,
            chain_id,
            token_decimals,
            dry_run,
        }
    }

    pub async fn sell(&self, params: &SaleParams) -> Result<SaleOutcome, EngineError> {
        let report = self.preflight.run(params).await?;
        if let Some(err) = report.as_error() {
            return Err(err);
        }
        let amount = params.amount_in;
        let min_out = report.min_out;

        if self.dry_run {
            self.events.log(format!(
                "dry-run: would sell {} for at least {}",
                format_amount(amount, self.token_decimals),
                min_out
            ));
            return Ok(SaleOutcome {
                tx_hash: B256::ZERO,
                amount_in: amount,
                min_out,
            });
        }

        self.ensure_exact_allowance(amount, params).await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let gas_price = effective_gas_price(
                self.backend.as_ref(),
                params.gas_floor_wei,
                params.gas_ceiling_wei,
            )
            .await;
            let deadline = current_unix().saturating_add(params.deadline_secs);
            let data = AmmRouter::swapExactTokensForTokensCall {
                amountIn: amount,
                amountOutMin: min_out,
                path: vec![self.quote.token(), self.quote.stable()],
                to: self.signer.address(),
                deadline: U256::from(deadline),
            }
            .abi_encode();

            match self
                .broadcast(self.quote.router(), U256::ZERO, data, params.gas_limit_swap, gas_price)
                .await
            {
                Err(e) if attempt < SWAP_ATTEMPTS && !matches!(e, EngineError::Nonce(_)) => {
                    tracing::warn!(target: "trade", attempt, error = %e, "Swap broadcast failed, retrying");
                    self.events
                        .log(format!("swap broadcast failed (attempt {}): {}", attempt, e));
                    sleep(BROADCAST_RETRY_DELAY).await;
                }
                Err(e) => {
                    // Nothing was broadcast for this final attempt, so the
                    // approved amount can safely be cleared.
                    self.revoke_best_effort(params).await;
                    return Err(e);
                }
                Ok(tx_hash) => {
                    return self
                        .settle_swap(tx_hash, amount, min_out, deadline, params)
                        .await;
                }
            }
        }
    }

    async fn settle_swap(
        &self,
        tx_hash: B256,
        amount: U256,
        min_out: U256,
        deadline: u64,
        params: &SaleParams,
    ) -> Result<SaleOutcome, EngineError> {
        match self.wait_receipt(tx_hash, deadline).await {
            Ok(receipt) => {
                self.nonce.release(true).await;
                if receipt.status {
                    self.limits.record_sale(amount);
                    self.events.emit(EngineEvent::Sold {
                        amount_in: amount,
                        min_out,
                        tx_hash,
                    });
                    self.revoke_best_effort(params).await;
                    Ok(SaleOutcome {
                        tx_hash,
                        amount_in: amount,
                        min_out,
                    })
                } else {
                    Err(EngineError::Revert {
                        hash: format!("{:#x}", tx_hash),
                    })
                }
            }
            Err(e) => {
                // The transaction may still be pending: keep the nonce
                // reusable for cancel/replace and touch nothing else.
                self.nonce.release(false).await;
                Err(e)
            }
        }
    }

    /// Converge the router allowance to exactly `target`: a stale nonzero
    /// value is revoked to zero (and confirmed) before the new approval.
    pub async fn ensure_exact_allowance(
        &self,
        target: U256,
        params: &SaleParams,
    ) -> Result<(), EngineError> {
        let current = self.read_allowance().await?;
        if current == target {
            return Ok(());
        }
        if !current.is_zero() {
            self.approve(U256::ZERO, params)
                .await
                .map_err(|e| EngineError::Allowance(format!("revoke to zero failed: {}", e)))?;
        }
        if !target.is_zero() {
            self.approve(target, params)
                .await
                .map_err(|e| EngineError::Allowance(format!("approve failed: {}", e)))?;
        }
        Ok(())
    }

    async fn approve(&self, value: U256, params: &SaleParams) -> Result<(), EngineError> {
        let data = Erc20::approveCall {
            spender: self.quote.router(),
            value,
        }
        .abi_encode();
        let gas_price = effective_gas_price(
            self.backend.as_ref(),
            params.gas_floor_wei,
            params.gas_ceiling_wei,
        )
        .await;
        let deadline = current_unix().saturating_add(params.deadline_secs);
        let tx_hash = self
            .broadcast(self.quote.token(), U256::ZERO, data, GAS_LIMIT_APPROVE, gas_price)
            .await?;
        match self.wait_receipt(tx_hash, deadline).await {
            Ok(receipt) => {
                self.nonce.release(true).await;
                if receipt.status {
                    Ok(())
                } else {
                    Err(EngineError::Revert {
                        hash: format!("{:#x}", tx_hash),
                    })
                }
            }
            Err(e) => {
                self.nonce.release(false).await;
                Err(e)
            }
        }
    }

    /// Post-trade cleanup; failures are logged, never fatal.
    async fn revoke_best_effort(&self, params: &SaleParams) {
        let current = match self.read_allowance().await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(target: "trade", error = %e, "Allowance read failed, skipping revoke");
                return;
            }
        };
        if current.is_zero() {
            return;
        }
        if let Err(e) = self.approve(U256::ZERO, params).await {
            tracing::warn!(target: "trade", error = %e, "Best-effort revoke failed");
            self.events.log(format!("post-trade revoke failed: {}", e));
        }
    }

    /// Same-nonce zero-value self-transfer at a bumped gas price, for
    /// replacing a transaction stuck in the mempool.
    pub async fn cancel_replace(&self, params: &SaleParams) -> Result<B256, EngineError> {
        let last = self.nonce.last_sent().await.ok_or_else(|| {
            EngineError::Nonce("no broadcast transaction available to replace".into())
        })?;
        let floor = effective_gas_price(
            self.backend.as_ref(),
            params.gas_floor_wei,
            params.gas_ceiling_wei,
        )
        .await;
        let bumped = (last
            .gas_price
            .saturating_mul(u128::from(REPLACEMENT_BUMP_BPS))
            / 10_000)
            .max(floor.saturating_add(GAS_BUMP_MIN_STEP_WEI));

        self.nonce.reserve(last.nonce).await?;
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: last.nonce,
            gas_price: bumped,
            gas_limit: GAS_LIMIT_TRANSFER,
            to: TxKind::Call(self.signer.address()),
            value: U256::ZERO,
            input: Default::default(),
        };
        let raw = match self.signer.sign_transaction(tx) {
            Ok(raw) => raw,
            Err(e) => {
                self.nonce.release(false).await;
                return Err(e);
            }
        };
        match self.backend.send_raw_transaction(&raw).await {
            Ok(tx_hash) => {
                self.nonce.record_sent(last.nonce, bumped, tx_hash).await;
                self.nonce.release(false).await;
                self.events
                    .log(format!("replacement transaction sent: {:#x}", tx_hash));
                Ok(tx_hash)
            }
            Err(e) => {
                self.nonce.release(false).await;
                Err(e)
            }
        }
    }

    async fn read_allowance(&self) -> Result<U256, EngineError> {
        let data = Erc20::allowanceCall {
            owner: self.signer.address(),
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

    async fn broadcast(
        &self,
        to: Address,
        value: U256,
        data: Vec<u8>,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<B256, EngineError> {
        let nonce = self.nonce.next_nonce().await?;
        self.nonce.reserve(nonce).await?;
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(to),
            value,
            input: data.into(),
        };
        let raw = match self.signer.sign_transaction(tx) {
            Ok(raw) => raw,
            Err(e) => {
                self.nonce.release(false).await;
                return Err(e);
            }
        };
        match self.backend.send_raw_transaction(&raw).await {
            Ok(tx_hash) => {
                self.nonce.record_sent(nonce, gas_price, tx_hash).await;
                Ok(tx_hash)
            }
            Err(e) => {
                self.nonce.release(false).await;
                Err(e)
            }
        }
    }

    /// Poll for the receipt with capped exponential backoff, bounded by
    /// the transaction's own on-chain deadline.
    async fn wait_receipt(&self, tx_hash: B256, deadline: u64) -> Result<TxReceipt, EngineError> {
        let mut delay = RECEIPT_POLL_START;
        loop {
            match self.backend.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(target: "trade", error = %e, "Receipt poll failed, will retry");
                }
                Err(e) => return Err(e),
            }
            if current_unix() >= deadline {
                return Err(EngineError::Timeout {
                    hash: format!("{:#x}", tx_hash),
                });
            }
            sleep(delay).await;
            delay = (delay * 2).min(RECEIPT_POLL_CAP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::data::abi::AmmPair;
    use crate::infrastructure::network::mock::MockBackend;
    use crate::services::seller::limits::SaleCaps;
    use crate::services::seller::signer::LocalSigner;
    use alloy::consensus::TxEnvelope;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::sol_types::SolValue;
    use std::sync::atomic::Ordering;

    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe512961708279f1d0f7c0e3e1f6a0aa";

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
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
            caps: SaleCaps {
                max_per_tx: U256::from(1_000_000u64),
                max_daily: U256::from(10_000_000u64),
                max_hourly_sales: 10,
            },
            gas_floor_wei: 1_000_000_000,
            gas_ceiling_wei: 20_000_000_000,
            gas_limit_swap: 300_000,
            deadline_secs: 300,
        }
    }

    struct Rig {
        backend: Arc<MockBackend>,
        controller: TradeController,
        limits: Arc<LimitsManager>,
        nonce: Arc<NonceManager>,
    }

    fn rig() -> Rig {
        let backend = Arc::new(MockBackend::new());
        let signer = Arc::new(LocalSigner::from_key(TEST_KEY).unwrap());
        let owner = signer.address();
        let quote = Arc::new(QuoteEngine::new(
            backend.clone(),
            addr(1),
            addr(2),
            addr(3),
            addr(4),
            9,
            18,
        ));
        let limits = Arc::new(LimitsManager::new(9));
        let nonce = Arc::new(NonceManager::new(backend.clone(), owner));
        let preflight = Arc::new(PreflightEngine::new(
            backend.clone(),
            quote.clone(),
            limits.clone(),
            owner,
            9,
        ));
        let controller = TradeController::new(
            backend.clone(),
            quote,
            nonce.clone(),
            limits.clone(),
            preflight,
            signer,
            EventBus::disconnected(),
            56,
            9,
            false,
        );
        Rig {
            backend,
            controller,
            limits,
            nonce,
        }
    }

    fn install_pool(backend: &MockBackend) {
        backend.respond(AmmPair::token0Call::SELECTOR, addr(1).abi_encode());
        backend.respond(AmmPair::token1Call::SELECTOR, addr(2).abi_encode());
        backend.respond(
            AmmPair::getReservesCall::SELECTOR,
            (
                U256::from(100_000_000u64),
                U256::from(200_000_000u64),
                U256::ZERO,
            )
                .abi_encode(),
        );
        backend.respond(
            Erc20::balanceOfCall::SELECTOR,
            U256::from(1_000_000_000u64).abi_encode(),
        );
    }

    fn set_allowance(backend: &MockBackend, value: u64) {
        backend.respond(Erc20::allowanceCall::SELECTOR, U256::from(value).abi_encode());
    }

    fn decode_legacy(raw: &[u8]) -> TxLegacy {
        match TxEnvelope::decode_2718(&mut &raw[..]).expect("decode sent tx") {
            TxEnvelope::Legacy(signed) => signed.strip_signature(),
            other => panic!("expected legacy tx, got {other:?}"),
        }
    }

    fn decoded_sends(backend: &MockBackend) -> Vec<TxLegacy> {
        backend.sent.lock().unwrap().iter().map(|raw| decode_legacy(raw)).collect()
    }

    #[tokio::test]
    async fn allowance_already_exact_sends_nothing() {
        let rig = rig();
        set_allowance(&rig.backend, 500);
        rig.controller
            .ensure_exact_allowance(U256::from(500u64), &params(500))
            .await
            .unwrap();
        assert_eq!(rig.backend.sent_count(), 0);
    }

    #[tokio::test]
    async fn allowance_from_zero_is_one_approve() {
        let rig = rig();
        set_allowance(&rig.backend, 0);
        rig.controller
            .ensure_exact_allowance(U256::from(500u64), &params(500))
            .await
            .unwrap();

        let sent = decoded_sends(&rig.backend);
        assert_eq!(sent.len(), 1);
        let call = Erc20::approveCall::abi_decode(sent[0].input.as_ref()).unwrap();
        assert_eq!(call.value, U256::from(500u64));
        assert_eq!(sent[0].to, TxKind::Call(addr(1)));
    }

    #[tokio::test]
    async fn stale_allowance_is_revoked_then_approved() {
        let rig = rig();
        set_allowance(&rig.backend, 200);
        rig.controller
            .ensure_exact_allowance(U256::from(500u64), &params(500))
            .await
            .unwrap();

        let sent = decoded_sends(&rig.backend);
        assert_eq!(sent.len(), 2);
        let revoke = Erc20::approveCall::abi_decode(sent[0].input.as_ref()).unwrap();
        let approve = Erc20::approveCall::abi_decode(sent[1].input.as_ref()).unwrap();
        assert_eq!(revoke.value, U256::ZERO);
        assert_eq!(approve.value, U256::from(500u64));
    }

    #[tokio::test(start_paused = true)]
    async fn swap_retries_exactly_five_times_without_gas_bump() {
        let rig = rig();
        install_pool(&rig.backend);
        // Allowance already matches: no approve traffic in the way.
        set_allowance(&rig.backend, 1_000);
        rig.backend.fail_all_sends.store(true, Ordering::Relaxed);

        let started = tokio::time::Instant::now();
        let err = rig.controller.sell(&params(1_000)).await.unwrap_err();
        assert!(matches!(err, EngineError::Network(_)));

        let sent = decoded_sends(&rig.backend);
        let swaps: Vec<_> = sent
            .iter()
            .filter(|tx| tx.to == TxKind::Call(addr(4)))
            .collect();
        assert_eq!(swaps.len(), SWAP_ATTEMPTS as usize);
        let first_price = swaps[0].gas_price;
        for tx in &swaps {
            assert_eq!(tx.gas_price, first_price);
            assert_eq!(tx.nonce, swaps[0].nonce);
        }
        // Nothing was broadcast on the final attempt, so one best-effort
        // revoke attempt trails the five swap broadcasts.
        assert_eq!(sent.len(), SWAP_ATTEMPTS as usize + 1);
        // Four fixed five-second pauses between the five attempts.
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn confirmed_sale_records_limits_and_revokes() {
        let rig = rig();
        install_pool(&rig.backend);
        set_allowance(&rig.backend, 1_000);

        let outcome = rig.controller.sell(&params(1_000)).await.unwrap();
        assert_ne!(outcome.tx_hash, B256::ZERO);

        let sent = decoded_sends(&rig.backend);
        // Swap plus the post-trade revoke.
        assert_eq!(sent.len(), 2);
        let swap =
            AmmRouter::swapExactTokensForTokensCall::abi_decode(sent[0].input.as_ref()).unwrap();
        assert_eq!(swap.amountIn, U256::from(1_000u64));
        let revoke = Erc20::approveCall::abi_decode(sent[1].input.as_ref()).unwrap();
        assert_eq!(revoke.value, U256::ZERO);

        // The sale was recorded against the hourly window.
        let tight = SaleCaps {
            max_per_tx: U256::from(1_000_000u64),
            max_daily: U256::from(10_000_000u64),
            max_hourly_sales: 1,
        };
        assert!(rig.limits.can_sell(U256::from(1u64), &tight).is_err());
    }

    #[tokio::test]
    async fn receipt_timeout_is_surfaced_and_nothing_else_happens() {
        let rig = rig();
        install_pool(&rig.backend);
        set_allowance(&rig.backend, 1_000);
        // Receipt never appears, and the deadline is already due.
        rig.backend.receipts.lock().unwrap().push_back(None);
        let mut p = params(1_000);
        p.deadline_secs = 0;

        let err = rig.controller.sell(&p).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        // One broadcast, no retry, no gas bump, no revoke while the swap
        // may still land.
        assert_eq!(rig.backend.sent_count(), 1);
    }

    #[tokio::test]
    async fn reverted_swap_consumes_nonce_and_fails_terminally() {
        let rig = rig();
        install_pool(&rig.backend);
        set_allowance(&rig.backend, 1_000);
        rig.backend.receipt_status.store(false, Ordering::Relaxed);

        let err = rig.controller.sell(&params(1_000)).await.unwrap_err();
        assert!(matches!(err, EngineError::Revert { .. }));
        assert_eq!(rig.backend.sent_count(), 1);

        // The reverted transaction consumed its nonce on-chain.
        rig.backend.pending_nonce.store(0, Ordering::Relaxed);
        assert_eq!(rig.nonce.next_nonce().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_replace_bumps_gas_and_reuses_nonce() {
        let rig = rig();
        install_pool(&rig.backend);
        set_allowance(&rig.backend, 1_000);
        rig.backend.receipts.lock().unwrap().push_back(None);
        let mut p = params(1_000);
        p.deadline_secs = 0;
        let _ = rig.controller.sell(&p).await.unwrap_err();

        let sent_before = rig.backend.sent_count();
        let last = rig.nonce.last_sent().await.unwrap();
        rig.controller.cancel_replace(&p).await.unwrap();

        let sent = decoded_sends(&rig.backend);
        assert_eq!(sent.len(), sent_before + 1);
        let replacement = sent.last().unwrap();
        assert_eq!(replacement.nonce, last.nonce);
        assert_eq!(replacement.value, U256::ZERO);
        assert!(replacement.gas_price >= last.gas_price * 11 / 10);
    }

    #[tokio::test]
    async fn cancel_replace_without_history_is_an_error() {
        let rig = rig();
        let err = rig.controller.cancel_replace(&params(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Nonce(_)));
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let backend = Arc::new(MockBackend::new());
        let signer = Arc::new(LocalSigner::from_key(TEST_KEY).unwrap());
        let owner = signer.address();
        let quote = Arc::new(QuoteEngine::new(
            backend.clone(),
            addr(1),
            addr(2),
            addr(3),
            addr(4),
            9,
            18,
        ));
        let limits = Arc::new(LimitsManager::new(9));
        let nonce = Arc::new(NonceManager::new(backend.clone(), owner));
        let preflight = Arc::new(PreflightEngine::new(
            backend.clone(),
            quote.clone(),
            limits.clone(),
            owner,
            9,
        ));
        let controller = TradeController::new(
            backend.clone(),
            quote,
            nonce,
            limits,
            preflight,
            signer,
            EventBus::disconnected(),
            56,
            9,
            true,
        );
        install_pool(&backend);
        set_allowance(&backend, 0);

        let outcome = controller.sell(&params(1_000)).await.unwrap();
        assert_eq!(outcome.tx_hash, B256::ZERO);
        assert_eq!(backend.sent_count(), 0);
    }
}
