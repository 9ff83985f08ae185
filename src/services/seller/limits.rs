// SPDX-License-Identifier: MIT

use crate::common::time::current_unix;
use crate::common::units::format_amount;
use crate::domain::constants::{DAILY_WINDOW_SECS, HOURLY_WINDOW_SECS};
use crate::domain::error::EngineError;
use alloy::primitives::U256;
use std::sync::Mutex;

/// Caps supplied per call so the operator can adjust them at runtime.
#[derive(Debug, Clone)]
pub struct SaleCaps {
    pub max_per_tx: U256,
    pub max_daily: U256,
    pub max_hourly_sales: u32,
}

#[derive(Debug)]
struct LimitsState {
    daily_volume: U256,
    hourly_count: u32,
    daily_window_start: u64,
    hourly_window_start: u64,
}

/// Rolling-window sale caps. Windows reset lazily on each check; sales are
/// recorded only after on-chain confirmation.
pub struct LimitsManager {
    decimals: u8,
    state: Mutex<LimitsState>,
}

impl LimitsManager {
    pub fn new(decimals: u8) -> Self {
        let now = current_unix();
        Self {
            decimals,
            state: Mutex::new(LimitsState {
                daily_volume: U256::ZERO,
                hourly_count: 0,
                daily_window_start: now,
                hourly_window_start: now,
            }),
        }
    }

    pub fn can_sell(&self, amount: U256, caps: &SaleCaps) -> Result<(), EngineError> {
        self.check_at(amount, caps, current_unix())
    }

    pub fn record_sale(&self, amount: U256) {
        self.record_at(amount, current_unix());
    }

    fn check_at(&self, amount: U256, caps: &SaleCaps, now: u64) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_windows(&mut st, now);

        if amount > caps.max_per_tx {
            return Err(EngineError::Limit(format!(
                "amount {} exceeds per-transaction cap {}",
                format_amount(amount, self.decimals),
                format_amount(caps.max_per_tx, self.decimals)
            )));
        }
        if st.daily_volume.saturating_add(amount) > caps.max_daily {
            return Err(EngineError::Limit(format!(
                "daily cap {} would be exceeded ({} already sold)",
                format_amount(caps.max_daily, self.decimals),
                format_amount(st.daily_volume, self.decimals)
            )));
        }
        if st.hourly_count >= caps.max_hourly_sales {
            return Err(EngineError::Limit(format!(
                "hourly sale count reached its cap of {}",
                caps.max_hourly_sales
            )));
        }
        Ok(())
    }

    fn record_at(&self, amount: U256, now: u64) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_windows(&mut st, now);
        st.daily_volume = st.daily_volume.saturating_add(amount);
        st.hourly_count = st.hourly_count.saturating_add(1);
    }

    fn roll_windows(st: &mut LimitsState, now: u64) {
        if now.saturating_sub(st.daily_window_start) >= DAILY_WINDOW_SECS {
            st.daily_volume = U256::ZERO;
            st.daily_window_start = now;
        }
        if now.saturating_sub(st.hourly_window_start) >= HOURLY_WINDOW_SECS {
            st.hourly_count = 0;
            st.hourly_window_start = now;
        }
    }
}
