// SPDX-License-Identifier: MIT

use std::time::Duration;

/// Pool fee taken by the AMM on the input amount, in basis points.
pub const AMM_FEE_BPS: u64 = 25;
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Broadcast attempts for one swap before the sale is declared failed.
pub const SWAP_ATTEMPTS: u32 = 5;
/// Fixed pause between failed broadcast attempts.
pub const BROADCAST_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Receipt polling starts here and doubles up to the cap.
pub const RECEIPT_POLL_START: Duration = Duration::from_secs(2);
pub const RECEIPT_POLL_CAP: Duration = Duration::from_secs(15);

/// Read-cache windows, tuned per call class.
pub const CALL_COALESCE_WINDOW: Duration = Duration::from_millis(500);
pub const GAS_PRICE_TTL: Duration = Duration::from_secs(15);
pub const RESERVE_TTL: Duration = Duration::from_secs(2);

/// Read-path retry budget for transient backend failures.
pub const READ_RETRY_ATTEMPTS: usize = 3;
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(200);
pub const READ_RETRY_DELAY_CAP: Duration = Duration::from_secs(3);

/// Adaptive pacing for the explorer proxy.
pub const PROXY_GAP_FLOOR: Duration = Duration::from_millis(220);
pub const PROXY_GAP_CAP: Duration = Duration::from_secs(5);
pub const PROXY_ERROR_WINDOW: Duration = Duration::from_secs(30);
pub const PROXY_ERROR_BURST: usize = 3;
pub const PROXY_DECAY_AFTER: u32 = 20;

/// Gas-unit defaults when the backend cannot estimate.
pub const GAS_UNITS_APPROVE: u64 = 60_000;
pub const GAS_UNITS_SWAP: u64 = 220_000;
pub const GAS_LIMIT_APPROVE: u64 = 80_000;
pub const GAS_LIMIT_TRANSFER: u64 = 21_000;
/// Worst-case preflight budget multiplier (basis points).
pub const GAS_SAFETY_MULTIPLIER_BPS: u64 = 13_000;

/// Replacement transactions bump at least 10% over the last sent price,
/// and never less than one step above the current floor.
pub const REPLACEMENT_BUMP_BPS: u64 = 11_000;
pub const GAS_BUMP_MIN_STEP_WEI: u128 = 1_000_000_000;

/// Consecutive blocked scheduler ticks before autopause.
pub const BLOCKED_TICKS_BEFORE_PAUSE: u32 = 2;

pub const DAILY_WINDOW_SECS: u64 = 24 * 60 * 60;
pub const HOURLY_WINDOW_SECS: u64 = 60 * 60;

pub const WEI_PER_GWEI: u128 = 1_000_000_000;
