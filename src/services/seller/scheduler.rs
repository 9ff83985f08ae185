// SPDX-License-Identifier: MIT

use crate::common::time::current_unix;
use crate::domain::constants::BLOCKED_TICKS_BEFORE_PAUSE;
use crate::domain::events::{EngineEvent, EventBus};
use crate::infrastructure::network::backend::SharedBackend;
use crate::services::seller::lifecycle::TradeController;
use crate::services::seller::preflight::{PreflightEngine, SaleParams};
use crate::services::seller::quote::QuoteEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SellMode {
    /// Sell once the quoted price reaches the target.
    TargetPrice { target: f64 },
    /// Sell every `every_secs`. With `catch_up`, missed intervals are
    /// worked off one per tick instead of resetting the schedule to now.
    Interval { every_secs: u64, catch_up: bool },
}

#[derive(Debug, Clone)]
pub struct SellPlan {
    pub mode: SellMode,
    pub params: SaleParams,
    pub cooldown_secs: u64,
    pub stop_after_next: bool,
    pub fast_tick_secs: u64,
    pub slow_tick_secs: u64,
}

#[derive(Debug, Default)]
struct ScheduleState {
    next_sell_at: Option<u64>,
    done_count: u64,
    fail_streak: u32,
    paused: bool,
    last_success_at: Option<u64>,
}

/// Background selling loop. One cooperative iteration per tick; stop and
/// pause are flags checked at the top of each iteration, and the sleep
/// between ticks is cancellable so both take effect promptly.
pub struct Autoseller {
    controller: Arc<TradeController>,
    quote: Arc<QuoteEngine>,
    preflight: Arc<PreflightEngine>,
    backend: SharedBackend,
    events: EventBus,
    plan: SellPlan,
    state: Mutex<ScheduleState>,
    stopped: AtomicBool,
    wake: Notify,
    interactive: AtomicBool,
}

impl Autoseller {
    pub fn new(
        controller: Arc<TradeController>,
        quote: Arc<QuoteEngine>,
        preflight: Arc<PreflightEngine>,
        backend: SharedBackend,
        events: EventBus,
        plan: SellPlan,
    ) -> Arc<Self> {
        Arc::new(Self {
            controller,
            quote,
            preflight,
            backend,
            events,
            plan,
            state: Mutex::new(ScheduleState::default()),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
            interactive: AtomicBool::new(false),
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn resume(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.paused = false;
        st.fail_streak = 0;
        drop(st);
        self.events.emit(EngineEvent::Resumed);
        self.wake.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).paused
    }

    pub fn done_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .done_count
    }

    /// A consumer UI marks itself active to get the fast tick cadence.
    pub fn set_interactive(&self, active: bool) {
        self.interactive.store(active, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    pub async fn run(self: Arc<Self>) {
        tracing::info!(target: "autoseller", "Autoseller loop started");
        loop {
            if self.is_stopped() {
                break;
            }
            if self.is_paused() {
                // Soft spin: nothing runs, but resume takes effect fast.
                self.idle(self.tick_pause()).await;
                continue;
            }
            self.tick().await;
            self.idle(self.tick_pause()).await;
        }
        tracing::info!(target: "autoseller", "Autoseller loop stopped");
    }

    fn tick_pause(&self) -> Duration {
        let armed = !self.is_paused();
        let secs = if armed || self.interactive.load(Ordering::Relaxed) {
            self.plan.fast_tick_secs
        } else {
            self.plan.slow_tick_secs
        };
        Duration::from_secs(secs.max(1))
    }

    async fn idle(&self, duration: Duration) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = sleep(duration) => {}
        }
    }

    async fn tick(&self) {
        let now = current_unix();

        let view = match self.quote.pool_view().await {
            Ok(view) => {
                self.events.emit(EngineEvent::PriceTick {
                    price: view.price,
                    reserve_token: view.reserve_token,
                    reserve_stable: view.reserve_stable,
                });
                if let Ok(wei) = self.backend.gas_price().await {
                    self.events.emit(EngineEvent::GasPrice { wei });
                }
                view
            }
            Err(e) => {
                tracing::warn!(target: "autoseller", error = %e, "Price refresh failed");
                return;
            }
        };

        if let Some(last) = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_success_at
        {
            if now < last.saturating_add(self.plan.cooldown_secs) {
                return;
            }
        }

        let report = match self.preflight.run(&self.plan.params).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(target: "autoseller", error = %e, "Preflight failed");
                return;
            }
        };
        if let Some((kind, check)) = report.first_block() {
            let streak = {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                st.fail_streak += 1;
                st.fail_streak
            };
            tracing::warn!(
                target: "autoseller",
                ?kind,
                streak,
                reason = %check.message,
                "Tick blocked by preflight"
            );
            if streak >= BLOCKED_TICKS_BEFORE_PAUSE {
                self.pause_with_alert("Autoseller paused", check.message.clone());
            }
            return;
        }
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fail_streak = 0;

        let triggered = match self.plan.mode {
            SellMode::TargetPrice { target } => view.price >= target,
            SellMode::Interval { every_secs, .. } => {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                match st.next_sell_at {
                    None => {
                        // First armed tick only schedules the opening sale.
                        st.next_sell_at = Some(now.saturating_add(every_secs.max(1)));
                        false
                    }
                    Some(at) => now >= at,
                }
            }
        };
        if !triggered {
            return;
        }

        match self.controller.sell(&self.plan.params).await {
            Ok(outcome) => {
                let stop_now = {
                    let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    st.done_count += 1;
                    st.last_success_at = Some(now);
                    if let SellMode::Interval {
                        every_secs,
                        catch_up,
                    } = self.plan.mode
                    {
                        let base = st.next_sell_at.unwrap_or(now);
                        st.next_sell_at =
                            Some(advance_schedule(base, every_secs.max(1), catch_up, now));
                    }
                    self.plan.stop_after_next
                };
                tracing::info!(
                    target: "autoseller",
                    tx = %format!("{:#x}", outcome.tx_hash),
                    done = self.done_count(),
                    "Scheduled sale confirmed"
                );
                if stop_now {
                    self.events.log("stop-after-next set, stopping after this sale");
                    self.stop();
                }
            }
            Err(e) => {
                self.pause_with_alert("Sale failed", e.to_string());
            }
        }
    }

    fn pause_with_alert(&self, title: &str, message: String) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .paused = true;
        tracing::error!(target: "autoseller", reason = %message, "{}", title);
        self.events.alert(title, message.clone());
        self.events.emit(EngineEvent::Paused { reason: message });
    }

    #[cfg(test)]
    fn force_next_sell_at(&self, at: u64) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_sell_at = Some(at);
    }
}

/// Next scheduled sale after a success at `now`. Catch-up steps from the
/// previous slot so missed intervals are worked off; otherwise the
/// schedule restarts from now.
fn advance_schedule(previous: u64, every_secs: u64, catch_up: bool, now: u64) -> u64 {
    if catch_up {
        previous.saturating_add(every_secs)
    } else {
        now.saturating_add(every_secs)
    }
}
