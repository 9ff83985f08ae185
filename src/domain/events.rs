// SPDX-License-Identifier: MIT

use alloy::primitives::{B256, U256};
use tokio::sync::mpsc;

/// Typed notifications emitted by the engine. Consumers (a UI, a log
/// drain) own the receiving end and drain it on their own schedule.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Log {
        message: String,
    },
    PriceTick {
        price: f64,
        reserve_token: U256,
        reserve_stable: U256,
    },
    GasPrice {
        wei: u128,
    },
    Sold {
        amount_in: U256,
        min_out: U256,
        tx_hash: B256,
    },
    Alert {
        title: String,
        message: String,
    },
    Paused {
        reason: String,
    },
    Resumed,
}

/// Cloneable sender half of the event channel. A disconnected bus drops
/// events silently so the engine never blocks on a missing consumer.
#[derive(Clone, Default)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A bus with no consumer attached.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Log {
            message: message.into(),
        });
    }

    pub fn alert(&self, title: impl Into<String>, message: impl Into<String>) {
        self.emit(EngineEvent::Alert {
            title: title.into(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_to_attached_receiver() {
        let (bus, mut rx) = EventBus::channel();
        bus.log("hello");
        match rx.recv().await {
            Some(EngineEvent::Log { message }) => assert_eq!(message, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn disconnected_bus_drops_events() {
        let bus = EventBus::disconnected();
        bus.alert("title", "body");
    }
}
