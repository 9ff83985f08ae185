// SPDX-License-Identifier: MIT

use alloy::primitives::{Address, Bytes};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    to: Address,
    data: Bytes,
}

#[derive(Debug)]
struct CallEntry {
    value: Bytes,
    inserted: Instant,
}

/// Read-result cache keyed on (target, calldata). Entries carry only their
/// insertion time; the freshness window is supplied by each caller, so the
/// same entry can serve both a short coalescing window and a longer TTL.
#[derive(Debug, Default)]
pub struct CallCache {
    entries: Mutex<HashMap<CallKey, CallEntry>>,
}

impl CallCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, to: Address, data: &Bytes, max_age: Duration) -> Option<Bytes> {
        if max_age.is_zero() {
            return None;
        }
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = CallKey {
            to,
            data: data.clone(),
        };
        entries
            .get(&key)
            .filter(|entry| entry.inserted.elapsed() <= max_age)
            .map(|entry| entry.value.clone())
    }

    pub fn put(&self, to: Address, data: Bytes, value: Bytes) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= MAX_ENTRIES {
            let cutoff = Instant::now();
            entries.retain(|_, entry| cutoff.duration_since(entry.inserted) < Duration::from_secs(60));
            if entries.len() >= MAX_ENTRIES {
                entries.clear();
            }
        }
        entries.insert(
            CallKey { to, data },
            CallEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }
}

/// Single-slot TTL cache for scalar reads (gas price).
#[derive(Debug, Default)]
pub struct ScalarCache {
    slot: Mutex<Option<(Instant, u128)>>,
}

impl ScalarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, max_age: Duration) -> Option<u128> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.filter(|(inserted, _)| inserted.elapsed() <= max_age)
            .map(|(_, value)| value)
    }

    pub fn put(&self, value: u128) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((Instant::now(), value));
    }
}
