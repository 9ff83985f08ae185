// SPDX-License-Identifier: MIT

use crate::infrastructure::network::backend::Backend;

/// Effective gas price for the next transaction. Fallback precedence is
/// explicit: network value, else the configured floor; the result is
/// always clamped into [floor, ceiling].
pub async fn effective_gas_price(backend: &dyn Backend, floor_wei: u128, ceiling_wei: u128) -> u128 {
    let base = match backend.gas_price().await {
        Ok(price) => price,
        Err(e) => {
            tracing::debug!(target: "gas", error = %e, "Gas price fetch failed, using floor");
            floor_wei
        }
    };
    base.max(floor_wei).min(ceiling_wei.max(floor_wei))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::mock::MockBackend;

    #[tokio::test]
    async fn network_price_clamped_between_floor_and_ceiling() {
        let backend = MockBackend::new();
        *backend.gas_price_wei.lock().unwrap() = Ok(5_000_000_000);

        assert_eq!(
            effective_gas_price(&backend, 1_000_000_000, 20_000_000_000).await,
            5_000_000_000
        );
        assert_eq!(
            effective_gas_price(&backend, 6_000_000_000, 20_000_000_000).await,
            6_000_000_000
        );
        assert_eq!(
            effective_gas_price(&backend, 1_000_000_000, 4_000_000_000).await,
            4_000_000_000
        );
    }

    #[tokio::test]
    async fn falls_back_to_floor_when_network_fails() {
        let backend = MockBackend::new();
        *backend.gas_price_wei.lock().unwrap() = Err("offline".into());

        assert_eq!(
            effective_gas_price(&backend, 3_000_000_000, 20_000_000_000).await,
            3_000_000_000
        );
    }
}
