// SPDX-License-Identifier: MIT

use autoseller::app::config::{BackendMode, Settings};
use autoseller::app::logging::setup_logging;
use autoseller::common::retry::retry_async;
use autoseller::common::units::format_amount;
use autoseller::domain::error::EngineError;
use autoseller::domain::events::{EngineEvent, EventBus};
use autoseller::infrastructure::network::backend::SharedBackend;
use autoseller::infrastructure::network::node::NodeBackend;
use autoseller::infrastructure::network::proxy::ProxyBackend;
use autoseller::services::seller::lifecycle::TradeController;
use autoseller::services::seller::limits::LimitsManager;
use autoseller::services::seller::nonce::NonceManager;
use autoseller::services::seller::preflight::PreflightEngine;
use autoseller::services::seller::quote::QuoteEngine;
use autoseller::services::seller::scheduler::Autoseller;
use autoseller::services::seller::signer::{LocalSigner, SaleSigner};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about = "AMM autoseller engine")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long)]
    config: Option<String>,

    /// Do not submit transactions, only validate and log
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Execute one manual sale and exit instead of running the scheduler
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let cli = Cli::parse();

    let settings = Settings::load_with_path(cli.config.as_deref())?;
    setup_logging(if settings.debug { "debug" } else { "info" }, cli.json_logs);

    let signer = Arc::new(LocalSigner::from_key(&settings.wallet_key)?);
    if signer.address() != settings.wallet_address {
        return Err(EngineError::Config(format!(
            "wallet_address {} does not match wallet_key address {}",
            settings.wallet_address,
            signer.address()
        )));
    }

    let backend: SharedBackend = match settings.backend_mode {
        BackendMode::Node => Arc::new(NodeBackend::new(
            settings.node_endpoint.as_deref().unwrap_or_default(),
            settings.node_read_endpoints.clone(),
        )?),
        BackendMode::Proxy => Arc::new(ProxyBackend::new(
            settings.proxy_endpoint.as_deref().unwrap_or_default(),
            settings.proxy_api_keys.clone(),
        )?),
    };
    tracing::info!(target: "backend", backend = %backend.describe(), "Backend configured");

    // Startup probe with tolerance for a briefly flaky endpoint.
    let gas_wei = retry_async(
        |_| {
            let backend = backend.clone();
            async move { backend.gas_price().await }
        },
        3,
        Duration::from_millis(500),
    )
    .await?;
    tracing::info!(target: "backend", gas_wei, "Backend reachable");

    let quote = Arc::new(QuoteEngine::new(
        backend.clone(),
        settings.token_address,
        settings.stable_address,
        settings.pair_address,
        settings.router_address,
        settings.token_decimals,
        settings.stable_decimals,
    ));

    // Decimals verification is fatal on mismatch; only connectivity
    // problems are worth a second attempt.
    let mut attempt = 0;
    loop {
        attempt += 1;
        match quote.connect_check(settings.token_decimals).await {
            Ok(()) => break,
            Err(e) if e.is_transient() && attempt < 3 => {
                tracing::warn!(target: "backend", attempt, error = %e, "Decimals check failed, retrying");
                sleep(Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }

    let (events, mut event_rx) = EventBus::channel();
    let token_decimals = settings.token_decimals;
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                EngineEvent::Log { message } => {
                    tracing::info!(target: "events", "{message}");
                }
                EngineEvent::PriceTick {
                    price,
                    reserve_token,
                    reserve_stable,
                } => {
                    tracing::debug!(
                        target: "events",
                        price,
                        %reserve_token,
                        %reserve_stable,
                        "Price tick"
                    );
                }
                EngineEvent::GasPrice { wei } => {
                    tracing::debug!(target: "events", wei, "Gas price");
                }
                EngineEvent::Sold {
                    amount_in,
                    min_out,
                    tx_hash,
                } => {
                    tracing::info!(
                        target: "events",
                        amount = %format_amount(amount_in, token_decimals),
                        %min_out,
                        tx = %format!("{tx_hash:#x}"),
                        "Sold"
                    );
                }
                EngineEvent::Alert { title, message } => {
                    tracing::error!(target: "events", %title, "{message}");
                }
                EngineEvent::Paused { reason } => {
                    tracing::warn!(target: "events", "Paused: {reason}");
                }
                EngineEvent::Resumed => {
                    tracing::info!(target: "events", "Resumed");
                }
            }
        }
    });

    let limits = Arc::new(LimitsManager::new(settings.token_decimals));
    let nonce = Arc::new(NonceManager::new(backend.clone(), signer.address()));
    let preflight = Arc::new(PreflightEngine::new(
        backend.clone(),
        quote.clone(),
        limits.clone(),
        signer.address(),
        settings.token_decimals,
    ));
    let controller = Arc::new(TradeController::new(
        backend.clone(),
        quote.clone(),
        nonce,
        limits,
        preflight.clone(),
        signer,
        events.clone(),
        settings.chain_id,
        settings.token_decimals,
        cli.dry_run,
    ));

    if cli.once {
        let outcome = controller.sell(&settings.sale_params()?).await?;
        tracing::info!(
            target: "trade",
            tx = %format!("{:#x}", outcome.tx_hash),
            amount = %format_amount(outcome.amount_in, settings.token_decimals),
            "Manual sale complete"
        );
        return Ok(());
    }

    let seller = Autoseller::new(
        controller,
        quote,
        preflight,
        backend,
        events,
        settings.sell_plan()?,
    );
    let loop_handle = tokio::spawn(seller.clone().run());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| EngineError::Config(format!("signal handler failed: {}", e)))?;
    tracing::info!("Shutdown requested");
    seller.stop();
    loop_handle
        .await
        .map_err(|e| EngineError::Unknown(anyhow::anyhow!("scheduler task join failed: {e}")))?;
    Ok(())
}
