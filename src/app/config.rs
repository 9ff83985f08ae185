// SPDX-License-Identifier: MIT

use crate::common::units::parse_amount_f64;
use crate::domain::constants::WEI_PER_GWEI;
use crate::domain::error::EngineError;
use crate::services::seller::limits::SaleCaps;
use crate::services::seller::preflight::SaleParams;
use crate::services::seller::scheduler::{SellMode, SellPlan};
use alloy::primitives::Address;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    Node,
    Proxy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    // General
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    // Backend
    #[serde(default = "default_backend_mode")]
    pub backend_mode: BackendMode,
    pub node_endpoint: Option<String>,
    #[serde(default)]
    pub node_read_endpoints: Vec<String>,
    pub proxy_endpoint: Option<String>,
    #[serde(default)]
    pub proxy_api_keys: Vec<String>,

    // Identity
    pub wallet_key: String,
    pub wallet_address: Address,

    // Trading pair
    pub token_address: Address,
    pub stable_address: Address,
    pub pair_address: Address,
    pub router_address: Address,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    #[serde(default = "default_stable_decimals")]
    pub stable_decimals: u8,

    // Sale sizing and safety
    #[serde(default = "default_sell_amount")]
    pub sell_amount_tokens: f64,
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,
    #[serde(default = "default_safety_slippage_pct")]
    pub safety_slippage_pct: f64,
    #[serde(default = "default_impact_ceiling_pct")]
    pub price_impact_ceiling_pct: f64,
    #[serde(default = "default_reserve_floor_tokens")]
    pub reserve_floor_tokens: f64,
    #[serde(default = "default_reserve_floor_stable")]
    pub reserve_floor_stable: f64,
    #[serde(default = "default_depth_multiplier")]
    pub reserve_depth_multiplier: u64,

    // Limits
    #[serde(default = "default_max_per_tx")]
    pub max_per_tx_tokens: f64,
    #[serde(default = "default_max_daily")]
    pub max_daily_tokens: f64,
    #[serde(default = "default_max_hourly_sales")]
    pub max_hourly_sales: u32,

    // Gas and deadlines
    #[serde(default = "default_gas_floor_gwei")]
    pub gas_price_floor_gwei: u64,
    #[serde(default = "default_gas_ceiling_gwei")]
    pub gas_price_ceiling_gwei: u64,
    #[serde(default = "default_gas_limit_swap")]
    pub gas_limit_swap: u64,
    #[serde(default = "default_deadline_minutes")]
    pub deadline_minutes: u64,

    // Scheduler
    #[serde(default = "default_sell_mode")]
    pub sell_mode: String,
    #[serde(default)]
    pub target_price: f64,
    #[serde(default = "default_sell_interval_secs")]
    pub sell_interval_secs: u64,
    #[serde(default = "default_false")]
    pub interval_catch_up: bool,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_false")]
    pub stop_after_next: bool,
    #[serde(default = "default_fast_tick_secs")]
    pub fast_tick_secs: u64,
    #[serde(default = "default_slow_tick_secs")]
    pub slow_tick_secs: u64,
}

// Defaults
fn default_debug() -> bool {
    false
}
fn default_false() -> bool {
    false
}
fn default_chain_id() -> u64 {
    56
}
fn default_backend_mode() -> BackendMode {
    BackendMode::Node
}
fn default_token_decimals() -> u8 {
    9
}
fn default_stable_decimals() -> u8 {
    18
}
fn default_sell_amount() -> f64 {
    100.0
}
fn default_slippage_pct() -> f64 {
    1.0
}
fn default_safety_slippage_pct() -> f64 {
    0.5
}
fn default_impact_ceiling_pct() -> f64 {
    5.0
}
fn default_reserve_floor_tokens() -> f64 {
    10_000.0
}
fn default_reserve_floor_stable() -> f64 {
    1_000.0
}
fn default_depth_multiplier() -> u64 {
    30
}
fn default_max_per_tx() -> f64 {
    1_000.0
}
fn default_max_daily() -> f64 {
    10_000.0
}
fn default_max_hourly_sales() -> u32 {
    6
}
fn default_gas_floor_gwei() -> u64 {
    3
}
fn default_gas_ceiling_gwei() -> u64 {
    20
}
fn default_gas_limit_swap() -> u64 {
    300_000
}
fn default_deadline_minutes() -> u64 {
    5
}
fn default_sell_mode() -> String {
    "interval".to_string()
}
fn default_sell_interval_secs() -> u64 {
    3_600
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_fast_tick_secs() -> u64 {
    3
}
fn default_slow_tick_secs() -> u64 {
    15
}

impl Settings {
    pub fn load() -> Result<Self, EngineError> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(path: Option<&str>) -> Result<Self, EngineError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let selected = resolve_config_path(path);
        let mut builder = Config::builder();
        if let Some(ref selected_path) = selected {
            builder = builder.add_source(File::from(Path::new(selected_path)).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }
        // Precedence: env/.env over the selected profile file.
        builder = builder.add_source(Environment::default());

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        // Allow PROXY_API_KEYS as a comma-separated env string.
        if let Ok(raw) = std::env::var("PROXY_API_KEYS") {
            settings.proxy_api_keys = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.wallet_key.trim().is_empty() {
            return Err(EngineError::Config("WALLET_KEY is missing".into()));
        }
        match self.backend_mode {
            BackendMode::Node => {
                if self.node_endpoint.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(EngineError::Config(
                        "node backend selected but node_endpoint is missing".into(),
                    ));
                }
            }
            BackendMode::Proxy => {
                if self.proxy_endpoint.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(EngineError::Config(
                        "proxy backend selected but proxy_endpoint is missing".into(),
                    ));
                }
                if self.proxy_api_keys.iter().all(|k| k.trim().is_empty()) {
                    return Err(EngineError::Config(
                        "proxy backend selected but proxy_api_keys is empty".into(),
                    ));
                }
            }
        }
        if self.sell_mode_value()? == "target" && self.target_price <= 0.0 {
            return Err(EngineError::Config(
                "target sell mode requires a positive target_price".into(),
            ));
        }
        Ok(())
    }

    // Clamped accessors

    pub fn slippage_pct_value(&self) -> f64 {
        self.slippage_pct.clamp(0.0, 20.0)
    }

    pub fn safety_slippage_pct_value(&self) -> f64 {
        self.safety_slippage_pct.clamp(0.0, 5.0)
    }

    pub fn impact_ceiling_pct_value(&self) -> f64 {
        self.price_impact_ceiling_pct.clamp(0.1, 50.0)
    }

    pub fn depth_multiplier_value(&self) -> u64 {
        self.reserve_depth_multiplier.clamp(1, 1_000)
    }

    pub fn deadline_secs_value(&self) -> u64 {
        self.deadline_minutes.clamp(1, 120) * 60
    }

    pub fn gas_floor_wei_value(&self) -> u128 {
        u128::from(self.gas_price_floor_gwei.max(1)) * WEI_PER_GWEI
    }

    pub fn gas_ceiling_wei_value(&self) -> u128 {
        let floor = self.gas_price_floor_gwei.max(1);
        u128::from(self.gas_price_ceiling_gwei.max(floor)) * WEI_PER_GWEI
    }

    pub fn gas_limit_swap_value(&self) -> u64 {
        self.gas_limit_swap.clamp(100_000, 2_000_000)
    }

    pub fn sell_interval_secs_value(&self) -> u64 {
        self.sell_interval_secs.max(5)
    }

    pub fn fast_tick_secs_value(&self) -> u64 {
        self.fast_tick_secs.clamp(1, 60)
    }

    pub fn slow_tick_secs_value(&self) -> u64 {
        self.slow_tick_secs.clamp(self.fast_tick_secs_value(), 300)
    }

    fn sell_mode_value(&self) -> Result<&str, EngineError> {
        match self.sell_mode.trim().to_ascii_lowercase().as_str() {
            "target" | "target_price" => Ok("target"),
            "interval" => Ok("interval"),
            other => Err(EngineError::Config(format!(
                "unknown sell_mode '{}' (expected 'target' or 'interval')",
                other
            ))),
        }
    }

    // Builders for the engine

    pub fn sale_caps(&self) -> Result<SaleCaps, EngineError> {
        Ok(SaleCaps {
            max_per_tx: parse_amount_f64(self.max_per_tx_tokens, self.token_decimals)?,
            max_daily: parse_amount_f64(self.max_daily_tokens, self.token_decimals)?,
            max_hourly_sales: self.max_hourly_sales.max(1),
        })
    }

    pub fn sale_params(&self) -> Result<SaleParams, EngineError> {
        Ok(SaleParams {
            amount_in: parse_amount_f64(self.sell_amount_tokens, self.token_decimals)?,
            slippage_pct: self.slippage_pct_value(),
            safety_slippage_pct: self.safety_slippage_pct_value(),
            impact_ceiling_pct: self.impact_ceiling_pct_value(),
            min_reserve_token: parse_amount_f64(self.reserve_floor_tokens, self.token_decimals)?,
            min_reserve_stable: parse_amount_f64(self.reserve_floor_stable, self.stable_decimals)?,
            depth_multiplier: self.depth_multiplier_value(),
            caps: self.sale_caps()?,
            gas_floor_wei: self.gas_floor_wei_value(),
            gas_ceiling_wei: self.gas_ceiling_wei_value(),
            gas_limit_swap: self.gas_limit_swap_value(),
            deadline_secs: self.deadline_secs_value(),
        })
    }

    pub fn sell_plan(&self) -> Result<SellPlan, EngineError> {
        let mode = match self.sell_mode_value()? {
            "target" => SellMode::TargetPrice {
                target: self.target_price,
            },
            _ => SellMode::Interval {
                every_secs: self.sell_interval_secs_value(),
                catch_up: self.interval_catch_up,
            },
        };
        Ok(SellPlan {
            mode,
            params: self.sale_params()?,
            cooldown_secs: self.cooldown_secs,
            stop_after_next: self.stop_after_next,
            fast_tick_secs: self.fast_tick_secs_value(),
            slow_tick_secs: self.slow_tick_secs_value(),
        })
    }
}

fn resolve_config_path(path: Option<&str>) -> Option<String> {
    if let Some(path) = path {
        return Some(path.to_string());
    }
    detect_active_config_file()
}

fn detect_active_config_file() -> Option<String> {
    let priority_files = [
        "config.prod.toml",
        "config.dev.toml",
        "config.example.toml",
        "config.toml",
    ];
    for file in priority_files.iter() {
        if let Some(true) = config_has_active_flag(file) {
            return Some((*file).to_string());
        }
    }

    // Fallback: scan current dir for config.*.toml with THIS_ACTIVE = true
    if let Ok(entries) = fs::read_dir(".") {
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("config.")
                    && name.ends_with(".toml")
                    && config_has_active_flag(name) == Some(true)
                {
                    return Some(name.to_string());
                }
            }
        }
    }

    None
}

fn config_has_active_flag(path: &str) -> Option<bool> {
    let p = Path::new(path);
    if !p.exists() {
        return None;
    }
    Config::builder()
        .add_source(File::from(p))
        .build()
        .ok()?
        .get_bool("THIS_ACTIVE")
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn base_settings() -> Settings {
        Settings {
            debug: default_debug(),
            chain_id: default_chain_id(),
            backend_mode: BackendMode::Node,
            node_endpoint: Some("http://127.0.0.1:8545".to_string()),
            node_read_endpoints: Vec::new(),
            proxy_endpoint: None,
            proxy_api_keys: Vec::new(),
            wallet_key: "0x01".to_string(),
            wallet_address: Address::ZERO,
            token_address: Address::from([1u8; 20]),
            stable_address: Address::from([2u8; 20]),
            pair_address: Address::from([3u8; 20]),
            router_address: Address::from([4u8; 20]),
            token_decimals: default_token_decimals(),
            stable_decimals: default_stable_decimals(),
            sell_amount_tokens: default_sell_amount(),
            slippage_pct: default_slippage_pct(),
            safety_slippage_pct: default_safety_slippage_pct(),
            price_impact_ceiling_pct: default_impact_ceiling_pct(),
            reserve_floor_tokens: default_reserve_floor_tokens(),
            reserve_floor_stable: default_reserve_floor_stable(),
            reserve_depth_multiplier: default_depth_multiplier(),
            max_per_tx_tokens: default_max_per_tx(),
            max_daily_tokens: default_max_daily(),
            max_hourly_sales: default_max_hourly_sales(),
            gas_price_floor_gwei: default_gas_floor_gwei(),
            gas_price_ceiling_gwei: default_gas_ceiling_gwei(),
            gas_limit_swap: default_gas_limit_swap(),
            deadline_minutes: default_deadline_minutes(),
            sell_mode: default_sell_mode(),
            target_price: 0.0,
            sell_interval_secs: default_sell_interval_secs(),
            interval_catch_up: false,
            cooldown_secs: default_cooldown_secs(),
            stop_after_next: false,
            fast_tick_secs: default_fast_tick_secs(),
            slow_tick_secs: default_slow_tick_secs(),
        }
    }

    #[test]
    fn node_mode_requires_endpoint() {
        let mut settings = base_settings();
        settings.node_endpoint = None;
        assert!(matches!(
            settings.validate(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn proxy_mode_requires_endpoint_and_keys() {
        let mut settings = base_settings();
        settings.backend_mode = BackendMode::Proxy;
        settings.proxy_endpoint = Some("https://proxy.example/api".to_string());
        assert!(settings.validate().is_err());

        settings.proxy_api_keys = vec!["key-1".to_string()];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn target_mode_requires_positive_price() {
        let mut settings = base_settings();
        settings.sell_mode = "target".to_string();
        settings.target_price = 0.0;
        assert!(settings.validate().is_err());

        settings.target_price = 0.5;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn clamps_have_safe_floors() {
        let mut settings = base_settings();
        settings.deadline_minutes = 0;
        settings.gas_price_floor_gwei = 0;
        settings.gas_price_ceiling_gwei = 0;
        settings.fast_tick_secs = 0;
        settings.slow_tick_secs = 0;
        settings.sell_interval_secs = 0;

        assert_eq!(settings.deadline_secs_value(), 60);
        assert_eq!(settings.gas_floor_wei_value(), WEI_PER_GWEI);
        assert!(settings.gas_ceiling_wei_value() >= settings.gas_floor_wei_value());
        assert_eq!(settings.fast_tick_secs_value(), 1);
        assert!(settings.slow_tick_secs_value() >= settings.fast_tick_secs_value());
        assert_eq!(settings.sell_interval_secs_value(), 5);
    }

    #[test]
    fn sale_params_convert_human_amounts_to_base_units() {
        let settings = base_settings();
        let params = settings.sale_params().unwrap();
        // 100 tokens at 9 decimals.
        assert_eq!(params.amount_in, U256::from(100_000_000_000u64));
        assert_eq!(params.caps.max_per_tx, U256::from(1_000_000_000_000u64));
        assert_eq!(params.deadline_secs, 300);
    }

    #[test]
    fn unknown_sell_mode_is_rejected() {
        let mut settings = base_settings();
        settings.sell_mode = "yolo".to_string();
        assert!(settings.sell_plan().is_err());
    }
}
