use std::time::Duration;

use serde::Deserialize;

use std::str::FromStr;

use solana_sdk::pubkey::Pubkey;

use crate::bundle::DispatcherSettings;
use crate::chain::{FeeTier, PoolKeys};
use crate::quote::FeeRate;
use crate::submitter::SubmitterSettings;

use super::{
    default_broadcast_max_retries, default_buy_lamports, default_chunk_size,
    default_expiry_margin, default_fee_budget_lamports, default_logging_level,
    default_notice_window, default_pacing_delay_ms, default_poll_budget,
    default_poll_interval_ms, default_sell_percent, default_slippage_percent,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub swap: SwapConfig,
    #[serde(default)]
    pub pool: PoolKeysConfig,
    #[serde(default)]
    pub submitter: SubmitterConfig,
    #[serde(default)]
    pub bundler: BundlerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default)]
    pub endpoint: String,
    /// 优先费估算端点，缺省时复用 `endpoint`。
    #[serde(default)]
    pub fee_endpoint: Option<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mainnet-beta.solana.com".to_string(),
            fee_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// bs58 编码的私钥列表，顺序即参与顺序。
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    /// 池子账户地址（base58）。
    #[serde(default)]
    pub pool_id: String,
    #[serde(default = "default_buy_lamports")]
    pub buy_lamports: u64,
    #[serde(default = "default_sell_percent")]
    pub sell_percent: u64,
    #[serde(default = "default_slippage_percent")]
    pub slippage_percent: f64,
    #[serde(default = "default_fee_budget_lamports")]
    pub fee_budget_lamports: u64,
    #[serde(default)]
    pub fee_tier: FeeTier,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            pool_id: String::new(),
            buy_lamports: default_buy_lamports(),
            sell_percent: default_sell_percent(),
            slippage_percent: default_slippage_percent(),
            fee_budget_lamports: default_fee_budget_lamports(),
            fee_tier: FeeTier::default(),
        }
    }
}

/// 池与撮合市场的全套账户地址。派生在外部完成，这里只收成品。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolKeysConfig {
    #[serde(default)]
    pub pool_id: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub open_orders: String,
    #[serde(default)]
    pub target_orders: String,
    #[serde(default)]
    pub base_vault: String,
    #[serde(default)]
    pub quote_vault: String,
    #[serde(default)]
    pub base_mint: String,
    #[serde(default)]
    pub quote_mint: String,
    #[serde(default)]
    pub base_decimals: u8,
    #[serde(default)]
    pub quote_decimals: u8,
    #[serde(default)]
    pub market_program: String,
    #[serde(default)]
    pub market_id: String,
    #[serde(default)]
    pub market_bids: String,
    #[serde(default)]
    pub market_asks: String,
    #[serde(default)]
    pub market_event_queue: String,
    #[serde(default)]
    pub market_base_vault: String,
    #[serde(default)]
    pub market_quote_vault: String,
    #[serde(default)]
    pub market_authority: String,
    #[serde(default)]
    pub fee_numerator: Option<u64>,
    #[serde(default)]
    pub fee_denominator: Option<u64>,
}

impl PoolKeysConfig {
    pub fn to_keys(&self) -> Result<PoolKeys, String> {
        let parse = |field: &str, value: &str| {
            Pubkey::from_str(value.trim()).map_err(|err| format!("pool.{field} 无效: {err}"))
        };
        Ok(PoolKeys {
            pool_id: parse("pool_id", &self.pool_id)?,
            program: parse("program", &self.program)?,
            authority: parse("authority", &self.authority)?,
            open_orders: parse("open_orders", &self.open_orders)?,
            target_orders: parse("target_orders", &self.target_orders)?,
            base_vault: parse("base_vault", &self.base_vault)?,
            quote_vault: parse("quote_vault", &self.quote_vault)?,
            base_mint: parse("base_mint", &self.base_mint)?,
            quote_mint: parse("quote_mint", &self.quote_mint)?,
            base_decimals: self.base_decimals,
            quote_decimals: self.quote_decimals,
            market_program: parse("market_program", &self.market_program)?,
            market_id: parse("market_id", &self.market_id)?,
            market_bids: parse("market_bids", &self.market_bids)?,
            market_asks: parse("market_asks", &self.market_asks)?,
            market_event_queue: parse("market_event_queue", &self.market_event_queue)?,
            market_base_vault: parse("market_base_vault", &self.market_base_vault)?,
            market_quote_vault: parse("market_quote_vault", &self.market_quote_vault)?,
            market_authority: parse("market_authority", &self.market_authority)?,
        })
    }

    pub fn fee_rate(&self) -> Option<FeeRate> {
        match (self.fee_numerator, self.fee_denominator) {
            (Some(numerator), Some(denominator)) if denominator > 0 => Some(FeeRate {
                numerator,
                denominator,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitterConfig {
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_budget")]
    pub poll_budget: usize,
    #[serde(default = "default_expiry_margin")]
    pub expiry_margin: u64,
    #[serde(default = "default_broadcast_max_retries")]
    pub broadcast_max_retries: usize,
    #[serde(default)]
    pub skip_simulation: bool,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            pacing_delay_ms: default_pacing_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_budget: default_poll_budget(),
            expiry_margin: default_expiry_margin(),
            broadcast_max_retries: default_broadcast_max_retries(),
            skip_simulation: false,
        }
    }
}

impl SubmitterConfig {
    pub fn to_settings(&self) -> SubmitterSettings {
        SubmitterSettings {
            pacing_delay: Duration::from_millis(self.pacing_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_budget: self.poll_budget,
            expiry_margin: self.expiry_margin,
            broadcast_max_retries: self.broadcast_max_retries,
            skip_simulation: self.skip_simulation,
            ..SubmitterSettings::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundlerConfig {
    /// 捆包构建方的 JSON-RPC 端点；为空时只能用独立模式。
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub tip_lamports: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_notice_window")]
    pub notice_window: usize,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            atomic: false,
            tip_lamports: 0,
            chunk_size: default_chunk_size(),
            notice_window: default_notice_window(),
        }
    }
}

impl BundlerConfig {
    pub fn to_settings(&self, compute_unit_price: u64) -> DispatcherSettings {
        DispatcherSettings {
            chunk_size: self.chunk_size,
            compute_unit_price,
            tip_lamports: self.tip_lamports,
            notice_window: self.notice_window,
            ..DispatcherSettings::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_logging_level(),
            json: false,
        }
    }
}
