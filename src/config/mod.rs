pub mod loader;
pub mod types;
pub mod wallet;

pub use loader::*;
pub use types::*;
pub use wallet::{LoadedWallet, decode_wallets};

pub(crate) fn default_buy_lamports() -> u64 {
    10_000_000
}

pub(crate) fn default_sell_percent() -> u64 {
    100
}

pub(crate) fn default_slippage_percent() -> f64 {
    1.0
}

pub(crate) fn default_fee_budget_lamports() -> u64 {
    2_100_000
}

pub(crate) fn default_pacing_delay_ms() -> u64 {
    5_000
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    3_000
}

pub(crate) fn default_poll_budget() -> usize {
    40
}

pub(crate) fn default_expiry_margin() -> u64 {
    150
}

pub(crate) fn default_broadcast_max_retries() -> usize {
    20
}

pub(crate) fn default_chunk_size() -> usize {
    2
}

pub(crate) fn default_notice_window() -> usize {
    100
}

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}
