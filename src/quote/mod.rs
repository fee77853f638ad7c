mod calculator;

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use thiserror::Error;

pub use calculator::SwapQuoteCalculator;

/// 协议费率因子，作用在输入额上。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeRate {
    pub numerator: u64,
    pub denominator: u64,
}

/// 池储备快照。一次 `compute_swaps` 调用内独占可变，调用间从不共享。
#[derive(Clone, Debug)]
pub struct PoolState {
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_reserve: u64,
    pub quote_reserve: u64,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub fee: Option<FeeRate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

/// 参与本轮交易的钱包条目。`signer` 独占持有该钱包的签名密钥。
#[derive(Clone)]
pub struct WalletEntry {
    pub address: Pubkey,
    pub signer: Arc<Keypair>,
    pub lamports: u64,
    pub token_balance: u64,
    pub selected: bool,
}

/// 买卖两侧的额度口径刻意不对称：买入固定 lamports，卖出按持仓百分比。
#[derive(Clone, Copy, Debug)]
pub struct SwapAmounts {
    pub buy_lamports: u64,
    pub sell_percent: u64,
}

/// 单钱包的成交指令，产出后不可变。
#[derive(Clone, Debug)]
pub struct SwapInstruction {
    pub wallet: Pubkey,
    pub signer: Arc<Keypair>,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount_in: u64,
    pub min_amount_out: u64,
}

/// 钱包原生余额缺口，不致命，随成功结果一并上报。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsufficiencyRecord {
    pub wallet: Pubkey,
    pub lamports_needed: u64,
}

/// 一次报价调用的完整产出。
#[derive(Debug)]
pub struct SwapPlan {
    pub instructions: Vec<SwapInstruction>,
    pub insufficient: Vec<InsufficiencyRecord>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("没有选中任何钱包")]
    NoWalletSelected,
    #[error("池储备为空或池不存在")]
    PoolNotFound,
    #[error("池的计价方不是原生代币，不支持")]
    UnsupportedPoolType,
    #[error("报价运算溢出")]
    MathOverflow,
}
