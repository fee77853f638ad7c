use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::quote::{FeeRate, PoolState};

use super::{ChainError, ChainRpc, multiple_accounts_with_fallback};

/// SPL Token 账户里 amount 字段的固定偏移（mint 32 + owner 32）。
const TOKEN_AMOUNT_OFFSET: usize = 64;

/// 池子的全部账户地址，由上游的池发现流程提供；本 crate 不做派生。
#[derive(Clone, Debug)]
pub struct PoolKeys {
    pub pool_id: Pubkey,
    pub program: Pubkey,
    pub authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub market_program: Pubkey,
    pub market_id: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_authority: Pubkey,
}

#[derive(Debug, Error)]
pub enum PoolSourceError {
    /// 池子账户不存在或与本源绑定的池子不符。
    #[error("池子不存在: {0}")]
    PoolNotFound(Pubkey),
    #[error("金库数据解析失败: {0}")]
    Decode(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// 池状态快照来源。
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn load_pool(&self, pool_id: &Pubkey) -> Result<PoolState, PoolSourceError>;
}

/// 直接读两只金库账户求储备量的实现。
pub struct VaultPoolSource<C> {
    chain: C,
    keys: PoolKeys,
    fee: Option<FeeRate>,
}

impl<C> VaultPoolSource<C> {
    pub fn new(chain: C, keys: PoolKeys, fee: Option<FeeRate>) -> Self {
        Self { chain, keys, fee }
    }

    pub fn keys(&self) -> &PoolKeys {
        &self.keys
    }
}

#[async_trait]
impl<C: ChainRpc> PoolSource for VaultPoolSource<C> {
    async fn load_pool(&self, pool_id: &Pubkey) -> Result<PoolState, PoolSourceError> {
        if *pool_id != self.keys.pool_id {
            return Err(PoolSourceError::PoolNotFound(*pool_id));
        }

        let vaults = [self.keys.base_vault, self.keys.quote_vault];
        let accounts = multiple_accounts_with_fallback(&self.chain, &vaults).await?;

        let mut reserves = [0u64; 2];
        for (slot, account) in reserves.iter_mut().zip(accounts.into_iter()) {
            let account = account.ok_or(PoolSourceError::PoolNotFound(*pool_id))?;
            *slot = decode_token_amount(&account.data)
                .map_err(PoolSourceError::Decode)?;
        }

        tracing::debug!(
            target: "chain::pool",
            pool = %pool_id,
            base_reserve = reserves[0],
            quote_reserve = reserves[1],
            "读取池储备"
        );

        Ok(PoolState {
            base_mint: self.keys.base_mint,
            quote_mint: self.keys.quote_mint,
            base_reserve: reserves[0],
            quote_reserve: reserves[1],
            base_decimals: self.keys.base_decimals,
            quote_decimals: self.keys.quote_decimals,
            fee: self.fee,
        })
    }
}

fn decode_token_amount(data: &[u8]) -> Result<u64, String> {
    let raw: [u8; 8] = data
        .get(TOKEN_AMOUNT_OFFSET..TOKEN_AMOUNT_OFFSET + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| format!("token 账户长度不足: {}", data.len()))?;
    Ok(u64::from_le_bytes(raw))
}
