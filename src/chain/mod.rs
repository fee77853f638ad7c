pub mod fees;
pub mod pool;
pub mod rpc;

use async_trait::async_trait;
use solana_sdk::account::Account;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use thiserror::Error;

pub use fees::{FeeEstimator, FeeTable, FeeTier, HttpFeeEstimator, StaticFeeEstimator};
pub use pool::{PoolKeys, PoolSource, PoolSourceError, VaultPoolSource};
pub use rpc::RpcChain;

/// 单笔提交独占的区块哈希租约：超过 `last_valid_block_height` 即作废。
#[derive(Clone, Copy, Debug)]
pub struct BlockhashLease {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

impl BlockhashLease {
    /// 按当前链高判断租约是否过期，预留 `margin` 个区块的安全余量。
    pub fn expired_at(&self, current_height: u64, margin: u64) -> bool {
        current_height > self.last_valid_block_height.saturating_sub(margin)
    }
}

/// 签名状态快照：只保留确认层级与执行错误两个核心事实。
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub err: Option<TransactionError>,
    pub confirmed: bool,
}

/// 广播前模拟的结论。`err` 为空表示模拟通过。
#[derive(Clone, Debug, Default)]
pub struct SimulationVerdict {
    pub err: Option<TransactionError>,
}

#[derive(Debug, Error)]
pub enum ChainError {
    /// 连接层失败（超时、断连、DNS 等），调用方可按网络故障重试。
    #[error("网络请求失败: {0}")]
    Network(String),
    /// 节点返回的 RPC 级错误。
    #[error("RPC 调用失败: {0}")]
    Rpc(String),
    #[error("账户数据解析失败: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ChainError::Network(_))
    }
}

/// 链上 RPC 协作方。生产实现为 [`RpcChain`]，测试用内存桩。
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn account(&self, address: &Pubkey) -> Result<Option<Account>, ChainError>;

    async fn multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, ChainError>;

    /// finalized 级别的最新区块哈希与其有效高度。
    async fn latest_blockhash(&self) -> Result<BlockhashLease, ChainError>;

    async fn block_height(&self) -> Result<u64, ChainError>;

    /// 查询签名状态；`search_history` 控制是否翻历史账本。
    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> Result<Option<StatusSnapshot>, ChainError>;

    /// 广播已签名交易，`max_retries` 透传给传输层。
    async fn broadcast(
        &self,
        transaction: &VersionedTransaction,
        max_retries: usize,
    ) -> Result<Signature, ChainError>;

    async fn simulate(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<SimulationVerdict, ChainError>;
}

/// 拉取区块哈希租约，失败后按固定间隔重试，耗尽次数返回 None。
pub async fn fetch_lease<C: ChainRpc + ?Sized>(chain: &C, attempts: usize) -> Option<BlockhashLease> {
    for _ in 0..attempts.max(1) {
        match chain.latest_blockhash().await {
            Ok(lease) => return Some(lease),
            Err(err) => {
                tracing::debug!(target: "chain", error = %err, "获取区块哈希失败，稍后重试");
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
    }
    None
}

/// 读取账户，瞬时失败时延迟一秒再试一次（协作方约定的兜底行为）。
pub async fn account_with_fallback<C: ChainRpc + ?Sized>(
    chain: &C,
    address: &Pubkey,
) -> Result<Option<Account>, ChainError> {
    match chain.account(address).await {
        Ok(info) => Ok(info),
        Err(_) => {
            tokio::time::sleep(std::time::Duration::from_millis(1_000)).await;
            chain.account(address).await
        }
    }
}

/// 批量读取账户，同样带一次延迟重试。
pub async fn multiple_accounts_with_fallback<C: ChainRpc + ?Sized>(
    chain: &C,
    addresses: &[Pubkey],
) -> Result<Vec<Option<Account>>, ChainError> {
    match chain.multiple_accounts(addresses).await {
        Ok(infos) => Ok(infos),
        Err(_) => {
            tokio::time::sleep(std::time::Duration::from_millis(1_000)).await;
            chain.multiple_accounts(addresses).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expiry_respects_margin() {
        let lease = BlockhashLease {
            blockhash: Hash::default(),
            last_valid_block_height: 1_000,
        };
        assert!(!lease.expired_at(850, 150));
        assert!(lease.expired_at(851, 150));
        assert!(lease.expired_at(2_000, 150));
    }

    #[test]
    fn lease_expiry_saturates_on_small_heights() {
        let lease = BlockhashLease {
            blockhash: Hash::default(),
            last_valid_block_height: 100,
        };
        assert!(lease.expired_at(1, 150));
    }
}
