mod assembly;
mod dispatcher;
mod jito;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;
use tokio::sync::mpsc;

pub use assembly::wallet_instructions;
pub use dispatcher::{BundleDispatcher, DispatcherSettings, DispatchMode};
pub use jito::JitoBundler;

/// 捆包被拒绝的归类原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BundleRejection {
    #[error("竞价被拍卖淘汰")]
    AuctionBid,
    #[error("竞价输给同批次其他捆包")]
    BatchBid,
    #[error("捆包内交易模拟失败")]
    Simulation,
    #[error("构建方内部错误")]
    Internal,
    #[error("捆包被丢弃")]
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleStatus {
    /// 全部落块。
    Landed,
    /// 部分钱包成功（仅独立模式）。
    Partial,
    /// 构建方明确拒绝。
    Rejected(BundleRejection),
    /// 检查窗口耗尽仍无结论。
    Unresolved,
}

/// 一次分发的聚合结果。部分失败是正常产出，不是错误。
#[derive(Clone, Debug)]
pub struct BundleResult {
    /// 原子模式下构建方返回的捆包标识；独立模式为空。
    pub bundle_id: String,
    pub signatures: Vec<Signature>,
    pub status: BundleStatus,
    pub succeeded: Vec<Pubkey>,
    pub failed: Vec<Pubkey>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("没有可分发的交易指令")]
    EmptyPlan,
    /// 原子捆包的首次提交失败。按约定不自动降级为独立模式，
    /// 是否改走独立模式由调用方决定。
    #[error("捆包提交失败: {0}")]
    SubmitFailed(String),
}

/// 构建方推送的捆包结果通知。
#[derive(Clone, Debug)]
pub enum BundleNotice {
    Accepted { slot: u64 },
    Rejected(BundleRejection),
}

/// 提交成功后拿到的订阅句柄。
pub struct BundleHandle {
    pub bundle_id: String,
    pub notices: mpsc::Receiver<BundleNotice>,
}

/// 带外状态查询的结论。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleSnapshot {
    Landed,
    Pending,
    Unknown,
}

#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("捆包编码失败: {0}")]
    Encode(String),
    #[error("构建方请求失败: {0}")]
    Http(String),
    #[error("构建方拒绝请求: {0}")]
    Rejected(String),
}

impl BundlerError {
    pub(crate) fn http(err: impl std::fmt::Display) -> Self {
        BundlerError::Http(err.to_string())
    }
}

/// 原子捆包构建方：接收整批已签名交易，提供结果订阅与带外查询。
#[async_trait]
pub trait AtomicBundler: Send + Sync {
    async fn submit_bundle(
        &self,
        transactions: &[VersionedTransaction],
    ) -> Result<BundleHandle, BundlerError>;

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleSnapshot, BundlerError>;
}
