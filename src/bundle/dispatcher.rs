use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::signer::Signer;
use solana_system_interface::instruction as system_instruction;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::chain::{ChainRpc, fetch_lease};
use crate::quote::SwapInstruction;
use crate::submitter::{SubmissionReport, SubmitterSettings, TxInputs, TxSubmitter};
use crate::venue::SwapVenue;

use super::jito::random_tip_wallet;
use super::{
    AtomicBundler, BundleNotice, BundleResult, BundleSnapshot, BundleStatus, DispatchError,
    wallet_instructions,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// 整批交给原子构建方，要么全上要么全不上。
    Atomic,
    /// 逐笔走确认状态机，失败按钱包归并上报。
    Independent,
}

#[derive(Clone, Copy, Debug)]
pub struct DispatcherSettings {
    /// 每笔交易容纳的钱包数。
    pub chunk_size: usize,
    /// 批内每笔交易的优先费出价（micro-lamports / CU）。
    pub compute_unit_price: u64,
    /// 原子模式下附加的小费，0 表示不给。
    pub tip_lamports: u64,
    /// 原子结果的检查窗口轮数与间隔。
    pub notice_window: usize,
    pub notice_interval: Duration,
    /// 带外状态查询的退避步长。
    pub status_backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            chunk_size: 2,
            compute_unit_price: 0,
            tip_lamports: 0,
            notice_window: 100,
            notice_interval: Duration::from_secs(1),
            status_backoff: Duration::from_secs(10),
        }
    }
}

/// 把报价结果切批、落成交易并驱动到聚合结果。
pub struct BundleDispatcher<C, B> {
    chain: C,
    submitter: TxSubmitter<C>,
    bundler: B,
    venue: Arc<dyn SwapVenue>,
    settings: DispatcherSettings,
}

impl<C: ChainRpc + Clone, B: AtomicBundler> BundleDispatcher<C, B> {
    pub fn new(
        chain: C,
        bundler: B,
        venue: Arc<dyn SwapVenue>,
        submitter_settings: SubmitterSettings,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            submitter: TxSubmitter::new(chain.clone(), submitter_settings),
            chain,
            bundler,
            venue,
            settings,
        }
    }

    /// 分发一批成交指令。部分失败折叠进 [`BundleResult`]，只有
    /// 空输入和原子首次提交失败才返回 Err。
    pub async fn dispatch(
        &self,
        swaps: &[SwapInstruction],
        mode: DispatchMode,
    ) -> Result<BundleResult, DispatchError> {
        if swaps.is_empty() {
            return Err(DispatchError::EmptyPlan);
        }

        let mut batches = Vec::new();
        for chunk in swaps.chunks(self.settings.chunk_size.max(1)) {
            let mut instructions = Vec::new();
            let mut signers = Vec::with_capacity(chunk.len());
            let mut wallets = Vec::with_capacity(chunk.len());
            for swap in chunk {
                instructions
                    .extend(wallet_instructions(&self.chain, self.venue.as_ref(), swap).await);
                signers.push(swap.signer.clone());
                wallets.push(swap.wallet);
            }
            batches.push(TxInputs {
                instructions,
                signers,
                wallets,
                compute_unit_price: self.settings.compute_unit_price,
            });
        }

        debug!(
            target: "bundle",
            batches = batches.len(),
            mode = ?mode,
            "分批完成"
        );

        match mode {
            DispatchMode::Independent => Ok(self.dispatch_independent(batches).await),
            DispatchMode::Atomic => self.dispatch_atomic(batches).await,
        }
    }

    /// 逐笔提交。`Expired` / `NetworkIssue` 用报告里带回的原始
    /// 输入重提一次，按钱包归并成败。
    async fn dispatch_independent(&self, batches: Vec<TxInputs>) -> BundleResult {
        let mut tasks: FuturesUnordered<_> = batches
            .into_iter()
            .map(|inputs| async {
                let report = self.submitter.submit(inputs).await;
                if report.outcome.is_retryable() {
                    debug!(target: "bundle", "首次提交失败且可重试，换新租约重提");
                    self.submitter.submit(report.inputs).await
                } else {
                    report
                }
            })
            .collect();

        let mut signatures = Vec::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        while let Some(SubmissionReport { outcome, inputs }) = tasks.next().await {
            if let Some(signature) = outcome.signature() {
                signatures.push(signature);
            }
            if outcome.is_confirmed() {
                succeeded.extend(inputs.wallets);
            } else {
                warn!(target: "bundle", outcome = ?outcome, wallets = ?inputs.wallets, "批次未确认");
                failed.extend(inputs.wallets);
            }
        }

        let status = if failed.is_empty() {
            BundleStatus::Landed
        } else if succeeded.is_empty() {
            BundleStatus::Unresolved
        } else {
            BundleStatus::Partial
        };
        info!(
            target: "bundle",
            succeeded = succeeded.len(),
            failed = failed.len(),
            "独立模式分发完成"
        );
        BundleResult {
            bundle_id: String::new(),
            signatures,
            status,
            succeeded,
            failed,
        }
    }

    /// 整批签好交给构建方，在检查窗口内等通知，窗口内穿插最多
    /// 三次带外查询（立即、+退避、+退避）。
    async fn dispatch_atomic(
        &self,
        mut batches: Vec<TxInputs>,
    ) -> Result<BundleResult, DispatchError> {
        let Some(lease) = fetch_lease(&self.chain, 2).await else {
            return Err(DispatchError::SubmitFailed("获取区块哈希失败".into()));
        };

        let all_wallets: Vec<Pubkey> = batches
            .iter()
            .flat_map(|batch| batch.wallets.iter().copied())
            .collect();

        // 小费转账挂在最后一笔交易尾部，由该批的出资钱包支付。
        if self.settings.tip_lamports > 0 {
            if let (Some(last), Some(recipient)) = (batches.last_mut(), random_tip_wallet()) {
                if let Some(payer) = last.signers.first() {
                    last.instructions.push(system_instruction::transfer(
                        &payer.pubkey(),
                        &recipient,
                        self.settings.tip_lamports,
                    ));
                }
            }
        }

        let mut transactions = Vec::with_capacity(batches.len());
        for inputs in &batches {
            let tx = crate::submitter::build_transaction(inputs, lease.blockhash)
                .map_err(DispatchError::SubmitFailed)?;
            transactions.push(tx);
        }
        let signatures: Vec<Signature> = transactions.iter().map(|tx| tx.signatures[0]).collect();

        let mut handle = self
            .bundler
            .submit_bundle(&transactions)
            .await
            .map_err(|err| DispatchError::SubmitFailed(err.to_string()))?;
        info!(target: "bundle", bundle_id = %handle.bundle_id, transactions = transactions.len(), "捆包已提交");

        let backoff_rounds =
            (self.settings.status_backoff.as_millis() / self.settings.notice_interval.as_millis().max(1)) as usize;
        let lookup_rounds = [0, backoff_rounds, backoff_rounds * 2];
        let mut lookups_done = 0usize;

        for round in 0..self.settings.notice_window {
            match handle.notices.try_recv() {
                Ok(BundleNotice::Accepted { slot }) => {
                    info!(target: "bundle", bundle_id = %handle.bundle_id, slot, "捆包落块");
                    return Ok(BundleResult {
                        bundle_id: handle.bundle_id,
                        signatures,
                        status: BundleStatus::Landed,
                        succeeded: all_wallets,
                        failed: Vec::new(),
                    });
                }
                Ok(BundleNotice::Rejected(rejection)) => {
                    warn!(target: "bundle", bundle_id = %handle.bundle_id, %rejection, "捆包被拒绝");
                    return Ok(BundleResult {
                        bundle_id: handle.bundle_id,
                        signatures,
                        status: BundleStatus::Rejected(rejection),
                        succeeded: Vec::new(),
                        failed: all_wallets,
                    });
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            if lookups_done < lookup_rounds.len() && round == lookup_rounds[lookups_done] {
                lookups_done += 1;
                match self.bundler.bundle_status(&handle.bundle_id).await {
                    Ok(BundleSnapshot::Landed) => {
                        return Ok(BundleResult {
                            bundle_id: handle.bundle_id,
                            signatures,
                            status: BundleStatus::Landed,
                            succeeded: all_wallets,
                            failed: Vec::new(),
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(target: "bundle", error = %err, "带外状态查询失败");
                    }
                }
            }

            tokio::time::sleep(self.settings.notice_interval).await;
        }

        // 窗口耗尽：无结论，带回本地已知的签名清单。
        warn!(target: "bundle", bundle_id = %handle.bundle_id, "检查窗口耗尽，捆包结果未定");
        Ok(BundleResult {
            bundle_id: handle.bundle_id,
            signatures,
            status: BundleStatus::Unresolved,
            succeeded: Vec::new(),
            failed: all_wallets,
        })
    }
}
