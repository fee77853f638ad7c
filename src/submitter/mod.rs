mod outcome;

use std::sync::Arc;
use std::time::Duration;

use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::VersionedMessage;
use solana_sdk::message::v0::Message as V0Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{BlockhashLease, ChainRpc, fetch_lease};

pub use outcome::{SubmissionOutcome, SubmissionReport};

/// 提交节奏与确认窗口参数。默认值沿用线上验证过的配置。
#[derive(Clone, Copy, Debug)]
pub struct SubmitterSettings {
    /// 每次广播前的强制限速间隔。
    pub pacing_delay: Duration,
    /// 签名状态轮询间隔。
    pub poll_interval: Duration,
    /// 轮询次数上限。
    pub poll_budget: usize,
    /// 判定租约过期时预留的区块余量。
    pub expiry_margin: u64,
    /// 透传给传输层的广播重试次数。
    pub broadcast_max_retries: usize,
    /// 区块哈希获取尝试次数。
    pub blockhash_attempts: usize,
    /// 跳过广播后的预确认模拟。
    pub skip_simulation: bool,
}

impl Default for SubmitterSettings {
    fn default() -> Self {
        Self {
            pacing_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(3),
            poll_budget: 40,
            expiry_margin: 150,
            broadcast_max_retries: 20,
            blockhash_attempts: 2,
            skip_simulation: false,
        }
    }
}

/// 一笔逻辑交易的全部输入。终态报告会原样带回，供重提复用。
#[derive(Clone)]
pub struct TxInputs {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Arc<Keypair>>,
    /// 本交易覆盖的钱包，用于上层按钱包归并成败。
    pub wallets: Vec<Pubkey>,
    /// 优先费出价（micro-lamports / CU），0 表示不加价。
    pub compute_unit_price: u64,
}

/// 确认状态机：构建 → 签名 → 广播 → 轮询 → 终态。
///
/// 同一实例内 build+sign+broadcast 段由互斥锁串行化，避免并发调用
/// 抢同一个区块哈希租约；锁在广播返回后立即释放，轮询不占锁。
pub struct TxSubmitter<C> {
    chain: C,
    settings: SubmitterSettings,
    flight: Mutex<()>,
}

impl<C: ChainRpc> TxSubmitter<C> {
    pub fn new(chain: C, settings: SubmitterSettings) -> Self {
        Self {
            chain,
            settings,
            flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SubmitterSettings {
        &self.settings
    }

    /// 提交一笔交易并跟踪到终态。任何失败都折叠进
    /// [`SubmissionOutcome`]，本方法自身不返回 Err。
    pub async fn submit(&self, inputs: TxInputs) -> SubmissionReport {
        let (signature, transaction, lease) = {
            let _flight = self.flight.lock().await;
            tokio::time::sleep(self.settings.pacing_delay).await;

            let Some(lease) = fetch_lease(&self.chain, self.settings.blockhash_attempts).await
            else {
                warn!(target: "submitter", "获取区块哈希失败，按网络故障上报");
                return self.report(SubmissionOutcome::NetworkIssue, inputs);
            };

            let transaction = match build_transaction(&inputs, lease.blockhash) {
                Ok(tx) => tx,
                Err(message) => {
                    warn!(target: "submitter", %message, "交易编译/签名失败");
                    return self.report(SubmissionOutcome::SignatureFailure { message }, inputs);
                }
            };

            match self
                .chain
                .broadcast(&transaction, self.settings.broadcast_max_retries)
                .await
            {
                Ok(signature) => (signature, transaction, lease),
                Err(err) if err.is_connectivity() => {
                    warn!(target: "submitter", error = %err, "广播失败：连接故障");
                    return self.report(SubmissionOutcome::NetworkIssue, inputs);
                }
                Err(err) => {
                    warn!(target: "submitter", error = %err, "广播失败：原因不明");
                    return self.report(
                        SubmissionOutcome::Unknown {
                            signature: None,
                            detail: err.to_string(),
                        },
                        inputs,
                    );
                }
            }
            // 锁到这里释放：后续轮询不妨碍下一笔进入构建。
        };

        debug!(target: "submitter", %signature, "已广播，进入确认轮询");

        if !self.settings.skip_simulation {
            if let Some(outcome) = self.simulate_gate(&transaction, signature).await {
                return self.report(outcome, inputs);
            }
        }

        let outcome = self.poll_to_terminal(signature, lease).await;
        self.report(outcome, inputs)
    }

    /// 广播后的预确认模拟。良性错误（区块哈希竞态、已处理）放行，
    /// 模拟本身打不通也放行，只有明确的执行错误才拦下。
    async fn simulate_gate(
        &self,
        transaction: &VersionedTransaction,
        signature: Signature,
    ) -> Option<SubmissionOutcome> {
        let verdict = match self.chain.simulate(transaction).await {
            Ok(verdict) => verdict,
            Err(err) => {
                debug!(target: "submitter", error = %err, "模拟不可用，跳过");
                return None;
            }
        };
        match verdict.err {
            None => None,
            Some(TransactionError::BlockhashNotFound)
            | Some(TransactionError::AlreadyProcessed) => None,
            Some(err) => {
                warn!(target: "submitter", %signature, error = %err, "模拟拒绝");
                Some(SubmissionOutcome::SimulationRejected {
                    signature,
                    error: err.to_string(),
                })
            }
        }
    }

    async fn poll_to_terminal(
        &self,
        signature: Signature,
        lease: BlockhashLease,
    ) -> SubmissionOutcome {
        let mut expiry_strikes = 0u8;

        for round in 0..self.settings.poll_budget {
            tokio::time::sleep(self.settings.poll_interval).await;

            match self.chain.signature_status(&signature, false).await {
                Err(err) => {
                    debug!(target: "submitter", round, error = %err, "状态查询失败，继续");
                    continue;
                }
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        return SubmissionOutcome::Unknown {
                            signature: Some(signature),
                            detail: err.to_string(),
                        };
                    }
                    if status.confirmed {
                        info!(target: "submitter", %signature, round, "交易确认");
                        return SubmissionOutcome::Confirmed { signature };
                    }
                    // processed 级别：链上已看到，过期计数清零。
                    expiry_strikes = 0;
                }
                Ok(None) => {
                    // 连续两轮检测到超高才判过期，吸收 RPC 的短暂滞后；
                    // 高度查询失败按未过期处理。
                    let expired = match self.chain.block_height().await {
                        Ok(height) => lease.expired_at(height, self.settings.expiry_margin),
                        Err(_) => false,
                    };
                    if expired {
                        expiry_strikes += 1;
                        if expiry_strikes >= 2 {
                            warn!(target: "submitter", %signature, "区块哈希租约过期");
                            return SubmissionOutcome::Expired { signature };
                        }
                    } else {
                        expiry_strikes = 0;
                    }
                }
            }
        }

        self.final_check(signature).await
    }

    /// 轮询预算耗尽后的最后一次查询，带历史检索。
    async fn final_check(&self, signature: Signature) -> SubmissionOutcome {
        match self.chain.signature_status(&signature, true).await {
            Ok(Some(status)) => match status.err {
                Some(TransactionError::BlockhashNotFound) => {
                    SubmissionOutcome::Expired { signature }
                }
                Some(err) => SubmissionOutcome::Unknown {
                    signature: Some(signature),
                    detail: err.to_string(),
                },
                None => SubmissionOutcome::Confirmed { signature },
            },
            Ok(None) | Err(_) => {
                warn!(target: "submitter", %signature, "确认窗口耗尽，按过期处理");
                SubmissionOutcome::Expired { signature }
            }
        }
    }

    fn report(&self, outcome: SubmissionOutcome, inputs: TxInputs) -> SubmissionReport {
        SubmissionReport { outcome, inputs }
    }
}

/// 编译 v0 消息并签名。优先费出价非零时前置 compute-budget 指令。
pub(crate) fn build_transaction(
    inputs: &TxInputs,
    blockhash: solana_sdk::hash::Hash,
) -> Result<VersionedTransaction, String> {
    let payer = inputs
        .signers
        .first()
        .ok_or_else(|| "没有可用签名者".to_string())?
        .pubkey();

    let mut instructions = Vec::with_capacity(inputs.instructions.len() + 1);
    if inputs.compute_unit_price > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            inputs.compute_unit_price,
        ));
    }
    instructions.extend(inputs.instructions.iter().cloned());

    let message = V0Message::try_compile(&payer, &instructions, &[], blockhash)
        .map_err(|err| err.to_string())?;
    let signer_refs: Vec<&dyn Signer> = inputs
        .signers
        .iter()
        .map(|keypair| keypair.as_ref() as &dyn Signer)
        .collect();
    VersionedTransaction::try_new(VersionedMessage::V0(message), &signer_refs)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use solana_sdk::account::Account;
    use solana_sdk::hash::Hash;
    use solana_system_interface::instruction as system_instruction;

    use super::*;
    use crate::chain::{ChainError, SimulationVerdict, StatusSnapshot};

    /// 可编排的链桩：固定高度、可选的广播故障、永远查不到状态。
    struct ScriptedChain {
        height: u64,
        last_valid: u64,
        broadcast_error: Option<fn() -> ChainError>,
    }

    #[async_trait]
    impl ChainRpc for ScriptedChain {
        async fn account(&self, _address: &Pubkey) -> Result<Option<Account>, ChainError> {
            Ok(None)
        }

        async fn multiple_accounts(
            &self,
            addresses: &[Pubkey],
        ) -> Result<Vec<Option<Account>>, ChainError> {
            Ok(vec![None; addresses.len()])
        }

        async fn latest_blockhash(&self) -> Result<BlockhashLease, ChainError> {
            Ok(BlockhashLease {
                blockhash: Hash::default(),
                last_valid_block_height: self.last_valid,
            })
        }

        async fn block_height(&self) -> Result<u64, ChainError> {
            Ok(self.height)
        }

        async fn signature_status(
            &self,
            _signature: &Signature,
            _search_history: bool,
        ) -> Result<Option<StatusSnapshot>, ChainError> {
            Ok(None)
        }

        async fn broadcast(
            &self,
            transaction: &VersionedTransaction,
            _max_retries: usize,
        ) -> Result<Signature, ChainError> {
            match self.broadcast_error {
                Some(make) => Err(make()),
                None => Ok(transaction.signatures[0]),
            }
        }

        async fn simulate(
            &self,
            _transaction: &VersionedTransaction,
        ) -> Result<SimulationVerdict, ChainError> {
            Ok(SimulationVerdict::default())
        }
    }

    fn fast_settings() -> SubmitterSettings {
        SubmitterSettings {
            pacing_delay: Duration::from_millis(0),
            poll_interval: Duration::from_millis(1),
            poll_budget: 6,
            blockhash_attempts: 1,
            ..SubmitterSettings::default()
        }
    }

    fn transfer_inputs() -> TxInputs {
        let signer = Arc::new(Keypair::new());
        let from = signer.pubkey();
        TxInputs {
            instructions: vec![system_instruction::transfer(
                &from,
                &Pubkey::new_unique(),
                1,
            )],
            wallets: vec![from],
            signers: vec![signer],
            compute_unit_price: 0,
        }
    }

    #[tokio::test]
    async fn stale_height_terminates_in_expired() {
        // 高度始终越过 last_valid - margin，两轮后必须判 Expired。
        let chain = ScriptedChain {
            height: 10_000,
            last_valid: 100,
            broadcast_error: None,
        };
        let submitter = TxSubmitter::new(chain, fast_settings());
        let report = submitter.submit(transfer_inputs()).await;
        assert!(matches!(
            report.outcome,
            SubmissionOutcome::Expired { .. }
        ));
        assert!(report.outcome.is_retryable());
    }

    #[tokio::test]
    async fn connectivity_failure_maps_to_network_issue() {
        let chain = ScriptedChain {
            height: 1,
            last_valid: 10_000,
            broadcast_error: Some(|| ChainError::Network("连接被重置".into())),
        };
        let submitter = TxSubmitter::new(chain, fast_settings());
        let report = submitter.submit(transfer_inputs()).await;
        assert!(matches!(report.outcome, SubmissionOutcome::NetworkIssue));
    }

    #[tokio::test]
    async fn rpc_failure_maps_to_unknown() {
        let chain = ScriptedChain {
            height: 1,
            last_valid: 10_000,
            broadcast_error: Some(|| ChainError::Rpc("节点拒绝".into())),
        };
        let submitter = TxSubmitter::new(chain, fast_settings());
        let report = submitter.submit(transfer_inputs()).await;
        assert!(matches!(
            report.outcome,
            SubmissionOutcome::Unknown { signature: None, .. }
        ));
    }

    #[tokio::test]
    async fn missing_signer_is_signature_failure() {
        let chain = ScriptedChain {
            height: 1,
            last_valid: 10_000,
            broadcast_error: None,
        };
        let submitter = TxSubmitter::new(chain, fast_settings());
        let mut inputs = transfer_inputs();
        inputs.signers.clear();
        let report = submitter.submit(inputs).await;
        assert!(matches!(
            report.outcome,
            SubmissionOutcome::SignatureFailure { .. }
        ));
    }
}
