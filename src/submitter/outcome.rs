use solana_sdk::signature::Signature;

use super::TxInputs;

/// 单笔提交的终态分类。终态之间没有转移。
#[derive(Clone, Debug)]
pub enum SubmissionOutcome {
    /// 链上确认（confirmed 或 finalized）。
    Confirmed { signature: Signature },
    /// 区块哈希租约过期，交易不可能再落块。可换新租约重提。
    Expired { signature: Signature },
    /// 传输层连接故障，没有拿到签名。可重提。
    NetworkIssue,
    /// 模拟失败（良性错误除外），不自动重提。
    SimulationRejected { signature: Signature, error: String },
    /// 编译或签名阶段失败，不自动重提。
    SignatureFailure { message: String },
    /// 无法归类的失败，携带尽可能多的上下文。
    Unknown {
        signature: Option<Signature>,
        detail: String,
    },
}

impl SubmissionOutcome {
    /// 调用方可用原始输入加新租约重提的终态。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmissionOutcome::Expired { .. } | SubmissionOutcome::NetworkIssue
        )
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmissionOutcome::Confirmed { .. })
    }

    pub fn signature(&self) -> Option<Signature> {
        match self {
            SubmissionOutcome::Confirmed { signature }
            | SubmissionOutcome::Expired { signature }
            | SubmissionOutcome::SimulationRejected { signature, .. } => Some(*signature),
            SubmissionOutcome::Unknown { signature, .. } => *signature,
            _ => None,
        }
    }
}

/// 终态连同原始输入一起返回，重提无需重建指令。
pub struct SubmissionReport {
    pub outcome: SubmissionOutcome,
    pub inputs: TxInputs,
}
