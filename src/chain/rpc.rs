use std::sync::Arc;

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

use super::{BlockhashLease, ChainError, ChainRpc, SimulationVerdict, StatusSnapshot};

/// 基于 `solana_client` 非阻塞客户端的生产实现。
#[derive(Clone)]
pub struct RpcChain {
    client: Arc<RpcClient>,
}

impl RpcChain {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    pub fn from_url(endpoint: &str) -> Self {
        Self::new(Arc::new(RpcClient::new(endpoint.to_string())))
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl ChainRpc for RpcChain {
    async fn account(&self, address: &Pubkey) -> Result<Option<Account>, ChainError> {
        let response = self
            .client
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(classify)?;
        Ok(response.value)
    }

    async fn multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, ChainError> {
        self.client
            .get_multiple_accounts(addresses)
            .await
            .map_err(classify)
    }

    async fn latest_blockhash(&self) -> Result<BlockhashLease, ChainError> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(CommitmentConfig::finalized())
            .await
            .map_err(classify)?;
        Ok(BlockhashLease {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn block_height(&self) -> Result<u64, ChainError> {
        self.client
            .get_block_height_with_commitment(CommitmentConfig::finalized())
            .await
            .map_err(classify)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> Result<Option<StatusSnapshot>, ChainError> {
        let signatures = [*signature];
        let response = if search_history {
            self.client
                .get_signature_statuses_with_history(&signatures)
                .await
        } else {
            self.client.get_signature_statuses(&signatures).await
        }
        .map_err(classify)?;

        Ok(response.value.into_iter().next().flatten().map(|status| {
            StatusSnapshot {
                confirmed: status.satisfies_commitment(CommitmentConfig::confirmed()),
                err: status.err,
            }
        }))
    }

    async fn broadcast(
        &self,
        transaction: &VersionedTransaction,
        max_retries: usize,
    ) -> Result<Signature, ChainError> {
        let config = RpcSendTransactionConfig {
            max_retries: Some(max_retries),
            ..RpcSendTransactionConfig::default()
        };
        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(classify)
    }

    async fn simulate(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<SimulationVerdict, ChainError> {
        let response = self
            .client
            .simulate_transaction(transaction)
            .await
            .map_err(classify)?;
        Ok(SimulationVerdict {
            err: response.value.err.map(Into::into),
        })
    }
}

fn classify(err: ClientError) -> ChainError {
    match *err.kind {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => ChainError::Network(err.to_string()),
        _ => ChainError::Rpc(err.to_string()),
    }
}
