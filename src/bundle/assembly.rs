use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_system_interface::instruction as system_instruction;
use spl_associated_token_account::get_associated_token_address;

use crate::chain::{ChainRpc, multiple_accounts_with_fallback};
use crate::quote::SwapInstruction;
use crate::venue::SwapVenue;

const SYSTEM_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("11111111111111111111111111111111");

/// 把一条报价落成该钱包的完整指令序列：
/// 缺失的关联账户先建（幂等），输入是原生币时补包裹 SOL 的
/// 转账 + sync，最后接场所的 swap 指令。
///
/// 关联账户存在性查询失败时按缺失处理——创建指令是幂等的，
/// 多带一条不影响执行。
pub async fn wallet_instructions<C: ChainRpc>(
    chain: &C,
    venue: &dyn SwapVenue,
    swap: &SwapInstruction,
) -> Vec<Instruction> {
    let input_ata = get_associated_token_address(&swap.wallet, &swap.input_mint);
    let output_ata = get_associated_token_address(&swap.wallet, &swap.output_mint);

    let existing = multiple_accounts_with_fallback(chain, &[input_ata, output_ata])
        .await
        .unwrap_or_else(|err| {
            tracing::debug!(
                target: "bundle::assembly",
                wallet = %swap.wallet,
                error = %err,
                "关联账户查询失败，按缺失处理"
            );
            vec![None, None]
        });

    let input_missing = existing.first().map(Option::is_none).unwrap_or(true);
    let output_missing = existing.get(1).map(Option::is_none).unwrap_or(true);

    let mut instructions = Vec::with_capacity(6);
    if input_missing {
        instructions.push(create_ata_idempotent(swap.wallet, input_ata, swap.input_mint));
    }
    if output_missing {
        instructions.push(create_ata_idempotent(
            swap.wallet,
            output_ata,
            swap.output_mint,
        ));
    }

    if swap.input_mint == spl_token::native_mint::ID {
        instructions.push(system_instruction::transfer(
            &swap.wallet,
            &input_ata,
            swap.amount_in,
        ));
        instructions.push(
            spl_token::instruction::sync_native(&spl_token::ID, &input_ata)
                .expect("sync_native 指令构建不应失败"),
        );
    }

    instructions.push(venue.swap_instruction(swap, input_ata, output_ata));
    instructions
}

fn create_ata_idempotent(owner: Pubkey, ata: Pubkey, mint: Pubkey) -> Instruction {
    Instruction {
        program_id: spl_associated_token_account::ID,
        accounts: vec![
            AccountMeta::new(owner, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(owner, false),
            AccountMeta::new_readonly(mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(spl_token::ID, false),
        ],
        // CreateIdempotent 判别字节。
        data: vec![1],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use solana_sdk::account::Account;
    use solana_sdk::hash::Hash;
    use solana_sdk::signature::{Keypair, Signature};
    use solana_sdk::signer::Signer;
    use solana_sdk::transaction::VersionedTransaction;

    use super::*;
    use crate::chain::{
        BlockhashLease, ChainError, PoolKeys, SimulationVerdict, StatusSnapshot,
    };
    use crate::venue::AmmVenue;

    struct EmptyChain;

    #[async_trait]
    impl ChainRpc for EmptyChain {
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
                last_valid_block_height: 0,
            })
        }

        async fn block_height(&self) -> Result<u64, ChainError> {
            Ok(0)
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
            _transaction: &VersionedTransaction,
            _max_retries: usize,
        ) -> Result<Signature, ChainError> {
            Err(ChainError::Rpc("测试桩不广播".into()))
        }

        async fn simulate(
            &self,
            _transaction: &VersionedTransaction,
        ) -> Result<SimulationVerdict, ChainError> {
            Ok(SimulationVerdict::default())
        }
    }

    fn sample_keys() -> PoolKeys {
        PoolKeys {
            pool_id: Pubkey::new_unique(),
            program: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            open_orders: Pubkey::new_unique(),
            target_orders: Pubkey::new_unique(),
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
            quote_mint: spl_token::native_mint::ID,
            base_decimals: 6,
            quote_decimals: 9,
            market_program: Pubkey::new_unique(),
            market_id: Pubkey::new_unique(),
            market_bids: Pubkey::new_unique(),
            market_asks: Pubkey::new_unique(),
            market_event_queue: Pubkey::new_unique(),
            market_base_vault: Pubkey::new_unique(),
            market_quote_vault: Pubkey::new_unique(),
            market_authority: Pubkey::new_unique(),
        }
    }

    #[tokio::test]
    async fn buy_sequence_wraps_native_input() {
        let keys = sample_keys();
        let venue = AmmVenue::new(keys.clone());
        let signer = Arc::new(Keypair::new());
        let swap = SwapInstruction {
            wallet: signer.pubkey(),
            signer: signer.clone(),
            input_mint: keys.quote_mint,
            output_mint: keys.base_mint,
            amount_in: 1_000_000,
            min_amount_out: 1,
        };

        let instructions = wallet_instructions(&EmptyChain, &venue, &swap).await;
        // 两条建户 + 转账 + sync + swap。
        assert_eq!(instructions.len(), 5);
        assert_eq!(instructions[0].program_id, spl_associated_token_account::ID);
        assert_eq!(instructions[1].program_id, spl_associated_token_account::ID);
        assert_eq!(instructions[2].program_id, SYSTEM_PROGRAM_ID);
        assert_eq!(instructions[3].data.first(), Some(&17u8));
        assert_eq!(instructions[4].program_id, keys.program);
    }

    #[tokio::test]
    async fn sell_sequence_has_no_wrap() {
        let keys = sample_keys();
        let venue = AmmVenue::new(keys.clone());
        let signer = Arc::new(Keypair::new());
        let swap = SwapInstruction {
            wallet: signer.pubkey(),
            signer: signer.clone(),
            input_mint: keys.base_mint,
            output_mint: keys.quote_mint,
            amount_in: 500,
            min_amount_out: 1,
        };

        let instructions = wallet_instructions(&EmptyChain, &venue, &swap).await;
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[2].program_id, keys.program);
    }
}
