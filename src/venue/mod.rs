use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::chain::PoolKeys;
use crate::quote::SwapInstruction;

/// swap-base-in 指令的判别字节。
const SWAP_BASE_IN_TAG: u8 = 9;

/// 把一条报价结果落成具体场所的链上指令。
pub trait SwapVenue: Send + Sync {
    fn swap_instruction(
        &self,
        swap: &SwapInstruction,
        user_source: Pubkey,
        user_destination: Pubkey,
    ) -> Instruction;
}

/// 恒定乘积 AMM 场所。池与撮合市场的账户全部来自外部提供的
/// [`PoolKeys`]，这里只负责按固定顺序摆账户、编指令数据。
pub struct AmmVenue {
    keys: PoolKeys,
}

impl AmmVenue {
    pub fn new(keys: PoolKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &PoolKeys {
        &self.keys
    }
}

impl SwapVenue for AmmVenue {
    fn swap_instruction(
        &self,
        swap: &SwapInstruction,
        user_source: Pubkey,
        user_destination: Pubkey,
    ) -> Instruction {
        let keys = &self.keys;
        let accounts = vec![
            AccountMeta::new_readonly(spl_token::ID, false),
            AccountMeta::new(keys.pool_id, false),
            AccountMeta::new_readonly(keys.authority, false),
            AccountMeta::new(keys.open_orders, false),
            AccountMeta::new(keys.target_orders, false),
            AccountMeta::new(keys.base_vault, false),
            AccountMeta::new(keys.quote_vault, false),
            AccountMeta::new_readonly(keys.market_program, false),
            AccountMeta::new(keys.market_id, false),
            AccountMeta::new(keys.market_bids, false),
            AccountMeta::new(keys.market_asks, false),
            AccountMeta::new(keys.market_event_queue, false),
            AccountMeta::new(keys.market_base_vault, false),
            AccountMeta::new(keys.market_quote_vault, false),
            AccountMeta::new_readonly(keys.market_authority, false),
            AccountMeta::new(user_source, false),
            AccountMeta::new(user_destination, false),
            AccountMeta::new_readonly(swap.wallet, true),
        ];

        let mut data = Vec::with_capacity(17);
        data.push(SWAP_BASE_IN_TAG);
        data.extend_from_slice(&swap.amount_in.to_le_bytes());
        data.extend_from_slice(&swap.min_amount_out.to_le_bytes());

        Instruction {
            program_id: keys.program,
            accounts,
            data,
        }
    }
}
