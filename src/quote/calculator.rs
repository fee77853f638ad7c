use super::{
    Direction, InsufficiencyRecord, PoolState, QuoteError, SwapAmounts, SwapInstruction, SwapPlan,
    WalletEntry,
};

const BPS_DENOMINATOR: u128 = 10_000;

/// 按恒定乘积模型逐钱包报价，并在钱包之间串行模拟价格冲击。
pub struct SwapQuoteCalculator {
    amounts: SwapAmounts,
    fee_budget_lamports: u64,
}

impl SwapQuoteCalculator {
    pub fn new(amounts: SwapAmounts, fee_budget_lamports: u64) -> Self {
        Self {
            amounts,
            fee_budget_lamports,
        }
    }

    /// 对选中的钱包依次报价。每个钱包报完价后把该笔交易的影响写回
    /// `pool` 的储备，再为下一个钱包报价；同一捆包内后到的钱包因此
    /// 吃到更差的价格，与真实落块顺序一致。
    ///
    /// 余额不足的钱包记入 `insufficient`，不中断整轮计算，但它对
    /// 储备的冲击仍会被模拟（保持与线上撮合顺序一致的保守口径）。
    pub fn compute_swaps(
        &self,
        pool: &mut PoolState,
        wallets: &[WalletEntry],
        direction: Direction,
        slippage_percent: f64,
    ) -> Result<SwapPlan, QuoteError> {
        let selected: Vec<&WalletEntry> = wallets.iter().filter(|w| w.selected).collect();
        if selected.is_empty() {
            return Err(QuoteError::NoWalletSelected);
        }
        if pool.quote_mint != spl_token::native_mint::ID {
            return Err(QuoteError::UnsupportedPoolType);
        }
        if pool.base_reserve == 0 || pool.quote_reserve == 0 {
            return Err(QuoteError::PoolNotFound);
        }

        let slippage_bps = ((slippage_percent * 100.0) as u128).min(BPS_DENOMINATOR);

        let mut instructions = Vec::with_capacity(selected.len());
        let mut insufficient = Vec::new();

        for wallet in selected {
            let amount_in = match direction {
                Direction::Buy => self.amounts.buy_lamports,
                Direction::Sell => sell_amount(wallet.token_balance, self.amounts.sell_percent)?,
            };
            if amount_in == 0 {
                continue;
            }

            let (in_reserve, out_reserve, input_mint, output_mint) = match direction {
                Direction::Buy => (
                    pool.quote_reserve,
                    pool.base_reserve,
                    pool.quote_mint,
                    pool.base_mint,
                ),
                Direction::Sell => (
                    pool.base_reserve,
                    pool.quote_reserve,
                    pool.base_mint,
                    pool.quote_mint,
                ),
            };

            let amount_out = constant_product_out(in_reserve, out_reserve, amount_in, pool.fee)?;
            let min_amount_out = u64::try_from(
                amount_out as u128 * (BPS_DENOMINATOR - slippage_bps) / BPS_DENOMINATOR,
            )
            .map_err(|_| QuoteError::MathOverflow)?;

            // 把本笔冲击写回储备，后续钱包在被冲击过的池子上报价。
            let new_in = in_reserve
                .checked_add(amount_in)
                .ok_or(QuoteError::MathOverflow)?;
            let new_out = out_reserve
                .checked_sub(amount_out)
                .ok_or(QuoteError::MathOverflow)?;
            match direction {
                Direction::Buy => {
                    pool.quote_reserve = new_in;
                    pool.base_reserve = new_out;
                }
                Direction::Sell => {
                    pool.base_reserve = new_in;
                    pool.quote_reserve = new_out;
                }
            }

            let native_input = input_mint == spl_token::native_mint::ID;
            let required = self
                .fee_budget_lamports
                .checked_add(if native_input { amount_in } else { 0 })
                .ok_or(QuoteError::MathOverflow)?;
            if wallet.lamports < required {
                tracing::debug!(
                    target: "quote",
                    wallet = %wallet.address,
                    required,
                    held = wallet.lamports,
                    "钱包原生余额不足，跳过但保留其价格冲击"
                );
                insufficient.push(InsufficiencyRecord {
                    wallet: wallet.address,
                    lamports_needed: required - wallet.lamports,
                });
                continue;
            }

            instructions.push(SwapInstruction {
                wallet: wallet.address,
                signer: wallet.signer.clone(),
                input_mint,
                output_mint,
                amount_in,
                min_amount_out,
            });
        }

        tracing::debug!(
            target: "quote",
            instructions = instructions.len(),
            insufficient = insufficient.len(),
            "报价完成"
        );
        Ok(SwapPlan {
            instructions,
            insufficient,
        })
    }
}

/// 卖出额 = floor(持仓 * 百分比 / 100)。
fn sell_amount(token_balance: u64, sell_percent: u64) -> Result<u64, QuoteError> {
    u64::try_from(token_balance as u128 * sell_percent as u128 / 100)
        .map_err(|_| QuoteError::MathOverflow)
}

/// 恒定乘积出额：out = floor(out_reserve * in_eff / (in_reserve + in_eff))，
/// 其中 in_eff 为扣掉协议费后的有效输入。
fn constant_product_out(
    in_reserve: u64,
    out_reserve: u64,
    amount_in: u64,
    fee: Option<super::FeeRate>,
) -> Result<u64, QuoteError> {
    let in_eff: u128 = match fee {
        Some(rate) if rate.denominator > 0 => {
            amount_in as u128 * (rate.denominator - rate.numerator.min(rate.denominator)) as u128
                / rate.denominator as u128
        }
        _ => amount_in as u128,
    };
    let denominator = in_reserve as u128 + in_eff;
    if denominator == 0 {
        return Err(QuoteError::MathOverflow);
    }
    u64::try_from(out_reserve as u128 * in_eff / denominator).map_err(|_| QuoteError::MathOverflow)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;

    use super::*;
    use crate::quote::FeeRate;

    fn pool(base_reserve: u64, quote_reserve: u64) -> PoolState {
        PoolState {
            base_mint: Pubkey::new_unique(),
            quote_mint: spl_token::native_mint::ID,
            base_reserve,
            quote_reserve,
            base_decimals: 6,
            quote_decimals: 9,
            fee: None,
        }
    }

    fn wallet(lamports: u64, token_balance: u64) -> WalletEntry {
        let signer = Arc::new(Keypair::new());
        WalletEntry {
            address: signer.pubkey(),
            signer,
            lamports,
            token_balance,
            selected: true,
        }
    }

    fn calculator(buy_lamports: u64, sell_percent: u64) -> SwapQuoteCalculator {
        SwapQuoteCalculator::new(
            SwapAmounts {
                buy_lamports,
                sell_percent,
            },
            5_000,
        )
    }

    #[test]
    fn single_buy_matches_constant_product_floor() {
        let mut pool = pool(1_000_000_000, 500_000_000);
        let wallets = [wallet(1_000_000_000, 0)];
        let plan = calculator(10_000_000, 0)
            .compute_swaps(&mut pool, &wallets, Direction::Buy, 0.0)
            .unwrap();

        let expected = 1_000_000_000u128 * 10_000_000 / (500_000_000 + 10_000_000);
        assert_eq!(plan.instructions.len(), 1);
        assert_eq!(plan.instructions[0].min_amount_out as u128, expected);
        assert_eq!(plan.instructions[0].amount_in, 10_000_000);
    }

    #[test]
    fn second_wallet_gets_strictly_worse_price() {
        let mut impacted = pool(1_000_000_000, 500_000_000);
        let wallets = [wallet(1_000_000_000, 0), wallet(1_000_000_000, 0)];
        let plan = calculator(10_000_000, 0)
            .compute_swaps(&mut impacted, &wallets, Direction::Buy, 0.0)
            .unwrap();

        let mut fresh = pool(1_000_000_000, 500_000_000);
        let alone = calculator(10_000_000, 0)
            .compute_swaps(&mut fresh, &[wallet(1_000_000_000, 0)], Direction::Buy, 0.0)
            .unwrap();

        assert_eq!(plan.instructions.len(), 2);
        assert!(plan.instructions[1].min_amount_out < alone.instructions[0].min_amount_out);
    }

    #[test]
    fn full_sell_consumes_entire_balance() {
        let mut pool = pool(1_000_000_000, 500_000_000);
        let wallets = [wallet(1_000_000_000, 777_777)];
        let plan = calculator(0, 100)
            .compute_swaps(&mut pool, &wallets, Direction::Sell, 1.0)
            .unwrap();
        assert_eq!(plan.instructions[0].amount_in, 777_777);
    }

    #[test]
    fn partial_sell_floors() {
        let mut pool = pool(1_000_000_000, 500_000_000);
        let wallets = [wallet(1_000_000_000, 999)];
        let plan = calculator(0, 33)
            .compute_swaps(&mut pool, &wallets, Direction::Sell, 1.0)
            .unwrap();
        assert_eq!(plan.instructions[0].amount_in, 329);
    }

    #[test]
    fn no_selected_wallet_leaves_pool_untouched() {
        let mut pool = pool(1_000_000_000, 500_000_000);
        let mut wallets = [wallet(1_000_000_000, 0)];
        wallets[0].selected = false;
        let err = calculator(10_000_000, 0)
            .compute_swaps(&mut pool, &wallets, Direction::Buy, 1.0)
            .unwrap_err();
        assert_eq!(err, QuoteError::NoWalletSelected);
        assert_eq!(pool.base_reserve, 1_000_000_000);
        assert_eq!(pool.quote_reserve, 500_000_000);
    }

    #[test]
    fn insufficient_wallet_reported_and_excluded() {
        let mut pool = pool(1_000_000_000, 500_000_000);
        // 第一个钱包付不起 amount_in + fee_budget，第二个可以。
        let wallets = [wallet(10_000_000, 0), wallet(1_000_000_000, 0)];
        let plan = calculator(10_000_000, 0)
            .compute_swaps(&mut pool, &wallets, Direction::Buy, 1.0)
            .unwrap();

        assert_eq!(plan.instructions.len(), 1);
        assert_eq!(plan.instructions[0].wallet, wallets[1].address);
        assert_eq!(plan.insufficient.len(), 1);
        assert_eq!(plan.insufficient[0].wallet, wallets[0].address);
        assert_eq!(plan.insufficient[0].lamports_needed, 5_000);
        // 被剔除的钱包仍然留下了价格冲击。
        assert_eq!(pool.quote_reserve, 500_000_000 + 2 * 10_000_000);
    }

    #[test]
    fn non_native_quote_rejected_before_loop() {
        let mut pool = pool(1_000_000_000, 500_000_000);
        pool.quote_mint = Pubkey::new_unique();
        let wallets = [wallet(1_000_000_000, 0)];
        let err = calculator(10_000_000, 0)
            .compute_swaps(&mut pool, &wallets, Direction::Buy, 1.0)
            .unwrap_err();
        assert_eq!(err, QuoteError::UnsupportedPoolType);
    }

    #[test]
    fn fee_factor_shrinks_output() {
        let plain = constant_product_out(500_000_000, 1_000_000_000, 10_000_000, None).unwrap();
        let taxed = constant_product_out(
            500_000_000,
            1_000_000_000,
            10_000_000,
            Some(FeeRate {
                numerator: 25,
                denominator: 10_000,
            }),
        )
        .unwrap();
        assert!(taxed < plain);
    }

    #[test]
    fn slippage_scales_min_out() {
        let mut with_slip = pool(1_000_000_000, 500_000_000);
        let plan = calculator(10_000_000, 0)
            .compute_swaps(&mut with_slip, &[wallet(1_000_000_000, 0)], Direction::Buy, 5.0)
            .unwrap();
        let raw = 1_000_000_000u128 * 10_000_000 / (500_000_000 + 10_000_000);
        assert_eq!(plan.instructions[0].min_amount_out as u128, raw * 9_500 / 10_000);
    }
}
