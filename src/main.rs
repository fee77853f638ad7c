use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use url::Url;

use magellan::activity::{ActivityCache, ActivityEvent, TradeActivity};
use magellan::bundle::{BundleDispatcher, DispatchMode, JitoBundler};
use magellan::chain::{
    FeeEstimator, HttpFeeEstimator, PoolSource, RpcChain, VaultPoolSource, account_with_fallback,
};
use magellan::config::{self, AppConfig, LoadedWallet, load_config};
use magellan::quote::{Direction, SwapAmounts, SwapQuoteCalculator, WalletEntry};
use magellan::venue::AmmVenue;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Parser, Debug)]
#[command(name = "magellan", version, about = "AMM 池多钱包换币执行器")]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 magellan.toml 或 config/magellan.toml）"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 所有选中钱包按固定额度买入
    Buy(SwapCmd),
    /// 所有选中钱包按持仓百分比卖出
    Sell(SwapCmd),
}

#[derive(Args, Debug)]
struct SwapCmd {
    /// 走原子捆包而不是逐笔提交
    #[arg(long)]
    atomic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;
    init_tracing(&config.logging);

    let (direction, atomic) = match &cli.command {
        Command::Buy(cmd) => (Direction::Buy, cmd.atomic),
        Command::Sell(cmd) => (Direction::Sell, cmd.atomic),
    };
    run_swap(&config, direction, atomic).await
}

async fn run_swap(config: &AppConfig, direction: Direction, atomic: bool) -> Result<()> {
    let chain = RpcChain::from_url(&config.rpc.endpoint);
    let keys = config
        .pool
        .to_keys()
        .map_err(|message| anyhow!("池账户配置不完整: {message}"))?;
    let pool_id = Pubkey::from_str(config.swap.pool_id.trim())
        .map_err(|err| anyhow!("swap.pool_id 无效: {err}"))?;

    let wallets = config::decode_wallets(&config.wallet)?;
    if wallets.is_empty() {
        return Err(anyhow!("wallet.keys 为空，没有可用钱包"));
    }

    // 优先费：估不出来就用默认档位，流程不中断。
    let fee_endpoint = config
        .rpc
        .fee_endpoint
        .clone()
        .unwrap_or_else(|| config.rpc.endpoint.clone());
    let fee_table = HttpFeeEstimator::new(fee_endpoint).fee_table().await;
    let compute_unit_price = fee_table.pick(config.swap.fee_tier);
    info!(target: "magellan", compute_unit_price, "优先费档位确定");

    let entries = load_wallet_entries(&chain, &wallets, &keys.base_mint).await;

    let source = VaultPoolSource::new(chain.clone(), keys.clone(), config.pool.fee_rate());
    let mut pool = source.load_pool(&pool_id).await?;

    let calculator = SwapQuoteCalculator::new(
        SwapAmounts {
            buy_lamports: config.swap.buy_lamports,
            sell_percent: config.swap.sell_percent,
        },
        config.swap.fee_budget_lamports,
    );
    let plan = calculator.compute_swaps(
        &mut pool,
        &entries,
        direction,
        config.swap.slippage_percent,
    )?;
    for record in &plan.insufficient {
        warn!(
            target: "magellan",
            wallet = %record.wallet,
            shortfall = record.lamports_needed,
            "钱包余额不足，本轮跳过"
        );
    }
    if plan.instructions.is_empty() {
        return Err(anyhow!("所有钱包都不满足余额要求，没有可执行的交易"));
    }

    let bundler_endpoint = config
        .bundler
        .endpoint
        .clone()
        .unwrap_or_else(|| config.rpc.endpoint.clone());
    let bundler = JitoBundler::new(Url::parse(&bundler_endpoint)?);
    let dispatcher = BundleDispatcher::new(
        chain.clone(),
        bundler,
        Arc::new(AmmVenue::new(keys)),
        config.submitter.to_settings(),
        config.bundler.to_settings(compute_unit_price),
    );

    let mode = if atomic || config.bundler.atomic {
        DispatchMode::Atomic
    } else {
        DispatchMode::Independent
    };
    let result = dispatcher.dispatch(&plan.instructions, mode).await?;

    // 按钱包落一笔活动，读回水位线之后的增量做汇报。
    let cache = ActivityCache::new();
    for swap in &plan.instructions {
        if !result.succeeded.contains(&swap.wallet) {
            continue;
        }
        let price_native = match direction {
            Direction::Buy => swap.amount_in as f64 / LAMPORTS_PER_SOL,
            Direction::Sell => swap.min_amount_out as f64 / LAMPORTS_PER_SOL,
        };
        cache.save(ActivityEvent::Trade(TradeActivity {
            direction,
            price_native,
            price_usd: 0.0,
        }));
    }
    for (key, event) in cache.read_new() {
        info!(target: "magellan", stamp_ms = key.stamp_ms, event = ?event, "成交记录");
    }

    info!(
        target: "magellan",
        status = ?result.status,
        bundle_id = %result.bundle_id,
        succeeded = result.succeeded.len(),
        failed = result.failed.len(),
        "分发完成"
    );
    for signature in &result.signatures {
        info!(target: "magellan", %signature, "交易签名");
    }
    if !result.failed.is_empty() {
        warn!(target: "magellan", wallets = ?result.failed, "以下钱包未成交");
    }
    Ok(())
}

/// 读取每个钱包的原生余额与目标代币持仓，组装报价输入。
/// 单个钱包查询失败按零余额处理，由报价阶段的余额检查兜底。
async fn load_wallet_entries(
    chain: &RpcChain,
    wallets: &[LoadedWallet],
    base_mint: &Pubkey,
) -> Vec<WalletEntry> {
    let mut entries = Vec::with_capacity(wallets.len());
    for wallet in wallets {
        let lamports = match account_with_fallback(chain, &wallet.address).await {
            Ok(Some(account)) => account.lamports,
            Ok(None) => 0,
            Err(err) => {
                warn!(target: "magellan", wallet = %wallet.address, error = %err, "余额查询失败");
                0
            }
        };
        let ata = spl_associated_token_account::get_associated_token_address(
            &wallet.address,
            base_mint,
        );
        let token_balance = match account_with_fallback(chain, &ata).await {
            Ok(Some(account)) => account
                .data
                .get(64..72)
                .and_then(|bytes| bytes.try_into().ok())
                .map(u64::from_le_bytes)
                .unwrap_or(0),
            _ => 0,
        };
        entries.push(WalletEntry {
            address: wallet.address,
            signer: wallet.signer.clone(),
            lamports,
            token_balance,
            selected: true,
        });
    }
    entries
}

fn init_tracing(config: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
