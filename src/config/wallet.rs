use std::path::PathBuf;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;

use super::{ConfigError, WalletConfig};

/// 配置里解出来的一把钱包钥匙。
#[derive(Clone)]
pub struct LoadedWallet {
    pub address: Pubkey,
    pub signer: Arc<Keypair>,
}

/// 解码配置中的全部私钥，保持配置顺序。任何一条解不开都整体
/// 失败，避免带着半套钱包起跑。
pub fn decode_wallets(wallet: &WalletConfig) -> Result<Vec<LoadedWallet>, ConfigError> {
    wallet
        .keys
        .iter()
        .enumerate()
        .map(|(index, encoded)| {
            let keypair = decode_keypair(encoded).map_err(|message| ConfigError::Parse {
                path: PathBuf::from("wallet.keys"),
                message: format!("第 {} 条私钥无效: {message}", index + 1),
            })?;
            Ok(LoadedWallet {
                address: keypair.pubkey(),
                signer: Arc::new(keypair),
            })
        })
        .collect()
}

fn decode_keypair(encoded: &str) -> Result<Keypair, String> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|err| err.to_string())?;
    Keypair::try_from(bytes.as_slice()).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_bs58_keypair() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let config = WalletConfig {
            keys: vec![encoded],
        };
        let wallets = decode_wallets(&config).unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].address, keypair.pubkey());
    }

    #[test]
    fn rejects_garbage_key() {
        let config = WalletConfig {
            keys: vec!["not-a-key".to_string()],
        };
        assert!(decode_wallets(&config).is_err());
    }
}
