use std::str::FromStr;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bincode::{config::standard, serde::encode_to_vec};
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use serde_json::{Value, json};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::{AtomicBundler, BundleHandle, BundleNotice, BundleRejection, BundleSnapshot, BundlerError};

const JSONRPC_VERSION: &str = "2.0";
/// 结果轮询的轮数与间隔，对应分发方的检查窗口。
const POLL_ROUNDS: usize = 100;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// 首次提交失败后的重试间隔。
const RESUBMIT_DELAY: Duration = Duration::from_secs(3);

static TIP_WALLETS: Lazy<Vec<Pubkey>> = Lazy::new(|| {
    [
        "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
        "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
        "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
        "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
        "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
        "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
        "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
        "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    ]
    .iter()
    .filter_map(|value| Pubkey::from_str(value).ok())
    .collect()
});

pub(crate) fn random_tip_wallet() -> Option<Pubkey> {
    if TIP_WALLETS.is_empty() {
        None
    } else {
        let mut rng = rand::rng();
        TIP_WALLETS.as_slice().choose(&mut rng).copied()
    }
}

/// 通过 JSON-RPC `sendBundle` / `getBundleStatuses` 与捆包构建方
/// 通信。提交成功后起一个后台轮询任务把结果转成通知推给订阅方。
pub struct JitoBundler {
    client: reqwest::Client,
    endpoint: Url,
}

impl JitoBundler {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn post(&self, payload: &Value) -> Result<Value, BundlerError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(BundlerError::http)?;
        if !response.status().is_success() {
            return Err(BundlerError::Http(format!(
                "构建方返回 HTTP {}",
                response.status()
            )));
        }
        response.json::<Value>().await.map_err(BundlerError::http)
    }

    fn encode_bundle(
        transactions: &[VersionedTransaction],
    ) -> Result<Vec<String>, BundlerError> {
        transactions
            .iter()
            .map(|tx| {
                let bytes = encode_to_vec(tx, standard())
                    .map_err(|err| BundlerError::Encode(err.to_string()))?;
                Ok(BASE64_STANDARD.encode(bytes))
            })
            .collect()
    }

    fn send_payload(encoded: &[String]) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": 1,
            "method": "sendBundle",
            "params": [encoded, { "encoding": "base64" }],
        })
    }

    fn status_payload(bundle_id: &str) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": 1,
            "method": "getBundleStatuses",
            "params": [[bundle_id]],
        })
    }

    /// 从状态响应里取出第一条捆包记录。
    fn first_status(body: &Value) -> Option<&Value> {
        let entry = body.get("result")?.get("value")?.get(0)?;
        if entry.is_null() { None } else { Some(entry) }
    }

    fn snapshot_from(entry: &Value) -> BundleSnapshot {
        match entry.get("confirmation_status").and_then(Value::as_str) {
            Some("confirmed") | Some("finalized") => BundleSnapshot::Landed,
            Some(_) => BundleSnapshot::Pending,
            None => BundleSnapshot::Unknown,
        }
    }
}

#[async_trait::async_trait]
impl AtomicBundler for JitoBundler {
    async fn submit_bundle(
        &self,
        transactions: &[VersionedTransaction],
    ) -> Result<BundleHandle, BundlerError> {
        let encoded = Self::encode_bundle(transactions)?;
        let payload = Self::send_payload(&encoded);

        // 失败重试一次，间隔固定。
        let body = match self.post(&payload).await {
            Ok(body) => body,
            Err(err) => {
                warn!(target: "bundle::jito", error = %err, "sendBundle 失败，稍后重试一次");
                tokio::time::sleep(RESUBMIT_DELAY).await;
                self.post(&payload).await?
            }
        };

        if let Some(error) = body.get("error") {
            return Err(BundlerError::Rejected(error.to_string()));
        }
        let bundle_id = body
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| BundlerError::Rejected("sendBundle 响应缺少捆包标识".into()))?
            .to_string();

        let (notice_tx, notice_rx) = mpsc::channel(8);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let poll_id = bundle_id.clone();
        tokio::spawn(async move {
            poll_bundle(client, endpoint, poll_id, notice_tx).await;
        });

        Ok(BundleHandle {
            bundle_id,
            notices: notice_rx,
        })
    }

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleSnapshot, BundlerError> {
        let body = self.post(&Self::status_payload(bundle_id)).await?;
        Ok(match Self::first_status(&body) {
            Some(entry) => Self::snapshot_from(entry),
            None => BundleSnapshot::Unknown,
        })
    }
}

/// 后台轮询捆包状态并推送通知。终态推完即退出；订阅方先挂断
/// 也退出。
async fn poll_bundle(
    client: reqwest::Client,
    endpoint: Url,
    bundle_id: String,
    notices: mpsc::Sender<BundleNotice>,
) {
    let payload = JitoBundler::status_payload(&bundle_id);
    for round in 0..POLL_ROUNDS {
        tokio::time::sleep(POLL_INTERVAL).await;
        if notices.is_closed() {
            return;
        }

        let body = match client
            .post(endpoint.clone())
            .json(&payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
        {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(target: "bundle::jito", round, error = %err, "状态响应解析失败");
                    continue;
                }
            },
            Err(err) => {
                debug!(target: "bundle::jito", round, error = %err, "状态查询失败");
                continue;
            }
        };

        let Some(entry) = JitoBundler::first_status(&body) else {
            continue;
        };

        if let Some(err) = entry.get("err") {
            if !err.is_null() && err.as_str() != Some("Ok") {
                let rejection = categorize_rejection(&err.to_string());
                let _ = notices.send(BundleNotice::Rejected(rejection)).await;
                return;
            }
        }
        if JitoBundler::snapshot_from(entry) == BundleSnapshot::Landed {
            let slot = entry.get("slot").and_then(Value::as_u64).unwrap_or(0);
            let _ = notices.send(BundleNotice::Accepted { slot }).await;
            return;
        }
    }
    debug!(target: "bundle::jito", %bundle_id, "轮询窗口耗尽，无终态");
}

/// 把构建方的拒绝文案归到有限几类。
fn categorize_rejection(detail: &str) -> BundleRejection {
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("auction") {
        BundleRejection::AuctionBid
    } else if lowered.contains("batch") {
        BundleRejection::BatchBid
    } else if lowered.contains("simulation") {
        BundleRejection::Simulation
    } else if lowered.contains("dropped") {
        BundleRejection::Dropped
    } else {
        BundleRejection::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_wallets_parse_and_pick() {
        assert_eq!(TIP_WALLETS.len(), 8);
        let picked = random_tip_wallet().unwrap();
        assert!(TIP_WALLETS.contains(&picked));
    }

    #[test]
    fn send_payload_shape() {
        let payload = JitoBundler::send_payload(&["dGVzdA==".to_string()]);
        assert_eq!(payload["method"], "sendBundle");
        assert_eq!(payload["params"][0][0], "dGVzdA==");
        assert_eq!(payload["params"][1]["encoding"], "base64");
    }

    #[test]
    fn rejection_categories() {
        assert_eq!(
            categorize_rejection("StateAuctionBidRejected"),
            BundleRejection::AuctionBid
        );
        assert_eq!(
            categorize_rejection("WinningBatchBidRejected"),
            BundleRejection::BatchBid
        );
        assert_eq!(
            categorize_rejection("SimulationFailure: tx 0 failed"),
            BundleRejection::Simulation
        );
        assert_eq!(
            categorize_rejection("DroppedBundle"),
            BundleRejection::Dropped
        );
        assert_eq!(
            categorize_rejection("something else"),
            BundleRejection::Internal
        );
    }

    #[test]
    fn status_snapshot_parsing() {
        let body = json!({
            "result": { "value": [ { "confirmation_status": "finalized", "slot": 7 } ] }
        });
        let entry = JitoBundler::first_status(&body).unwrap();
        assert_eq!(JitoBundler::snapshot_from(entry), BundleSnapshot::Landed);

        let missing = json!({ "result": { "value": [ null ] } });
        assert!(JitoBundler::first_status(&missing).is_none());
    }
}
