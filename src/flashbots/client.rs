use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::H256;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::constants::{MAX_INCLUSION_WAIT_SLOTS, RELAY_HTTP_TIMEOUT_SECS};
use crate::flashbots::RelayPackage;
use crate::types::{RelayOutcome, Slot};
use crate::utils::keccak256;

const SECONDS_PER_SLOT: u64 = 12;

/// 비공개 릴레이
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// 패키지를 제출하고 대상 슬롯이 끝날 때까지 결과를 기다린다
    async fn submit(&self, package: &RelayPackage, target_slot: Slot) -> Result<RelayOutcome>;
}

/// Flashbots API 응답
#[derive(Debug, Deserialize)]
struct FlashbotsResponse {
    result: Option<serde_json::Value>,
    error: Option<FlashbotsError>,
}

#[derive(Debug, Deserialize)]
struct FlashbotsError {
    code: i64,
    message: String,
}

/// Flashbots 릴레이 클라이언트
pub struct FlashbotsRelay {
    http_client: HttpClient,
    relay_url: String,
    /// 릴레이 인증 전용 키 (서명 계정과 분리)
    auth_wallet: LocalWallet,
    chain: Arc<Provider<Http>>,
    simulation_mode: bool,
    poll_interval: Duration,
}

impl FlashbotsRelay {
    pub fn new(config: &RelayConfig, rpc_url: &str) -> Result<Self> {
        let auth_wallet = if config.auth_key.trim().is_empty() {
            warn!("⚠️ FLASHBOTS_AUTH_KEY 없음, 임시 인증 키 생성");
            LocalWallet::new(&mut ethers::core::rand::thread_rng())
        } else {
            config
                .auth_key
                .trim()
                .parse::<LocalWallet>()
                .map_err(|e| anyhow!("invalid relay auth key: {}", e))?
        };

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(RELAY_HTTP_TIMEOUT_SECS))
            .build()?;
        let chain = Provider::<Http>::try_from(rpc_url).map_err(|e| anyhow!("invalid RPC URL {}: {}", rpc_url, e))?;

        info!(
            "🔗 Flashbots 릴레이: {} (인증 {:?}, 시뮬레이션 {})",
            config.relay_url,
            auth_wallet.address(),
            config.simulation_mode
        );

        Ok(Self {
            http_client,
            relay_url: config.relay_url.clone(),
            auth_wallet,
            chain: Arc::new(chain),
            simulation_mode: config.simulation_mode,
            poll_interval: Duration::from_millis(config.inclusion_poll_ms),
        })
    }

    /// `X-Flashbots-Signature` 헤더 값 (`address:signature`)
    async fn create_flashbots_signature(&self, body: &str) -> Result<String> {
        let body_hash = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = self.auth_wallet.sign_message(body_hash).await?;
        Ok(format!(
            "{:?}:0x{}",
            self.auth_wallet.address(),
            hex::encode(signature.to_vec())
        ))
    }

    /// HTTP 상태와 본문으로 제출 성공/거부를 판정한다. 성공이면 None.
    fn classify_response(status: reqwest::StatusCode, body: &str) -> Option<RelayOutcome> {
        if !status.is_success() {
            return Some(RelayOutcome::Rejected(format!("HTTP {}: {}", status, body)));
        }
        match serde_json::from_str::<FlashbotsResponse>(body) {
            Ok(FlashbotsResponse { error: Some(err), .. }) => {
                Some(RelayOutcome::Rejected(format!("{}: {}", err.code, err.message)))
            }
            Ok(FlashbotsResponse { result: Some(_), .. }) => None,
            Ok(_) => Some(RelayOutcome::Rejected("empty relay response".to_string())),
            Err(e) => Some(RelayOutcome::Rejected(format!("malformed relay response: {}", e))),
        }
    }

    /// 대상 슬롯이 지나갈 때까지 기다렸다가 우리 트랜잭션 영수증을 확인
    async fn await_resolution(&self, package: &RelayPackage, target_slot: Slot) -> Result<RelayOutcome> {
        let tx_hash = H256::from_slice(package.action_hash.as_slice());
        let budget = Duration::from_secs((MAX_INCLUSION_WAIT_SLOTS + 1) * SECONDS_PER_SLOT);

        let wait = async {
            loop {
                let current = self.chain.get_block_number().await?.as_u64();
                if current >= target_slot {
                    let receipt = self.chain.get_transaction_receipt(tx_hash).await?;
                    return Ok::<_, anyhow::Error>(match receipt {
                        Some(_) => RelayOutcome::Included,
                        None => RelayOutcome::NotIncluded,
                    });
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(budget, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("⏰ 슬롯 {} 포함 확인 시간 초과", target_slot);
                Ok(RelayOutcome::NotIncluded)
            }
        }
    }
}

#[async_trait]
impl RelayClient for FlashbotsRelay {
    async fn submit(&self, package: &RelayPackage, target_slot: Slot) -> Result<RelayOutcome> {
        if self.simulation_mode {
            info!(
                "🧪 [SIMULATION] 패키지 {} (tx {}개) 슬롯 {} 제출 생략",
                package.id,
                package.len(),
                target_slot
            );
            return Ok(RelayOutcome::NotIncluded);
        }

        let request_body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendBundle",
            "params": [package.to_flashbots_format()]
        });
        let body_str = serde_json::to_string(&request_body)?;
        let signature = self.create_flashbots_signature(&body_str).await?;

        debug!("📤 eth_sendBundle: {} -> 슬롯 {}", package.id, target_slot);
        let response = self
            .http_client
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", signature)
            .body(body_str)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if let Some(rejection) = Self::classify_response(status, &body) {
            warn!("❌ 릴레이 거부: {:?}", rejection);
            return Ok(rejection);
        }

        info!("📨 패키지 {} 접수, 슬롯 {} 대기", package.id, target_slot);
        self.await_resolution(package, target_slot).await
    }
}
