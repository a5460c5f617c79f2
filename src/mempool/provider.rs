use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::{BlockId, BlockNumber, Transaction as EthersTransaction, H256};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::NOTIFICATION_CHANNEL_CAPACITY;
use crate::types::{Event, EventPayload, Slot};
use crate::utils::{to_alloy_address, to_alloy_u256, to_ethers_address};

/// 업스트림 구독에서 올라오는 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderNotification {
    /// 연결과 리스너 등록이 끝남
    Opened,
    /// 새 펜딩 트랜잭션 id
    Pending(B256),
    Error(String),
    Closed { code: u16, reason: String },
}

/// 체인 상태 조회와 펜딩 트랜잭션 구독
#[async_trait]
pub trait ChainStateProvider: Send + Sync {
    /// 새 구독을 연다. 이전 구독이 남아 있으면 먼저 정리한다.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ProviderNotification>>;

    /// 등록된 모든 리스너를 해제한다
    async fn unsubscribe_all(&self);

    async fn event_details(&self, id: B256) -> Result<Option<Event>>;

    async fn current_slot(&self) -> Result<Slot>;

    /// 계정의 펜딩 포함 시퀀스 (nonce)
    async fn sequence_count(&self, account: Address) -> Result<u64>;
}

/// ethers WebSocket 구독 + HTTP 조회 기반 provider
pub struct WsChainProvider {
    ws_url: String,
    http: Arc<Provider<Http>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl WsChainProvider {
    /// HTTP 엔드포인트가 응답하는지 확인한 뒤 만든다
    pub async fn connect(rpc_url: &str, ws_url: &str) -> Result<Self> {
        info!("🔌 체인 provider 초기화: {}", rpc_url);
        let http = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| anyhow!("invalid RPC URL {}: {}", rpc_url, e))?;
        let block = http.get_block_number().await?.as_u64();
        info!("📦 현재 블록: {}", block);

        Ok(Self {
            ws_url: ws_url.to_string(),
            http: Arc::new(http),
            listener: Mutex::new(None),
        })
    }

    async fn run_listener(url: String, tx: mpsc::Sender<ProviderNotification>) {
        let provider = match Provider::<Ws>::connect(&url).await {
            Ok(provider) => provider,
            Err(e) => {
                let _ = tx.send(ProviderNotification::Error(format!("connect: {}", e))).await;
                return;
            }
        };

        let mut stream = match provider.subscribe_pending_txs().await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.send(ProviderNotification::Error(format!("subscribe: {}", e))).await;
                return;
            }
        };

        if tx.send(ProviderNotification::Opened).await.is_err() {
            return;
        }

        while let Some(hash) = stream.next().await {
            let id = B256::from_slice(hash.as_bytes());
            if tx.send(ProviderNotification::Pending(id)).await.is_err() {
                debug!("구독 수신자 종료");
                return;
            }
        }

        let _ = tx
            .send(ProviderNotification::Closed {
                code: 1006,
                reason: "pending transaction stream ended".to_string(),
            })
            .await;
    }
}

/// ethers 트랜잭션을 엔진 이벤트로 변환
pub fn event_from_ethers(tx: &EthersTransaction) -> Event {
    let fee_hint = tx
        .max_priority_fee_per_gas
        .or(tx.gas_price)
        .unwrap_or_default();
    Event {
        id: B256::from_slice(tx.hash.as_bytes()),
        payload: EventPayload {
            from: to_alloy_address(tx.from),
            to: tx.to.map(to_alloy_address),
            value: to_alloy_u256(tx.value),
            input: Bytes::from(tx.input.to_vec()),
            nonce: tx.nonce.low_u64(),
            gas_limit: tx.gas.low_u64(),
            raw: Some(Bytes::from(tx.rlp().to_vec())),
        },
        fee_hint: to_alloy_u256(fee_hint),
        observed_at: Utc::now(),
    }
}

#[async_trait]
impl ChainStateProvider for WsChainProvider {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ProviderNotification>> {
        let mut listener = self.listener.lock().await;
        if let Some(previous) = listener.take() {
            previous.abort();
        }

        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        *listener = Some(tokio::spawn(Self::run_listener(self.ws_url.clone(), tx)));
        debug!("📡 펜딩 트랜잭션 구독 시작: {}", self.ws_url);
        Ok(rx)
    }

    async fn unsubscribe_all(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            debug!("🧹 기존 리스너 해제");
        }
    }

    async fn event_details(&self, id: B256) -> Result<Option<Event>> {
        let tx = self.http.get_transaction(H256::from_slice(id.as_slice())).await?;
        Ok(tx.as_ref().map(event_from_ethers))
    }

    async fn current_slot(&self) -> Result<Slot> {
        Ok(self.http.get_block_number().await?.as_u64())
    }

    async fn sequence_count(&self, account: Address) -> Result<u64> {
        let count = self
            .http
            .get_transaction_count(
                to_ethers_address(account),
                Some(BlockId::Number(BlockNumber::Pending)),
            )
            .await?;
        if count.bits() > 64 {
            warn!("⚠️ 비정상적인 nonce 값: {}", count);
            return Err(anyhow!("nonce out of range: {}", count));
        }
        Ok(count.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes as EthersBytes, U256 as EthersU256};

    #[test]
    fn converts_ethers_transaction() {
        let tx = EthersTransaction {
            hash: H256::repeat_byte(0xab),
            nonce: EthersU256::from(9),
            from: ethers::types::H160::repeat_byte(1),
            to: Some(ethers::types::H160::repeat_byte(2)),
            value: EthersU256::from(1_000u64),
            gas: EthersU256::from(150_000u64),
            input: EthersBytes::from(vec![0x38, 0xed, 0x17, 0x39]),
            max_priority_fee_per_gas: Some(EthersU256::from(3_000_000_000u64)),
            gas_price: Some(EthersU256::from(40_000_000_000u64)),
            ..Default::default()
        };

        let event = event_from_ethers(&tx);
        assert_eq!(event.id, B256::repeat_byte(0xab));
        assert_eq!(event.payload.nonce, 9);
        assert_eq!(event.payload.gas_limit, 150_000);
        assert_eq!(event.payload.to, Some(Address::repeat_byte(2)));
        assert_eq!(event.fee_hint, alloy::primitives::U256::from(3_000_000_000u64));
        assert_eq!(event.selector(), Some([0x38, 0xed, 0x17, 0x39]));
        assert!(event.payload.raw.is_some());
    }
}
