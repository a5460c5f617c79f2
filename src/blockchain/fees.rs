use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::FEE_ORACLE_TIMEOUT_MS;
use crate::types::FeePair;

/// 현재 수수료 조회
#[async_trait]
pub trait FeeModel: Send + Sync {
    async fn current_fees(&self) -> Result<FeePair>;
}

/// 고정 수수료
#[derive(Debug, Clone)]
pub struct StaticFeeModel {
    fees: FeePair,
}

impl StaticFeeModel {
    pub fn new(fees: FeePair) -> Self {
        Self { fees }
    }
}

#[async_trait]
impl FeeModel for StaticFeeModel {
    async fn current_fees(&self) -> Result<FeePair> {
        Ok(self.fees)
    }
}

/// HTTP 수수료 오라클
///
/// 응답 형식: `{"maxFeePerGas": .., "maxPriorityFeePerGas": ..}`
/// 값은 10진수 또는 0x 16진수 문자열, 혹은 숫자
pub struct OracleFeeModel {
    http_client: HttpClient,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleResponse {
    max_fee_per_gas: FeeValue,
    max_priority_fee_per_gas: FeeValue,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeeValue {
    Number(u64),
    Text(String),
}

impl FeeValue {
    fn to_wei(&self) -> Result<U256> {
        match self {
            FeeValue::Number(n) => Ok(U256::from(*n)),
            FeeValue::Text(s) => parse_wei(s),
        }
    }
}

fn parse_wei(value: &str) -> Result<U256> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16),
        None => U256::from_str_radix(value, 10),
    };
    parsed.map_err(|e| anyhow!("invalid fee value {}: {}", value, e))
}

impl OracleFeeModel {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_millis(FEE_ORACLE_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    fn parse(body: &str) -> Result<FeePair> {
        let response: OracleResponse = serde_json::from_str(body)?;
        let fees = FeePair {
            max_fee_per_gas: response.max_fee_per_gas.to_wei()?,
            max_priority_fee_per_gas: response.max_priority_fee_per_gas.to_wei()?,
        };
        if fees.max_priority_fee_per_gas > fees.max_fee_per_gas {
            return Err(anyhow!("priority fee exceeds max fee"));
        }
        Ok(fees)
    }
}

#[async_trait]
impl FeeModel for OracleFeeModel {
    async fn current_fees(&self) -> Result<FeePair> {
        let response = self.http_client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("fee oracle returned HTTP {}", response.status()));
        }
        let body = response.text().await?;
        let fees = Self::parse(&body)?;
        debug!(
            "⛽ 오라클 수수료: max={} priority={}",
            fees.max_fee_per_gas, fees.max_priority_fee_per_gas
        );
        Ok(fees)
    }
}

/// 조회 실패 시 설정된 대체 수수료를 쓴다
async fn current_fees_or_fallback(model: &dyn FeeModel, fallback: &FeePair) -> FeePair {
    match model.current_fees().await {
        Ok(fees) => fees,
        Err(e) => {
            warn!("⚠️ 수수료 조회 실패, 대체값 사용: {}", e);
            *fallback
        }
    }
}

/// 최신 수수료 쌍을 게시하는 피드
///
/// 백그라운드 태스크 하나가 주기적으로 모델을 조회하고, 실패하면 대체값을
/// 올린다. 워커는 기다리지 않고 마지막으로 게시된 값을 읽는다.
#[derive(Debug, Clone)]
pub struct FeeFeed {
    rx: watch::Receiver<FeePair>,
}

impl FeeFeed {
    /// 직접 값을 게시할 수 있는 피드
    pub fn channel(initial: FeePair) -> (watch::Sender<FeePair>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }

    pub fn fixed(fees: FeePair) -> Self {
        Self::channel(fees).1
    }

    /// 첫 값을 조회한 뒤 `interval`마다 갱신하는 태스크를 띄운다.
    ///
    /// `cancel`이 취소되거나 모든 피드가 사라지면 태스크가 끝난다.
    pub async fn start(
        model: Arc<dyn FeeModel>,
        fallback: FeePair,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let initial = current_fees_or_fallback(model.as_ref(), &fallback).await;
        let (tx, feed) = Self::channel(initial);
        info!(
            "⛽ 수수료 피드 시작: max={} priority={} ({}ms 주기)",
            initial.max_fee_per_gas,
            initial.max_priority_fee_per_gas,
            interval.as_millis()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if tx.is_closed() {
                    break;
                }
                let fees = current_fees_or_fallback(model.as_ref(), &fallback).await;
                tx.send_replace(fees);
            }
            debug!("⛽ 수수료 피드 종료");
        });

        feed
    }

    /// 마지막으로 게시된 수수료
    pub fn latest(&self) -> FeePair {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FailingFeeModel;

    /// 호출될 때마다 우선순위 수수료가 1씩 오른다
    #[derive(Default)]
    struct CountingFeeModel {
        calls: AtomicU64,
    }

    impl CountingFeeModel {
        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeeModel for CountingFeeModel {
        async fn current_fees(&self) -> Result<FeePair> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FeePair {
                max_fee_per_gas: U256::from(100 * n),
                max_priority_fee_per_gas: U256::from(n),
            })
        }
    }

    #[async_trait]
    impl FeeModel for FailingFeeModel {
        async fn current_fees(&self) -> Result<FeePair> {
            Err(anyhow!("oracle down"))
        }
    }

    #[test]
    fn parses_hex_and_decimal_values() {
        let fees = OracleFeeModel::parse(
            r#"{"maxFeePerGas": "0x9502f9000", "maxPriorityFeePerGas": "1500000000"}"#,
        )
        .unwrap();
        assert_eq!(fees.max_fee_per_gas, U256::from(40_000_000_000u64));
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(1_500_000_000u64));
    }

    #[test]
    fn parses_numeric_values() {
        let fees = OracleFeeModel::parse(r#"{"maxFeePerGas": 30, "maxPriorityFeePerGas": 2}"#).unwrap();
        assert_eq!(fees.max_fee_per_gas, U256::from(30u64));
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(2u64));
    }

    #[test]
    fn rejects_inverted_fees() {
        assert!(OracleFeeModel::parse(r#"{"maxFeePerGas": "1", "maxPriorityFeePerGas": "2"}"#).is_err());
        assert!(OracleFeeModel::parse(r#"{"maxFeePerGas": "abc", "maxPriorityFeePerGas": "2"}"#).is_err());
    }

    #[tokio::test]
    async fn fallback_used_when_model_fails() {
        let fallback = FeePair {
            max_fee_per_gas: U256::from(9u64),
            max_priority_fee_per_gas: U256::from(1u64),
        };
        assert_eq!(current_fees_or_fallback(&FailingFeeModel, &fallback).await, fallback);

        let fixed = FeePair {
            max_fee_per_gas: U256::from(100u64),
            max_priority_fee_per_gas: U256::from(3u64),
        };
        let model = StaticFeeModel::new(fixed);
        assert_eq!(current_fees_or_fallback(&model, &fallback).await, fixed);
    }

    #[tokio::test]
    async fn feed_publishes_fallback_when_model_fails() {
        let fallback = FeePair {
            max_fee_per_gas: U256::from(5u64),
            max_priority_fee_per_gas: U256::from(1u64),
        };
        let cancel = CancellationToken::new();
        let feed = FeeFeed::start(
            Arc::new(FailingFeeModel),
            fallback,
            Duration::from_millis(100),
            cancel.clone(),
        )
        .await;
        assert_eq!(feed.latest(), fallback);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn feed_refreshes_until_cancelled() {
        let model = Arc::new(CountingFeeModel::default());
        let cancel = CancellationToken::new();
        let feed = FeeFeed::start(
            model.clone(),
            FeePair::default(),
            Duration::from_millis(100),
            cancel.clone(),
        )
        .await;
        assert_eq!(model.calls(), 1);
        assert_eq!(feed.latest().max_priority_fee_per_gas, U256::from(1u64));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(model.calls(), 3);
        assert_eq!(feed.latest().max_priority_fee_per_gas, U256::from(3u64));

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(model.calls(), 3);
        assert_eq!(feed.latest().max_fee_per_gas, U256::from(300u64));
    }

    #[test]
    fn published_values_are_seen_by_clones() {
        let (tx, feed) = FeeFeed::channel(FeePair::default());
        let clone = feed.clone();
        let fees = FeePair {
            max_fee_per_gas: U256::from(7u64),
            max_priority_fee_per_gas: U256::from(2u64),
        };
        tx.send_replace(fees);
        assert_eq!(feed.latest(), fees);
        assert_eq!(clone.latest(), fees);
        assert_eq!(FeeFeed::fixed(fees).latest(), fees);
    }
}
