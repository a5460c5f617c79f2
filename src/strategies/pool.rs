use std::collections::HashSet;

use alloy::primitives::Bytes;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{StrategyDescriptor, StrategyParams};

/// 불변 전략 풀. 기동 시 한 번 만들어 `Arc`로 모든 워커가 공유한다.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyPool {
    strategies: Vec<StrategyDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PoolFile {
    #[serde(default, rename = "strategy")]
    strategies: Vec<StrategyDescriptor>,
}

const SYNTHETIC_PAIRS: [&str; 4] = ["WETH/USDC", "WETH/USDT", "WETH/DAI", "WBTC/WETH"];

impl StrategyPool {
    pub fn from_descriptors(strategies: Vec<StrategyDescriptor>) -> Result<Self> {
        let mut ids = HashSet::with_capacity(strategies.len());
        for strategy in &strategies {
            if !ids.insert(strategy.id) {
                return Err(anyhow!("duplicate strategy id {}", strategy.id));
            }
            if strategy.params.value_share_bps > 10_000 {
                return Err(anyhow!(
                    "strategy {} value_share_bps {} exceeds 10000",
                    strategy.id,
                    strategy.params.value_share_bps
                ));
            }
        }
        Ok(Self { strategies })
    }

    /// `[[strategy]]` 배열을 담은 TOML 파일에서 읽는다
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let pool = Self::parse(&content)?;
        info!("📚 전략 풀 로드: {} ({}개)", path, pool.len());
        Ok(pool)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: PoolFile = toml::from_str(content)?;
        Self::from_descriptors(file.strategies)
    }

    /// 개발/모의 실행용 결정적 합성 풀
    pub fn synthetic(size: usize) -> Self {
        let strategies = (0..size)
            .map(|i| {
                let id = i as u32;
                let mut call_data = vec![0x5c, 0x11, 0xd7, 0x95];
                call_data.extend_from_slice(&id.to_be_bytes());
                StrategyDescriptor {
                    id,
                    token_pair: SYNTHETIC_PAIRS[i % SYNTHETIC_PAIRS.len()].to_string(),
                    call_data: Bytes::from(call_data),
                    params: StrategyParams {
                        value_share_bps: 5 + (id % 50),
                        flat_bonus_wei: u64::from(id % 7) * 1_000_000_000_000,
                        selector: None,
                    },
                }
            })
            .collect();
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.strategies.iter()
    }

    pub fn get(&self, index: usize) -> Option<&StrategyDescriptor> {
        self.strategies.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = r#"
[[strategy]]
id = 1
token_pair = "WETH/USDC"
call_data = "0xdeadbeef"

[strategy.params]
value_share_bps = 25
flat_bonus_wei = 1000
selector = "0x38ed1739"

[[strategy]]
id = 2
token_pair = "WETH/DAI"
call_data = "0x01"
"#;

    #[test]
    fn parses_pool_file() {
        let pool = StrategyPool::parse(POOL).unwrap();
        assert_eq!(pool.len(), 2);

        let first = pool.get(0).unwrap();
        assert_eq!(first.label(), "EVM-1 (WETH/USDC)");
        assert_eq!(first.call_data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(first.params.value_share_bps, 25);
        assert_eq!(first.params.selector, Some(Bytes::from(vec![0x38, 0xed, 0x17, 0x39])));

        let second = pool.get(1).unwrap();
        assert_eq!(second.params, StrategyParams::default());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let descriptor = StrategyDescriptor {
            id: 9,
            token_pair: "A/B".into(),
            call_data: Bytes::new(),
            params: StrategyParams::default(),
        };
        assert!(StrategyPool::from_descriptors(vec![descriptor.clone(), descriptor]).is_err());
    }

    #[test]
    fn synthetic_pool_is_deterministic() {
        let a = StrategyPool::synthetic(1500);
        let b = StrategyPool::synthetic(1500);
        assert_eq!(a.len(), 1500);
        assert_eq!(a, b);
        assert!(StrategyPool::from_descriptors(a.iter().cloned().collect()).is_ok());
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        tokio::fs::write(&path, POOL).await.unwrap();
        let pool = StrategyPool::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn bundled_pool_file_parses() {
        let pool = StrategyPool::parse(include_str!("../../config/strategies.toml")).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(1).unwrap().params.selector.as_ref().unwrap().as_ref(), &[0x38, 0xed, 0x17, 0x39]);
    }
}
