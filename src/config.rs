use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::*;
use crate::types::FeePair;

const PLACEHOLDER_KEY: &str = "your_private_key_here";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub signer: SignerConfig,
    pub relay: RelayConfig,
    pub engine: EngineConfig,
    pub watcher: WatcherConfig,
    pub fees: FeeConfig,
    pub strategies: StrategyPoolConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub private_key: String,
    /// 서명된 액션이 호출하는 헬퍼 컨트랙트
    pub mev_helper_contract: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub relay_url: String,
    /// 릴레이 인증 전용 키. 비어 있으면 기동 시 임시 키를 만든다.
    #[serde(default)]
    pub auth_key: String,
    #[serde(default)]
    pub simulation_mode: bool,
    #[serde(default = "default_inclusion_poll_ms")]
    pub inclusion_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 명시하지 않으면 CPU 코어 수에서 예약분을 뺀 값
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_reserved_cores")]
    pub reserved_cores: usize,
    pub max_queue: usize,
    pub min_profit_wei: u64,
    pub gas_limit: u64,
    pub slot_budget_ms: u64,
    pub orphan_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub min_fee_hint_gwei: u64,
    #[serde(default = "default_true")]
    pub require_calldata: bool,
    pub seen_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default)]
    pub oracle_url: Option<String>,
    pub fallback_max_fee_gwei: u64,
    pub fallback_priority_fee_gwei: u64,
    /// 수수료 피드 갱신 주기
    #[serde(default = "default_fee_refresh_ms")]
    pub refresh_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPoolConfig {
    /// TOML 풀 파일 경로. 없으면 합성 풀을 사용한다.
    #[serde(default)]
    pub pool_path: Option<String>,
    pub synthetic_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub api_port: u16,
    pub log_level: String,
    pub stats_interval_secs: u64,
}

fn default_inclusion_poll_ms() -> u64 {
    DEFAULT_INCLUSION_POLL_MS
}

fn default_fee_refresh_ms() -> u64 {
    FEE_REFRESH_INTERVAL_MS
}

fn default_reserved_cores() -> usize {
    DEFAULT_RESERVED_CORES
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                chain_id: 1,
                name: "mainnet".to_string(),
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY".to_string(),
                ws_url: Some("wss://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY".to_string()),
            },
            signer: SignerConfig {
                private_key: PLACEHOLDER_KEY.to_string(),
                mev_helper_contract: Address::ZERO.to_string(),
            },
            relay: RelayConfig {
                relay_url: DEFAULT_FLASHBOTS_RELAY.to_string(),
                auth_key: String::new(),
                simulation_mode: false,
                inclusion_poll_ms: DEFAULT_INCLUSION_POLL_MS,
            },
            engine: EngineConfig {
                workers: None,
                reserved_cores: DEFAULT_RESERVED_CORES,
                max_queue: DEFAULT_MAX_QUEUE,
                min_profit_wei: DEFAULT_MIN_PROFIT_WEI,
                gas_limit: DEFAULT_GAS_LIMIT,
                slot_budget_ms: DEFAULT_SLOT_BUDGET_MS,
                orphan_grace_ms: DEFAULT_ORPHAN_GRACE_MS,
            },
            watcher: WatcherConfig {
                reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
                min_fee_hint_gwei: 0,
                require_calldata: true,
                seen_cache_size: DEFAULT_SEEN_CACHE_SIZE,
            },
            fees: FeeConfig {
                oracle_url: None,
                fallback_max_fee_gwei: FALLBACK_MAX_FEE_GWEI,
                fallback_priority_fee_gwei: FALLBACK_PRIORITY_FEE_GWEI,
                refresh_ms: FEE_REFRESH_INTERVAL_MS,
            },
            strategies: StrategyPoolConfig {
                pool_path: None,
                synthetic_size: DEFAULT_SYNTHETIC_POOL_SIZE,
            },
            monitoring: MonitoringConfig {
                api_port: 8080,
                log_level: "info".to_string(),
                stats_interval_secs: 30,
            },
        }
    }
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 파일이 없으면 기본값으로 시작한다
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            warn!("⚠️ 설정 파일 {} 없음, 기본값 사용", path);
            Ok(Self::default())
        }
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// 환경변수로 민감한 값과 엔드포인트를 덮어쓴다
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = present("PRIVATE_KEY") {
            self.signer.private_key = key;
            info!("🔑 PRIVATE_KEY 적용");
        }
        if let Some(key) = present("FLASHBOTS_AUTH_KEY") {
            self.relay.auth_key = key;
            info!("🔑 FLASHBOTS_AUTH_KEY 적용");
        }
        if let Some(url) = present("RPC_URL") {
            info!("🌐 RPC_URL: {}", url);
            self.network.rpc_url = url;
        }
        if let Some(url) = present("WS_URL") {
            info!("🌐 WS_URL: {}", url);
            self.network.ws_url = Some(url);
        }
        if let Some(url) = present("FLASHBOTS_RELAY_URL") {
            info!("🌐 FLASHBOTS_RELAY_URL: {}", url);
            self.relay.relay_url = url;
        }
        if let Some(url) = present("FEE_ORACLE_URL") {
            info!("⛽ FEE_ORACLE_URL: {}", url);
            self.fees.oracle_url = Some(url);
        }
        if let Some(address) = present("MEV_HELPER_CONTRACT") {
            info!("📜 MEV_HELPER_CONTRACT: {}", address);
            self.signer.mev_helper_contract = address;
        }
        if let Some(threshold) = present("MIN_PROFIT_THRESHOLD") {
            match parse_eth_to_wei(&threshold) {
                Ok(wei) => {
                    info!("💰 MIN_PROFIT_THRESHOLD: {} ETH", threshold);
                    self.engine.min_profit_wei = wei;
                }
                Err(e) => warn!("⚠️ MIN_PROFIT_THRESHOLD 무시 ({}): {}", threshold, e),
            }
        }
    }

    /// `require_credentials`가 false면 (mock 모드) 키 검사를 건너뛴다
    pub fn validate(&self, require_credentials: bool) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            return Err(anyhow!("Network RPC URL cannot be empty"));
        }

        if require_credentials {
            if self.signer.private_key.is_empty() || self.signer.private_key == PLACEHOLDER_KEY {
                return Err(anyhow!("Signer private key must be configured"));
            }
            if self.network.ws_url.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow!("Network WS URL must be configured for mempool ingestion"));
            }
            if self.relay.relay_url.is_empty() {
                return Err(anyhow!("Relay URL cannot be empty"));
            }
        }

        self.helper_contract()?;

        if self.engine.max_queue == 0 {
            return Err(anyhow!("engine.max_queue must be positive"));
        }
        if self.engine.gas_limit == 0 {
            return Err(anyhow!("engine.gas_limit must be positive"));
        }
        if self.engine.slot_budget_ms == 0 {
            return Err(anyhow!("engine.slot_budget_ms must be positive"));
        }
        if self.watcher.reconnect_delay_ms == 0 {
            return Err(anyhow!("watcher.reconnect_delay_ms must be positive"));
        }
        if self.watcher.seen_cache_size == 0 {
            return Err(anyhow!("watcher.seen_cache_size must be positive"));
        }
        if self.fees.refresh_ms == 0 {
            return Err(anyhow!("fees.refresh_ms must be positive"));
        }
        if self.strategies.pool_path.is_none() && self.strategies.synthetic_size == 0 {
            return Err(anyhow!("Strategy pool is empty: set strategies.pool_path or synthetic_size"));
        }

        Ok(())
    }

    pub fn helper_contract(&self) -> Result<Address> {
        Address::from_str(&self.signer.mev_helper_contract)
            .map_err(|e| anyhow!("Invalid mev_helper_contract {}: {}", self.signer.mev_helper_contract, e))
    }

    pub fn worker_count(&self) -> usize {
        match self.engine.workers {
            Some(n) => n.max(MIN_WORKERS),
            None => num_cpus::get()
                .saturating_sub(self.engine.reserved_cores)
                .max(MIN_WORKERS),
        }
    }

    pub fn min_profit_wei(&self) -> i128 {
        i128::from(self.engine.min_profit_wei)
    }

    pub fn fallback_fees(&self) -> FeePair {
        FeePair {
            max_fee_per_gas: U256::from(self.fees.fallback_max_fee_gwei) * U256::from(GWEI),
            max_priority_fee_per_gas: U256::from(self.fees.fallback_priority_fee_gwei) * U256::from(GWEI),
        }
    }

    pub fn min_fee_hint(&self) -> U256 {
        U256::from(self.watcher.min_fee_hint_gwei) * U256::from(GWEI)
    }

    pub fn slot_budget(&self) -> Duration {
        Duration::from_millis(self.engine.slot_budget_ms)
    }
}

/// "0.0001" 형태의 ETH 문자열을 wei로 변환
pub fn parse_eth_to_wei(value: &str) -> Result<u64> {
    let wei = ethers::utils::parse_ether(value.trim())?;
    if wei > ethers::types::U256::from(u64::MAX) {
        return Err(anyhow!("threshold too large: {}", value));
    }
    Ok(wei.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_requires_credentials() {
        let config = Config::default();
        assert!(config.validate(false).is_ok());
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn worker_count_has_floor() {
        let mut config = Config::default();
        config.engine.workers = Some(1);
        assert_eq!(config.worker_count(), MIN_WORKERS);

        config.engine.workers = None;
        config.engine.reserved_cores = 4096;
        assert_eq!(config.worker_count(), MIN_WORKERS);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PRIVATE_KEY", "0xabc"),
            ("RPC_URL", "http://localhost:8545"),
            ("WS_URL", "ws://localhost:8546"),
            ("MIN_PROFIT_THRESHOLD", "0.002"),
            ("MEV_HELPER_CONTRACT", "0x00000000000000000000000000000000000000aa"),
            ("FEE_ORACLE_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.signer.private_key, "0xabc");
        assert_eq!(config.network.rpc_url, "http://localhost:8545");
        assert_eq!(config.network.ws_url.as_deref(), Some("ws://localhost:8546"));
        assert_eq!(config.engine.min_profit_wei, 2_000_000_000_000_000);
        assert_eq!(config.fees.oracle_url, None);
        assert_eq!(
            config.helper_contract().unwrap(),
            Address::from_str("0x00000000000000000000000000000000000000aa").unwrap()
        );
    }

    #[test]
    fn bad_threshold_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| (k == "MIN_PROFIT_THRESHOLD").then(|| "abc".to_string()));
        assert_eq!(config.engine.min_profit_wei, DEFAULT_MIN_PROFIT_WEI);
    }

    #[test]
    fn fallback_fees_are_in_wei() {
        let config = Config::default();
        let fees = config.fallback_fees();
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(2_000_000_000u64));
        assert_eq!(fees.max_fee_per_gas, U256::from(50_000_000_000u64));
        assert_eq!(config.fees.refresh_ms, FEE_REFRESH_INTERVAL_MS);
    }

    #[test]
    fn zero_fee_refresh_is_rejected() {
        let mut config = Config::default();
        config.fees.refresh_ms = 0;
        assert!(config.validate(false).is_err());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.engine.workers = Some(6);
        config.strategies.pool_path = Some("pool.toml".to_string());
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.engine.workers, Some(6));
        assert_eq!(loaded.strategies.pool_path.as_deref(), Some("pool.toml"));
        assert_eq!(loaded.engine.gas_limit, DEFAULT_GAS_LIMIT);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_default() {
        let config = Config::load_or_default("/definitely/not/here.toml").await.unwrap();
        assert_eq!(config.engine.max_queue, DEFAULT_MAX_QUEUE);
    }

    #[test]
    fn bundled_default_file_parses() {
        let config: Config = toml::from_str(include_str!("../config/default.toml")).unwrap();
        assert!(config.relay.simulation_mode);
        assert_eq!(config.engine.min_profit_wei, DEFAULT_MIN_PROFIT_WEI);
        assert_eq!(config.strategies.pool_path.as_deref(), Some("config/strategies.toml"));
        assert!(config.validate(false).is_ok());
        assert!(config.validate(true).is_err());
    }
}
