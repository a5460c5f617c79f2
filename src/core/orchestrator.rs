use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blockchain::{FeeFeed, FeeModel, OracleFeeModel, Signer, StaticFeeModel, WalletSigner};
use crate::config::Config;
use crate::constants::SUBMISSION_HISTORY_LIMIT;
use crate::core::dispatcher::DispatcherSettings;
use crate::core::event_watcher::{WatcherSettings, WatcherStats};
use crate::core::submission_manager::{SubmissionRecord, SubmissionStats};
use crate::core::{Dispatcher, EvaluationSettings, EvaluationWorker, EventWatcher, SequenceGuard, SubmissionManager};
use crate::flashbots::{FlashbotsRelay, RelayClient};
use crate::mempool::{AdmissionFilter, ChainStateProvider, WsChainProvider};
use crate::mocks::{MockChainProvider, MockRelayClient, MockSigner};
use crate::strategies::{LinearValueEvaluator, StrategyEvaluator, StrategyPool};
use crate::types::{DispatcherStats, RelayOutcome, SignedAction};

/// 엔진이 의존하는 외부 구성 요소 묶음
pub struct Collaborators {
    pub provider: Arc<dyn ChainStateProvider>,
    pub fee_model: Arc<dyn FeeModel>,
    pub signer: Arc<dyn Signer>,
    pub relay: Arc<dyn RelayClient>,
    pub evaluator: Arc<dyn StrategyEvaluator>,
    pub pool: Arc<StrategyPool>,
}

async fn load_pool(config: &Config) -> Result<StrategyPool> {
    let pool = match &config.strategies.pool_path {
        Some(path) => StrategyPool::load(path).await?,
        None => {
            info!("📚 합성 전략 풀 사용: {}개", config.strategies.synthetic_size);
            StrategyPool::synthetic(config.strategies.synthetic_size)
        }
    };
    if pool.is_empty() {
        return Err(anyhow!("strategy pool is empty"));
    }
    Ok(pool)
}

impl Collaborators {
    /// 실제 체인, 릴레이, 수수료 오라클에 연결한다
    pub async fn connect(config: &Config) -> Result<Self> {
        let ws_url = config
            .network
            .ws_url
            .clone()
            .ok_or_else(|| anyhow!("network.ws_url is required"))?;

        let provider = Arc::new(WsChainProvider::connect(&config.network.rpc_url, &ws_url).await?);
        let signer = Arc::new(WalletSigner::from_private_key(
            &config.signer.private_key,
            config.network.chain_id,
        )?);
        info!("🔑 서명 계정: {}", signer.address());

        let fee_model: Arc<dyn FeeModel> = match &config.fees.oracle_url {
            Some(url) => Arc::new(OracleFeeModel::new(url.clone())?),
            None => Arc::new(StaticFeeModel::new(config.fallback_fees())),
        };
        let relay = Arc::new(FlashbotsRelay::new(&config.relay, &config.network.rpc_url)?);

        Ok(Self {
            provider,
            fee_model,
            signer,
            relay,
            evaluator: Arc::new(LinearValueEvaluator::new()),
            pool: Arc::new(load_pool(config).await?),
        })
    }

    /// 외부 연결 없이 합성 멤풀과 모의 릴레이로 구성한다
    pub async fn mock(config: &Config) -> Result<Self> {
        info!("🎭 Mock 구성 요소 사용");
        let provider = MockChainProvider::new()
            .with_slot(18_000_000)
            .with_synthetic_mempool(Duration::from_millis(250));
        let relay = MockRelayClient::cycling(vec![RelayOutcome::Included, RelayOutcome::NotIncluded])
            .with_latency(Duration::from_millis(200));

        Ok(Self {
            provider: Arc::new(provider),
            fee_model: Arc::new(StaticFeeModel::new(config.fallback_fees())),
            signer: Arc::new(MockSigner::new()),
            relay: Arc::new(relay),
            evaluator: Arc::new(LinearValueEvaluator::new()),
            pool: Arc::new(load_pool(config).await?),
        })
    }
}

/// 엔진 상태 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub uptime_seconds: u64,
    pub account: Address,
    pub next_sequence: u64,
    pub strategy_pool_size: usize,
    pub dispatcher: DispatcherStats,
    pub watcher: WatcherStats,
    pub submissions: SubmissionStats,
}

/// 구성 요소를 조립하고 수명 주기를 관리한다
pub struct Orchestrator {
    config: Arc<Config>,
    pool_size: usize,
    sequence: Arc<SequenceGuard>,
    dispatcher: Arc<Dispatcher>,
    watcher: Arc<EventWatcher>,
    submissions: Arc<SubmissionManager>,
    winners: Mutex<Option<mpsc::Receiver<SignedAction>>>,
    submission_loop: Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
    started_at: Instant,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// 시퀀스를 체인에서 읽어 초기화하고 워커 풀을 띄운다
    pub async fn build(config: Arc<Config>, collaborators: Collaborators) -> Result<Self> {
        info!("🔧 Orchestrator 초기화 중...");
        let Collaborators {
            provider,
            fee_model,
            signer,
            relay,
            evaluator,
            pool,
        } = collaborators;

        let sequence = Arc::new(SequenceGuard::initialize(provider.as_ref(), signer.address()).await?);

        let cancel = CancellationToken::new();
        let fees = FeeFeed::start(
            fee_model,
            config.fallback_fees(),
            Duration::from_millis(config.fees.refresh_ms),
            cancel.clone(),
        )
        .await;

        let template = EvaluationWorker::new(
            Arc::clone(&pool),
            evaluator,
            fees,
            Arc::clone(&signer),
            Arc::clone(&sequence),
            EvaluationSettings {
                min_profit_wei: config.min_profit_wei(),
                gas_limit: config.engine.gas_limit,
                helper_contract: config.helper_contract()?,
                chain_id: config.network.chain_id,
            },
        );

        let (winner_tx, winner_rx) = mpsc::channel(config.engine.max_queue.max(1));
        let dispatcher = Dispatcher::start(
            DispatcherSettings {
                workers: config.worker_count(),
                max_queue: config.engine.max_queue,
                orphan_grace: Duration::from_millis(config.engine.orphan_grace_ms),
            },
            template,
            Some(winner_tx),
        );

        let watcher = EventWatcher::new(
            Arc::clone(&provider),
            Arc::clone(&dispatcher),
            WatcherSettings {
                reconnect_delay: Duration::from_millis(config.watcher.reconnect_delay_ms),
                slot_budget: config.slot_budget(),
                admission: AdmissionFilter {
                    min_fee_hint: config.min_fee_hint(),
                    require_calldata: config.watcher.require_calldata,
                },
                seen_cache_size: config.watcher.seen_cache_size,
                max_in_flight: config.engine.max_queue,
            },
        );

        let submissions = Arc::new(SubmissionManager::new(
            relay,
            provider,
            signer,
            Arc::clone(&sequence),
            SUBMISSION_HISTORY_LIMIT,
        ));

        info!(
            "✅ Orchestrator 준비 완료: 전략 {}개, 워커 {}개",
            pool.len(),
            config.worker_count()
        );

        Ok(Self {
            config,
            pool_size: pool.len(),
            sequence,
            dispatcher,
            watcher,
            submissions,
            winners: Mutex::new(Some(winner_rx)),
            submission_loop: Mutex::new(None),
            is_running: AtomicBool::new(false),
            started_at: Instant::now(),
            cancel,
        })
    }

    /// 제출 루프와 이벤트 수신을 시작한다
    pub async fn start(&self) -> Result<()> {
        info!("🚀 Orchestrator 시작 중...");
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("⚠️ Orchestrator가 이미 실행 중입니다");
            return Ok(());
        }

        let mut winners = self
            .winners
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("orchestrator cannot be restarted"))?;

        let submissions = Arc::clone(&self.submissions);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            info!("🔄 제출 루프 시작");
            loop {
                let action = tokio::select! {
                    _ = cancel.cancelled() => break,
                    action = winners.recv() => match action {
                        Some(action) => action,
                        None => break,
                    },
                };
                let submissions = Arc::clone(&submissions);
                tokio::spawn(async move {
                    let target_slot = action.task.target_slot;
                    let outcome = submissions.submit(action, target_slot).await;
                    debug!("제출 결과 (슬롯 {}): {}", target_slot, outcome);
                });
            }
            debug!("제출 루프 종료");
        });
        *self.submission_loop.lock().await = Some(handle);

        self.watcher.start().await?;
        info!("✅ Orchestrator 실행 중 (simulation={})", self.config.relay.simulation_mode);
        Ok(())
    }

    pub async fn stop(&self) {
        info!("🛑 Orchestrator 중지 중...");
        if !self.is_running.swap(false, Ordering::SeqCst) {
            warn!("⚠️ Orchestrator가 이미 중지됨");
            return;
        }

        self.watcher.stop().await;
        self.dispatcher.shutdown();
        self.cancel.cancel();
        if let Some(handle) = self.submission_loop.lock().await.take() {
            let _ = handle.await;
        }
        info!("✅ Orchestrator 중지됨");
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            account: self.sequence.account(),
            next_sequence: self.sequence.current(),
            strategy_pool_size: self.pool_size,
            dispatcher: self.dispatcher.stats(),
            watcher: self.watcher.stats(),
            submissions: self.submissions.stats(),
        }
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub async fn submission_history(&self) -> Vec<SubmissionRecord> {
        self.submissions.history().await
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
