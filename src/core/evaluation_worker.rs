use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use crate::blockchain::{FeeFeed, Signer};
use crate::core::SequenceGuard;
use crate::strategies::{StrategyEvaluator, StrategyPool};
use crate::types::{EngineResult, EvaluationResult, FeePair, SignedAction, Task, UnsignedAction, WorkerId};
use crate::utils::u256_to_i128;

/// 워커 공통 설정
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    /// 순가치가 이 값을 넘어야 승자 후보가 된다 (wei)
    pub min_profit_wei: i128,
    pub gas_limit: u64,
    pub helper_contract: Address,
    pub chain_id: u64,
}

/// 고정 비용 = 우선순위 수수료 × 가스 한도
pub fn fixed_cost_wei(fees: &FeePair, gas_limit: u64) -> i128 {
    let cost = fees
        .max_priority_fee_per_gas
        .saturating_mul(U256::from(gas_limit));
    u256_to_i128(cost)
}

/// 태스크 하나를 받아 전략 풀 전체를 훑고 단일 승자를 서명하는 워커
///
/// 풀은 읽기 전용으로 공유되며, 한 전략의 실패나 패닉은 그 전략만
/// 건너뛴다.
#[derive(Clone)]
pub struct EvaluationWorker {
    id: WorkerId,
    pool: Arc<StrategyPool>,
    evaluator: Arc<dyn StrategyEvaluator>,
    fees: FeeFeed,
    signer: Arc<dyn Signer>,
    sequence: Arc<SequenceGuard>,
    settings: EvaluationSettings,
}

impl EvaluationWorker {
    pub fn new(
        pool: Arc<StrategyPool>,
        evaluator: Arc<dyn StrategyEvaluator>,
        fees: FeeFeed,
        signer: Arc<dyn Signer>,
        sequence: Arc<SequenceGuard>,
        settings: EvaluationSettings,
    ) -> Self {
        Self {
            id: 0,
            pool,
            evaluator,
            fees,
            signer,
            sequence,
            settings,
        }
    }

    /// 같은 구성으로 다른 식별자를 가진 워커
    pub fn with_id(&self, id: WorkerId) -> Self {
        Self { id, ..self.clone() }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// 게시된 최신 수수료로 풀을 평가하고, 승자가 있으면 서명한다
    pub async fn evaluate(&self, task: &Task) -> EngineResult<Option<SignedAction>> {
        let fees = self.fees.latest();

        let Some(result) = self.select_winner(task, &fees) else {
            debug!("🔍 워커 {}: 태스크 {} 승자 없음", self.id, task.id);
            return Ok(None);
        };

        let sequence = self.sequence.current();
        let raw = self.signer.sign(&result.action, sequence, &fees).await?;

        info!(
            "🏆 워커 {}: 태스크 {} 승자 {} (순가치 {} wei, nonce {})",
            self.id, task.id, result.strategy_label, result.net_value, sequence
        );

        Ok(Some(SignedAction {
            task: task.clone(),
            result,
            sequence,
            fees,
            raw,
        }))
    }

    /// 풀 전체를 한 번 훑어 순가치 최대 전략을 고른다.
    ///
    /// 임계값을 넘지 못한 전략은 제외하고, 동률이면 먼저 나온 (인덱스가
    /// 낮은) 전략을 유지한다.
    pub fn select_winner(&self, task: &Task, fees: &FeePair) -> Option<EvaluationResult> {
        let cost = fixed_cost_wei(fees, self.settings.gas_limit);
        let mut best: Option<(usize, i128)> = None;
        let mut faults = 0usize;

        for (index, strategy) in self.pool.iter().enumerate() {
            let evaluated = catch_unwind(AssertUnwindSafe(|| {
                self.evaluator.gross_value(strategy, &task.event)
            }));

            let gross = match evaluated {
                Ok(Ok(Some(gross))) => gross,
                Ok(Ok(None)) => continue,
                Ok(Err(fault)) => {
                    faults += 1;
                    debug!("⚠️ 전략 {} 평가 실패: {}", strategy.id, fault);
                    continue;
                }
                Err(_) => {
                    faults += 1;
                    debug!("💥 전략 {} 평가 중 패닉", strategy.id);
                    continue;
                }
            };

            let net = gross.saturating_sub(cost);
            if net <= self.settings.min_profit_wei {
                continue;
            }
            if best.map_or(true, |(_, current)| net > current) {
                best = Some((index, net));
            }
        }

        if faults > 0 {
            debug!("태스크 {}: 전략 {}개 건너뜀", task.id, faults);
        }

        let (index, net_value) = best?;
        let strategy = self.pool.get(index)?;
        Some(EvaluationResult {
            task_id: task.id,
            strategy_index: index,
            strategy_id: strategy.id,
            strategy_label: strategy.label(),
            net_value,
            action: UnsignedAction {
                to: self.settings.helper_contract,
                data: strategy.call_data.clone(),
                value: U256::ZERO,
                gas_limit: self.settings.gas_limit,
                chain_id: self.settings.chain_id,
            },
        })
    }
}

impl std::fmt::Debug for EvaluationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationWorker")
            .field("id", &self.id)
            .field("pool_size", &self.pool.len())
            .field("evaluator", &self.evaluator.name())
            .finish()
    }
}
