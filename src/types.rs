use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// 블록 높이 (제출 대상 슬롯)
pub type Slot = u64;

/// Dispatcher가 부여하는 태스크 식별자
pub type TaskId = u64;

/// 워커 식별자 (교체된 워커는 새 식별자를 받는다)
pub type WorkerId = usize;

/// 관측된 펜딩 트랜잭션
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: B256,
    pub payload: EventPayload,
    /// 우선순위 수수료 힌트 (wei)
    pub fee_hint: U256,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    /// 서명된 원본 트랜잭션. 있으면 번들 앞쪽에 함께 실린다.
    pub raw: Option<Bytes>,
}

impl Event {
    /// 함수 셀렉터 (calldata 앞 4바이트)
    pub fn selector(&self) -> Option<[u8; 4]> {
        let input = self.payload.input.as_ref();
        if input.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&input[..4]);
        Some(selector)
    }
}

/// 한 이벤트에 대한 평가 작업 단위
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub event: Arc<Event>,
    pub target_slot: Slot,
    pub deadline: Instant,
}

impl Task {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// 전략 풀의 항목 하나
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyDescriptor {
    pub id: u32,
    pub token_pair: String,
    /// 헬퍼 컨트랙트로 보낼 calldata
    pub call_data: Bytes,
    #[serde(default)]
    pub params: StrategyParams,
}

impl StrategyDescriptor {
    pub fn label(&self) -> String {
        format!("EVM-{} ({})", self.id, self.token_pair)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrategyParams {
    /// 관측 트랜잭션 value 중 가져오는 비율 (basis points)
    #[serde(default)]
    pub value_share_bps: u32,
    #[serde(default)]
    pub flat_bonus_wei: u64,
    /// 지정되면 이 셀렉터를 호출하는 이벤트에만 적용된다
    #[serde(default)]
    pub selector: Option<Bytes>,
}

/// EIP-1559 수수료 쌍
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeePair {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// 서명 전 액션
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedAction {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// 한 태스크에서 선택된 단일 승자
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub task_id: TaskId,
    pub strategy_index: usize,
    pub strategy_id: u32,
    pub strategy_label: String,
    /// 순가치 (wei). 정수 연산만 사용한다.
    pub net_value: i128,
    pub action: UnsignedAction,
}

/// 서명까지 끝난 승자
#[derive(Debug, Clone)]
pub struct SignedAction {
    pub task: Task,
    pub result: EvaluationResult,
    /// 서명에 사용한 시퀀스 번호
    pub sequence: u64,
    pub fees: FeePair,
    pub raw: Bytes,
}

/// 릴레이가 돌려주는 최종 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayOutcome {
    Included,
    NotIncluded,
    Rejected(String),
}

/// SubmissionManager 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    Included,
    NotIncluded,
    Rejected(String),
    /// 같은 슬롯에 이미 진행 중인 제출이 있음
    DuplicateSlot,
    /// 대상 슬롯이나 마감 시각이 이미 지남
    Stale,
}

impl From<RelayOutcome> for SubmissionOutcome {
    fn from(outcome: RelayOutcome) -> Self {
        match outcome {
            RelayOutcome::Included => SubmissionOutcome::Included,
            RelayOutcome::NotIncluded => SubmissionOutcome::NotIncluded,
            RelayOutcome::Rejected(detail) => SubmissionOutcome::Rejected(detail),
        }
    }
}

impl std::fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionOutcome::Included => write!(f, "included"),
            SubmissionOutcome::NotIncluded => write!(f, "not-included"),
            SubmissionOutcome::Rejected(detail) => write!(f, "rejected: {}", detail),
            SubmissionOutcome::DuplicateSlot => write!(f, "duplicate-slot"),
            SubmissionOutcome::Stale => write!(f, "stale"),
        }
    }
}

/// 워커 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Starting,
    Idle,
    Busy,
    Crashed,
}

/// Dispatcher 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub submitted: u64,
    pub rejected_full: u64,
    pub stale_discarded: u64,
    pub orphans_evicted: u64,
    pub winners: u64,
    pub worker_restarts: u64,
}

/// 엔진 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("task queue saturated ({queued}/{capacity})")]
    QueueFull { queued: usize, capacity: usize },

    #[error("dispatcher is shut down")]
    DispatcherClosed,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("watcher error: {0}")]
    Watcher(String),
}

/// 개별 전략 평가 실패. 해당 전략만 건너뛴다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyFault {
    #[error("arithmetic overflow in strategy {0}")]
    Overflow(u32),

    #[error("invalid parameters for strategy {id}: {reason}")]
    InvalidParams { id: u32, reason: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_input(input: Vec<u8>) -> Event {
        Event {
            id: B256::ZERO,
            payload: EventPayload {
                from: Address::ZERO,
                to: None,
                value: U256::ZERO,
                input: Bytes::from(input),
                nonce: 0,
                gas_limit: 21_000,
                raw: None,
            },
            fee_hint: U256::ZERO,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn selector_requires_four_bytes() {
        assert_eq!(event_with_input(vec![0xa9, 0x05, 0x9c]).selector(), None);
        assert_eq!(
            event_with_input(vec![0xa9, 0x05, 0x9c, 0xbb, 0x00]).selector(),
            Some([0xa9, 0x05, 0x9c, 0xbb])
        );
    }

    #[tokio::test]
    async fn task_expiry_is_inclusive() {
        let now = Instant::now();
        let task = Task {
            id: 1,
            event: Arc::new(event_with_input(vec![])),
            target_slot: 10,
            deadline: now,
        };
        assert!(task.is_expired(now));
    }

    #[test]
    fn relay_outcome_maps_to_submission_outcome() {
        assert_eq!(SubmissionOutcome::from(RelayOutcome::Included), SubmissionOutcome::Included);
        assert_eq!(
            SubmissionOutcome::from(RelayOutcome::Rejected("bad".into())),
            SubmissionOutcome::Rejected("bad".into())
        );
        assert_eq!(SubmissionOutcome::Stale.to_string(), "stale");
    }
}
