use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::blockchain::Signer;
use crate::core::sequence_guard::{ReleaseResult, SequenceGuard};
use crate::flashbots::{RelayClient, RelayPackage};
use crate::mempool::ChainStateProvider;
use crate::types::{RelayOutcome, SignedAction, Slot, SubmissionOutcome, TaskId};

/// 제출 기록 한 건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub task_id: TaskId,
    pub target_slot: Slot,
    pub strategy_label: String,
    pub net_value_wei: String,
    pub sequence: Option<u64>,
    pub outcome: SubmissionOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// 제출 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStats {
    pub included: u64,
    pub not_included: u64,
    pub rejected: u64,
    pub duplicate_slot: u64,
    pub stale: u64,
    pub outstanding: usize,
}

#[derive(Default)]
struct Counters {
    included: AtomicU64,
    not_included: AtomicU64,
    rejected: AtomicU64,
    duplicate_slot: AtomicU64,
    stale: AtomicU64,
}

/// 슬롯 점유 해제 가드. 어떤 경로로 끝나든 슬롯을 비운다.
struct SlotLease<'a> {
    outstanding: &'a DashMap<Slot, TaskId>,
    slot: Slot,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.outstanding.remove(&self.slot);
    }
}

/// 서명된 승자를 릴레이에 제출한다.
///
/// 슬롯당 진행 중인 제출은 하나뿐이며, 대상 슬롯이 이미 지났거나 마감이
/// 지난 액션은 보내지 않는다.
pub struct SubmissionManager {
    relay: Arc<dyn RelayClient>,
    provider: Arc<dyn ChainStateProvider>,
    signer: Arc<dyn Signer>,
    sequence: Arc<SequenceGuard>,
    outstanding: DashMap<Slot, TaskId>,
    counters: Counters,
    history: Mutex<VecDeque<SubmissionRecord>>,
    history_limit: usize,
}

impl SubmissionManager {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        provider: Arc<dyn ChainStateProvider>,
        signer: Arc<dyn Signer>,
        sequence: Arc<SequenceGuard>,
        history_limit: usize,
    ) -> Self {
        Self {
            relay,
            provider,
            signer,
            sequence,
            outstanding: DashMap::new(),
            counters: Counters::default(),
            history: Mutex::new(VecDeque::with_capacity(history_limit.min(1024))),
            history_limit: history_limit.max(1),
        }
    }

    pub async fn submit(&self, action: SignedAction, target_slot: Slot) -> SubmissionOutcome {
        let task_id = action.task.id;

        if self.is_stale(&action, target_slot).await {
            debug!("⏰ 태스크 {} 슬롯 {} 경과, 제출 안 함", task_id, target_slot);
            return self.finish(&action, target_slot, None, SubmissionOutcome::Stale).await;
        }

        let holder = match self.outstanding.entry(target_slot) {
            Entry::Occupied(existing) => Some(*existing.get()),
            Entry::Vacant(vacant) => {
                vacant.insert(task_id);
                None
            }
        };
        if let Some(holder) = holder {
            debug!("🚫 슬롯 {} 이미 태스크 {} 제출 중", target_slot, holder);
            return self
                .finish(&action, target_slot, None, SubmissionOutcome::DuplicateSlot)
                .await;
        }
        let _lease = SlotLease {
            outstanding: &self.outstanding,
            slot: target_slot,
        };

        let reservation = self.sequence.reserve();
        let sequence = reservation.number();

        let raw = if sequence == action.sequence {
            action.raw.clone()
        } else {
            debug!("✍️ 시퀀스 변경 {} -> {}, 재서명", action.sequence, sequence);
            match self.signer.sign(&action.result.action, sequence, &action.fees).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.sequence.release(reservation, false);
                    let outcome = SubmissionOutcome::Rejected(e.to_string());
                    return self.finish(&action, target_slot, Some(sequence), outcome).await;
                }
            }
        };

        let package = RelayPackage::assemble(&action.task.event, raw, target_slot);
        info!(
            "📤 태스크 {} 슬롯 {} 제출 (tx {}개, nonce {})",
            task_id,
            target_slot,
            package.len(),
            sequence
        );

        let relay_outcome = match self.relay.submit(&package, target_slot).await {
            Ok(outcome) => outcome,
            Err(e) => RelayOutcome::Rejected(e.to_string()),
        };

        let consumed = relay_outcome == RelayOutcome::Included;
        if self.sequence.release(reservation, consumed) == ReleaseResult::RollbackRefused {
            warn!("⚠️ 시퀀스 {} 반납 거부, 카운터 유지", sequence);
        }

        self.finish(&action, target_slot, Some(sequence), relay_outcome.into()).await
    }

    async fn is_stale(&self, action: &SignedAction, target_slot: Slot) -> bool {
        if action.task.is_expired(Instant::now()) {
            return true;
        }
        match self.provider.current_slot().await {
            Ok(current) => current >= target_slot,
            Err(e) => {
                warn!("⚠️ 현재 슬롯 조회 실패, 마감 기준으로만 판단: {}", e);
                false
            }
        }
    }

    async fn finish(
        &self,
        action: &SignedAction,
        target_slot: Slot,
        sequence: Option<u64>,
        outcome: SubmissionOutcome,
    ) -> SubmissionOutcome {
        let counter = match &outcome {
            SubmissionOutcome::Included => &self.counters.included,
            SubmissionOutcome::NotIncluded => &self.counters.not_included,
            SubmissionOutcome::Rejected(_) => &self.counters.rejected,
            SubmissionOutcome::DuplicateSlot => &self.counters.duplicate_slot,
            SubmissionOutcome::Stale => &self.counters.stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match &outcome {
            SubmissionOutcome::Included => info!("🎉 태스크 {} 슬롯 {} 포함", action.task.id, target_slot),
            SubmissionOutcome::NotIncluded => info!("📭 태스크 {} 슬롯 {} 미포함", action.task.id, target_slot),
            SubmissionOutcome::Rejected(detail) => {
                warn!("❌ 태스크 {} 슬롯 {} 거부: {}", action.task.id, target_slot, detail)
            }
            _ => {}
        }

        let record = SubmissionRecord {
            task_id: action.task.id,
            target_slot,
            strategy_label: action.result.strategy_label.clone(),
            net_value_wei: action.result.net_value.to_string(),
            sequence,
            outcome: outcome.clone(),
            recorded_at: Utc::now(),
        };
        let mut history = self.history.lock().await;
        history.push_back(record);
        while history.len() > self.history_limit {
            history.pop_front();
        }

        outcome
    }

    pub fn stats(&self) -> SubmissionStats {
        SubmissionStats {
            included: self.counters.included.load(Ordering::Relaxed),
            not_included: self.counters.not_included.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            duplicate_slot: self.counters.duplicate_slot.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            outstanding: self.outstanding.len(),
        }
    }

    /// 최근 기록 (오래된 것부터)
    pub async fn history(&self) -> Vec<SubmissionRecord> {
        self.history.lock().await.iter().cloned().collect()
    }
}

impl std::fmt::Debug for SubmissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionManager").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::evaluation_worker::tests::{event, zero_fees};
    use crate::mocks::{MockChainProvider, MockRelayClient, MockSigner};
    use crate::types::{EvaluationResult, Task, UnsignedAction};
    use alloy::primitives::{Address, Bytes, U256};
    use std::time::Duration;

    fn signed(task_id: u64, tag: u8, target_slot: Slot, sequence: u64) -> SignedAction {
        let action = UnsignedAction {
            to: Address::repeat_byte(0xee),
            data: Bytes::from(vec![0xab, tag]),
            value: U256::ZERO,
            gas_limit: 400_000,
            chain_id: 1,
        };
        SignedAction {
            task: Task {
                id: task_id,
                event: Arc::new(event(tag)),
                target_slot,
                deadline: Instant::now() + Duration::from_secs(60),
            },
            result: EvaluationResult {
                task_id,
                strategy_index: 0,
                strategy_id: 0,
                strategy_label: "EVM-0 (WETH/USDC)".to_string(),
                net_value: 12,
                action: action.clone(),
            },
            sequence,
            fees: zero_fees(),
            raw: MockSigner::encode(&action, sequence),
        }
    }

    struct Fixture {
        relay: Arc<MockRelayClient>,
        signer: Arc<MockSigner>,
        sequence: Arc<SequenceGuard>,
        manager: Arc<SubmissionManager>,
    }

    fn fixture(relay: MockRelayClient, current_slot: Slot, initial_sequence: u64) -> Fixture {
        fixture_with_signer(relay, MockSigner::new(), current_slot, initial_sequence)
    }

    fn fixture_with_signer(
        relay: MockRelayClient,
        signer: MockSigner,
        current_slot: Slot,
        initial_sequence: u64,
    ) -> Fixture {
        let relay = Arc::new(relay);
        let signer = Arc::new(signer);
        let sequence = Arc::new(SequenceGuard::new(Address::ZERO, initial_sequence));
        let provider = Arc::new(MockChainProvider::new().with_slot(current_slot));
        let manager = Arc::new(SubmissionManager::new(
            relay.clone(),
            provider,
            signer.clone(),
            sequence.clone(),
            16,
        ));
        Fixture {
            relay,
            signer,
            sequence,
            manager,
        }
    }

    #[tokio::test]
    async fn concurrent_submissions_for_same_slot_send_once() {
        let f = fixture(
            MockRelayClient::new(RelayOutcome::Included).with_latency(Duration::from_millis(50)),
            99,
            0,
        );

        let a = tokio::spawn({
            let manager = f.manager.clone();
            async move { manager.submit(signed(1, 1, 100, 0), 100).await }
        });
        let b = tokio::spawn({
            let manager = f.manager.clone();
            async move { manager.submit(signed(2, 2, 100, 0), 100).await }
        });

        let mut outcomes = vec![a.await.unwrap(), b.await.unwrap()];
        outcomes.sort_by_key(|o| o.to_string());
        assert_eq!(outcomes, vec![SubmissionOutcome::DuplicateSlot, SubmissionOutcome::Included]);
        assert_eq!(f.relay.calls(), 1);
        assert_eq!(f.manager.stats().outstanding, 0);
        assert_eq!(f.manager.stats().duplicate_slot, 1);
        assert_eq!(f.sequence.current(), 1);
    }

    #[tokio::test]
    async fn elapsed_slot_is_never_submitted() {
        let f = fixture(MockRelayClient::new(RelayOutcome::Included), 100, 0);
        let outcome = f.manager.submit(signed(1, 1, 100, 0), 100).await;
        assert_eq!(outcome, SubmissionOutcome::Stale);
        assert_eq!(f.relay.calls(), 0);
        assert_eq!(f.sequence.current(), 0);
    }

    #[tokio::test]
    async fn expired_deadline_is_never_submitted() {
        let f = fixture(MockRelayClient::new(RelayOutcome::Included), 10, 0);
        let mut action = signed(1, 1, 11, 0);
        action.task.deadline = Instant::now();
        assert_eq!(f.manager.submit(action, 11).await, SubmissionOutcome::Stale);
        assert_eq!(f.relay.calls(), 0);
    }

    #[tokio::test]
    async fn not_included_rolls_sequence_back() {
        let f = fixture(MockRelayClient::new(RelayOutcome::NotIncluded), 10, 5);
        let outcome = f.manager.submit(signed(1, 1, 11, 5), 11).await;
        assert_eq!(outcome, SubmissionOutcome::NotIncluded);
        assert_eq!(f.sequence.current(), 5);
        assert_eq!(f.signer.calls(), 0);
    }

    #[tokio::test]
    async fn rejection_is_recorded_and_released() {
        let f = fixture(MockRelayClient::new(RelayOutcome::Rejected("bundle underpriced".into())), 10, 5);
        let outcome = f.manager.submit(signed(1, 1, 11, 5), 11).await;
        assert_eq!(outcome, SubmissionOutcome::Rejected("bundle underpriced".into()));
        assert_eq!(f.sequence.current(), 5);

        let history = f.manager.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sequence, Some(5));
        assert_eq!(history[0].outcome, outcome);
        assert_eq!(f.manager.stats().rejected, 1);
    }

    #[tokio::test]
    async fn resigns_when_sequence_moved() {
        let f = fixture(MockRelayClient::new(RelayOutcome::Included), 10, 8);
        let action = signed(1, 1, 11, 7);
        let expected = MockSigner::encode(&action.result.action, 8);

        assert_eq!(f.manager.submit(action, 11).await, SubmissionOutcome::Included);
        assert_eq!(f.signer.calls(), 1);
        assert_eq!(f.sequence.current(), 9);

        let (package, slot) = f.relay.submissions().await.remove(0);
        assert_eq!(slot, 11);
        assert_eq!(package.transactions.last().unwrap().raw, expected);
        // 관측 트랜잭션이 앞에 온다
        assert_eq!(package.transactions[0].raw, Bytes::from(vec![0x02, 1]));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let relay = Arc::new(MockRelayClient::new(RelayOutcome::Included));
        let manager = SubmissionManager::new(
            relay,
            Arc::new(MockChainProvider::new().with_slot(0)),
            Arc::new(MockSigner::new()),
            Arc::new(SequenceGuard::new(Address::ZERO, 0)),
            2,
        );
        for i in 0..4u64 {
            manager.submit(signed(i, i as u8, 10 + i, i), 10 + i).await;
        }
        let history = manager.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].task_id, 2);
        assert_eq!(manager.stats().included, 4);
    }

    #[tokio::test]
    async fn resign_failure_rejects_without_consuming_sequence() {
        let f = fixture_with_signer(
            MockRelayClient::new(RelayOutcome::Included),
            MockSigner::failing(),
            10,
            5,
        );

        // 워커가 서명한 시퀀스(3)가 예약된 값(5)과 달라 재서명이 필요하다
        let outcome = f.manager.submit(signed(1, 1, 11, 3), 11).await;
        assert!(matches!(outcome, SubmissionOutcome::Rejected(_)));
        assert_eq!(f.signer.calls(), 1);
        assert_eq!(f.relay.calls(), 0);
        assert_eq!(f.sequence.current(), 5);

        let stats = f.manager.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.outstanding, 0);

        let history = f.manager.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sequence, Some(5));
    }
}
