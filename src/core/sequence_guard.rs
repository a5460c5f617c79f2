use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::Address;
use tracing::{debug, info, warn};

use crate::mempool::ChainStateProvider;
use crate::types::{EngineError, EngineResult};

/// 서명 계정의 다음 시퀀스 번호 (nonce) 를 관리한다.
///
/// 락 없이 `fetch_add`로 번호를 발급하므로 동시에 호출해도 같은 번호가
/// 두 번 나가지 않는다. 체인에 반영되지 않은 예약은 마지막 발급분일 때만
/// 되돌릴 수 있다.
pub struct SequenceGuard {
    account: Address,
    next: AtomicU64,
}

/// 발급된 시퀀스 번호. 확정하거나 반납해야 한다.
#[must_use = "a reservation must be confirmed or released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    number: u64,
}

impl Reservation {
    pub fn number(&self) -> u64 {
        self.number
    }
}

/// `release` 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseResult {
    /// 번호가 소비되었으므로 그대로 유지
    Consumed,
    /// 카운터를 되돌림
    RolledBack,
    /// 이후에 다른 번호가 발급되어 되돌리지 못함
    RollbackRefused,
}

impl SequenceGuard {
    pub fn new(account: Address, initial: u64) -> Self {
        Self {
            account,
            next: AtomicU64::new(initial),
        }
    }

    /// 기동 시 한 번 체인에서 실제 시퀀스 값을 읽어온다
    pub async fn initialize(provider: &dyn ChainStateProvider, account: Address) -> EngineResult<Self> {
        let count = provider
            .sequence_count(account)
            .await
            .map_err(|e| EngineError::Upstream(format!("sequence count for {}: {}", account, e)))?;
        info!("🔢 시퀀스 초기화: {} -> {}", account, count);
        Ok(Self::new(account, count))
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// 다음에 발급될 번호 (조회만 하고 발급하지 않음)
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn reserve(&self) -> Reservation {
        let number = self.next.fetch_add(1, Ordering::SeqCst);
        debug!("🔢 시퀀스 예약: {}", number);
        Reservation { number }
    }

    /// `consumed`가 false면 (제출 실패, 미포함) 되돌리기를 시도한다
    pub fn release(&self, reservation: Reservation, consumed: bool) -> ReleaseResult {
        if consumed {
            return ReleaseResult::Consumed;
        }

        let number = reservation.number;
        match self
            .next
            .compare_exchange(number + 1, number, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                debug!("↩️ 시퀀스 {} 반납", number);
                ReleaseResult::RolledBack
            }
            Err(observed) => {
                warn!(
                    "⚠️ 시퀀스 {} 반납 거부: 이후 예약 존재 (next={})",
                    number, observed
                );
                ReleaseResult::RollbackRefused
            }
        }
    }
}

impl std::fmt::Debug for SequenceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceGuard")
            .field("account", &self.account)
            .field("next", &self.current())
            .finish()
    }
}
