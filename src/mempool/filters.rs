use std::collections::{HashSet, VecDeque};

use alloy::primitives::{B256, U256};

use crate::types::Event;

/// 이벤트 수용 조건
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    /// 최소 우선순위 수수료 힌트 (wei)
    pub min_fee_hint: U256,
    /// calldata가 최소 4바이트 (함수 셀렉터) 있어야 하는지
    pub require_calldata: bool,
}

impl AdmissionFilter {
    pub fn admits(&self, event: &Event) -> bool {
        if event.fee_hint < self.min_fee_hint {
            return false;
        }
        if self.require_calldata && event.payload.input.len() < 4 {
            return false;
        }
        // 컨트랙트 생성 트랜잭션은 대상이 아님
        event.payload.to.is_some()
    }
}

/// 최근에 본 이벤트 id 캐시 (FIFO로 오래된 것부터 밀어냄)
#[derive(Debug)]
pub struct SeenCache {
    capacity: usize,
    order: VecDeque<B256>,
    ids: HashSet<B256>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &B256) -> bool {
        self.ids.contains(id)
    }

    /// 처음 보는 id면 true
    pub fn insert(&mut self, id: B256) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventPayload;
    use alloy::primitives::{Address, Bytes};
    use chrono::Utc;

    fn event(fee_hint: u64, input: Vec<u8>, to: Option<Address>) -> Event {
        Event {
            id: B256::ZERO,
            payload: EventPayload {
                from: Address::ZERO,
                to,
                value: U256::ZERO,
                input: Bytes::from(input),
                nonce: 0,
                gas_limit: 100_000,
                raw: None,
            },
            fee_hint: U256::from(fee_hint),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn filter_checks_fee_calldata_and_target() {
        let filter = AdmissionFilter {
            min_fee_hint: U256::from(10u64),
            require_calldata: true,
        };
        let to = Some(Address::repeat_byte(7));

        assert!(filter.admits(&event(10, vec![1, 2, 3, 4], to)));
        assert!(!filter.admits(&event(9, vec![1, 2, 3, 4], to)));
        assert!(!filter.admits(&event(10, vec![1, 2, 3], to)));
        assert!(!filter.admits(&event(10, vec![1, 2, 3, 4], None)));

        let lenient = AdmissionFilter {
            min_fee_hint: U256::ZERO,
            require_calldata: false,
        };
        assert!(lenient.admits(&event(0, vec![], to)));
    }

    #[test]
    fn seen_cache_dedups_and_evicts_oldest() {
        let mut cache = SeenCache::new(2);
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        let c = B256::repeat_byte(3);

        assert!(cache.insert(a));
        assert!(!cache.insert(a));
        assert!(cache.insert(b));
        assert!(cache.insert(c));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&a));
        assert!(cache.contains(&c));
        // a가 밀려났으므로 다시 새 것으로 취급
        assert!(cache.insert(a));
        assert!(!cache.insert(c));
    }
}
