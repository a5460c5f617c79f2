use std::collections::{HashMap, HashSet};

use alloy::primitives::B256;
use dashmap::DashMap;

use crate::strategies::StrategyEvaluator;
use crate::types::{Event, StrategyDescriptor, StrategyFault};

/// 전략 id별로 총가치를 고정해 둔 평가기. 이벤트별 호출 횟수를 센다.
#[derive(Default)]
pub struct MockEvaluator {
    values: HashMap<u32, i128>,
    faulty: HashSet<u32>,
    panicking: HashSet<u32>,
    calls: DashMap<B256, usize>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 전략 id `0..values.len()`에 순서대로 값을 매긴다
    pub fn with_values(values: &[i128]) -> Self {
        Self {
            values: values.iter().enumerate().map(|(i, v)| (i as u32, *v)).collect(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, id: u32, value: i128) -> Self {
        self.values.insert(id, value);
        self
    }

    pub fn with_fault(mut self, id: u32) -> Self {
        self.faulty.insert(id);
        self
    }

    pub fn with_panic(mut self, id: u32) -> Self {
        self.panicking.insert(id);
        self
    }

    /// 해당 이벤트에 대한 전략 평가 호출 횟수
    pub fn calls_for(&self, event: &B256) -> usize {
        self.calls.get(event).map(|c| *c).unwrap_or(0)
    }
}

impl StrategyEvaluator for MockEvaluator {
    fn name(&self) -> &str {
        "mock"
    }

    fn gross_value(&self, strategy: &StrategyDescriptor, event: &Event) -> Result<Option<i128>, StrategyFault> {
        *self.calls.entry(event.id).or_insert(0) += 1;

        if self.panicking.contains(&strategy.id) {
            panic!("mock strategy {} exploded", strategy.id);
        }
        if self.faulty.contains(&strategy.id) {
            return Err(StrategyFault::Overflow(strategy.id));
        }
        Ok(self.values.get(&strategy.id).copied())
    }
}
