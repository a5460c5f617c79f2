use crate::types::{Event, StrategyDescriptor, StrategyFault};

/// Evaluator that computes a strategy's gross value for one event
///
/// 평가는 동기 연산이다. 워커는 풀 전체를 한 번에 훑으므로 호출마다
/// 외부 I/O를 하지 않아야 한다.
pub trait StrategyEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// 총가치 (wei). `Ok(None)`이면 이 이벤트에 적용되지 않는 전략
    fn gross_value(&self, strategy: &StrategyDescriptor, event: &Event) -> Result<Option<i128>, StrategyFault>;
}
