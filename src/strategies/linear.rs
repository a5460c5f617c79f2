use alloy::primitives::U256;

use crate::strategies::StrategyEvaluator;
use crate::types::{Event, StrategyDescriptor, StrategyFault};

/// 관측 트랜잭션 value의 일정 비율 + 고정 보너스를 총가치로 보는 평가기
///
/// `gross = value * value_share_bps / 10_000 + flat_bonus_wei`
///
/// 셀렉터가 지정된 전략은 calldata 셀렉터가 일치할 때만 적용된다.
#[derive(Debug, Default, Clone)]
pub struct LinearValueEvaluator;

impl LinearValueEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl StrategyEvaluator for LinearValueEvaluator {
    fn name(&self) -> &str {
        "linear-value"
    }

    fn gross_value(&self, strategy: &StrategyDescriptor, event: &Event) -> Result<Option<i128>, StrategyFault> {
        if let Some(selector) = &strategy.params.selector {
            if selector.len() != 4 {
                return Err(StrategyFault::InvalidParams {
                    id: strategy.id,
                    reason: format!("selector must be 4 bytes, got {}", selector.len()),
                });
            }
            match event.selector() {
                Some(actual) if actual.as_slice() == selector.as_ref() => {}
                _ => return Ok(None),
            }
        }

        let share = event
            .payload
            .value
            .checked_mul(U256::from(strategy.params.value_share_bps))
            .ok_or(StrategyFault::Overflow(strategy.id))?
            / U256::from(10_000u64);

        let gross = share
            .checked_add(U256::from(strategy.params.flat_bonus_wei))
            .ok_or(StrategyFault::Overflow(strategy.id))?;

        let gross = u128::try_from(gross)
            .ok()
            .and_then(|v| i128::try_from(v).ok())
            .ok_or(StrategyFault::Overflow(strategy.id))?;

        Ok(Some(gross))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPayload, StrategyParams};
    use alloy::primitives::{Address, Bytes, B256};
    use chrono::Utc;

    fn event(value: u128, input: Vec<u8>) -> Event {
        Event {
            id: B256::repeat_byte(1),
            payload: EventPayload {
                from: Address::ZERO,
                to: Some(Address::repeat_byte(2)),
                value: U256::from(value),
                input: Bytes::from(input),
                nonce: 0,
                gas_limit: 200_000,
                raw: None,
            },
            fee_hint: U256::ZERO,
            observed_at: Utc::now(),
        }
    }

    fn strategy(bps: u32, bonus: u64, selector: Option<Vec<u8>>) -> StrategyDescriptor {
        StrategyDescriptor {
            id: 3,
            token_pair: "WETH/USDC".into(),
            call_data: Bytes::new(),
            params: StrategyParams {
                value_share_bps: bps,
                flat_bonus_wei: bonus,
                selector: selector.map(Bytes::from),
            },
        }
    }

    #[test]
    fn computes_share_plus_bonus() {
        let evaluator = LinearValueEvaluator::new();
        let gross = evaluator
            .gross_value(&strategy(250, 7, None), &event(1_000_000, vec![0, 0, 0, 0]))
            .unwrap();
        assert_eq!(gross, Some(25_007));
    }

    #[test]
    fn selector_gates_applicability() {
        let evaluator = LinearValueEvaluator::new();
        let s = strategy(100, 0, Some(vec![0x38, 0xed, 0x17, 0x39]));

        assert_eq!(
            evaluator.gross_value(&s, &event(10_000, vec![0x38, 0xed, 0x17, 0x39, 0xff])).unwrap(),
            Some(100)
        );
        assert_eq!(evaluator.gross_value(&s, &event(10_000, vec![0xa9, 0x05, 0x9c, 0xbb])).unwrap(), None);
        assert_eq!(evaluator.gross_value(&s, &event(10_000, vec![])).unwrap(), None);
    }

    #[test]
    fn malformed_selector_is_a_fault() {
        let evaluator = LinearValueEvaluator::new();
        let s = strategy(100, 0, Some(vec![0x38]));
        assert!(matches!(
            evaluator.gross_value(&s, &event(1, vec![0x38, 0, 0, 0])),
            Err(StrategyFault::InvalidParams { id: 3, .. })
        ));
    }

    #[test]
    fn overflow_is_a_fault() {
        let evaluator = LinearValueEvaluator::new();
        let mut e = event(0, vec![]);
        e.payload.value = U256::MAX;
        assert_eq!(
            evaluator.gross_value(&strategy(10_000, 0, None), &e),
            Err(StrategyFault::Overflow(3))
        );
    }
}
