use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::GWEI;
use crate::mempool::ProviderNotification;
use crate::types::{Event, EventPayload};
use crate::utils::keccak256;

/// 블록당 합성 트랜잭션 수
const EVENTS_PER_SLOT: u64 = 12;

const SWAP_SELECTORS: [[u8; 4]; 3] = [
    [0x38, 0xed, 0x17, 0x39],
    [0x7f, 0xf3, 0x6a, 0xb5],
    [0x18, 0xcb, 0xaf, 0xe5],
];

/// 순번으로 결정되는 합성 펜딩 트랜잭션
pub fn synthetic_event(sequence: u64) -> Event {
    let id = keccak256(&sequence.to_be_bytes());
    let selector = SWAP_SELECTORS[(sequence % SWAP_SELECTORS.len() as u64) as usize];
    let mut input = selector.to_vec();
    input.extend_from_slice(&[0u8; 28]);
    input.extend_from_slice(&(sequence as u32).to_be_bytes());

    // 0.05 ~ 5 ETH
    let value_milli_eth = 50 + (u64::from_be_bytes([id[0], id[1], id[2], id[3], id[4], id[5], id[6], id[7]]) % 4_950);
    let value = U256::from(value_milli_eth) * U256::from(1_000_000_000_000_000u64);

    let mut raw = vec![0x02];
    raw.extend_from_slice(id.as_slice());

    Event {
        id,
        payload: EventPayload {
            from: Address::from_slice(&id[12..]),
            to: Some(Address::repeat_byte(0x7a)),
            value,
            input: Bytes::from(input),
            nonce: sequence,
            gas_limit: 250_000,
            raw: Some(Bytes::from(raw)),
        },
        fee_hint: U256::from(1 + sequence % 5) * U256::from(GWEI),
        observed_at: Utc::now(),
    }
}

pub(crate) fn spawn_synthetic_mempool(
    interval: Duration,
    events: Arc<Mutex<HashMap<B256, Event>>>,
    slot: Arc<AtomicU64>,
    tx: mpsc::Sender<ProviderNotification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut sequence = 0u64;
        loop {
            ticker.tick().await;
            let event = synthetic_event(sequence);
            let id = event.id;
            events.lock().await.insert(id, event);

            if tx.send(ProviderNotification::Pending(id)).await.is_err() {
                debug!("🎭 [MOCK] 합성 멤풀 종료");
                return;
            }

            sequence += 1;
            if sequence % EVENTS_PER_SLOT == 0 {
                slot.fetch_add(1, Ordering::SeqCst);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_events_are_deterministic() {
        assert_eq!(synthetic_event(3).id, synthetic_event(3).id);
        assert_ne!(synthetic_event(3).id, synthetic_event(4).id);
        let event = synthetic_event(7);
        assert!(event.selector().is_some());
        assert!(event.payload.value >= U256::from(50_000_000_000_000_000u64));
    }
}
