use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::blockchain::Signer;
use crate::types::{EngineError, EngineResult, FeePair, UnsignedAction};

/// 결정적 바이트를 돌려주는 서명기
///
/// 게이트가 있으면 허가가 생길 때까지 서명을 붙잡아 둔다.
pub struct MockSigner {
    address: Address,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    panic_next: AtomicBool,
    fail_all: bool,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0x5e),
            calls: AtomicUsize::new(0),
            gate: None,
            panic_next: AtomicBool::new(false),
            fail_all: false,
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    /// 다음 한 번의 서명에서 패닉
    pub fn panicking_once() -> Self {
        let signer = Self::new();
        signer.panic_next.store(true, Ordering::SeqCst);
        signer
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 서명 결과 바이트 규칙: 0x02 ‖ sequence(be) ‖ data
    pub fn encode(action: &UnsignedAction, sequence: u64) -> Bytes {
        let mut raw = vec![0x02];
        raw.extend_from_slice(&sequence.to_be_bytes());
        raw.extend_from_slice(&action.data);
        Bytes::from(raw)
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, action: &UnsignedAction, sequence: u64, _fees: &FeePair) -> EngineResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("mock signer crashed");
        }
        if self.fail_all {
            return Err(EngineError::Signing("mock signer refuses".to_string()));
        }
        if let Some(gate) = &self.gate {
            // 허가를 받은 뒤 바로 돌려놓아 다음 대기자가 지나가게 한다
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| EngineError::Signing(e.to_string()))?;
        }

        Ok(Self::encode(action, sequence))
    }
}
