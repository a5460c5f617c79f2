use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::flashbots::{RelayClient, RelayPackage};
use crate::types::{RelayOutcome, Slot};

/// 정해진 결과를 순환해서 돌려주는 릴레이
pub struct MockRelayClient {
    outcomes: Vec<RelayOutcome>,
    latency: Duration,
    calls: AtomicUsize,
    submissions: Mutex<Vec<(RelayPackage, Slot)>>,
}

impl MockRelayClient {
    pub fn new(outcome: RelayOutcome) -> Self {
        Self::cycling(vec![outcome])
    }

    pub fn cycling(outcomes: Vec<RelayOutcome>) -> Self {
        Self {
            outcomes,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn submissions(&self) -> Vec<(RelayPackage, Slot)> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl RelayClient for MockRelayClient {
    async fn submit(&self, package: &RelayPackage, target_slot: Slot) -> Result<RelayOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.submissions.lock().await.push((package.clone(), target_slot));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.outcomes.is_empty() {
            return Err(anyhow!("mock relay has no scripted outcome"));
        }
        let outcome = self.outcomes[call % self.outcomes.len()].clone();
        info!("🎭 [MOCK] 패키지 {} 슬롯 {} -> {:?}", package.id, target_slot, outcome);
        Ok(outcome)
    }
}
