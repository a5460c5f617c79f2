use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::mempool::{ChainStateProvider, ProviderNotification};
use crate::types::{Event, Slot};

use super::mempool_mock::spawn_synthetic_mempool;

/// 스크립트로 동작하는 체인 provider
///
/// `subscribe` 호출마다 등록된 스크립트를 하나씩 꺼내 보낸다. 스크립트가
/// `Error`/`Closed`로 끝나면 채널을 닫고, 아니면 `unsubscribe_all`까지
/// 열어 둔다. 스크립트가 떨어지면 `Opened`만 보내고 열어 두며, 합성 멤풀이
/// 설정되어 있으면 그것을 붙인다.
pub struct MockChainProvider {
    scripts: Mutex<VecDeque<Vec<ProviderNotification>>>,
    events: Arc<Mutex<HashMap<B256, Event>>>,
    slot: Arc<AtomicU64>,
    sequence_count: AtomicU64,
    synthetic_interval: Option<Duration>,
    lookup_delay: Option<Duration>,
    failing_lookups: AtomicUsize,
    lookup_calls: AtomicUsize,
    open_senders: Mutex<Vec<mpsc::Sender<ProviderNotification>>>,
    generator: Mutex<Option<JoinHandle<()>>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    active_listeners: AtomicUsize,
    max_active_listeners: AtomicUsize,
}

impl Default for MockChainProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            events: Arc::new(Mutex::new(HashMap::new())),
            slot: Arc::new(AtomicU64::new(0)),
            sequence_count: AtomicU64::new(0),
            synthetic_interval: None,
            lookup_delay: None,
            failing_lookups: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            open_senders: Mutex::new(Vec::new()),
            generator: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            active_listeners: AtomicUsize::new(0),
            max_active_listeners: AtomicUsize::new(0),
        }
    }

    pub fn with_script(mut self, script: Vec<ProviderNotification>) -> Self {
        self.scripts.get_mut().push_back(script);
        self
    }

    /// 빌드 단계에서는 아무도 잠금을 쥐고 있지 않다
    pub fn with_event(self, event: Event) -> Self {
        if let Ok(mut events) = self.events.try_lock() {
            events.insert(event.id, event);
        }
        self
    }

    /// `event_details` 응답을 늦춘다
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    /// 처음 `count`번의 `event_details` 호출을 실패시킨다
    pub fn with_failing_lookups(self, count: usize) -> Self {
        self.failing_lookups.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_slot(self, slot: Slot) -> Self {
        self.slot.store(slot, Ordering::SeqCst);
        self
    }

    pub fn with_sequence_count(self, count: u64) -> Self {
        self.sequence_count.store(count, Ordering::SeqCst);
        self
    }

    /// 스크립트가 없을 때 합성 펜딩 트랜잭션을 주기적으로 흘린다
    pub fn with_synthetic_mempool(mut self, interval: Duration) -> Self {
        self.synthetic_interval = Some(interval);
        self
    }

    pub fn set_slot(&self, slot: Slot) {
        self.slot.store(slot, Ordering::SeqCst);
    }

    pub async fn insert_event(&self, event: Event) {
        self.events.lock().await.insert(event.id, event);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn active_listeners(&self) -> usize {
        self.active_listeners.load(Ordering::SeqCst)
    }

    /// 동시에 등록되어 있던 리스너 수의 최대값
    pub fn max_active_listeners(&self) -> usize {
        self.max_active_listeners.load(Ordering::SeqCst)
    }
}

fn is_terminal(notification: &ProviderNotification) -> bool {
    matches!(
        notification,
        ProviderNotification::Error(_) | ProviderNotification::Closed { .. }
    )
}

#[async_trait]
impl ChainStateProvider for MockChainProvider {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ProviderNotification>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_listeners.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_listeners.fetch_max(active, Ordering::SeqCst);

        let script = self.scripts.lock().await.pop_front();
        let scripted = script.is_some();
        let script = script.unwrap_or_else(|| vec![ProviderNotification::Opened]);

        let (tx, rx) = mpsc::channel(script.len().max(64));
        let terminal = script.last().map_or(false, is_terminal);
        for notification in script {
            let _ = tx.try_send(notification);
        }

        if !terminal {
            if !scripted {
                if let Some(interval) = self.synthetic_interval {
                    let handle = spawn_synthetic_mempool(
                        interval,
                        Arc::clone(&self.events),
                        Arc::clone(&self.slot),
                        tx.clone(),
                    );
                    if let Some(previous) = self.generator.lock().await.replace(handle) {
                        previous.abort();
                    }
                }
            }
            self.open_senders.lock().await.push(tx);
        }

        debug!("🎭 [MOCK] subscribe #{}", self.subscribe_calls());
        Ok(rx)
    }

    async fn unsubscribe_all(&self) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.active_listeners.store(0, Ordering::SeqCst);
        self.open_senders.lock().await.clear();
        if let Some(handle) = self.generator.lock().await.take() {
            handle.abort();
        }
    }

    async fn event_details(&self, id: B256) -> Result<Option<Event>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("mock lookup failure for {}", id));
        }
        Ok(self.events.lock().await.get(&id).cloned())
    }

    async fn current_slot(&self) -> Result<Slot> {
        Ok(self.slot.load(Ordering::SeqCst))
    }

    async fn sequence_count(&self, _account: Address) -> Result<u64> {
        Ok(self.sequence_count.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_script_closes_channel() {
        let provider = MockChainProvider::new().with_script(vec![
            ProviderNotification::Opened,
            ProviderNotification::Closed {
                code: 1006,
                reason: "gone".into(),
            },
        ]);

        let mut rx = provider.subscribe().await.unwrap();
        assert_eq!(rx.recv().await, Some(ProviderNotification::Opened));
        assert!(matches!(rx.recv().await, Some(ProviderNotification::Closed { .. })));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn unsubscribe_closes_open_channels() {
        let provider = MockChainProvider::new();
        let mut rx = provider.subscribe().await.unwrap();
        assert_eq!(rx.recv().await, Some(ProviderNotification::Opened));
        assert_eq!(provider.active_listeners(), 1);

        provider.unsubscribe_all().await;
        assert_eq!(rx.recv().await, None);
        assert_eq!(provider.active_listeners(), 0);
    }

    #[tokio::test]
    async fn builder_events_are_returned_by_lookup() {
        let event = crate::mocks::synthetic_event(3);
        let provider = MockChainProvider::new().with_event(event.clone()).with_failing_lookups(1);

        assert!(provider.event_details(event.id).await.is_err());
        assert_eq!(provider.event_details(event.id).await.unwrap(), Some(event));
        assert_eq!(provider.event_details(B256::ZERO).await.unwrap(), None);
        assert_eq!(provider.lookup_calls(), 3);
    }
}
