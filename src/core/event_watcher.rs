use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::Dispatcher;
use crate::mempool::{AdmissionFilter, ChainStateProvider, ProviderNotification, SeenCache};
use crate::types::{EngineError, EngineResult};

/// 연결 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// 끊긴 뒤 재연결까지 고정 대기 시간
    pub reconnect_delay: Duration,
    /// 태스크 마감 = 수신 시각 + 슬롯 예산
    pub slot_budget: Duration,
    pub admission: AdmissionFilter,
    pub seen_cache_size: usize,
    /// 동시에 조회 중일 수 있는 이벤트 수. 넘치면 버린다.
    pub max_in_flight: usize,
}

/// 수신 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
    pub state: WatcherState,
    pub received: u64,
    pub admitted: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    admitted: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
}

/// 업스트림 펜딩 트랜잭션을 받아 Dispatcher로 넘기는 감시자
///
/// 연결이 끊기면 고정 지연 후 다시 구독하며, 새 구독 전에 항상 기존
/// 리스너를 해제하므로 리스너가 중복 등록되지 않는다.
pub struct EventWatcher {
    provider: Arc<dyn ChainStateProvider>,
    dispatcher: Arc<Dispatcher>,
    settings: WatcherSettings,
    state_tx: watch::Sender<WatcherState>,
    counters: Counters,
    seen: Mutex<SeenCache>,
    ingest_permits: Arc<Semaphore>,
    running: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl EventWatcher {
    pub fn new(provider: Arc<dyn ChainStateProvider>, dispatcher: Arc<Dispatcher>, settings: WatcherSettings) -> Arc<Self> {
        let (state_tx, _) = watch::channel(WatcherState::Disconnected);
        let seen = SeenCache::new(settings.seen_cache_size);
        let ingest_permits = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Arc::new(Self {
            provider,
            dispatcher,
            settings,
            state_tx,
            counters: Counters::default(),
            seen: Mutex::new(seen),
            ingest_permits,
            running: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// 수신 루프를 시작한다. 이미 실행 중이면 아무 것도 하지 않는다.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self.state() == WatcherState::Stopped {
            return Err(EngineError::Watcher("watcher already stopped".to_string()));
        }

        let mut running = self.running.lock().await;
        if running.as_ref().map_or(false, |handle| !handle.is_finished()) {
            debug!("EventWatcher 이미 실행 중");
            return Ok(());
        }

        info!("🚀 EventWatcher 시작");
        *running = Some(tokio::spawn(Arc::clone(self).run()));
        Ok(())
    }

    /// 수신을 멈추고 리스너를 해제한다. 이후 재시작할 수 없다.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.running.lock().await.take() {
            let _ = handle.await;
        }
        self.provider.unsubscribe_all().await;
        self.state_tx.send_replace(WatcherState::Stopped);
        info!("🛑 EventWatcher 중지");
    }

    pub fn state(&self) -> WatcherState {
        *self.state_tx.borrow()
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            state: self.state(),
            received: self.counters.received.load(Ordering::Relaxed),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: WatcherState) {
        self.state_tx.send_if_modified(|current| {
            if *current == WatcherState::Stopped || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(WatcherState::Connecting);
            // 이전 리스너를 먼저 정리해야 중복 수신이 없다
            self.provider.unsubscribe_all().await;

            match self.provider.subscribe().await {
                Ok(notifications) => self.pump(notifications).await,
                Err(e) => warn!("❌ 구독 실패: {}", e),
            }

            if self.cancel.is_cancelled() {
                break;
            }

            self.provider.unsubscribe_all().await;
            self.set_state(WatcherState::Disconnected);
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            info!("🔄 {:?} 후 재연결 시도", self.settings.reconnect_delay);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
        debug!("EventWatcher 루프 종료");
    }

    /// 구독이 끊길 때까지 알림을 처리한다.
    /// 반환하면서 `ingest` 세트가 드롭되어 진행 중인 조회도 함께 중단된다.
    async fn pump(self: &Arc<Self>, mut notifications: mpsc::Receiver<ProviderNotification>) {
        let mut ingest = JoinSet::new();
        loop {
            let notification = tokio::select! {
                _ = self.cancel.cancelled() => return,
                Some(_) = ingest.join_next(), if !ingest.is_empty() => continue,
                notification = notifications.recv() => notification,
            };

            match notification {
                Some(ProviderNotification::Opened) => {
                    self.set_state(WatcherState::Connected);
                    info!("✅ 업스트림 연결됨");
                }
                Some(ProviderNotification::Pending(id)) => {
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    match Arc::clone(&self.ingest_permits).try_acquire_owned() {
                        Ok(permit) => {
                            let watcher = Arc::clone(self);
                            ingest.spawn(async move {
                                watcher.ingest(id).await;
                                drop(permit);
                            });
                        }
                        Err(_) => {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            debug!("🚫 조회 한도 초과, 이벤트 {} 버림", id);
                        }
                    }
                }
                Some(ProviderNotification::Error(detail)) => {
                    warn!("❌ 업스트림 오류: {}", detail);
                    return;
                }
                Some(ProviderNotification::Closed { code, reason }) => {
                    warn!("🔌 업스트림 연결 종료 ({}): {}", code, reason);
                    return;
                }
                None => {
                    warn!("🔌 구독 스트림 종료");
                    return;
                }
            }
        }
    }

    /// 이벤트 하나를 조회, 필터링하고 태스크로 제출한다
    async fn ingest(self: Arc<Self>, id: B256) {
        if self.seen.lock().await.contains(&id) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = match self.provider.event_details(id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("이벤트 {} 조회 결과 없음", id);
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                debug!("이벤트 {} 조회 실패: {}", id, e);
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // 조회에 성공한 뒤에만 기록해야 일시적 실패 후 다시 받을 수 있다
        if !self.seen.lock().await.insert(id) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if !self.settings.admission.admits(&event) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let current_slot = match self.provider.current_slot().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!("⚠️ 현재 슬롯 조회 실패, 이벤트 {} 버림: {}", id, e);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let target_slot = current_slot + 1;
        let deadline = Instant::now() + self.settings.slot_budget;
        match self.dispatcher.submit(Arc::new(event), target_slot, deadline).await {
            Ok(pending) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                debug!("📥 이벤트 {} -> 태스크 {} (슬롯 {})", id, pending.task_id, target_slot);
            }
            Err(EngineError::QueueFull { queued, capacity }) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("🚫 대기열 포화 ({}/{}), 이벤트 {} 버림", queued, capacity, id);
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("❌ 이벤트 {} 제출 실패: {}", id, e);
            }
        }
    }
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher").field("stats", &self.stats()).finish()
    }
}
