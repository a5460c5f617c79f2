use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::ORPHAN_SWEEP_INTERVAL_MS;
use crate::core::EvaluationWorker;
use crate::types::{
    DispatcherStats, EngineError, EngineResult, Event, SignedAction, Slot, Task, TaskId, WorkerId, WorkerState,
};

/// Dispatcher 설정
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub workers: usize,
    /// 대기열 상한. 넘으면 새 태스크를 거절한다.
    pub max_queue: usize,
    /// 마감 후 이 시간이 지나도 끝나지 않은 태스크는 결과 없음으로 정리
    pub orphan_grace: Duration,
}

/// 제출한 태스크의 결과 수신기
#[derive(Debug)]
pub struct PendingResult {
    pub task_id: TaskId,
    rx: oneshot::Receiver<Option<SignedAction>>,
}

impl PendingResult {
    /// 태스크가 끝나면 한 번 해결된다. 거절/만료/크래시는 `None`.
    pub async fn wait(self) -> Option<SignedAction> {
        self.rx.await.ok().flatten()
    }
}

enum Command {
    Submit {
        task: Task,
        reply: oneshot::Sender<Option<SignedAction>>,
        accepted: oneshot::Sender<EngineResult<()>>,
    },
}

enum WorkerEvent {
    Ready {
        worker: WorkerId,
    },
    Completed {
        worker: WorkerId,
        task_id: TaskId,
        outcome: Option<SignedAction>,
    },
    Exited {
        worker: WorkerId,
        abnormal: bool,
    },
}

struct WorkerHandle {
    state: WorkerState,
    inbox: mpsc::Sender<Task>,
    current: Option<TaskId>,
    abort: AbortHandle,
}

struct Queued {
    task: Task,
    reply: oneshot::Sender<Option<SignedAction>>,
}

struct InFlight {
    worker: WorkerId,
    deadline: Instant,
    reply: oneshot::Sender<Option<SignedAction>>,
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    rejected_full: u64,
    stale_discarded: u64,
    orphans_evicted: u64,
    winners: u64,
    worker_restarts: u64,
}

/// 워커 풀과 대기열의 단일 소유자 (액터)
///
/// 모든 상태 변경은 액터 태스크 안에서만 일어나므로, 한 태스크가 두
/// 워커에 배정되거나 유휴 워커가 동시에 두 번 선택되는 일이 없다.
struct PoolActor {
    settings: DispatcherSettings,
    template: EvaluationWorker,
    workers: HashMap<WorkerId, WorkerHandle>,
    idle: VecDeque<WorkerId>,
    queue: VecDeque<Queued>,
    in_flight: HashMap<TaskId, InFlight>,
    next_worker_id: WorkerId,
    counters: Counters,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    winners: Option<mpsc::Sender<SignedAction>>,
    stats_tx: watch::Sender<DispatcherStats>,
    shutting_down: bool,
}

/// 태스크를 유휴 워커에 배정하고 결과를 호출자에게 돌려주는 디스패처
pub struct Dispatcher {
    commands: mpsc::UnboundedSender<Command>,
    stats_rx: watch::Receiver<DispatcherStats>,
    next_task_id: AtomicU64,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// 워커를 띄우고 액터를 시작한다. 승자는 `winners`로도 전달된다.
    pub fn start(
        settings: DispatcherSettings,
        template: EvaluationWorker,
        winners: Option<mpsc::Sender<SignedAction>>,
    ) -> Arc<Self> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(DispatcherStats::default());
        let cancel = CancellationToken::new();

        info!("🚀 Dispatcher 시작: 워커 {}개, 대기열 상한 {}", settings.workers, settings.max_queue);

        let mut actor = PoolActor {
            settings,
            template,
            workers: HashMap::new(),
            idle: VecDeque::new(),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            next_worker_id: 0,
            counters: Counters::default(),
            events_tx,
            winners,
            stats_tx,
            shutting_down: false,
        };
        for _ in 0..actor.settings.workers {
            actor.spawn_worker();
        }
        actor.publish_stats();

        tokio::spawn(actor.run(commands_rx, events_rx, cancel.clone()));

        Arc::new(Self {
            commands: commands_tx,
            stats_rx,
            next_task_id: AtomicU64::new(1),
            cancel,
        })
    }

    /// 이벤트 하나를 태스크로 만들어 대기열에 넣는다.
    ///
    /// 대기열이 상한에 도달했으면 `QueueFull`로 거절한다.
    pub async fn submit(&self, event: Arc<Event>, target_slot: Slot, deadline: Instant) -> EngineResult<PendingResult> {
        let task = Task {
            id: self.next_task_id.fetch_add(1, Ordering::SeqCst),
            event,
            target_slot,
            deadline,
        };
        let task_id = task.id;
        let (reply, rx) = oneshot::channel();
        let (accepted_tx, accepted_rx) = oneshot::channel();

        self.commands
            .send(Command::Submit {
                task,
                reply,
                accepted: accepted_tx,
            })
            .map_err(|_| EngineError::DispatcherClosed)?;

        accepted_rx.await.map_err(|_| EngineError::DispatcherClosed)??;
        Ok(PendingResult { task_id, rx })
    }

    /// 부수 효과 없는 통계 스냅샷
    pub fn stats(&self) -> DispatcherStats {
        self.stats_rx.borrow().clone()
    }

    /// 워커를 모두 내리고 남은 태스크를 결과 없음으로 정리한다
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("stats", &self.stats()).finish()
    }
}

async fn run_worker(
    worker: EvaluationWorker,
    mut inbox: mpsc::Receiver<Task>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let id = worker.id();
    if events.send(WorkerEvent::Ready { worker: id }).is_err() {
        return;
    }

    while let Some(task) = inbox.recv().await {
        let outcome = match worker.evaluate(&task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("❌ 워커 {} 태스크 {} 실패: {}", id, task.id, e);
                None
            }
        };
        let completed = WorkerEvent::Completed {
            worker: id,
            task_id: task.id,
            outcome,
        };
        if events.send(completed).is_err() {
            return;
        }
    }
    debug!("워커 {} 종료", id);
}

impl PoolActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        cancel: CancellationToken,
    ) {
        let mut sweep = tokio::time::interval(Duration::from_millis(ORPHAN_SWEEP_INTERVAL_MS));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_worker_event(event),
                _ = sweep.tick() => self.evict_orphans(),
            }
            self.publish_stats();
        }

        self.shutdown();
        self.publish_stats();
    }

    fn spawn_worker(&mut self) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let (inbox_tx, inbox_rx) = mpsc::channel(1);
        let worker = self.template.with_id(id);
        let handle = tokio::spawn(run_worker(worker, inbox_rx, self.events_tx.clone()));
        let abort = handle.abort_handle();

        // 감독 태스크: 워커가 어떤 식으로든 끝나면 액터에 알린다
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let abnormal = match handle.await {
                Ok(()) => false,
                Err(e) => e.is_panic() || e.is_cancelled(),
            };
            let _ = events.send(WorkerEvent::Exited { worker: id, abnormal });
        });

        self.workers.insert(
            id,
            WorkerHandle {
                state: WorkerState::Starting,
                inbox: inbox_tx,
                current: None,
                abort,
            },
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { task, reply, accepted } => {
                if self.queue.len() >= self.settings.max_queue {
                    self.counters.rejected_full += 1;
                    debug!("🚫 대기열 포화: 태스크 {} 거절", task.id);
                    let _ = accepted.send(Err(EngineError::QueueFull {
                        queued: self.queue.len(),
                        capacity: self.settings.max_queue,
                    }));
                    return;
                }

                self.counters.submitted += 1;
                self.queue.push_back(Queued { task, reply });
                let _ = accepted.send(Ok(()));
                self.drain();
            }
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { worker } => {
                if let Some(handle) = self.workers.get_mut(&worker) {
                    if handle.state == WorkerState::Starting {
                        handle.state = WorkerState::Idle;
                        self.idle.push_back(worker);
                        debug!("✅ 워커 {} 준비 완료", worker);
                    }
                }
                self.drain();
            }
            WorkerEvent::Completed { worker, task_id, outcome } => {
                if let Some(entry) = self.in_flight.remove(&task_id) {
                    let outcome = outcome.filter(|action| {
                        let late = action.task.is_expired(Instant::now());
                        if late {
                            self.counters.stale_discarded += 1;
                            debug!("⏰ 태스크 {} 결과가 마감 이후 도착, 폐기", task_id);
                        }
                        !late
                    });
                    if let Some(action) = &outcome {
                        self.counters.winners += 1;
                        self.forward_winner(action.clone());
                    }
                    let _ = entry.reply.send(outcome);
                } else {
                    debug!("태스크 {} 결과 무시 (이미 정리됨)", task_id);
                }

                if let Some(handle) = self.workers.get_mut(&worker) {
                    if handle.state == WorkerState::Busy {
                        handle.state = WorkerState::Idle;
                        handle.current = None;
                        self.idle.push_back(worker);
                    }
                }
                self.drain();
            }
            WorkerEvent::Exited { worker, abnormal } => {
                let Some(mut handle) = self.workers.remove(&worker) else {
                    return;
                };
                handle.state = WorkerState::Crashed;
                self.idle.retain(|id| *id != worker);

                if let Some(task_id) = handle.current.take() {
                    if let Some(entry) = self.in_flight.remove(&task_id) {
                        let _ = entry.reply.send(None);
                    }
                }

                if self.shutting_down {
                    return;
                }

                if abnormal {
                    error!("💥 워커 {} 비정상 종료, 교체 생성", worker);
                } else {
                    warn!("⚠️ 워커 {} 종료, 교체 생성", worker);
                }
                self.counters.worker_restarts += 1;
                self.spawn_worker();
            }
        }
    }

    fn forward_winner(&self, action: SignedAction) {
        let Some(winners) = &self.winners else {
            return;
        };
        if let Err(e) = winners.try_send(action) {
            warn!("⚠️ 승자 채널 전달 실패: {}", e);
        }
    }

    /// 유휴 워커가 있고 대기열이 비어 있지 않은 동안 배정한다
    fn drain(&mut self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.idle.pop_front() else {
                break;
            };

            let now = Instant::now();
            let mut next = None;
            while let Some(queued) = self.queue.pop_front() {
                if queued.task.is_expired(now) {
                    self.counters.stale_discarded += 1;
                    debug!("⏰ 태스크 {} 마감 경과, 배정 전 폐기", queued.task.id);
                    let _ = queued.reply.send(None);
                    continue;
                }
                next = Some(queued);
                break;
            }

            let Some(queued) = next else {
                self.idle.push_front(worker);
                break;
            };

            let Some(handle) = self.workers.get_mut(&worker) else {
                self.queue.push_front(queued);
                continue;
            };

            let task_id = queued.task.id;
            let deadline = queued.task.deadline;
            match handle.inbox.try_send(queued.task) {
                Ok(()) => {
                    handle.state = WorkerState::Busy;
                    handle.current = Some(task_id);
                    self.in_flight.insert(
                        task_id,
                        InFlight {
                            worker,
                            deadline,
                            reply: queued.reply,
                        },
                    );
                }
                Err(e) => {
                    // 수신 불가한 워커: 종료 통지가 오면 교체된다
                    warn!("⚠️ 워커 {}에 배정 실패, 태스크 {} 재대기", worker, task_id);
                    handle.state = WorkerState::Crashed;
                    self.queue.push_front(Queued {
                        task: e.into_inner(),
                        reply: queued.reply,
                    });
                }
            }
        }
    }

    /// 마감 + 유예 시간이 지난 진행 중 태스크를 정리한다.
    /// 응답하지 않는 워커는 중단시키고, 종료 통지를 받으면 교체한다.
    fn evict_orphans(&mut self) {
        let now = Instant::now();
        let grace = self.settings.orphan_grace;
        let expired: Vec<TaskId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| now >= entry.deadline + grace)
            .map(|(id, _)| *id)
            .collect();

        for task_id in expired {
            if let Some(entry) = self.in_flight.remove(&task_id) {
                self.counters.orphans_evicted += 1;
                warn!("🧹 태스크 {} 고아 정리 (워커 {})", task_id, entry.worker);
                let _ = entry.reply.send(None);

                if let Some(handle) = self.workers.get_mut(&entry.worker) {
                    if handle.current == Some(task_id) {
                        handle.current = None;
                        handle.state = WorkerState::Crashed;
                        handle.abort.abort();
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.shutting_down = true;
        info!("🛑 Dispatcher 종료: 대기 {}개, 진행 {}개 정리", self.queue.len(), self.in_flight.len());

        for queued in self.queue.drain(..) {
            let _ = queued.reply.send(None);
        }
        for (_, entry) in self.in_flight.drain() {
            let _ = entry.reply.send(None);
        }
        for (_, handle) in self.workers.drain() {
            handle.abort.abort();
        }
        self.idle.clear();
    }

    fn publish_stats(&self) {
        let busy = self
            .workers
            .values()
            .filter(|h| h.state == WorkerState::Busy)
            .count();
        let stats = DispatcherStats {
            total_workers: self.workers.len(),
            busy_workers: busy,
            idle_workers: self.idle.len(),
            pending_tasks: self.queue.len(),
            active_tasks: self.in_flight.len(),
            submitted: self.counters.submitted,
            rejected_full: self.counters.rejected_full,
            stale_discarded: self.counters.stale_discarded,
            orphans_evicted: self.counters.orphans_evicted,
            winners: self.counters.winners,
            worker_restarts: self.counters.worker_restarts,
        };
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }
}
