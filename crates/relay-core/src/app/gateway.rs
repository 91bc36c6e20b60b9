//! ExecutionGateway - 実行サービスへのサーキットブレーカー
//!
//! # 状態
//! - `service_available`: ヘルスプローブで更新、dispatch 失敗で即 false
//! - `staged`: サービス不在時の退避キュー（プロセス内のみ、再起動で消える）
//! - `held`: 送信中または退避中の task id。同じ task を二重に渡さない
//!
//! # 方針
//! - 上流の失敗は呼び出し側へ返さない。local-fallback として成功扱いにし、warn を出す
//! - 外向きの呼び出しはすべて `tokio::time::timeout` で囲む（タイムアウト = 接続失敗）
//! - 復旧しても退避分は自動で再送しない。`replay_staged` を明示的に呼ぶ
//! - `staged` のロックは await をまたいで持たない（再送中でも退避は即座に終わる）

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{RelayError, Task, TaskId};
use crate::ports::{Clock, DispatchAck, ExecutionTransport};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub request_timeout: Duration,
    pub health_interval: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    Live,
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub mode: DispatchMode,

    /// 1-based. Always set for local staging; live only when the service reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl DispatchReceipt {
    pub fn is_live(&self) -> bool {
        self.mode == DispatchMode::Live
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedEntry {
    pub task: Task,
    pub queued_at: DateTime<Utc>,
    pub mode: DispatchMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub service_available: bool,
    pub staged: usize,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub transport: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub forwarded: usize,
    /// Entries dropped because their task is no longer dispatchable.
    pub skipped: usize,
    pub remaining: usize,
}

pub struct ExecutionGateway {
    transport: Arc<dyn ExecutionTransport>,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
    available: AtomicBool,
    staged: Mutex<VecDeque<StagedEntry>>,
    held: StdMutex<HashSet<TaskId>>,
    replaying: Mutex<()>,
    last_probe_at: StdMutex<Option<DateTime<Utc>>>,
}

impl ExecutionGateway {
    /// Starts out assuming the service is live; the first failure or probe corrects it.
    pub fn new(
        transport: Arc<dyn ExecutionTransport>,
        clock: Arc<dyn Clock>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            transport,
            clock,
            settings,
            available: AtomicBool::new(true),
            staged: Mutex::new(VecDeque::new()),
            held: StdMutex::new(HashSet::new()),
            replaying: Mutex::new(()),
            last_probe_at: StdMutex::new(None),
        }
    }

    pub fn settings(&self) -> GatewaySettings {
        self.settings
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Reserve `id` for one dispatch.
    ///
    /// Fails with `InvalidState` while the id is being sent or sits in the staging
    /// queue. The reservation ends when the claim drops, unless the task was staged.
    pub fn claim(&self, id: TaskId) -> Result<DispatchClaim<'_>, RelayError> {
        if !self.held_ids().insert(id) {
            return Err(RelayError::invalid_state(format!(
                "{id} is already held by the execution gateway"
            )));
        }
        Ok(DispatchClaim {
            gateway: self,
            id,
            retain: false,
        })
    }

    fn held_ids(&self) -> std::sync::MutexGuard<'_, HashSet<TaskId>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, id: TaskId) {
        self.held_ids().remove(&id);
    }

    /// Route a task to the live service, or stage it locally.
    ///
    /// Only `queued`/`pending` tasks are eligible. Upstream failures never surface
    /// here; they turn into a local-fallback receipt.
    pub async fn queue_task(&self, task: &Task) -> Result<DispatchReceipt, RelayError> {
        let claim = self.claim(task.id)?;
        self.queue_claimed(claim, task).await
    }

    /// `queue_task` for a caller that already holds the claim on `task`.
    pub async fn queue_claimed(
        &self,
        mut claim: DispatchClaim<'_>,
        task: &Task,
    ) -> Result<DispatchReceipt, RelayError> {
        if claim.id != task.id {
            return Err(RelayError::invalid_state(format!(
                "claim for {} does not cover {}",
                claim.id, task.id
            )));
        }
        if !task.status.is_dispatchable() {
            return Err(RelayError::invalid_state(format!(
                "{} is {} and cannot be dispatched",
                task.id, task.status
            )));
        }

        if self.is_available()
            && let Some(ack) = self.try_dispatch(task).await
        {
            return Ok(DispatchReceipt {
                mode: DispatchMode::Live,
                position: ack.position,
            });
        }

        let position = self.stage(task.clone()).await;
        // staged ids stay held until replay forwards or drops them
        claim.retain = true;
        Ok(DispatchReceipt {
            mode: DispatchMode::LocalFallback,
            position: Some(position),
        })
    }

    async fn try_dispatch(&self, task: &Task) -> Option<DispatchAck> {
        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, self.transport.dispatch(task)).await {
            Ok(Ok(ack)) => {
                debug!(task_id = %task.id, transport = self.transport.name(), "dispatched live");
                Some(ack)
            }
            Ok(Err(err)) => {
                warn!(task_id = %task.id, error = %err, "dispatch failed; switching to local fallback");
                self.mark_unavailable();
                None
            }
            Err(_) => {
                warn!(task_id = %task.id, timeout_ms = timeout.as_millis() as u64, "dispatch timed out; switching to local fallback");
                self.mark_unavailable();
                None
            }
        }
    }

    async fn stage(&self, task: Task) -> usize {
        let mut staged = self.staged.lock().await;
        staged.push_back(StagedEntry {
            task,
            queued_at: self.clock.now(),
            mode: DispatchMode::LocalFallback,
        });
        staged.len()
    }

    fn mark_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    /// Probe the service once and refresh the flag. Failures are logged, never raised.
    pub async fn probe_health(&self) -> bool {
        let result =
            tokio::time::timeout(self.settings.request_timeout, self.transport.health_check())
                .await;
        let live = matches!(result, Ok(Ok(())));
        let was_live = self.available.swap(live, Ordering::SeqCst);

        *self
            .last_probe_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(self.clock.now());

        match (was_live, live) {
            (false, true) => info!(transport = self.transport.name(), "execution service recovered"),
            (true, false) => match result {
                Ok(Err(err)) => warn!(error = %err, "execution service unavailable"),
                _ => warn!("execution service health probe timed out"),
            },
            _ => debug!(live, "health probe"),
        }
        live
    }

    /// Run `probe_health` every `health_interval` until the handle shuts it down.
    pub fn spawn_health_probe(self: &Arc<Self>) -> HealthProbe {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let gateway = Arc::clone(self);
        let interval = self.settings.health_interval;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        gateway.probe_health().await;
                    }
                }
            }
            debug!("health probe stopped");
        });

        HealthProbe { shutdown_tx, join }
    }

    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            service_available: self.is_available(),
            staged: self.staged.lock().await.len(),
            last_probe_at: *self
                .last_probe_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            transport: self.transport.name(),
        }
    }

    /// Snapshot of the local staging queue, oldest first.
    pub async fn staged(&self) -> Vec<StagedEntry> {
        self.staged.lock().await.iter().cloned().collect()
    }

    /// Forward staged entries to the live service in FIFO order.
    ///
    /// Stops at the first failure; that entry and everything behind it stay staged.
    pub async fn replay_staged(&self) -> ReplayReport {
        self.replay_staged_with(|task| async move { Ok::<_, RelayError>(Some(task)) })
            .await
    }

    /// `replay_staged`, with `refresh` consulted before each entry is sent.
    ///
    /// `refresh` returns the record to forward, or `None` to drop the entry. An error
    /// puts the entry back and ends the replay.
    pub async fn replay_staged_with<F, Fut>(&self, refresh: F) -> ReplayReport
    where
        F: Fn(Task) -> Fut,
        Fut: Future<Output = Result<Option<Task>, RelayError>>,
    {
        let _replaying = self.replaying.lock().await;
        let mut forwarded = 0;
        let mut skipped = 0;

        loop {
            let Some(entry) = self.staged.lock().await.pop_front() else {
                break;
            };
            let id = entry.task.id;

            let task = match refresh(entry.task.clone()).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    debug!(task_id = %id, "staged task is no longer dispatchable; dropped");
                    self.release(id);
                    skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(task_id = %id, error = %err, "could not refresh staged task; replay stopped");
                    self.staged.lock().await.push_front(entry);
                    break;
                }
            };

            if self.try_dispatch(&task).await.is_none() {
                self.staged.lock().await.push_front(entry);
                break;
            }
            self.release(id);
            forwarded += 1;
        }
        if forwarded > 0 {
            self.available.store(true, Ordering::SeqCst);
        }

        let report = ReplayReport {
            forwarded,
            skipped,
            remaining: self.staged.lock().await.len(),
        };
        info!(
            forwarded = report.forwarded,
            skipped = report.skipped,
            remaining = report.remaining,
            "staged tasks replayed"
        );
        report
    }
}

/// Reservation of one task id in the gateway. See [`ExecutionGateway::claim`].
pub struct DispatchClaim<'a> {
    gateway: &'a ExecutionGateway,
    id: TaskId,
    retain: bool,
}

impl Drop for DispatchClaim<'_> {
    fn drop(&mut self) {
        if !self.retain {
            self.gateway.release(self.id);
        }
    }
}

/// Health probe handle.
/// - `request_shutdown` stops the loop after the current probe
/// - dropping the handle also stops it (the watch sender goes away)
pub struct HealthProbe {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl HealthProbe {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskSpec, TaskStatus};
    use crate::impls::MockTransport;
    use crate::ports::SystemClock;
    use std::collections::BTreeSet;
    use ulid::Ulid;

    fn task() -> Task {
        let spec = TaskSpec::new("t", "c", "backend");
        let role = spec.validate().unwrap();
        Task::new(TaskId::from_ulid(Ulid::new()), spec, role, BTreeSet::new(), Utc::now())
    }

    fn gateway(mock: &Arc<MockTransport>, timeout_ms: u64) -> Arc<ExecutionGateway> {
        Arc::new(ExecutionGateway::new(
            mock.clone(),
            Arc::new(SystemClock),
            GatewaySettings {
                request_timeout: Duration::from_millis(timeout_ms),
                health_interval: Duration::from_millis(10),
            },
        ))
    }

    #[tokio::test]
    async fn live_when_service_answers() {
        let mock = Arc::new(MockTransport::new());
        let gw = gateway(&mock, 500);
        let t = task();

        let receipt = gw.queue_task(&t).await.unwrap();
        assert_eq!(receipt.mode, DispatchMode::Live);
        assert_eq!(receipt.position, Some(1));
        assert_eq!(mock.dispatched(), vec![t.id]);
    }

    #[tokio::test]
    async fn failure_falls_back_and_stays_down() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);

        let first = gw.queue_task(&task()).await.unwrap();
        assert_eq!(
            first,
            DispatchReceipt {
                mode: DispatchMode::LocalFallback,
                position: Some(1)
            }
        );
        assert!(!gw.is_available());

        // breaker is open: the service comes back but nothing is sent until a probe says so
        mock.set_available(true);
        let second = gw.queue_task(&task()).await.unwrap();
        assert_eq!(second.position, Some(2));
        assert!(mock.dispatched().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_treated_as_failure() {
        let mock = Arc::new(MockTransport::new());
        mock.set_delay(Duration::from_millis(300));
        let gw = gateway(&mock, 20);

        let receipt = gw.queue_task(&task()).await.unwrap();
        assert_eq!(receipt.mode, DispatchMode::LocalFallback);
        assert!(!gw.is_available());
    }

    #[tokio::test]
    async fn successful_probe_restores_live_dispatch() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        assert!(!gw.probe_health().await);
        assert!(gw.status().await.last_probe_at.is_some());

        mock.set_available(true);
        assert!(gw.probe_health().await);
        assert!(gw.queue_task(&task()).await.unwrap().is_live());
    }

    #[tokio::test]
    async fn rejects_tasks_that_are_not_dispatchable() {
        let mock = Arc::new(MockTransport::new());
        let gw = gateway(&mock, 500);
        let mut t = task();
        t.status = TaskStatus::Blocked;

        assert!(matches!(
            gw.queue_task(&t).await,
            Err(RelayError::InvalidState(_))
        ));
        assert_eq!(gw.status().await.staged, 0);
    }

    #[tokio::test]
    async fn replay_forwards_in_fifo_order() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        let (a, b) = (task(), task());
        gw.queue_task(&a).await.unwrap();
        gw.queue_task(&b).await.unwrap();

        mock.set_available(true);
        let report = gw.replay_staged().await;
        assert_eq!(
            report,
            ReplayReport {
                forwarded: 2,
                skipped: 0,
                remaining: 0
            }
        );
        assert_eq!(mock.dispatched(), vec![a.id, b.id]);
        assert!(gw.is_available());
    }

    #[tokio::test]
    async fn replay_keeps_entries_when_service_is_down() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        gw.queue_task(&task()).await.unwrap();

        let report = gw.replay_staged().await;
        assert_eq!(
            report,
            ReplayReport {
                forwarded: 0,
                skipped: 0,
                remaining: 1
            }
        );
        assert_eq!(gw.staged().await.len(), 1);
    }

    #[tokio::test]
    async fn same_task_is_not_handed_over_twice() {
        let mock = Arc::new(MockTransport::new());
        mock.set_delay(Duration::from_millis(30));
        let gw = gateway(&mock, 500);
        let t = task();

        let (first, second) = tokio::join!(gw.queue_task(&t), gw.queue_task(&t));
        assert!(first.unwrap().is_live());
        assert!(matches!(second, Err(RelayError::InvalidState(_))));
        assert_eq!(mock.dispatched(), vec![t.id]);

        // the claim ends with the live send; an explicit re-send is allowed
        assert!(gw.queue_task(&t).await.unwrap().is_live());
    }

    #[tokio::test]
    async fn staged_task_stays_claimed_until_replayed() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        let t = task();
        gw.queue_task(&t).await.unwrap();

        assert!(matches!(gw.claim(t.id), Err(RelayError::InvalidState(_))));
        assert_eq!(gw.staged().await.len(), 1);

        mock.set_available(true);
        gw.replay_staged().await;
        assert!(gw.claim(t.id).is_ok());
    }

    #[tokio::test]
    async fn staging_does_not_wait_for_an_inflight_replay() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        for _ in 0..5 {
            gw.queue_task(&task()).await.unwrap();
        }

        mock.set_available(true);
        mock.set_delay(Duration::from_millis(100));
        let replay = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.replay_staged().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // breaker is still open while the replay runs
        let late = task();
        let started = tokio::time::Instant::now();
        let receipt = gw.queue_task(&late).await.unwrap();
        assert_eq!(receipt.mode, DispatchMode::LocalFallback);
        assert!(started.elapsed() < Duration::from_millis(100));

        let report = replay.await.unwrap();
        assert_eq!(report.forwarded, 6);
        assert_eq!(report.remaining, 0);
        assert_eq!(mock.dispatched().last(), Some(&late.id));
    }

    #[tokio::test]
    async fn replay_drops_entries_the_refresh_rejects() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        let (cancelled, kept) = (task(), task());
        gw.queue_task(&cancelled).await.unwrap();
        gw.queue_task(&kept).await.unwrap();

        mock.set_available(true);
        let report = gw
            .replay_staged_with(|t: Task| {
                let drop_it = t.id == cancelled.id;
                async move { Ok::<_, RelayError>((!drop_it).then_some(t)) }
            })
            .await;
        assert_eq!(
            report,
            ReplayReport {
                forwarded: 1,
                skipped: 1,
                remaining: 0
            }
        );
        assert_eq!(mock.dispatched(), vec![kept.id]);
        assert!(gw.claim(cancelled.id).is_ok());
    }

    #[tokio::test]
    async fn refresh_error_keeps_the_entry() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);
        gw.queue_task(&task()).await.unwrap();

        mock.set_available(true);
        let report = gw
            .replay_staged_with(|_t: Task| async {
                Err::<Option<Task>, RelayError>(RelayError::invalid_state("store unavailable"))
            })
            .await;
        assert_eq!(report.remaining, 1);
        assert!(mock.dispatched().is_empty());
    }

    #[tokio::test]
    async fn probe_loop_runs_until_shutdown() {
        let mock = Arc::new(MockTransport::unavailable());
        let gw = gateway(&mock, 500);

        let probe = gw.spawn_health_probe();
        mock.set_available(true);
        tokio::time::sleep(Duration::from_millis(80)).await;
        probe.shutdown_and_join().await;

        assert!(mock.health_checks() >= 1);
        assert!(gw.is_available());
    }
}
