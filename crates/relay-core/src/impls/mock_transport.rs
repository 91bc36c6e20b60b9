//! MockTransport - テスト・デモ用の実行サービス
//!
//! 可用性と応答遅延を外から切り替えられる。遅延をゲートウェイのタイムアウトより
//! 長くすればタイムアウト経路を再現できる。

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Task, TaskId};
use crate::ports::{DispatchAck, ExecutionTransport, TransportError};

#[derive(Default)]
pub struct MockTransport {
    down: AtomicBool,
    delay_ms: AtomicUsize,
    dispatched: Mutex<Vec<TaskId>>,
    health_checks: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that starts out unreachable.
    pub fn unavailable() -> Self {
        let mock = Self::default();
        mock.set_available(false);
        mock
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Ids accepted so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<TaskId> {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
    }

    fn check_up(&self) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("mock service is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionTransport for MockTransport {
    async fn dispatch(&self, task: &Task) -> Result<DispatchAck, TransportError> {
        self.simulate_latency().await;
        self.check_up()?;
        let mut dispatched = self
            .dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        dispatched.push(task.id);
        Ok(DispatchAck {
            accepted: true,
            position: Some(dispatched.len()),
        })
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.check_up()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
