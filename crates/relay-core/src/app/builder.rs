//! OrchestratorBuilder - エンジンの構築とワイヤリング
//!
//! # 方針
//! - 起動時検証（Fail-fast）: 必須ポートが欠けていれば build() が BuildError を返す
//! - Clock / IdGenerator は省略可能（SystemClock / UlidGenerator）
//! - `from_config` は設定からストアとトランスポートを選んで組み立てる

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::engine::Orchestrator;
use super::escalation::EscalationWorkflow;
use super::gateway::{ExecutionGateway, GatewaySettings};
use super::resolver::{CascadePolicy, DependencyResolver};
use super::role_queue::RoleQueueView;
use crate::config::{RelayConfig, StorageBackend};
use crate::domain::RelayError;
use crate::impls::{
    FileDecisionStore, FileTaskStore, HttpTransport, InMemoryDecisionStore, InMemoryTaskStore,
    MockTransport,
};
use crate::ports::{
    Clock, DecisionStore, ExecutionTransport, IdGenerator, SystemClock, TaskStore,
    TransportError, UlidGenerator,
};

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing ports: {0:?}. These must be provided before build().")]
    MissingPorts(Vec<&'static str>),

    #[error("storage could not be opened: {0}")]
    Storage(#[from] RelayError),

    #[error("execution transport could not be created: {0}")]
    Transport(#[from] TransportError),
}

/// # 使用例
/// ```ignore
/// let engine = OrchestratorBuilder::new()
///     .task_store(Arc::new(InMemoryTaskStore::new()))
///     .decision_store(Arc::new(InMemoryDecisionStore::new()))
///     .transport(Arc::new(MockTransport::new()))
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    tasks: Option<Arc<dyn TaskStore>>,
    decisions: Option<Arc<dyn DecisionStore>>,
    transport: Option<Arc<dyn ExecutionTransport>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    cascade: CascadePolicy,
    gateway: GatewaySettings,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            tasks: None,
            decisions: None,
            transport: None,
            clock: None,
            ids: None,
            cascade: CascadePolicy::default(),
            gateway: GatewaySettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Stores and transport chosen from `config`.
    ///
    /// Without `execution.base_url` the gateway has no live service and stages
    /// every dispatch locally.
    pub async fn from_config(config: &RelayConfig) -> Result<Self, BuildError> {
        let builder = match config.storage.backend {
            StorageBackend::File => {
                let dir = &config.storage.data_dir;
                Self::new()
                    .task_store(Arc::new(FileTaskStore::open(dir).await?))
                    .decision_store(Arc::new(FileDecisionStore::open(dir).await?))
            }
            StorageBackend::Memory => Self::new()
                .task_store(Arc::new(InMemoryTaskStore::new()))
                .decision_store(Arc::new(InMemoryDecisionStore::new())),
        };

        let transport: Arc<dyn ExecutionTransport> = match &config.execution.base_url {
            Some(url) => Arc::new(HttpTransport::new(url.as_str())?),
            None => Arc::new(MockTransport::unavailable()),
        };
        info!(
            backend = ?config.storage.backend,
            transport = transport.name(),
            cascade = %config.resolution.cascade,
            "engine configured"
        );

        Ok(builder
            .transport(transport)
            .cascade(config.resolution.cascade)
            .gateway_settings(config.execution.gateway_settings()))
    }

    pub fn task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn decision_store(mut self, decisions: Arc<dyn DecisionStore>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ExecutionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn cascade(mut self, policy: CascadePolicy) -> Self {
        self.cascade = policy;
        self
    }

    pub fn gateway_settings(mut self, settings: GatewaySettings) -> Self {
        self.gateway = settings;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let mut missing = Vec::new();
        if self.tasks.is_none() {
            missing.push("task_store");
        }
        if self.decisions.is_none() {
            missing.push("decision_store");
        }
        if self.transport.is_none() {
            missing.push("transport");
        }
        let (Some(tasks), Some(decisions), Some(transport)) =
            (self.tasks, self.decisions, self.transport)
        else {
            return Err(BuildError::MissingPorts(missing));
        };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        };
        let (events, _) = broadcast::channel(self.event_capacity);

        Ok(Orchestrator {
            resolver: DependencyResolver::new(
                Arc::clone(&tasks),
                Arc::clone(&clock),
                self.cascade,
                events.clone(),
            ),
            queues: RoleQueueView::new(Arc::clone(&tasks)),
            escalation: EscalationWorkflow::new(
                decisions,
                Arc::clone(&tasks),
                Arc::clone(&ids),
                Arc::clone(&clock),
                events.clone(),
            ),
            gateway: Arc::new(ExecutionGateway::new(
                transport,
                Arc::clone(&clock),
                self.gateway,
            )),
            tasks,
            ids,
            clock,
            events,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
