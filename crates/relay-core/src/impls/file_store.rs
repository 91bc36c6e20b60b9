//! FileTaskStore / FileDecisionStore - JSON ファイルによる永続化
//!
//! # レイアウト
//! ```text
//! <data_dir>/tasks/<role>.json   # role ごとに 1 ファイル（Task の配列）
//! <data_dir>/decisions.json      # Decision の配列
//! ```
//!
//! # 実装詳細
//! - 書き込みは atomic（temp + fsync + rename）。同期 I/O なので spawn_blocking で実行
//! - rename 成功後にその role の読み込みキャッシュを破棄する
//! - read-modify-write はパーティション（role）ごとの Mutex 内で行う
//! - TaskId -> Role の索引は起動時に全ファイルから構築し、メモリに保持する

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use super::atomic::{self, TEMP_SUFFIX};
use crate::domain::{
    Decision, DecisionId, DecisionStatus, RelayError, Role, Task, TaskId, TaskStatus,
};
use crate::ports::task_store::status_matches;
use crate::ports::{DecisionEdit, DecisionStore, PartitionEdit, TaskEdit, TaskStore};

const TASKS_DIR: &str = "tasks";
const DECISIONS_FILE: &str = "decisions.json";

async fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RelayError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            RelayError::Persistence(format!("corrupt record file {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(RelayError::Persistence(format!(
            "read {}: {e}",
            path.display()
        ))),
    }
}

async fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), RelayError> {
    let bytes = serde_json::to_vec_pretty(records)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic::atomic_write(&path, &bytes))
        .await
        .map_err(|e| RelayError::Persistence(format!("write task panicked: {e}")))?
        .map_err(|e| RelayError::Persistence(format!("atomic write failed: {e}")))
}

pub struct FileTaskStore {
    dir: PathBuf,
    index: RwLock<HashMap<TaskId, Role>>,
    locks: Mutex<HashMap<Role, Arc<Mutex<()>>>>,
    cache: RwLock<HashMap<Role, Arc<Vec<Task>>>>,
}

impl FileTaskStore {
    /// Open (or create) a store rooted at `data_dir` and index existing partitions.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, RelayError> {
        let dir = data_dir.as_ref().join(TASKS_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // leftovers of an interrupted write are ignored; the committed file is authoritative
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                if path.extension().and_then(|e| e.to_str()) == Some(TEMP_SUFFIX) {
                    debug!(path = %path.display(), "ignoring stale temp file");
                }
                continue;
            }
            let tasks: Vec<Task> = read_records(&path).await?;
            for task in tasks {
                index.insert(task.id, task.assigned_role.clone());
            }
        }
        info!(dir = %dir.display(), tasks = index.len(), "task store opened");

        Ok(Self {
            dir,
            index: RwLock::new(index),
            locks: Mutex::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn partition_path(&self, role: &Role) -> PathBuf {
        self.dir.join(format!("{role}.json"))
    }

    async fn lock_partition(&self, role: &Role) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(role.clone()).or_default())
        };
        lock.lock_owned().await
    }

    async fn load(&self, role: &Role) -> Result<Arc<Vec<Task>>, RelayError> {
        if let Some(tasks) = self.cache.read().await.get(role) {
            return Ok(Arc::clone(tasks));
        }
        // 書き込み側の無効化と順序付けるため、ファイル読み込みも write ロック内で行う
        let mut cache = self.cache.write().await;
        if let Some(tasks) = cache.get(role) {
            return Ok(Arc::clone(tasks));
        }
        let tasks = Arc::new(read_records::<Task>(&self.partition_path(role)).await?);
        cache.insert(role.clone(), Arc::clone(&tasks));
        Ok(tasks)
    }

    /// Caller must hold the partition lock.
    async fn persist(&self, role: &Role, tasks: &[Task]) -> Result<(), RelayError> {
        write_records(&self.partition_path(role), tasks).await?;
        self.cache.write().await.remove(role);
        debug!(%role, tasks = tasks.len(), "partition persisted");
        Ok(())
    }

    async fn role_of(&self, id: TaskId) -> Option<Role> {
        self.index.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: Task) -> Result<(), RelayError> {
        let role = task.assigned_role.clone();
        let _guard = self.lock_partition(&role).await;
        if self.role_of(task.id).await.is_some() {
            return Err(RelayError::validation(format!("{} already exists", task.id)));
        }

        let mut tasks = self.load(&role).await?.as_ref().clone();
        let id = task.id;
        tasks.push(task);
        self.persist(&role, &tasks).await?;
        self.index.write().await.insert(id, role);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, RelayError> {
        let Some(role) = self.role_of(id).await else {
            return Ok(None);
        };
        let tasks = self.load(&role).await?;
        Ok(tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn update(&self, id: TaskId, edit: &TaskEdit<'_>) -> Result<Task, RelayError> {
        let role = self
            .role_of(id)
            .await
            .ok_or_else(|| RelayError::task_not_found(id))?;
        let _guard = self.lock_partition(&role).await;

        let mut tasks = self.load(&role).await?.as_ref().clone();
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| RelayError::task_not_found(id))?;
        edit(slot)?;
        let updated = slot.clone();

        self.persist(&role, &tasks).await?;
        Ok(updated)
    }

    async fn update_partition(
        &self,
        role: &Role,
        edit: &PartitionEdit<'_>,
    ) -> Result<Vec<Task>, RelayError> {
        let _guard = self.lock_partition(role).await;

        let mut tasks = self.load(role).await?.as_ref().clone();
        let mut changed = Vec::new();
        for task in tasks.iter_mut() {
            if edit(task) {
                changed.push(task.clone());
            }
        }
        if !changed.is_empty() {
            self.persist(role, &tasks).await?;
        }
        Ok(changed)
    }

    async fn list_by_role(
        &self,
        role: &Role,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>, RelayError> {
        let tasks = self.load(role).await?;
        Ok(tasks
            .iter()
            .filter(|t| status_matches(statuses, t.status))
            .cloned()
            .collect())
    }

    async fn dependents_of(&self, blocker: TaskId) -> Result<Vec<Task>, RelayError> {
        let mut dependents = Vec::new();
        for role in self.roles().await? {
            let tasks = self.load(&role).await?;
            dependents.extend(tasks.iter().filter(|t| t.is_waiting_on(blocker)).cloned());
        }
        Ok(dependents)
    }

    async fn roles(&self) -> Result<Vec<Role>, RelayError> {
        let index = self.index.read().await;
        let mut roles: Vec<Role> = index.values().cloned().collect();
        roles.sort();
        roles.dedup();
        Ok(roles)
    }
}

pub struct FileDecisionStore {
    path: PathBuf,
    // None = not loaded yet (or invalidated after a write)
    cache: Mutex<Option<Vec<Decision>>>,
}

impl FileDecisionStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, RelayError> {
        tokio::fs::create_dir_all(data_dir.as_ref()).await?;
        Ok(Self {
            path: data_dir.as_ref().join(DECISIONS_FILE),
            cache: Mutex::new(None),
        })
    }

    async fn loaded<'a>(
        &self,
        cache: &'a mut Option<Vec<Decision>>,
    ) -> Result<&'a mut Vec<Decision>, RelayError> {
        if cache.is_none() {
            *cache = Some(read_records(&self.path).await?);
        }
        Ok(cache.get_or_insert_with(Vec::new))
    }
}

#[async_trait]
impl DecisionStore for FileDecisionStore {
    async fn insert(&self, decision: Decision) -> Result<(), RelayError> {
        let mut cache = self.cache.lock().await;
        let mut decisions = self.loaded(&mut cache).await?.clone();
        if decisions.iter().any(|d| d.id == decision.id) {
            return Err(RelayError::validation(format!("{} already exists", decision.id)));
        }
        decisions.push(decision);
        write_records(&self.path, &decisions).await?;
        *cache = None;
        Ok(())
    }

    async fn get(&self, id: DecisionId) -> Result<Option<Decision>, RelayError> {
        let mut cache = self.cache.lock().await;
        let decisions = self.loaded(&mut cache).await?;
        Ok(decisions.iter().find(|d| d.id == id).cloned())
    }

    async fn update(
        &self,
        id: DecisionId,
        edit: &DecisionEdit<'_>,
    ) -> Result<Decision, RelayError> {
        let mut cache = self.cache.lock().await;
        let mut decisions = self.loaded(&mut cache).await?.clone();
        let slot = decisions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| RelayError::decision_not_found(id))?;
        edit(slot)?;
        let updated = slot.clone();

        write_records(&self.path, &decisions).await?;
        *cache = None;
        Ok(updated)
    }

    async fn list(&self, status: Option<DecisionStatus>) -> Result<Vec<Decision>, RelayError> {
        let mut cache = self.cache.lock().await;
        let decisions = self.loaded(&mut cache).await?;
        Ok(decisions
            .iter()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DecisionChoice, DecisionRequest, StatusUpdate, TaskSpec};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;
    use ulid::Ulid;

    fn task(role: &str, blocked_by: BTreeSet<TaskId>) -> Task {
        let spec = TaskSpec::new("title", "content", role);
        let role = spec.validate().unwrap();
        Task::new(TaskId::from_ulid(Ulid::new()), spec, role, blocked_by, Utc::now())
    }

    #[tokio::test]
    async fn tasks_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let t = task("backend", BTreeSet::new());
        {
            let store = FileTaskStore::open(dir.path()).await.unwrap();
            store.insert(t.clone()).await.unwrap();
        }

        let reopened = FileTaskStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(t.id).await.unwrap(), Some(t));
        assert!(dir.path().join("tasks").join("backend.json").exists());
    }

    #[tokio::test]
    async fn one_file_per_role() {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        store.insert(task("backend", BTreeSet::new())).await.unwrap();
        store.insert(task("qa", BTreeSet::new())).await.unwrap();

        assert!(dir.path().join("tasks/backend.json").exists());
        assert!(dir.path().join("tasks/qa.json").exists());
        assert_eq!(store.roles().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_is_visible_after_cache_invalidation() {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let t = task("backend", BTreeSet::new());
        store.insert(t.clone()).await.unwrap();
        // warm the cache
        store.get(t.id).await.unwrap();

        store
            .update(t.id, &|task: &mut Task| {
                task.apply_status(&StatusUpdate::new(TaskStatus::Active), Utc::now())
                    .map(|_| ())
            })
            .await
            .unwrap();

        let fresh = store.get(t.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TaskStatus::Active);

        let on_disk: Vec<Task> =
            serde_json::from_slice(&std::fs::read(dir.path().join("tasks/backend.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk[0].status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn failed_edit_does_not_touch_the_file() {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let t = task("backend", BTreeSet::new());
        store.insert(t.clone()).await.unwrap();
        let path = dir.path().join("tasks/backend.json");
        let before = std::fs::read(&path).unwrap();

        let result = store
            .update(t.id, &|_task: &mut Task| Err(RelayError::invalid_state("refused")))
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn stale_temp_file_is_ignored_on_open() {
        let dir = TempDir::new().unwrap();
        let t = task("backend", BTreeSet::new());
        {
            let store = FileTaskStore::open(dir.path()).await.unwrap();
            store.insert(t.clone()).await.unwrap();
        }
        // interrupted write left a half-written temp file behind
        let partition = dir.path().join("tasks/backend.json");
        atomic::write_temp(&partition, b"[{\"id\":").unwrap();

        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let listed = store
            .list_by_role(&Role::new("backend").unwrap(), &[])
            .await
            .unwrap();
        assert_eq!(listed, vec![t]);
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTaskStore::open(dir.path()).await.unwrap());
        let blocker_ids: Vec<TaskId> = (0..8).map(|_| TaskId::from_ulid(Ulid::new())).collect();
        let t = task("backend", blocker_ids.iter().copied().collect());
        store.insert(t.clone()).await.unwrap();

        let role = Role::new("backend").unwrap();
        let mut joins = Vec::new();
        for blocker in blocker_ids {
            let store = Arc::clone(&store);
            let role = role.clone();
            joins.push(tokio::spawn(async move {
                store
                    .update_partition(&role, &|task: &mut Task| {
                        task.clear_blocker(blocker, Utc::now());
                        true
                    })
                    .await
                    .unwrap();
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        let after = store.get(t.id).await.unwrap().unwrap();
        assert!(after.blocked_by.is_empty());
        assert_eq!(after.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn decisions_persist_and_filter() {
        let dir = TempDir::new().unwrap();
        let store = FileDecisionStore::open(dir.path()).await.unwrap();
        let d1 = Decision::open(
            DecisionId::from_ulid(Ulid::new()),
            DecisionRequest::new("backend", "Adopt the new schema?"),
            Utc::now(),
        )
        .unwrap();
        let d2 = Decision::open(
            DecisionId::from_ulid(Ulid::new()),
            DecisionRequest::new("qa", "Skip flaky suite?"),
            Utc::now(),
        )
        .unwrap();
        store.insert(d1.clone()).await.unwrap();
        store.insert(d2.clone()).await.unwrap();
        store
            .update(d1.id, &|d: &mut Decision| {
                d.decide(DecisionChoice::Approve, None, Utc::now())
            })
            .await
            .unwrap();

        let reopened = FileDecisionStore::open(dir.path()).await.unwrap();
        let pending = reopened.list(Some(DecisionStatus::Pending)).await.unwrap();
        assert_eq!(pending, vec![d2]);
        assert_eq!(reopened.list(None).await.unwrap().len(), 2);
    }
}
