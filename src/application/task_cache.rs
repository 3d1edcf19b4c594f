use crate::application::api::TaskApi;
use crate::domain::models::{NewTask, Task, TaskId, TaskPage, TaskPatch, TaskQuery};
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

pub type ReadinessProvider = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Optimistic,
    Committed,
    RolledBack,
}

/// Shared flag telling in-flight mutations whether their view still exists.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn detach(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskCommand {
    Create { temp_id: TaskId, new_task: NewTask },
    Complete { id: TaskId },
    Update { id: TaskId, patch: TaskPatch },
    Delete { id: TaskId },
}

/// What `forward` displaced; `rollback` puts it back.
#[derive(Debug, Clone, PartialEq)]
enum Displaced {
    Nothing,
    Entry { index: usize, task: Task },
}

impl TaskCommand {
    pub fn key(&self) -> &TaskId {
        match self {
            Self::Create { temp_id, .. } => temp_id,
            Self::Complete { id } | Self::Update { id, .. } | Self::Delete { id } => id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Complete { .. } => "complete",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    fn forward(&self, tasks: &mut Vec<Task>) -> Result<Displaced, InfraError> {
        if let Self::Create { temp_id, new_task } = self {
            tasks.insert(0, Task::speculative(temp_id.clone(), new_task));
            return Ok(Displaced::Nothing);
        }

        let id = self.key();
        let index = position(tasks, id).ok_or_else(|| InfraError::NotFound(format!("task {id}")))?;
        let before = tasks[index].clone();
        match self {
            Self::Complete { .. } => tasks[index].is_completed = true,
            Self::Update { patch, .. } => tasks[index].apply_patch(patch),
            Self::Delete { .. } => {
                tasks.remove(index);
            }
            Self::Create { .. } => {}
        }
        Ok(Displaced::Entry { index, task: before })
    }

    fn reconcile(&self, tasks: &mut Vec<Task>, confirmed: Option<Task>) {
        let Some(confirmed) = confirmed else {
            if let Self::Delete { id } = self {
                tasks.retain(|task| &task.id != id);
            }
            return;
        };
        match position(tasks, self.key()) {
            Some(index) => {
                tasks[index] = confirmed;
                let id = tasks[index].id.clone();
                let mut seen = false;
                tasks.retain(|task| {
                    if task.id != id {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None if matches!(self, Self::Create { .. }) && position(tasks, &confirmed.id).is_none() => {
                tasks.insert(0, confirmed);
            }
            None => {}
        }
    }

    fn rollback(&self, tasks: &mut Vec<Task>, displaced: Displaced) {
        match displaced {
            Displaced::Nothing => tasks.retain(|task| &task.id != self.key()),
            Displaced::Entry { index, task } => match position(tasks, &task.id) {
                Some(current) => tasks[current] = task,
                None => tasks.insert(index.min(tasks.len()), task),
            },
        }
    }

    async fn execute<A: TaskApi + ?Sized>(&self, api: &A) -> Result<Option<Task>, InfraError> {
        match self {
            Self::Create { new_task, .. } => api.create_task(new_task).await.map(Some),
            Self::Complete { id } => api.complete_task(id).await.map(Some),
            Self::Update { id, patch } => api.update_task(id, patch).await.map(Some),
            Self::Delete { id } => api.delete_task(id).await.map(|()| None),
        }
    }
}

fn position(tasks: &[Task], id: &TaskId) -> Option<usize> {
    tasks.iter().position(|task| &task.id == id)
}

/// A mutation whose projection is in the cache while its request is outstanding.
#[derive(Debug)]
struct PendingMutation {
    seq: u64,
    command: TaskCommand,
    displaced: Displaced,
}

#[derive(Debug, Default)]
struct CacheState {
    tasks: Vec<Task>,
    in_flight: HashMap<TaskId, PendingMutation>,
    /// Last settled outcome, kept only for tasks still in the cache.
    settled: HashMap<TaskId, MutationPhase>,
    next_seq: u64,
}

impl CacheState {
    fn record(&mut self, id: TaskId, phase: MutationPhase) {
        tracing::debug!(%id, ?phase, "mutation settled");
        if position(&self.tasks, &id).is_some() {
            self.settled.insert(id, phase);
        } else {
            self.settled.remove(&id);
        }
    }
}

/// Client-side task list with optimistic mutations.
///
/// Every mutation is applied locally first, then confirmed or undone once the
/// server answers. Mutations on the same task run one after another.
pub struct TaskCacheController<A: TaskApi> {
    api: Arc<A>,
    state: Mutex<CacheState>,
    key_locks: Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>,
    next_temp_id: AtomicU64,
    liveness: Liveness,
    readiness: ReadinessProvider,
}

impl<A: TaskApi> TaskCacheController<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: Mutex::new(CacheState::default()),
            key_locks: Mutex::new(HashMap::new()),
            next_temp_id: AtomicU64::new(1),
            liveness: Liveness::new(),
            readiness: Arc::new(|| true),
        }
    }

    /// Gate for `load`; typically "the session has been resolved".
    pub fn with_readiness(mut self, readiness: ReadinessProvider) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub async fn load(&self, query: &TaskQuery) -> Result<TaskPage, InfraError> {
        if !(self.readiness)() {
            return Err(InfraError::SessionUnresolved);
        }
        let page = self.api.list_tasks(query).await?;
        if !self.liveness.is_alive() {
            return Ok(page);
        }

        let mut state = self.lock_state();
        let CacheState {
            tasks,
            in_flight,
            settled,
            ..
        } = &mut *state;
        let mut rebased = page.items.clone();
        let mut pending = in_flight.values_mut().collect::<Vec<_>>();
        pending.sort_by_key(|mutation| mutation.seq);
        for mutation in pending {
            // The fresh server copy becomes what a rollback restores.
            mutation.displaced = mutation
                .command
                .forward(&mut rebased)
                .unwrap_or(Displaced::Nothing);
        }
        settled.retain(|id, _| position(&rebased, id).is_some());
        tracing::debug!(count = rebased.len(), total = page.total, "task cache loaded");
        *tasks = rebased;
        Ok(page)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock_state().tasks.clone()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.lock_state().tasks.iter().find(|task| &task.id == id).cloned()
    }

    /// Uncompleted tasks whose title contains `filter`, case-insensitively.
    pub fn pending(&self, filter: Option<&str>) -> Vec<Task> {
        let needle = filter.map(str::to_lowercase);
        self.lock_state()
            .tasks
            .iter()
            .filter(|task| !task.is_completed)
            .filter(|task| {
                needle
                    .as_deref()
                    .is_none_or(|needle| task.title.to_lowercase().contains(needle))
            })
            .cloned()
            .collect()
    }

    pub fn completed(&self) -> Vec<Task> {
        self.lock_state()
            .tasks
            .iter()
            .filter(|task| task.is_completed)
            .cloned()
            .collect()
    }

    /// `Optimistic` while a mutation on `id` is outstanding, `Idle` otherwise.
    pub fn phase(&self, id: &TaskId) -> MutationPhase {
        if self.lock_state().in_flight.contains_key(id) {
            MutationPhase::Optimistic
        } else {
            MutationPhase::Idle
        }
    }

    /// `Committed` or `RolledBack` for the last mutation that settled on a cached task.
    pub fn last_outcome(&self, id: &TaskId) -> Option<MutationPhase> {
        self.lock_state().settled.get(id).copied()
    }

    pub async fn create(&self, new_task: NewTask) -> Result<Task, InfraError> {
        let temp_id = TaskId::temporary(self.next_temp_id.fetch_add(1, Ordering::Relaxed));
        let confirmed = self.run(TaskCommand::Create { temp_id, new_task }).await?;
        confirmed.ok_or_else(|| InfraError::NotFound("created task".to_string()))
    }

    pub async fn complete(&self, id: TaskId) -> Result<Task, InfraError> {
        let confirmed = self.run(TaskCommand::Complete { id: id.clone() }).await?;
        confirmed.ok_or_else(|| InfraError::NotFound(format!("task {id}")))
    }

    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, InfraError> {
        let confirmed = self.run(TaskCommand::Update { id: id.clone(), patch }).await?;
        confirmed.ok_or_else(|| InfraError::NotFound(format!("task {id}")))
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), InfraError> {
        self.run(TaskCommand::Delete { id }).await.map(|_| ())
    }

    /// Applies `command` optimistically, sends it, then reconciles or rolls back.
    pub async fn run(&self, command: TaskCommand) -> Result<Option<Task>, InfraError> {
        let key = command.key().clone();
        let key_lock = self.key_lock(&key);
        let settling = key_lock.lock().await;

        let forwarded = {
            let mut state = self.lock_state();
            match command.forward(&mut state.tasks) {
                Ok(displaced) => {
                    state.next_seq += 1;
                    let seq = state.next_seq;
                    state.settled.remove(&key);
                    state.in_flight.insert(
                        key.clone(),
                        PendingMutation {
                            seq,
                            command: command.clone(),
                            displaced,
                        },
                    );
                    Ok(())
                }
                Err(error) => Err(error),
            }
        };
        if let Err(error) = forwarded {
            drop(settling);
            self.release_key_lock(&key, key_lock);
            return Err(error);
        }
        tracing::debug!(operation = command.name(), %key, "optimistic update applied");

        let outcome = command.execute(self.api.as_ref()).await;

        {
            let mut state = self.lock_state();
            let pending = state.in_flight.remove(&key);
            if !self.liveness.is_alive() {
                tracing::debug!(operation = command.name(), %key, "view detached, result discarded");
            } else {
                match &outcome {
                    Ok(confirmed) => {
                        command.reconcile(&mut state.tasks, confirmed.clone());
                        let settled_id = confirmed.as_ref().map_or(&key, |task| &task.id).clone();
                        state.record(settled_id, MutationPhase::Committed);
                    }
                    Err(error) => {
                        if let Some(pending) = pending {
                            command.rollback(&mut state.tasks, pending.displaced);
                        }
                        state.record(key.clone(), MutationPhase::RolledBack);
                        tracing::warn!(operation = command.name(), %key, %error, "mutation rolled back");
                    }
                }
            }
        }

        drop(settling);
        self.release_key_lock(&key, key_lock);
        outcome
    }

    fn key_lock(&self, key: &TaskId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn release_key_lock(&self, key: &TaskId, key_lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours means nobody else is queued.
        if Arc::strong_count(&key_lock) == 2 {
            locks.remove(key);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
