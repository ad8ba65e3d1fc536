// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Test implementations of the scheduler's external collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use taskgrid_core::config::SchedulingMode;
use taskgrid_core::error::{Result, TaskGridError};
use taskgrid_core::task::{
    BlockManagerId, Locality, PendingTask, Task, TaskDescription, TaskFailedReason, TaskId,
    TaskIdGenerator, TaskResult, TaskSet, TaskState, CORES_PER_WORKER,
};

use crate::backend::SchedulerBackend;
use crate::config::SchedulerConfig;
use crate::oracle::{PlacementMode, PredictionOracle};
use crate::planner::{StageMetricsUpdate, StagePlanner, TaskResultDecoder};
use crate::scheduler::TaskScheduler;
use crate::task_set::{TaskSetContext, TaskSetManager, TaskSetManagerFactory};

/// Run a check repeatedly until it holds or the iteration budget runs out.
pub async fn await_condition<F: Fn() -> bool>(
    interval: Duration,
    iterations: usize,
    cond: F,
) -> bool {
    for _ in 0..iterations {
        if cond() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    cond()
}

/// A task set of `tasks` trivial tasks accepting every locality level.
pub fn test_task_set(stage_id: usize, stage_attempt_id: usize, tasks: usize) -> TaskSet {
    let tasks = (0..tasks)
        .map(|index| Task::new(index, format!("task-{}", index).into_bytes()))
        .collect();
    TaskSet::new(stage_id, stage_attempt_id, tasks)
}

/// Backend double recording every call made by the scheduler.
pub struct TestBackend {
    started: AtomicBool,
    stopped: AtomicBool,
    ready: AtomicBool,
    local: bool,
    revives: AtomicUsize,
    kills: Mutex<Vec<(TaskId, String, bool)>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            local: false,
            revives: AtomicUsize::new(0),
            kills: Mutex::new(vec![]),
        }
    }

    pub fn revive_count(&self) -> usize {
        self.revives.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> Vec<(TaskId, String, bool)> {
        self.kills.lock().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBackend for TestBackend {
    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn revive_offers(&self) {
        self.revives.fetch_add(1, Ordering::SeqCst);
    }

    fn kill_task(&self, task_id: TaskId, executor_id: &str, interrupt_thread: bool) {
        self.kills
            .lock()
            .push((task_id, executor_id.to_owned(), interrupt_thread));
    }

    fn default_parallelism(&self) -> usize {
        2
    }

    fn is_local(&self) -> bool {
        self.local
    }
}

/// Stage planner double recording every upcall.
#[derive(Default)]
pub struct TestPlanner {
    added: Mutex<Vec<(String, String)>>,
    lost: Mutex<Vec<String>>,
    heartbeats: Mutex<Vec<(String, Vec<StageMetricsUpdate>)>>,
    reject_heartbeats: AtomicBool,
}

impl TestPlanner {
    pub fn added(&self) -> Vec<(String, String)> {
        self.added.lock().clone()
    }

    pub fn lost(&self) -> Vec<String> {
        self.lost.lock().clone()
    }

    pub fn heartbeats(&self) -> Vec<(String, Vec<StageMetricsUpdate>)> {
        self.heartbeats.lock().clone()
    }

    pub fn reject_heartbeats(&self, reject: bool) {
        self.reject_heartbeats.store(reject, Ordering::SeqCst);
    }
}

impl StagePlanner for TestPlanner {
    fn executor_added(&self, executor_id: &str, host: &str) {
        self.added
            .lock()
            .push((executor_id.to_owned(), host.to_owned()));
    }

    fn executor_lost(&self, executor_id: &str) {
        self.lost.lock().push(executor_id.to_owned());
    }

    fn executor_heartbeat_received(
        &self,
        executor_id: &str,
        updates: &[StageMetricsUpdate],
        _block_manager_id: &BlockManagerId,
    ) -> bool {
        self.heartbeats
            .lock()
            .push((executor_id.to_owned(), updates.to_vec()));
        !self.reject_heartbeats.load(Ordering::SeqCst)
    }
}

/// Prediction oracle double with scripted per-task demands.
#[derive(Default)]
pub struct TestOracle {
    customize: AtomicBool,
    mode: Mutex<Option<PlacementMode>>,
    demands: Mutex<HashMap<TaskId, u32>>,
    re_predictions: Mutex<Vec<(TaskId, u32)>>,
    mode_override: Mutex<Option<SchedulingMode>>,
}

impl TestOracle {
    /// Activate (or deactivate) a prediction-driven placement policy.
    pub fn set_customize(&self, mode: Option<PlacementMode>) {
        self.customize.store(mode.is_some(), Ordering::SeqCst);
        *self.mode.lock() = mode;
    }

    pub fn set_demand(&self, task_id: TaskId, cores: u32) {
        self.demands.lock().insert(task_id, cores);
    }

    pub fn set_scheduling_mode(&self, mode: SchedulingMode) {
        *self.mode_override.lock() = Some(mode);
    }

    pub fn re_predictions(&self) -> Vec<(TaskId, u32)> {
        self.re_predictions.lock().clone()
    }
}

impl PredictionOracle for TestOracle {
    fn is_customize(&self) -> bool {
        self.customize.load(Ordering::SeqCst)
    }

    fn mode(&self) -> PlacementMode {
        (*self.mode.lock()).unwrap_or(PlacementMode::Ppa)
    }

    fn cpu_core(&self, task_id: TaskId) -> u32 {
        self.demands
            .lock()
            .get(&task_id)
            .copied()
            .unwrap_or(CORES_PER_WORKER)
    }

    fn re_prediction(&self, task_id: TaskId, residual: u32) {
        self.re_predictions.lock().push((task_id, residual));
        self.demands.lock().insert(task_id, residual);
    }

    fn scheduling_mode(&self, current: SchedulingMode) -> SchedulingMode {
        (*self.mode_override.lock()).unwrap_or(current)
    }
}

/// Decoder double that passes payloads through verbatim.
#[derive(Default)]
pub struct TestDecoder {
    fail_decodes: AtomicBool,
}

impl TestDecoder {
    pub fn fail_decodes(&self, fail: bool) {
        self.fail_decodes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskResultDecoder for TestDecoder {
    async fn decode_success(&self, task_id: TaskId, payload: &[u8]) -> Result<TaskResult> {
        if self.fail_decodes.load(Ordering::SeqCst) {
            return Err(TaskGridError::General(format!(
                "injected decode failure for task {}",
                task_id
            )));
        }
        Ok(TaskResult {
            task_id,
            value: payload.to_vec(),
        })
    }

    async fn decode_failure(
        &self,
        _task_id: TaskId,
        state: TaskState,
        payload: &[u8],
    ) -> TaskFailedReason {
        match state {
            TaskState::Killed => TaskFailedReason::TaskKilled("killed by request".to_owned()),
            _ => TaskFailedReason::ExceptionFailure(
                String::from_utf8_lossy(payload).into_owned(),
            ),
        }
    }
}

struct ManagerState {
    pending: VecDeque<usize>,
    running: HashMap<TaskId, Option<String>>,
    index_of: HashMap<TaskId, usize>,
    failure_counts: HashMap<usize, usize>,
    finished: usize,
    successes: Vec<(TaskId, TaskResult)>,
    failures: Vec<(TaskId, TaskState)>,
    executor_added_events: usize,
    abort_message: Option<String>,
}

/// A straightforward manager: tasks are handed out in index order at any
/// locality, failed attempts re-queue until the failure budget is spent,
/// and the manager turns zombie when every task has finished or on abort.
pub struct TestTaskSetManager {
    task_set: TaskSet,
    max_task_failures: usize,
    task_ids: Arc<TaskIdGenerator>,
    state: Mutex<ManagerState>,
    zombie: AtomicBool,
    speculatable: AtomicBool,
    broken_serialization: AtomicBool,
}

impl TestTaskSetManager {
    pub fn new(task_set: TaskSet, max_task_failures: usize, task_ids: Arc<TaskIdGenerator>) -> Self {
        let pending = (0..task_set.tasks.len()).collect();
        Self {
            task_set,
            max_task_failures,
            task_ids,
            state: Mutex::new(ManagerState {
                pending,
                running: HashMap::new(),
                index_of: HashMap::new(),
                failure_counts: HashMap::new(),
                finished: 0,
                successes: vec![],
                failures: vec![],
                executor_added_events: 0,
                abort_message: None,
            }),
            zombie: AtomicBool::new(false),
            speculatable: AtomicBool::new(false),
            broken_serialization: AtomicBool::new(false),
        }
    }

    /// Make every subsequent offer fail as if the task were not serializable.
    pub fn fail_serialization(&self, fail: bool) {
        self.broken_serialization.store(fail, Ordering::SeqCst);
    }

    pub fn set_speculatable(&self, speculatable: bool) {
        self.speculatable.store(speculatable, Ordering::SeqCst);
    }

    pub fn successful_tasks(&self) -> Vec<(TaskId, TaskResult)> {
        self.state.lock().successes.clone()
    }

    pub fn failed_tasks(&self) -> Vec<(TaskId, TaskState)> {
        self.state.lock().failures.clone()
    }

    pub fn executor_added_count(&self) -> usize {
        self.state.lock().executor_added_events
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn bound_executor(&self, task_id: TaskId) -> Option<String> {
        self.state.lock().running.get(&task_id).cloned().flatten()
    }

    pub fn abort_message(&self) -> Option<String> {
        self.state.lock().abort_message.clone()
    }

    fn start_next(&self, executor_id: Option<&str>) -> Result<Option<PendingTask>> {
        if self.broken_serialization.load(Ordering::SeqCst) {
            return Err(TaskGridError::TaskSerialization(format!(
                "injected serialization failure in {}",
                self.name()
            )));
        }
        if self.is_zombie() {
            return Ok(None);
        }
        let mut state = self.state.lock();
        let index = match state.pending.pop_front() {
            Some(index) => index,
            None => return Ok(None),
        };
        let task_id = self.task_ids.next_id();
        state
            .running
            .insert(task_id, executor_id.map(|e| e.to_owned()));
        state.index_of.insert(task_id, index);
        Ok(Some(PendingTask {
            task_id,
            name: format!("task {}:{}", self.task_set.id(), index),
            serialized_task: self.task_set.tasks[index].payload.clone(),
        }))
    }
}

impl TaskSetManager for TestTaskSetManager {
    fn task_set(&self) -> &TaskSet {
        &self.task_set
    }

    fn resource_offer(
        &self,
        executor_id: &str,
        _host: &str,
        _locality: Locality,
    ) -> Result<Option<TaskDescription>> {
        Ok(self
            .start_next(Some(executor_id))?
            .map(|pending| pending.bind(executor_id.to_owned())))
    }

    fn dequeue_task(&self, _locality: Locality) -> Result<Option<PendingTask>> {
        self.start_next(None)
    }

    fn task_launched(&self, task_id: TaskId, executor_id: &str) {
        let mut state = self.state.lock();
        if let Some(binding) = state.running.get_mut(&task_id) {
            *binding = Some(executor_id.to_owned());
        }
    }

    fn return_task(&self, pending: PendingTask) {
        let mut state = self.state.lock();
        if state.running.remove(&pending.task_id).is_some() {
            if let Some(index) = state.index_of.remove(&pending.task_id) {
                state.pending.push_front(index);
            }
        }
    }

    fn running_tasks(&self) -> Vec<TaskId> {
        self.state.lock().running.keys().copied().collect()
    }

    fn cpu_demand(&self) -> u32 {
        self.state.lock().pending.len() as u32 * CORES_PER_WORKER
    }

    fn handle_successful_task(&self, task_id: TaskId, result: TaskResult) {
        let mut state = self.state.lock();
        if state.running.remove(&task_id).is_some() {
            state.finished += 1;
            state.successes.push((task_id, result));
            if state.finished == self.task_set.tasks.len() {
                self.zombie.store(true, Ordering::SeqCst);
            }
        }
    }

    fn handle_failed_task(&self, task_id: TaskId, task_state: TaskState, reason: TaskFailedReason) {
        let mut state = self.state.lock();
        state.failures.push((task_id, task_state));
        if state.running.remove(&task_id).is_none() {
            return;
        }
        let index = match state.index_of.get(&task_id) {
            Some(index) => *index,
            None => return,
        };
        if !reason.countable() {
            return;
        }
        let failures = state.failure_counts.entry(index).or_insert(0);
        *failures += 1;
        if *failures >= self.max_task_failures {
            state.abort_message = Some(format!(
                "task {} of {} failed {} times",
                index,
                self.task_set.id(),
                self.max_task_failures
            ));
            self.zombie.store(true, Ordering::SeqCst);
        } else {
            state.pending.push_back(index);
        }
    }

    fn executor_added(&self) {
        self.state.lock().executor_added_events += 1;
    }

    fn executor_lost(&self, executor_id: &str, _host: &str) {
        let mut state = self.state.lock();
        let lost: Vec<TaskId> = state
            .running
            .iter()
            .filter(|(_, binding)| binding.as_deref() == Some(executor_id))
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in lost {
            state.running.remove(&task_id);
            if let Some(index) = state.index_of.get(&task_id).copied() {
                state.pending.push_back(index);
            }
            state.failures.push((task_id, TaskState::Lost));
        }
    }

    fn check_speculatable_tasks(&self) -> bool {
        self.speculatable.load(Ordering::SeqCst)
    }

    fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::SeqCst)
    }

    fn abort(&self, message: &str) {
        self.zombie.store(true, Ordering::SeqCst);
        self.state.lock().abort_message = Some(message.to_owned());
    }
}

/// Factory keeping a handle on every manager it creates so tests can
/// inspect them later.
#[derive(Default)]
pub struct TestTaskSetManagerFactory {
    created: Mutex<Vec<Arc<TestTaskSetManager>>>,
}

impl TestTaskSetManagerFactory {
    pub fn created(&self) -> Vec<Arc<TestTaskSetManager>> {
        self.created.lock().clone()
    }
}

impl TaskSetManagerFactory for TestTaskSetManagerFactory {
    fn create(&self, ctx: TaskSetContext) -> Arc<dyn TaskSetManager> {
        let manager = Arc::new(TestTaskSetManager::new(
            ctx.task_set,
            ctx.max_task_failures,
            ctx.task_ids,
        ));
        self.created.lock().push(manager.clone());
        manager
    }
}

/// A scheduler wired to test doubles of all four collaborators.
pub struct SchedulerTest {
    pub scheduler: TaskScheduler,
    pub backend: Arc<TestBackend>,
    pub planner: Arc<TestPlanner>,
    pub oracle: Arc<TestOracle>,
    pub decoder: Arc<TestDecoder>,
    pub factory: Arc<TestTaskSetManagerFactory>,
}

impl SchedulerTest {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Build a scheduler whose oracle overrides the scheduling mode.
    pub fn with_mode_override(config: SchedulerConfig, mode: SchedulingMode) -> Self {
        Self::build(config, Some(mode))
    }

    fn build(config: SchedulerConfig, mode_override: Option<SchedulingMode>) -> Self {
        let backend = Arc::new(TestBackend::new());
        let planner = Arc::new(TestPlanner::default());
        let oracle = Arc::new(TestOracle::default());
        if let Some(mode) = mode_override {
            oracle.set_scheduling_mode(mode);
        }
        let decoder = Arc::new(TestDecoder::default());
        let factory = Arc::new(TestTaskSetManagerFactory::default());
        let scheduler = TaskScheduler::new(
            config,
            backend.clone(),
            planner.clone(),
            oracle.clone(),
            decoder.clone(),
            factory.clone(),
        );
        Self {
            scheduler,
            backend,
            planner,
            oracle,
            decoder,
            factory,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn await_condition_gives_up() {
        assert!(!await_condition(Duration::from_millis(1), 3, || false).await);
        assert!(await_condition(Duration::from_millis(1), 3, || true).await);
    }

    #[test]
    fn manager_aborts_after_exhausting_the_failure_budget() {
        let manager = TestTaskSetManager::new(
            test_task_set(1, 0, 1),
            2,
            Arc::new(TaskIdGenerator::new()),
        );

        for _ in 0..2 {
            let task = manager
                .resource_offer("exec-1", "host-1", Locality::Any)
                .unwrap()
                .unwrap();
            manager.handle_failed_task(
                task.task_id,
                TaskState::Failed,
                TaskFailedReason::ExceptionFailure("boom".to_owned()),
            );
        }

        assert!(manager.is_zombie());
        assert!(manager.abort_message().is_some());
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn killed_attempts_are_not_requeued() {
        let manager = TestTaskSetManager::new(
            test_task_set(1, 0, 1),
            4,
            Arc::new(TaskIdGenerator::new()),
        );

        let task = manager
            .resource_offer("exec-1", "host-1", Locality::Any)
            .unwrap()
            .unwrap();
        manager.handle_failed_task(
            task.task_id,
            TaskState::Killed,
            TaskFailedReason::TaskKilled("killed".to_owned()),
        );

        assert_eq!(manager.pending_count(), 0);
        assert!(!manager.is_zombie());
    }
}
