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

//! The scheduler facade: task-set admission, resource-offer rounds, status
//! updates, executor membership, and the periodic speculation/starvation
//! activities.
//!
//! Locking discipline: all registries live behind one `parking_lot::Mutex`
//! (the scheduler monitor). The backend may hold its own lock when it calls
//! in here, so no method calls back into the backend while the monitor is
//! held; every method below that reaches the backend does so after its
//! monitor scope has closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;

use taskgrid_core::config::SchedulingMode;
use taskgrid_core::error::{Result, TaskGridError};
use taskgrid_core::task::{
    BlockManagerId, TaskDescription, TaskFailedReason, TaskId, TaskIdGenerator,
    TaskMetricsUpdate, TaskSet, TaskState, WorkerOffer,
};

use crate::backend::{NoRackResolver, RackResolver, SchedulerBackend};
use crate::config::SchedulerConfig;
use crate::oracle::{PlacementMode, PredictionOracle};
use crate::placement::PlacementRound;
use crate::planner::{StageMetricsUpdate, StagePlanner, TaskResultDecoder};
use crate::pool::{self, Pool, SchedulableBuilder};
use crate::registry::TaskRegistry;
use crate::task_set::{TaskSetContext, TaskSetManager, TaskSetManagerFactory};

/// Everything guarded by the scheduler monitor.
struct SchedulerState {
    registry: TaskRegistry,
    has_received_task: bool,
    has_launched_task: bool,
}

/// The task scheduler core of the compute engine.
///
/// Cloning is cheap: clones share all state, which lets decode
/// continuations and timer loops carry a handle into spawned tasks.
#[derive(Clone)]
pub struct TaskScheduler {
    config: SchedulerConfig,
    scheduling_mode: SchedulingMode,
    state: Arc<parking_lot::Mutex<SchedulerState>>,
    backend: Arc<dyn SchedulerBackend>,
    planner: Arc<dyn StagePlanner>,
    oracle: Arc<dyn PredictionOracle>,
    decoder: Arc<dyn TaskResultDecoder>,
    factory: Arc<dyn TaskSetManagerFactory>,
    rack_resolver: Arc<dyn RackResolver>,
    builder: Arc<dyn SchedulableBuilder>,
    root_pool: Arc<Pool>,
    task_ids: Arc<TaskIdGenerator>,
    stopped: Arc<AtomicBool>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        backend: Arc<dyn SchedulerBackend>,
        planner: Arc<dyn StagePlanner>,
        oracle: Arc<dyn PredictionOracle>,
        decoder: Arc<dyn TaskResultDecoder>,
        factory: Arc<dyn TaskSetManagerFactory>,
    ) -> Self {
        let scheduling_mode = oracle.scheduling_mode(config.scheduling_mode);
        if scheduling_mode != config.scheduling_mode {
            info!(
                "Prediction oracle overrode scheduling mode {:?} with {:?}",
                config.scheduling_mode, scheduling_mode
            );
        }
        let builder = pool::builder_for(scheduling_mode);
        let root_pool = builder.root_pool();

        Self {
            config,
            scheduling_mode,
            state: Arc::new(parking_lot::Mutex::new(SchedulerState {
                registry: TaskRegistry::new(),
                has_received_task: false,
                has_launched_task: false,
            })),
            backend,
            planner,
            oracle,
            decoder,
            factory,
            rack_resolver: Arc::new(NoRackResolver),
            builder,
            root_pool,
            task_ids: Arc::new(TaskIdGenerator::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_rack_resolver(mut self, rack_resolver: Arc<dyn RackResolver>) -> Self {
        self.rack_resolver = rack_resolver;
        self
    }

    pub fn scheduling_mode(&self) -> SchedulingMode {
        self.scheduling_mode
    }

    pub fn root_pool(&self) -> Arc<Pool> {
        self.root_pool.clone()
    }

    pub fn default_parallelism(&self) -> usize {
        self.backend.default_parallelism()
    }

    pub fn application_id(&self) -> String {
        self.backend.application_id()
    }

    pub fn application_attempt_id(&self) -> Option<String> {
        self.backend.application_attempt_id()
    }

    /// Start the backend and, when eligible, the speculation ticker. Must
    /// run inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.backend.start()?;
        if self.config.speculation_enabled && !self.backend.is_local() {
            info!("Starting speculative execution ticker");
            self.start_speculation_ticker();
        }
        Ok(())
    }

    /// Shut down timers and the backend. Status updates already holding the
    /// monitor finish first.
    pub fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.backend.stop()
    }

    /// Poll until the backend reports ready, checking every 100 ms.
    pub async fn wait_backend_ready(&self) {
        while !self.backend.is_ready() {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Admit a batch of tasks for one stage attempt. Fails without touching
    /// scheduler state when the stage already has a live task set with a
    /// different identity.
    pub fn submit_tasks(&self, task_set: TaskSet) -> Result<()> {
        info!(
            "Adding task set {} with {} tasks",
            task_set.id(),
            task_set.tasks.len()
        );
        let first_task_set = {
            let mut state = self.state.lock();
            if let Some(existing) = state
                .registry
                .conflicting_task_set(task_set.stage_id, &task_set.id())
            {
                return Err(TaskGridError::ConflictingTaskSet(format!(
                    "stage {} already has a live task set {}, refusing {}",
                    task_set.stage_id,
                    existing,
                    task_set.id()
                )));
            }

            let stage_id = task_set.stage_id;
            let stage_attempt_id = task_set.stage_attempt_id;
            let properties = task_set.properties.clone();
            let manager = self.factory.create(TaskSetContext {
                task_set,
                max_task_failures: self.config.max_task_failures,
                task_ids: self.task_ids.clone(),
            });
            state
                .registry
                .insert_task_set(stage_id, stage_attempt_id, manager.clone());
            self.builder.add_task_set_manager(manager, &properties);

            let first = !state.has_received_task;
            state.has_received_task = true;
            first
        };

        if first_task_set && !self.backend.is_local() {
            self.start_starvation_watchdog();
        }
        self.backend.revive_offers();
        Ok(())
    }

    /// Kill every running task of the stage and abort its managers. A stage
    /// with no known task sets is a no-op.
    pub fn cancel_tasks(&self, stage_id: usize, interrupt_thread: bool) {
        info!("Cancelling stage {}", stage_id);
        let (kills, managers) = {
            let state = self.state.lock();
            let managers = state.registry.stage_attempts(stage_id);
            let mut kills = Vec::new();
            for manager in &managers {
                for task_id in manager.running_tasks() {
                    if let Some(executor_id) = state.registry.executor_for_task(task_id) {
                        kills.push((task_id, executor_id));
                    }
                }
            }
            (kills, managers)
        };

        for (task_id, executor_id) in &kills {
            self.backend.kill_task(*task_id, executor_id, interrupt_thread);
        }

        if !managers.is_empty() {
            let _monitor = self.state.lock();
            let message = format!("Stage {} cancelled", stage_id);
            for manager in &managers {
                manager.abort(&message);
            }
        }
    }

    /// Drop a manager whose tasks have all completed. Idempotent.
    pub fn task_set_finished(&self, manager: &Arc<dyn TaskSetManager>) {
        let mut state = self.state.lock();
        self.task_set_finished_locked(&mut state, manager);
    }

    fn task_set_finished_locked(
        &self,
        state: &mut SchedulerState,
        manager: &Arc<dyn TaskSetManager>,
    ) {
        state
            .registry
            .remove_task_set(manager.stage_id(), manager.stage_attempt_id());
        self.root_pool.remove_task_set(&manager.name());
        info!("Removed {} whose tasks have all completed", manager.name());
    }

    /// Whether a terminal delivery just retired the manager's last attempt.
    fn task_set_done(manager: &Arc<dyn TaskSetManager>) -> bool {
        manager.is_zombie() && manager.running_task_count() == 0
    }

    /// One resource-offer round: register newly seen workers, shuffle the
    /// offers, and fill per-worker dispatch lists from the sorted task-set
    /// queue under the active placement policy.
    pub fn resource_offers(&self, offers: Vec<WorkerOffer>) -> Vec<Vec<TaskDescription>> {
        let mut state = self.state.lock();

        let mut new_executor_available = false;
        for offer in &offers {
            if !state.registry.is_executor_alive(&offer.executor_id) {
                let rack = self.rack_resolver.rack_for_host(&offer.host);
                let first_on_host =
                    state.registry.add_executor(&offer.executor_id, &offer.host, rack);
                if first_on_host {
                    self.planner.executor_added(&offer.executor_id, &offer.host);
                    new_executor_available = true;
                }
            }
        }

        // break ties across equally good workers fairly
        let mut shuffled = offers;
        shuffled.shuffle(&mut thread_rng());

        let sorted_task_sets = self.root_pool.sorted_task_set_queue();
        for manager in &sorted_task_sets {
            debug!(
                "Offering resources to {} ({} running)",
                manager.name(),
                manager.running_task_count()
            );
            if new_executor_available {
                manager.executor_added();
            }
        }

        let mut round = PlacementRound::new(&shuffled, self.config.cpus_per_task);
        if self.oracle.is_customize() {
            match self.oracle.mode() {
                PlacementMode::Ppa => {
                    'ppa: for manager in &sorted_task_sets {
                        for locality in manager.locality_levels() {
                            if !round.offer_ppa(
                                manager,
                                locality,
                                self.oracle.as_ref(),
                                &mut state.registry,
                                self.config.ppa_prefer_largest,
                            ) {
                                break 'ppa;
                            }
                        }
                    }
                }
                PlacementMode::Bpa => {
                    round.init_bins();
                    'bpa: for manager in &sorted_task_sets {
                        for locality in manager.locality_levels() {
                            if !round.offer_bpa(
                                manager,
                                locality,
                                self.oracle.as_ref(),
                                &mut state.registry,
                            ) {
                                break 'bpa;
                            }
                        }
                    }
                }
            }
        } else {
            for manager in &sorted_task_sets {
                round.offer_round_robin(manager, &mut state.registry);
            }
        }

        if round.launched_any() {
            state.has_launched_task = true;
        }
        round.finish()
    }

    /// Advance the lifecycle of one task. Terminal payloads are decoded off
    /// this call path; executor losses discovered here are reported to the
    /// planner after the monitor is released.
    pub fn status_update(&self, task_id: TaskId, task_state: TaskState, payload: Vec<u8>) {
        let mut failed_executor: Option<String> = None;
        let manager = {
            let mut state = self.state.lock();
            if task_state == TaskState::Lost {
                if let Some(executor_id) = state.registry.executor_for_task(task_id) {
                    if state.registry.is_executor_alive(&executor_id) {
                        self.remove_executor_locked(
                            &mut state,
                            &executor_id,
                            "a task running on it was lost",
                        );
                        failed_executor = Some(executor_id);
                    }
                }
            }

            let manager = state.registry.task_set_manager(task_id);
            if manager.is_some() && task_state.is_terminal() {
                state.registry.clear_task(task_id);
            }
            manager
        };

        match manager {
            Some(manager) if task_state == TaskState::Finished => {
                self.enqueue_successful_task(manager, task_id, payload);
            }
            Some(manager) if task_state.is_failure() => {
                self.enqueue_failed_task(manager, task_id, task_state, payload);
            }
            Some(_) => {}
            None => {
                info!(
                    "Ignoring update with state {} for task {}: its task set is gone \
                     (likely a duplicate terminal update)",
                    task_state, task_id
                );
            }
        }

        if let Some(executor_id) = failed_executor {
            self.planner.executor_lost(&executor_id);
            self.backend.revive_offers();
        }
    }

    /// Backend-reported loss of a worker.
    pub fn executor_lost(&self, executor_id: &str, reason: &str) {
        let known = {
            let mut state = self.state.lock();
            if state.registry.is_executor_alive(executor_id) {
                self.remove_executor_locked(&mut state, executor_id, reason);
                true
            } else {
                warn!(
                    "Ignoring loss of unknown executor {} ({})",
                    executor_id, reason
                );
                false
            }
        };
        if known {
            self.planner.executor_lost(executor_id);
            self.backend.revive_offers();
        }
    }

    /// Enrich heartbeat metric updates with their stage attempts and pass
    /// them on. Returns false when the block manager must re-register.
    pub fn executor_heartbeat_received(
        &self,
        executor_id: &str,
        updates: &[TaskMetricsUpdate],
        block_manager_id: &BlockManagerId,
    ) -> bool {
        let enriched: Vec<StageMetricsUpdate> = {
            let state = self.state.lock();
            updates
                .iter()
                .filter_map(|update| {
                    state.registry.task_set_manager(update.task_id).map(|manager| {
                        StageMetricsUpdate::new(
                            update,
                            manager.stage_id(),
                            manager.stage_attempt_id(),
                        )
                    })
                })
                .collect()
        };
        self.planner
            .executor_heartbeat_received(executor_id, &enriched, block_manager_id)
    }

    /// Report a scheduler-level error. With live task sets the error is
    /// delivered to each of them; with none it is fatal and propagates to
    /// the caller.
    pub fn error(&self, message: &str) -> Result<()> {
        let state = self.state.lock();
        let managers = state.registry.all_task_set_managers();
        if managers.is_empty() {
            error!("Exiting due to error from task scheduler: {}", message);
            return Err(TaskGridError::General(message.to_owned()));
        }
        error!("Task scheduler error: {}", message);
        for manager in managers {
            manager.abort(message);
        }
        Ok(())
    }

    fn remove_executor_locked(
        &self,
        state: &mut SchedulerState,
        executor_id: &str,
        reason: &str,
    ) {
        if let Some(host) = state.registry.remove_executor(executor_id) {
            warn!("Lost executor {} on {}: {}", executor_id, host, reason);
            self.root_pool.executor_lost(executor_id, &host);
        }
    }

    fn enqueue_successful_task(
        &self,
        manager: Arc<dyn TaskSetManager>,
        task_id: TaskId,
        payload: Vec<u8>,
    ) {
        let scheduler = self.clone();
        tokio::task::spawn(async move {
            match scheduler.decoder.decode_success(task_id, &payload).await {
                Ok(result) => {
                    let mut state = scheduler.state.lock();
                    manager.handle_successful_task(task_id, result);
                    if Self::task_set_done(&manager) {
                        scheduler.task_set_finished_locked(&mut state, &manager);
                    }
                }
                Err(e) => {
                    warn!("Failed to decode result of task {}: {}", task_id, e);
                    scheduler.deliver_failed_task(
                        manager,
                        task_id,
                        TaskState::Failed,
                        TaskFailedReason::TaskResultLost,
                    );
                }
            }
        });
    }

    fn enqueue_failed_task(
        &self,
        manager: Arc<dyn TaskSetManager>,
        task_id: TaskId,
        task_state: TaskState,
        payload: Vec<u8>,
    ) {
        let scheduler = self.clone();
        tokio::task::spawn(async move {
            let reason = scheduler
                .decoder
                .decode_failure(task_id, task_state, &payload)
                .await;
            scheduler.deliver_failed_task(manager, task_id, task_state, reason);
        });
    }

    fn deliver_failed_task(
        &self,
        manager: Arc<dyn TaskSetManager>,
        task_id: TaskId,
        task_state: TaskState,
        reason: TaskFailedReason,
    ) {
        {
            let mut state = self.state.lock();
            manager.handle_failed_task(task_id, task_state, reason);
            if Self::task_set_done(&manager) {
                self.task_set_finished_locked(&mut state, &manager);
            }
        }
        if !manager.is_zombie() && task_state != TaskState::Killed {
            self.backend.revive_offers();
        }
    }

    fn start_speculation_ticker(&self) {
        let scheduler = self.clone();
        let interval = Duration::from_millis(self.config.speculation_interval_ms);
        tokio::task::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if scheduler.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let should_revive = {
                    let _monitor = scheduler.state.lock();
                    scheduler.root_pool.check_speculatable_tasks()
                };
                if should_revive {
                    scheduler.backend.revive_offers();
                }
            }
        });
    }

    fn start_starvation_watchdog(&self) {
        let scheduler = self.clone();
        let timeout = Duration::from_millis(self.config.starvation_timeout_ms);
        tokio::task::spawn(async move {
            loop {
                tokio::time::sleep(timeout).await;
                if scheduler.stopped.load(Ordering::SeqCst) {
                    break;
                }
                if scheduler.state.lock().has_launched_task {
                    break;
                }
                warn!(
                    "Initial task set has not accepted any resources; check that workers \
                     are registered and offer sufficient capacity"
                );
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn has_launched_task(&self) -> bool {
        self.state.lock().has_launched_task
    }

    #[cfg(test)]
    pub(crate) fn tracked_task_ids(
        &self,
    ) -> (
        std::collections::HashSet<TaskId>,
        std::collections::HashSet<TaskId>,
    ) {
        self.state.lock().registry.tracked_task_ids()
    }

    #[cfg(test)]
    pub(crate) fn active_executor_ids(&self) -> std::collections::HashSet<String> {
        self.state.lock().registry.active_executor_ids()
    }

    #[cfg(test)]
    pub(crate) fn live_manager_count(&self, stage_id: usize) -> usize {
        self.state
            .lock()
            .registry
            .stage_attempts(stage_id)
            .iter()
            .filter(|m| !m.is_zombie())
            .count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{await_condition, test_task_set, SchedulerTest};
    use std::collections::HashSet;

    fn offers(workers: &[(&str, &str, u32)]) -> Vec<WorkerOffer> {
        workers
            .iter()
            .map(|(executor_id, host, cores)| WorkerOffer::new(*executor_id, *host, *cores))
            .collect()
    }

    #[tokio::test]
    async fn conflicting_admission_leaves_state_unchanged() {
        let test = SchedulerTest::new(SchedulerConfig::default());

        test.scheduler.submit_tasks(test_task_set(1, 0, 4)).unwrap();
        let err = test
            .scheduler
            .submit_tasks(test_task_set(1, 1, 4))
            .unwrap_err();
        assert!(matches!(err, TaskGridError::ConflictingTaskSet(_)));
        assert_eq!(test.scheduler.live_manager_count(1), 1);
        assert_eq!(test.factory.created().len(), 1);

        // once the live manager is a zombie, a new attempt is admitted
        test.factory.created()[0].abort("fetch failure");
        test.scheduler.submit_tasks(test_task_set(1, 1, 4)).unwrap();
        assert_eq!(test.scheduler.live_manager_count(1), 1);
    }

    #[tokio::test]
    async fn admission_revives_offers_and_dispatch_flips_launch_flag() {
        let test = SchedulerTest::new(SchedulerConfig::default());

        test.scheduler.submit_tasks(test_task_set(1, 0, 2)).unwrap();
        assert_eq!(test.backend.revive_count(), 1);
        assert!(!test.scheduler.has_launched_task());

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 4)]));
        assert_eq!(launched[0].len(), 2);
        assert!(test.scheduler.has_launched_task());
    }

    #[tokio::test]
    async fn first_seen_host_triggers_executor_added() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        test.scheduler.resource_offers(offers(&[
            ("exec-1", "host-1", 4),
            ("exec-2", "host-1", 4),
            ("exec-3", "host-2", 4),
        ]));

        let added = test.planner.added();
        assert_eq!(added.len(), 2);
        let hosts: HashSet<String> = added.iter().map(|(_, host)| host.clone()).collect();
        assert_eq!(hosts.len(), 2);

        // a manager was told about the new workers
        assert!(test.factory.created()[0].executor_added_count() > 0);

        // re-offering the same workers triggers nothing new
        test.scheduler
            .resource_offers(offers(&[("exec-1", "host-1", 4)]));
        assert_eq!(test.planner.added().len(), 2);
    }

    #[tokio::test]
    async fn cancel_kills_running_tasks_and_aborts_the_manager() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(7, 0, 10)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 3)]));
        let launched_ids: HashSet<TaskId> =
            launched.iter().flatten().map(|t| t.task_id).collect();
        assert_eq!(launched_ids.len(), 3);

        test.scheduler.cancel_tasks(7, false);

        let kills = test.backend.kills();
        assert_eq!(kills.len(), 3);
        for (task_id, executor_id, _) in &kills {
            assert!(launched_ids.contains(task_id));
            assert_eq!(executor_id, "exec-1");
        }
        assert!(test.factory.created()[0].is_zombie());

        // unknown stages are a no-op
        test.scheduler.cancel_tasks(42, false);
        assert_eq!(test.backend.kills().len(), 3);
    }

    #[tokio::test]
    async fn lost_task_purges_executor_and_notifies_planner_once() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 4)).unwrap();

        let launched = test.scheduler.resource_offers(offers(&[
            ("exec-x", "host-1", 2),
            ("exec-y", "host-2", 2),
        ]));
        let on_x: Vec<TaskId> = launched
            .iter()
            .flatten()
            .filter(|t| t.executor_id == "exec-x")
            .map(|t| t.task_id)
            .collect();
        assert!(!on_x.is_empty());
        let revives_before = test.backend.revive_count();

        test.scheduler.status_update(on_x[0], TaskState::Lost, vec![]);

        assert!(!test.scheduler.active_executor_ids().contains("exec-x"));
        assert_eq!(test.planner.lost(), vec!["exec-x".to_owned()]);
        assert!(test.backend.revive_count() > revives_before);

        // the manager re-queued every task that was on the lost worker
        let manager = &test.factory.created()[0];
        for task_id in &on_x {
            assert!(!manager.running_tasks().contains(task_id));
        }
    }

    #[tokio::test]
    async fn finished_task_reaches_the_manager_through_the_decoder() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 1)]));
        let task_id = launched[0][0].task_id;

        test.scheduler
            .status_update(task_id, TaskState::Finished, b"result".to_vec());

        let manager = test.factory.created()[0].clone();
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                manager.successful_tasks().len() == 1
            })
            .await
        );
        assert_eq!(manager.successful_tasks()[0].1.value, b"result".to_vec());

        // terminal bookkeeping dropped both per-task indexes
        let (by_set, by_exec) = test.scheduler.tracked_task_ids();
        assert!(by_set.is_empty());
        assert_eq!(by_set, by_exec);

        // the last success retired the task set from the registry and pool
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                test.scheduler.live_manager_count(1) == 0
                    && test.scheduler.root_pool().sorted_task_set_queue().is_empty()
            })
            .await
        );
    }

    #[tokio::test]
    async fn failed_task_is_retried_and_offers_are_revived() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 1)]));
        let task_id = launched[0][0].task_id;
        let revives_before = test.backend.revive_count();

        test.scheduler
            .status_update(task_id, TaskState::Failed, b"boom".to_vec());

        // offers are revived after the failure has reached the manager
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                test.backend.revive_count() > revives_before
            })
            .await
        );
        let manager = test.factory.created()[0].clone();
        assert_eq!(manager.failed_tasks().len(), 1);

        // the task went back to pending and the next round dispatches it again
        let relaunched =
            test.scheduler
                .resource_offers(offers(&[("exec-2", "host-2", 1)]));
        assert_eq!(relaunched[0].len(), 1);
        assert!(relaunched[0][0].task_id > task_id);
    }

    #[tokio::test]
    async fn exhausted_failure_budget_retires_the_task_set() {
        let config = SchedulerConfig::default().with_max_task_failures(1);
        let test = SchedulerTest::new(config);
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 1)]));
        let task_id = launched[0][0].task_id;

        test.scheduler
            .status_update(task_id, TaskState::Failed, b"boom".to_vec());

        // the manager aborted and, with nothing left running, was detached
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                test.scheduler.root_pool().sorted_task_set_queue().is_empty()
            })
            .await
        );
        assert!(test.factory.created()[0].is_zombie());
        assert_eq!(test.scheduler.live_manager_count(1), 0);
    }

    #[tokio::test]
    async fn killed_task_does_not_revive_offers() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 1)]));
        let task_id = launched[0][0].task_id;
        let revives_before = test.backend.revive_count();

        test.scheduler
            .status_update(task_id, TaskState::Killed, vec![]);

        let manager = test.factory.created()[0].clone();
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                manager.failed_tasks().len() == 1
            })
            .await
        );
        assert_eq!(test.backend.revive_count(), revives_before);
    }

    #[tokio::test]
    async fn duplicate_terminal_update_is_ignored() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 1)]));
        let task_id = launched[0][0].task_id;

        test.scheduler
            .status_update(task_id, TaskState::Finished, vec![]);
        // second terminal update finds no owning task set and is dropped
        test.scheduler
            .status_update(task_id, TaskState::Failed, vec![]);

        let manager = test.factory.created()[0].clone();
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                manager.successful_tasks().len() == 1
            })
            .await
        );
        assert!(manager.failed_tasks().is_empty());
    }

    #[tokio::test]
    async fn heartbeats_are_enriched_with_stage_attempts() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(3, 1, 1)).unwrap();

        let launched =
            test.scheduler
                .resource_offers(offers(&[("exec-1", "host-1", 1)]));
        let task_id = launched[0][0].task_id;

        let updates = vec![
            TaskMetricsUpdate {
                task_id,
                metrics: vec![1, 2, 3],
            },
            // unknown tasks are filtered out
            TaskMetricsUpdate {
                task_id: 999,
                metrics: vec![],
            },
        ];
        let block_manager = BlockManagerId {
            executor_id: "exec-1".to_owned(),
            host: "host-1".to_owned(),
            port: 7077,
        };
        assert!(test.scheduler.executor_heartbeat_received(
            "exec-1",
            &updates,
            &block_manager
        ));

        let heartbeats = test.planner.heartbeats();
        assert_eq!(heartbeats.len(), 1);
        let (executor_id, forwarded) = &heartbeats[0];
        assert_eq!(executor_id, "exec-1");
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].stage_id, 3);
        assert_eq!(forwarded[0].stage_attempt_id, 1);
    }

    #[tokio::test]
    async fn error_with_no_task_sets_is_fatal() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        assert!(test.scheduler.error("backend unreachable").is_err());

        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();
        assert!(test.scheduler.error("backend unreachable").is_ok());
        assert!(test.factory.created()[0].is_zombie());
    }

    #[tokio::test]
    async fn task_set_finished_detaches_manager_idempotently() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let manager: Arc<dyn TaskSetManager> = test.factory.created()[0].clone();
        test.scheduler.task_set_finished(&manager);
        test.scheduler.task_set_finished(&manager);

        assert_eq!(test.scheduler.live_manager_count(1), 0);
        assert!(test.scheduler.root_pool().sorted_task_set_queue().is_empty());

        // a finished stage can be resubmitted
        test.scheduler.submit_tasks(test_task_set(1, 1, 1)).unwrap();
        assert_eq!(test.scheduler.live_manager_count(1), 1);
    }

    #[tokio::test]
    async fn speculation_ticker_revives_offers() {
        let config = SchedulerConfig::default()
            .with_speculation_enabled(true)
            .with_speculation_interval_ms(10);
        let test = SchedulerTest::new(config);
        test.scheduler.submit_tasks(test_task_set(1, 0, 2)).unwrap();
        test.factory.created()[0].set_speculatable(true);

        test.scheduler.start().unwrap();
        let revives_before = test.backend.revive_count();
        assert!(
            await_condition(Duration::from_millis(10), 100, || {
                test.backend.revive_count() > revives_before
            })
            .await
        );
        test.scheduler.stop().unwrap();
    }

    #[tokio::test]
    async fn ppa_round_through_the_scheduler_facade() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.oracle.set_customize(Some(PlacementMode::Ppa));
        test.oracle.set_demand(0, 80);
        test.oracle.set_demand(1, 40);
        test.scheduler.submit_tasks(test_task_set(1, 0, 2)).unwrap();

        let launched = test.scheduler.resource_offers(offers(&[
            ("exec-1", "host-1", 100),
            ("exec-2", "host-2", 60),
        ]));

        let mut placements: Vec<(TaskId, String)> = launched
            .iter()
            .flatten()
            .map(|t| (t.task_id, t.executor_id.clone()))
            .collect();
        placements.sort();
        assert_eq!(
            placements,
            vec![(0, "exec-1".to_owned()), (1, "exec-2".to_owned())]
        );
    }

    #[tokio::test]
    async fn bpa_round_through_the_scheduler_facade() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.oracle.set_customize(Some(PlacementMode::Bpa));
        test.oracle.set_demand(0, 70);
        test.scheduler.submit_tasks(test_task_set(1, 0, 1)).unwrap();

        let launched = test.scheduler.resource_offers(offers(&[
            ("exec-1", "host-1", 100),
        ]));
        assert_eq!(launched[0].len(), 1);

        let manager = &test.factory.created()[0];
        assert_eq!(
            manager.bound_executor(launched[0][0].task_id),
            Some("exec-1".to_owned())
        );
    }

    #[tokio::test]
    async fn stopped_scheduler_stops_backend() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        test.scheduler.start().unwrap();
        test.scheduler.wait_backend_ready().await;
        test.scheduler.stop().unwrap();
        assert!(test.backend.is_stopped());
    }

    #[tokio::test]
    async fn oracle_can_override_the_scheduling_mode() {
        let test = SchedulerTest::new(SchedulerConfig::default());
        assert_eq!(test.scheduler.scheduling_mode(), SchedulingMode::Fifo);

        let overriding = SchedulerTest::with_mode_override(
            SchedulerConfig::default(),
            SchedulingMode::Fair,
        );
        assert_eq!(overriding.scheduler.scheduling_mode(), SchedulingMode::Fair);
    }
}
