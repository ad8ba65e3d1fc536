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

//! Contract of the per-task-set manager.

use std::sync::Arc;

use taskgrid_core::error::Result;
use taskgrid_core::task::{
    Locality, PendingTask, TaskDescription, TaskFailedReason, TaskId, TaskIdGenerator,
    TaskResult, TaskSet, TaskState,
};

/// Owns one task set: hands out dispatch decisions, tracks running and
/// finished attempts, and applies the retry policy when attempts fail.
///
/// Managers are created by the scheduler through a [`TaskSetManagerFactory`]
/// and shared by reference with the stage planner, but they are only ever
/// mutated while the scheduler monitor is held.
pub trait TaskSetManager: Send + Sync {
    fn task_set(&self) -> &TaskSet;

    fn name(&self) -> String {
        self.task_set().id()
    }

    fn stage_id(&self) -> usize {
        self.task_set().stage_id
    }

    fn stage_attempt_id(&self) -> usize {
        self.task_set().stage_attempt_id
    }

    /// FIFO ordering input, lower runs first
    fn priority(&self) -> usize {
        self.task_set().priority
    }

    /// Locality levels this task set will accept, best first
    fn locality_levels(&self) -> Vec<Locality> {
        self.task_set().locality_levels.clone()
    }

    /// Produce a dispatch decision for the given worker at the given
    /// locality, or `None` when no task of this set fits that slot.
    ///
    /// An `Err` means a task could not be serialized; the caller skips this
    /// task set for the rest of the offer round and retries on the next.
    fn resource_offer(
        &self,
        executor_id: &str,
        host: &str,
        locality: Locality,
    ) -> Result<Option<TaskDescription>>;

    /// Produce the next dispatchable task at the given locality without
    /// binding it to a worker. Demand-driven policies either place it later
    /// and confirm the chosen worker through [`task_launched`], or hand it
    /// back through [`return_task`] when the round ends before placement.
    ///
    /// [`task_launched`]: Self::task_launched
    /// [`return_task`]: Self::return_task
    fn dequeue_task(&self, locality: Locality) -> Result<Option<PendingTask>>;

    /// Confirm the worker a previously dequeued task was placed on.
    fn task_launched(&self, task_id: TaskId, executor_id: &str);

    /// Take back a dequeued task that no worker could accept this round so
    /// it is offered again on the next one.
    fn return_task(&self, pending: PendingTask);

    /// Task ids of all attempts currently believed to be running
    fn running_tasks(&self) -> Vec<TaskId>;

    fn running_task_count(&self) -> usize {
        self.running_tasks().len()
    }

    /// FAIR ordering input
    fn weight(&self) -> usize {
        1
    }

    /// FAIR ordering input
    fn min_share(&self) -> usize {
        0
    }

    /// CPU ordering input: aggregate predicted demand of the not-yet-started
    /// tasks of this set
    fn cpu_demand(&self) -> u32 {
        0
    }

    fn handle_successful_task(&self, task_id: TaskId, result: TaskResult);

    fn handle_failed_task(&self, task_id: TaskId, state: TaskState, reason: TaskFailedReason);

    /// Called when a new worker became available since the last offer round
    fn executor_added(&self);

    /// Called when a worker was lost so attempts placed on it can be
    /// re-queued
    fn executor_lost(&self, executor_id: &str, host: &str);

    /// Whether any running task should be speculatively re-executed
    fn check_speculatable_tasks(&self) -> bool;

    /// A zombie manager must not be offered resources but may still receive
    /// status updates for attempts already in flight.
    fn is_zombie(&self) -> bool;

    fn abort(&self, message: &str);
}

/// Everything a factory needs to build a manager for a newly admitted task
/// set. The id generator is shared so task ids stay globally monotonic.
pub struct TaskSetContext {
    pub task_set: TaskSet,
    pub max_task_failures: usize,
    pub task_ids: Arc<TaskIdGenerator>,
}

/// Creates a manager per admitted task set.
pub trait TaskSetManagerFactory: Send + Sync {
    fn create(&self, ctx: TaskSetContext) -> Arc<dyn TaskSetManager>;
}
