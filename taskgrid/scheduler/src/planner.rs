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

//! Contracts of the upstream stage planner and the result decoder.

use async_trait::async_trait;
use taskgrid_core::error::Result;
use taskgrid_core::task::{
    BlockManagerId, TaskFailedReason, TaskId, TaskMetricsUpdate, TaskResult, TaskState,
};

/// A heartbeat metric update enriched with the stage attempt it belongs to.
#[derive(Debug, Clone)]
pub struct StageMetricsUpdate {
    pub task_id: TaskId,
    pub stage_id: usize,
    pub stage_attempt_id: usize,
    pub metrics: Vec<u8>,
}

impl StageMetricsUpdate {
    pub fn new(update: &TaskMetricsUpdate, stage_id: usize, stage_attempt_id: usize) -> Self {
        Self {
            task_id: update.task_id,
            stage_id,
            stage_attempt_id,
            metrics: update.metrics.clone(),
        }
    }
}

/// Upcall surface of the stage planner.
///
/// These methods are event notifications: implementations should record or
/// enqueue and return promptly, and must not call back into the scheduler
/// synchronously. `executor_added` may be invoked while the scheduler
/// monitor is held.
pub trait StagePlanner: Send + Sync {
    fn executor_added(&self, executor_id: &str, host: &str);

    fn executor_lost(&self, executor_id: &str);

    /// Returns false when the reporting block manager is unknown and must
    /// re-register.
    fn executor_heartbeat_received(
        &self,
        executor_id: &str,
        updates: &[StageMetricsUpdate],
        block_manager_id: &BlockManagerId,
    ) -> bool;
}

/// Decodes terminal task payloads off the scheduler's critical path. A
/// successful decode may require fetching an indirect result from a remote
/// block store, hence the async contract.
#[async_trait]
pub trait TaskResultDecoder: Send + Sync {
    async fn decode_success(&self, task_id: TaskId, payload: &[u8]) -> Result<TaskResult>;

    async fn decode_failure(
        &self,
        task_id: TaskId,
        state: TaskState,
        payload: &[u8],
    ) -> TaskFailedReason;
}
