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

//! Task sets, dispatch decisions, worker offers and task lifecycle states.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Globally unique task attempt id, allocated by [`TaskIdGenerator`].
pub type TaskId = u64;

/// Number of capacity units reported by a fully idle worker. Worker cores
/// are integer capacity units in units of 1/100 of a worker.
pub const CORES_PER_WORKER: u32 = 100;

/// Allocates monotonic task ids from a single atomic counter. One generator
/// is shared between the scheduler and every task set manager it creates.
#[derive(Debug, Default)]
pub struct TaskIdGenerator(AtomicU64);

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next_id(&self) -> TaskId {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Ordered locality preference for co-locating a task with its input data.
/// Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Locality {
    ProcessLocal,
    NodeLocal,
    NoPref,
    RackLocal,
    Any,
}

impl Locality {
    /// All levels in ascending (best first) order.
    pub const ALL: [Locality; 5] = [
        Locality::ProcessLocal,
        Locality::NodeLocal,
        Locality::NoPref,
        Locality::RackLocal,
        Locality::Any,
    ];
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Locality::ProcessLocal => "PROCESS_LOCAL",
            Locality::NodeLocal => "NODE_LOCAL",
            Locality::NoPref => "NO_PREF",
            Locality::RackLocal => "RACK_LOCAL",
            Locality::Any => "ANY",
        };
        write!(f, "{}", name)
    }
}

/// One unit of work within a task set.
#[derive(Debug, Clone)]
pub struct Task {
    /// Index of this task within its task set
    pub index: usize,
    /// Hosts holding this task's input data, best first. Empty means no
    /// preference.
    pub preferred_hosts: Vec<String>,
    /// Opaque serialized task closure
    pub payload: Vec<u8>,
}

impl Task {
    pub fn new(index: usize, payload: Vec<u8>) -> Self {
        Self {
            index,
            preferred_hosts: vec![],
            payload,
        }
    }

    pub fn with_preferred_hosts(mut self, hosts: Vec<String>) -> Self {
        self.preferred_hosts = hosts;
        self
    }
}

/// An immutable batch of tasks belonging to one stage attempt.
#[derive(Debug, Clone)]
pub struct TaskSet {
    pub stage_id: usize,
    pub stage_attempt_id: usize,
    pub tasks: Vec<Task>,
    /// Job-level priority used by FIFO ordering, lower runs first
    pub priority: usize,
    /// Scheduling properties, e.g. the pool name
    pub properties: HashMap<String, String>,
    /// Ordered locality levels this task set will accept
    pub locality_levels: Vec<Locality>,
}

impl TaskSet {
    pub fn new(stage_id: usize, stage_attempt_id: usize, tasks: Vec<Task>) -> Self {
        Self {
            stage_id,
            stage_attempt_id,
            tasks,
            priority: 0,
            properties: HashMap::new(),
            locality_levels: Locality::ALL.to_vec(),
        }
    }

    pub fn with_priority(mut self, priority: usize) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_locality_levels(mut self, levels: Vec<Locality>) -> Self {
        self.locality_levels = levels;
        self
    }

    /// Identity of this task set, unique per stage attempt.
    pub fn id(&self) -> String {
        format!("TaskSet_{}.{}", self.stage_id, self.stage_attempt_id)
    }
}

/// A dispatch decision: run task `task_id` on worker `executor_id`.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub executor_id: String,
    pub name: String,
    pub serialized_task: Vec<u8>,
}

/// A dispatch decision that has not yet been bound to a worker. Produced
/// when a policy drains tasks from a manager before deciding placement.
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub task_id: TaskId,
    pub name: String,
    pub serialized_task: Vec<u8>,
}

impl PendingTask {
    /// Bind the chosen worker, producing the final dispatch decision.
    pub fn bind(self, executor_id: String) -> TaskDescription {
        TaskDescription {
            task_id: self.task_id,
            executor_id,
            name: self.name,
            serialized_task: self.serialized_task,
        }
    }
}

/// Free resources offered by one worker for a single scheduling round.
#[derive(Debug, Clone)]
pub struct WorkerOffer {
    pub executor_id: String,
    pub host: String,
    /// Free capacity in 1/100-worker units; a fully idle worker offers 100
    pub cores: u32,
}

impl WorkerOffer {
    pub fn new(executor_id: impl Into<String>, host: impl Into<String>, cores: u32) -> Self {
        Self {
            executor_id: executor_id.into(),
            host: host.into(),
            cores,
        }
    }
}

/// Lifecycle state reported for a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Launching,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Killed | TaskState::Lost)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TaskState::Launching => "LAUNCHING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
        };
        write!(f, "{}", name)
    }
}

/// A decoded successful task result.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub value: Vec<u8>,
}

/// Decoded reason for a task reaching a failure state.
#[derive(Debug, Clone)]
pub enum TaskFailedReason {
    /// The task raised an error on the worker
    ExceptionFailure(String),
    /// The task was killed intentionally and needs no re-queue
    TaskKilled(String),
    /// The worker running the task was lost
    ExecutorLost { executor_id: String, reason: String },
    /// The result payload was lost before it could be fetched
    TaskResultLost,
}

impl TaskFailedReason {
    /// Whether the failure counts towards the task set's failure budget.
    pub fn countable(&self) -> bool {
        !matches!(self, TaskFailedReason::TaskKilled(_))
    }
}

impl fmt::Display for TaskFailedReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskFailedReason::ExceptionFailure(msg) => {
                write!(f, "task failed on worker: {}", msg)
            }
            TaskFailedReason::TaskKilled(msg) => write!(f, "task killed: {}", msg),
            TaskFailedReason::ExecutorLost { executor_id, reason } => {
                write!(f, "executor {} lost: {}", executor_id, reason)
            }
            TaskFailedReason::TaskResultLost => write!(f, "task result lost"),
        }
    }
}

/// Identity of a worker-side block manager, reported with heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockManagerId {
    pub executor_id: String,
    pub host: String,
    pub port: u16,
}

/// Per-task metric payload carried by an executor heartbeat.
#[derive(Debug, Clone)]
pub struct TaskMetricsUpdate {
    pub task_id: TaskId,
    /// Opaque accumulator snapshot, decoded by the stage planner
    pub metrics: Vec<u8>,
}
