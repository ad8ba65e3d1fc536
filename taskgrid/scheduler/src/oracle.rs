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

//! Contract of the CPU-demand prediction service.

use taskgrid_core::config::SchedulingMode;
use taskgrid_core::task::TaskId;

/// Placement policy selected by the oracle when custom scheduling is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    Ppa,
    Bpa,
}

/// Supplies per-task CPU demand predictions and optionally overrides the
/// scheduling mode and placement policy. Passed into the scheduler at
/// construction; implementations must be thread-safe.
pub trait PredictionOracle: Send + Sync {
    /// Whether a prediction-driven placement policy is active
    fn is_customize(&self) -> bool;

    /// Which prediction-driven policy to run when [`is_customize`] is true
    ///
    /// [`is_customize`]: Self::is_customize
    fn mode(&self) -> PlacementMode;

    /// Predicted CPU demand of a task in 1/100-worker units, where 100 is a
    /// whole worker
    fn cpu_core(&self, task_id: TaskId) -> u32;

    /// Record that `task_id` could only be given `residual` units, so its
    /// future estimate must be downgraded accordingly
    fn re_prediction(&self, task_id: TaskId, residual: u32);

    /// Opportunity to override the configured scheduling mode. Consulted
    /// once when the scheduler is constructed.
    fn scheduling_mode(&self, current: SchedulingMode) -> SchedulingMode {
        current
    }
}

/// Oracle for deployments without a prediction service: the default policy
/// applies and every task is assumed to need one whole worker.
#[derive(Debug, Default)]
pub struct NoPredictionOracle;

impl PredictionOracle for NoPredictionOracle {
    fn is_customize(&self) -> bool {
        false
    }

    fn mode(&self) -> PlacementMode {
        PlacementMode::Ppa
    }

    fn cpu_core(&self, _task_id: TaskId) -> u32 {
        taskgrid_core::task::CORES_PER_WORKER
    }

    fn re_prediction(&self, _task_id: TaskId, _residual: u32) {}
}
