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
//

//! TaskGrid scheduler specific configuration

use taskgrid_core::config::SchedulingMode;

/// Configurations for the TaskGrid scheduler of scheduling task sets and tasks
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    /// The ordering applied to the scheduling pool
    pub scheduling_mode: SchedulingMode,
    /// Capacity units consumed by one task under the default placement policy
    pub cpus_per_task: u32,
    /// How many times a single task may fail before its task set is aborted
    pub max_task_failures: usize,
    /// Whether speculative re-execution of slow tasks is enabled
    pub speculation_enabled: bool,
    /// How often the root pool is asked for speculatable tasks, in milliseconds
    pub speculation_interval_ms: u64,
    /// How long the first submitted task set may go without a launch before a
    /// starvation warning is logged, in milliseconds
    pub starvation_timeout_ms: u64,
    /// Under PPA, pick the buffered task with the largest predicted demand
    /// instead of the oldest one
    pub ppa_prefer_largest: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduling_mode: SchedulingMode::Fifo,
            cpus_per_task: 1,
            max_task_failures: 4,
            speculation_enabled: false,
            speculation_interval_ms: 100,
            starvation_timeout_ms: 15000,
            ppa_prefer_largest: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_scheduling_mode(mut self, mode: SchedulingMode) -> Self {
        self.scheduling_mode = mode;
        self
    }

    pub fn with_cpus_per_task(mut self, cpus: u32) -> Self {
        self.cpus_per_task = cpus;
        self
    }

    pub fn with_max_task_failures(mut self, max_task_failures: usize) -> Self {
        self.max_task_failures = max_task_failures;
        self
    }

    pub fn with_speculation_enabled(mut self, enabled: bool) -> Self {
        self.speculation_enabled = enabled;
        self
    }

    pub fn with_speculation_interval_ms(mut self, interval_ms: u64) -> Self {
        self.speculation_interval_ms = interval_ms;
        self
    }

    pub fn with_starvation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.starvation_timeout_ms = timeout_ms;
        self
    }

    pub fn with_ppa_prefer_largest(mut self, prefer_largest: bool) -> Self {
        self.ppa_prefer_largest = prefer_largest;
        self
    }
}
