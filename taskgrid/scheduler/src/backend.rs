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

//! Contract of the worker-facing backend.

use taskgrid_core::error::Result;
use taskgrid_core::task::TaskId;
use uuid::Uuid;

/// The worker-facing side of the system: it transports launch decisions to
/// workers, emits resource offers back into the scheduler, and kills tasks
/// on request.
///
/// The backend may hold its own lock while calling into the scheduler, so
/// the scheduler never calls any of these methods while holding its
/// monitor. `revive_offers` and `kill_task` are fire-and-forget requests
/// and must not block on scheduler state.
pub trait SchedulerBackend: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Whether the backend is ready to accept launch decisions
    fn is_ready(&self) -> bool;

    /// Ask the backend to emit a fresh offer round. Asynchronous.
    fn revive_offers(&self);

    /// Kill a single running task attempt on the given worker.
    fn kill_task(&self, task_id: TaskId, executor_id: &str, interrupt_thread: bool);

    /// Suggested parallelism for upstream planners
    fn default_parallelism(&self) -> usize;

    /// Whether this backend runs workers inside the scheduler process.
    /// Local backends get no starvation watchdog and no speculation ticker.
    fn is_local(&self) -> bool {
        false
    }

    fn application_id(&self) -> String {
        format!("taskgrid-application-{}", Uuid::new_v4())
    }

    fn application_attempt_id(&self) -> Option<String> {
        None
    }
}

/// Maps hosts onto racks for RACK_LOCAL placement. Deployments without rack
/// topology use [`NoRackResolver`].
pub trait RackResolver: Send + Sync {
    fn rack_for_host(&self, host: &str) -> Option<String>;
}

/// Default resolver for single-rack deployments.
#[derive(Debug, Default)]
pub struct NoRackResolver;

impl RackResolver for NoRackResolver {
    fn rack_for_host(&self, _host: &str) -> Option<String> {
        None
    }
}
