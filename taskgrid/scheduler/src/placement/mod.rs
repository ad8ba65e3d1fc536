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

//! The placement engine: consumes the sorted task-set queue for one
//! resource-offer round and fills a per-worker dispatch list under one of
//! the placement policies.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, error};

use taskgrid_core::task::{
    Locality, PendingTask, TaskDescription, WorkerOffer, CORES_PER_WORKER,
};

use crate::oracle::PredictionOracle;
use crate::registry::TaskRegistry;
use crate::task_set::TaskSetManager;

/// Workers at or below this residual hold running work and take small
/// tasks; above it (but below a whole worker) they are "extra" capacity.
const BIN_SPLIT_CORES: u32 = CORES_PER_WORKER / 2;

/// Scratch state for a single resource-offer round.
///
/// `tasks[i]` is the growing dispatch list for worker `i` and
/// `available_cpus[i]` its residual capacity; both are indexed by the
/// (already shuffled) offer order. The drain buffers and the BPA bins live
/// here too, so nothing leaks across rounds.
pub struct PlacementRound<'a> {
    offers: &'a [WorkerOffer],
    cpus_per_task: u32,
    tasks: Vec<Vec<TaskDescription>>,
    available_cpus: Vec<u32>,
    // drained dispatch decisions not yet bound to a worker, each paired
    // with its owning manager at the same index
    all_tasks: Vec<PendingTask>,
    all_tasksets: Vec<Arc<dyn TaskSetManager>>,
    free_machines: VecDeque<usize>,
    active_machines: VecDeque<usize>,
    extra_machines: VecDeque<usize>,
    launched_any: bool,
}

impl<'a> PlacementRound<'a> {
    pub fn new(offers: &'a [WorkerOffer], cpus_per_task: u32) -> Self {
        Self {
            offers,
            cpus_per_task,
            tasks: offers.iter().map(|_| Vec::new()).collect(),
            available_cpus: offers.iter().map(|o| o.cores).collect(),
            all_tasks: Vec::new(),
            all_tasksets: Vec::new(),
            free_machines: VecDeque::new(),
            active_machines: VecDeque::new(),
            extra_machines: VecDeque::new(),
            launched_any: false,
        }
    }

    pub fn launched_any(&self) -> bool {
        self.launched_any
    }

    pub fn residual(&self, worker: usize) -> u32 {
        self.available_cpus[worker]
    }

    /// Hand the per-worker dispatch lists back to the caller. Drained tasks
    /// no worker could take this round go back to their managers for the
    /// next one.
    pub fn finish(mut self) -> Vec<Vec<TaskDescription>> {
        if !self.all_tasks.is_empty() {
            debug!(
                "Returning {} drained tasks that no worker could take this round",
                self.all_tasks.len()
            );
            // pop from the back so managers see their original order again
            while let (Some(pending), Some(manager)) =
                (self.all_tasks.pop(), self.all_tasksets.pop())
            {
                manager.return_task(pending);
            }
        }
        self.tasks
    }

    /// Default policy: round-robin across workers, walking the task set's
    /// locality levels from best to worst. Serialization failures abort the
    /// task set for this round only.
    pub fn offer_round_robin(
        &mut self,
        manager: &Arc<dyn TaskSetManager>,
        registry: &mut TaskRegistry,
    ) {
        for locality in manager.locality_levels() {
            loop {
                match self.round_robin_pass(manager, locality, registry) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!(
                            "Failed to place tasks from {}, skipping it for this round: {}",
                            manager.name(),
                            e
                        );
                        return;
                    }
                }
            }
        }
    }

    /// One scan over all workers at one locality level. Returns whether any
    /// dispatch was produced, which tells the caller to scan again.
    fn round_robin_pass(
        &mut self,
        manager: &Arc<dyn TaskSetManager>,
        locality: Locality,
        registry: &mut TaskRegistry,
    ) -> taskgrid_core::error::Result<bool> {
        let mut launched = false;
        for worker in 0..self.offers.len() {
            if self.available_cpus[worker] < self.cpus_per_task {
                continue;
            }
            let offer = &self.offers[worker];
            if let Some(description) =
                manager.resource_offer(&offer.executor_id, &offer.host, locality)?
            {
                registry.record_dispatch(
                    description.task_id,
                    manager.clone(),
                    &offer.executor_id,
                );
                self.available_cpus[worker] -= self.cpus_per_task;
                self.tasks[worker].push(description);
                self.launched_any = true;
                launched = true;
            }
        }
        Ok(launched)
    }

    /// Move every dispatchable task of the manager at this locality into the
    /// drain buffers, keeping `all_tasks` and `all_tasksets` in lockstep.
    fn drain(&mut self, manager: &Arc<dyn TaskSetManager>, locality: Locality) {
        loop {
            match manager.dequeue_task(locality) {
                Ok(Some(pending)) => {
                    self.all_tasks.push(pending);
                    self.all_tasksets.push(manager.clone());
                }
                Ok(None) => break,
                Err(e) => {
                    error!(
                        "Failed to serialize a task from {}, skipping it for this round: {}",
                        manager.name(),
                        e
                    );
                    break;
                }
            }
        }
        debug_assert_eq!(self.all_tasks.len(), self.all_tasksets.len());
    }

    /// Bind the buffered task at `slot` to `worker` and dispatch it.
    fn dispatch_buffered(
        &mut self,
        slot: usize,
        worker: usize,
        oracle: &dyn PredictionOracle,
        registry: &mut TaskRegistry,
    ) {
        let pending = self.all_tasks.remove(slot);
        let manager = self.all_tasksets.remove(slot);

        // re-query the demand: a re-prediction issued just before this call
        // caps the decrement at the fallback worker's residual
        let consume = oracle.cpu_core(pending.task_id);
        self.available_cpus[worker] = self.available_cpus[worker].saturating_sub(consume);

        let executor_id = self.offers[worker].executor_id.clone();
        manager.task_launched(pending.task_id, &executor_id);
        registry.record_dispatch(pending.task_id, manager, &executor_id);
        self.tasks[worker].push(pending.bind(executor_id));
        self.launched_any = true;
    }

    /// Priority placement: drain the task set at this locality, then place
    /// each buffered task on the worker that leaves the least residual.
    /// When no worker fits a task it is forced onto the roomiest worker and
    /// the oracle is told to downgrade its estimate to that residual.
    ///
    /// Returns false when total capacity is exhausted, which ends the
    /// policy round.
    pub fn offer_ppa(
        &mut self,
        manager: &Arc<dyn TaskSetManager>,
        locality: Locality,
        oracle: &dyn PredictionOracle,
        registry: &mut TaskRegistry,
        prefer_largest: bool,
    ) -> bool {
        self.drain(manager, locality);

        while !self.all_tasks.is_empty() {
            let slot = if prefer_largest {
                (0..self.all_tasks.len())
                    .max_by_key(|&i| oracle.cpu_core(self.all_tasks[i].task_id))
                    .unwrap_or(0)
            } else {
                0
            };
            let task_id = self.all_tasks[slot].task_id;
            let consume = oracle.cpu_core(task_id);

            let mut max_idx = 0;
            let mut max_left = 0;
            // (worker, residual - consume), minimized over fitting workers
            let mut select: Option<(usize, u32)> = None;
            for worker in 0..self.offers.len() {
                let residual = self.available_cpus[worker];
                if residual > max_left {
                    max_left = residual;
                    max_idx = worker;
                }
                if residual >= consume {
                    let left = residual - consume;
                    match select {
                        Some((_, best)) if left >= best => {}
                        _ => select = Some((worker, left)),
                    }
                }
            }

            match select {
                Some((worker, _)) => self.dispatch_buffered(slot, worker, oracle, registry),
                None if max_left == 0 => return false,
                None => {
                    oracle.re_prediction(task_id, max_left);
                    self.dispatch_buffered(slot, max_idx, oracle, registry);
                }
            }
        }
        true
    }

    /// Partition workers by residual before the first BPA call of a round.
    /// Bins are deliberately not recomputed as residuals shrink;
    /// reclassification happens only at the explicit pop/push points of the
    /// selection rules.
    pub fn init_bins(&mut self) {
        for worker in 0..self.offers.len() {
            let residual = self.available_cpus[worker];
            if residual >= CORES_PER_WORKER {
                self.free_machines.push_back(worker);
            } else if residual > BIN_SPLIT_CORES {
                self.extra_machines.push_back(worker);
            } else if residual > 0 {
                self.active_machines.push_back(worker);
            }
        }
    }

    /// Bin placement: large tasks take a free machine (moving it to the
    /// active bin) or scan the extra bin; small tasks walk the bin heads.
    /// Returns false when no bin can take the head task, which ends the
    /// policy round after a final re-prediction.
    pub fn offer_bpa(
        &mut self,
        manager: &Arc<dyn TaskSetManager>,
        locality: Locality,
        oracle: &dyn PredictionOracle,
        registry: &mut TaskRegistry,
    ) -> bool {
        self.drain(manager, locality);

        while !self.all_tasks.is_empty() {
            let task_id = self.all_tasks[0].task_id;
            let consume = oracle.cpu_core(task_id);

            let select = if consume > BIN_SPLIT_CORES {
                self.select_bpa_large(consume)
            } else {
                self.select_bpa_small(consume)
            };

            match select {
                Some(worker) => self.dispatch_buffered(0, worker, oracle, registry),
                None => {
                    let residual = self
                        .extra_machines
                        .front()
                        .or_else(|| self.active_machines.front())
                        .map(|&worker| self.available_cpus[worker])
                        .unwrap_or(0);
                    oracle.re_prediction(task_id, residual);
                    return false;
                }
            }
        }
        true
    }

    fn select_bpa_large(&mut self, consume: u32) -> Option<usize> {
        if let Some(worker) = self.free_machines.pop_front() {
            self.active_machines.push_back(worker);
            return Some(worker);
        }
        self.extra_machines
            .iter()
            .copied()
            .find(|&worker| self.available_cpus[worker] >= consume)
    }

    fn select_bpa_small(&mut self, consume: u32) -> Option<usize> {
        if let Some(&head) = self.active_machines.front() {
            if self.available_cpus[head] >= consume {
                return Some(head);
            }
        }
        // the active head (if any) cannot take this task; retire it
        self.active_machines.pop_front();

        if let Some(&head) = self.extra_machines.front() {
            if self.available_cpus[head] >= consume {
                return Some(head);
            }
            self.extra_machines.pop_front();
        }
        if let Some(&head) = self.extra_machines.front() {
            if self.available_cpus[head] >= consume {
                return Some(head);
            }
            self.extra_machines.pop_front();
        }
        if let Some(worker) = self.free_machines.pop_front() {
            self.extra_machines.push_back(worker);
            return Some(worker);
        }
        None
    }

    #[cfg(test)]
    fn bins(&self) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
        (
            self.free_machines.iter().copied().collect(),
            self.active_machines.iter().copied().collect(),
            self.extra_machines.iter().copied().collect(),
        )
    }
}
