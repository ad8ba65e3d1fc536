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

//! The scheduling pool: a tree of schedulable nodes producing the sorted
//! task-set queue consumed by the placement engine.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use taskgrid_core::config::{SchedulingMode, SCHEDULER_POOL_PROPERTY};

use crate::task_set::TaskSetManager;

pub const DEFAULT_POOL_NAME: &str = "default";
pub const ROOT_POOL_NAME: &str = "root";

/// A node in the scheduling tree: either a nested pool or a task set.
#[derive(Clone)]
pub enum SchedulableNode {
    Pool(Arc<Pool>),
    TaskSet(Arc<dyn TaskSetManager>),
}

impl SchedulableNode {
    pub fn name(&self) -> String {
        match self {
            SchedulableNode::Pool(pool) => pool.name().to_owned(),
            SchedulableNode::TaskSet(manager) => manager.name(),
        }
    }

    fn weight(&self) -> usize {
        match self {
            SchedulableNode::Pool(pool) => pool.weight,
            SchedulableNode::TaskSet(manager) => manager.weight(),
        }
    }

    fn min_share(&self) -> usize {
        match self {
            SchedulableNode::Pool(pool) => pool.min_share,
            SchedulableNode::TaskSet(manager) => manager.min_share(),
        }
    }

    fn running_task_count(&self) -> usize {
        match self {
            SchedulableNode::Pool(pool) => pool.running_task_count(),
            SchedulableNode::TaskSet(manager) => manager.running_task_count(),
        }
    }

    fn priority(&self) -> usize {
        match self {
            SchedulableNode::Pool(_) => 0,
            SchedulableNode::TaskSet(manager) => manager.priority(),
        }
    }

    fn stage_id(&self) -> usize {
        match self {
            SchedulableNode::Pool(_) => 0,
            SchedulableNode::TaskSet(manager) => manager.stage_id(),
        }
    }

    fn cpu_demand(&self) -> u32 {
        match self {
            SchedulableNode::Pool(pool) => pool.cpu_demand(),
            SchedulableNode::TaskSet(manager) => manager.cpu_demand(),
        }
    }
}

/// A named schedulable node with a scheduling mode and a weighted priority.
pub struct Pool {
    name: String,
    scheduling_mode: SchedulingMode,
    pub weight: usize,
    pub min_share: usize,
    children: RwLock<Vec<SchedulableNode>>,
}

impl Pool {
    pub fn new(
        name: impl Into<String>,
        scheduling_mode: SchedulingMode,
        min_share: usize,
        weight: usize,
    ) -> Self {
        Self {
            name: name.into(),
            scheduling_mode,
            weight,
            min_share,
            children: RwLock::new(vec![]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduling_mode(&self) -> SchedulingMode {
        self.scheduling_mode
    }

    pub fn add_schedulable(&self, node: SchedulableNode) {
        self.children.write().push(node);
    }

    /// Direct child pool with the given name, if any
    pub fn get_pool(&self, name: &str) -> Option<Arc<Pool>> {
        self.children.read().iter().find_map(|child| match child {
            SchedulableNode::Pool(pool) if pool.name() == name => Some(pool.clone()),
            _ => None,
        })
    }

    /// Remove the task set with the given name anywhere in the tree.
    /// Returns true when something was removed. Idempotent.
    pub fn remove_task_set(&self, name: &str) -> bool {
        let mut children = self.children.write();
        let before = children.len();
        children.retain(|child| match child {
            SchedulableNode::TaskSet(manager) => manager.name() != name,
            SchedulableNode::Pool(_) => true,
        });
        if children.len() < before {
            return true;
        }
        children.iter().any(|child| match child {
            SchedulableNode::Pool(pool) => pool.remove_task_set(name),
            SchedulableNode::TaskSet(_) => false,
        })
    }

    pub fn running_task_count(&self) -> usize {
        self.children
            .read()
            .iter()
            .map(|child| child.running_task_count())
            .sum()
    }

    pub fn cpu_demand(&self) -> u32 {
        self.children
            .read()
            .iter()
            .map(|child| child.cpu_demand())
            .sum()
    }

    /// The current admission order: all task sets in the tree, sorted per
    /// the scheduling mode of each pool along the way.
    pub fn sorted_task_set_queue(&self) -> Vec<Arc<dyn TaskSetManager>> {
        let mut children: Vec<SchedulableNode> = self.children.read().clone();
        sort_children(&mut children, self.scheduling_mode);

        let mut queue = Vec::new();
        for child in children {
            match child {
                SchedulableNode::Pool(pool) => {
                    queue.extend(pool.sorted_task_set_queue());
                }
                SchedulableNode::TaskSet(manager) => queue.push(manager),
            }
        }
        queue
    }

    /// Whether any task set in the tree wants a speculative launch
    pub fn check_speculatable_tasks(&self) -> bool {
        let children = self.children.read();
        let mut should_revive = false;
        for child in children.iter() {
            should_revive |= match child {
                SchedulableNode::Pool(pool) => pool.check_speculatable_tasks(),
                SchedulableNode::TaskSet(manager) => manager.check_speculatable_tasks(),
            };
        }
        should_revive
    }

    /// Tell every task set in the tree that a worker was lost
    pub fn executor_lost(&self, executor_id: &str, host: &str) {
        let children = self.children.read().clone();
        for child in children {
            match child {
                SchedulableNode::Pool(pool) => pool.executor_lost(executor_id, host),
                SchedulableNode::TaskSet(manager) => manager.executor_lost(executor_id, host),
            }
        }
    }
}

fn sort_children(children: &mut [SchedulableNode], mode: SchedulingMode) {
    match mode {
        SchedulingMode::Fifo => children.sort_by(fifo_compare),
        SchedulingMode::Fair => children.sort_by(fair_compare),
        SchedulingMode::Cpu => children.sort_by(cpu_compare),
        // insertion order, no preemption hook
        SchedulingMode::None => {}
    }
}

fn fifo_compare(s1: &SchedulableNode, s2: &SchedulableNode) -> Ordering {
    s1.priority()
        .cmp(&s2.priority())
        .then_with(|| s1.stage_id().cmp(&s2.stage_id()))
}

/// Weighted fair ordering: nodes below their minimum share run first,
/// neediest first; the rest are ordered by tasks-per-weight.
fn fair_compare(s1: &SchedulableNode, s2: &SchedulableNode) -> Ordering {
    let running1 = s1.running_task_count() as f64;
    let running2 = s2.running_task_count() as f64;
    let min_share1 = s1.min_share().max(1) as f64;
    let min_share2 = s2.min_share().max(1) as f64;
    let needy1 = (s1.running_task_count()) < s1.min_share();
    let needy2 = (s2.running_task_count()) < s2.min_share();

    if needy1 && !needy2 {
        return Ordering::Less;
    }
    if !needy1 && needy2 {
        return Ordering::Greater;
    }

    let ratio1;
    let ratio2;
    if needy1 {
        ratio1 = running1 / min_share1;
        ratio2 = running2 / min_share2;
    } else {
        ratio1 = running1 / s1.weight().max(1) as f64;
        ratio2 = running2 / s2.weight().max(1) as f64;
    }

    ratio1
        .partial_cmp(&ratio2)
        .unwrap_or(Ordering::Equal)
        .then_with(|| s1.name().cmp(&s2.name()))
}

fn cpu_compare(s1: &SchedulableNode, s2: &SchedulableNode) -> Ordering {
    s2.cpu_demand()
        .cmp(&s1.cpu_demand())
        .then_with(|| s1.stage_id().cmp(&s2.stage_id()))
}

/// Attaches newly admitted task sets to the scheduling tree.
pub trait SchedulableBuilder: Send + Sync {
    fn root_pool(&self) -> Arc<Pool>;

    fn add_task_set_manager(
        &self,
        manager: Arc<dyn TaskSetManager>,
        properties: &std::collections::HashMap<String, String>,
    );
}

/// All task sets hang directly off the root pool in submission order.
pub struct FifoSchedulableBuilder {
    root: Arc<Pool>,
}

impl FifoSchedulableBuilder {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Pool::new(ROOT_POOL_NAME, SchedulingMode::Fifo, 0, 0)),
        }
    }
}

impl Default for FifoSchedulableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulableBuilder for FifoSchedulableBuilder {
    fn root_pool(&self) -> Arc<Pool> {
        self.root.clone()
    }

    fn add_task_set_manager(
        &self,
        manager: Arc<dyn TaskSetManager>,
        _properties: &std::collections::HashMap<String, String>,
    ) {
        self.root.add_schedulable(SchedulableNode::TaskSet(manager));
    }
}

/// Task sets are grouped into named pools selected by the
/// `taskgrid.scheduler.pool` property; unknown pools are created on demand
/// with default weight and minimum share.
pub struct FairSchedulableBuilder {
    root: Arc<Pool>,
}

impl FairSchedulableBuilder {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Pool::new(ROOT_POOL_NAME, SchedulingMode::Fair, 0, 0)),
        }
    }
}

impl Default for FairSchedulableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulableBuilder for FairSchedulableBuilder {
    fn root_pool(&self) -> Arc<Pool> {
        self.root.clone()
    }

    fn add_task_set_manager(
        &self,
        manager: Arc<dyn TaskSetManager>,
        properties: &std::collections::HashMap<String, String>,
    ) {
        let pool_name = properties
            .get(SCHEDULER_POOL_PROPERTY)
            .map(|name| name.as_str())
            .unwrap_or(DEFAULT_POOL_NAME);

        let pool = match self.root.get_pool(pool_name) {
            Some(pool) => pool,
            None => {
                let pool = Arc::new(Pool::new(pool_name, SchedulingMode::Fifo, 0, 1));
                self.root.add_schedulable(SchedulableNode::Pool(pool.clone()));
                info!("Created pool {}, min share: 0, weight: 1", pool_name);
                pool
            }
        };
        debug!("Added task set {} to pool {}", manager.name(), pool_name);
        pool.add_schedulable(SchedulableNode::TaskSet(manager));
    }
}

/// Task sets hang off the root pool and are ordered by predicted demand.
pub struct CpuSchedulableBuilder {
    root: Arc<Pool>,
}

impl CpuSchedulableBuilder {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Pool::new(ROOT_POOL_NAME, SchedulingMode::Cpu, 0, 0)),
        }
    }
}

impl Default for CpuSchedulableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulableBuilder for CpuSchedulableBuilder {
    fn root_pool(&self) -> Arc<Pool> {
        self.root.clone()
    }

    fn add_task_set_manager(
        &self,
        manager: Arc<dyn TaskSetManager>,
        _properties: &std::collections::HashMap<String, String>,
    ) {
        self.root.add_schedulable(SchedulableNode::TaskSet(manager));
    }
}

/// Insertion order, never re-sorted.
pub struct NoneSchedulableBuilder {
    root: Arc<Pool>,
}

impl NoneSchedulableBuilder {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Pool::new(ROOT_POOL_NAME, SchedulingMode::None, 0, 0)),
        }
    }
}

impl Default for NoneSchedulableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulableBuilder for NoneSchedulableBuilder {
    fn root_pool(&self) -> Arc<Pool> {
        self.root.clone()
    }

    fn add_task_set_manager(
        &self,
        manager: Arc<dyn TaskSetManager>,
        _properties: &std::collections::HashMap<String, String>,
    ) {
        self.root.add_schedulable(SchedulableNode::TaskSet(manager));
    }
}

/// Builder for the configured scheduling mode.
pub fn builder_for(mode: SchedulingMode) -> Arc<dyn SchedulableBuilder> {
    match mode {
        SchedulingMode::Fifo => Arc::new(FifoSchedulableBuilder::new()),
        SchedulingMode::Fair => Arc::new(FairSchedulableBuilder::new()),
        SchedulingMode::Cpu => Arc::new(CpuSchedulableBuilder::new()),
        SchedulingMode::None => Arc::new(NoneSchedulableBuilder::new()),
    }
}
