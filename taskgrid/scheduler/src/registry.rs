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

//! In-memory indexes over dispatched tasks and live workers. Owned by the
//! scheduler and only ever touched while the scheduler monitor is held, so
//! the parallel maps stay consistent with each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use taskgrid_core::task::TaskId;

use crate::task_set::TaskSetManager;

#[derive(Default)]
pub struct TaskRegistry {
    /// stage id -> attempt id -> manager. For any stage with more than one
    /// entry, at most one manager is non-zombie.
    task_sets_by_stage: HashMap<usize, HashMap<usize, Arc<dyn TaskSetManager>>>,
    task_id_to_task_set: HashMap<TaskId, Arc<dyn TaskSetManager>>,
    task_id_to_executor: HashMap<TaskId, String>,
    active_executors: HashSet<String>,
    executors_by_host: HashMap<String, HashSet<String>>,
    hosts_by_rack: HashMap<String, HashSet<String>>,
    executor_to_host: HashMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_task_set(
        &mut self,
        stage_id: usize,
        stage_attempt_id: usize,
        manager: Arc<dyn TaskSetManager>,
    ) {
        self.task_sets_by_stage
            .entry(stage_id)
            .or_insert_with(HashMap::new)
            .insert(stage_attempt_id, manager);
    }

    /// Another live manager for the stage whose task set identity differs
    /// from `task_set_id`, if any.
    pub fn conflicting_task_set(&self, stage_id: usize, task_set_id: &str) -> Option<String> {
        self.task_sets_by_stage.get(&stage_id).and_then(|attempts| {
            attempts
                .values()
                .find(|m| !m.is_zombie() && m.task_set().id() != task_set_id)
                .map(|m| m.task_set().id())
        })
    }

    pub fn remove_task_set(&mut self, stage_id: usize, stage_attempt_id: usize) {
        if let Some(attempts) = self.task_sets_by_stage.get_mut(&stage_id) {
            attempts.remove(&stage_attempt_id);
            if attempts.is_empty() {
                self.task_sets_by_stage.remove(&stage_id);
            }
        }
    }

    pub fn stage_attempts(&self, stage_id: usize) -> Vec<Arc<dyn TaskSetManager>> {
        self.task_sets_by_stage
            .get(&stage_id)
            .map(|attempts| attempts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_task_set_managers(&self) -> Vec<Arc<dyn TaskSetManager>> {
        self.task_sets_by_stage
            .values()
            .flat_map(|attempts| attempts.values().cloned())
            .collect()
    }

    pub fn has_task_sets(&self) -> bool {
        !self.task_sets_by_stage.is_empty()
    }

    pub fn task_set_manager(&self, task_id: TaskId) -> Option<Arc<dyn TaskSetManager>> {
        self.task_id_to_task_set.get(&task_id).cloned()
    }

    pub fn manager_for_attempt(
        &self,
        stage_id: usize,
        stage_attempt_id: usize,
    ) -> Option<Arc<dyn TaskSetManager>> {
        self.task_sets_by_stage
            .get(&stage_id)
            .and_then(|attempts| attempts.get(&stage_attempt_id))
            .cloned()
    }

    pub fn executor_for_task(&self, task_id: TaskId) -> Option<String> {
        self.task_id_to_executor.get(&task_id).cloned()
    }

    /// Record a dispatch decision made by the placement engine.
    pub fn record_dispatch(
        &mut self,
        task_id: TaskId,
        manager: Arc<dyn TaskSetManager>,
        executor_id: &str,
    ) {
        self.task_id_to_task_set.insert(task_id, manager);
        self.task_id_to_executor
            .insert(task_id, executor_id.to_owned());
    }

    /// Drop the per-task indexes once a task reaches a terminal state.
    pub fn clear_task(&mut self, task_id: TaskId) {
        self.task_id_to_task_set.remove(&task_id);
        self.task_id_to_executor.remove(&task_id);
    }

    pub fn is_executor_alive(&self, executor_id: &str) -> bool {
        self.active_executors.contains(executor_id)
    }

    pub fn host_for_executor(&self, executor_id: &str) -> Option<String> {
        self.executor_to_host.get(executor_id).cloned()
    }

    pub fn has_executors_on_host(&self, host: &str) -> bool {
        self.executors_by_host
            .get(host)
            .map(|executors| !executors.is_empty())
            .unwrap_or(false)
    }

    pub fn hosts_on_rack(&self, rack: &str) -> Option<&HashSet<String>> {
        self.hosts_by_rack.get(rack)
    }

    /// Register a worker seen in a resource offer. Returns true when the
    /// host had no known executors before, which is the signal for an
    /// `executor_added` upcall.
    pub fn add_executor(
        &mut self,
        executor_id: &str,
        host: &str,
        rack: Option<String>,
    ) -> bool {
        let first_on_host = !self.executors_by_host.contains_key(host);
        self.executor_to_host
            .insert(executor_id.to_owned(), host.to_owned());
        self.executors_by_host
            .entry(host.to_owned())
            .or_insert_with(HashSet::new)
            .insert(executor_id.to_owned());
        if let Some(rack) = rack {
            self.hosts_by_rack
                .entry(rack)
                .or_insert_with(HashSet::new)
                .insert(host.to_owned());
        }
        self.active_executors.insert(executor_id.to_owned());
        first_on_host
    }

    /// Purge a lost worker from every index. Returns the host it was on, or
    /// `None` when the executor was not known.
    pub fn remove_executor(&mut self, executor_id: &str) -> Option<String> {
        if !self.active_executors.remove(executor_id) {
            return None;
        }
        let host = self.executor_to_host.remove(executor_id)?;
        if let Some(executors) = self.executors_by_host.get_mut(&host) {
            executors.remove(executor_id);
            if executors.is_empty() {
                self.executors_by_host.remove(&host);
                self.hosts_by_rack.retain(|_, hosts| {
                    hosts.remove(&host);
                    !hosts.is_empty()
                });
            }
        }
        Some(host)
    }

    #[cfg(test)]
    pub fn tracked_task_ids(&self) -> (HashSet<TaskId>, HashSet<TaskId>) {
        (
            self.task_id_to_task_set.keys().copied().collect(),
            self.task_id_to_executor.keys().copied().collect(),
        )
    }

    #[cfg(test)]
    pub fn active_executor_ids(&self) -> HashSet<String> {
        self.active_executors.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{test_task_set, TestTaskSetManager};
    use taskgrid_core::task::TaskIdGenerator;

    fn manager(stage_id: usize) -> Arc<TestTaskSetManager> {
        Arc::new(TestTaskSetManager::new(
            test_task_set(stage_id, 0, 2),
            4,
            Arc::new(TaskIdGenerator::new()),
        ))
    }

    #[test]
    fn executor_indexes_stay_consistent() {
        let mut registry = TaskRegistry::new();

        assert!(registry.add_executor("exec-1", "host-a", None));
        assert!(!registry.add_executor("exec-2", "host-a", None));
        assert!(registry.add_executor("exec-3", "host-b", Some("rack-1".to_owned())));

        assert!(registry.is_executor_alive("exec-1"));
        assert!(registry.has_executors_on_host("host-a"));
        assert_eq!(registry.host_for_executor("exec-3").unwrap(), "host-b");
        assert!(registry.hosts_on_rack("rack-1").unwrap().contains("host-b"));

        assert_eq!(registry.remove_executor("exec-2").unwrap(), "host-a");
        assert!(registry.has_executors_on_host("host-a"));
        assert_eq!(registry.remove_executor("exec-1").unwrap(), "host-a");
        assert!(!registry.has_executors_on_host("host-a"));
        assert!(registry.remove_executor("exec-1").is_none());

        assert_eq!(registry.remove_executor("exec-3").unwrap(), "host-b");
        assert!(registry.hosts_on_rack("rack-1").is_none());
    }

    #[test]
    fn task_indexes_share_key_sets() {
        let mut registry = TaskRegistry::new();
        let m = manager(1);
        registry.insert_task_set(1, 0, m.clone());

        registry.record_dispatch(10, m.clone(), "exec-1");
        registry.record_dispatch(11, m.clone(), "exec-2");

        let (by_set, by_exec) = registry.tracked_task_ids();
        assert_eq!(by_set, by_exec);

        registry.clear_task(10);
        let (by_set, by_exec) = registry.tracked_task_ids();
        assert_eq!(by_set, by_exec);
        assert_eq!(by_set.len(), 1);
    }

    #[test]
    fn conflicting_task_set_detection() {
        let mut registry = TaskRegistry::new();
        let live = manager(1);
        registry.insert_task_set(1, 0, live.clone());

        assert!(registry.conflicting_task_set(1, "TaskSet_1.1").is_some());
        // the same identity never conflicts with itself
        assert!(registry.conflicting_task_set(1, "TaskSet_1.0").is_none());

        live.abort("superseded");
        assert!(registry.conflicting_task_set(1, "TaskSet_1.1").is_none());
    }

    #[test]
    fn remove_task_set_drops_empty_stage() {
        let mut registry = TaskRegistry::new();
        registry.insert_task_set(1, 0, manager(1));
        registry.insert_task_set(1, 1, manager(1));

        registry.remove_task_set(1, 0);
        assert!(registry.has_task_sets());
        registry.remove_task_set(1, 1);
        assert!(!registry.has_task_sets());
    }
}
