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

use std::collections::HashMap;
use std::hash::Hash;

use itertools::Itertools;

/// Flatten per-host container lists into a host-balanced ordering: the
/// i-th container of every host comes before any (i+1)-th, and hosts with
/// more containers are visited first within each round. Ties between hosts
/// of equal list length keep the map iteration order. Used to spread
/// allocations across hosts.
pub fn prioritize_containers<K: Eq + Hash, T>(map: HashMap<K, Vec<T>>) -> Vec<T> {
    let total: usize = map.values().map(Vec::len).sum();

    let mut columns = map
        .into_iter()
        .map(|(_, containers)| containers.into_iter())
        .sorted_by(|a, b| b.len().cmp(&a.len()))
        .collect::<Vec<_>>();

    let mut ordered = Vec::with_capacity(total);
    while ordered.len() < total {
        for column in columns.iter_mut() {
            if let Some(container) = column.next() {
                ordered.push(container);
            }
        }
    }
    ordered
}

#[cfg(test)]
mod test {
    use super::*;

    fn hosts(lists: &[(&str, &[u32])]) -> HashMap<String, Vec<u32>> {
        lists
            .iter()
            .map(|(host, containers)| (host.to_string(), containers.to_vec()))
            .collect()
    }

    #[test]
    fn round_robins_across_hosts_longest_first() {
        let map = hosts(&[
            ("host-a", &[1, 2, 3]),
            ("host-b", &[10]),
            ("host-c", &[20, 21]),
        ]);

        let ordered = prioritize_containers(map);

        assert_eq!(ordered.len(), 6);
        // first round visits every host, longest list first
        assert_eq!(ordered[0], 1);
        assert_eq!(ordered[1], 20);
        assert_eq!(ordered[2], 10);
        // second round skips the exhausted host
        assert_eq!(ordered[3], 2);
        assert_eq!(ordered[4], 21);
        assert_eq!(ordered[5], 3);
    }

    #[test]
    fn preserves_the_container_multiset() {
        let map = hosts(&[("host-a", &[1, 1, 2]), ("host-b", &[2, 3])]);

        let mut ordered = prioritize_containers(map);
        ordered.sort_unstable();

        assert_eq!(ordered, vec![1, 1, 2, 2, 3]);
    }

    #[test]
    fn handles_empty_input() {
        let map: HashMap<String, Vec<u32>> = HashMap::new();
        assert!(prioritize_containers(map).is_empty());

        let map = hosts(&[("host-a", &[])]);
        assert!(prioritize_containers(map).is_empty());
    }
}
