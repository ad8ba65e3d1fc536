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

//! Shared configuration enums

use crate::error::{Result, TaskGridError};
use clap::ArgEnum;
use std::fmt;

/// Scheduling property that selects the pool a task set is attached to.
pub const SCHEDULER_POOL_PROPERTY: &str = "taskgrid.scheduler.pool";

// an enum used to configure the ordering of the scheduling pool
// needs to be visible to code generated by arg parsing
#[derive(Clone, ArgEnum, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
pub enum SchedulingMode {
    /// Task sets are ordered by submission (priority, then stage id)
    Fifo,
    /// Task sets are ordered by weighted fair share across pools
    Fair,
    /// Task sets are ordered by predicted CPU demand, largest first
    Cpu,
    /// Task sets keep insertion order and are never re-sorted
    None,
}

impl SchedulingMode {
    /// Parse a mode name, surfacing a configuration error for unknown
    /// names. Matching is case-insensitive.
    pub fn try_parse(name: &str) -> Result<Self> {
        <Self as ArgEnum>::from_str(name, true).map_err(|_| {
            TaskGridError::Configuration(format!(
                "unknown scheduling mode '{}', expected one of FIFO, FAIR, CPU, NONE",
                name
            ))
        })
    }
}

impl std::str::FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ArgEnum::from_str(s, true)
    }
}

impl parse_arg::ParseArgFromStr for SchedulingMode {
    fn describe_type<W: fmt::Write>(mut writer: W) -> fmt::Result {
        write!(writer, "The ordering of the scheduling pool")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_scheduling_mode() {
        assert_eq!(SchedulingMode::try_parse("FIFO").unwrap(), SchedulingMode::Fifo);
        assert_eq!(SchedulingMode::try_parse("fair").unwrap(), SchedulingMode::Fair);
        assert_eq!(SchedulingMode::try_parse("Cpu").unwrap(), SchedulingMode::Cpu);
        assert_eq!(SchedulingMode::try_parse("NONE").unwrap(), SchedulingMode::None);
    }

    #[test]
    fn unknown_scheduling_mode_is_a_configuration_error() {
        let err = SchedulingMode::try_parse("LIFO").unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, TaskGridError::Configuration(_)));
    }
}
