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

//! TaskGrid error types

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::result;

pub type Result<T> = result::Result<T, TaskGridError>;

/// Error type for the TaskGrid crates
#[derive(Debug)]
pub enum TaskGridError {
    General(String),
    Internal(String),
    /// A configuration value could not be parsed or validated. Fatal at
    /// startup.
    Configuration(String),
    /// A task set was submitted for a stage that already has a live
    /// (non-zombie) task set with a different identity.
    ConflictingTaskSet(String),
    /// A task payload could not be serialized during placement. The owning
    /// task set is skipped for the current offer round only.
    TaskSerialization(String),
}

impl TaskGridError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskGridError::Configuration(_))
    }
}

impl Display for TaskGridError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TaskGridError::General(desc) => write!(f, "General error: {}", desc),
            TaskGridError::Internal(desc) => write!(f, "Internal error: {}", desc),
            TaskGridError::Configuration(desc) => {
                write!(f, "Configuration error: {}", desc)
            }
            TaskGridError::ConflictingTaskSet(desc) => {
                write!(f, "Conflicting task set: {}", desc)
            }
            TaskGridError::TaskSerialization(desc) => {
                write!(f, "Task serialization error: {}", desc)
            }
        }
    }
}

impl Error for TaskGridError {}
