// Copyright 2026 quartzmq authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{Display, Formatter};

use crate::message::MemoryRecords;
use crate::{AppError, AppResult};

/// Immutable identity of a hosted partition: topic name plus partition index.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    fn parse_topic_partition(tp_str: &str) -> Option<(String, i32)> {
        let last_hyphen_idx = tp_str.rfind('-')?;
        let (topic, partition_str) = tp_str.split_at(last_hyphen_idx);
        let partition = partition_str[1..].parse::<i32>().ok()?;
        Some((topic.to_string(), partition))
    }

    pub fn from_str(tp_str: &str) -> AppResult<Self> {
        let (topic, partition) = Self::parse_topic_partition(tp_str).ok_or_else(|| {
            AppError::InvalidValue(format!("invalid topic partition name: {}", tp_str))
        })?;
        Ok(Self { topic, partition })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn id(&self) -> String {
        format!("{}-{}", self.topic, self.partition)
    }

    /// Directory of this partition's log relative to a log-dir root.
    pub fn partition_dir(&self, base_dir: &str) -> String {
        format!("{}/{}", base_dir, self.id())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PartitionMsgData {
    pub partition: i32,
    pub message_set: MemoryRecords,
}

impl PartitionMsgData {
    pub fn new(partition: i32, message_set: MemoryRecords) -> Self {
        Self {
            partition,
            message_set,
        }
    }
}

/// Producer payload for one topic, as carried by a produce request.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TopicData {
    pub topic_name: String,
    pub partition_data: Vec<PartitionMsgData>,
}

impl TopicData {
    pub fn new(topic_name: String, partition_data: Vec<PartitionMsgData>) -> Self {
        Self {
            topic_name,
            partition_data,
        }
    }
}
