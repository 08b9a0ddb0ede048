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

use crate::log::{LogAppendInfo, NO_TIMESTAMP};
use crate::message::TopicData;
use crate::request::{ErrorCode, KafkaError};

/// Topics whose names start with this prefix are broker-internal and only
/// writable when the producer explicitly opts in.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

#[derive(Debug)]
pub struct ProduceRequest {
    pub required_acks: i16,
    pub timeout_ms: i64,
    pub internal_topics_allowed: bool,
    pub topic_data: Vec<TopicData>,
}

/// Per-partition produce outcome, carried back to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResponse {
    pub partition: i32,
    pub error_code: i16,
    pub base_offset: i64,
    pub last_offset: i64,
    pub log_append_time: i64,
    pub log_start_offset: i64,
}

impl PartitionResponse {
    pub fn from_append_info(partition: i32, info: &LogAppendInfo, log_start_offset: i64) -> Self {
        Self {
            partition,
            error_code: ErrorCode::None as i16,
            base_offset: info.first_offset,
            last_offset: info.last_offset,
            log_append_time: info.log_append_time,
            log_start_offset,
        }
    }

    pub fn from_error(partition: i32, error: &KafkaError) -> Self {
        Self {
            partition,
            error_code: ErrorCode::from(error) as i16,
            base_offset: -1,
            last_offset: -1,
            log_append_time: NO_TIMESTAMP,
            log_start_offset: -1,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_code != ErrorCode::None as i16
    }
}
