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

use std::collections::BTreeMap;

use crate::log::{AbortedTransaction, LogReadInfo};
use crate::message::{MemoryRecords, TopicPartition};
use crate::request::{ErrorCode, KafkaError};

/// Sentinel replica id used by ordinary consumers.
pub const CONSUMER_REPLICA_ID: i32 = -1;
/// Sentinel replica id used by the internal future-replica mover.
pub const FUTURE_LOCAL_REPLICA_ID: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
}

/// Identity a consumer attaches to its fetch, consulted when picking a
/// preferred read replica.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    pub client_id: String,
    pub rack_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PartitionFetchData {
    pub fetch_offset: i64,
    pub current_leader_epoch: Option<i32>,
    pub log_start_offset: i64,
    pub max_bytes: i32,
}

impl PartitionFetchData {
    pub fn new(fetch_offset: i64, current_leader_epoch: Option<i32>, max_bytes: i32) -> Self {
        Self {
            fetch_offset,
            current_leader_epoch,
            log_start_offset: 0,
            max_bytes,
        }
    }
}

#[derive(Debug)]
pub struct FetchRequest {
    pub replica_id: i32,
    pub max_wait_ms: i64,
    pub min_bytes: i32,
    pub max_bytes: i32,
    /// when set, even the first batch may not exceed the byte limit
    pub hard_max_bytes_limit: bool,
    pub isolation_level: IsolationLevel,
    pub fetch_data: BTreeMap<TopicPartition, PartitionFetchData>,
    pub client_metadata: Option<ClientMetadata>,
}

impl FetchRequest {
    pub fn is_from_follower(&self) -> bool {
        self.replica_id >= 0
    }

    pub fn is_from_consumer(&self) -> bool {
        self.replica_id == CONSUMER_REPLICA_ID
    }

    pub fn is_from_future_replica(&self) -> bool {
        self.replica_id == FUTURE_LOCAL_REPLICA_ID
    }
}

/// Per-partition slice of a fetch response.
#[derive(Debug)]
pub struct FetchPartitionData {
    pub error_code: i16,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,
    pub aborted_transactions: Option<Vec<AbortedTransaction>>,
    pub preferred_read_replica: Option<i32>,
    pub records: MemoryRecords,
}

impl FetchPartitionData {
    pub fn from_read_info(info: LogReadInfo) -> Self {
        Self {
            error_code: ErrorCode::None as i16,
            high_watermark: info.high_watermark,
            last_stable_offset: info.last_stable_offset,
            log_start_offset: info.log_start_offset,
            aborted_transactions: info.aborted_transactions,
            preferred_read_replica: None,
            records: info.records,
        }
    }

    pub fn from_error(error: &KafkaError) -> Self {
        Self {
            error_code: ErrorCode::from(error) as i16,
            high_watermark: -1,
            last_stable_offset: -1,
            log_start_offset: -1,
            aborted_transactions: None,
            preferred_read_replica: None,
            records: MemoryRecords::empty(),
        }
    }

    pub fn preferred_replica_hint(replica_id: i32) -> Self {
        Self {
            error_code: ErrorCode::None as i16,
            high_watermark: -1,
            last_stable_offset: -1,
            log_start_offset: -1,
            aborted_transactions: None,
            preferred_read_replica: Some(replica_id),
            records: MemoryRecords::empty(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_code != ErrorCode::None as i16
    }
}

#[derive(Debug)]
pub struct FetchResponse {
    pub responses: BTreeMap<TopicPartition, FetchPartitionData>,
    pub throttle_time_ms: i32,
}

impl FetchResponse {
    pub fn new(responses: BTreeMap<TopicPartition, FetchPartitionData>) -> Self {
        Self {
            responses,
            throttle_time_ms: 0,
        }
    }
}
