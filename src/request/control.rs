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

//! Control-plane directives issued by the cluster controller.

use std::collections::BTreeMap;

use crate::message::TopicPartition;
use crate::metadata::Node;
use crate::request::KafkaError;

/// Leader value announcing a partition that is being deleted cluster-wide.
pub const LEADER_DURING_DELETE: i32 = -2;

/// Sentinel delete-records target meaning "up to the high watermark".
pub const DELETE_TO_HIGH_WATERMARK: i64 = -1;

#[derive(Debug, Clone)]
pub struct LeaderAndIsrPartitionState {
    pub controller_epoch: i32,
    pub leader: i32,
    pub leader_epoch: i32,
    pub isr: Vec<i32>,
    pub zk_version: i32,
    pub replicas: Vec<i32>,
    pub is_new: bool,
}

#[derive(Debug)]
pub struct LeaderAndIsrRequest {
    pub controller_id: i32,
    pub controller_epoch: i32,
    pub partition_states: BTreeMap<TopicPartition, LeaderAndIsrPartitionState>,
}

#[derive(Debug)]
pub struct LeaderAndIsrResponse {
    pub error: Option<KafkaError>,
    pub partition_errors: BTreeMap<TopicPartition, i16>,
}

#[derive(Debug)]
pub struct StopReplicaRequest {
    pub controller_id: i32,
    pub controller_epoch: i32,
    pub delete_partitions: bool,
    pub partitions: Vec<TopicPartition>,
}

#[derive(Debug)]
pub struct StopReplicaResponse {
    pub error: Option<KafkaError>,
    pub partition_errors: BTreeMap<TopicPartition, i16>,
}

#[derive(Debug, Clone)]
pub struct UpdateMetadataPartitionState {
    pub controller_epoch: i32,
    pub leader: i32,
    pub leader_epoch: i32,
    pub isr: Vec<i32>,
    pub replicas: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

#[derive(Debug)]
pub struct UpdateMetadataRequest {
    pub controller_id: i32,
    pub controller_epoch: i32,
    pub live_brokers: Vec<Node>,
    pub partition_states: BTreeMap<TopicPartition, UpdateMetadataPartitionState>,
}

#[derive(Debug)]
pub struct DeleteRecordsRequest {
    pub timeout_ms: i64,
    pub offsets: BTreeMap<TopicPartition, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecordsPartitionResult {
    pub low_watermark: i64,
    pub error_code: i16,
}

#[derive(Debug)]
pub struct ElectLeadersRequest {
    pub partitions: Vec<TopicPartition>,
    pub timeout_ms: i64,
}

/// One buffered ISR mutation, shipped to the metadata store by the
/// propagation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsrChangeEntry {
    pub topic: String,
    pub partition: i32,
    pub isr: Vec<i32>,
    pub leader_epoch: i32,
    pub zk_version: i32,
}

/// Per-partition entry of a describe-log-dirs response.
#[derive(Debug, Clone)]
pub struct LogDirPartitionInfo {
    pub topic_partition: TopicPartition,
    pub size_in_bytes: i64,
    pub log_end_offset: i64,
    pub is_future: bool,
}

#[derive(Debug, Clone)]
pub struct LogDirInfo {
    pub dir: String,
    pub error_code: i16,
    pub partitions: Vec<LogDirPartitionInfo>,
}
