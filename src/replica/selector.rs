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

use std::collections::HashMap;

use crate::message::TopicPartition;
use crate::metadata::Node;
use crate::request::ClientMetadata;

/// One ISR member as offered to the selector.
#[derive(Debug, Clone)]
pub struct ReplicaView {
    pub broker_id: i32,
    pub endpoint: Node,
    pub log_start_offset: i64,
    pub log_end_offset: i64,
    pub time_since_last_caught_up_ms: i64,
}

/// Snapshot handed to the selector: only ISR members whose offset range
/// covers the consumer's fetch offset are included.
#[derive(Debug, Clone)]
pub struct PartitionView {
    pub leader_id: i32,
    pub replicas: Vec<ReplicaView>,
}

/// Strategy choosing the replica a consumer should fetch from. Returning
/// `None` means "stay on the leader".
pub trait ReplicaSelector: Send + Sync + std::fmt::Debug {
    fn configure(&self, _configs: &HashMap<String, String>) {}

    fn select(
        &self,
        topic_partition: &TopicPartition,
        client_metadata: &ClientMetadata,
        partition_view: &PartitionView,
    ) -> Option<Node>;
}

/// Default policy: every consumer reads from the leader.
#[derive(Debug, Default)]
pub struct LeaderSelector;

impl ReplicaSelector for LeaderSelector {
    fn select(
        &self,
        _topic_partition: &TopicPartition,
        _client_metadata: &ClientMetadata,
        _partition_view: &PartitionView,
    ) -> Option<Node> {
        None
    }
}

/// Prefers a replica in the consumer's rack, falling back to the leader.
#[derive(Debug, Default)]
pub struct RackAwareSelector;

impl ReplicaSelector for RackAwareSelector {
    fn select(
        &self,
        _topic_partition: &TopicPartition,
        client_metadata: &ClientMetadata,
        partition_view: &PartitionView,
    ) -> Option<Node> {
        let rack_id = client_metadata.rack_id.as_deref()?;
        partition_view
            .replicas
            .iter()
            .filter(|replica| replica.endpoint.rack.as_deref() == Some(rack_id))
            .max_by_key(|replica| replica.log_end_offset)
            .map(|replica| replica.endpoint.clone())
    }
}
