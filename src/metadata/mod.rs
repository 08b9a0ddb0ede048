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

//! Local view of the cluster, refreshed by controller update-metadata
//! directives.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::message::TopicPartition;
use crate::request::{UpdateMetadataRequest, LEADER_DURING_DELETE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl Node {
    pub fn new(id: i32, host: impl Into<String>, port: i32) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            rack: None,
        }
    }

    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct PartitionMetadata {
    pub leader: i32,
    pub leader_epoch: i32,
    pub isr: Vec<i32>,
    pub replicas: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

#[derive(Debug, Default)]
pub struct MetadataCache {
    alive_brokers: DashMap<i32, Node>,
    partitions: DashMap<TopicPartition, PartitionMetadata>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alive_brokers(&self) -> Vec<Node> {
        self.alive_brokers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn is_broker_alive(&self, broker_id: i32) -> bool {
        self.alive_brokers.contains_key(&broker_id)
    }

    pub fn get_alive_broker(&self, broker_id: i32) -> Option<Node> {
        self.alive_brokers
            .get(&broker_id)
            .map(|node| node.value().clone())
    }

    pub fn contains(&self, topic_partition: &TopicPartition) -> bool {
        self.partitions.contains_key(topic_partition)
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.partitions
            .iter()
            .any(|entry| entry.key().topic() == topic)
    }

    pub fn partition_metadata(&self, topic_partition: &TopicPartition) -> Option<PartitionMetadata> {
        self.partitions
            .get(topic_partition)
            .map(|metadata| metadata.value().clone())
    }

    /// Endpoints of every alive replica of the partition, keyed by broker id.
    pub fn partition_replica_endpoints(
        &self,
        topic_partition: &TopicPartition,
    ) -> HashMap<i32, Node> {
        let mut endpoints = HashMap::new();
        if let Some(metadata) = self.partitions.get(topic_partition) {
            for replica_id in &metadata.value().replicas {
                if let Some(node) = self.alive_brokers.get(replica_id) {
                    endpoints.insert(*replica_id, node.value().clone());
                }
            }
        }
        endpoints
    }

    /// Applies an update-metadata directive. Partitions announced with the
    /// delete sentinel leader are dropped from the view and returned.
    pub fn update_metadata(
        &self,
        correlation_id: i32,
        request: &UpdateMetadataRequest,
    ) -> Vec<TopicPartition> {
        self.alive_brokers.clear();
        for broker in &request.live_brokers {
            self.alive_brokers.insert(broker.id, broker.clone());
        }

        let mut deleted = Vec::new();
        for (tp, state) in &request.partition_states {
            if state.leader == LEADER_DURING_DELETE {
                if self.partitions.remove(tp).is_some() {
                    debug!("removed deleted partition {} from metadata cache", tp);
                }
                deleted.push(tp.clone());
            } else {
                self.partitions.insert(
                    tp.clone(),
                    PartitionMetadata {
                        leader: state.leader,
                        leader_epoch: state.leader_epoch,
                        isr: state.isr.clone(),
                        replicas: state.replicas.clone(),
                        offline_replicas: state.offline_replicas.clone(),
                    },
                );
            }
        }
        info!(
            "updated metadata cache (correlation {}): {} brokers, {} partitions, {} deleted",
            correlation_id,
            self.alive_brokers.len(),
            self.partitions.len(),
            deleted.len()
        );
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::UpdateMetadataPartitionState;
    use std::collections::BTreeMap;

    fn update_request(
        brokers: Vec<Node>,
        states: Vec<(TopicPartition, i32)>,
    ) -> UpdateMetadataRequest {
        let mut partition_states = BTreeMap::new();
        for (tp, leader) in states {
            partition_states.insert(
                tp,
                UpdateMetadataPartitionState {
                    controller_epoch: 1,
                    leader,
                    leader_epoch: 1,
                    isr: vec![leader],
                    replicas: vec![leader],
                    offline_replicas: vec![],
                },
            );
        }
        UpdateMetadataRequest {
            controller_id: 0,
            controller_epoch: 1,
            live_brokers: brokers,
            partition_states,
        }
    }

    #[test]
    fn test_update_and_lookup() {
        let cache = MetadataCache::new();
        let tp = TopicPartition::new("t", 0);
        cache.update_metadata(
            0,
            &update_request(
                vec![Node::new(1, "b1", 9092), Node::new(2, "b2", 9092)],
                vec![(tp.clone(), 1)],
            ),
        );

        assert!(cache.contains(&tp));
        assert!(cache.contains_topic("t"));
        assert!(cache.is_broker_alive(2));
        assert!(!cache.is_broker_alive(9));
        assert_eq!(cache.partition_metadata(&tp).unwrap().leader, 1);
        let endpoints = cache.partition_replica_endpoints(&tp);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints.get(&1).unwrap().host, "b1");
    }

    #[test]
    fn test_delete_sentinel_removes_partition() {
        let cache = MetadataCache::new();
        let tp = TopicPartition::new("t", 0);
        cache.update_metadata(
            0,
            &update_request(vec![Node::new(1, "b1", 9092)], vec![(tp.clone(), 1)]),
        );
        let deleted = cache.update_metadata(
            1,
            &update_request(
                vec![Node::new(1, "b1", 9092)],
                vec![(tp.clone(), LEADER_DURING_DELETE)],
            ),
        );
        assert_eq!(deleted, vec![tp.clone()]);
        assert!(!cache.contains(&tp));
    }
}
