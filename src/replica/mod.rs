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

//! The replica subsystem: per-partition state, the replica manager façade,
//! follower fetchers and the background maintenance tasks around them.

mod checkpointer;
mod delayed_delete_records;
mod delayed_elect_leader;
mod delayed_fetch;
mod delayed_produce;
mod fetcher;
mod isr_change;
mod log_dir_failure;
mod partition;
mod replica_manager;
mod selector;

pub use checkpointer::HighWatermarkCheckpointer;
pub use delayed_delete_records::DelayedDeleteRecords;
pub use delayed_elect_leader::DelayedElectLeader;
pub use delayed_fetch::DelayedFetch;
pub use delayed_produce::DelayedProduce;
pub use fetcher::{
    FetcherManager, InitialFetchState, LeaderEndpoint, LeaderEndpointFactory, LocalLeaderEndpoint,
};
pub use isr_change::IsrChangeTracker;
pub use log_dir_failure::LogDirFailureHandler;
pub use partition::{FollowerFetchOutcome, OffsetSnapshot, Partition, ReplicaState};
pub use replica_manager::ReplicaManager;
pub use selector::{
    LeaderSelector, PartitionView, RackAwareSelector, ReplicaSelector, ReplicaView,
};

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::message::TopicPartition;
use crate::request::IsrChangeEntry;

/// Local hosting state of one partition. `None` and `Offline` are distinct:
/// an offline partition once had a log on a now-failed disk.
#[derive(Debug, Clone)]
pub enum HostedPartition {
    None,
    Online(Arc<Partition>),
    Offline,
}

/// Process-wide partition map. Reads are lock-free; inserts and removals
/// happen only under the replica manager's state-change lock.
#[derive(Debug, Default)]
pub struct HostedPartitions {
    map: DashMap<TopicPartition, HostedPartition>,
}

impl HostedPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, topic_partition: &TopicPartition) -> HostedPartition {
        self.map
            .get(topic_partition)
            .map(|hosted| hosted.value().clone())
            .unwrap_or(HostedPartition::None)
    }

    pub fn online(&self, topic_partition: &TopicPartition) -> Option<Arc<Partition>> {
        match self.get(topic_partition) {
            HostedPartition::Online(partition) => Some(partition),
            _ => None,
        }
    }

    pub fn insert_online(&self, topic_partition: TopicPartition, partition: Arc<Partition>) {
        self.map
            .insert(topic_partition, HostedPartition::Online(partition));
    }

    pub fn mark_offline(&self, topic_partition: &TopicPartition) {
        self.map
            .insert(topic_partition.clone(), HostedPartition::Offline);
    }

    pub fn remove(&self, topic_partition: &TopicPartition) -> HostedPartition {
        self.map
            .remove(topic_partition)
            .map(|(_, hosted)| hosted)
            .unwrap_or(HostedPartition::None)
    }

    pub fn all_online(&self) -> Vec<(TopicPartition, Arc<Partition>)> {
        self.map
            .iter()
            .filter_map(|entry| match entry.value() {
                HostedPartition::Online(partition) => {
                    Some((entry.key().clone(), partition.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Outbound boundary towards the cluster controller / metadata store.
#[async_trait]
pub trait ControllerChannel: Send + Sync + std::fmt::Debug {
    async fn propagate_isr_changes(&self, changes: Vec<IsrChangeEntry>);
    async fn notify_log_dir_failure(&self, broker_id: i32);
}

/// Drops all notifications; useful for single-node setups and tests.
#[derive(Debug, Default)]
pub struct NoOpControllerChannel;

#[async_trait]
impl ControllerChannel for NoOpControllerChannel {
    async fn propagate_isr_changes(&self, _changes: Vec<IsrChangeEntry>) {}
    async fn notify_log_dir_failure(&self, _broker_id: i32) {}
}
