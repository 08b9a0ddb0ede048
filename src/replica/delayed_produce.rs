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
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crossbeam::atomic::AtomicCell;
use tokio::sync::oneshot;
use tracing::debug;

use crate::message::TopicPartition;
use crate::replica::{HostedPartition, ReplicaManager};
use crate::request::{KafkaError, PartitionResponse};
use crate::utils::DelayedAsyncOperation;

pub type ProduceResultSender = oneshot::Sender<BTreeMap<TopicPartition, PartitionResponse>>;

#[derive(Debug)]
pub(crate) struct ProducePartitionStatus {
    /// offset the high watermark must reach: last appended offset + 1
    required_offset: i64,
    acks_pending: AtomicCell<bool>,
    response: Mutex<PartitionResponse>,
}

impl ProducePartitionStatus {
    pub fn new(required_offset: i64, response: PartitionResponse) -> Self {
        Self {
            required_offset,
            acks_pending: AtomicCell::new(true),
            response: Mutex::new(response),
        }
    }

    /// A partition whose outcome is already final (the append failed).
    pub fn resolved(response: PartitionResponse) -> Self {
        Self {
            required_offset: -1,
            acks_pending: AtomicCell::new(false),
            response: Mutex::new(response),
        }
    }
}

/// An acks=-1 produce parked until every appended partition's high
/// watermark reaches the end of the appended batch.
#[derive(Debug)]
pub struct DelayedProduce {
    delay_ms: u64,
    partition_status: BTreeMap<TopicPartition, ProducePartitionStatus>,
    replica_manager: Arc<ReplicaManager>,
    tx: Mutex<Option<ProduceResultSender>>,
}

impl DelayedProduce {
    pub(crate) fn new(
        delay_ms: u64,
        partition_status: BTreeMap<TopicPartition, ProducePartitionStatus>,
        replica_manager: Arc<ReplicaManager>,
        tx: ProduceResultSender,
    ) -> Self {
        Self {
            delay_ms,
            partition_status,
            replica_manager,
            tx: Mutex::new(Some(tx)),
        }
    }

    fn set_error(status: &ProducePartitionStatus, error: &KafkaError) {
        let mut response = status
            .response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let partition = response.partition;
        *response = PartitionResponse::from_error(partition, error);
    }

    /// Resolves what can be resolved now; returns true when nothing is
    /// pending anymore.
    async fn resolve_statuses(&self) -> bool {
        let mut all_resolved = true;
        for (tp, status) in &self.partition_status {
            if !status.acks_pending.load() {
                continue;
            }
            match self.replica_manager.hosted().get(tp) {
                HostedPartition::Online(partition) => {
                    let (reached, error) = partition
                        .check_enough_replicas_reach_offset(status.required_offset)
                        .await;
                    if let Some(error) = error {
                        status.acks_pending.store(false);
                        Self::set_error(status, &error);
                    } else if reached {
                        status.acks_pending.store(false);
                    } else {
                        all_resolved = false;
                    }
                }
                HostedPartition::None => {
                    status.acks_pending.store(false);
                    Self::set_error(
                        status,
                        &KafkaError::UnknownTopicOrPartition(tp.to_string()),
                    );
                }
                HostedPartition::Offline => {
                    status.acks_pending.store(false);
                    Self::set_error(status, &KafkaError::KafkaStorageError(tp.to_string()));
                }
            }
        }
        all_resolved
    }

    fn current_responses(&self) -> BTreeMap<TopicPartition, PartitionResponse> {
        self.partition_status
            .iter()
            .map(|(tp, status)| {
                (
                    tp.clone(),
                    status
                        .response
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .clone(),
                )
            })
            .collect()
    }
}

impl DelayedAsyncOperation for DelayedProduce {
    fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    async fn try_complete(&self) -> bool {
        self.resolve_statuses().await
    }

    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // partitions still pending (expiry path) keep the state the
            // leader can vouch for right now: an error if leadership moved,
            // otherwise the appended offsets
            self.resolve_statuses().await;
            if let Some(tx) = self
                .tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
            {
                let _ = tx.send(self.current_responses());
            }
        })
    }

    async fn on_expiration(&self) {
        debug!("delayed produce expired");
    }
}
