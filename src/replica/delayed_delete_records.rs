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
use crate::request::{DeleteRecordsPartitionResult, ErrorCode, KafkaError};
use crate::utils::DelayedAsyncOperation;

pub type DeleteRecordsResultSender =
    oneshot::Sender<BTreeMap<TopicPartition, DeleteRecordsPartitionResult>>;

#[derive(Debug)]
pub(crate) struct DeleteRecordsPartitionStatus {
    required_offset: i64,
    pending: AtomicCell<bool>,
    result: Mutex<DeleteRecordsPartitionResult>,
}

impl DeleteRecordsPartitionStatus {
    pub fn new(required_offset: i64) -> Self {
        Self {
            required_offset,
            pending: AtomicCell::new(true),
            result: Mutex::new(DeleteRecordsPartitionResult {
                low_watermark: -1,
                error_code: ErrorCode::None as i16,
            }),
        }
    }

    /// A partition whose outcome is already final (the delete failed).
    pub fn resolved(result: DeleteRecordsPartitionResult) -> Self {
        Self {
            required_offset: -1,
            pending: AtomicCell::new(false),
            result: Mutex::new(result),
        }
    }
}

/// A delete-records request parked until the low watermark (min log start
/// across the ISR) passes the requested offset on every partition.
#[derive(Debug)]
pub struct DelayedDeleteRecords {
    delay_ms: u64,
    partition_status: BTreeMap<TopicPartition, DeleteRecordsPartitionStatus>,
    replica_manager: Arc<ReplicaManager>,
    tx: Mutex<Option<DeleteRecordsResultSender>>,
}

impl DelayedDeleteRecords {
    pub(crate) fn new(
        delay_ms: u64,
        partition_status: BTreeMap<TopicPartition, DeleteRecordsPartitionStatus>,
        replica_manager: Arc<ReplicaManager>,
        tx: DeleteRecordsResultSender,
    ) -> Self {
        Self {
            delay_ms,
            partition_status,
            replica_manager,
            tx: Mutex::new(Some(tx)),
        }
    }

    fn set_result(status: &DeleteRecordsPartitionStatus, result: DeleteRecordsPartitionResult) {
        *status
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = result;
    }

    fn set_error(status: &DeleteRecordsPartitionStatus, error: &KafkaError) {
        Self::set_result(
            status,
            DeleteRecordsPartitionResult {
                low_watermark: -1,
                error_code: ErrorCode::from(error) as i16,
            },
        );
    }

    async fn resolve_statuses(&self) -> bool {
        let mut all_resolved = true;
        for (tp, status) in &self.partition_status {
            if !status.pending.load() {
                continue;
            }
            match self.replica_manager.hosted().get(tp) {
                HostedPartition::Online(partition) => {
                    if !partition.is_leader().await {
                        status.pending.store(false);
                        Self::set_error(
                            status,
                            &KafkaError::NotLeaderForPartition(tp.to_string()),
                        );
                        continue;
                    }
                    let low_watermark = partition.low_watermark().await;
                    if low_watermark >= status.required_offset {
                        status.pending.store(false);
                        Self::set_result(
                            status,
                            DeleteRecordsPartitionResult {
                                low_watermark,
                                error_code: ErrorCode::None as i16,
                            },
                        );
                    } else {
                        all_resolved = false;
                    }
                }
                HostedPartition::None => {
                    status.pending.store(false);
                    Self::set_error(
                        status,
                        &KafkaError::UnknownTopicOrPartition(tp.to_string()),
                    );
                }
                HostedPartition::Offline => {
                    status.pending.store(false);
                    Self::set_error(status, &KafkaError::KafkaStorageError(tp.to_string()));
                }
            }
        }
        all_resolved
    }
}

impl DelayedAsyncOperation for DelayedDeleteRecords {
    fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    async fn try_complete(&self) -> bool {
        self.resolve_statuses().await
    }

    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.resolve_statuses().await;
            let responses = self
                .partition_status
                .iter()
                .map(|(tp, status)| {
                    if status.pending.load() {
                        // deadline hit before followers moved their log start
                        Self::set_error(
                            status,
                            &KafkaError::RequestTimedOut(tp.to_string()),
                        );
                    }
                    (
                        tp.clone(),
                        status
                            .result
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .clone(),
                    )
                })
                .collect();
            if let Some(tx) = self
                .tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
            {
                let _ = tx.send(responses);
            }
        })
    }

    async fn on_expiration(&self) {
        debug!("delayed delete-records expired");
    }
}
