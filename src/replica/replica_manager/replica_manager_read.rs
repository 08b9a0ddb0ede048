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
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use super::ReplicaManager;
use crate::log::{EpochEndOffset, FetchIsolation, TimestampAndOffset, UNKNOWN_OFFSET};
use crate::message::TopicPartition;
use crate::replica::{
    DelayedFetch, HostedPartition, Partition, PartitionView, ReplicaView,
};
use crate::request::{
    ClientMetadata, ErrorCode, FetchPartitionData, FetchRequest, FetchResponse, IsolationLevel,
    KafkaError, KafkaResult, LogDirInfo, LogDirPartitionInfo,
};

/// What one pass over the local logs produced.
#[derive(Debug)]
pub(crate) struct LocalReadOutcome {
    pub responses: BTreeMap<TopicPartition, FetchPartitionData>,
    pub bytes_readable: usize,
    pub any_error: bool,
    pub needs_hw_update: bool,
}

impl ReplicaManager {
    /// Serves a fetch from a consumer, a follower replica, or the internal
    /// future-replica mover. Completes immediately when enough bytes are
    /// already readable, any partition errored, the caller asked for no
    /// wait, or a follower must learn the current high watermark; otherwise
    /// the request parks in the fetch purgatory.
    pub async fn fetch_messages(self: &Arc<Self>, request: FetchRequest) -> FetchResponse {
        let fetch_isolation = if request.is_from_follower() || request.is_from_future_replica() {
            FetchIsolation::LogEnd
        } else if request.isolation_level == IsolationLevel::ReadCommitted {
            FetchIsolation::TxnCommitted
        } else {
            FetchIsolation::HighWatermark
        };

        let outcome = self
            .read_from_local_log(&request, fetch_isolation, true)
            .await;

        let complete_now = request.max_wait_ms <= 0
            || request.fetch_data.is_empty()
            || outcome.bytes_readable >= request.min_bytes.max(0) as usize
            || outcome.any_error
            || outcome.needs_hw_update;

        if complete_now {
            return FetchResponse::new(outcome.responses);
        }

        let (tx, rx) = oneshot::channel();
        let watch_keys: Vec<String> = request
            .fetch_data
            .keys()
            .map(|tp| tp.to_string())
            .collect();
        let delayed = Arc::new(DelayedFetch::new(
            self.clone(),
            request,
            fetch_isolation,
            tx,
        ));
        self.fetch_purgatory
            .try_complete_else_watch(delayed, watch_keys)
            .await;
        match rx.await {
            Ok(responses) => FetchResponse::new(responses),
            Err(_) => {
                debug!("delayed fetch dropped without completing");
                FetchResponse::new(BTreeMap::new())
            }
        }
    }

    /// One pass over the local logs for a fetch request. When
    /// `update_follower_state` is set (the initial pass of a follower
    /// fetch), per-follower progress is recorded, the ISR may expand and
    /// the high watermark may advance, with the corresponding purgatory
    /// pokes.
    pub(crate) async fn read_from_local_log(
        self: &Arc<Self>,
        request: &FetchRequest,
        fetch_isolation: FetchIsolation,
        update_follower_state: bool,
    ) -> LocalReadOutcome {
        let fetch_only_from_leader = !request.is_from_future_replica();
        let now_ms = self.clock.now_ms();
        let mut responses = BTreeMap::new();
        let mut bytes_readable = 0usize;
        let mut any_error = false;
        let mut needs_hw_update = false;
        let mut limit = request.max_bytes.max(0);
        let mut hw_advanced_partitions: Vec<TopicPartition> = Vec::new();

        for (tp, partition_data) in &request.fetch_data {
            let partition = match self.hosted().get(tp) {
                HostedPartition::Online(partition) => partition,
                HostedPartition::None => {
                    any_error = true;
                    responses.insert(
                        tp.clone(),
                        FetchPartitionData::from_error(&KafkaError::UnknownTopicOrPartition(
                            tp.to_string(),
                        )),
                    );
                    continue;
                }
                HostedPartition::Offline => {
                    any_error = true;
                    responses.insert(
                        tp.clone(),
                        FetchPartitionData::from_error(&KafkaError::KafkaStorageError(
                            tp.to_string(),
                        )),
                    );
                    continue;
                }
            };

            if request.is_from_consumer() {
                if let Some(client_metadata) = &request.client_metadata {
                    if let Some(preferred) = self
                        .find_preferred_read_replica(
                            &partition,
                            client_metadata,
                            partition_data.fetch_offset,
                            now_ms,
                        )
                        .await
                    {
                        responses.insert(
                            tp.clone(),
                            FetchPartitionData::preferred_replica_hint(preferred),
                        );
                        continue;
                    }
                }
            }

            let min_one_message = !request.hard_max_bytes_limit && bytes_readable == 0;
            let read_result = partition
                .read_records(
                    partition_data.fetch_offset,
                    partition_data.current_leader_epoch,
                    partition_data.max_bytes.min(limit),
                    fetch_isolation,
                    fetch_only_from_leader,
                    min_one_message,
                )
                .await;

            match read_result {
                Ok(read_info) => {
                    let size = read_info.records.size();
                    bytes_readable += size;
                    limit = (limit - size as i32).max(0);
                    let mut data = FetchPartitionData::from_read_info(read_info);

                    if request.is_from_follower() {
                        if update_follower_state {
                            let (fetch_outcome, isr_change) = partition
                                .update_follower_fetch_state(
                                    request.replica_id,
                                    partition_data.fetch_offset,
                                    partition_data.log_start_offset,
                                    now_ms,
                                )
                                .await;
                            if let Some(change) = isr_change {
                                self.isr_change_tracker.record(change);
                            }
                            if fetch_outcome.hw_advanced || fetch_outcome.isr_expanded {
                                hw_advanced_partitions.push(tp.clone());
                            }
                        }
                        if partition.follower_needs_hw_update(request.replica_id).await {
                            needs_hw_update = true;
                        }
                        data.high_watermark = partition.high_watermark().await;
                        partition
                            .record_follower_sent_high_watermark(
                                request.replica_id,
                                data.high_watermark,
                            )
                            .await;
                    }
                    responses.insert(tp.clone(), data);
                }
                Err(error) => {
                    debug!("read of {} failed: {}", tp, error);
                    any_error = true;
                    responses.insert(tp.clone(), FetchPartitionData::from_error(&error));
                }
            }
        }

        if update_follower_state {
            for tp in &hw_advanced_partitions {
                let key = tp.to_string();
                self.produce_purgatory.check_and_complete(&key).await;
                self.fetch_purgatory.check_and_complete(&key).await;
            }
            if request.is_from_follower() {
                // follower log starts moved: the low watermark may have too
                for tp in request.fetch_data.keys() {
                    self.delete_records_purgatory
                        .check_and_complete(&tp.to_string())
                        .await;
                }
            }
        }

        LocalReadOutcome {
            responses,
            bytes_readable,
            any_error,
            needs_hw_update,
        }
    }

    /// Offers the selector the ISR members able to serve `fetch_offset`.
    /// Returns a broker id only when it differs from the local one.
    async fn find_preferred_read_replica(
        &self,
        partition: &Arc<Partition>,
        client_metadata: &ClientMetadata,
        fetch_offset: i64,
        now_ms: i64,
    ) -> Option<i32> {
        if !partition.is_leader().await {
            return None;
        }
        let tp = partition.topic_partition().clone();
        let endpoints = self.metadata_cache().partition_replica_endpoints(&tp);
        let mut replicas = Vec::new();
        for replica_id in partition.isr().await {
            if replica_id == self.local_broker_id {
                continue;
            }
            let Some(endpoint) = endpoints.get(&replica_id) else {
                continue;
            };
            let Some(state) = partition.replica_state(replica_id).await else {
                continue;
            };
            if state.log_end_offset == UNKNOWN_OFFSET
                || state.log_start_offset == UNKNOWN_OFFSET
            {
                continue;
            }
            if state.log_start_offset <= fetch_offset && fetch_offset <= state.log_end_offset {
                replicas.push(ReplicaView {
                    broker_id: replica_id,
                    endpoint: endpoint.clone(),
                    log_start_offset: state.log_start_offset,
                    log_end_offset: state.log_end_offset,
                    time_since_last_caught_up_ms: now_ms - state.last_caught_up_time_ms,
                });
            }
        }
        if replicas.is_empty() {
            return None;
        }
        let view = PartitionView {
            leader_id: self.local_broker_id,
            replicas,
        };
        self.replica_selector
            .select(&tp, client_metadata, &view)
            .map(|node| node.id)
            .filter(|id| *id != self.local_broker_id)
    }

    pub async fn fetch_offset_for_timestamp(
        &self,
        topic_partition: &TopicPartition,
        timestamp: i64,
        isolation_level: Option<IsolationLevel>,
        current_leader_epoch: Option<i32>,
        fetch_only_from_leader: bool,
    ) -> KafkaResult<Option<TimestampAndOffset>> {
        match self.hosted().get(topic_partition) {
            HostedPartition::Online(partition) => {
                let isolation = isolation_level.map(|level| match level {
                    IsolationLevel::ReadCommitted => FetchIsolation::TxnCommitted,
                    IsolationLevel::ReadUncommitted => FetchIsolation::HighWatermark,
                });
                partition
                    .fetch_offset_for_timestamp(
                        timestamp,
                        isolation,
                        current_leader_epoch,
                        fetch_only_from_leader,
                    )
                    .await
            }
            HostedPartition::None => Err(KafkaError::UnknownTopicOrPartition(
                topic_partition.to_string(),
            )),
            HostedPartition::Offline => Err(KafkaError::KafkaStorageError(
                topic_partition.to_string(),
            )),
        }
    }

    /// Epoch → end-offset lookups for follower truncation.
    pub async fn last_offset_for_leader_epoch(
        &self,
        requests: BTreeMap<TopicPartition, (Option<i32>, i32)>,
    ) -> BTreeMap<TopicPartition, KafkaResult<EpochEndOffset>> {
        let mut results = BTreeMap::new();
        for (tp, (current_leader_epoch, requested_epoch)) in requests {
            let result = match self.hosted().get(&tp) {
                HostedPartition::Online(partition) => {
                    partition
                        .last_offset_for_leader_epoch(current_leader_epoch, requested_epoch)
                        .await
                }
                HostedPartition::None => {
                    Err(KafkaError::UnknownTopicOrPartition(tp.to_string()))
                }
                HostedPartition::Offline => {
                    Err(KafkaError::KafkaStorageError(tp.to_string()))
                }
            };
            results.insert(tp, result);
        }
        results
    }

    /// Per-directory inventory, including staged future replicas.
    pub async fn describe_log_dirs(&self) -> Vec<LogDirInfo> {
        let mut infos = Vec::new();
        for dir in &self.config.log.log_dirs {
            if !self.log_manager.is_dir_online(dir) {
                infos.push(LogDirInfo {
                    dir: dir.clone(),
                    error_code: ErrorCode::KafkaStorageError as i16,
                    partitions: Vec::new(),
                });
                continue;
            }
            let mut partitions = Vec::new();
            for (tp, log) in self.log_manager.logs_in_dir(dir) {
                partitions.push(LogDirPartitionInfo {
                    topic_partition: tp,
                    size_in_bytes: log.size_in_bytes(),
                    log_end_offset: log.log_end_offset(),
                    is_future: false,
                });
            }
            for (tp, log) in self.log_manager.future_logs_in_dir(dir) {
                partitions.push(LogDirPartitionInfo {
                    topic_partition: tp,
                    size_in_bytes: log.size_in_bytes(),
                    log_end_offset: log.log_end_offset(),
                    is_future: true,
                });
            }
            infos.push(LogDirInfo {
                dir: dir.clone(),
                error_code: ErrorCode::None as i16,
                partitions,
            });
        }
        infos
    }
}
