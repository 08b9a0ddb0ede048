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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::ReplicaManager;
use crate::message::TopicPartition;
use crate::replica::delayed_delete_records::DeleteRecordsPartitionStatus;
use crate::replica::delayed_produce::ProducePartitionStatus;
use crate::replica::{
    DelayedDeleteRecords, DelayedElectLeader, DelayedProduce, HostedPartition, InitialFetchState,
};
use crate::request::{
    DeleteRecordsPartitionResult, DeleteRecordsRequest, ElectLeadersRequest, ErrorCode,
    KafkaError, PartitionResponse, ProduceRequest, DELETE_TO_HIGH_WATERMARK,
    INTERNAL_TOPIC_PREFIX,
};

impl ReplicaManager {
    /// Appends producer records to the leader partitions. With acks=-1 the
    /// response is parked in the produce purgatory until the high watermark
    /// covers every appended batch; otherwise it returns immediately.
    pub async fn append_records(
        self: &Arc<Self>,
        request: ProduceRequest,
    ) -> BTreeMap<TopicPartition, PartitionResponse> {
        let mut responses: BTreeMap<TopicPartition, PartitionResponse> = BTreeMap::new();

        if !matches!(request.required_acks, -1 | 0 | 1) {
            let error = KafkaError::InvalidRequiredAcks(request.required_acks.to_string());
            for topic_data in &request.topic_data {
                for partition_data in &topic_data.partition_data {
                    let tp = TopicPartition::new(
                        topic_data.topic_name.clone(),
                        partition_data.partition,
                    );
                    responses.insert(
                        tp,
                        PartitionResponse::from_error(partition_data.partition, &error),
                    );
                }
            }
            return responses;
        }

        let mut produce_statuses: BTreeMap<TopicPartition, ProducePartitionStatus> =
            BTreeMap::new();
        let mut appended: Vec<TopicPartition> = Vec::new();

        for topic_data in &request.topic_data {
            for partition_data in &topic_data.partition_data {
                let tp = TopicPartition::new(
                    topic_data.topic_name.clone(),
                    partition_data.partition,
                );

                let error = if tp.topic().starts_with(INTERNAL_TOPIC_PREFIX)
                    && !request.internal_topics_allowed
                {
                    Some(KafkaError::InvalidTopic(format!(
                        "cannot append to internal topic {}",
                        tp.topic()
                    )))
                } else {
                    None
                };
                if let Some(error) = error {
                    let response =
                        PartitionResponse::from_error(partition_data.partition, &error);
                    produce_statuses
                        .insert(tp.clone(), ProducePartitionStatus::resolved(response.clone()));
                    responses.insert(tp, response);
                    continue;
                }

                match self.hosted().get(&tp) {
                    HostedPartition::Online(partition) => {
                        match partition
                            .append_records_to_leader(
                                partition_data.message_set.clone(),
                                request.required_acks,
                            )
                            .await
                        {
                            Ok(info) => {
                                let log_start_offset = partition.log_start_offset().await;
                                let response = PartitionResponse::from_append_info(
                                    partition_data.partition,
                                    &info,
                                    log_start_offset,
                                );
                                produce_statuses.insert(
                                    tp.clone(),
                                    ProducePartitionStatus::new(
                                        info.last_offset + 1,
                                        response.clone(),
                                    ),
                                );
                                appended.push(tp.clone());
                                responses.insert(tp, response);
                            }
                            Err(error) => {
                                debug!("append to {} rejected: {}", tp, error);
                                let response = PartitionResponse::from_error(
                                    partition_data.partition,
                                    &error,
                                );
                                produce_statuses.insert(
                                    tp.clone(),
                                    ProducePartitionStatus::resolved(response.clone()),
                                );
                                responses.insert(tp, response);
                            }
                        }
                    }
                    HostedPartition::None => {
                        let error = KafkaError::UnknownTopicOrPartition(tp.to_string());
                        let response =
                            PartitionResponse::from_error(partition_data.partition, &error);
                        produce_statuses
                            .insert(tp.clone(), ProducePartitionStatus::resolved(response.clone()));
                        responses.insert(tp, response);
                    }
                    HostedPartition::Offline => {
                        let error = KafkaError::KafkaStorageError(tp.to_string());
                        let response =
                            PartitionResponse::from_error(partition_data.partition, &error);
                        produce_statuses
                            .insert(tp.clone(), ProducePartitionStatus::resolved(response.clone()));
                        responses.insert(tp, response);
                    }
                }
            }
        }

        // new data may satisfy parked fetches
        for tp in &appended {
            self.fetch_purgatory.check_and_complete(&tp.to_string()).await;
        }

        if request.required_acks == -1 && !appended.is_empty() {
            let (tx, rx) = oneshot::channel();
            let watch_keys: Vec<String> = produce_statuses.keys().map(|tp| tp.to_string()).collect();
            let delayed = Arc::new(DelayedProduce::new(
                request.timeout_ms.max(0) as u64,
                produce_statuses,
                self.clone(),
                tx,
            ));
            self.produce_purgatory
                .try_complete_else_watch(delayed, watch_keys)
                .await;
            match rx.await {
                Ok(final_responses) => final_responses,
                Err(_) => responses,
            }
        } else {
            responses
        }
    }

    /// Leader-side prefix delete; completion waits until the low watermark
    /// (min log start across the ISR) passes the requested offset.
    pub async fn delete_records(
        self: &Arc<Self>,
        request: DeleteRecordsRequest,
    ) -> BTreeMap<TopicPartition, DeleteRecordsPartitionResult> {
        let mut statuses: BTreeMap<TopicPartition, DeleteRecordsPartitionStatus> = BTreeMap::new();

        for (tp, requested_offset) in &request.offsets {
            match self.hosted().get(tp) {
                HostedPartition::Online(partition) => {
                    let target = if *requested_offset == DELETE_TO_HIGH_WATERMARK {
                        partition.high_watermark().await
                    } else {
                        *requested_offset
                    };
                    match partition.delete_records_on_leader(target).await {
                        Ok(_) => {
                            statuses.insert(tp.clone(), DeleteRecordsPartitionStatus::new(target));
                        }
                        Err(error) => {
                            warn!("delete records on {} rejected: {}", tp, error);
                            statuses.insert(
                                tp.clone(),
                                DeleteRecordsPartitionStatus::resolved(
                                    DeleteRecordsPartitionResult {
                                        low_watermark: -1,
                                        error_code: ErrorCode::from(&error) as i16,
                                    },
                                ),
                            );
                        }
                    }
                }
                HostedPartition::None => {
                    statuses.insert(
                        tp.clone(),
                        DeleteRecordsPartitionStatus::resolved(DeleteRecordsPartitionResult {
                            low_watermark: -1,
                            error_code: ErrorCode::UnknownTopicOrPartition as i16,
                        }),
                    );
                }
                HostedPartition::Offline => {
                    statuses.insert(
                        tp.clone(),
                        DeleteRecordsPartitionStatus::resolved(DeleteRecordsPartitionResult {
                            low_watermark: -1,
                            error_code: ErrorCode::KafkaStorageError as i16,
                        }),
                    );
                }
            }
        }

        // the log start moved: parked fetches may now be out of range
        for tp in request.offsets.keys() {
            self.fetch_purgatory.check_and_complete(&tp.to_string()).await;
        }

        let (tx, rx) = oneshot::channel();
        let watch_keys: Vec<String> = statuses.keys().map(|tp| tp.to_string()).collect();
        let delayed = Arc::new(DelayedDeleteRecords::new(
            request.timeout_ms.max(0) as u64,
            statuses,
            self.clone(),
            tx,
        ));
        self.delete_records_purgatory
            .try_complete_else_watch(delayed, watch_keys)
            .await;
        rx.await.unwrap_or_default()
    }

    /// Parks until the metadata view shows the preferred leader elected for
    /// every named partition, or the timeout hits.
    pub async fn elect_leaders(
        self: &Arc<Self>,
        request: ElectLeadersRequest,
    ) -> BTreeMap<TopicPartition, i16> {
        let mut immediate_errors: BTreeMap<TopicPartition, i16> = BTreeMap::new();
        let mut expected_leaders: BTreeMap<TopicPartition, i32> = BTreeMap::new();

        for tp in &request.partitions {
            let preferred = self
                .metadata_cache()
                .partition_metadata(tp)
                .and_then(|metadata| metadata.replicas.first().copied());
            match preferred {
                Some(preferred_leader) => {
                    expected_leaders.insert(tp.clone(), preferred_leader);
                }
                None => {
                    immediate_errors
                        .insert(tp.clone(), ErrorCode::UnknownTopicOrPartition as i16);
                }
            }
        }

        if expected_leaders.is_empty() {
            return immediate_errors;
        }

        let (tx, rx) = oneshot::channel();
        let watch_keys: Vec<String> =
            expected_leaders.keys().map(|tp| tp.to_string()).collect();
        let delayed = Arc::new(DelayedElectLeader::new(
            request.timeout_ms.max(0) as u64,
            expected_leaders,
            self.clone(),
            tx,
        ));
        self.elect_leader_purgatory
            .try_complete_else_watch(delayed, watch_keys)
            .await;

        let mut responses = rx.await.unwrap_or_default();
        responses.append(&mut immediate_errors);
        responses
    }

    /// Stages a future log in the requested directory and hands the
    /// partition to the alter-log-dir mover.
    pub async fn alter_replica_log_dirs(
        self: &Arc<Self>,
        dirs: HashMap<TopicPartition, String>,
    ) -> BTreeMap<TopicPartition, i16> {
        let _guard = self.state_change_lock.lock().await;
        let mut results = BTreeMap::new();
        let mut fetcher_adds: HashMap<TopicPartition, InitialFetchState> = HashMap::new();

        for (tp, dir) in dirs {
            match self.hosted().get(&tp) {
                HostedPartition::Online(partition) => {
                    match self.log_manager.get_or_create_future_log(&tp, &dir).await {
                        Ok(future_log) => {
                            let current_dir = partition
                                .log()
                                .await
                                .map(|log| log.log_dir().to_string());
                            if current_dir.as_deref() == Some(dir.as_str()) {
                                // already there: nothing to move
                                self.log_manager.remove_future_log(&tp);
                                results.insert(tp, ErrorCode::None as i16);
                                continue;
                            }
                            partition.set_future_log(future_log.clone()).await;
                            fetcher_adds.insert(
                                tp.clone(),
                                InitialFetchState {
                                    leader_id: self.local_broker_id,
                                    leader_epoch: partition.leader_epoch().await,
                                    fetch_offset: future_log.log_end_offset(),
                                },
                            );
                            results.insert(tp, ErrorCode::None as i16);
                        }
                        Err(crate::AppError::InvalidValue(_)) => {
                            results.insert(tp, ErrorCode::LogDirNotFound as i16);
                        }
                        Err(_) => {
                            results.insert(tp, ErrorCode::KafkaStorageError as i16);
                        }
                    }
                }
                HostedPartition::None => {
                    results.insert(tp, ErrorCode::UnknownTopicOrPartition as i16);
                }
                HostedPartition::Offline => {
                    results.insert(tp, ErrorCode::KafkaStorageError as i16);
                }
            }
        }

        if !fetcher_adds.is_empty() {
            self.alter_log_dirs_manager()
                .add_fetcher_for_partitions(fetcher_adds);
        }
        results
    }
}
