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

//! Follower replication workers.
//!
//! A fetcher manager owns one long-lived worker per source broker. Each
//! worker issues multi-partition fetches against its leader endpoint and
//! applies the results to the local (or future) log, in offset order per
//! partition. The same machinery serves two managers: follower-from-leader
//! replication and the alter-log-dir future-replica mover.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::log::LogManager;
use crate::message::TopicPartition;
use crate::replica::HostedPartitions;
use crate::request::{
    ErrorCode, FetchPartitionData, FetchRequest, IsolationLevel, PartitionFetchData,
};
use crate::service::ReplicationConfig;
use crate::log::FetchIsolation;
use crate::{AppError, AppResult, Shutdown};

/// Where a partition's replication starts when it is handed to a fetcher.
#[derive(Debug, Clone, Copy)]
pub struct InitialFetchState {
    pub leader_id: i32,
    pub leader_epoch: i32,
    pub fetch_offset: i64,
}

/// RPC surface of a source broker, as seen by a fetcher worker. The network
/// client behind it is out of scope; tests wire it straight to another
/// replica manager.
#[async_trait]
pub trait LeaderEndpoint: Send + Sync + std::fmt::Debug {
    fn broker_id(&self) -> i32;

    async fn fetch(
        &self,
        request: FetchRequest,
    ) -> AppResult<BTreeMap<TopicPartition, FetchPartitionData>>;

    async fn earliest_offset(&self, topic_partition: &TopicPartition) -> AppResult<i64>;

    async fn latest_offset(&self, topic_partition: &TopicPartition) -> AppResult<i64>;
}

pub trait LeaderEndpointFactory: Send + Sync + std::fmt::Debug {
    fn endpoint_for(&self, broker_id: i32) -> Option<Arc<dyn LeaderEndpoint>>;
}

#[derive(Debug)]
pub(crate) struct ApplyOutcome {
    pub new_fetch_offset: i64,
    /// the partition finished its job (future replica caught up)
    pub done: bool,
}

/// Applies fetched data to the local replica. Two implementations: one
/// appends to the current log (follower replication), one to the future log
/// (cross-dir move).
#[async_trait]
pub(crate) trait FetchApplier: Send + Sync + std::fmt::Debug {
    async fn log_start_offset(&self, topic_partition: &TopicPartition) -> Option<i64>;

    async fn log_end_offset(&self, topic_partition: &TopicPartition) -> Option<i64>;

    async fn truncate_to(&self, topic_partition: &TopicPartition, offset: i64) -> AppResult<()>;

    async fn apply(
        &self,
        topic_partition: &TopicPartition,
        leader_epoch: i32,
        data: FetchPartitionData,
    ) -> AppResult<ApplyOutcome>;
}

#[derive(Debug)]
pub(crate) struct FollowerLogApplier {
    hosted: Arc<HostedPartitions>,
}

impl FollowerLogApplier {
    pub fn new(hosted: Arc<HostedPartitions>) -> Self {
        Self { hosted }
    }
}

#[async_trait]
impl FetchApplier for FollowerLogApplier {
    async fn log_start_offset(&self, topic_partition: &TopicPartition) -> Option<i64> {
        let partition = self.hosted.online(topic_partition)?;
        Some(partition.log_start_offset().await)
    }

    async fn log_end_offset(&self, topic_partition: &TopicPartition) -> Option<i64> {
        let partition = self.hosted.online(topic_partition)?;
        Some(partition.log_end_offset().await)
    }

    async fn truncate_to(&self, topic_partition: &TopicPartition, offset: i64) -> AppResult<()> {
        let partition = self.hosted.online(topic_partition).ok_or_else(|| {
            AppError::IllegalStateError(format!("{} not hosted", topic_partition))
        })?;
        let log = partition.log().await.ok_or_else(|| {
            AppError::IllegalStateError(format!("{} has no local log", topic_partition))
        })?;
        log.truncate_to(offset).await
    }

    async fn apply(
        &self,
        topic_partition: &TopicPartition,
        leader_epoch: i32,
        data: FetchPartitionData,
    ) -> AppResult<ApplyOutcome> {
        let partition = self.hosted.online(topic_partition).ok_or_else(|| {
            AppError::IllegalStateError(format!("{} not hosted", topic_partition))
        })?;
        if !data.records.is_empty() {
            partition
                .append_records_to_follower(data.records, leader_epoch)
                .await
                .map_err(|e| AppError::IllegalStateError(e.to_string()))?;
        }
        let log = partition.log().await.ok_or_else(|| {
            AppError::IllegalStateError(format!("{} has no local log", topic_partition))
        })?;
        // the follower HW trails the leader's, bounded by the local log end
        if data.high_watermark >= 0 {
            log.update_high_watermark(data.high_watermark.min(log.log_end_offset()));
        }
        // a leader prefix delete propagates through its log start offset
        if data.log_start_offset > log.log_start_offset() {
            log.delete_records_before(data.log_start_offset.min(log.log_end_offset()))
                .await?;
        }
        Ok(ApplyOutcome {
            new_fetch_offset: log.log_end_offset(),
            done: false,
        })
    }
}

#[derive(Debug)]
pub(crate) struct FutureLogApplier {
    hosted: Arc<HostedPartitions>,
    log_manager: Arc<LogManager>,
}

impl FutureLogApplier {
    pub fn new(hosted: Arc<HostedPartitions>, log_manager: Arc<LogManager>) -> Self {
        Self {
            hosted,
            log_manager,
        }
    }
}

#[async_trait]
impl FetchApplier for FutureLogApplier {
    async fn log_start_offset(&self, topic_partition: &TopicPartition) -> Option<i64> {
        Some(self.log_manager.future_log(topic_partition)?.log_start_offset())
    }

    async fn log_end_offset(&self, topic_partition: &TopicPartition) -> Option<i64> {
        Some(self.log_manager.future_log(topic_partition)?.log_end_offset())
    }

    async fn truncate_to(&self, topic_partition: &TopicPartition, offset: i64) -> AppResult<()> {
        let future_log = self.log_manager.future_log(topic_partition).ok_or_else(|| {
            AppError::IllegalStateError(format!("{} has no future log", topic_partition))
        })?;
        future_log.truncate_to(offset).await
    }

    async fn apply(
        &self,
        topic_partition: &TopicPartition,
        leader_epoch: i32,
        data: FetchPartitionData,
    ) -> AppResult<ApplyOutcome> {
        let partition = self.hosted.online(topic_partition).ok_or_else(|| {
            AppError::IllegalStateError(format!("{} not hosted", topic_partition))
        })?;
        let future_log = self.log_manager.future_log(topic_partition).ok_or_else(|| {
            AppError::IllegalStateError(format!("{} has no future log", topic_partition))
        })?;
        if !data.records.is_empty() {
            future_log
                .append(data.records, leader_epoch, crate::log::NO_TIMESTAMP)
                .await?;
        }

        let current_end = partition.log_end_offset().await;
        if future_log.log_end_offset() >= current_end {
            // caught up: promote the future log in both registries
            future_log.update_high_watermark(partition.high_watermark().await);
            partition.swap_in_future_log().await;
            self.log_manager.replace_current_with_future(topic_partition);
            info!("{} future replica caught up and was promoted", topic_partition);
            return Ok(ApplyOutcome {
                new_fetch_offset: future_log.log_end_offset(),
                done: true,
            });
        }
        Ok(ApplyOutcome {
            new_fetch_offset: future_log.log_end_offset(),
            done: false,
        })
    }
}

/// Reads from the local current logs; source endpoint of the alter-log-dir
/// mover.
#[derive(Debug)]
pub struct LocalLeaderEndpoint {
    broker_id: i32,
    hosted: Arc<HostedPartitions>,
}

impl LocalLeaderEndpoint {
    pub fn new(broker_id: i32, hosted: Arc<HostedPartitions>) -> Self {
        Self { broker_id, hosted }
    }

    fn online(&self, topic_partition: &TopicPartition) -> AppResult<Arc<super::Partition>> {
        self.hosted.online(topic_partition).ok_or_else(|| {
            AppError::IllegalStateError(format!("{} not hosted", topic_partition))
        })
    }
}

#[async_trait]
impl LeaderEndpoint for LocalLeaderEndpoint {
    fn broker_id(&self) -> i32 {
        self.broker_id
    }

    async fn fetch(
        &self,
        request: FetchRequest,
    ) -> AppResult<BTreeMap<TopicPartition, FetchPartitionData>> {
        let mut responses = BTreeMap::new();
        for (tp, partition_data) in &request.fetch_data {
            let data = match self.online(tp) {
                Ok(partition) => {
                    match partition
                        .read_records(
                            partition_data.fetch_offset,
                            None,
                            partition_data.max_bytes,
                            FetchIsolation::LogEnd,
                            false,
                            true,
                        )
                        .await
                    {
                        Ok(read_info) => {
                            let mut data = FetchPartitionData::from_read_info(read_info);
                            data.high_watermark = partition.high_watermark().await;
                            data
                        }
                        Err(error) => FetchPartitionData::from_error(&error),
                    }
                }
                Err(_) => FetchPartitionData::from_error(
                    &crate::request::KafkaError::UnknownTopicOrPartition(tp.to_string()),
                ),
            };
            responses.insert(tp.clone(), data);
        }
        Ok(responses)
    }

    async fn earliest_offset(&self, topic_partition: &TopicPartition) -> AppResult<i64> {
        Ok(self.online(topic_partition)?.log_start_offset().await)
    }

    async fn latest_offset(&self, topic_partition: &TopicPartition) -> AppResult<i64> {
        Ok(self.online(topic_partition)?.log_end_offset().await)
    }
}

#[derive(Debug, Clone, Copy)]
struct PartitionFetchState {
    fetch_offset: i64,
    leader_epoch: i32,
    /// set on epoch fencing; cleared only by the next role directive
    paused: bool,
}

/// One worker per source broker. The loop builds a multi-partition fetch,
/// ships it, and applies the per-partition results. Appends for a single
/// partition are strictly in offset order; across partitions nothing is
/// guaranteed.
#[derive(Debug)]
pub(crate) struct FetcherWorker {
    source_broker_id: i32,
    replica_id: i32,
    endpoint: Arc<dyn LeaderEndpoint>,
    applier: Arc<dyn FetchApplier>,
    partition_states: DashMap<TopicPartition, PartitionFetchState>,
    wake: Notify,
    stopped: AtomicCell<bool>,
    fetch_max_wait_ms: i64,
    fetch_min_bytes: i32,
    fetch_max_bytes: i32,
}

impl FetcherWorker {
    fn new(
        source_broker_id: i32,
        replica_id: i32,
        endpoint: Arc<dyn LeaderEndpoint>,
        applier: Arc<dyn FetchApplier>,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            source_broker_id,
            replica_id,
            endpoint,
            applier,
            partition_states: DashMap::new(),
            wake: Notify::new(),
            stopped: AtomicCell::new(false),
            fetch_max_wait_ms: config.fetch_max_wait_ms,
            fetch_min_bytes: config.fetch_min_bytes,
            fetch_max_bytes: config.fetch_max_bytes,
        }
    }

    fn add_partitions(&self, partitions: Vec<(TopicPartition, InitialFetchState)>) {
        for (tp, initial) in partitions {
            self.partition_states.insert(
                tp,
                PartitionFetchState {
                    fetch_offset: initial.fetch_offset,
                    leader_epoch: initial.leader_epoch,
                    paused: false,
                },
            );
        }
        self.wake.notify_one();
    }

    fn remove_partitions(&self, partitions: &[TopicPartition]) {
        for tp in partitions {
            self.partition_states.remove(tp);
        }
    }

    fn partition_count(&self) -> usize {
        self.partition_states.len()
    }

    fn stop(&self) {
        self.stopped.store(true);
        self.wake.notify_one();
    }

    async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        debug!("fetcher worker for broker {} started", self.source_broker_id);
        loop {
            if self.stopped.load() {
                break;
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.fetch_cycle() => {}
            }
        }
        debug!("fetcher worker for broker {} stopped", self.source_broker_id);
    }

    async fn fetch_cycle(&self) {
        let snapshot: Vec<(TopicPartition, PartitionFetchState)> = self
            .partition_states
            .iter()
            .filter(|entry| !entry.value().paused)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let mut fetch_data = BTreeMap::new();
        for (tp, state) in snapshot {
            let log_start_offset = self.applier.log_start_offset(&tp).await.unwrap_or(0);
            fetch_data.insert(
                tp,
                PartitionFetchData {
                    fetch_offset: state.fetch_offset,
                    current_leader_epoch: Some(state.leader_epoch),
                    log_start_offset,
                    max_bytes: self.fetch_max_bytes,
                },
            );
        }

        if fetch_data.is_empty() {
            let _ = tokio::time::timeout(
                Duration::from_millis(self.fetch_max_wait_ms.max(1) as u64),
                self.wake.notified(),
            )
            .await;
            return;
        }

        let request = FetchRequest {
            replica_id: self.replica_id,
            max_wait_ms: self.fetch_max_wait_ms,
            min_bytes: self.fetch_min_bytes,
            max_bytes: self.fetch_max_bytes,
            hard_max_bytes_limit: false,
            isolation_level: IsolationLevel::ReadUncommitted,
            fetch_data,
            client_metadata: None,
        };

        match self.endpoint.fetch(request).await {
            Ok(responses) => {
                for (tp, data) in responses {
                    self.process_partition_data(&tp, data).await;
                }
            }
            Err(error) => {
                warn!(
                    "fetch from broker {} failed: {}",
                    self.source_broker_id, error
                );
                tokio::time::sleep(Duration::from_millis(
                    self.fetch_max_wait_ms.max(1) as u64
                ))
                .await;
            }
        }
    }

    async fn process_partition_data(&self, tp: &TopicPartition, data: FetchPartitionData) {
        let state = match self.partition_states.get(tp) {
            Some(entry) => *entry.value(),
            None => return,
        };
        if state.paused {
            return;
        }

        match ErrorCode::from_code(data.error_code) {
            ErrorCode::None => match self.applier.apply(tp, state.leader_epoch, data).await {
                Ok(outcome) => {
                    if outcome.done {
                        self.partition_states.remove(tp);
                    } else if let Some(mut entry) = self.partition_states.get_mut(tp) {
                        entry.fetch_offset = outcome.new_fetch_offset;
                    }
                }
                Err(error) => {
                    warn!("applying fetched data for {} failed: {}", tp, error);
                }
            },
            ErrorCode::OffsetOutOfRange => match self.handle_offset_out_of_range(tp).await {
                Ok(new_offset) => {
                    if let Some(mut entry) = self.partition_states.get_mut(tp) {
                        entry.fetch_offset = new_offset;
                    }
                }
                Err(error) => {
                    warn!("offset reconciliation for {} failed: {}", tp, error);
                }
            },
            ErrorCode::FencedLeaderEpoch | ErrorCode::UnknownLeaderEpoch => {
                warn!(
                    "{} fenced at epoch {}, pausing until the next role directive",
                    tp, state.leader_epoch
                );
                if let Some(mut entry) = self.partition_states.get_mut(tp) {
                    entry.paused = true;
                }
            }
            ErrorCode::NotLeaderForPartition | ErrorCode::UnknownTopicOrPartition => {
                debug!("{} no longer served by broker {}", tp, self.source_broker_id);
                self.partition_states.remove(tp);
            }
            other => {
                warn!("fetch for {} returned {:?}", tp, other);
            }
        }
    }

    /// The leader's log no longer covers our fetch position: either the
    /// leader lost data (truncate to its end) or it trimmed its prefix past
    /// us (jump to its start).
    async fn handle_offset_out_of_range(&self, tp: &TopicPartition) -> AppResult<i64> {
        let leader_end = self.endpoint.latest_offset(tp).await?;
        let local_end = self.applier.log_end_offset(tp).await.unwrap_or(0);
        if leader_end < local_end {
            self.applier.truncate_to(tp, leader_end).await?;
            info!("{} truncated to leader log end {}", tp, leader_end);
            Ok(leader_end)
        } else {
            let leader_start = self.endpoint.earliest_offset(tp).await?;
            Ok(local_end.max(leader_start))
        }
    }
}

/// Owns the workers for one replication flavor (follower or alter-log-dir),
/// keyed by source broker.
#[derive(Debug)]
pub struct FetcherManager {
    name: String,
    replica_id: i32,
    endpoint_factory: Arc<dyn LeaderEndpointFactory>,
    applier: Arc<dyn FetchApplier>,
    workers: DashMap<i32, Arc<FetcherWorker>>,
    config: ReplicationConfig,
    notify_shutdown: broadcast::Sender<()>,
}

impl FetcherManager {
    pub(crate) fn new(
        name: impl Into<String>,
        replica_id: i32,
        endpoint_factory: Arc<dyn LeaderEndpointFactory>,
        applier: Arc<dyn FetchApplier>,
        config: ReplicationConfig,
        notify_shutdown: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            replica_id,
            endpoint_factory,
            applier,
            workers: DashMap::new(),
            config,
            notify_shutdown,
        })
    }

    /// Spawns the periodic sweeper that reaps workers left without
    /// partitions.
    pub fn start_idle_sweeper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        let interval = Duration::from_millis(self.config.fetcher_idle_sweep_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => manager.shutdown_idle_fetchers(),
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    pub fn add_fetcher_for_partitions(
        &self,
        partitions: HashMap<TopicPartition, InitialFetchState>,
    ) {
        let mut by_leader: HashMap<i32, Vec<(TopicPartition, InitialFetchState)>> = HashMap::new();
        for (tp, initial) in partitions {
            by_leader.entry(initial.leader_id).or_default().push((tp, initial));
        }

        for (leader_id, assigned) in by_leader {
            let endpoint = match self.endpoint_factory.endpoint_for(leader_id) {
                Some(endpoint) => endpoint,
                None => {
                    warn!(
                        "{}: no endpoint for broker {}, {} partitions not fetched",
                        self.name,
                        leader_id,
                        assigned.len()
                    );
                    continue;
                }
            };
            let worker = self
                .workers
                .entry(leader_id)
                .or_insert_with(|| {
                    let worker = Arc::new(FetcherWorker::new(
                        leader_id,
                        self.replica_id,
                        endpoint,
                        self.applier.clone(),
                        &self.config,
                    ));
                    let run_worker = worker.clone();
                    let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
                    tokio::spawn(run_worker.run(shutdown));
                    worker
                })
                .value()
                .clone();
            worker.add_partitions(assigned);
        }
    }

    pub fn remove_fetcher_for_partitions(&self, partitions: &[TopicPartition]) {
        for entry in self.workers.iter() {
            entry.value().remove_partitions(partitions);
        }
    }

    pub fn shutdown_idle_fetchers(&self) {
        let idle: Vec<i32> = self
            .workers
            .iter()
            .filter(|entry| entry.value().partition_count() == 0)
            .map(|entry| *entry.key())
            .collect();
        for broker_id in idle {
            if let Some((_, worker)) = self
                .workers
                .remove_if(&broker_id, |_, worker| worker.partition_count() == 0)
            {
                worker.stop();
                debug!("{}: reaped idle worker for broker {}", self.name, broker_id);
            }
        }
    }

    pub fn close(&self) {
        for entry in self.workers.iter() {
            entry.value().stop();
        }
        self.workers.clear();
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
