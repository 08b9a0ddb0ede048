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

mod replica_manager_read;
mod replica_manager_write;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::log::LogManager;
use crate::message::TopicPartition;
use crate::metadata::MetadataCache;
use crate::replica::fetcher::{FollowerLogApplier, FutureLogApplier};
use crate::replica::{
    ControllerChannel, DelayedDeleteRecords, DelayedElectLeader, DelayedFetch, DelayedProduce,
    FetcherManager, HighWatermarkCheckpointer, HostedPartition, HostedPartitions,
    InitialFetchState, IsrChangeTracker, LogDirFailureHandler, Partition, ReplicaSelector,
};
use crate::request::{
    ErrorCode, KafkaError, LeaderAndIsrPartitionState, LeaderAndIsrRequest, LeaderAndIsrResponse,
    StopReplicaRequest, StopReplicaResponse, UpdateMetadataRequest,
};
use crate::replica::LeaderEndpointFactory;
use crate::service::BrokerConfig;
use crate::utils::{Clock, DelayedAsyncOperationPurgatory};
use crate::Shutdown;

/// The per-node replica manager: owns the hosted partition map, applies
/// controller directives, serves the produce/fetch/delete-records paths,
/// and runs the replication background tasks (fetchers, ISR shrink, ISR
/// change propagation, HW checkpointing, dir-failure handling).
#[derive(Debug)]
pub struct ReplicaManager {
    pub(crate) config: Arc<BrokerConfig>,
    pub(crate) local_broker_id: i32,
    pub(crate) clock: Arc<dyn Clock>,
    controller_epoch: AtomicI32,
    hosted_partitions: Arc<HostedPartitions>,
    pub(crate) log_manager: Arc<LogManager>,
    metadata_cache: Arc<MetadataCache>,
    pub(crate) replica_selector: Arc<dyn ReplicaSelector>,
    pub(crate) isr_change_tracker: Arc<IsrChangeTracker>,
    replica_fetcher_manager: Arc<FetcherManager>,
    alter_log_dirs_manager: Arc<FetcherManager>,
    pub(crate) produce_purgatory: Arc<DelayedAsyncOperationPurgatory<DelayedProduce>>,
    pub(crate) fetch_purgatory: Arc<DelayedAsyncOperationPurgatory<DelayedFetch>>,
    pub(crate) delete_records_purgatory: Arc<DelayedAsyncOperationPurgatory<DelayedDeleteRecords>>,
    pub(crate) elect_leader_purgatory: Arc<DelayedAsyncOperationPurgatory<DelayedElectLeader>>,
    /// serialises role transitions, stop-replica, metadata updates,
    /// alter-log-dirs and dir-failure handling
    state_change_lock: Mutex<()>,
    hw_checkpointer_started: AtomicBool,
    controller_channel: Arc<dyn ControllerChannel>,
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: Sender<()>,
}

impl ReplicaManager {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: Arc<BrokerConfig>,
        clock: Arc<dyn Clock>,
        log_manager: Arc<LogManager>,
        metadata_cache: Arc<MetadataCache>,
        endpoint_factory: Arc<dyn LeaderEndpointFactory>,
        replica_selector: Arc<dyn ReplicaSelector>,
        controller_channel: Arc<dyn ControllerChannel>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: Sender<()>,
    ) -> Arc<Self> {
        let purge_interval = config.replication.purgatory_purge_interval_ms;
        let produce_purgatory = DelayedAsyncOperationPurgatory::new(
            "produce_purgatory",
            purge_interval,
            notify_shutdown.clone(),
        )
        .await;
        let fetch_purgatory = DelayedAsyncOperationPurgatory::new(
            "fetch_purgatory",
            purge_interval,
            notify_shutdown.clone(),
        )
        .await;
        let delete_records_purgatory = DelayedAsyncOperationPurgatory::new(
            "delete_records_purgatory",
            purge_interval,
            notify_shutdown.clone(),
        )
        .await;
        let elect_leader_purgatory = DelayedAsyncOperationPurgatory::new(
            "elect_leader_purgatory",
            purge_interval,
            notify_shutdown.clone(),
        )
        .await;

        let local_broker_id = config.general.id;
        let hosted_partitions = Arc::new(HostedPartitions::new());

        let replica_fetcher_manager = FetcherManager::new(
            "replica_fetcher_manager",
            local_broker_id,
            endpoint_factory,
            Arc::new(FollowerLogApplier::new(hosted_partitions.clone())),
            config.replication.clone(),
            notify_shutdown.clone(),
        );
        let alter_log_dirs_manager = FetcherManager::new(
            "alter_log_dirs_manager",
            crate::request::FUTURE_LOCAL_REPLICA_ID,
            Arc::new(LocalEndpointFactory {
                endpoint: Arc::new(crate::replica::LocalLeaderEndpoint::new(
                    local_broker_id,
                    hosted_partitions.clone(),
                )),
            }),
            Arc::new(FutureLogApplier::new(
                hosted_partitions.clone(),
                log_manager.clone(),
            )),
            config.replication.clone(),
            notify_shutdown.clone(),
        );

        let isr_change_tracker = IsrChangeTracker::new(
            config.replication.isr_change_quiet_period_ms,
            config.replication.isr_change_max_delay_ms,
            clock.clone(),
            controller_channel.clone(),
        );

        Arc::new(ReplicaManager {
            config,
            local_broker_id,
            clock,
            controller_epoch: AtomicI32::new(-1),
            hosted_partitions,
            log_manager,
            metadata_cache,
            replica_selector,
            isr_change_tracker,
            replica_fetcher_manager,
            alter_log_dirs_manager,
            produce_purgatory,
            fetch_purgatory,
            delete_records_purgatory,
            elect_leader_purgatory,
            state_change_lock: Mutex::new(()),
            hw_checkpointer_started: AtomicBool::new(false),
            controller_channel,
            notify_shutdown,
            _shutdown_complete_tx: shutdown_complete_tx,
        })
    }

    /// Loads the log manager, then spawns the resident background tasks.
    /// The HW checkpointer starts lazily on the first successful role
    /// directive.
    pub async fn startup(self: &Arc<Self>) -> crate::AppResult<()> {
        info!("replica manager starting up on broker {}", self.local_broker_id);
        self.log_manager.startup().await?;

        self.isr_change_tracker.clone().start(
            self.config.replication.isr_change_propagation_interval_ms,
            Shutdown::new(self.notify_shutdown.subscribe()),
        );
        self.replica_fetcher_manager.start_idle_sweeper();
        self.alter_log_dirs_manager.start_idle_sweeper();

        if let Some(offline_dirs) = self.log_manager.take_offline_dir_receiver() {
            LogDirFailureHandler::start(
                self.clone(),
                offline_dirs,
                self.config.replication.halt_on_dir_failure,
                Shutdown::new(self.notify_shutdown.subscribe()),
            );
        }

        let manager = self.clone();
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        let shrink_interval =
            Duration::from_millis(self.config.replication.isr_shrink_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(shrink_interval) => {
                        manager.maybe_shrink_isr().await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });

        info!("replica manager startup completed");
        Ok(())
    }

    pub fn hosted(&self) -> &HostedPartitions {
        &self.hosted_partitions
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata_cache
    }

    pub fn controller_epoch(&self) -> i32 {
        self.controller_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn alter_log_dirs_manager(&self) -> &Arc<FetcherManager> {
        &self.alter_log_dirs_manager
    }

    /// Applies a LeaderAndIsr directive from the controller. All state
    /// mutation happens under the state-change lock; per-partition outcomes
    /// are returned to the caller, which maps them onto the wire.
    pub async fn become_leader_or_follower<F>(
        self: &Arc<Self>,
        request: LeaderAndIsrRequest,
        on_leadership_change: F,
    ) -> LeaderAndIsrResponse
    where
        F: FnOnce(&[Arc<Partition>], &[Arc<Partition>]),
    {
        let guard = self.state_change_lock.lock().await;

        if request.controller_epoch < self.controller_epoch.load(Ordering::SeqCst) {
            warn!(
                "rejecting LeaderAndIsr from controller {} with stale epoch {} (current {})",
                request.controller_id,
                request.controller_epoch,
                self.controller_epoch.load(Ordering::SeqCst)
            );
            return LeaderAndIsrResponse {
                error: Some(KafkaError::StaleControllerEpoch(format!(
                    "request epoch {}, current {}",
                    request.controller_epoch,
                    self.controller_epoch.load(Ordering::SeqCst)
                ))),
                partition_errors: BTreeMap::new(),
            };
        }
        self.controller_epoch
            .store(request.controller_epoch, Ordering::SeqCst);

        let mut partition_errors: BTreeMap<TopicPartition, i16> = BTreeMap::new();
        let mut become_leader: Vec<(TopicPartition, LeaderAndIsrPartitionState, Arc<Partition>)> =
            Vec::new();
        let mut become_follower: Vec<(TopicPartition, LeaderAndIsrPartitionState, Arc<Partition>)> =
            Vec::new();

        for (tp, state) in &request.partition_states {
            let partition = match self.hosted_partitions.get(tp) {
                HostedPartition::Offline => {
                    partition_errors.insert(tp.clone(), ErrorCode::KafkaStorageError as i16);
                    continue;
                }
                HostedPartition::Online(partition) => partition,
                HostedPartition::None => {
                    let partition = Arc::new(Partition::new(
                        tp.clone(),
                        self.local_broker_id,
                        self.config.replication.min_insync_replicas,
                        self.config.replication.replica_lag_time_max_ms,
                        self.clock.clone(),
                    ));
                    self.hosted_partitions
                        .insert_online(tp.clone(), partition.clone());
                    partition
                }
            };

            let current_epoch = partition.leader_epoch().await;
            if state.leader_epoch <= current_epoch {
                debug!(
                    "ignoring directive for {} with epoch {} (current {})",
                    tp, state.leader_epoch, current_epoch
                );
                partition_errors.insert(tp.clone(), ErrorCode::StaleControllerEpoch as i16);
                continue;
            }
            if !state.replicas.contains(&self.local_broker_id) {
                warn!(
                    "directive for {} does not assign broker {}",
                    tp, self.local_broker_id
                );
                partition_errors.insert(tp.clone(), ErrorCode::UnknownTopicOrPartition as i16);
                continue;
            }

            if state.leader == self.local_broker_id {
                become_leader.push((tp.clone(), state.clone(), partition));
            } else {
                become_follower.push((tp.clone(), state.clone(), partition));
            }
        }

        let mut new_leaders = Vec::new();
        if !become_leader.is_empty() {
            let leader_tps: Vec<TopicPartition> =
                become_leader.iter().map(|(tp, _, _)| tp.clone()).collect();
            self.replica_fetcher_manager
                .remove_fetcher_for_partitions(&leader_tps);

            for (tp, state, partition) in become_leader {
                match self.log_manager.get_or_create_log(&tp).await {
                    Ok(log) => {
                        let recovered = self.log_manager.recovered_high_watermark(&tp);
                        if partition.make_leader(&state, log, recovered).await {
                            new_leaders.push(partition.clone());
                        }
                        partition_errors.insert(tp, ErrorCode::None as i16);
                    }
                    Err(e) => {
                        error!("creating log for new leader {} failed: {}", tp, e);
                        self.hosted_partitions.mark_offline(&tp);
                        partition_errors.insert(tp, ErrorCode::KafkaStorageError as i16);
                    }
                }
            }
        }

        let mut new_followers = Vec::new();
        if !become_follower.is_empty() {
            let follower_tps: Vec<TopicPartition> = become_follower
                .iter()
                .map(|(tp, _, _)| tp.clone())
                .collect();
            self.replica_fetcher_manager
                .remove_fetcher_for_partitions(&follower_tps);

            let mut fetcher_adds: HashMap<TopicPartition, InitialFetchState> = HashMap::new();
            for (tp, state, partition) in become_follower {
                match self.log_manager.get_or_create_log(&tp).await {
                    Ok(log) => {
                        let recovered = self.log_manager.recovered_high_watermark(&tp);
                        if partition
                            .make_follower(&state, log.clone(), recovered)
                            .await
                        {
                            new_followers.push(partition.clone());
                        }
                        partition_errors.insert(tp.clone(), ErrorCode::None as i16);

                        if self.metadata_cache.is_broker_alive(state.leader) {
                            // entries past the HW may diverge from the new
                            // leader; replication restarts from there
                            let high_watermark = partition.high_watermark().await;
                            if let Err(e) = log.truncate_to(high_watermark).await {
                                warn!("truncating {} to {} failed: {}", tp, high_watermark, e);
                            }
                            fetcher_adds.insert(
                                tp,
                                InitialFetchState {
                                    leader_id: state.leader,
                                    leader_epoch: state.leader_epoch,
                                    fetch_offset: high_watermark,
                                },
                            );
                        } else {
                            debug!(
                                "leader {} of {} not alive yet, log created but no fetcher started",
                                state.leader, tp
                            );
                        }
                    }
                    Err(e) => {
                        error!("creating log for new follower {} failed: {}", tp, e);
                        self.hosted_partitions.mark_offline(&tp);
                        partition_errors.insert(tp, ErrorCode::KafkaStorageError as i16);
                    }
                }
            }
            if !fetcher_adds.is_empty() {
                self.replica_fetcher_manager
                    .add_fetcher_for_partitions(fetcher_adds);
            }
        }

        if !self.hw_checkpointer_started.swap(true, Ordering::SeqCst) {
            HighWatermarkCheckpointer::new(
                self.hosted_partitions.clone(),
                self.log_manager.clone(),
            )
            .start(
                self.config
                    .replication
                    .high_watermark_checkpoint_interval_ms,
                Shutdown::new(self.notify_shutdown.subscribe()),
            );
        }

        on_leadership_change(&new_leaders, &new_followers);
        drop(guard);

        // leadership may have moved: wake anything parked on these keys
        for tp in request.partition_states.keys() {
            let key = tp.to_string();
            self.fetch_purgatory.check_and_complete(&key).await;
            self.produce_purgatory.check_and_complete(&key).await;
            self.elect_leader_purgatory.check_and_complete(&key).await;
        }

        LeaderAndIsrResponse {
            error: None,
            partition_errors,
        }
    }

    /// Stops replication for the listed partitions, optionally deleting
    /// their logs.
    pub async fn stop_replicas(self: &Arc<Self>, request: StopReplicaRequest) -> StopReplicaResponse {
        let guard = self.state_change_lock.lock().await;

        if request.controller_epoch < self.controller_epoch.load(Ordering::SeqCst) {
            return StopReplicaResponse {
                error: Some(KafkaError::StaleControllerEpoch(format!(
                    "request epoch {}, current {}",
                    request.controller_epoch,
                    self.controller_epoch.load(Ordering::SeqCst)
                ))),
                partition_errors: BTreeMap::new(),
            };
        }
        self.controller_epoch
            .store(request.controller_epoch, Ordering::SeqCst);

        self.replica_fetcher_manager
            .remove_fetcher_for_partitions(&request.partitions);
        self.alter_log_dirs_manager
            .remove_fetcher_for_partitions(&request.partitions);

        let mut partition_errors = BTreeMap::new();
        for tp in &request.partitions {
            match self.hosted_partitions.get(tp) {
                HostedPartition::Online(_) => {
                    if request.delete_partitions {
                        self.hosted_partitions.remove(tp);
                        self.log_manager.async_delete_log(tp);
                        info!("stopped and deleted replica {}", tp);
                    } else {
                        debug!("stopped replica {} without delete", tp);
                    }
                    partition_errors.insert(tp.clone(), ErrorCode::None as i16);
                }
                HostedPartition::Offline => {
                    partition_errors.insert(tp.clone(), ErrorCode::KafkaStorageError as i16);
                }
                HostedPartition::None => {
                    // never hosted here: nothing to stop
                    partition_errors.insert(tp.clone(), ErrorCode::None as i16);
                }
            }
        }
        drop(guard);

        for tp in &request.partitions {
            let key = tp.to_string();
            self.fetch_purgatory.check_and_complete(&key).await;
            self.produce_purgatory.check_and_complete(&key).await;
            self.delete_records_purgatory.check_and_complete(&key).await;
        }

        StopReplicaResponse {
            error: None,
            partition_errors,
        }
    }

    /// Refreshes the cluster view; returns partitions deleted cluster-wide.
    pub async fn update_metadata(
        self: &Arc<Self>,
        correlation_id: i32,
        request: UpdateMetadataRequest,
    ) -> Result<Vec<TopicPartition>, KafkaError> {
        let _guard = self.state_change_lock.lock().await;
        if request.controller_epoch < self.controller_epoch.load(Ordering::SeqCst) {
            return Err(KafkaError::StaleControllerEpoch(format!(
                "request epoch {}, current {}",
                request.controller_epoch,
                self.controller_epoch.load(Ordering::SeqCst)
            )));
        }
        self.controller_epoch
            .store(request.controller_epoch, Ordering::SeqCst);

        let changed: Vec<String> = request
            .partition_states
            .keys()
            .map(|tp| tp.to_string())
            .collect();
        let deleted = self
            .metadata_cache
            .update_metadata(correlation_id, &request);

        for key in changed {
            self.elect_leader_purgatory.check_and_complete(&key).await;
        }
        Ok(deleted)
    }

    /// Dir-failure transition: every partition with a log on the failed
    /// disk goes Offline until restart.
    pub async fn handle_log_dir_failure(self: &Arc<Self>, dir: &str) {
        let guard = self.state_change_lock.lock().await;
        let affected = self.log_manager.mark_dir_offline(dir);
        for tp in &affected {
            self.hosted_partitions.mark_offline(tp);
        }
        self.replica_fetcher_manager
            .remove_fetcher_for_partitions(&affected);
        self.alter_log_dirs_manager
            .remove_fetcher_for_partitions(&affected);
        if let Err(e) = self.log_manager.drop_checkpoint_for_dir(dir).await {
            warn!("dropping checkpoint for {} failed: {}", dir, e);
        }
        drop(guard);

        self.controller_channel
            .notify_log_dir_failure(self.local_broker_id)
            .await;

        for tp in &affected {
            let key = tp.to_string();
            self.fetch_purgatory.check_and_complete(&key).await;
            self.produce_purgatory.check_and_complete(&key).await;
            self.delete_records_purgatory.check_and_complete(&key).await;
        }
        error!(
            "log dir {} failed; {} partitions now offline",
            dir,
            affected.len()
        );
    }

    /// Periodic ISR shrink pass over every online leader partition.
    pub async fn maybe_shrink_isr(self: &Arc<Self>) {
        let max_lag_ms = self.config.replication.replica_lag_time_max_ms;
        for (tp, partition) in self.hosted_partitions.all_online() {
            let (hw_advanced, change) = partition.maybe_shrink_isr(max_lag_ms).await;
            if let Some(change) = change {
                self.isr_change_tracker.record(change);
            }
            if hw_advanced {
                let key = tp.to_string();
                self.produce_purgatory.check_and_complete(&key).await;
                self.fetch_purgatory.check_and_complete(&key).await;
                self.delete_records_purgatory.check_and_complete(&key).await;
            }
        }
    }

    /// Stops the fetcher workers. Purgatories and timers stop through the
    /// shutdown broadcast.
    pub fn shutdown_fetchers(&self) {
        self.replica_fetcher_manager.close();
        self.alter_log_dirs_manager.close();
    }
}

impl Drop for ReplicaManager {
    fn drop(&mut self) {
        debug!("replica manager dropped");
    }
}

/// Endpoint factory of the alter-log-dir manager: every "source broker" is
/// the local one.
#[derive(Debug)]
struct LocalEndpointFactory {
    endpoint: Arc<crate::replica::LocalLeaderEndpoint>,
}

impl LeaderEndpointFactory for LocalEndpointFactory {
    fn endpoint_for(&self, _broker_id: i32) -> Option<Arc<dyn crate::replica::LeaderEndpoint>> {
        Some(self.endpoint.clone())
    }
}
