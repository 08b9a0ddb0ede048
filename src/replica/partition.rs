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

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::log::{
    EpochEndOffset, FetchIsolation, Log, LogAppendInfo, LogReadInfo, TimestampAndOffset,
    UNKNOWN_OFFSET,
};
use crate::message::{MemoryRecords, TopicPartition};
use crate::request::{IsrChangeEntry, KafkaError, KafkaResult, LeaderAndIsrPartitionState};
use crate::utils::Clock;

/// A remote follower as observed by the local leader. Updated only on
/// fetches from that follower.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    pub log_start_offset: i64,
    pub log_end_offset: i64,
    pub last_fetch_time_ms: i64,
    pub last_caught_up_time_ms: i64,
    /// leader log end at the time of the previous fetch, used to decide
    /// whether that fetch had caught the follower up
    pub last_fetch_leader_log_end_offset: i64,
    pub last_sent_high_watermark: i64,
}

impl ReplicaState {
    fn new(now_ms: i64) -> Self {
        Self {
            log_start_offset: UNKNOWN_OFFSET,
            log_end_offset: UNKNOWN_OFFSET,
            last_fetch_time_ms: now_ms,
            last_caught_up_time_ms: now_ms,
            last_fetch_leader_log_end_offset: UNKNOWN_OFFSET,
            last_sent_high_watermark: 0,
        }
    }
}

/// What a follower fetch did to leader state; the caller pokes the
/// purgatories accordingly.
#[derive(Debug, Default, Clone, Copy)]
pub struct FollowerFetchOutcome {
    pub recognized: bool,
    pub hw_advanced: bool,
    pub isr_expanded: bool,
}

/// Offsets of a partition at one instant, for delayed-fetch bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct OffsetSnapshot {
    pub log_start_offset: i64,
    pub log_end_offset: i64,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
}

impl OffsetSnapshot {
    pub fn bound_for(&self, fetch_isolation: FetchIsolation) -> i64 {
        match fetch_isolation {
            FetchIsolation::LogEnd => self.log_end_offset,
            FetchIsolation::HighWatermark => self.high_watermark,
            FetchIsolation::TxnCommitted => self.last_stable_offset,
        }
    }
}

#[derive(Debug)]
struct PartitionInner {
    controller_epoch: i32,
    leader_epoch: i32,
    leader_id: Option<i32>,
    assigned_replicas: Vec<i32>,
    isr: BTreeSet<i32>,
    zk_version: i32,
    remote_replicas: HashMap<i32, ReplicaState>,
    log: Option<Arc<dyn Log>>,
    future_log: Option<Arc<dyn Log>>,
}

/// Per-partition replica state: role, epoch, assigned set, ISR, and the
/// local log handle. All mutation happens under the internal write lock;
/// the high watermark is recomputed strictly after ISR or per-follower
/// updates inside the same critical section.
#[derive(Debug)]
pub struct Partition {
    topic_partition: TopicPartition,
    local_broker_id: i32,
    min_insync_replicas: usize,
    replica_lag_time_max_ms: i64,
    clock: Arc<dyn Clock>,
    inner: RwLock<PartitionInner>,
}

impl Partition {
    pub fn new(
        topic_partition: TopicPartition,
        local_broker_id: i32,
        min_insync_replicas: usize,
        replica_lag_time_max_ms: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            topic_partition,
            local_broker_id,
            min_insync_replicas,
            replica_lag_time_max_ms,
            clock,
            inner: RwLock::new(PartitionInner {
                controller_epoch: -1,
                leader_epoch: -1,
                leader_id: None,
                assigned_replicas: Vec::new(),
                isr: BTreeSet::new(),
                zk_version: 0,
                remote_replicas: HashMap::new(),
                log: None,
                future_log: None,
            }),
        }
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    pub fn local_broker_id(&self) -> i32 {
        self.local_broker_id
    }

    // ---------------------------------------------------------------- role

    /// Applies a become-leader directive. Returns true iff the local broker
    /// was not already leader for this epoch's predecessor.
    pub async fn make_leader(
        &self,
        state: &LeaderAndIsrPartitionState,
        log: Arc<dyn Log>,
        recovered_high_watermark: Option<i64>,
    ) -> bool {
        let now_ms = self.clock.now_ms();
        let mut inner = self.inner.write().await;
        let was_leader = inner.leader_id == Some(self.local_broker_id);

        inner.controller_epoch = state.controller_epoch;
        inner.leader_epoch = state.leader_epoch;
        inner.assigned_replicas = state.replicas.clone();
        inner.isr = state.isr.iter().copied().collect();
        inner.zk_version = state.zk_version;
        inner.leader_id = Some(self.local_broker_id);

        if inner.log.is_none() {
            if let Some(hw) = recovered_high_watermark {
                log.update_high_watermark(hw);
            }
            inner.log = Some(log);
        }

        // follower progress restarts from scratch under the new epoch
        inner.remote_replicas.clear();
        for replica_id in &state.replicas {
            if *replica_id != self.local_broker_id {
                inner
                    .remote_replicas
                    .insert(*replica_id, ReplicaState::new(now_ms));
            }
        }

        Self::maybe_increment_leader_hw(&mut inner, self.local_broker_id);

        info!(
            "{} became leader at epoch {} (isr: {:?})",
            self.topic_partition, state.leader_epoch, state.isr
        );
        !was_leader
    }

    /// Applies a become-follower directive. Truncation to the new leader's
    /// epoch boundary is driven later by the fetcher's reconciliation.
    /// Returns true iff the leader changed.
    pub async fn make_follower(
        &self,
        state: &LeaderAndIsrPartitionState,
        log: Arc<dyn Log>,
        recovered_high_watermark: Option<i64>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let old_leader = inner.leader_id;

        inner.controller_epoch = state.controller_epoch;
        inner.leader_epoch = state.leader_epoch;
        inner.assigned_replicas = state.replicas.clone();
        inner.isr.clear();
        inner.zk_version = state.zk_version;
        inner.leader_id = Some(state.leader);
        inner.remote_replicas.clear();

        if inner.log.is_none() {
            if let Some(hw) = recovered_high_watermark {
                log.update_high_watermark(hw);
            }
            inner.log = Some(log);
        }

        debug!(
            "{} became follower of {} at epoch {}",
            self.topic_partition, state.leader, state.leader_epoch
        );
        old_leader != Some(state.leader)
    }

    // ------------------------------------------------------------- produce

    /// Leader-side append. The high watermark is not moved here; follower
    /// fetches drive it.
    pub async fn append_records_to_leader(
        &self,
        records: MemoryRecords,
        required_acks: i16,
    ) -> KafkaResult<LogAppendInfo> {
        let inner = self.inner.read().await;
        if inner.leader_id != Some(self.local_broker_id) {
            return Err(KafkaError::NotLeaderForPartition(
                self.topic_partition.to_string(),
            ));
        }
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?
            .clone();

        if required_acks == -1 && inner.isr.len() < self.min_insync_replicas {
            return Err(KafkaError::NotEnoughReplicas(format!(
                "{}: isr size {} below min.insync.replicas {}",
                self.topic_partition,
                inner.isr.len(),
                self.min_insync_replicas
            )));
        }
        let leader_epoch = inner.leader_epoch;
        drop(inner);

        log.append(records, leader_epoch, self.clock.now_ms())
            .await
            .map_err(KafkaError::from)
    }

    /// Follower-side append, applied by the fetcher in offset order.
    pub async fn append_records_to_follower(
        &self,
        records: MemoryRecords,
        leader_epoch: i32,
    ) -> KafkaResult<LogAppendInfo> {
        let inner = self.inner.read().await;
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?
            .clone();
        drop(inner);
        log.append(records, leader_epoch, self.clock.now_ms())
            .await
            .map_err(KafkaError::from)
    }

    // --------------------------------------------------------------- fetch

    fn validate_leader_epoch(inner: &PartitionInner, current_leader_epoch: Option<i32>, tp: &TopicPartition) -> KafkaResult<()> {
        if let Some(request_epoch) = current_leader_epoch {
            if request_epoch > inner.leader_epoch {
                return Err(KafkaError::FencedLeaderEpoch(format!(
                    "{}: request epoch {} is newer than local epoch {}",
                    tp, request_epoch, inner.leader_epoch
                )));
            }
            if request_epoch < inner.leader_epoch {
                return Err(KafkaError::UnknownLeaderEpoch(format!(
                    "{}: request epoch {} is older than local epoch {}",
                    tp, request_epoch, inner.leader_epoch
                )));
            }
        }
        Ok(())
    }

    pub async fn read_records(
        &self,
        fetch_offset: i64,
        current_leader_epoch: Option<i32>,
        max_bytes: i32,
        fetch_isolation: FetchIsolation,
        fetch_only_from_leader: bool,
        min_one_message: bool,
    ) -> KafkaResult<LogReadInfo> {
        let inner = self.inner.read().await;
        Self::validate_leader_epoch(&inner, current_leader_epoch, &self.topic_partition)?;
        if fetch_only_from_leader && inner.leader_id != Some(self.local_broker_id) {
            return Err(KafkaError::NotLeaderForPartition(
                self.topic_partition.to_string(),
            ));
        }
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?
            .clone();
        drop(inner);

        let upper_bound = match fetch_isolation {
            FetchIsolation::LogEnd => log.log_end_offset(),
            FetchIsolation::HighWatermark => log.high_watermark(),
            FetchIsolation::TxnCommitted => log.last_stable_offset(),
        };

        log.read(fetch_offset, max_bytes, upper_bound, min_one_message)
            .await
            .map_err(KafkaError::from)
    }

    // --------------------------------------------------- follower tracking

    /// Records a fetch from `follower_id` and, under the same critical
    /// section, possibly expands the ISR and advances the high watermark.
    pub async fn update_follower_fetch_state(
        &self,
        follower_id: i32,
        fetch_offset: i64,
        follower_log_start_offset: i64,
        fetch_time_ms: i64,
    ) -> (FollowerFetchOutcome, Option<IsrChangeEntry>) {
        let mut inner = self.inner.write().await;
        if !inner.assigned_replicas.contains(&follower_id) {
            return (FollowerFetchOutcome::default(), None);
        }
        let leader_log_end = inner
            .log
            .as_ref()
            .map(|log| log.log_end_offset())
            .unwrap_or(UNKNOWN_OFFSET);
        let high_watermark = inner
            .log
            .as_ref()
            .map(|log| log.high_watermark())
            .unwrap_or(0);

        if follower_id != self.local_broker_id {
            let state = inner
                .remote_replicas
                .entry(follower_id)
                .or_insert_with(|| ReplicaState::new(fetch_time_ms));
            if fetch_offset >= leader_log_end {
                state.last_caught_up_time_ms = state.last_caught_up_time_ms.max(fetch_time_ms);
            } else if fetch_offset >= state.last_fetch_leader_log_end_offset
                && state.last_fetch_leader_log_end_offset != UNKNOWN_OFFSET
            {
                state.last_caught_up_time_ms =
                    state.last_caught_up_time_ms.max(state.last_fetch_time_ms);
            }
            state.log_end_offset = fetch_offset;
            state.log_start_offset = follower_log_start_offset;
            state.last_fetch_time_ms = fetch_time_ms;
            state.last_fetch_leader_log_end_offset = leader_log_end;
        }

        let isr_expanded = self.maybe_expand_isr(&mut inner, follower_id, high_watermark);
        let hw_advanced = Self::maybe_increment_leader_hw(&mut inner, self.local_broker_id);

        let change = if isr_expanded {
            Some(Self::isr_change_entry(&inner, &self.topic_partition))
        } else {
            None
        };
        (
            FollowerFetchOutcome {
                recognized: true,
                hw_advanced,
                isr_expanded,
            },
            change,
        )
    }

    /// Admits a follower into the ISR once its fetch position reaches the
    /// high watermark and it caught up within the lag bound. Runs inside
    /// the caller's critical section, before the HW recompute.
    fn maybe_expand_isr(
        &self,
        inner: &mut PartitionInner,
        follower_id: i32,
        high_watermark: i64,
    ) -> bool {
        if follower_id == self.local_broker_id || inner.isr.contains(&follower_id) {
            return false;
        }
        let now_ms = self.clock.now_ms();
        let caught_up_recently = inner
            .remote_replicas
            .get(&follower_id)
            .map(|state| {
                state.log_end_offset >= high_watermark
                    && state.last_caught_up_time_ms >= now_ms - self.replica_lag_time_max_ms
            })
            .unwrap_or(false);
        if !caught_up_recently {
            return false;
        }
        inner.isr.insert(follower_id);
        inner.zk_version += 1;
        info!(
            "{} expanded isr to {:?} after {} caught up",
            self.topic_partition, inner.isr, follower_id
        );
        true
    }

    /// Drops followers that stopped fetching or fell behind, then
    /// recomputes the high watermark.
    pub async fn maybe_shrink_isr(
        &self,
        max_lag_ms: i64,
    ) -> (bool, Option<IsrChangeEntry>) {
        let now_ms = self.clock.now_ms();
        let mut inner = self.inner.write().await;
        if inner.leader_id != Some(self.local_broker_id) {
            return (false, None);
        }
        let leader_log_end = inner
            .log
            .as_ref()
            .map(|log| log.log_end_offset())
            .unwrap_or(UNKNOWN_OFFSET);

        let mut out_of_sync: Vec<i32> = Vec::new();
        for replica_id in inner.isr.iter() {
            if *replica_id == self.local_broker_id {
                continue;
            }
            let lagging = match inner.remote_replicas.get(replica_id) {
                Some(state) => {
                    state.last_caught_up_time_ms < now_ms - max_lag_ms
                        || (state.log_end_offset < leader_log_end
                            && state.last_fetch_time_ms < now_ms - max_lag_ms)
                }
                None => true,
            };
            if lagging {
                out_of_sync.push(*replica_id);
            }
        }

        if out_of_sync.is_empty() {
            return (false, None);
        }
        for replica_id in &out_of_sync {
            inner.isr.remove(replica_id);
        }
        inner.zk_version += 1;
        info!(
            "{} shrank isr to {:?}, removed lagging {:?}",
            self.topic_partition, inner.isr, out_of_sync
        );
        let hw_advanced = Self::maybe_increment_leader_hw(&mut inner, self.local_broker_id);
        let change = Self::isr_change_entry(&inner, &self.topic_partition);
        (hw_advanced, Some(change))
    }

    /// New HW = min(LEO over ISR). Never decreases within an epoch.
    fn maybe_increment_leader_hw(inner: &mut PartitionInner, local_broker_id: i32) -> bool {
        let log = match inner.log.as_ref() {
            Some(log) => log.clone(),
            None => return false,
        };
        if inner.leader_id != Some(local_broker_id) {
            return false;
        }
        let mut min_leo = log.log_end_offset();
        for replica_id in inner.isr.iter() {
            if *replica_id == local_broker_id {
                continue;
            }
            let replica_leo = inner
                .remote_replicas
                .get(replica_id)
                .map(|state| state.log_end_offset)
                .unwrap_or(UNKNOWN_OFFSET);
            min_leo = min_leo.min(replica_leo);
        }
        let old_hw = log.high_watermark();
        if min_leo > old_hw {
            log.update_high_watermark(min_leo);
            true
        } else {
            false
        }
    }

    fn isr_change_entry(inner: &PartitionInner, tp: &TopicPartition) -> IsrChangeEntry {
        IsrChangeEntry {
            topic: tp.topic().to_string(),
            partition: tp.partition(),
            isr: inner.isr.iter().copied().collect(),
            leader_epoch: inner.leader_epoch,
            zk_version: inner.zk_version,
        }
    }

    /// Remembers the HW shipped to a follower, so a lagging follower HW can
    /// force the next response out immediately.
    pub async fn record_follower_sent_high_watermark(&self, follower_id: i32, high_watermark: i64) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.remote_replicas.get_mut(&follower_id) {
            state.last_sent_high_watermark = high_watermark;
        }
    }

    pub async fn follower_needs_hw_update(&self, follower_id: i32) -> bool {
        let inner = self.inner.read().await;
        let leader_hw = inner
            .log
            .as_ref()
            .map(|log| log.high_watermark())
            .unwrap_or(0);
        inner
            .remote_replicas
            .get(&follower_id)
            .map(|state| state.last_sent_high_watermark < leader_hw)
            .unwrap_or(false)
    }

    /// Current offsets, with the same epoch and leadership fencing as a
    /// read.
    pub async fn fetch_offset_snapshot(
        &self,
        current_leader_epoch: Option<i32>,
        fetch_only_from_leader: bool,
    ) -> KafkaResult<OffsetSnapshot> {
        let inner = self.inner.read().await;
        Self::validate_leader_epoch(&inner, current_leader_epoch, &self.topic_partition)?;
        if fetch_only_from_leader && inner.leader_id != Some(self.local_broker_id) {
            return Err(KafkaError::NotLeaderForPartition(
                self.topic_partition.to_string(),
            ));
        }
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?;
        Ok(OffsetSnapshot {
            log_start_offset: log.log_start_offset(),
            log_end_offset: log.log_end_offset(),
            high_watermark: log.high_watermark(),
            last_stable_offset: log.last_stable_offset(),
        })
    }

    // ----------------------------------------------------- delete-records

    /// Leader-side prefix delete: the log start moves to
    /// `min(requested, HW)`. Returns the leader's new low watermark.
    pub async fn delete_records_on_leader(&self, offset: i64) -> KafkaResult<i64> {
        let inner = self.inner.read().await;
        if inner.leader_id != Some(self.local_broker_id) {
            return Err(KafkaError::NotLeaderForPartition(
                self.topic_partition.to_string(),
            ));
        }
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?
            .clone();
        drop(inner);

        if offset < 0 {
            return Err(KafkaError::OffsetOutOfRange(format!(
                "cannot delete records of {} before negative offset {}",
                self.topic_partition, offset
            )));
        }
        let target = offset.min(log.high_watermark());
        log.delete_records_before(target)
            .await
            .map_err(KafkaError::from)?;
        Ok(self.low_watermark().await)
    }

    /// Min log-start-offset across the leader and every follower that has
    /// reported one.
    pub async fn low_watermark(&self) -> i64 {
        let inner = self.inner.read().await;
        let mut low = inner
            .log
            .as_ref()
            .map(|log| log.log_start_offset())
            .unwrap_or(0);
        for replica_id in inner.isr.iter() {
            if *replica_id == self.local_broker_id {
                continue;
            }
            if let Some(state) = inner.remote_replicas.get(replica_id) {
                if state.log_start_offset != UNKNOWN_OFFSET {
                    low = low.min(state.log_start_offset);
                }
            }
        }
        low
    }

    // ------------------------------------------------------------ epochs

    pub async fn last_offset_for_leader_epoch(
        &self,
        current_leader_epoch: Option<i32>,
        requested_epoch: i32,
    ) -> KafkaResult<EpochEndOffset> {
        let inner = self.inner.read().await;
        Self::validate_leader_epoch(&inner, current_leader_epoch, &self.topic_partition)?;
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?
            .clone();
        drop(inner);
        Ok(log
            .end_offset_for_epoch(requested_epoch)
            .unwrap_or(EpochEndOffset {
                leader_epoch: -1,
                end_offset: UNKNOWN_OFFSET,
            }))
    }

    pub async fn fetch_offset_for_timestamp(
        &self,
        timestamp: i64,
        isolation: Option<FetchIsolation>,
        current_leader_epoch: Option<i32>,
        fetch_only_from_leader: bool,
    ) -> KafkaResult<Option<TimestampAndOffset>> {
        let inner = self.inner.read().await;
        Self::validate_leader_epoch(&inner, current_leader_epoch, &self.topic_partition)?;
        if fetch_only_from_leader && inner.leader_id != Some(self.local_broker_id) {
            return Err(KafkaError::NotLeaderForPartition(
                self.topic_partition.to_string(),
            ));
        }
        let log = inner
            .log
            .as_ref()
            .ok_or_else(|| KafkaError::ReplicaNotAvailable(self.topic_partition.to_string()))?
            .clone();
        drop(inner);

        let upper_bound = match isolation {
            Some(FetchIsolation::TxnCommitted) => log.last_stable_offset(),
            Some(_) => log.high_watermark(),
            None => log.log_end_offset(),
        };
        Ok(log
            .fetch_offset_by_timestamp(timestamp)
            .filter(|found| found.offset < upper_bound))
    }

    // ---------------------------------------------------------- accessors

    pub async fn is_leader(&self) -> bool {
        self.inner.read().await.leader_id == Some(self.local_broker_id)
    }

    pub async fn leader_id(&self) -> Option<i32> {
        self.inner.read().await.leader_id
    }

    pub async fn leader_epoch(&self) -> i32 {
        self.inner.read().await.leader_epoch
    }

    pub async fn controller_epoch(&self) -> i32 {
        self.inner.read().await.controller_epoch
    }

    pub async fn isr(&self) -> Vec<i32> {
        self.inner.read().await.isr.iter().copied().collect()
    }

    pub async fn assigned_replicas(&self) -> Vec<i32> {
        self.inner.read().await.assigned_replicas.clone()
    }

    pub async fn high_watermark(&self) -> i64 {
        self.inner
            .read()
            .await
            .log
            .as_ref()
            .map(|log| log.high_watermark())
            .unwrap_or(0)
    }

    pub async fn log_end_offset(&self) -> i64 {
        self.inner
            .read()
            .await
            .log
            .as_ref()
            .map(|log| log.log_end_offset())
            .unwrap_or(UNKNOWN_OFFSET)
    }

    pub async fn log_start_offset(&self) -> i64 {
        self.inner
            .read()
            .await
            .log
            .as_ref()
            .map(|log| log.log_start_offset())
            .unwrap_or(UNKNOWN_OFFSET)
    }

    pub async fn log(&self) -> Option<Arc<dyn Log>> {
        self.inner.read().await.log.clone()
    }

    pub async fn future_log(&self) -> Option<Arc<dyn Log>> {
        self.inner.read().await.future_log.clone()
    }

    pub async fn set_future_log(&self, log: Arc<dyn Log>) {
        self.inner.write().await.future_log = Some(log);
    }

    /// Swaps the caught-up future log in as the current log.
    pub async fn swap_in_future_log(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.future_log.take() {
            Some(future) => {
                inner.log = Some(future);
                true
            }
            None => false,
        }
    }

    pub async fn replica_state(&self, replica_id: i32) -> Option<ReplicaState> {
        self.inner
            .read()
            .await
            .remote_replicas
            .get(&replica_id)
            .cloned()
    }

    /// Snapshot used by delayed produce: has the HW reached
    /// `required_offset`, and with how healthy an ISR.
    pub async fn check_enough_replicas_reach_offset(
        &self,
        required_offset: i64,
    ) -> (bool, Option<KafkaError>) {
        let inner = self.inner.read().await;
        if inner.leader_id != Some(self.local_broker_id) {
            return (
                true,
                Some(KafkaError::NotLeaderForPartition(
                    self.topic_partition.to_string(),
                )),
            );
        }
        let high_watermark = inner
            .log
            .as_ref()
            .map(|log| log.high_watermark())
            .unwrap_or(0);
        if high_watermark >= required_offset {
            if inner.isr.len() >= self.min_insync_replicas {
                (true, None)
            } else {
                (
                    true,
                    Some(KafkaError::NotEnoughReplicasAfterAppend(
                        self.topic_partition.to_string(),
                    )),
                )
            }
        } else {
            (false, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::utils::ManualClock;

    fn tp() -> TopicPartition {
        TopicPartition::new("t", 0)
    }

    fn directive(
        leader: i32,
        leader_epoch: i32,
        isr: Vec<i32>,
        replicas: Vec<i32>,
    ) -> LeaderAndIsrPartitionState {
        LeaderAndIsrPartitionState {
            controller_epoch: 1,
            leader,
            leader_epoch,
            isr,
            zk_version: 1,
            replicas,
            is_new: true,
        }
    }

    fn new_partition(clock: Arc<ManualClock>) -> Partition {
        Partition::new(tp(), 1, 1, 10_000, clock)
    }

    fn new_log() -> Arc<dyn Log> {
        Arc::new(MemoryLog::new(tp(), "/tmp/d1"))
    }

    async fn append(partition: &Partition, records: u32) -> LogAppendInfo {
        partition
            .append_records_to_leader(MemoryRecords::of_payload(records, b"v"), 1)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_make_leader_initializes_state() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        let became_leader = partition
            .make_leader(&directive(1, 5, vec![1, 2], vec![1, 2, 3]), new_log(), None)
            .await;

        assert!(became_leader);
        assert!(partition.is_leader().await);
        assert_eq!(partition.leader_epoch().await, 5);
        assert_eq!(partition.isr().await, vec![1, 2]);
        assert_eq!(partition.assigned_replicas().await, vec![1, 2, 3]);
        // a repeated make_leader is not a transition
        assert!(
            !partition
                .make_leader(&directive(1, 6, vec![1, 2], vec![1, 2, 3]), new_log(), None)
                .await
        );
    }

    #[tokio::test]
    async fn test_make_leader_recovers_checkpointed_hw() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        let log = new_log();
        log.append(MemoryRecords::of_payload(4, b"v"), 1, 0)
            .await
            .unwrap();
        partition
            .make_leader(&directive(1, 1, vec![1], vec![1]), log, Some(3))
            .await;
        // single-member ISR: the recovered HW then advances to the log end
        assert_eq!(partition.high_watermark().await, 4);
    }

    #[tokio::test]
    async fn test_append_rejected_on_follower() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_follower(&directive(2, 1, vec![], vec![1, 2]), new_log(), None)
            .await;
        let result = partition
            .append_records_to_leader(MemoryRecords::of_payload(1, b"v"), 1)
            .await;
        assert!(matches!(result, Err(KafkaError::NotLeaderForPartition(_))));
    }

    #[tokio::test]
    async fn test_acks_all_requires_min_isr() {
        let clock = ManualClock::new(0);
        let partition = Partition::new(tp(), 1, 2, 10_000, clock);
        partition
            .make_leader(&directive(1, 1, vec![1], vec![1, 2]), new_log(), None)
            .await;
        let result = partition
            .append_records_to_leader(MemoryRecords::of_payload(1, b"v"), -1)
            .await;
        assert!(matches!(result, Err(KafkaError::NotEnoughReplicas(_))));
        // acks=1 is not gated on the ISR size
        assert!(partition
            .append_records_to_leader(MemoryRecords::of_payload(1, b"v"), 1)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_epoch_validation_on_read() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 5, vec![1], vec![1]), new_log(), None)
            .await;

        let older = partition
            .read_records(0, Some(4), 1024, FetchIsolation::HighWatermark, true, false)
            .await;
        assert!(matches!(older, Err(KafkaError::UnknownLeaderEpoch(_))));

        let newer = partition
            .read_records(0, Some(6), 1024, FetchIsolation::HighWatermark, true, false)
            .await;
        assert!(matches!(newer, Err(KafkaError::FencedLeaderEpoch(_))));

        let matching = partition
            .read_records(0, Some(5), 1024, FetchIsolation::HighWatermark, true, false)
            .await;
        assert!(matching.is_ok());
    }

    #[tokio::test]
    async fn test_follower_fetch_advances_hw() {
        let clock = ManualClock::new(1_000);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1, 2], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 5).await;
        assert_eq!(partition.high_watermark().await, 0);

        let (outcome, _) = partition.update_follower_fetch_state(2, 3, 0, 1_000).await;
        assert!(outcome.recognized);
        assert_eq!(partition.high_watermark().await, 3);

        let (outcome, _) = partition.update_follower_fetch_state(2, 5, 0, 1_100).await;
        assert!(outcome.hw_advanced);
        assert_eq!(partition.high_watermark().await, 5);

        // a replay of an older fetch offset must not lower the HW
        let (outcome, _) = partition.update_follower_fetch_state(2, 5, 0, 1_200).await;
        assert!(!outcome.hw_advanced);
        assert_eq!(partition.high_watermark().await, 5);
    }

    #[tokio::test]
    async fn test_unknown_follower_is_ignored() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1], vec![1, 2]), new_log(), None)
            .await;
        let (outcome, change) = partition.update_follower_fetch_state(9, 3, 0, 0).await;
        assert!(!outcome.recognized);
        assert!(change.is_none());
    }

    #[tokio::test]
    async fn test_isr_expansion_requires_caught_up_follower() {
        let clock = ManualClock::new(10_000);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 5).await;

        // leader-only ISR advances the HW by itself
        let (outcome, _) = partition.update_follower_fetch_state(1, 5, 0, 10_000).await;
        assert!(outcome.hw_advanced);
        assert_eq!(partition.high_watermark().await, 5);

        // a lagging fetch does not get the follower in
        let (outcome, change) = partition.update_follower_fetch_state(2, 2, 0, 10_050).await;
        assert!(!outcome.isr_expanded);
        assert!(change.is_none());

        // reaching the HW does
        let (outcome, change) = partition.update_follower_fetch_state(2, 5, 0, 10_100).await;
        assert!(outcome.isr_expanded);
        let change = change.unwrap();
        assert_eq!(change.isr, vec![1, 2]);
        assert_eq!(partition.isr().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_isr_shrink_on_stale_follower() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock.clone());
        partition
            .make_leader(&directive(1, 1, vec![1, 2], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 3).await;

        // 11 s with no fetch from broker 2
        clock.advance(11_000);
        let (hw_advanced, change) = partition.maybe_shrink_isr(10_000).await;
        let change = change.unwrap();
        assert_eq!(change.isr, vec![1]);
        assert_eq!(partition.isr().await, vec![1]);
        // with the laggard gone the HW catches up to the log end
        assert!(hw_advanced);
        assert_eq!(partition.high_watermark().await, 3);

        // nothing further to shrink
        let (_, change) = partition.maybe_shrink_isr(10_000).await;
        assert!(change.is_none());
    }

    #[tokio::test]
    async fn test_shrink_keeps_active_follower() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock.clone());
        partition
            .make_leader(&directive(1, 1, vec![1, 2], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 3).await;

        clock.advance(8_000);
        partition.update_follower_fetch_state(2, 3, 0, 8_000).await;
        clock.advance(5_000);
        // last caught up 5 s ago, inside the 10 s bound
        let (_, change) = partition.maybe_shrink_isr(10_000).await;
        assert!(change.is_none());
        assert_eq!(partition.isr().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_records_clamped_to_hw() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1], vec![1]), new_log(), None)
            .await;
        append(&partition, 10).await;
        partition.update_follower_fetch_state(1, 10, 0, 0).await;
        assert_eq!(partition.high_watermark().await, 10);

        // request beyond the HW only trims to the HW
        let log = partition.log().await.unwrap();
        log.update_high_watermark(6);
        let low = partition.delete_records_on_leader(8).await.unwrap();
        assert_eq!(low, 6);
        assert_eq!(partition.log_start_offset().await, 6);
    }

    #[tokio::test]
    async fn test_low_watermark_tracks_follower_starts() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1, 2], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 10).await;
        partition.update_follower_fetch_state(2, 10, 2, 0).await;

        let log = partition.log().await.unwrap();
        log.delete_records_before(4).await.unwrap();
        // leader start 4, follower start 2
        assert_eq!(partition.low_watermark().await, 2);
    }

    #[tokio::test]
    async fn test_check_enough_replicas_reach_offset() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1, 2], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 5).await;

        let (reached, error) = partition.check_enough_replicas_reach_offset(5).await;
        assert!(!reached);
        assert!(error.is_none());

        partition.update_follower_fetch_state(2, 5, 0, 0).await;
        let (reached, error) = partition.check_enough_replicas_reach_offset(5).await;
        assert!(reached);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_follower_needs_hw_update() {
        let clock = ManualClock::new(0);
        let partition = new_partition(clock);
        partition
            .make_leader(&directive(1, 1, vec![1, 2], vec![1, 2]), new_log(), None)
            .await;
        append(&partition, 3).await;
        partition.update_follower_fetch_state(2, 3, 0, 0).await;

        // hw is 3 but the follower was last told 0
        assert!(partition.follower_needs_hw_update(2).await);
        partition.record_follower_sent_high_watermark(2, 3).await;
        assert!(!partition.follower_needs_hw_update(2).await);
    }
}
