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

use tokio::sync::oneshot;
use tracing::debug;

use crate::log::FetchIsolation;
use crate::message::TopicPartition;
use crate::replica::{HostedPartition, ReplicaManager};
use crate::request::{FetchPartitionData, FetchRequest};
use crate::utils::DelayedAsyncOperation;

pub type FetchResultSender = oneshot::Sender<BTreeMap<TopicPartition, FetchPartitionData>>;

/// A long-poll fetch parked until enough bytes accumulate, an error
/// surfaces, or a follower needs its high watermark refreshed.
#[derive(Debug)]
pub struct DelayedFetch {
    replica_manager: Arc<ReplicaManager>,
    request: FetchRequest,
    fetch_isolation: FetchIsolation,
    tx: Mutex<Option<FetchResultSender>>,
}

impl DelayedFetch {
    pub fn new(
        replica_manager: Arc<ReplicaManager>,
        request: FetchRequest,
        fetch_isolation: FetchIsolation,
        tx: FetchResultSender,
    ) -> Self {
        Self {
            replica_manager,
            request,
            fetch_isolation,
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl DelayedAsyncOperation for DelayedFetch {
    fn delay_ms(&self) -> u64 {
        self.request.max_wait_ms.max(0) as u64
    }

    async fn try_complete(&self) -> bool {
        let fetch_only_from_leader = !self.request.is_from_future_replica();
        let mut readable_bytes = 0usize;

        for (tp, partition_data) in &self.request.fetch_data {
            let partition = match self.replica_manager.hosted().get(tp) {
                HostedPartition::Online(partition) => partition,
                // the partition went away or its disk failed: answer now
                _ => return true,
            };
            if self.request.is_from_follower()
                && partition
                    .follower_needs_hw_update(self.request.replica_id)
                    .await
            {
                return true;
            }
            let snapshot = match partition
                .fetch_offset_snapshot(
                    partition_data.current_leader_epoch,
                    fetch_only_from_leader,
                )
                .await
            {
                Ok(snapshot) => snapshot,
                // fenced epoch or lost leadership: complete so the client
                // learns about it
                Err(_) => return true,
            };
            let upper_bound = snapshot.bound_for(self.fetch_isolation);
            if partition_data.fetch_offset < snapshot.log_start_offset
                || partition_data.fetch_offset > snapshot.log_end_offset
            {
                // the position fell out of range while parked
                return true;
            }
            if upper_bound <= partition_data.fetch_offset {
                continue;
            }
            match partition
                .read_records(
                    partition_data.fetch_offset,
                    partition_data.current_leader_epoch,
                    partition_data.max_bytes,
                    self.fetch_isolation,
                    fetch_only_from_leader,
                    true,
                )
                .await
            {
                Ok(read_info) => readable_bytes += read_info.records.size(),
                Err(_) => return true,
            }
            if readable_bytes >= self.request.min_bytes.max(0) as usize {
                return true;
            }
        }
        false
    }

    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let responses = self
                .replica_manager
                .read_from_local_log(&self.request, self.fetch_isolation, false)
                .await
                .responses;
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
        debug!("delayed fetch expired");
    }
}
