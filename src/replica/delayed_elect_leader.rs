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

use crate::message::TopicPartition;
use crate::replica::ReplicaManager;
use crate::request::ErrorCode;
use crate::utils::DelayedAsyncOperation;

pub type ElectLeaderResultSender = oneshot::Sender<BTreeMap<TopicPartition, i16>>;

/// An elect-leaders request parked until the metadata view shows the
/// expected leader alive for every named partition.
#[derive(Debug)]
pub struct DelayedElectLeader {
    delay_ms: u64,
    /// partition → leader the election is expected to install
    expected_leaders: BTreeMap<TopicPartition, i32>,
    replica_manager: Arc<ReplicaManager>,
    tx: Mutex<Option<ElectLeaderResultSender>>,
}

impl DelayedElectLeader {
    pub fn new(
        delay_ms: u64,
        expected_leaders: BTreeMap<TopicPartition, i32>,
        replica_manager: Arc<ReplicaManager>,
        tx: ElectLeaderResultSender,
    ) -> Self {
        Self {
            delay_ms,
            expected_leaders,
            replica_manager,
            tx: Mutex::new(Some(tx)),
        }
    }

    fn is_elected(&self, tp: &TopicPartition, expected_leader: i32) -> bool {
        let metadata_cache = self.replica_manager.metadata_cache();
        metadata_cache
            .partition_metadata(tp)
            .map(|metadata| {
                metadata.leader == expected_leader
                    && metadata_cache.is_broker_alive(expected_leader)
            })
            .unwrap_or(false)
    }
}

impl DelayedAsyncOperation for DelayedElectLeader {
    fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    async fn try_complete(&self) -> bool {
        self.expected_leaders
            .iter()
            .all(|(tp, expected)| self.is_elected(tp, *expected))
    }

    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let responses = self
                .expected_leaders
                .iter()
                .map(|(tp, expected)| {
                    let code = if self.is_elected(tp, *expected) {
                        ErrorCode::None
                    } else {
                        ErrorCode::PreferredLeaderNotAvailable
                    };
                    (tp.clone(), code as i16)
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
        debug!("delayed elect-leader expired");
    }
}
