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

mod control;
mod errors;
mod fetch;
mod produce;

pub use control::{
    DeleteRecordsPartitionResult, DeleteRecordsRequest, ElectLeadersRequest, IsrChangeEntry,
    LeaderAndIsrPartitionState, LeaderAndIsrRequest, LeaderAndIsrResponse, LogDirInfo,
    LogDirPartitionInfo, StopReplicaRequest, StopReplicaResponse, UpdateMetadataPartitionState,
    UpdateMetadataRequest, DELETE_TO_HIGH_WATERMARK, LEADER_DURING_DELETE,
};
pub use errors::{ErrorCode, KafkaError, KafkaResult};
pub use fetch::{
    ClientMetadata, FetchPartitionData, FetchRequest, FetchResponse, IsolationLevel,
    PartitionFetchData, CONSUMER_REPLICA_ID, FUTURE_LOCAL_REPLICA_ID,
};
pub use produce::{PartitionResponse, ProduceRequest, INTERNAL_TOPIC_PREFIX};
