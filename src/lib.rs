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

//! quartzmq: the per-node replica manager of a partitioned, replicated
//! commit log.
//!
//! Each node hosts a subset of topic-partitions, leading some and
//! following others as directed by the cluster controller. This crate owns
//! that per-node state: role transitions, the in-sync replica set and high
//! watermark per leader partition, long-poll produce/fetch coordination,
//! follower replication workers, and disk-failure recovery. The physical
//! log, the controller, and the network layer plug in through traits.

pub mod log;
pub mod message;
pub mod metadata;
pub mod replica;
pub mod request;
pub mod service;
pub mod utils;

pub use log::LogManager;
pub use replica::{LeaderEndpoint, LeaderEndpointFactory, ReplicaManager};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, BrokerConfig, Shutdown,
};
