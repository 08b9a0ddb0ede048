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

//! End-to-end replica manager scenarios: role transitions, produce acks,
//! follower replication between two in-process managers, delete-records,
//! disk failure, and cross-dir moves.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use quartzmq::log::{LogManager, MemoryLogFactory, HIGH_WATERMARK_CHECKPOINT_FILE};
use quartzmq::message::{MemoryRecords, PartitionMsgData, TopicData, TopicPartition};
use quartzmq::metadata::{MetadataCache, Node};
use quartzmq::replica::{
    HostedPartition, LeaderEndpoint, LeaderEndpointFactory, LeaderSelector, NoOpControllerChannel,
    RackAwareSelector, ReplicaManager, ReplicaSelector,
};
use quartzmq::request::{
    ClientMetadata, DeleteRecordsRequest, ErrorCode, FetchPartitionData, FetchRequest,
    IsolationLevel, LeaderAndIsrPartitionState, LeaderAndIsrRequest, PartitionFetchData,
    ProduceRequest, StopReplicaRequest, UpdateMetadataPartitionState, UpdateMetadataRequest,
};
use quartzmq::service::BrokerConfig;
use quartzmq::utils::{Clock, ManualClock};
use quartzmq::AppResult;

/// Fetches against another in-process replica manager; stands in for the
/// network client.
#[derive(Debug)]
struct ManagerEndpoint {
    broker_id: i32,
    manager: Arc<ReplicaManager>,
}

#[async_trait]
impl LeaderEndpoint for ManagerEndpoint {
    fn broker_id(&self) -> i32 {
        self.broker_id
    }

    async fn fetch(
        &self,
        request: FetchRequest,
    ) -> AppResult<BTreeMap<TopicPartition, FetchPartitionData>> {
        Ok(self.manager.fetch_messages(request).await.responses)
    }

    async fn earliest_offset(&self, tp: &TopicPartition) -> AppResult<i64> {
        match self.manager.hosted().get(tp) {
            HostedPartition::Online(partition) => Ok(partition.log_start_offset().await),
            _ => Ok(0),
        }
    }

    async fn latest_offset(&self, tp: &TopicPartition) -> AppResult<i64> {
        match self.manager.hosted().get(tp) {
            HostedPartition::Online(partition) => Ok(partition.log_end_offset().await),
            _ => Ok(0),
        }
    }
}

#[derive(Debug, Default)]
struct TestEndpointFactory {
    endpoints: Mutex<HashMap<i32, Arc<dyn LeaderEndpoint>>>,
}

impl TestEndpointFactory {
    fn register(&self, broker_id: i32, endpoint: Arc<dyn LeaderEndpoint>) {
        self.endpoints.lock().unwrap().insert(broker_id, endpoint);
    }
}

impl LeaderEndpointFactory for TestEndpointFactory {
    fn endpoint_for(&self, broker_id: i32) -> Option<Arc<dyn LeaderEndpoint>> {
        self.endpoints.lock().unwrap().get(&broker_id).cloned()
    }
}

struct Broker {
    manager: Arc<ReplicaManager>,
    log_manager: Arc<LogManager>,
    endpoint_factory: Arc<TestEndpointFactory>,
    clock: Arc<ManualClock>,
    notify_shutdown: broadcast::Sender<()>,
    _dirs: Vec<tempfile::TempDir>,
}

async fn start_broker_with_selector(
    broker_id: i32,
    dir_count: usize,
    selector: Arc<dyn ReplicaSelector>,
) -> Broker {
    let dirs: Vec<tempfile::TempDir> = (0..dir_count)
        .map(|_| tempfile::tempdir().unwrap())
        .collect();
    let mut config = BrokerConfig::default();
    config.general.id = broker_id;
    config.log.log_dirs = dirs
        .iter()
        .map(|dir| dir.path().to_str().unwrap().to_string())
        .collect();
    config.replication.fetch_max_wait_ms = 50;
    config.replication.high_watermark_checkpoint_interval_ms = 100;

    let clock = ManualClock::new(1_000_000);
    let log_manager = Arc::new(LogManager::new(
        config.log.log_dirs.clone(),
        Arc::new(MemoryLogFactory),
    ));
    let endpoint_factory = Arc::new(TestEndpointFactory::default());
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, _shutdown_complete_rx) = mpsc::channel(1);

    let manager = ReplicaManager::new(
        Arc::new(config),
        clock.clone() as Arc<dyn Clock>,
        log_manager.clone(),
        Arc::new(MetadataCache::new()),
        endpoint_factory.clone(),
        selector,
        Arc::new(NoOpControllerChannel),
        notify_shutdown.clone(),
        shutdown_complete_tx,
    )
    .await;
    manager.startup().await.unwrap();

    Broker {
        manager,
        log_manager,
        endpoint_factory,
        clock,
        notify_shutdown,
        _dirs: dirs,
    }
}

async fn start_broker(broker_id: i32) -> Broker {
    start_broker_with_selector(broker_id, 1, Arc::new(LeaderSelector)).await
}

fn tp() -> TopicPartition {
    TopicPartition::new("orders", 0)
}

fn leader_and_isr(
    controller_epoch: i32,
    leader: i32,
    leader_epoch: i32,
    isr: Vec<i32>,
    replicas: Vec<i32>,
) -> LeaderAndIsrRequest {
    let mut partition_states = BTreeMap::new();
    partition_states.insert(
        tp(),
        LeaderAndIsrPartitionState {
            controller_epoch,
            leader,
            leader_epoch,
            isr,
            zk_version: 1,
            replicas,
            is_new: true,
        },
    );
    LeaderAndIsrRequest {
        controller_id: 0,
        controller_epoch,
        partition_states,
    }
}

fn cluster_metadata(controller_epoch: i32, leader: i32, replicas: Vec<i32>) -> UpdateMetadataRequest {
    let live_brokers = replicas
        .iter()
        .map(|id| Node::new(*id, format!("broker-{}", id), 9092))
        .collect();
    let mut partition_states = BTreeMap::new();
    partition_states.insert(
        tp(),
        UpdateMetadataPartitionState {
            controller_epoch,
            leader,
            leader_epoch: 1,
            isr: replicas.clone(),
            replicas,
            offline_replicas: vec![],
        },
    );
    UpdateMetadataRequest {
        controller_id: 0,
        controller_epoch,
        live_brokers,
        partition_states,
    }
}

fn produce_request(required_acks: i16, records: u32) -> ProduceRequest {
    ProduceRequest {
        required_acks,
        timeout_ms: 5_000,
        internal_topics_allowed: false,
        topic_data: vec![TopicData::new(
            "orders".to_string(),
            vec![PartitionMsgData::new(
                0,
                MemoryRecords::of_payload(records, b"payload"),
            )],
        )],
    }
}

fn fetch_request(replica_id: i32, fetch_offset: i64, max_wait_ms: i64) -> FetchRequest {
    let mut fetch_data = BTreeMap::new();
    fetch_data.insert(
        tp(),
        PartitionFetchData {
            fetch_offset,
            current_leader_epoch: None,
            log_start_offset: 0,
            max_bytes: 1024 * 1024,
        },
    );
    FetchRequest {
        replica_id,
        max_wait_ms,
        min_bytes: 0,
        max_bytes: 1024 * 1024,
        hard_max_bytes_limit: false,
        isolation_level: IsolationLevel::ReadUncommitted,
        fetch_data,
        client_metadata: None,
    }
}

async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_single_replica_acks_one_produce() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    let response = broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |leaders, _| {
            assert_eq!(leaders.len(), 1);
        })
        .await;
    assert!(response.error.is_none());
    assert_eq!(
        response.partition_errors.get(&tp()),
        Some(&(ErrorCode::None as i16))
    );

    let responses = broker.manager.append_records(produce_request(1, 3)).await;
    let partition_response = responses.get(&tp()).unwrap();
    assert_eq!(partition_response.error_code, ErrorCode::None as i16);
    assert_eq!(partition_response.base_offset, 0);
    assert_eq!(partition_response.last_offset, 2);

    // a self-fetch at the log end lets the single-member ISR advance the HW
    broker
        .manager
        .fetch_messages(fetch_request(1, 3, 0))
        .await;
    let partition = broker.manager.hosted().online(&tp()).unwrap();
    assert_eq!(partition.high_watermark().await, 3);
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_acks_all_completes_on_follower_catch_up() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1, 2]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1, 2], vec![1, 2]), |_, _| {})
        .await;

    let manager = broker.manager.clone();
    let produce = tokio::spawn(async move {
        manager.append_records(produce_request(-1, 5)).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // follower 2 has caught up to offset 5
    broker
        .manager
        .fetch_messages(fetch_request(2, 5, 0))
        .await;

    let responses = tokio::time::timeout(Duration::from_secs(5), produce)
        .await
        .unwrap()
        .unwrap();
    let partition_response = responses.get(&tp()).unwrap();
    assert_eq!(partition_response.error_code, ErrorCode::None as i16);
    assert_eq!(partition_response.base_offset, 0);

    let partition = broker.manager.hosted().online(&tp()).unwrap();
    assert_eq!(partition.high_watermark().await, 5);
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_stale_controller_epoch_rejected_without_mutation() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(7, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(7, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;
    assert_eq!(broker.manager.controller_epoch(), 7);

    let response = broker
        .manager
        .become_leader_or_follower(leader_and_isr(6, 1, 2, vec![1], vec![1]), |_, _| {
            panic!("stale directive must not trigger leadership changes");
        })
        .await;
    assert!(matches!(
        response.error,
        Some(quartzmq::request::KafkaError::StaleControllerEpoch(_))
    ));

    let partition = broker.manager.hosted().online(&tp()).unwrap();
    assert_eq!(partition.leader_epoch().await, 1);
    assert_eq!(broker.manager.controller_epoch(), 7);
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_stale_leader_epoch_rejected_per_partition() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 5, vec![1], vec![1]), |_, _| {})
        .await;

    // same controller, stale leader epoch for the partition
    let response = broker
        .manager
        .become_leader_or_follower(leader_and_isr(2, 1, 5, vec![1], vec![1]), |_, _| {})
        .await;
    assert!(response.error.is_none());
    assert_eq!(
        response.partition_errors.get(&tp()),
        Some(&(ErrorCode::StaleControllerEpoch as i16))
    );
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_produce_error_paths() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;

    // invalid acks value
    let responses = broker.manager.append_records(produce_request(2, 1)).await;
    assert_eq!(
        responses.get(&tp()).unwrap().error_code,
        ErrorCode::InvalidRequiredAcks as i16
    );

    // partition not hosted here
    let mut request = produce_request(1, 1);
    request.topic_data[0].topic_name = "unknown".to_string();
    let responses = broker.manager.append_records(request).await;
    let response = responses
        .get(&TopicPartition::new("unknown", 0))
        .unwrap();
    assert_eq!(
        response.error_code,
        ErrorCode::UnknownTopicOrPartition as i16
    );

    // internal topic without opt-in
    let mut request = produce_request(1, 1);
    request.topic_data[0].topic_name = "__cluster_state".to_string();
    let responses = broker.manager.append_records(request).await;
    let response = responses
        .get(&TopicPartition::new("__cluster_state", 0))
        .unwrap();
    assert_eq!(response.error_code, ErrorCode::InvalidTopic as i16);
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_follower_replication_between_two_brokers() {
    let leader = start_broker(1).await;
    let follower = start_broker(2).await;
    follower.endpoint_factory.register(
        1,
        Arc::new(ManagerEndpoint {
            broker_id: 1,
            manager: leader.manager.clone(),
        }),
    );

    leader
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1, 2]))
        .await
        .unwrap();
    follower
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1, 2]))
        .await
        .unwrap();

    leader
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1, 2], vec![1, 2]), |_, _| {})
        .await;
    follower
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1, 2], vec![1, 2]), |_, followers| {
            assert_eq!(followers.len(), 1);
        })
        .await;

    let manager = leader.manager.clone();
    let produce = tokio::spawn(async move {
        manager.append_records(produce_request(-1, 5)).await
    });

    let responses = tokio::time::timeout(Duration::from_secs(10), produce)
        .await
        .expect("acks=-1 produce should complete once the follower catches up")
        .unwrap();
    assert_eq!(
        responses.get(&tp()).unwrap().error_code,
        ErrorCode::None as i16
    );

    let leader_partition = leader.manager.hosted().online(&tp()).unwrap();
    assert_eq!(leader_partition.high_watermark().await, 5);

    // the follower converges on the leader's log end and high watermark
    let follower_manager = follower.manager.clone();
    wait_until("follower to replicate 5 records", || {
        let manager = follower_manager.clone();
        async move {
            match manager.hosted().online(&tp()) {
                Some(partition) => {
                    partition.log_end_offset().await == 5
                        && partition.high_watermark().await == 5
                }
                None => false,
            }
        }
    })
    .await;

    // leader-side prefix delete completes once the follower's log start
    // catches up through replication
    let mut offsets = BTreeMap::new();
    offsets.insert(tp(), 3);
    let delete_responses = leader
        .manager
        .delete_records(DeleteRecordsRequest {
            timeout_ms: 5_000,
            offsets,
        })
        .await;
    let delete_result = delete_responses.get(&tp()).unwrap();
    assert_eq!(delete_result.error_code, ErrorCode::None as i16);
    assert_eq!(delete_result.low_watermark, 3);

    let follower_manager = follower.manager.clone();
    wait_until("follower log start to advance", || {
        let manager = follower_manager.clone();
        async move {
            match manager.hosted().online(&tp()) {
                Some(partition) => partition.log_start_offset().await == 3,
                None => false,
            }
        }
    })
    .await;

    let _ = leader.notify_shutdown.send(());
    let _ = follower.notify_shutdown.send(());
}

#[tokio::test]
async fn test_log_dir_failure_marks_partition_offline() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 3)).await;

    let dir = broker.log_manager.live_log_dirs()[0].clone();
    let checkpoint_path = std::path::Path::new(&dir).join(HIGH_WATERMARK_CHECKPOINT_FILE);
    tokio::fs::write(&checkpoint_path, "0\n0\n").await.unwrap();

    broker
        .log_manager
        .offline_dir_sender()
        .send(dir.clone())
        .await
        .unwrap();

    let manager = broker.manager.clone();
    wait_until("partition to go offline", || {
        let manager = manager.clone();
        async move { matches!(manager.hosted().get(&tp()), HostedPartition::Offline) }
    })
    .await;

    let response = broker
        .manager
        .fetch_messages(fetch_request(-1, 0, 0))
        .await;
    assert_eq!(
        response.responses.get(&tp()).unwrap().error_code,
        ErrorCode::KafkaStorageError as i16
    );
    // the failed dir's checkpoint is dropped and never rewritten
    wait_until("checkpoint file to be dropped", || {
        let path = checkpoint_path.clone();
        async move { !path.exists() }
    })
    .await;
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_stop_replica_with_delete_removes_partition() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 2)).await;

    let response = broker
        .manager
        .stop_replicas(StopReplicaRequest {
            controller_id: 0,
            controller_epoch: 1,
            delete_partitions: true,
            partitions: vec![tp()],
        })
        .await;
    assert!(response.error.is_none());
    assert_eq!(
        response.partition_errors.get(&tp()),
        Some(&(ErrorCode::None as i16))
    );
    assert!(matches!(
        broker.manager.hosted().get(&tp()),
        HostedPartition::None
    ));
    assert!(broker.log_manager.get_log(&tp()).is_none());
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_preferred_read_replica_hint() {
    let broker = start_broker_with_selector(1, 1, Arc::new(RackAwareSelector)).await;

    // follower 2 lives in the consumer's rack
    let mut metadata = cluster_metadata(1, 1, vec![1, 2]);
    metadata.live_brokers = vec![
        Node::new(1, "broker-1", 9092).with_rack("rack-a"),
        Node::new(2, "broker-2", 9092).with_rack("rack-b"),
    ];
    broker.manager.update_metadata(0, metadata).await.unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1, 2], vec![1, 2]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 3)).await;
    // follower 2 reports a full replica
    broker
        .manager
        .fetch_messages(fetch_request(2, 3, 0))
        .await;

    let mut request = fetch_request(-1, 0, 0);
    request.client_metadata = Some(ClientMetadata {
        client_id: "consumer-1".to_string(),
        rack_id: Some("rack-b".to_string()),
    });
    let response = broker.manager.fetch_messages(request).await;
    let data = response.responses.get(&tp()).unwrap();
    assert_eq!(data.preferred_read_replica, Some(2));
    assert!(data.records.is_empty());

    // a consumer without rack metadata reads from the leader
    let response = broker
        .manager
        .fetch_messages(fetch_request(-1, 0, 0))
        .await;
    let data = response.responses.get(&tp()).unwrap();
    assert_eq!(data.preferred_read_replica, None);
    assert_eq!(data.records.record_count(), 3);
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_consumer_fetch_bounded_by_high_watermark() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1, 2]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1, 2], vec![1, 2]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 4)).await;

    // nothing below the HW yet: an impatient consumer sees no records
    let response = broker
        .manager
        .fetch_messages(fetch_request(-1, 0, 0))
        .await;
    assert!(response.responses.get(&tp()).unwrap().records.is_empty());

    // follower catch-up advances the HW, the same fetch now yields data
    broker
        .manager
        .fetch_messages(fetch_request(2, 4, 0))
        .await;
    let response = broker
        .manager
        .fetch_messages(fetch_request(-1, 0, 0))
        .await;
    assert_eq!(
        response.responses.get(&tp()).unwrap().records.record_count(),
        4
    );
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_delayed_consumer_fetch_wakes_on_produce() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;

    let manager = broker.manager.clone();
    let consumer = tokio::spawn(async move {
        let mut request = fetch_request(-1, 0, 5_000);
        request.min_bytes = 1;
        manager.fetch_messages(request).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    broker.manager.append_records(produce_request(1, 2)).await;
    // single-replica ISR: the self-fetch advances the HW and wakes the
    // parked consumer
    broker
        .manager
        .fetch_messages(fetch_request(1, 2, 0))
        .await;

    let response = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("parked fetch should complete after HW advances")
        .unwrap();
    assert_eq!(
        response.responses.get(&tp()).unwrap().records.record_count(),
        2
    );
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_isr_shrink_after_follower_goes_silent() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1, 2]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1, 2], vec![1, 2]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 3)).await;

    broker.clock.advance(31_000);
    broker.manager.maybe_shrink_isr().await;

    let partition = broker.manager.hosted().online(&tp()).unwrap();
    assert_eq!(partition.isr().await, vec![1]);
    assert_eq!(partition.high_watermark().await, 3);
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_alter_replica_log_dirs_moves_partition() {
    let broker = start_broker_with_selector(1, 2, Arc::new(LeaderSelector)).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 3)).await;

    let partition = broker.manager.hosted().online(&tp()).unwrap();
    let current_dir = partition.log().await.unwrap().log_dir().to_string();
    let target_dir = broker
        .log_manager
        .live_log_dirs()
        .into_iter()
        .find(|dir| *dir != current_dir)
        .unwrap();

    let mut dirs = HashMap::new();
    dirs.insert(tp(), target_dir.clone());
    let results = broker.manager.alter_replica_log_dirs(dirs).await;
    assert_eq!(results.get(&tp()), Some(&(ErrorCode::None as i16)));

    let manager = broker.manager.clone();
    let expected_dir = target_dir.clone();
    wait_until("future replica to be promoted", || {
        let manager = manager.clone();
        let expected_dir = expected_dir.clone();
        async move {
            match manager.hosted().online(&tp()) {
                Some(partition) => match partition.log().await {
                    Some(log) => {
                        log.log_dir() == expected_dir && log.log_end_offset() == 3
                    }
                    None => false,
                },
                None => false,
            }
        }
    })
    .await;
    let _ = broker.notify_shutdown.send(());
}

#[tokio::test]
async fn test_high_watermark_checkpoint_written() {
    let broker = start_broker(1).await;
    broker
        .manager
        .update_metadata(0, cluster_metadata(1, 1, vec![1]))
        .await
        .unwrap();
    broker
        .manager
        .become_leader_or_follower(leader_and_isr(1, 1, 1, vec![1], vec![1]), |_, _| {})
        .await;
    broker.manager.append_records(produce_request(1, 3)).await;
    broker
        .manager
        .fetch_messages(fetch_request(1, 3, 0))
        .await;

    let dir = broker.log_manager.live_log_dirs()[0].clone();
    let checkpoint_path = std::path::Path::new(&dir)
        .join(HIGH_WATERMARK_CHECKPOINT_FILE)
        .to_path_buf();
    wait_until("high watermark checkpoint to appear", || {
        let path = checkpoint_path.clone();
        async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents.contains("orders 0 3"),
                Err(_) => false,
            }
        }
    })
    .await;
    let _ = broker.notify_shutdown.send(());
}
