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

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::message::TopicPartition;
use crate::replica::ControllerChannel;
use crate::request::IsrChangeEntry;
use crate::utils::Clock;
use crate::Shutdown;

/// Buffers ISR mutations and ships them to the metadata store in batches:
/// a batch goes out when no further change arrived for the quiet period,
/// or when the oldest unpropagated change is older than the max delay.
#[derive(Debug)]
pub struct IsrChangeTracker {
    buffered: Mutex<HashMap<TopicPartition, IsrChangeEntry>>,
    last_change_ms: AtomicI64,
    last_propagation_ms: AtomicI64,
    quiet_period_ms: i64,
    max_delay_ms: i64,
    clock: Arc<dyn Clock>,
    controller: Arc<dyn ControllerChannel>,
}

impl IsrChangeTracker {
    pub fn new(
        quiet_period_ms: i64,
        max_delay_ms: i64,
        clock: Arc<dyn Clock>,
        controller: Arc<dyn ControllerChannel>,
    ) -> Arc<Self> {
        let now_ms = clock.now_ms();
        Arc::new(Self {
            buffered: Mutex::new(HashMap::new()),
            last_change_ms: AtomicI64::new(now_ms),
            last_propagation_ms: AtomicI64::new(now_ms),
            quiet_period_ms,
            max_delay_ms,
            clock,
            controller,
        })
    }

    pub fn record(&self, entry: IsrChangeEntry) {
        let topic_partition = TopicPartition::new(entry.topic.clone(), entry.partition);
        self.buffered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic_partition, entry);
        self.last_change_ms
            .store(self.clock.now_ms(), Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.buffered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// One propagation attempt; the periodic task calls this on every tick.
    pub async fn maybe_propagate(&self) {
        let now_ms = self.clock.now_ms();
        let changes: Vec<IsrChangeEntry> = {
            let mut buffered = self
                .buffered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if buffered.is_empty() {
                return;
            }
            let quiet = now_ms - self.last_change_ms.load(Ordering::SeqCst)
                >= self.quiet_period_ms;
            let overdue = now_ms - self.last_propagation_ms.load(Ordering::SeqCst)
                >= self.max_delay_ms;
            if !quiet && !overdue {
                return;
            }
            buffered.drain().map(|(_, entry)| entry).collect()
        };

        debug!("propagating {} isr changes", changes.len());
        self.controller.propagate_isr_changes(changes).await;
        self.last_propagation_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn start(self: Arc<Self>, tick_interval_ms: u64, mut shutdown: Shutdown) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_millis(tick_interval_ms)) => {
                        self.maybe_propagate().await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    struct RecordingChannel {
        batches: Mutex<Vec<Vec<IsrChangeEntry>>>,
    }

    #[async_trait]
    impl ControllerChannel for RecordingChannel {
        async fn propagate_isr_changes(&self, changes: Vec<IsrChangeEntry>) {
            self.batches.lock().unwrap().push(changes);
        }
        async fn notify_log_dir_failure(&self, _broker_id: i32) {}
    }

    fn entry(partition: i32) -> IsrChangeEntry {
        IsrChangeEntry {
            topic: "t".to_string(),
            partition,
            isr: vec![1],
            leader_epoch: 1,
            zk_version: 1,
        }
    }

    #[tokio::test]
    async fn test_waits_for_quiet_period() {
        let clock = ManualClock::new(0);
        let channel = Arc::new(RecordingChannel::default());
        let tracker =
            IsrChangeTracker::new(5_000, 60_000, clock.clone(), channel.clone());

        tracker.record(entry(0));
        clock.advance(1_000);
        tracker.maybe_propagate().await;
        assert!(channel.batches.lock().unwrap().is_empty());

        clock.advance(4_000);
        tracker.maybe_propagate().await;
        assert_eq!(channel.batches.lock().unwrap().len(), 1);
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_propagates_when_overdue_despite_churn() {
        let clock = ManualClock::new(0);
        let channel = Arc::new(RecordingChannel::default());
        let tracker =
            IsrChangeTracker::new(5_000, 60_000, clock.clone(), channel.clone());

        // keep mutating so the quiet period never elapses
        for _ in 0..30 {
            tracker.record(entry(0));
            clock.advance(2_500);
            tracker.maybe_propagate().await;
        }
        assert!(!channel.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_coalesces_per_partition() {
        let clock = ManualClock::new(0);
        let channel = Arc::new(RecordingChannel::default());
        let tracker =
            IsrChangeTracker::new(5_000, 60_000, clock.clone(), channel.clone());

        tracker.record(entry(0));
        tracker.record(entry(0));
        tracker.record(entry(1));
        assert_eq!(tracker.pending(), 2);

        clock.advance(5_000);
        tracker.maybe_propagate().await;
        let batches = channel.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }
}
