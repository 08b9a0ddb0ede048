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

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::sleep;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, trace};

use crate::Shutdown;

/// A parked operation. `try_complete` is re-evaluated whenever one of the
/// operation's watch keys is poked; completion and expiry race through a
/// single atomic flag, so exactly one of `on_complete` / `on_expiration`
/// side effects wins.
pub trait DelayedAsyncOperation: Send + Sync {
    fn delay_ms(&self) -> u64;
    fn try_complete(&self) -> impl Future<Output = bool> + Send;
    fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
    fn on_expiration(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug)]
struct DelayedAsyncOperationState<T: DelayedAsyncOperation> {
    operation: Arc<T>,
    completed: AtomicCell<bool>,
    delay_key: AtomicCell<Option<delay_queue::Key>>,
}

impl<T: DelayedAsyncOperation> DelayedAsyncOperationState<T> {
    fn new(operation: Arc<T>) -> Self {
        Self {
            operation,
            completed: AtomicCell::new(false),
            delay_key: AtomicCell::new(None),
        }
    }

    fn is_completed(&self) -> bool {
        self.completed.load()
    }

    /// Runs `on_complete` iff this call won the completion race.
    async fn force_complete(&self) -> bool {
        if !self.completed.swap(true) {
            self.operation.on_complete().await;
            true
        } else {
            false
        }
    }
}

enum DelayQueueOp<T: DelayedAsyncOperation> {
    Insert(Arc<DelayedAsyncOperationState<T>>, Duration),
    Remove(delay_queue::Key),
}

/// Holds delayed operations of one type, keyed by watch keys
/// (topic-partition ids), until they complete or hit their deadline.
#[derive(Debug)]
pub struct DelayedAsyncOperationPurgatory<T: DelayedAsyncOperation + 'static> {
    name: String,
    watchers: DashMap<String, Vec<Arc<DelayedAsyncOperationState<T>>>>,
    delay_queue_tx: Sender<DelayQueueOp<T>>,
    purge_interval: Duration,
}

impl<T: DelayedAsyncOperation + 'static> DelayedAsyncOperationPurgatory<T> {
    pub async fn new(
        name: &str,
        purge_interval_ms: u64,
        notify_shutdown: broadcast::Sender<()>,
    ) -> Arc<Self> {
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        let (tx, rx) = mpsc::channel(1024);

        let purgatory = Arc::new(DelayedAsyncOperationPurgatory {
            name: name.to_string(),
            watchers: DashMap::new(),
            delay_queue_tx: tx,
            purge_interval: Duration::from_millis(purge_interval_ms),
        });
        purgatory.clone().start(rx, shutdown);
        purgatory
    }

    /// Atomically evaluates `try_complete`; when the operation cannot finish
    /// now, registers it under every watch key and arms its expiry timer.
    /// Returns true when the operation completed without being parked.
    pub async fn try_complete_else_watch(&self, operation: Arc<T>, watch_keys: Vec<String>) -> bool {
        let op_state = Arc::new(DelayedAsyncOperationState::new(operation));

        if op_state.operation.try_complete().await && op_state.force_complete().await {
            return true;
        }

        for key in watch_keys {
            if op_state.is_completed() {
                break;
            }
            self.watchers
                .entry(key)
                .or_default()
                .push(Arc::clone(&op_state));
        }

        // second chance: the state may have become completable while the
        // watch lists were being populated
        if !op_state.is_completed()
            && op_state.operation.try_complete().await
            && op_state.force_complete().await
        {
            return true;
        }

        if !op_state.is_completed() {
            let delay = Duration::from_millis(op_state.operation.delay_ms());
            let _ = self
                .delay_queue_tx
                .send(DelayQueueOp::Insert(Arc::clone(&op_state), delay))
                .await;
        }

        false
    }

    /// Re-evaluates every operation watched under `key`, completing those
    /// whose predicate now holds. Returns the number completed.
    pub async fn check_and_complete(&self, key: &str) -> usize {
        // snapshot the watch list so `try_complete` never runs under the
        // map shard lock
        let ops = match self.watchers.get(key) {
            Some(watcher_list) => watcher_list.value().clone(),
            None => return 0,
        };

        let mut completed = 0;
        for op in ops {
            if !op.is_completed() && op.operation.try_complete().await && op.force_complete().await
            {
                completed += 1;
                if let Some(delay_key) = op.delay_key.load() {
                    let _ = self
                        .delay_queue_tx
                        .send(DelayQueueOp::Remove(delay_key))
                        .await;
                }
            }
        }
        if completed > 0 {
            trace!(
                "purgatory {} completed {} operations for key {}",
                self.name,
                completed,
                key
            );
        }
        completed
    }

    pub fn watched(&self) -> usize {
        self.watchers.iter().map(|entry| entry.value().len()).sum()
    }

    fn start(self: Arc<Self>, mut delay_queue_rx: Receiver<DelayQueueOp<T>>, mut shutdown: Shutdown) {
        let name = self.name.clone();
        let expiry_purgatory = Arc::clone(&self);
        let purgatory = Arc::clone(&self);

        // expiry loop: owns the delay queue; on shutdown every still-pending
        // operation is expired so callers waiting on a response unblock
        tokio::spawn(async move {
            let mut delay_queue: DelayQueue<Arc<DelayedAsyncOperationState<T>>> = DelayQueue::new();

            loop {
                tokio::select! {
                    Some(op) = delay_queue_rx.recv() => {
                        match op {
                            DelayQueueOp::Insert(state, duration) => {
                                let key = delay_queue.insert(state.clone(), duration);
                                state.delay_key.store(Some(key));
                            }
                            DelayQueueOp::Remove(key) => {
                                if delay_queue.try_remove(&key).is_none() {
                                    trace!("purgatory {} timer already fired", name);
                                }
                            }
                        }
                    }
                    Some(expired) = delay_queue.next() => {
                        let op = expired.into_inner();
                        if op.force_complete().await {
                            op.operation.on_expiration().await;
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("purgatory {} shutting down, expiring outstanding operations", name);
                        expiry_purgatory.expire_all().await;
                        break;
                    }
                }
            }
        });

        let purge_interval = self.purge_interval;
        tokio::spawn(async move {
            loop {
                sleep(purge_interval).await;
                purgatory.purge_completed();
            }
        });
    }

    /// Expires every outstanding operation, regardless of deadline.
    async fn expire_all(&self) {
        let mut pending = Vec::new();
        for entry in self.watchers.iter() {
            for op in entry.value() {
                if !op.is_completed() {
                    pending.push(Arc::clone(op));
                }
            }
        }
        for op in pending {
            if op.force_complete().await {
                op.operation.on_expiration().await;
            }
        }
        self.watchers.clear();
    }

    /// Drops completed entries from the watch lists to cap memory.
    fn purge_completed(&self) {
        let mut keys_to_remove = Vec::new();

        for mut entry in self.watchers.iter_mut() {
            entry.value_mut().retain(|op| !op.is_completed());
            if entry.value().is_empty() {
                keys_to_remove.push(entry.key().clone());
            }
        }

        for key in keys_to_remove {
            self.watchers
                .remove_if(&key, |_, watcher_list| watcher_list.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestOp {
        delay_ms: u64,
        ready: AtomicBool,
        completions: Arc<AtomicUsize>,
        expirations: Arc<AtomicUsize>,
    }

    impl TestOp {
        fn new(delay_ms: u64) -> (Arc<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let completions = Arc::new(AtomicUsize::new(0));
            let expirations = Arc::new(AtomicUsize::new(0));
            let op = Arc::new(TestOp {
                delay_ms,
                ready: AtomicBool::new(false),
                completions: completions.clone(),
                expirations: expirations.clone(),
            });
            (op, completions, expirations)
        }
    }

    impl DelayedAsyncOperation for TestOp {
        fn delay_ms(&self) -> u64 {
            self.delay_ms
        }

        async fn try_complete(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn on_complete(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                self.completions.fetch_add(1, Ordering::SeqCst);
            })
        }

        async fn on_expiration(&self) {
            self.expirations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_completes_when_key_checked() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let purgatory =
            DelayedAsyncOperationPurgatory::<TestOp>::new("test", 60_000, notify_shutdown).await;

        let (op, completions, _) = TestOp::new(60_000);
        let parked = !purgatory
            .try_complete_else_watch(op.clone(), vec!["t-0".to_string()])
            .await;
        assert!(parked);
        assert_eq!(purgatory.watched(), 1);

        op.ready.store(true, Ordering::SeqCst);
        assert_eq!(purgatory.check_and_complete("t-0").await, 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // a second poke must not re-run on_complete
        assert_eq!(purgatory.check_and_complete("t-0").await, 0);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_completion_skips_watch() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let purgatory =
            DelayedAsyncOperationPurgatory::<TestOp>::new("test", 60_000, notify_shutdown).await;

        let (op, completions, _) = TestOp::new(60_000);
        op.ready.store(true, Ordering::SeqCst);
        let done = purgatory
            .try_complete_else_watch(op, vec!["t-0".to_string()])
            .await;
        assert!(done);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(purgatory.watched(), 0);
    }

    #[tokio::test]
    async fn test_expiration_runs_exactly_once() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let purgatory =
            DelayedAsyncOperationPurgatory::<TestOp>::new("test", 60_000, notify_shutdown).await;

        let (op, completions, expirations) = TestOp::new(20);
        purgatory
            .try_complete_else_watch(op.clone(), vec!["t-0".to_string()])
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(expirations.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // late poke after expiry is a no-op
        op.ready.store(true, Ordering::SeqCst);
        assert_eq!(purgatory.check_and_complete("t-0").await, 0);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_purge_drops_completed_entries() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let purgatory =
            DelayedAsyncOperationPurgatory::<TestOp>::new("test", 60_000, notify_shutdown).await;

        let (op, _, _) = TestOp::new(60_000);
        purgatory
            .try_complete_else_watch(op.clone(), vec!["t-0".to_string(), "t-1".to_string()])
            .await;
        op.ready.store(true, Ordering::SeqCst);
        purgatory.check_and_complete("t-0").await;

        purgatory.purge_completed();
        assert_eq!(purgatory.watched(), 0);
    }
}
