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

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{error, info, warn};

use crate::log::{CheckpointFile, Log, MemoryLog, HIGH_WATERMARK_CHECKPOINT_FILE};
use crate::message::TopicPartition;
use crate::{AppError, AppResult};

/// Creates the per-partition log for a chosen directory. The storage engine
/// plugs in here; the default builds [`MemoryLog`]s.
#[async_trait]
pub trait LogFactory: Send + Sync + std::fmt::Debug {
    async fn create_log(
        &self,
        topic_partition: &TopicPartition,
        log_dir: &str,
    ) -> AppResult<Arc<dyn Log>>;
}

#[derive(Debug, Default)]
pub struct MemoryLogFactory;

#[async_trait]
impl LogFactory for MemoryLogFactory {
    async fn create_log(
        &self,
        topic_partition: &TopicPartition,
        log_dir: &str,
    ) -> AppResult<Arc<dyn Log>> {
        Ok(Arc::new(MemoryLog::new(topic_partition.clone(), log_dir)))
    }
}

/// Registry of local logs across the configured log directories.
///
/// Placement is stable (hash of the partition id over the live dirs).
/// The log layer publishes directory failures through the offline-dir
/// channel; the replica layer drains it.
#[derive(Debug)]
pub struct LogManager {
    log_dirs: Vec<String>,
    logs: DashMap<TopicPartition, Arc<dyn Log>>,
    future_logs: DashMap<TopicPartition, Arc<dyn Log>>,
    offline_dirs: RwLock<HashSet<String>>,
    log_factory: Arc<dyn LogFactory>,
    offline_dir_tx: Sender<String>,
    offline_dir_rx: Mutex<Option<Receiver<String>>>,
    recovered_hws: DashMap<TopicPartition, i64>,
}

impl LogManager {
    pub fn new(log_dirs: Vec<String>, log_factory: Arc<dyn LogFactory>) -> Self {
        let (offline_dir_tx, offline_dir_rx) = mpsc::channel(16);
        Self {
            log_dirs,
            logs: DashMap::new(),
            future_logs: DashMap::new(),
            offline_dirs: RwLock::new(HashSet::new()),
            log_factory,
            offline_dir_tx,
            offline_dir_rx: Mutex::new(Some(offline_dir_rx)),
            recovered_hws: DashMap::new(),
        }
    }

    /// Creates the log directories and loads the high-watermark checkpoints
    /// written by previous runs.
    pub async fn startup(&self) -> AppResult<()> {
        for dir in &self.log_dirs {
            tokio::fs::create_dir_all(dir).await?;
            let checkpoint =
                CheckpointFile::new(Path::new(dir).join(HIGH_WATERMARK_CHECKPOINT_FILE));
            match checkpoint.read_checkpoints().await {
                Ok(points) => {
                    for (tp, hw) in points {
                        self.recovered_hws.insert(tp, hw);
                    }
                }
                Err(e) => {
                    warn!("skipping unreadable checkpoint in {}: {}", dir, e);
                }
            }
        }
        info!(
            "log manager started with {} dirs, {} recovered high watermarks",
            self.log_dirs.len(),
            self.recovered_hws.len()
        );
        Ok(())
    }

    /// Publisher handle for the storage engine to report failed directories.
    pub fn offline_dir_sender(&self) -> Sender<String> {
        self.offline_dir_tx.clone()
    }

    /// Consumer side of the offline-dir channel; may be taken once.
    pub fn take_offline_dir_receiver(&self) -> Option<Receiver<String>> {
        self.offline_dir_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn live_log_dirs(&self) -> Vec<String> {
        let offline = self
            .offline_dirs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.log_dirs
            .iter()
            .filter(|dir| !offline.contains(*dir))
            .cloned()
            .collect()
    }

    pub fn is_dir_online(&self, dir: &str) -> bool {
        !self
            .offline_dirs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(dir)
    }

    fn pick_log_dir(&self, topic_partition: &TopicPartition) -> AppResult<String> {
        let live_dirs = self.live_log_dirs();
        if live_dirs.is_empty() {
            return Err(AppError::LogDirOffline(format!(
                "no online log dir for {}",
                topic_partition
            )));
        }
        let mut hasher = DefaultHasher::new();
        topic_partition.id().hash(&mut hasher);
        let index = (hasher.finish() % live_dirs.len() as u64) as usize;
        Ok(live_dirs[index].clone())
    }

    pub async fn get_or_create_log(
        &self,
        topic_partition: &TopicPartition,
    ) -> AppResult<Arc<dyn Log>> {
        if let Some(log) = self.logs.get(topic_partition) {
            return Ok(log.value().clone());
        }
        let dir = self.pick_log_dir(topic_partition)?;
        let log = self
            .log_factory
            .create_log(topic_partition, &dir)
            .await?;
        let entry = self
            .logs
            .entry(topic_partition.clone())
            .or_insert_with(|| log);
        Ok(entry.value().clone())
    }

    pub fn get_log(&self, topic_partition: &TopicPartition) -> Option<Arc<dyn Log>> {
        self.logs.get(topic_partition).map(|log| log.value().clone())
    }

    pub async fn get_or_create_future_log(
        &self,
        topic_partition: &TopicPartition,
        log_dir: &str,
    ) -> AppResult<Arc<dyn Log>> {
        if !self.log_dirs.iter().any(|dir| dir == log_dir) {
            return Err(AppError::InvalidValue(format!(
                "unknown log dir {}",
                log_dir
            )));
        }
        if !self.is_dir_online(log_dir) {
            return Err(AppError::LogDirOffline(log_dir.to_string()));
        }
        if let Some(log) = self.future_logs.get(topic_partition) {
            return Ok(log.value().clone());
        }
        let log = self
            .log_factory
            .create_log(topic_partition, log_dir)
            .await?;
        let entry = self
            .future_logs
            .entry(topic_partition.clone())
            .or_insert_with(|| log);
        Ok(entry.value().clone())
    }

    pub fn future_log(&self, topic_partition: &TopicPartition) -> Option<Arc<dyn Log>> {
        self.future_logs
            .get(topic_partition)
            .map(|log| log.value().clone())
    }

    /// Promotes the future log to current once it has caught up. The old
    /// log is handed back for deletion.
    pub fn replace_current_with_future(
        &self,
        topic_partition: &TopicPartition,
    ) -> Option<Arc<dyn Log>> {
        let (_, future) = self.future_logs.remove(topic_partition)?;
        self.logs
            .insert(topic_partition.clone(), future)
            .map(|old| {
                let old_clone = old.clone();
                tokio::spawn(async move { old_clone.close().await });
                old
            })
    }

    pub fn remove_future_log(&self, topic_partition: &TopicPartition) {
        self.future_logs.remove(topic_partition);
    }

    /// Detaches the log and closes it in the background.
    pub fn async_delete_log(&self, topic_partition: &TopicPartition) -> Option<Arc<dyn Log>> {
        self.future_logs.remove(topic_partition);
        let (_, log) = self.logs.remove(topic_partition)?;
        let log_clone = log.clone();
        let tp = topic_partition.clone();
        tokio::spawn(async move {
            log_clone.close().await;
            info!("deleted log for {}", tp);
        });
        Some(log)
    }

    pub fn logs_in_dir(&self, dir: &str) -> Vec<(TopicPartition, Arc<dyn Log>)> {
        self.logs
            .iter()
            .filter(|entry| entry.value().log_dir() == dir)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn future_logs_in_dir(&self, dir: &str) -> Vec<(TopicPartition, Arc<dyn Log>)> {
        self.future_logs
            .iter()
            .filter(|entry| entry.value().log_dir() == dir)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Marks a directory offline and detaches every log rooted in it.
    /// Returns the affected partitions.
    pub fn mark_dir_offline(&self, dir: &str) -> Vec<TopicPartition> {
        self.offline_dirs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(dir.to_string());

        let affected: Vec<TopicPartition> = self
            .logs
            .iter()
            .filter(|entry| entry.value().log_dir() == dir)
            .map(|entry| entry.key().clone())
            .collect();
        for tp in &affected {
            self.logs.remove(tp);
            self.future_logs.remove(tp);
        }
        error!(
            "log dir {} marked offline, {} partitions detached",
            dir,
            affected.len()
        );
        affected
    }

    pub fn recovered_high_watermark(&self, topic_partition: &TopicPartition) -> Option<i64> {
        self.recovered_hws
            .get(topic_partition)
            .map(|hw| *hw.value())
    }

    pub async fn drop_checkpoint_for_dir(&self, dir: &str) -> AppResult<()> {
        let path = Path::new(dir).join(HIGH_WATERMARK_CHECKPOINT_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_manager(dirs: Vec<String>) -> LogManager {
        LogManager::new(dirs, Arc::new(MemoryLogFactory))
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let manager = new_manager(vec![dir.path().to_str().unwrap().to_string()]);
        manager.startup().await.unwrap();

        let tp = TopicPartition::new("t", 0);
        let log1 = manager.get_or_create_log(&tp).await.unwrap();
        let log2 = manager.get_or_create_log(&tp).await.unwrap();
        assert!(Arc::ptr_eq(&log1, &log2));
    }

    #[tokio::test]
    async fn test_placement_skips_offline_dirs() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        let d1 = dir1.path().to_str().unwrap().to_string();
        let d2 = dir2.path().to_str().unwrap().to_string();
        let manager = new_manager(vec![d1.clone(), d2.clone()]);
        manager.startup().await.unwrap();

        manager.mark_dir_offline(&d1);
        for i in 0..8 {
            let log = manager
                .get_or_create_log(&TopicPartition::new("t", i))
                .await
                .unwrap();
            assert_eq!(log.log_dir(), d2);
        }
    }

    #[tokio::test]
    async fn test_all_dirs_offline_errors() {
        let dir = tempdir().unwrap();
        let d = dir.path().to_str().unwrap().to_string();
        let manager = new_manager(vec![d.clone()]);
        manager.startup().await.unwrap();
        manager.mark_dir_offline(&d);
        assert!(manager
            .get_or_create_log(&TopicPartition::new("t", 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mark_dir_offline_detaches_logs() {
        let dir = tempdir().unwrap();
        let d = dir.path().to_str().unwrap().to_string();
        let manager = new_manager(vec![d.clone()]);
        manager.startup().await.unwrap();

        let tp = TopicPartition::new("t", 0);
        manager.get_or_create_log(&tp).await.unwrap();
        let affected = manager.mark_dir_offline(&d);
        assert_eq!(affected, vec![tp.clone()]);
        assert!(manager.get_log(&tp).is_none());
    }

    #[tokio::test]
    async fn test_recovered_high_watermarks() {
        let dir = tempdir().unwrap();
        let d = dir.path().to_str().unwrap().to_string();
        let tp = TopicPartition::new("t", 0);

        let checkpoint =
            CheckpointFile::new(Path::new(&d).join(HIGH_WATERMARK_CHECKPOINT_FILE));
        let mut points = std::collections::HashMap::new();
        points.insert(tp.clone(), 42);
        checkpoint.write_checkpoints(&points).await.unwrap();

        let manager = new_manager(vec![d]);
        manager.startup().await.unwrap();
        assert_eq!(manager.recovered_high_watermark(&tp), Some(42));
    }

    #[tokio::test]
    async fn test_future_log_swap() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        let d1 = dir1.path().to_str().unwrap().to_string();
        let d2 = dir2.path().to_str().unwrap().to_string();
        let manager = new_manager(vec![d1.clone(), d2.clone()]);
        manager.startup().await.unwrap();

        let tp = TopicPartition::new("t", 0);
        let current = manager.get_or_create_log(&tp).await.unwrap();
        let target = if current.log_dir() == d1 { &d2 } else { &d1 };
        let future = manager
            .get_or_create_future_log(&tp, target)
            .await
            .unwrap();

        manager.replace_current_with_future(&tp);
        let now_current = manager.get_log(&tp).unwrap();
        assert!(Arc::ptr_eq(&now_current, &future));
        assert!(manager.future_log(&tp).is_none());
    }
}
