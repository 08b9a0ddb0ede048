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
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::error;

use crate::log::{CheckpointFile, LogManager, HIGH_WATERMARK_CHECKPOINT_FILE};
use crate::replica::HostedPartitions;
use crate::Shutdown;

/// Periodically persists the high watermark of every online partition,
/// one checkpoint file per live log directory. A failed directory write is
/// logged and does not block the other directories.
#[derive(Debug)]
pub struct HighWatermarkCheckpointer {
    hosted: Arc<HostedPartitions>,
    log_manager: Arc<LogManager>,
}

impl HighWatermarkCheckpointer {
    pub fn new(hosted: Arc<HostedPartitions>, log_manager: Arc<LogManager>) -> Arc<Self> {
        Arc::new(Self {
            hosted,
            log_manager,
        })
    }

    pub async fn checkpoint_all(&self) {
        let online = self.hosted.all_online();
        for dir in self.log_manager.live_log_dirs() {
            let mut points: HashMap<_, i64> = HashMap::new();
            for (tp, partition) in &online {
                if let Some(log) = partition.log().await {
                    if log.log_dir() == dir {
                        points.insert(tp.clone(), log.high_watermark());
                    }
                }
            }
            let checkpoint =
                CheckpointFile::new(Path::new(&dir).join(HIGH_WATERMARK_CHECKPOINT_FILE));
            if let Err(e) = checkpoint.write_checkpoints(&points).await {
                error!("high watermark checkpoint for {} failed: {}", dir, e);
            }
        }
    }

    pub fn start(self: Arc<Self>, interval_ms: u64, mut shutdown: Shutdown) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_millis(interval_ms)) => {
                        self.checkpoint_all().await;
                    }
                    _ = shutdown.recv() => {
                        // one final pass so a clean shutdown loses nothing
                        self.checkpoint_all().await;
                        break;
                    }
                }
            }
        });
    }
}
