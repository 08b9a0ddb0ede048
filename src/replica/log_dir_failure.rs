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

use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tracing::error;

use crate::replica::ReplicaManager;
use crate::Shutdown;

/// Drains the offline-log-dir channel published by the storage layer and
/// turns each event into an offline transition for the affected partitions.
#[derive(Debug)]
pub struct LogDirFailureHandler;

impl LogDirFailureHandler {
    pub fn start(
        replica_manager: Arc<ReplicaManager>,
        mut offline_dirs: Receiver<String>,
        halt_on_failure: bool,
        mut shutdown: Shutdown,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_dir = offline_dirs.recv() => {
                        match maybe_dir {
                            Some(dir) => {
                                error!("log dir {} reported offline", dir);
                                if halt_on_failure {
                                    error!("halting broker on log dir failure");
                                    std::process::exit(1);
                                }
                                replica_manager.handle_log_dir_failure(&dir).await;
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}
