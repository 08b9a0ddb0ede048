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

extern crate config as rs_config;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::AppError::InvalidValue;
use crate::AppResult;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    /// broker id of the local node
    pub id: i32,
    pub max_msg_size: i32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            id: 0,
            max_msg_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplicationConfig {
    /// followers silent longer than this are dropped from the ISR
    pub replica_lag_time_max_ms: i64,
    /// interval of the periodic ISR shrink check
    pub isr_shrink_interval_ms: u64,
    /// minimum ISR size required for acks=-1 produces
    pub min_insync_replicas: usize,
    /// interval of the high-watermark checkpoint task
    pub high_watermark_checkpoint_interval_ms: u64,
    /// ISR change propagation tick
    pub isr_change_propagation_interval_ms: u64,
    /// quiet period before buffered ISR changes are propagated
    pub isr_change_quiet_period_ms: i64,
    /// upper bound between two ISR change propagations
    pub isr_change_max_delay_ms: i64,
    /// fetch wait/size defaults used by follower fetchers
    pub fetch_max_wait_ms: i64,
    pub fetch_min_bytes: i32,
    pub fetch_max_bytes: i32,
    /// idle fetcher workers are reaped at this interval
    pub fetcher_idle_sweep_interval_ms: u64,
    /// completed/expired purgatory entries are purged at this interval
    pub purgatory_purge_interval_ms: u64,
    /// terminate the process when a log dir goes offline
    pub halt_on_dir_failure: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replica_lag_time_max_ms: 30_000,
            isr_shrink_interval_ms: 10_000,
            min_insync_replicas: 1,
            high_watermark_checkpoint_interval_ms: 5_000,
            isr_change_propagation_interval_ms: 2_500,
            isr_change_quiet_period_ms: 5_000,
            isr_change_max_delay_ms: 60_000,
            fetch_max_wait_ms: 500,
            fetch_min_bytes: 1,
            fetch_max_bytes: 10 * 1024 * 1024,
            fetcher_idle_sweep_interval_ms: 30_000,
            purgatory_purge_interval_ms: 60_000,
            halt_on_dir_failure: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// root directories holding partition logs, one entry per disk
    pub log_dirs: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dirs: vec!["./data".to_string()],
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub general: GeneralConfig,
    pub replication: ReplicationConfig,
    pub log: LogConfig,
}

impl BrokerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<BrokerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| InvalidValue("config file path".to_string()))?;
        let config = rs_config::Config::builder()
            .add_source(rs_config::File::with_name(path_str))
            .build()?;

        let broker_config: BrokerConfig = config.try_deserialize()?;
        broker_config.validate()?;
        Ok(broker_config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.log.log_dirs.is_empty() {
            return Err(InvalidValue("log.log_dirs must not be empty".to_string()));
        }
        if self.replication.min_insync_replicas == 0 {
            return Err(InvalidValue(
                "replication.min_insync_replicas must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        BrokerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[general]
id = 7
max_msg_size = 1048576

[replication]
replica_lag_time_max_ms = 10000
isr_shrink_interval_ms = 5000
min_insync_replicas = 2
high_watermark_checkpoint_interval_ms = 5000
isr_change_propagation_interval_ms = 2500
isr_change_quiet_period_ms = 5000
isr_change_max_delay_ms = 60000
fetch_max_wait_ms = 500
fetch_min_bytes = 1
fetch_max_bytes = 1048576
fetcher_idle_sweep_interval_ms = 30000
purgatory_purge_interval_ms = 60000
halt_on_dir_failure = false

[log]
log_dirs = ["/tmp/d1", "/tmp/d2"]
"#
        )
        .unwrap();
        let config = BrokerConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.general.id, 7);
        assert_eq!(config.replication.min_insync_replicas, 2);
        assert_eq!(config.log.log_dirs.len(), 2);
    }

    #[test]
    fn test_rejects_empty_log_dirs() {
        let mut config = BrokerConfig::default();
        config.log.log_dirs.clear();
        assert!(config.validate().is_err());
    }
}
