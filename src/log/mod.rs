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

//! Storage boundary of the replica manager.
//!
//! The physical log (segments, indexes, recovery) lives behind the [`Log`]
//! trait; this crate ships an in-memory implementation and the multi-dir
//! [`LogManager`] registry on top of it.

mod checkpoint;
mod log_manager;
mod memory;

pub use checkpoint::CheckpointFile;
pub use log_manager::{LogFactory, LogManager, MemoryLogFactory};
pub use memory::MemoryLog;

use async_trait::async_trait;

use crate::message::{MemoryRecords, TopicPartition};
use crate::AppResult;

/// Default timestamp for log append operations
pub const NO_TIMESTAMP: i64 = -1;
/// Offset placeholder before any fetch has been observed
pub const UNKNOWN_OFFSET: i64 = -1;
/// File name of the per-dir high-watermark checkpoint
pub const HIGH_WATERMARK_CHECKPOINT_FILE: &str = "replication-offset-checkpoint";

/// Upper bound applied to a read, decided by who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchIsolation {
    /// follower / future replica: read to the log end
    LogEnd,
    /// consumer, read-uncommitted: read to the high watermark
    HighWatermark,
    /// consumer, read-committed: read to the last stable offset
    TxnCommitted,
}

/// Information about a log append operation
#[derive(Debug, Clone)]
pub struct LogAppendInfo {
    pub first_offset: i64,
    pub last_offset: i64,
    pub max_timestamp: i64,
    pub records_count: u32,
    pub log_append_time: i64,
}

/// An open transaction overlapping a read, reported to read-committed
/// consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedTransaction {
    pub producer_id: i64,
    pub first_offset: i64,
}

/// Result of reading a slice of the log.
#[derive(Debug)]
pub struct LogReadInfo {
    pub records: MemoryRecords,
    pub fetch_offset: i64,
    pub log_start_offset: i64,
    pub log_end_offset: i64,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    /// true when the first batch past `fetch_offset` was larger than the
    /// byte limit and was skipped rather than returned
    pub first_entry_incomplete: bool,
    pub aborted_transactions: Option<Vec<AbortedTransaction>>,
}

impl LogReadInfo {
    pub fn empty(fetch_offset: i64) -> Self {
        Self {
            records: MemoryRecords::empty(),
            fetch_offset,
            log_start_offset: 0,
            log_end_offset: 0,
            high_watermark: 0,
            last_stable_offset: 0,
            first_entry_incomplete: false,
            aborted_transactions: None,
        }
    }
}

/// End offset of a leader epoch, for follower truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochEndOffset {
    pub leader_epoch: i32,
    pub end_offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampAndOffset {
    pub timestamp: i64,
    pub offset: i64,
}

/// Per-partition append-only log, as consumed by the replica layer.
///
/// The replica manager drives the high watermark; the log only stores it so
/// reads can apply isolation bounds without reaching back up.
#[async_trait]
pub trait Log: Send + Sync + std::fmt::Debug {
    fn topic_partition(&self) -> &TopicPartition;

    /// Root log directory this log lives in.
    fn log_dir(&self) -> &str;

    async fn append(
        &self,
        records: MemoryRecords,
        leader_epoch: i32,
        log_append_time: i64,
    ) -> AppResult<LogAppendInfo>;

    /// Reads `[fetch_offset, max_offset)` up to `max_bytes`. When
    /// `min_one_message` is set the first batch is returned even if it alone
    /// exceeds the byte limit.
    async fn read(
        &self,
        fetch_offset: i64,
        max_bytes: i32,
        max_offset: i64,
        min_one_message: bool,
    ) -> AppResult<LogReadInfo>;

    fn log_start_offset(&self) -> i64;

    fn log_end_offset(&self) -> i64;

    fn high_watermark(&self) -> i64;

    /// Stores a new high watermark, clamped to `[log_start, log_end]`.
    /// Returns the value actually stored.
    fn update_high_watermark(&self, high_watermark: i64) -> i64;

    fn last_stable_offset(&self) -> i64;

    async fn truncate_to(&self, offset: i64) -> AppResult<()>;

    /// Advances the log start offset; data below it becomes unreadable.
    /// Returns the new log start offset.
    async fn delete_records_before(&self, offset: i64) -> AppResult<i64>;

    /// Largest epoch ≤ the requested one together with its end offset.
    fn end_offset_for_epoch(&self, leader_epoch: i32) -> Option<EpochEndOffset>;

    fn latest_epoch(&self) -> Option<i32>;

    fn fetch_offset_by_timestamp(&self, timestamp: i64) -> Option<TimestampAndOffset>;

    fn size_in_bytes(&self) -> i64;

    async fn flush(&self) -> AppResult<()>;

    async fn close(&self);
}
