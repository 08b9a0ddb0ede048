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

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::trace;

use crate::log::{
    EpochEndOffset, Log, LogAppendInfo, LogReadInfo, TimestampAndOffset, NO_TIMESTAMP,
};
use crate::message::{MemoryRecords, TopicPartition};
use crate::{AppError, AppResult};

#[derive(Debug)]
struct StoredBatch {
    base_offset: i64,
    last_offset: i64,
    leader_epoch: i32,
    timestamp: i64,
    records: MemoryRecords,
}

#[derive(Debug)]
struct LogInner {
    batches: VecDeque<StoredBatch>,
    /// (epoch, first offset of that epoch), ascending
    epoch_starts: Vec<(i32, i64)>,
    log_start_offset: i64,
    log_end_offset: i64,
    high_watermark: i64,
}

/// Heap-backed [`Log`]: batches live in a deque, offsets are assigned on
/// append. This is the reference store the replica layer is exercised
/// against; a segment-file store plugs in through the same trait.
///
/// There is no transaction support, so the last stable offset always equals
/// the high watermark.
#[derive(Debug)]
pub struct MemoryLog {
    topic_partition: TopicPartition,
    log_dir: String,
    inner: Mutex<LogInner>,
}

impl MemoryLog {
    pub fn new(topic_partition: TopicPartition, log_dir: impl Into<String>) -> Self {
        Self {
            topic_partition,
            log_dir: log_dir.into(),
            inner: Mutex::new(LogInner {
                batches: VecDeque::new(),
                epoch_starts: Vec::new(),
                log_start_offset: 0,
                log_end_offset: 0,
                high_watermark: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        // the lock is only held for in-memory bookkeeping, never across await
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Log for MemoryLog {
    fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    fn log_dir(&self) -> &str {
        &self.log_dir
    }

    async fn append(
        &self,
        records: MemoryRecords,
        leader_epoch: i32,
        log_append_time: i64,
    ) -> AppResult<LogAppendInfo> {
        if records.is_empty() {
            return Err(AppError::InvalidValue(format!(
                "empty record batch appended to {}",
                self.topic_partition
            )));
        }
        let mut inner = self.lock();
        let first_offset = inner.log_end_offset;
        let last_offset = first_offset + records.record_count() as i64 - 1;
        let records_count = records.record_count();

        let new_epoch = inner
            .epoch_starts
            .last()
            .map_or(true, |(epoch, _)| *epoch < leader_epoch);
        if new_epoch {
            inner.epoch_starts.push((leader_epoch, first_offset));
        }

        inner.batches.push_back(StoredBatch {
            base_offset: first_offset,
            last_offset,
            leader_epoch,
            timestamp: log_append_time,
            records,
        });
        inner.log_end_offset = last_offset + 1;

        trace!(
            "{} appended [{}, {}] epoch {}",
            self.topic_partition,
            first_offset,
            last_offset,
            leader_epoch
        );
        Ok(LogAppendInfo {
            first_offset,
            last_offset,
            max_timestamp: log_append_time,
            records_count,
            log_append_time,
        })
    }

    async fn read(
        &self,
        fetch_offset: i64,
        max_bytes: i32,
        max_offset: i64,
        min_one_message: bool,
    ) -> AppResult<LogReadInfo> {
        let inner = self.lock();
        if fetch_offset < inner.log_start_offset || fetch_offset > inner.log_end_offset {
            return Err(AppError::OffsetOutOfRange(format!(
                "offset {} out of range [{}, {}] for {}",
                fetch_offset, inner.log_start_offset, inner.log_end_offset, self.topic_partition
            )));
        }

        let upper_bound = max_offset.min(inner.log_end_offset);
        let mut buffer = BytesMut::new();
        let mut record_count = 0u32;
        let mut bytes_read = 0usize;
        let mut first_entry_incomplete = false;

        for batch in &inner.batches {
            if batch.last_offset < fetch_offset {
                continue;
            }
            // only whole batches at or below the isolation bound are visible
            if batch.last_offset >= upper_bound {
                break;
            }
            let batch_size = batch.records.size();
            if bytes_read + batch_size > max_bytes.max(0) as usize {
                if bytes_read == 0 {
                    if min_one_message {
                        if let Some(bytes) = batch.records.buffer() {
                            buffer.extend_from_slice(bytes);
                        }
                        record_count += batch.records.record_count();
                        bytes_read += batch_size;
                    } else {
                        first_entry_incomplete = true;
                    }
                }
                break;
            }
            if let Some(bytes) = batch.records.buffer() {
                buffer.extend_from_slice(bytes);
            }
            record_count += batch.records.record_count();
            bytes_read += batch_size;
        }

        Ok(LogReadInfo {
            records: MemoryRecords::new(buffer, record_count),
            fetch_offset,
            log_start_offset: inner.log_start_offset,
            log_end_offset: inner.log_end_offset,
            high_watermark: inner.high_watermark,
            last_stable_offset: inner.high_watermark,
            first_entry_incomplete,
            aborted_transactions: None,
        })
    }

    fn log_start_offset(&self) -> i64 {
        self.lock().log_start_offset
    }

    fn log_end_offset(&self) -> i64 {
        self.lock().log_end_offset
    }

    fn high_watermark(&self) -> i64 {
        self.lock().high_watermark
    }

    fn update_high_watermark(&self, high_watermark: i64) -> i64 {
        let mut inner = self.lock();
        let clamped = high_watermark
            .max(inner.log_start_offset)
            .min(inner.log_end_offset);
        inner.high_watermark = clamped;
        clamped
    }

    fn last_stable_offset(&self) -> i64 {
        self.lock().high_watermark
    }

    async fn truncate_to(&self, offset: i64) -> AppResult<()> {
        if offset < 0 {
            return Err(AppError::InvalidValue(format!(
                "cannot truncate {} to negative offset {}",
                self.topic_partition, offset
            )));
        }
        let mut inner = self.lock();
        if offset >= inner.log_end_offset {
            return Ok(());
        }
        // a batch straddling the target offset is dropped whole
        inner.batches.retain(|batch| batch.last_offset < offset);
        let new_end = inner
            .batches
            .back()
            .map(|batch| batch.last_offset + 1)
            .unwrap_or(inner.log_start_offset);
        inner.log_end_offset = new_end;
        inner.epoch_starts.retain(|(_, start)| *start < new_end);
        inner.high_watermark = inner.high_watermark.min(new_end);
        trace!("{} truncated to {}", self.topic_partition, new_end);
        Ok(())
    }

    async fn delete_records_before(&self, offset: i64) -> AppResult<i64> {
        let mut inner = self.lock();
        let new_start = offset
            .min(inner.log_end_offset)
            .max(inner.log_start_offset);
        inner.log_start_offset = new_start;
        while inner
            .batches
            .front()
            .map_or(false, |batch| batch.last_offset < new_start)
        {
            inner.batches.pop_front();
        }
        inner.high_watermark = inner.high_watermark.max(new_start);
        Ok(new_start)
    }

    fn end_offset_for_epoch(&self, leader_epoch: i32) -> Option<EpochEndOffset> {
        let inner = self.lock();
        let mut result = None;
        for (index, (epoch, _)) in inner.epoch_starts.iter().enumerate() {
            if *epoch > leader_epoch {
                break;
            }
            let end_offset = inner
                .epoch_starts
                .get(index + 1)
                .map(|(_, next_start)| *next_start)
                .unwrap_or(inner.log_end_offset);
            result = Some(EpochEndOffset {
                leader_epoch: *epoch,
                end_offset,
            });
        }
        result
    }

    fn latest_epoch(&self) -> Option<i32> {
        self.lock().epoch_starts.last().map(|(epoch, _)| *epoch)
    }

    fn fetch_offset_by_timestamp(&self, timestamp: i64) -> Option<TimestampAndOffset> {
        let inner = self.lock();
        for batch in &inner.batches {
            if batch.last_offset < inner.log_start_offset {
                continue;
            }
            if batch.timestamp != NO_TIMESTAMP && batch.timestamp >= timestamp {
                return Some(TimestampAndOffset {
                    timestamp: batch.timestamp,
                    offset: batch.base_offset.max(inner.log_start_offset),
                });
            }
        }
        None
    }

    fn size_in_bytes(&self) -> i64 {
        self.lock()
            .batches
            .iter()
            .map(|batch| batch.records.size() as i64)
            .sum()
    }

    async fn flush(&self) -> AppResult<()> {
        Ok(())
    }

    async fn close(&self) {
        trace!("{} log closed", self.topic_partition);
    }
}
