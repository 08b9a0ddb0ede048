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

use bytes::BytesMut;

/// An opaque, contiguous batch of records held in memory.
///
/// The replica manager never interprets record contents; it only needs the
/// byte size (for fetch limits) and the record count (for offset assignment).
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryRecords {
    buffer: Option<BytesMut>,
    record_count: u32,
}

impl std::fmt::Debug for MemoryRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecords")
            .field("size", &self.size())
            .field("record_count", &self.record_count)
            .finish()
    }
}

impl MemoryRecords {
    pub fn new(buffer: BytesMut, record_count: u32) -> Self {
        Self {
            buffer: Some(buffer),
            record_count,
        }
    }

    pub fn empty() -> Self {
        Self {
            buffer: Some(BytesMut::with_capacity(0)),
            record_count: 0,
        }
    }

    /// Builds a batch of `record_count` records each carrying `payload`.
    /// The replica layer treats the bytes as opaque, so a repeated payload is
    /// enough for every test and tooling use.
    pub fn of_payload(record_count: u32, payload: &[u8]) -> Self {
        let mut buffer = BytesMut::with_capacity(payload.len() * record_count as usize);
        for _ in 0..record_count {
            buffer.extend_from_slice(payload);
        }
        Self::new(buffer, record_count)
    }

    pub fn size(&self) -> usize {
        self.buffer.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn buffer(&self) -> Option<&BytesMut> {
        self.buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_records() {
        let records = MemoryRecords::empty();
        assert_eq!(records.size(), 0);
        assert_eq!(records.record_count(), 0);
        assert!(records.is_empty());
    }

    #[test]
    fn test_of_payload() {
        let records = MemoryRecords::of_payload(3, b"abcd");
        assert_eq!(records.record_count(), 3);
        assert_eq!(records.size(), 12);
        assert!(!records.is_empty());
    }
}
