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

use thiserror::Error;

/// Protocol-level errors carried per partition in responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KafkaError {
    #[error("The server experienced an unexpected error: {0}")]
    Unknown(String),

    #[error("The requested offset is not within range: {0}")]
    OffsetOutOfRange(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),

    #[error("Not leader for partition: {0}")]
    NotLeaderForPartition(String),

    #[error("Request timed out: {0}")]
    RequestTimedOut(String),

    #[error("Replica not available: {0}")]
    ReplicaNotAvailable(String),

    #[error("Record too large: {0}")]
    RecordTooLarge(String),

    #[error("Stale controller epoch: {0}")]
    StaleControllerEpoch(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Record batch too large: {0}")]
    RecordBatchTooLarge(String),

    #[error("Not enough replicas: {0}")]
    NotEnoughReplicas(String),

    #[error("Not enough replicas after append: {0}")]
    NotEnoughReplicasAfterAppend(String),

    #[error("Invalid required acks: {0}")]
    InvalidRequiredAcks(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Controller moved: {0}")]
    ControllerMoved(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Disk error when trying to access log: {0}")]
    KafkaStorageError(String),

    #[error("Log dir not found: {0}")]
    LogDirNotFound(String),

    #[error("Fenced leader epoch: {0}")]
    FencedLeaderEpoch(String),

    #[error("Unknown leader epoch: {0}")]
    UnknownLeaderEpoch(String),

    #[error("Preferred leader was not available: {0}")]
    PreferredLeaderNotAvailable(String),
}

/// Numeric wire codes matching the Kafka protocol assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ErrorCode {
    Unknown = -1,
    None = 0,
    OffsetOutOfRange = 1,
    CorruptRecord = 2,
    UnknownTopicOrPartition = 3,
    NotLeaderForPartition = 6,
    RequestTimedOut = 7,
    ReplicaNotAvailable = 9,
    RecordTooLarge = 10,
    StaleControllerEpoch = 11,
    InvalidTopic = 17,
    RecordBatchTooLarge = 18,
    NotEnoughReplicas = 19,
    NotEnoughReplicasAfterAppend = 20,
    InvalidRequiredAcks = 21,
    InvalidTimestamp = 32,
    UnsupportedVersion = 35,
    ControllerMoved = 41,
    PolicyViolation = 44,
    KafkaStorageError = 56,
    LogDirNotFound = 57,
    FencedLeaderEpoch = 74,
    UnknownLeaderEpoch = 75,
    PreferredLeaderNotAvailable = 80,
}

impl ErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Unknown => "The server experienced an unexpected error when processing the request",
            ErrorCode::None => "",
            ErrorCode::OffsetOutOfRange => "The requested offset is not within the range of offsets maintained by the server",
            ErrorCode::CorruptRecord => "This record has failed its CRC checksum, exceeds the valid size, or is otherwise corrupt",
            ErrorCode::UnknownTopicOrPartition => "This server does not host this topic-partition",
            ErrorCode::NotLeaderForPartition => "This server is not the leader for that topic-partition",
            ErrorCode::RequestTimedOut => "The request timed out",
            ErrorCode::ReplicaNotAvailable => "The replica is not available for the requested topic-partition",
            ErrorCode::RecordTooLarge => "The request included a record larger than the max record size the server will accept",
            ErrorCode::StaleControllerEpoch => "The controller moved to another broker",
            ErrorCode::InvalidTopic => "The request attempted to perform an operation on an invalid topic",
            ErrorCode::RecordBatchTooLarge => "The request included a batch larger than the configured segment size on the server",
            ErrorCode::NotEnoughReplicas => "Records are rejected since there are fewer in-sync replicas than required",
            ErrorCode::NotEnoughReplicasAfterAppend => "Records are written to the log, but to fewer in-sync replicas than required",
            ErrorCode::InvalidRequiredAcks => "Produce request specified an invalid value for required acks",
            ErrorCode::InvalidTimestamp => "The timestamp of the record is out of acceptable range",
            ErrorCode::UnsupportedVersion => "The version of API is not supported",
            ErrorCode::ControllerMoved => "This is not the correct controller for this cluster",
            ErrorCode::PolicyViolation => "Request parameters do not satisfy the configured policy",
            ErrorCode::KafkaStorageError => "Disk error when trying to access log file on the disk",
            ErrorCode::LogDirNotFound => "The user-specified log directory is not found in the broker config",
            ErrorCode::FencedLeaderEpoch => "The leader epoch in the request is older than the epoch on the broker",
            ErrorCode::UnknownLeaderEpoch => "The leader epoch in the request is newer than the epoch on the broker",
            ErrorCode::PreferredLeaderNotAvailable => "The preferred leader was not available",
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::OffsetOutOfRange,
            2 => ErrorCode::CorruptRecord,
            3 => ErrorCode::UnknownTopicOrPartition,
            6 => ErrorCode::NotLeaderForPartition,
            7 => ErrorCode::RequestTimedOut,
            9 => ErrorCode::ReplicaNotAvailable,
            10 => ErrorCode::RecordTooLarge,
            11 => ErrorCode::StaleControllerEpoch,
            17 => ErrorCode::InvalidTopic,
            18 => ErrorCode::RecordBatchTooLarge,
            19 => ErrorCode::NotEnoughReplicas,
            20 => ErrorCode::NotEnoughReplicasAfterAppend,
            21 => ErrorCode::InvalidRequiredAcks,
            32 => ErrorCode::InvalidTimestamp,
            35 => ErrorCode::UnsupportedVersion,
            41 => ErrorCode::ControllerMoved,
            44 => ErrorCode::PolicyViolation,
            56 => ErrorCode::KafkaStorageError,
            57 => ErrorCode::LogDirNotFound,
            74 => ErrorCode::FencedLeaderEpoch,
            75 => ErrorCode::UnknownLeaderEpoch,
            80 => ErrorCode::PreferredLeaderNotAvailable,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn into_error(self) -> Option<KafkaError> {
        let message = self.message().to_string();
        match self {
            ErrorCode::None => None,
            ErrorCode::Unknown => Some(KafkaError::Unknown(message)),
            ErrorCode::OffsetOutOfRange => Some(KafkaError::OffsetOutOfRange(message)),
            ErrorCode::CorruptRecord => Some(KafkaError::CorruptRecord(message)),
            ErrorCode::UnknownTopicOrPartition => {
                Some(KafkaError::UnknownTopicOrPartition(message))
            }
            ErrorCode::NotLeaderForPartition => Some(KafkaError::NotLeaderForPartition(message)),
            ErrorCode::RequestTimedOut => Some(KafkaError::RequestTimedOut(message)),
            ErrorCode::ReplicaNotAvailable => Some(KafkaError::ReplicaNotAvailable(message)),
            ErrorCode::RecordTooLarge => Some(KafkaError::RecordTooLarge(message)),
            ErrorCode::StaleControllerEpoch => Some(KafkaError::StaleControllerEpoch(message)),
            ErrorCode::InvalidTopic => Some(KafkaError::InvalidTopic(message)),
            ErrorCode::RecordBatchTooLarge => Some(KafkaError::RecordBatchTooLarge(message)),
            ErrorCode::NotEnoughReplicas => Some(KafkaError::NotEnoughReplicas(message)),
            ErrorCode::NotEnoughReplicasAfterAppend => {
                Some(KafkaError::NotEnoughReplicasAfterAppend(message))
            }
            ErrorCode::InvalidRequiredAcks => Some(KafkaError::InvalidRequiredAcks(message)),
            ErrorCode::InvalidTimestamp => Some(KafkaError::InvalidTimestamp(message)),
            ErrorCode::UnsupportedVersion => Some(KafkaError::UnsupportedVersion(message)),
            ErrorCode::ControllerMoved => Some(KafkaError::ControllerMoved(message)),
            ErrorCode::PolicyViolation => Some(KafkaError::PolicyViolation(message)),
            ErrorCode::KafkaStorageError => Some(KafkaError::KafkaStorageError(message)),
            ErrorCode::LogDirNotFound => Some(KafkaError::LogDirNotFound(message)),
            ErrorCode::FencedLeaderEpoch => Some(KafkaError::FencedLeaderEpoch(message)),
            ErrorCode::UnknownLeaderEpoch => Some(KafkaError::UnknownLeaderEpoch(message)),
            ErrorCode::PreferredLeaderNotAvailable => {
                Some(KafkaError::PreferredLeaderNotAvailable(message))
            }
        }
    }
}

impl From<&KafkaError> for ErrorCode {
    fn from(error: &KafkaError) -> Self {
        match error {
            KafkaError::Unknown(_) => ErrorCode::Unknown,
            KafkaError::OffsetOutOfRange(_) => ErrorCode::OffsetOutOfRange,
            KafkaError::CorruptRecord(_) => ErrorCode::CorruptRecord,
            KafkaError::UnknownTopicOrPartition(_) => ErrorCode::UnknownTopicOrPartition,
            KafkaError::NotLeaderForPartition(_) => ErrorCode::NotLeaderForPartition,
            KafkaError::RequestTimedOut(_) => ErrorCode::RequestTimedOut,
            KafkaError::ReplicaNotAvailable(_) => ErrorCode::ReplicaNotAvailable,
            KafkaError::RecordTooLarge(_) => ErrorCode::RecordTooLarge,
            KafkaError::StaleControllerEpoch(_) => ErrorCode::StaleControllerEpoch,
            KafkaError::InvalidTopic(_) => ErrorCode::InvalidTopic,
            KafkaError::RecordBatchTooLarge(_) => ErrorCode::RecordBatchTooLarge,
            KafkaError::NotEnoughReplicas(_) => ErrorCode::NotEnoughReplicas,
            KafkaError::NotEnoughReplicasAfterAppend(_) => {
                ErrorCode::NotEnoughReplicasAfterAppend
            }
            KafkaError::InvalidRequiredAcks(_) => ErrorCode::InvalidRequiredAcks,
            KafkaError::InvalidTimestamp(_) => ErrorCode::InvalidTimestamp,
            KafkaError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            KafkaError::ControllerMoved(_) => ErrorCode::ControllerMoved,
            KafkaError::PolicyViolation(_) => ErrorCode::PolicyViolation,
            KafkaError::KafkaStorageError(_) => ErrorCode::KafkaStorageError,
            KafkaError::LogDirNotFound(_) => ErrorCode::LogDirNotFound,
            KafkaError::FencedLeaderEpoch(_) => ErrorCode::FencedLeaderEpoch,
            KafkaError::UnknownLeaderEpoch(_) => ErrorCode::UnknownLeaderEpoch,
            KafkaError::PreferredLeaderNotAvailable(_) => ErrorCode::PreferredLeaderNotAvailable,
        }
    }
}

pub type KafkaResult<T> = Result<T, KafkaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        let code = ErrorCode::FencedLeaderEpoch;
        let error = code.into_error().unwrap();
        assert_eq!(ErrorCode::from(&error), code);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(ErrorCode::from_code(56), ErrorCode::KafkaStorageError);
        assert_eq!(ErrorCode::from_code(0), ErrorCode::None);
        assert_eq!(ErrorCode::from_code(999), ErrorCode::Unknown);
    }

    #[test]
    fn test_none_has_no_error() {
        assert!(ErrorCode::None.into_error().is_none());
    }
}
