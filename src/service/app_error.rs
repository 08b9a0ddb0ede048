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

use crate::request::KafkaError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// storage layer errors
    #[error("log dir offline: {0}")]
    LogDirOffline(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("record too large: {0}")]
    RecordTooLarge(String),

    #[error("offset out of range: {0}")]
    OffsetOutOfRange(String),
}

impl From<AppError> for KafkaError {
    fn from(value: AppError) -> Self {
        match value {
            AppError::LogDirOffline(s) => KafkaError::KafkaStorageError(s),
            AppError::CorruptRecord(s) => KafkaError::CorruptRecord(s),
            AppError::RecordTooLarge(s) => KafkaError::RecordTooLarge(s),
            AppError::OffsetOutOfRange(s) => KafkaError::OffsetOutOfRange(s),
            AppError::DetailedIoError(s) => KafkaError::KafkaStorageError(s),
            AppError::IoError(e) => KafkaError::KafkaStorageError(e.to_string()),
            _ => KafkaError::Unknown(value.to_string()),
        }
    }
}
