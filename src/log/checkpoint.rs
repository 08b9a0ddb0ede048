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
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::warn;

use crate::message::TopicPartition;
use crate::AppError::InvalidValue;
use crate::AppResult;

/// Line-oriented offset checkpoint file:
///
/// ```text
/// <version>
/// <entry count>
/// <topic> <partition> <offset>
/// ...
/// ```
///
/// Writes go through a temp file followed by a rename so readers never
/// observe a torn checkpoint.
#[derive(Debug)]
pub struct CheckpointFile {
    path: PathBuf,
    version: i32,
}

impl CheckpointFile {
    pub const CURRENT_VERSION: i32 = 0;

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            version: Self::CURRENT_VERSION,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_checkpoints(
        &self,
        points: &HashMap<TopicPartition, i64>,
    ) -> AppResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let write_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)
            .await?;
        let mut buf_writer = BufWriter::new(write_file);
        buf_writer
            .write_all(format!("{}\n", self.version).as_bytes())
            .await?;
        buf_writer
            .write_all(format!("{}\n", points.len()).as_bytes())
            .await?;
        for (topic_partition, offset) in points {
            buf_writer
                .write_all(
                    format!(
                        "{} {} {}\n",
                        topic_partition.topic(),
                        topic_partition.partition(),
                        offset
                    )
                    .as_bytes(),
                )
                .await?;
        }
        buf_writer.flush().await?;
        buf_writer.get_ref().sync_all().await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn read_checkpoints(&self) -> AppResult<HashMap<TopicPartition, i64>> {
        let error = |line: &str| InvalidValue(format!("checkpoint line: {}", line));
        let open_file = OpenOptions::new().read(true).open(&self.path).await;
        if open_file.is_err() {
            warn!(
                "checkpoint file {} not found, assuming empty",
                self.path.display()
            );
            return Ok(HashMap::new());
        }

        let mut reader = BufReader::new(open_file?);
        let mut line_buffer = String::new();
        reader.read_line(&mut line_buffer).await?;
        let version = line_buffer
            .trim()
            .parse::<i32>()
            .map_err(|_| error(&line_buffer))?;
        if version != self.version {
            return Err(InvalidValue(format!(
                "unrecognized checkpoint version: {}",
                version
            )));
        }

        line_buffer.clear();
        reader.read_line(&mut line_buffer).await?;
        let expected = line_buffer
            .trim()
            .parse::<usize>()
            .map_err(|_| error(&line_buffer))?;

        let mut points = HashMap::with_capacity(expected);
        let mut line = String::new();
        while reader.read_line(&mut line).await? > 0 {
            let mut parts = line.split_whitespace();
            let topic = parts.next().ok_or_else(|| error(&line))?.to_string();
            let partition = parts
                .next()
                .and_then(|p| p.parse::<i32>().ok())
                .ok_or_else(|| error(&line))?;
            let offset = parts
                .next()
                .and_then(|o| o.parse::<i64>().ok())
                .ok_or_else(|| error(&line))?;
            if parts.next().is_some() {
                return Err(error(&line));
            }
            points.insert(TopicPartition::new(topic, partition), offset);
            line.clear();
        }
        if points.len() != expected {
            return Err(InvalidValue(format!(
                "checkpoint {} expected {} entries, found {}",
                self.path.display(),
                expected,
                points.len()
            )));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_and_read_checkpoints() -> AppResult<()> {
        let dir = tempdir()?;
        let checkpoint_file = CheckpointFile::new(dir.path().join("replication-offset-checkpoint"));

        let mut points = HashMap::new();
        points.insert(TopicPartition::new("topic1", 0), 100);
        points.insert(TopicPartition::new("topic2", 1), 200);

        checkpoint_file.write_checkpoints(&points).await?;
        let read_points = checkpoint_file.read_checkpoints().await?;

        assert_eq!(points, read_points);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() -> AppResult<()> {
        let dir = tempdir()?;
        let checkpoint_file = CheckpointFile::new(dir.path().join("nope"));
        assert!(checkpoint_file.read_checkpoints().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_version() -> AppResult<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ck");
        tokio::fs::write(&path, "7\n0\n").await?;
        let checkpoint_file = CheckpointFile::new(&path);
        assert!(checkpoint_file.read_checkpoints().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_entry_count_mismatch() -> AppResult<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ck");
        tokio::fs::write(&path, "0\n2\ntopic1 0 5\n").await?;
        let checkpoint_file = CheckpointFile::new(&path);
        assert!(checkpoint_file.read_checkpoints().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_rewrite_replaces_contents() -> AppResult<()> {
        let dir = tempdir()?;
        let checkpoint_file = CheckpointFile::new(dir.path().join("ck"));

        let mut points = HashMap::new();
        points.insert(TopicPartition::new("a", 0), 1);
        checkpoint_file.write_checkpoints(&points).await?;

        points.insert(TopicPartition::new("a", 0), 9);
        checkpoint_file.write_checkpoints(&points).await?;

        let read_points = checkpoint_file.read_checkpoints().await?;
        assert_eq!(read_points.get(&TopicPartition::new("a", 0)), Some(&9));
        Ok(())
    }
}
