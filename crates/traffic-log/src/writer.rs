use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::entry::TrafficEntry;

/// Errors that can occur during traffic log I/O.
#[derive(Debug, thiserror::Error)]
pub enum TrafficWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open traffic log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize traffic entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to traffic log: {0}")]
    Write(std::io::Error),

    #[error("failed to flush traffic log: {0}")]
    Flush(std::io::Error),

    #[error("failed to rotate traffic log: {0}")]
    Rotate(std::io::Error),
}

/// Size limits for the traffic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the active file would grow past this many bytes.
    /// `0` disables rotation.
    pub max_bytes: u64,
    /// Number of rotated files (`path.1` .. `path.N`) to keep.
    pub max_files: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// Append-only file writer that serialises [`TrafficEntry`] values as
/// JSON-lines and rotates the file when it reaches the size limit.
pub struct TrafficWriter {
    path: PathBuf,
    file: tokio::fs::File,
    size: u64,
    policy: RotationPolicy,
}

impl TrafficWriter {
    /// Open (or create) the traffic log at `path` in append mode.
    ///
    /// Parent directories are created automatically if they do not exist.
    pub async fn new(
        path: impl AsRef<Path>,
        policy: RotationPolicy,
    ) -> Result<Self, TrafficWriteError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(TrafficWriteError::CreateDir)?;
            }
        }

        let file = open_append(&path).await?;
        let size = file
            .metadata()
            .await
            .map_err(TrafficWriteError::OpenFile)?
            .len();

        Ok(Self {
            path,
            file,
            size,
            policy,
        })
    }

    /// Serialise `entry` as a single JSON line and append it to the file,
    /// rotating first if the line would push the file over the limit.
    pub async fn write(&mut self, entry: &TrafficEntry) -> Result<(), TrafficWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let limit = self.policy.max_bytes;
        if limit > 0 && self.size > 0 && self.size + line.len() as u64 > limit {
            self.rotate().await?;
        }

        self.file
            .write_all(&line)
            .await
            .map_err(TrafficWriteError::Write)?;
        self.size += line.len() as u64;

        Ok(())
    }

    /// Flush the underlying file, ensuring all buffered data reaches disk.
    pub async fn flush(&mut self) -> Result<(), TrafficWriteError> {
        self.file.flush().await.map_err(TrafficWriteError::Flush)
    }

    /// Shift `path.N-1` → `path.N` … `path` → `path.1`, dropping the oldest,
    /// then reopen an empty active file.
    async fn rotate(&mut self) -> Result<(), TrafficWriteError> {
        self.flush().await?;

        let keep = self.policy.max_files;
        if keep == 0 {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(TrafficWriteError::Rotate)?;
        } else {
            let oldest = rotated_path(&self.path, keep);
            if tokio::fs::try_exists(&oldest).await.unwrap_or(false) {
                tokio::fs::remove_file(&oldest)
                    .await
                    .map_err(TrafficWriteError::Rotate)?;
            }
            for n in (1..keep).rev() {
                let from = rotated_path(&self.path, n);
                if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                    tokio::fs::rename(&from, rotated_path(&self.path, n + 1))
                        .await
                        .map_err(TrafficWriteError::Rotate)?;
                }
            }
            tokio::fs::rename(&self.path, rotated_path(&self.path, 1))
                .await
                .map_err(TrafficWriteError::Rotate)?;
        }

        self.file = open_append(&self.path).await?;
        self.size = 0;
        tracing::debug!(path = %self.path.display(), "traffic log rotated");
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<tokio::fs::File, TrafficWriteError> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(TrafficWriteError::OpenFile)
}

/// `traffic.jsonl` + 2 → `traffic.jsonl.2`.
pub fn rotated_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}
