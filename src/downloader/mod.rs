pub mod http_pool;
pub mod manager;
pub mod writer;

use serde::{Deserialize, Serialize};
use crate::api::Song;
use crate::errors::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub source: String,
    /// `None` for standalone tasks.
    pub batch_id: Option<String>,
    pub song: Song,
    pub status: DownloadStatus,
    /// Set only when `status` is `Failed`.
    pub error: Option<String>,
    /// Set only when `status` is `Completed`.
    pub file_path: Option<PathBuf>,
    pub skipped: bool,
    pub downloaded_bytes: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadTask {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

/// Aggregated view of a batch, computed from its member tasks on every read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchInfo {
    pub id: String,
    pub name: String,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchInfo {
    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub skipped: bool,
    pub bytes: u64,
}

/// Puts a song's audio (and sidecars) on disk.
#[async_trait::async_trait]
pub trait SongWriter: Send + Sync {
    /// `progress` receives the cumulative byte count after every chunk.
    async fn write(
        &self,
        base_dir: &Path,
        song: &Song,
        url: &str,
        lyrics: Option<&str>,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<WriteOutcome>;

    async fn write_cover(&self, base_dir: &Path, song: &Song) -> Result<Option<PathBuf>>;
}
