use crate::api::{Provider, Song};
use crate::downloader::{BatchInfo, DownloadStatus, DownloadTask, SongWriter, WriteOutcome};
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Semaphore;

pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Default)]
struct Registry {
    tasks: HashMap<String, DownloadTask>,
    /// Creation order; append-only.
    order: Vec<String>,
    batch_names: HashMap<String, String>,
}

struct Shared {
    registry: RwLock<Registry>,
    semaphore: Arc<Semaphore>,
    writer: Arc<dyn SongWriter>,
    music_dir: PathBuf,
    concurrency: usize,
    next_id: AtomicU64,
    fetch_lyrics: bool,
    fetch_covers: bool,
}

/// Runs song downloads in the background with at most `concurrency` doing I/O at once.
///
/// Cloning is cheap and every clone sees the same tasks.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

/// Configures a [`DownloadManager`] before its shared state is built.
pub struct ManagerBuilder {
    music_dir: PathBuf,
    writer: Arc<dyn SongWriter>,
    concurrency: usize,
    fetch_lyrics: bool,
    fetch_covers: bool,
}

impl ManagerBuilder {
    /// Values below one are raised to one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn lyrics(mut self, enabled: bool) -> Self {
        self.fetch_lyrics = enabled;
        self
    }

    pub fn covers(mut self, enabled: bool) -> Self {
        self.fetch_covers = enabled;
        self
    }

    pub fn build(self) -> DownloadManager {
        let concurrency = self.concurrency.max(1);
        DownloadManager {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                semaphore: Arc::new(Semaphore::new(concurrency)),
                writer: self.writer,
                music_dir: self.music_dir,
                concurrency,
                next_id: AtomicU64::new(1),
                fetch_lyrics: self.fetch_lyrics,
                fetch_covers: self.fetch_covers,
            }),
        }
    }
}

impl DownloadManager {
    pub fn new(
        music_dir: impl Into<PathBuf>,
        concurrency: usize,
        writer: Arc<dyn SongWriter>,
    ) -> Self {
        Self::builder(music_dir, writer).concurrency(concurrency).build()
    }

    /// Lyrics and covers are fetched unless turned off here.
    pub fn builder(music_dir: impl Into<PathBuf>, writer: Arc<dyn SongWriter>) -> ManagerBuilder {
        ManagerBuilder {
            music_dir: music_dir.into(),
            writer,
            concurrency: DEFAULT_CONCURRENCY,
            fetch_lyrics: true,
            fetch_covers: true,
        }
    }

    pub fn music_dir(&self) -> &Path {
        &self.shared.music_dir
    }

    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Registers a task and starts it in the background. Never waits on I/O.
    ///
    /// The provider is consulted only once the task holds a download slot, so
    /// short-lived signed URLs are resolved fresh. Must be called inside a Tokio runtime.
    pub fn enqueue(&self, song: Song, source: &str, provider: Arc<dyn Provider>) -> String {
        let task = self.shared.new_task(song, source, None);
        let task_id = task.id.clone();
        let song = task.song.clone();
        {
            let mut registry = self.shared.write();
            registry.order.push(task_id.clone());
            registry.tasks.insert(task_id.clone(), task);
        }
        info!("📥 Queued {} as {}", song, task_id);
        self.spawn(task_id.clone(), song, provider);
        task_id
    }

    /// Queues one task per song under a fresh batch ID. Members are scheduled
    /// independently and share the pool with standalone tasks.
    pub fn enqueue_batch(
        &self,
        songs: Vec<Song>,
        batch_name: &str,
        source: &str,
        provider: Arc<dyn Provider>,
    ) -> String {
        let batch_id = format!("batch-{}", self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        if songs.is_empty() {
            warn!("Batch {} ({}) has no songs", batch_id, batch_name);
        }

        let tasks: Vec<DownloadTask> = songs
            .into_iter()
            .map(|song| self.shared.new_task(song, source, Some(batch_id.clone())))
            .collect();
        let jobs: Vec<(String, Song)> = tasks
            .iter()
            .map(|t| (t.id.clone(), t.song.clone()))
            .collect();

        {
            let mut registry = self.shared.write();
            registry.batch_names.insert(batch_id.clone(), batch_name.to_string());
            for task in tasks {
                registry.order.push(task.id.clone());
                registry.tasks.insert(task.id.clone(), task);
            }
        }

        info!(
            "📥 Queued batch {} ({}) with {} songs from {}",
            batch_id,
            batch_name,
            jobs.len(),
            source
        );
        for (task_id, song) in jobs {
            self.spawn(task_id, song, provider.clone());
        }
        batch_id
    }

    pub fn get_task(&self, task_id: &str) -> Option<DownloadTask> {
        self.shared.read().tasks.get(task_id).cloned()
    }

    /// All tasks in creation order.
    pub fn list_tasks(&self) -> Vec<DownloadTask> {
        let registry = self.shared.read();
        registry
            .order
            .iter()
            .filter_map(|id| registry.tasks.get(id).cloned())
            .collect()
    }

    /// One entry per batch with at least one task, in first-seen order.
    pub fn list_batches(&self) -> Vec<BatchInfo> {
        let registry = self.shared.read();
        let mut batches: Vec<BatchInfo> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for task in registry.order.iter().filter_map(|id| registry.tasks.get(id)) {
            let Some(batch_id) = task.batch_id.as_deref() else {
                continue;
            };
            let slot = *index.entry(batch_id).or_insert_with(|| {
                batches.push(BatchInfo {
                    id: batch_id.to_string(),
                    name: registry.batch_names.get(batch_id).cloned().unwrap_or_default(),
                    ..BatchInfo::default()
                });
                batches.len() - 1
            });
            tally(&mut batches[slot], task);
        }

        batches
    }

    pub fn get_batch(&self, batch_id: &str) -> Option<BatchInfo> {
        let registry = self.shared.read();
        let mut info: Option<BatchInfo> = None;
        for task in registry.tasks.values().filter(|t| t.batch_id.as_deref() == Some(batch_id)) {
            let info = info.get_or_insert_with(|| BatchInfo {
                id: batch_id.to_string(),
                name: registry.batch_names.get(batch_id).cloned().unwrap_or_default(),
                ..BatchInfo::default()
            });
            tally(info, task);
        }
        info
    }

    /// Member tasks of a batch in creation order.
    pub fn batch_tasks(&self, batch_id: &str) -> Vec<DownloadTask> {
        self.list_tasks()
            .into_iter()
            .filter(|t| t.batch_id.as_deref() == Some(batch_id))
            .collect()
    }

    /// True once every known task has completed or failed.
    pub fn is_idle(&self) -> bool {
        self.shared.read().tasks.values().all(DownloadTask::is_terminal)
    }

    fn spawn(&self, task_id: String, song: Song, provider: Arc<dyn Provider>) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(run_task(shared.clone(), task_id.clone(), song, provider));
            if run.catch_unwind().await.is_err() {
                error!("Download task {} panicked", task_id);
                shared.fail(&task_id, "download task panicked".to_string());
            }
        });
    }
}

fn tally(info: &mut BatchInfo, task: &DownloadTask) {
    info.total += 1;
    match task.status {
        DownloadStatus::Pending => info.pending += 1,
        DownloadStatus::Running => info.running += 1,
        DownloadStatus::Completed => info.completed += 1,
        DownloadStatus::Failed => info.failed += 1,
    }
    if task.skipped {
        info.skipped += 1;
    }
}

/// One task's life: wait for a slot, resolve, fetch lyrics, write, cover, finish.
async fn run_task(shared: Arc<Shared>, task_id: String, song: Song, provider: Arc<dyn Provider>) {
    // Held until this function returns, on every path.
    let _permit = match shared.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            shared.fail(&task_id, format!("acquire download slot: {}", e));
            return;
        }
    };
    shared.mark_running(&task_id);

    let url = match provider.download_url(&song).await {
        Ok(url) if !url.trim().is_empty() => url,
        Ok(_) => {
            shared.fail(&task_id, "download url not found".to_string());
            return;
        }
        Err(e) => {
            warn!("❌ Could not resolve {} ({}): {}", song, task_id, e);
            shared.fail(&task_id, e.to_string());
            return;
        }
    };

    let lyrics = if shared.fetch_lyrics {
        match provider.lyrics(&song).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("Lyrics unavailable for {}: {}", song, e);
                None
            }
        }
    } else {
        None
    };

    let mut progress = {
        let shared = shared.clone();
        let task_id = task_id.clone();
        move |bytes: u64| shared.record_progress(&task_id, bytes)
    };

    let outcome = shared
        .writer
        .write(&shared.music_dir, &song, &url, lyrics.as_deref(), &mut progress)
        .await;

    match outcome {
        Ok(outcome) => {
            if shared.fetch_covers {
                if let Err(e) = shared.writer.write_cover(&shared.music_dir, &song).await {
                    warn!("Cover art unavailable for {}: {}", song, e);
                }
            }
            shared.complete(&task_id, outcome);
        }
        Err(e) => {
            warn!("❌ Download of {} ({}) failed: {}", song, task_id, e);
            shared.fail(&task_id, e.to_string());
        }
    }
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_task(&self, song: Song, source: &str, batch_id: Option<String>) -> DownloadTask {
        let id = format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        DownloadTask {
            id,
            source: source.to_string(),
            batch_id,
            song,
            status: DownloadStatus::Pending,
            error: None,
            file_path: None,
            skipped: false,
            downloaded_bytes: 0,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies `f` to a non-terminal task under the write lock.
    fn update(&self, task_id: &str, f: impl FnOnce(&mut DownloadTask)) {
        let mut registry = self.write();
        match registry.tasks.get_mut(task_id) {
            Some(task) if !task.is_terminal() => f(task),
            Some(_) => debug!("Ignoring update for finished task {}", task_id),
            None => warn!("Update for unknown task {}", task_id),
        }
    }

    fn mark_running(&self, task_id: &str) {
        self.update(task_id, |task| {
            task.status = DownloadStatus::Running;
            task.started_at = Some(chrono::Utc::now());
        });
    }

    fn record_progress(&self, task_id: &str, bytes: u64) {
        self.update(task_id, |task| task.downloaded_bytes = bytes);
    }

    fn complete(&self, task_id: &str, outcome: WriteOutcome) {
        self.update(task_id, |task| {
            task.status = DownloadStatus::Completed;
            task.file_path = Some(outcome.path);
            task.skipped = outcome.skipped;
            task.downloaded_bytes = outcome.bytes;
            task.completed_at = Some(chrono::Utc::now());
        });
        info!("✅ Task {} completed", task_id);
    }

    fn fail(&self, task_id: &str, error: String) {
        self.update(task_id, |task| {
            task.status = DownloadStatus::Failed;
            task.error = Some(error);
            task.file_path = None;
            task.completed_at = Some(chrono::Utc::now());
        });
    }
}
