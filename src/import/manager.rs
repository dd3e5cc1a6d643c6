//! Import task manager.
//!
//! Each `start_import` call becomes an independent tokio task driving one
//! batch through the album's store, item by item, in input order. Pause and
//! cancel are cooperative: a `watch` control channel is checked at every
//! item boundary, so an encryption already in flight always completes and
//! progress never reports a torn write. Progress is observable through a
//! `broadcast` channel emitting one update per unit of work plus terminal
//! events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use super::progress::{ImportProgressUpdate, ImportTaskState};
use super::task::{FailedItem, ImportTask};
use crate::album::AlbumManager;
use crate::error::{StoreError, StoreResult};
use crate::media::CleartextMedia;
use crate::store::MediaStore;

/// Per-item durations kept for the moving-average ETA
const ETA_WINDOW: usize = 8;

/// Buffered progress events per subscriber
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Cooperative control signal, checked between items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

struct TaskEntry {
    task: ImportTask,
    control: watch::Sender<ControlSignal>,
}

type TaskMap = Arc<RwLock<HashMap<String, TaskEntry>>>;

/// Drives batch imports as pausable, cancellable background tasks
pub struct ImportManager {
    albums: Arc<AlbumManager>,
    tasks: TaskMap,
    progress_tx: broadcast::Sender<ImportProgressUpdate>,
}

impl ImportManager {
    pub fn new(albums: Arc<AlbumManager>) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            albums,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            progress_tx,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // CONSUMER API
    // ═══════════════════════════════════════════════════════════════

    /// Start a batch import into an album.
    ///
    /// Items are processed in input order; a per-item failure is recorded on
    /// the task and the batch continues. A task that cannot start at all
    /// (unknown album, no current key) is registered in `Failed` and the
    /// error returned.
    pub fn start_import(
        &self,
        media: Vec<CleartextMedia>,
        album_id: Uuid,
        asset_identifiers: Vec<String>,
    ) -> StoreResult<String> {
        let mut task = ImportTask::new(media, album_id, asset_identifiers);
        let task_id = task.id.clone();

        let Some(album) = self.albums.find(album_id) else {
            let err = StoreError::AlbumNotFound(album_id.to_string());
            self.register_failed(task, err.to_string());
            return Err(err);
        };

        if self.albums.registry().current_key().is_none() {
            self.register_failed(task, StoreError::MissingPrivateKey.to_string());
            return Err(StoreError::MissingPrivateKey);
        }

        let store = Arc::new(MediaStore::open(&album, &self.albums)?);
        let media = task.media.clone();
        task.progress.state = ImportTaskState::Running;

        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);
        self.tasks.write().insert(
            task_id.clone(),
            TaskEntry {
                task,
                control: control_tx,
            },
        );

        log::info!(
            "starting import task {} ({} items into album '{}')",
            task_id,
            media.len(),
            album.name
        );

        let worker = TaskWorker {
            task_id: task_id.clone(),
            store,
            tasks: self.tasks.clone(),
            progress_tx: self.progress_tx.clone(),
        };
        tokio::spawn(worker.run(media, control_rx));

        Ok(task_id)
    }

    /// Request a pause; honored before the next item begins.
    ///
    /// Idempotent when already paused; a no-op on unknown or terminal tasks.
    pub fn pause_import(&self, task_id: &str) {
        let tasks = self.tasks.read();
        let Some(entry) = tasks.get(task_id) else {
            log::debug!("pause requested for unknown task {}", task_id);
            return;
        };
        if entry.task.state().is_terminal() {
            return;
        }
        let _ = entry.control.send(ControlSignal::Pause);
    }

    /// Resume a paused task at its next unprocessed item
    pub fn resume_import(&self, task_id: &str) -> StoreResult<()> {
        let mut tasks = self.tasks.write();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        let pause_pending = *entry.control.borrow() == ControlSignal::Pause;
        if *entry.task.state() != ImportTaskState::Paused && !pause_pending {
            return Err(StoreError::InvalidTaskState(format!(
                "task {} is not paused",
                task_id
            )));
        }

        entry.task.progress.state = ImportTaskState::Running;
        let _ = entry.control.send(ControlSignal::Run);
        Ok(())
    }

    /// Cancel a task from any non-terminal state.
    ///
    /// Remaining items are discarded; items already saved stay on disk.
    pub fn cancel_import(&self, task_id: &str) {
        let tasks = self.tasks.read();
        let Some(entry) = tasks.get(task_id) else {
            log::debug!("cancel requested for unknown task {}", task_id);
            return;
        };
        if entry.task.state().is_terminal() {
            return;
        }
        let _ = entry.control.send(ControlSignal::Cancel);
    }

    /// Purge completed, cancelled, and failed tasks from the tracked set.
    /// Saved media is untouched.
    pub fn remove_completed_tasks(&self) {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, entry| !entry.task.state().is_terminal());
        log::debug!("removed {} finished tasks", before - tasks.len());
    }

    /// Subscribe to progress updates (one per unit of work plus terminal
    /// events). Subscribe before `start_import` to observe a task from its
    /// first item.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportProgressUpdate> {
        self.progress_tx.subscribe()
    }

    /// Snapshot of all tracked tasks
    pub fn current_tasks(&self) -> Vec<ImportTask> {
        let mut tasks: Vec<ImportTask> = self
            .tasks
            .read()
            .values()
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub fn task(&self, task_id: &str) -> Option<ImportTask> {
        self.tasks.read().get(task_id).map(|e| e.task.clone())
    }

    /// Whether any task is currently running
    pub fn is_importing(&self) -> bool {
        self.tasks
            .read()
            .values()
            .any(|entry| *entry.task.state() == ImportTaskState::Running)
    }

    /// Mean progress across active (running or paused) tasks
    pub fn overall_progress(&self) -> f64 {
        let tasks = self.tasks.read();
        let active: Vec<f64> = tasks
            .values()
            .filter(|entry| entry.task.state().is_active())
            .map(|entry| entry.task.progress.overall_progress)
            .collect();

        if active.is_empty() {
            0.0
        } else {
            active.iter().sum::<f64>() / active.len() as f64
        }
    }

    fn register_failed(&self, mut task: ImportTask, reason: String) {
        log::warn!("import task {} failed to start: {}", task.id, reason);
        task.progress.state = ImportTaskState::Failed(reason);
        let (control_tx, _) = watch::channel(ControlSignal::Cancel);
        let update = task.progress.clone();
        self.tasks.write().insert(
            task.id.clone(),
            TaskEntry {
                task,
                control: control_tx,
            },
        );
        let _ = self.progress_tx.send(update);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TASK WORKER
// ═══════════════════════════════════════════════════════════════════════════

/// State owned by one running import loop
struct TaskWorker {
    task_id: String,
    store: Arc<MediaStore>,
    tasks: TaskMap,
    progress_tx: broadcast::Sender<ImportProgressUpdate>,
}

impl TaskWorker {
    async fn run(self, media: Vec<CleartextMedia>, mut control_rx: watch::Receiver<ControlSignal>) {
        let total = media.len();
        let mut durations: VecDeque<Duration> = VecDeque::with_capacity(ETA_WINDOW);
        let mut processed = 0usize;

        for (index, item) in media.into_iter().enumerate() {
            // Pause/cancel boundary: the only suspension point between items
            loop {
                let signal = *control_rx.borrow();
                match signal {
                    ControlSignal::Run => break,
                    ControlSignal::Cancel => {
                        self.finalize(ImportTaskState::Cancelled, processed, total);
                        return;
                    }
                    ControlSignal::Pause => {
                        self.publish_state(ImportTaskState::Paused, index, processed, total);
                        if control_rx.changed().await.is_err() {
                            // Manager dropped; nothing left to report to
                            return;
                        }
                    }
                }
            }
            self.set_state(ImportTaskState::Running);

            // The whole batch dies only when it cannot continue at all
            if self.store.registry().current_key().is_none() {
                self.finalize(
                    ImportTaskState::Failed(StoreError::MissingPrivateKey.to_string()),
                    processed,
                    total,
                );
                return;
            }

            let started = Instant::now();
            let store = self.store.clone();
            let item_for_save = item.clone();
            let result =
                tokio::task::spawn_blocking(move || store.save(&item_for_save)).await;

            processed += 1;

            match result {
                Ok(Ok(_)) => {
                    durations.push_back(started.elapsed());
                    if durations.len() > ETA_WINDOW {
                        durations.pop_front();
                    }
                }
                Ok(Err(e)) => {
                    log::warn!("import item {} failed: {}", item.id, e);
                    self.record_failed_item(&item.id, &e.to_string());
                }
                Err(join_err) => {
                    log::warn!("import item {} panicked: {}", item.id, join_err);
                    self.record_failed_item(&item.id, "encryption worker panicked");
                }
            }

            self.publish_item_progress(index, processed, total, &item, &durations);
        }

        self.finalize(ImportTaskState::Completed, processed, total);
    }

    fn eta(&self, durations: &VecDeque<Duration>, remaining: usize) -> Option<Duration> {
        if durations.is_empty() || remaining == 0 {
            return None;
        }
        let avg = durations.iter().sum::<Duration>() / durations.len() as u32;
        Some(avg * remaining as u32)
    }

    fn publish_item_progress(
        &self,
        index: usize,
        processed: usize,
        total: usize,
        item: &CleartextMedia,
        durations: &VecDeque<Duration>,
    ) {
        let overall = processed as f64 / total.max(1) as f64;
        let update = ImportProgressUpdate {
            task_id: self.task_id.clone(),
            current_file_index: index,
            total_files: total,
            current_file_progress: 1.0,
            overall_progress: overall,
            current_file_name: item.file_name().or_else(|| Some(item.id.clone())),
            state: ImportTaskState::Running,
            estimated_time_remaining: self.eta(durations, total - processed),
        };
        self.store_progress(update.clone());
        let _ = self.progress_tx.send(update);
    }

    /// Publish a state change that is not tied to a finished unit of work
    fn publish_state(&self, state: ImportTaskState, index: usize, processed: usize, total: usize) {
        let update = ImportProgressUpdate {
            task_id: self.task_id.clone(),
            current_file_index: index,
            total_files: total,
            current_file_progress: 0.0,
            overall_progress: processed as f64 / total.max(1) as f64,
            current_file_name: None,
            state,
            estimated_time_remaining: None,
        };
        self.store_progress(update.clone());
        let _ = self.progress_tx.send(update);
    }

    fn finalize(&self, state: ImportTaskState, processed: usize, total: usize) {
        let overall = if state == ImportTaskState::Completed {
            1.0
        } else {
            processed as f64 / total.max(1) as f64
        };

        let update = ImportProgressUpdate {
            task_id: self.task_id.clone(),
            current_file_index: processed.saturating_sub(1),
            total_files: total,
            current_file_progress: if processed > 0 { 1.0 } else { 0.0 },
            overall_progress: overall,
            current_file_name: None,
            state: state.clone(),
            estimated_time_remaining: None,
        };

        log::info!(
            "import task {} finished: {:?} ({}/{} items)",
            self.task_id,
            state,
            processed,
            total
        );

        self.store_progress(update.clone());
        let _ = self.progress_tx.send(update);
    }

    fn set_state(&self, state: ImportTaskState) {
        let mut tasks = self.tasks.write();
        if let Some(entry) = tasks.get_mut(&self.task_id) {
            entry.task.progress.state = state;
        }
    }

    fn store_progress(&self, update: ImportProgressUpdate) {
        let mut tasks = self.tasks.write();
        if let Some(entry) = tasks.get_mut(&self.task_id) {
            entry.task.progress = update;
        }
    }

    fn record_failed_item(&self, media_id: &str, reason: &str) {
        let mut tasks = self.tasks.write();
        if let Some(entry) = tasks.get_mut(&self.task_id) {
            entry.task.failed_items.push(FailedItem {
                media_id: media_id.to_string(),
                reason: reason.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::{Album, StorageOption};
    use crate::keychain::{FileSecretStore, Protection};
    use crate::keyring::KeyRegistry;
    use crate::media::MediaSource;
    use crate::prefs::PreferenceStore;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Env {
        _dir: TempDir,
        registry: Arc<KeyRegistry>,
        albums: Arc<AlbumManager>,
        album: Album,
        manager: ImportManager,
    }

    fn setup() -> Env {
        let dir = tempdir().unwrap();
        let prefs =
            Arc::new(PreferenceStore::open(&dir.path().join("prefs.json"), None).unwrap());
        let secrets =
            FileSecretStore::open(&dir.path().join("keys"), Protection::DeviceKey).unwrap();
        let registry = Arc::new(KeyRegistry::open(Box::new(secrets), prefs.clone()).unwrap());
        registry.create("main", true).unwrap();

        let albums = Arc::new(AlbumManager::new(
            prefs,
            registry.clone(),
            &dir.path().join("data"),
            None,
        ));
        let album = albums.create("imports", StorageOption::Local).unwrap();
        let manager = ImportManager::new(albums.clone());

        Env {
            _dir: dir,
            registry,
            albums,
            album,
            manager,
        }
    }

    fn batch(count: usize) -> Vec<CleartextMedia> {
        (0..count)
            .map(|i| CleartextMedia::from_bytes(format!("media item {}", i).into_bytes()))
            .collect()
    }

    fn album_store(env: &Env) -> MediaStore {
        MediaStore::open(&env.album, &env.albums).unwrap()
    }

    /// Receive events for one task until a terminal event arrives
    async fn collect_until_terminal(
        rx: &mut broadcast::Receiver<ImportProgressUpdate>,
        task_id: &str,
    ) -> Vec<ImportProgressUpdate> {
        let mut events = Vec::new();
        loop {
            let update = rx.recv().await.unwrap();
            if update.task_id != task_id {
                continue;
            }
            let terminal = update.state.is_terminal();
            events.push(update);
            if terminal {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_six_item_import_events() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let task_id = env
            .manager
            .start_import(batch(6), env.album.id, Vec::new())
            .unwrap();

        let events = collect_until_terminal(&mut rx, &task_id).await;

        let item_events: Vec<_> = events
            .iter()
            .filter(|e| e.state == ImportTaskState::Running)
            .collect();
        assert_eq!(item_events.len(), 6);
        for (expected, event) in item_events.iter().enumerate() {
            assert_eq!(event.current_file_index, expected);
        }

        let last = events.last().unwrap();
        assert_eq!(last.state, ImportTaskState::Completed);
        assert!((last.overall_progress - 1.0).abs() < f64::EPSILON);

        assert!(!env.manager.is_importing());
        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_pause_then_resume_completes_everything() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let task_id = env
            .manager
            .start_import(batch(4), env.album.id, Vec::new())
            .unwrap();

        // On a current-thread runtime the worker has not polled yet, so the
        // pause lands before the first item boundary.
        env.manager.pause_import(&task_id);
        // Pausing twice is allowed
        env.manager.pause_import(&task_id);

        // Wait for the worker to honor the pause
        loop {
            let update = rx.recv().await.unwrap();
            if update.task_id == task_id && update.state == ImportTaskState::Paused {
                break;
            }
        }
        assert_eq!(
            *env.manager.task(&task_id).unwrap().state(),
            ImportTaskState::Paused
        );
        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 0);

        env.manager.resume_import(&task_id).unwrap();
        let events = collect_until_terminal(&mut rx, &task_id).await;

        let item_events: Vec<_> = events
            .iter()
            .filter(|e| e.state == ImportTaskState::Running)
            .collect();
        // Every item processed exactly once
        assert_eq!(item_events.len(), 4);
        for (expected, event) in item_events.iter().enumerate() {
            assert_eq!(event.current_file_index, expected);
        }

        let last = events.last().unwrap();
        assert_eq!(last.state, ImportTaskState::Completed);
        assert!((last.overall_progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_resume_requires_paused_state() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let task_id = env
            .manager
            .start_import(batch(1), env.album.id, Vec::new())
            .unwrap();
        collect_until_terminal(&mut rx, &task_id).await;

        assert!(matches!(
            env.manager.resume_import(&task_id),
            Err(StoreError::InvalidTaskState(_))
        ));
        assert!(matches!(
            env.manager.resume_import("no-such-task"),
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_first_item_discards_batch() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let task_id = env
            .manager
            .start_import(batch(5), env.album.id, Vec::new())
            .unwrap();
        env.manager.cancel_import(&task_id);

        let events = collect_until_terminal(&mut rx, &task_id).await;
        assert_eq!(events.last().unwrap().state, ImportTaskState::Cancelled);

        // Nothing was saved, nothing is left queued
        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 0);
        assert_eq!(
            *env.manager.task(&task_id).unwrap().state(),
            ImportTaskState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_preserves_completed_work() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let task_id = env
            .manager
            .start_import(batch(20), env.album.id, Vec::new())
            .unwrap();

        let mut item_events = 0usize;
        let terminal_state;
        loop {
            let update = rx.recv().await.unwrap();
            if update.task_id != task_id {
                continue;
            }
            if update.state == ImportTaskState::Running {
                item_events += 1;
                if item_events == 3 {
                    env.manager.cancel_import(&task_id);
                }
            }
            if update.state.is_terminal() {
                terminal_state = update.state;
                break;
            }
        }

        // Already-saved items persisted and stayed decryptable; nothing
        // beyond the processed count exists on disk.
        let store = album_store(&env);
        let saved = store.enumerate_media().unwrap();
        assert_eq!(saved.len(), item_events);
        for file in &saved {
            store.load(file).unwrap();
        }

        if terminal_state == ImportTaskState::Cancelled {
            assert!(item_events < 20);
        }
    }

    #[tokio::test]
    async fn test_per_item_failure_does_not_abort_batch() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let mut media = batch(2);
        media.insert(
            1,
            CleartextMedia {
                id: "broken-item".into(),
                source: MediaSource::Path(Path::new("/nonexistent/source.jpg").to_path_buf()),
                media_type: crate::media::MediaType::Unknown,
            },
        );

        let task_id = env
            .manager
            .start_import(media, env.album.id, Vec::new())
            .unwrap();
        let events = collect_until_terminal(&mut rx, &task_id).await;

        let last = events.last().unwrap();
        assert_eq!(last.state, ImportTaskState::Completed);
        assert!((last.overall_progress - 1.0).abs() < f64::EPSILON);

        let task = env.manager.task(&task_id).unwrap();
        assert_eq!(task.failed_items.len(), 1);
        assert_eq!(task.failed_items[0].media_id, "broken-item");

        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_with_unknown_album_fails_immediately() {
        let env = setup();

        let result = env
            .manager
            .start_import(batch(2), Uuid::new_v4(), Vec::new());
        assert!(matches!(result, Err(StoreError::AlbumNotFound(_))));

        let tasks = env.manager.current_tasks();
        assert_eq!(tasks.len(), 1);
        assert!(matches!(tasks[0].state(), ImportTaskState::Failed(_)));
    }

    #[tokio::test]
    async fn test_start_without_current_key_fails_immediately() {
        let env = setup();
        env.registry.delete("main").unwrap();

        let result = env
            .manager
            .start_import(batch(2), env.album.id, Vec::new());
        assert!(matches!(result, Err(StoreError::MissingPrivateKey)));

        let tasks = env.manager.current_tasks();
        assert_eq!(tasks.len(), 1);
        assert!(matches!(tasks[0].state(), ImportTaskState::Failed(_)));
    }

    #[tokio::test]
    async fn test_remove_completed_tasks_purges_terminal_only() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let done = env
            .manager
            .start_import(batch(2), env.album.id, Vec::new())
            .unwrap();
        collect_until_terminal(&mut rx, &done).await;

        let paused = env
            .manager
            .start_import(batch(2), env.album.id, Vec::new())
            .unwrap();
        env.manager.pause_import(&paused);
        loop {
            let update = rx.recv().await.unwrap();
            if update.task_id == paused && update.state == ImportTaskState::Paused {
                break;
            }
        }

        env.manager.remove_completed_tasks();

        let remaining = env.manager.current_tasks();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, paused);
        // Saved media from the finished task is untouched
        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 2);

        // Leave the paused worker in a known end state
        env.manager.cancel_import(&paused);
        collect_until_terminal(&mut rx, &paused).await;
    }

    #[tokio::test]
    async fn test_concurrent_tasks_and_aggregate_state() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let other_album = env.albums.create("second", StorageOption::Local).unwrap();

        let a = env
            .manager
            .start_import(batch(3), env.album.id, Vec::new())
            .unwrap();
        let b = env
            .manager
            .start_import(batch(3), other_album.id, Vec::new())
            .unwrap();

        // Both tasks registered and visible
        assert_eq!(env.manager.current_tasks().len(), 2);

        let mut terminal_seen = 0;
        while terminal_seen < 2 {
            let update = rx.recv().await.unwrap();
            if (update.task_id == a || update.task_id == b) && update.state.is_terminal() {
                terminal_seen += 1;
            }
        }

        assert!(!env.manager.is_importing());
        assert_eq!(album_store(&env).enumerate_media().unwrap().len(), 3);
        let other_store = MediaStore::open(&other_album, &env.albums).unwrap();
        assert_eq!(other_store.enumerate_media().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_eta_appears_after_first_item() {
        let env = setup();
        let mut rx = env.manager.subscribe();

        let task_id = env
            .manager
            .start_import(batch(3), env.album.id, Vec::new())
            .unwrap();
        let events = collect_until_terminal(&mut rx, &task_id).await;

        let item_events: Vec<_> = events
            .iter()
            .filter(|e| e.state == ImportTaskState::Running)
            .collect();
        // Not on the last item (nothing remaining), but present in between
        assert!(item_events[0].estimated_time_remaining.is_some());
        assert!(item_events[1].estimated_time_remaining.is_some());
        assert!(item_events[2].estimated_time_remaining.is_none());
    }
}
